use crate::config::DEFAULT_RPC_PORT;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

/// Cloud account credentials and the OAuth session derived from them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default)]
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    #[serde(default)]
    pub token_expiry: Option<DateTime<Utc>>,
}

impl Credentials {
    pub fn has_login(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }

    /// A token with no recorded expiry is treated as expired.
    pub fn token_is_valid(&self, now: DateTime<Utc>) -> bool {
        !self.access_token.is_empty() && self.token_expiry.is_some_and(|expiry| expiry > now)
    }

    pub fn login(&self) -> Login {
        Login {
            username: self.username.clone(),
            password: self.password.clone(),
        }
    }
}

/// The user-editable half of [`Credentials`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Login {
    pub username: String,
    pub password: String,
}

impl Login {
    pub fn is_complete(&self) -> bool {
        !self.username.is_empty() && !self.password.is_empty()
    }
}

/// A LAN printer endpoint, keyed by `host:port`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceAddress {
    pub host: String,
    pub port: u16,
    pub pairing_token: Option<String>,
}

impl DeviceAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            pairing_token: None,
        }
    }

    /// Parse `host:port`; a missing or unparsable port falls back to 9999.
    pub fn parse(address: &str) -> Self {
        let address = address.trim();
        match address.rsplit_once(':') {
            Some((host, port)) => Self::new(host, port.parse().unwrap_or(DEFAULT_RPC_PORT)),
            None => Self::new(address, DEFAULT_RPC_PORT),
        }
    }

    pub fn key(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    pub fn is_paired(&self) -> bool {
        self.pairing_token.as_deref().is_some_and(|t| !t.is_empty())
    }
}

impl std::fmt::Display for DeviceAddress {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Everything that survives a restart.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoredState {
    #[serde(default)]
    pub credentials: Credentials,
    /// `host:port` -> pairing token, empty when the printer is not paired
    #[serde(default, deserialize_with = "deserialize_devices")]
    pub devices: BTreeMap<String, String>,
}

impl StoredState {
    pub fn device_addresses(&self) -> Vec<DeviceAddress> {
        self.devices
            .iter()
            .map(|(key, token)| {
                let mut address = DeviceAddress::parse(key);
                address.pairing_token = Some(token.clone()).filter(|t| !t.is_empty());
                address
            })
            .collect()
    }
}

/// Older builds stored a bare list of addresses with no tokens.
#[derive(Deserialize)]
#[serde(untagged)]
enum DeviceTable {
    Map(BTreeMap<String, String>),
    List(Vec<String>),
}

fn deserialize_devices<'de, D>(deserializer: D) -> Result<BTreeMap<String, String>, D::Error>
where
    D: Deserializer<'de>,
{
    let entries: Vec<(String, String)> = match DeviceTable::deserialize(deserializer)? {
        DeviceTable::Map(map) => map.into_iter().collect(),
        DeviceTable::List(list) => list.into_iter().map(|a| (a, String::new())).collect(),
    };

    Ok(entries
        .into_iter()
        .map(|(address, token)| (DeviceAddress::parse(&address).key(), token))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_parse_address() {
        let addr = DeviceAddress::parse("192.168.1.50:9999");
        assert_eq!(addr.host, "192.168.1.50");
        assert_eq!(addr.port, 9999);
        assert_eq!(addr.key(), "192.168.1.50:9999");

        assert_eq!(DeviceAddress::parse("10.0.0.3").port, DEFAULT_RPC_PORT);
        assert_eq!(DeviceAddress::parse("10.0.0.3:abc").port, DEFAULT_RPC_PORT);
    }

    #[test]
    fn test_token_validity() {
        let now = Utc::now();
        let mut creds = Credentials {
            access_token: "abc".to_string(),
            token_expiry: Some(now + Duration::hours(1)),
            ..Default::default()
        };
        assert!(creds.token_is_valid(now));

        creds.token_expiry = Some(now - Duration::seconds(1));
        assert!(!creds.token_is_valid(now));

        creds.token_expiry = None;
        assert!(!creds.token_is_valid(now));

        creds.token_expiry = Some(now + Duration::hours(1));
        creds.access_token.clear();
        assert!(!creds.token_is_valid(now));
    }

    #[test]
    fn test_load_map_devices() {
        let state: StoredState = serde_json::from_str(
            r#"{"devices": {"192.168.1.50:9999": "tok", "192.168.1.51:9999": ""}}"#,
        )
        .unwrap();

        let addresses = state.device_addresses();
        assert_eq!(addresses.len(), 2);
        assert_eq!(addresses[0].pairing_token.as_deref(), Some("tok"));
        assert_eq!(addresses[1].pairing_token, None);
        assert_eq!(state.credentials, Credentials::default());
    }

    #[test]
    fn test_load_legacy_device_list() {
        let state: StoredState =
            serde_json::from_str(r#"{"devices": ["192.168.1.50:9999", "192.168.1.60"]}"#).unwrap();

        assert_eq!(state.devices.len(), 2);
        assert_eq!(state.devices.get("192.168.1.60:9999"), Some(&String::new()));
        assert!(state.device_addresses().iter().all(|a| !a.is_paired()));
    }
}
