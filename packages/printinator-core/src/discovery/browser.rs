use crate::config::DEFAULT_RPC_PORT;
use futures::stream::{self, BoxStream, StreamExt};
use std::collections::HashMap;
use std::net::IpAddr;

/// A service instance as reported by the platform browser.
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredService {
    pub name: String,
    pub addresses: Vec<IpAddr>,
    /// TXT record entries
    pub txt: HashMap<String, String>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum BrowseEvent {
    Resolved(DiscoveredService),
    Failed { name: String, reason: String },
}

/// Source of resolved service instances.
///
/// Implementations wrap the platform's zero-configuration browsing. The
/// stream ends when browsing stops on its own; dropping it stops browsing.
pub trait ServiceBrowser: Send + Sync {
    fn browse(&self, service_type: &str, domain: &str) -> BoxStream<'static, BrowseEvent>;
}

/// Reports a fixed list of `host[:port]` entries, resolving host names
/// through the system resolver.
#[derive(Debug, Clone, Default)]
pub struct StaticBrowser {
    hosts: Vec<String>,
}

impl StaticBrowser {
    pub fn new(hosts: Vec<String>) -> Self {
        Self { hosts }
    }
}

impl ServiceBrowser for StaticBrowser {
    fn browse(&self, _service_type: &str, _domain: &str) -> BoxStream<'static, BrowseEvent> {
        stream::iter(self.hosts.clone())
            .then(|entry| async move { resolve_entry(&entry).await })
            .boxed()
    }
}

async fn resolve_entry(entry: &str) -> BrowseEvent {
    let (host, port) = match entry.rsplit_once(':') {
        Some((host, port)) => match port.parse::<u16>() {
            Ok(port) => (host, port),
            Err(_) => {
                return BrowseEvent::Failed {
                    name: entry.to_string(),
                    reason: format!("invalid port {:?}", port),
                };
            }
        },
        None => (entry, DEFAULT_RPC_PORT),
    };

    match tokio::net::lookup_host((host, port)).await {
        Ok(addrs) => {
            let mut txt = HashMap::new();
            txt.insert("port".to_string(), port.to_string());
            BrowseEvent::Resolved(DiscoveredService {
                name: host.to_string(),
                addresses: addrs.map(|addr| addr.ip()).collect(),
                txt,
            })
        }
        Err(e) => BrowseEvent::Failed {
            name: host.to_string(),
            reason: e.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_static_browser_resolves_literals() {
        let browser = StaticBrowser::new(vec![
            "127.0.0.1".to_string(),
            "127.0.0.1:9998".to_string(),
            "127.0.0.1:printer".to_string(),
        ]);

        let events: Vec<BrowseEvent> = browser.browse("_makerbot-jsonrpc._tcp", "local").collect().await;
        assert_eq!(events.len(), 3);

        match &events[0] {
            BrowseEvent::Resolved(service) => {
                assert_eq!(service.addresses, vec!["127.0.0.1".parse::<IpAddr>().unwrap()]);
                assert_eq!(service.txt.get("port").map(String::as_str), Some("9999"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        match &events[1] {
            BrowseEvent::Resolved(service) => {
                assert_eq!(service.txt.get("port").map(String::as_str), Some("9998"));
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(events[2], BrowseEvent::Failed { .. }));
    }
}
