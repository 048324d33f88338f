//! Printer records returned by the cloud API.
//!
//! These are the cloud snapshots themselves: a successful poll replaces the
//! whole list, nothing is patched in place.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Tanks are rated for this many layers.
pub const TANK_MAX_LAYERS: u32 = 75_000;
/// Tanks are rated for this many days after first use.
pub const TANK_MAX_DAYS: i64 = 250;

/// Status reported for a printer or a print run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrintStatus {
    Printing,
    Finished,
    Idle,
    Aborted,
    Failed,
    Success,
    #[default]
    #[serde(other)]
    Unknown,
}

impl PrintStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PrintStatus::Printing => "PRINTING",
            PrintStatus::Finished => "FINISHED",
            PrintStatus::Idle => "IDLE",
            PrintStatus::Aborted => "ABORTED",
            PrintStatus::Failed => "FAILED",
            PrintStatus::Success => "SUCCESS",
            PrintStatus::Unknown => "UNKNOWN",
        }
    }
}

impl std::fmt::Display for PrintStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CloudPrinter {
    pub serial: String,
    #[serde(default)]
    pub machine_type_id: String,
    #[serde(default)]
    pub total_print_time_ms: i64,
    #[serde(default)]
    pub total_number_of_prints: i64,
    pub printer_status: PrinterStatus,
    #[serde(default)]
    pub cartridge_status: Option<CartridgeStatus>,
    #[serde(default)]
    pub tank_status: Option<TankStatus>,
    #[serde(default)]
    pub group: Option<String>,
    #[serde(default)]
    pub previous_print_run: Option<PrintRun>,
}

impl CloudPrinter {
    pub fn status(&self) -> PrintStatus {
        self.printer_status.status
    }

    pub fn current_run(&self) -> Option<&PrintRun> {
        self.printer_status.current_print_run.as_ref()
    }

    /// The run in progress, or the last one if the printer is idle.
    pub fn latest_run(&self) -> Option<&PrintRun> {
        self.current_run().or(self.previous_print_run.as_ref())
    }

    /// Progress of the current run, if there is one.
    pub fn progress(&self) -> Option<f64> {
        self.current_run().map(PrintRun::progress)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrinterStatus {
    #[serde(default)]
    pub status: PrintStatus,
    #[serde(default)]
    pub current_print_run: Option<PrintRun>,
    #[serde(default, deserialize_with = "api_time::option")]
    pub last_modified: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "api_time::option")]
    pub last_pinged_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub current_temperature: Option<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintRun {
    #[serde(default)]
    pub guid: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub status: PrintStatus,
    #[serde(default)]
    pub layer_count: u32,
    #[serde(default)]
    pub currently_printing_layer: u32,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub material_name: String,
    #[serde(default)]
    pub volume_ml: f32,
    #[serde(default)]
    pub probably_finished: bool,
    #[serde(default, deserialize_with = "api_time::option")]
    pub print_started_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "api_time::option")]
    pub print_finished_at: Option<DateTime<Utc>>,
    #[serde(default, deserialize_with = "api_time::option")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub estimated_duration_ms: Option<i64>,
    #[serde(default)]
    pub elapsed_duration_ms: Option<i64>,
    #[serde(default)]
    pub estimated_time_remaining_ms: Option<i64>,
    #[serde(default)]
    pub print_thumbnail: Option<PrintThumbnail>,
    #[serde(default)]
    pub print_run_success: Option<PrintRunSuccessVote>,
    #[serde(default)]
    pub message: Option<String>,
}

impl PrintRun {
    /// Fraction of layers printed, `0.0` for a run with no layers.
    pub fn progress(&self) -> f64 {
        if self.layer_count == 0 {
            return 0.0;
        }
        f64::from(self.currently_printing_layer) / f64::from(self.layer_count)
    }

    pub fn thumbnail_url(&self) -> Option<&str> {
        self.print_thumbnail.as_ref().map(|t| t.thumbnail.as_str())
    }

    /// The user's success vote overrides the reported run status.
    pub fn outcome(&self) -> PrintStatus {
        self.print_run_success
            .as_ref()
            .map(|vote| vote.print_run_success)
            .unwrap_or(self.status)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintThumbnail {
    pub thumbnail: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintRunSuccessVote {
    #[serde(default)]
    pub print_run: String,
    #[serde(default)]
    pub print_run_success: PrintStatus,
    #[serde(default, deserialize_with = "api_time::option")]
    pub created_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartridgeStatus {
    #[serde(default)]
    pub cartridge: Option<Cartridge>,
    #[serde(default)]
    pub cartridge_slot: Option<String>,
    #[serde(default, deserialize_with = "api_time::option")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cartridge {
    pub serial: String,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub initial_volume_ml: f64,
    #[serde(default)]
    pub volume_dispensed_ml: f64,
    #[serde(default)]
    pub is_empty: bool,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default, deserialize_with = "api_time::option")]
    pub last_print_date: Option<DateTime<Utc>>,
}

impl Cartridge {
    pub fn remaining_ml(&self) -> f64 {
        (self.initial_volume_ml - self.volume_dispensed_ml).max(0.0)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TankStatus {
    #[serde(default)]
    pub tank: Option<Tank>,
    #[serde(default, deserialize_with = "api_time::option")]
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Tank {
    pub serial: String,
    #[serde(default)]
    pub material: String,
    #[serde(default)]
    pub tank_type: String,
    #[serde(default)]
    pub layer_count: u32,
    #[serde(default)]
    pub layers_printed: u32,
    #[serde(default)]
    pub print_time_ms: i64,
    #[serde(default)]
    pub display_name: Option<String>,
    /// Arrives in a different format from every other timestamp, kept verbatim
    #[serde(default)]
    pub first_fill_date: Option<String>,
    #[serde(default, deserialize_with = "api_time::option")]
    pub created_at: Option<DateTime<Utc>>,
}

impl Tank {
    /// Fraction of the rated layer lifetime already used.
    pub fn layer_wear(&self) -> f64 {
        f64::from(self.layers_printed) / f64::from(TANK_MAX_LAYERS)
    }

    pub fn days_used(&self, now: DateTime<Utc>) -> Option<i64> {
        self.created_at.map(|created| (now - created).num_days())
    }

    /// Fraction of the rated day lifetime already used.
    pub fn day_wear(&self, now: DateTime<Utc>) -> Option<f64> {
        self.days_used(now)
            .map(|days| days.max(0) as f64 / TANK_MAX_DAYS as f64)
    }
}

/// Token grant response from `/o/token/`.
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: String,
    pub expires_in: i64,
    #[serde(default)]
    pub token_type: String,
    #[serde(default)]
    pub scope: String,
}

/// Timestamps look like `2021-02-23T07:33:31.403593-05:00`.
pub(crate) mod api_time {
    use chrono::{DateTime, Utc};
    use serde::{Deserialize, Deserializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S%.f%:z";

    pub fn parse(value: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_str(value, FORMAT)
            .or_else(|_| DateTime::parse_from_rfc3339(value))
            .ok()
            .map(|dt| dt.with_timezone(&Utc))
    }

    /// Unparsable timestamps become `None` rather than failing the record.
    pub fn option<'de, D>(deserializer: D) -> Result<Option<DateTime<Utc>>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw: Option<String> = Option::deserialize(deserializer)?;
        Ok(raw.as_deref().and_then(|value| {
            let parsed = parse(value);
            if parsed.is_none() {
                tracing::debug!("Ignoring unparsable timestamp: {}", value);
            }
            parsed
        }))
    }
}
