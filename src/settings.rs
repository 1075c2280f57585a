use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{NaiveDate, NaiveTime};
use chrono_tz::Tz;
use config::{Config, Environment, File, FileFormat};
use log::info;
use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use thiserror::Error;

use crate::data::{DEFAULT_EXPORT_TOOL, DEFAULT_TABLES_TOOL};
use crate::reporting::aggregator::DEFAULT_TOP_ITEMS;
use crate::reporting::normalizer::{FieldMapping, Strictness, DEFAULT_TOLERANCE};
use crate::reporting::window::WindowKind;

pub const DEFAULT_SETTINGS_FILE: &str = "pos-digest.ini";
pub const ENV_PREFIX: &str = "POS_DIGEST";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load settings: {0}")]
    Load(#[from] config::ConfigError),
    #[error("unknown timezone `{0}`")]
    Timezone(String),
    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

/// Everything a run needs, loaded once at startup.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub store: StoreSettings,
    pub database: DatabaseSettings,
    pub window: WindowSettings,
    pub normalizer: NormalizerSettings,
    pub mapping: FieldMapping,
    pub report: ReportSettings,
    pub email: EmailSettings,
    pub output: OutputSettings,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreSettings {
    pub name: String,
    pub timezone: String,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            name: "My Store".to_owned(),
            timezone: "UTC".to_owned(),
        }
    }
}

impl StoreSettings {
    pub fn timezone(&self) -> Result<Tz, ConfigError> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| ConfigError::Timezone(self.timezone.clone()))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseSettings {
    pub path: PathBuf,
    pub sales_table: String,
    /// Invoice header table: payment method, VAT and service type per invoice.
    /// Empty disables the payment join and the invoice sections.
    pub invoice_table: String,
    pub export_tool: String,
    pub tables_tool: String,
    pub timeout_secs: u64,
}

impl Default for DatabaseSettings {
    fn default() -> Self {
        Self {
            path: PathBuf::from("resturant.mdb"),
            sales_table: "SALE".to_owned(),
            invoice_table: String::new(),
            export_tool: DEFAULT_EXPORT_TOOL.to_owned(),
            tables_tool: DEFAULT_TABLES_TOOL.to_owned(),
            timeout_secs: 60,
        }
    }
}

impl DatabaseSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn invoice_table(&self) -> Option<&str> {
        Some(self.invoice_table.trim()).filter(|table| !table.is_empty())
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WindowSettings {
    pub kind: WindowKind,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    #[serde(deserialize_with = "deserialize_time")]
    pub day_start: NaiveTime,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NormalizerSettings {
    pub mode: Strictness,
    pub tolerance: Decimal,
}

impl Default for NormalizerSettings {
    fn default() -> Self {
        Self {
            mode: Strictness::Strict,
            tolerance: DEFAULT_TOLERANCE,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportSettings {
    pub title: String,
    pub rows_per_page: usize,
    pub top_items: usize,
    pub font: String,
    pub bold_font: String,
    pub logo: Option<PathBuf>,
    pub compare_previous: bool,
}

impl Default for ReportSettings {
    fn default() -> Self {
        Self {
            title: "Sales Report".to_owned(),
            rows_per_page: 25,
            top_items: DEFAULT_TOP_ITEMS,
            font: "Courier".to_owned(),
            bold_font: "Helvetica-Bold".to_owned(),
            logo: None,
            compare_previous: true,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmailSettings {
    pub enabled: bool,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub from: String,
    #[serde(deserialize_with = "deserialize_list")]
    pub recipients: Vec<String>,
    pub timeout_secs: u64,
}

impl Default for EmailSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            host: "smtp.gmail.com".to_owned(),
            port: 587,
            username: String::new(),
            password: String::new(),
            from: String::new(),
            recipients: Vec::new(),
            timeout_secs: 30,
        }
    }
}

impl EmailSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// The sender address, falling back to the login name.
    pub fn sender(&self) -> &str {
        if self.from.trim().is_empty() {
            self.username.trim()
        } else {
            self.from.trim()
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct OutputSettings {
    pub dir: PathBuf,
}

impl Default for OutputSettings {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("reports"),
        }
    }
}

fn deserialize_time<'de, D>(deserializer: D) -> Result<NaiveTime, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    let raw = raw.trim();
    if raw.is_empty() {
        return Ok(NaiveTime::default());
    }

    NaiveTime::parse_from_str(raw, "%H:%M")
        .or_else(|_| NaiveTime::parse_from_str(raw, "%H:%M:%S"))
        .map_err(|_| serde::de::Error::custom(format!("`{raw}` is not a time of day, expected HH:MM")))
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ListOrString {
    List(Vec<String>),
    String(String),
}

fn deserialize_list<'de, D>(deserializer: D) -> Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    let items = match ListOrString::deserialize(deserializer)? {
        ListOrString::List(items) => items,
        ListOrString::String(joined) => joined.split(',').map(str::to_owned).collect(),
    };

    Ok(items
        .into_iter()
        .map(|item| item.trim().to_owned())
        .filter(|item| !item.is_empty())
        .collect())
}

impl Settings {
    /// Loads `path` and overlays `POS_DIGEST_<SECTION>__<KEY>` environment
    /// variables, e.g. `POS_DIGEST_EMAIL__PASSWORD`.
    pub fn load(path: impl AsRef<Path>) -> Result<Settings, ConfigError> {
        let path = path.as_ref();
        info!("loading settings from {}", path.display());

        let settings: Settings = Config::builder()
            .add_source(File::from(path).format(FileFormat::Ini).required(true))
            .add_source(environment())
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    /// Parses settings from INI text, without environment overrides.
    pub fn from_ini_str(ini: &str) -> Result<Settings, ConfigError> {
        let settings: Settings = Config::builder()
            .add_source(File::from_str(ini, FileFormat::Ini))
            .build()?
            .try_deserialize()?;

        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.store.timezone()?;

        if self.database.sales_table.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "database.sales_table",
                reason: "must name a table".to_owned(),
            });
        }
        if self.report.rows_per_page == 0 {
            return Err(ConfigError::Invalid {
                key: "report.rows_per_page",
                reason: "must be at least 1".to_owned(),
            });
        }
        if self.normalizer.tolerance.is_sign_negative() {
            return Err(ConfigError::Invalid {
                key: "normalizer.tolerance",
                reason: "must not be negative".to_owned(),
            });
        }
        if self.window.kind == WindowKind::Explicit && (self.window.start.is_none() || self.window.end.is_none()) {
            return Err(ConfigError::Invalid {
                key: "window.kind",
                reason: "explicit windows need both start and end".to_owned(),
            });
        }

        Ok(())
    }
}

fn environment() -> Environment {
    Environment::with_prefix(ENV_PREFIX)
        .prefix_separator("_")
        .separator("__")
}
