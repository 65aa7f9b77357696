use std::fmt::Display;
use std::fs;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::manager::ManagerConfig;
use crate::normalize::ProtocolRules;
use crate::reminders::ReminderConfig;
use crate::sections::SectionConfig;

/// Reset `value` to `default` with a notice when it falls outside `range`.
pub(crate) fn ensure_in_range<T>(value: &mut T, name: &str, range: RangeInclusive<T>, default: T)
where
    T: PartialOrd + Display + Copy,
{
    if !range.contains(&*value) {
        eprintln!(
            "Config error: {} of {} is invalid (expected {} to {}) - using default of {}",
            name,
            *value,
            range.start(),
            range.end(),
            default
        );
        *value = default;
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub cadence: String,
    pub r2d2: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const CADENCE_LEVEL: &str = "info";
    const R2D2_LEVEL: &str = "warn";

    fn ensure_valid(&mut self) {
        Self::ensure_level(&mut self.cadence, "cadence", Self::CADENCE_LEVEL);
        Self::ensure_level(&mut self.r2d2, "r2d2", Self::R2D2_LEVEL);
    }

    fn ensure_level(level: &mut String, name: &str, default: &str) {
        let original = level.clone();
        *level = level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&level.as_str()) {
            eprintln!(
                "Config error: {} log level of '{}' is invalid - using default of '{}'",
                name, original, default
            );
            *level = default.to_owned();
        }
    }

    /// flexi_logger spec string, e.g. `info, r2d2=warn`
    pub fn log_spec(&self) -> String {
        format!("{}, r2d2={}", self.cadence, self.r2d2)
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            cadence: Self::CADENCE_LEVEL.to_string(),
            r2d2: Self::R2D2_LEVEL.to_string(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct StoreConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,
}

impl StoreConfig {
    const DB_FILE: &str = "cadence.db";

    /// Configured database path, or `cadence.db` in the data directory.
    pub fn db_path(&self, data_dir: &Path) -> PathBuf {
        self.path
            .clone()
            .unwrap_or_else(|| data_dir.join(Self::DB_FILE))
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub store: StoreConfig,
    pub protocol: ProtocolRules,
    pub reminders: ReminderConfig,
    pub sections: SectionConfig,
}

impl Config {
    const CONFIG_FILE: &str = "config.toml";
    const ENV_PREFIX: &str = "CADENCE_";

    /// Loads the configuration from `config.toml` in the app's data directory.
    ///
    /// A default file is written if none exists. Values from the file are
    /// overridden by `CADENCE_` environment variables, with `__` separating
    /// nested keys (`CADENCE_REMINDERS__NOTIFICATION_HOUR=9`).
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join(Self::CONFIG_FILE);
        Self::load_from_path(&config_path)
    }

    pub fn load_from_path(config_path: &Path) -> Self {
        let default_config = Config::default();

        if !config_path.exists() {
            Self::write_default(config_path, &default_config);
        }

        let figment = Figment::from(Serialized::defaults(default_config.clone()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(Self::ENV_PREFIX).split("__"));

        // On error, report and fall back to defaults
        let mut config: Config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            default_config
        });

        config.ensure_valid();
        config
    }

    fn write_default(config_path: &Path, default_config: &Config) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }
        match toml::to_string_pretty(default_config) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
        self.protocol.ensure_valid();
        self.reminders.ensure_valid();
        self.sections.ensure_valid();
    }

    pub fn manager_config(&self) -> ManagerConfig {
        ManagerConfig {
            protocol: self.protocol.clone(),
            reminders: self.reminders.clone(),
            sections: self.sections.clone(),
        }
    }
}
