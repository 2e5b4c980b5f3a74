//! Configuration for the LabControl service.
//!
//! Settings are layered with `figment`: library defaults, then an optional
//! TOML file, then `LC_`-prefixed environment variables. The merged value is
//! validated once at startup and passed into every component explicitly;
//! there is no process-wide mutable configuration state.

use std::net::IpAddr;
use std::path::{Path, PathBuf};

use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::error::{LcError, LcResult};

/// Top-level service configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Directory holding entity records, capture files and the fault log.
    pub data_dir: PathBuf,

    /// Address the HTTP server binds to.
    pub bind_address: IpAddr,

    /// Port the HTTP server listens on.
    pub port: u16,

    /// Wall-clock ceiling in seconds for synchronous command actions
    /// (status, on, off, reboot, run).
    pub run_timeout_secs: u64,

    /// Interval in milliseconds between liveness polls while stopping a
    /// capture process.
    pub stop_poll_interval_ms: u64,

    /// Seconds to wait after SIGTERM before escalating to SIGKILL.
    pub stop_term_wait_secs: u64,

    /// Seconds to wait after SIGKILL before giving up and reporting failure.
    pub stop_kill_wait_secs: u64,

    /// Logging verbosity ("error", "warn", "info", "debug", "trace").
    pub log_level: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("lc-data"),
            bind_address: IpAddr::V4(std::net::Ipv4Addr::LOCALHOST),
            port: 8800,
            run_timeout_secs: 60,
            stop_poll_interval_ms: 100,
            stop_term_wait_secs: 5,
            stop_kill_wait_secs: 2,
            log_level: "info".to_string(),
        }
    }
}

impl Settings {
    /// Load settings from defaults, an optional TOML file and `LC_*`
    /// environment overrides, then validate.
    pub fn load(config_path: Option<&Path>) -> LcResult<Self> {
        let mut figment = Figment::from(Serialized::defaults(Settings::default()));

        if let Some(path) = config_path {
            if path.exists() {
                figment = figment.merge(Toml::file(path));
            } else {
                return Err(LcError::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
        }

        // Environment overrides are merged last so they beat the file.
        let settings: Settings = figment
            .merge(Env::prefixed("LC_"))
            .extract()
            .map_err(|e| LcError::Config(e.to_string()))?;
        settings.validate()?;
        Ok(settings)
    }

    /// Semantic validation of values that parse but make no sense.
    pub fn validate(&self) -> LcResult<()> {
        if self.port == 0 {
            return Err(LcError::Config("port must be nonzero".into()));
        }
        if self.run_timeout_secs == 0 {
            return Err(LcError::Config("run_timeout_secs must be nonzero".into()));
        }
        if self.stop_poll_interval_ms == 0 {
            return Err(LcError::Config(
                "stop_poll_interval_ms must be nonzero".into(),
            ));
        }
        const LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
        if !LEVELS.contains(&self.log_level.as_str()) {
            return Err(LcError::Config(format!(
                "invalid log_level '{}' (expected one of {:?})",
                self.log_level, LEVELS
            )));
        }
        Ok(())
    }

    /// Directory holding capture pid and log files.
    pub fn captures_dir(&self) -> PathBuf {
        self.data_dir.join("captures")
    }

    /// Path of the append-only server fault log.
    pub fn fault_log_path(&self) -> PathBuf {
        self.data_dir.join("lcserver.log")
    }
}
