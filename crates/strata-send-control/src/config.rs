//! TOML configuration for a send controller.
//!
//! ```toml
//! version = 1
//!
//! [bitrate]
//! min_bps = 30000
//! start_bps = 300000
//! max_bps = 2000000
//!
//! [pacer]
//! pacing_factor = 2.5
//! queue_time_limit_ms = 2000
//!
//! [keepalive]
//! timeout_interval_ms = 5000
//! payload_type = 20
//!
//! [worker]
//! thread_name = "strata-send-ctl"
//! max_idle_ms = 500
//! ```

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::bitrate::BitrateConstraints;
use crate::error::ConfigError;
use crate::pacer::PacerSettings;
use crate::worker::WorkerConfig;

pub const CONFIG_VERSION: u32 = 1;

// ─── Keepalive ──────────────────────────────────────────────────────────────

/// Keepalive packet emission. Stored and handed back by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeepAliveConfig {
    /// Interval between keepalives, `-1` when disabled.
    pub timeout_interval_ms: i64,
    pub payload_type: u8,
}

impl Default for KeepAliveConfig {
    fn default() -> Self {
        KeepAliveConfig {
            timeout_interval_ms: -1,
            payload_type: 20,
        }
    }
}

// ─── Input ──────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct ControllerConfigInput {
    pub version: u32,
    pub bitrate: BitrateConfigInput,
    pub pacer: PacerConfigInput,
    pub keepalive: KeepAliveConfigInput,
    pub worker: WorkerConfigInput,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct BitrateConfigInput {
    pub min_bps: Option<i32>,
    pub start_bps: Option<i32>,
    pub max_bps: Option<i32>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct PacerConfigInput {
    pub pacing_factor: Option<f32>,
    pub queue_time_limit_ms: Option<i64>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct KeepAliveConfigInput {
    pub timeout_interval_ms: Option<i64>,
    pub payload_type: Option<u8>,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct WorkerConfigInput {
    pub thread_name: Option<String>,
    pub max_idle_ms: Option<u64>,
}

// ─── Resolved ───────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq)]
pub struct ControllerConfig {
    pub version: u32,
    pub bitrate: BitrateConstraints,
    pub pacer: PacerSettings,
    pub keepalive: KeepAliveConfig,
    pub worker: WorkerConfig,
}

pub fn default_bitrate() -> BitrateConstraints {
    BitrateConstraints::new(30_000, 300_000, 2_000_000)
}

impl Default for ControllerConfig {
    fn default() -> Self {
        ControllerConfig {
            version: CONFIG_VERSION,
            bitrate: default_bitrate(),
            pacer: PacerSettings::default(),
            keepalive: KeepAliveConfig::default(),
            worker: WorkerConfig::default(),
        }
    }
}

impl ControllerConfigInput {
    pub fn resolve(self) -> Result<ControllerConfig, ConfigError> {
        let version = if self.version == 0 {
            CONFIG_VERSION
        } else {
            self.version
        };
        if version != CONFIG_VERSION {
            return Err(ConfigError::UnsupportedVersion(version));
        }

        let defaults = default_bitrate();
        let bitrate = BitrateConstraints::new(
            self.bitrate.min_bps.unwrap_or(defaults.min_bps).max(0),
            self.bitrate.start_bps.unwrap_or(defaults.start_bps),
            self.bitrate.max_bps.unwrap_or(defaults.max_bps).max(0),
        );
        if bitrate.start_bps <= 0 {
            return Err(ConfigError::InvalidBitrate(format!(
                "start_bps must be positive, got {}",
                bitrate.start_bps
            )));
        }
        if bitrate.max_bps > 0 && bitrate.min_bps > bitrate.max_bps {
            return Err(ConfigError::InvalidBitrate(format!(
                "min_bps {} exceeds max_bps {}",
                bitrate.min_bps, bitrate.max_bps
            )));
        }

        let pacer_defaults = PacerSettings::default();
        let pacer = PacerSettings {
            pacing_factor: self
                .pacer
                .pacing_factor
                .filter(|f| f.is_finite() && *f > 0.0)
                .unwrap_or(pacer_defaults.pacing_factor),
            queue_time_limit_ms: self
                .pacer
                .queue_time_limit_ms
                .unwrap_or(pacer_defaults.queue_time_limit_ms)
                .max(0),
        };

        let keepalive_defaults = KeepAliveConfig::default();
        let keepalive = KeepAliveConfig {
            timeout_interval_ms: self
                .keepalive
                .timeout_interval_ms
                .unwrap_or(keepalive_defaults.timeout_interval_ms),
            payload_type: self
                .keepalive
                .payload_type
                .unwrap_or(keepalive_defaults.payload_type),
        };

        let worker_defaults = WorkerConfig::default();
        let worker = WorkerConfig {
            thread_name: self
                .worker
                .thread_name
                .map(|name| name.trim().to_string())
                .filter(|name| !name.is_empty())
                .unwrap_or(worker_defaults.thread_name),
            max_idle: self
                .worker
                .max_idle_ms
                .map(|ms| Duration::from_millis(ms.max(1)))
                .unwrap_or(worker_defaults.max_idle),
        };

        Ok(ControllerConfig {
            version,
            bitrate,
            pacer,
            keepalive,
            worker,
        })
    }
}

impl ControllerConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        if input.trim().is_empty() {
            return Ok(ControllerConfig::default());
        }
        let parsed: ControllerConfigInput = toml::from_str(input)?;
        parsed.resolve()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_full_document() {
        let toml = r#"
            version = 1

            [bitrate]
            min_bps = 50000
            start_bps = 400000
            max_bps = 2500000

            [pacer]
            pacing_factor = 1.5
            queue_time_limit_ms = 500

            [keepalive]
            timeout_interval_ms = 5000
            payload_type = 96

            [worker]
            thread_name = "send-ctl-0"
            max_idle_ms = 100
        "#;

        let cfg = ControllerConfig::from_toml_str(toml).unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.bitrate, BitrateConstraints::new(50_000, 400_000, 2_500_000));
        assert_eq!(cfg.pacer.pacing_factor, 1.5);
        assert_eq!(cfg.pacer.queue_time_limit_ms, 500);
        assert_eq!(
            cfg.keepalive,
            KeepAliveConfig {
                timeout_interval_ms: 5000,
                payload_type: 96
            }
        );
        assert_eq!(cfg.worker.thread_name, "send-ctl-0");
        assert_eq!(cfg.worker.max_idle, Duration::from_millis(100));
    }

    #[test]
    fn empty_document_uses_defaults() {
        let cfg = ControllerConfig::from_toml_str("   \n").unwrap();
        assert_eq!(cfg, ControllerConfig::default());
    }

    #[test]
    fn partial_sections_fill_defaults() {
        let cfg = ControllerConfig::from_toml_str("[bitrate]\nmax_bps = 1000000\n").unwrap();
        assert_eq!(cfg.bitrate, BitrateConstraints::new(30_000, 300_000, 1_000_000));
        assert_eq!(cfg.pacer, PacerSettings::default());
        assert_eq!(cfg.keepalive, KeepAliveConfig::default());
    }

    #[test]
    fn non_positive_start_rejected() {
        let err = ControllerConfig::from_toml_str("[bitrate]\nstart_bps = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBitrate(_)));
    }

    #[test]
    fn inverted_range_rejected() {
        let err =
            ControllerConfig::from_toml_str("[bitrate]\nmin_bps = 900000\nmax_bps = 100000\n")
                .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidBitrate(_)));
    }

    #[test]
    fn unsupported_version_rejected() {
        let err = ControllerConfig::from_toml_str("version = 7\n").unwrap_err();
        assert!(matches!(err, ConfigError::UnsupportedVersion(7)));
    }

    #[test]
    fn malformed_toml_is_reported() {
        let err = ControllerConfig::from_toml_str("[pacer\n").unwrap_err();
        assert!(matches!(err, ConfigError::Toml(_)));
    }

    #[test]
    fn blank_thread_name_falls_back() {
        let cfg = ControllerConfig::from_toml_str("[worker]\nthread_name = \"  \"\n").unwrap();
        assert_eq!(cfg.worker.thread_name, WorkerConfig::default().thread_name);
    }
}
