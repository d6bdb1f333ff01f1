//! System configuration parsing.
//!
//! ```kdl
//! scheduler interval="10s" concurrency=8
//! tracker interval="10s"
//! components interval="10s"
//! ```

use std::path::Path;
use std::time::Duration;

use kdl::{KdlDocument, KdlNode};
use serde::{Deserialize, Serialize};

use crate::nodes::{get_duration_prop, get_u32_prop};
use crate::{ConfigError, ConfigResult};

/// Tuning for the scheduler's background loops.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// How often the scheduler looks for pending builds.
    pub scheduler_interval: Duration,
    /// How many jobs one scheduling pass works on at once.
    pub scheduler_concurrency: usize,
    /// How often the tracker looks for started builds.
    pub tracker_interval: Duration,
    /// Minimum time between two runs of a component across all instances.
    pub component_interval: Duration,
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            scheduler_interval: Duration::from_secs(10),
            scheduler_concurrency: 8,
            tracker_interval: Duration::from_secs(10),
            component_interval: Duration::from_secs(10),
        }
    }
}

/// Read and parse a system configuration file.
pub fn load_system_config(path: &Path) -> ConfigResult<SystemConfig> {
    let content = std::fs::read_to_string(path)?;
    parse_system_config(&content)
}

/// Parse system configuration from KDL text.
///
/// Anything not set keeps its default.
pub fn parse_system_config(kdl: &str) -> ConfigResult<SystemConfig> {
    let doc: KdlDocument = kdl.parse()?;
    let mut config = SystemConfig::default();

    for node in doc.nodes() {
        match node.name().value() {
            "scheduler" => {
                if let Some(interval) = interval(node)? {
                    config.scheduler_interval = interval;
                }
                if let Some(concurrency) = get_u32_prop(node, "concurrency")? {
                    if concurrency == 0 {
                        return Err(ConfigError::invalid("concurrency", "must be at least 1"));
                    }
                    config.scheduler_concurrency = concurrency as usize;
                }
            }
            "tracker" => {
                if let Some(interval) = interval(node)? {
                    config.tracker_interval = interval;
                }
            }
            "components" => {
                if let Some(interval) = get_duration_prop(node, "interval")? {
                    config.component_interval = interval;
                }
            }
            other => {
                return Err(ConfigError::invalid(
                    "system",
                    format!("unknown node '{other}'"),
                ));
            }
        }
    }

    Ok(config)
}

/// A loop interval; zero would spin.
fn interval(node: &KdlNode) -> ConfigResult<Option<Duration>> {
    match get_duration_prop(node, "interval")? {
        Some(interval) if interval.is_zero() => Err(ConfigError::invalid(
            format!("{} interval", node.name().value()),
            "must be greater than zero",
        )),
        interval => Ok(interval),
    }
}
