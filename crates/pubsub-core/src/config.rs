//! Runtime settings from environment variables.

use std::env;
use std::path::PathBuf;

/// Process-level pub/sub settings.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RuntimeSettings {
    /// Test mode: subscriptions resolve to stub descriptors and nothing is
    /// registered with the broker.
    pub testing: bool,

    /// Path to the JSON deployment config.
    pub deploy_config_path: Option<PathBuf>,
}

impl RuntimeSettings {
    /// Create settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `PUBSUB_TESTING`: Enable test mode (default: false)
    /// - `PUBSUB_DEPLOY_CONFIG`: Deployment config path (required outside test mode)
    pub fn from_env() -> Self {
        Self {
            testing: env::var("PUBSUB_TESTING")
                .map(|v| parse_flag(&v))
                .unwrap_or(false),
            deploy_config_path: env::var_os("PUBSUB_DEPLOY_CONFIG").map(PathBuf::from),
        }
    }

    /// Settings for test mode.
    pub fn testing() -> Self {
        Self {
            testing: true,
            deploy_config_path: None,
        }
    }

    /// Settings for a deployed process reading its config from `path`.
    pub fn deployed(path: impl Into<PathBuf>) -> Self {
        Self {
            testing: false,
            deploy_config_path: Some(path.into()),
        }
    }
}

fn parse_flag(value: &str) -> bool {
    value.eq_ignore_ascii_case("true") || value == "1"
}
