//! Runtime configuration.
//!
//! Loaded from an optional TOML file, then overridden by `ARCOR_SYNC__*`
//! environment variables (e.g. `ARCOR_SYNC__LOCAL_USER=tablet-2`).

use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::error::Result;

/// Default on-disk location of the local flags database (Sled).
pub const DEFAULT_FLAGS_PATH: &str = "arcor_sync_flags";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SyncConfig {
    /// Lock-owner name the server uses for this client.
    pub local_user: String,
    pub flags_path: PathBuf,
    /// Keep flags in a temporary database (tests, kiosks).
    pub temporary_flags: bool,
    /// Buffer size of each event channel.
    pub event_capacity: usize,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            local_user: "local".to_string(),
            flags_path: PathBuf::from(DEFAULT_FLAGS_PATH),
            temporary_flags: false,
            event_capacity: 256,
        }
    }
}

impl SyncConfig {
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        let settings = builder
            .add_source(config::Environment::with_prefix("ARCOR_SYNC").separator("__"))
            .build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn for_tests() -> Self {
        Self {
            temporary_flags: true,
            ..Self::default()
        }
    }
}
