use std::path::Path;

use anyhow::Result;

use crate::config::{self, Config};
use crate::system::{HostSystem, SystemProbe};

/// Loaded configuration plus the probe every operation reads through.
pub struct Session {
    pub config: Config,
    probe: Box<dyn SystemProbe>,
}

impl Session {
    pub fn new(config: Config, probe: Box<dyn SystemProbe>) -> Self {
        Self { config, probe }
    }

    /// Config from `path` (or the default location) against the live host.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config = match path {
            Some(p) => config::load_config(p)?,
            None => config::load_config(&config::default_config_path()?)?,
        };
        let probe = HostSystem::new(config.nvidia_version_marker.clone());
        Ok(Self::new(config, Box::new(probe)))
    }

    pub fn probe(&self) -> &dyn SystemProbe {
        self.probe.as_ref()
    }
}
