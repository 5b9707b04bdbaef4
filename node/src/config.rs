//! # Node Configuration
//!
//! One JSON document configures a node: the engine parameters plus the
//! committees the in-process maintainer registry reports for each epoch.
//!
//! ```json
//! {
//!   "engine": { "orchestrator": "0x…", "relay_chain": 22776 },
//!   "committees": { "1": ["0x…", "0x…", "0x…", "0x…"] },
//!   "snapshots_to_keep": 64
//! }
//! ```

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use vaultkeeper_protocol::config::EngineConfig;
use vaultkeeper_protocol::{Address, Epoch};

/// Snapshots retained on disk when the config does not say otherwise.
const DEFAULT_SNAPSHOTS_TO_KEEP: usize = 64;

fn default_snapshots_to_keep() -> usize {
    DEFAULT_SNAPSHOTS_TO_KEEP
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    pub engine: EngineConfig,
    /// Committee per epoch, fed to the maintainer registry.
    #[serde(default)]
    pub committees: BTreeMap<Epoch, Vec<Address>>,
    /// Older snapshots are pruned after each commit. The journal is kept.
    #[serde(default = "default_snapshots_to_keep")]
    pub snapshots_to_keep: usize,
}

impl NodeConfig {
    pub fn load(path: &Path) -> Result<Self> {
        let bytes = std::fs::read(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        let config: NodeConfig = serde_json::from_slice(&bytes)
            .with_context(|| format!("failed to parse config file {}", path.display()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.engine.validate().context("invalid engine section")?;
        if self.snapshots_to_keep == 0 {
            bail!("snapshots_to_keep must be positive");
        }
        for (epoch, members) in &self.committees {
            if members.is_empty() {
                bail!("committee for epoch {epoch} is empty");
            }
        }
        Ok(())
    }
}
