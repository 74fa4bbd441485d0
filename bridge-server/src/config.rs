use std::path::Path;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use stream_bridge::{ReceiverConfig, StreamEndpoint};

/// Contents of the `--config` JSON file. Command line values win over it.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct BridgeConfig {
    #[serde(default)]
    pub publish: Option<StreamEndpoint>,
    #[serde(default)]
    pub receive: Option<ReceiverConfig>,
    /// Listen address of the status API, e.g. "0.0.0.0:8080".
    #[serde(default)]
    pub api: Option<String>,
}

impl BridgeConfig {
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("read config {}", path.display()))?;
        Self::parse(&text).with_context(|| format!("parse config {}", path.display()))
    }

    pub fn parse(text: &str) -> anyhow::Result<Self> {
        let config: Self = serde_json::from_str(text)?;
        if let Some(publish) = &config.publish {
            publish.validate()?;
        }
        if let Some(receive) = &config.receive {
            receive.validate()?;
        }
        Ok(config)
    }
}
