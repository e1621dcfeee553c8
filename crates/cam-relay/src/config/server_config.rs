use crate::config::{default_bind_address, default_proxy_port, default_recorder_port};

use serde::{Deserialize, Serialize};

/// Listener configuration for both HTTP surfaces.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Interface both listeners bind to.
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    /// Port for the streaming proxy.
    #[serde(default = "default_proxy_port")]
    pub proxy_port: u16,
    /// Port for the recording API and the local restream.
    #[serde(default = "default_recorder_port")]
    pub recorder_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
            proxy_port: default_proxy_port(),
            recorder_port: default_recorder_port(),
        }
    }
}
