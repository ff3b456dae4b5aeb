use serde::{Deserialize, Serialize};

/// Where the HTTP control plane listens and who may call it from a browser.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "control_plane_port")]
    pub port: u16,
    /// Loopback unless `allow_public_bind` is set.
    #[serde(default = "control_plane_host")]
    pub host: String,
    /// Permits a non-loopback `host`; `serve` refuses otherwise.
    #[serde(default)]
    pub allow_public_bind: bool,
    /// Origins allowed by CORS. Empty disables the CORS layer.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

const fn control_plane_port() -> u16 {
    3000
}

fn control_plane_host() -> String {
    "127.0.0.1".into()
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            port: control_plane_port(),
            host: control_plane_host(),
            allow_public_bind: false,
            cors_origins: Vec::new(),
        }
    }
}
