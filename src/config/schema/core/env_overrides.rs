use super::Config;
use crate::config::AuditBackend;
use std::path::PathBuf;

impl Config {
    pub fn apply_env_overrides(&mut self) {
        if let Ok(dir) = std::env::var("AXGATE_DATA_DIR")
            && !dir.is_empty()
        {
            self.data_dir = PathBuf::from(shellexpand::tilde(&dir).as_ref());
        }

        if let Ok(port_str) =
            std::env::var("AXGATE_GATEWAY_PORT").or_else(|_| std::env::var("PORT"))
            && let Ok(port) = port_str.parse::<u16>()
        {
            self.gateway.port = port;
        }

        if let Ok(host) = std::env::var("AXGATE_GATEWAY_HOST")
            && !host.is_empty()
        {
            self.gateway.host = host;
        }

        if let Ok(path) = std::env::var("AXGATE_AUDIT_LOG")
            && !path.is_empty()
        {
            self.storage.audit_log_path = path;
            self.storage.audit_backend = AuditBackend::Jsonl;
        }

        if let Ok(flag) = std::env::var("AXGATE_SIMULATION")
            && let Some(simulation) = parse_bool(&flag)
        {
            self.executor.simulation = simulation;
        }

        if let Ok(url) = std::env::var("AXGATE_ADVISORY_URL")
            && !url.is_empty()
        {
            self.advisory.base_url = url;
            self.advisory.enabled = true;
        }

        if let Ok(level) = std::env::var("AXGATE_LOG_LEVEL")
            && !level.is_empty()
        {
            self.observability.log_level = level;
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
