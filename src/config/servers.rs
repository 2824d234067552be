//! Server addressing: REST backend per profile, HWProxy instance per server

use serde::Deserialize;
use std::time::Duration;

use crate::models::{Server, ServerProfile};

// ─────────────────────────────────────────────────────────────────────────────
// Backend
// ─────────────────────────────────────────────────────────────────────────────

/// REST backend host/port pairs, one per profile
#[derive(Debug, Clone)]
pub struct BackendConfig {
    pub prod_host: String,
    pub prod_port: u16,
    pub dev_host: String,
    pub dev_port: u16,
    /// Per-request timeout for every HTTP call
    pub request_timeout_secs: u64,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            prod_host: "somehost".to_string(),
            prod_port: 8001,
            dev_host: "localhost".to_string(),
            dev_port: 8001,
            request_timeout_secs: 30,
        }
    }
}

/// Backend settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileBackend {
    pub prod_host: Option<String>,
    pub prod_port: Option<u16>,
    pub dev_host: Option<String>,
    pub dev_port: Option<u16>,
    pub request_timeout_secs: Option<u64>,
}

impl BackendConfig {
    pub fn from_file(file: Option<FileBackend>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            prod_host: file.prod_host.unwrap_or(defaults.prod_host),
            prod_port: file.prod_port.unwrap_or(defaults.prod_port),
            dev_host: file.dev_host.unwrap_or(defaults.dev_host),
            dev_port: file.dev_port.unwrap_or(defaults.dev_port),
            request_timeout_secs: file
                .request_timeout_secs
                .unwrap_or(defaults.request_timeout_secs),
        }
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// `http://host:port` for the given profile
    pub fn base_url(&self, profile: ServerProfile) -> String {
        match profile {
            ServerProfile::Prod => format!("http://{}:{}", self.prod_host, self.prod_port),
            ServerProfile::Dev => format!("http://{}:{}", self.dev_host, self.dev_port),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// HWProxy instances
// ─────────────────────────────────────────────────────────────────────────────

/// Per-server HWProxy addressing and login layout
#[derive(Debug, Clone)]
pub struct HwproxyConfig {
    /// Base URL with a `{server}` placeholder
    pub host_template: String,
    /// Server the interactive login runs against
    pub primary: Server,
    /// All servers, in probe order
    pub servers: Vec<Server>,
    /// Cookie carrying the session credential
    pub session_cookie: String,
}

impl Default for HwproxyConfig {
    fn default() -> Self {
        Self {
            host_template: "http://hwproxy.{server}.example".to_string(),
            primary: Server::Tgi,
            servers: Server::ALL.to_vec(),
            session_cookie: "AIOHTTP_SESSION".to_string(),
        }
    }
}

/// HWProxy settings as loaded from config file
#[derive(Debug, Deserialize, Default)]
pub struct FileHwproxy {
    pub host_template: Option<String>,
    pub primary: Option<Server>,
    pub servers: Option<Vec<Server>>,
    pub session_cookie: Option<String>,
}

impl HwproxyConfig {
    pub fn from_file(file: Option<FileHwproxy>) -> Self {
        let file = file.unwrap_or_default();
        let defaults = Self::default();

        Self {
            host_template: file.host_template.unwrap_or(defaults.host_template),
            primary: file.primary.unwrap_or(defaults.primary),
            servers: file
                .servers
                .filter(|s| !s.is_empty())
                .unwrap_or(defaults.servers),
            session_cookie: file.session_cookie.unwrap_or(defaults.session_cookie),
        }
    }

    /// Base URL of one server's HWProxy, without trailing slash
    pub fn server_url(&self, server: Server) -> String {
        self.host_template
            .replace("{server}", server.as_str())
            .trim_end_matches('/')
            .to_string()
    }

    /// Every configured server except the primary
    pub fn secondaries(&self) -> Vec<Server> {
        self.servers
            .iter()
            .copied()
            .filter(|s| *s != self.primary)
            .collect()
    }
}
