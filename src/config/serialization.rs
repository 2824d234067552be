//! Config serialization to TOML
//!
//! Single source of truth for the config file format. `ensure_config_exists`
//! and `config --reset` both write `Config::default().to_toml()`.

use super::Config;

impl Config {
    /// Render the config as a commented TOML document
    pub fn to_toml(&self) -> String {
        let servers: Vec<&str> = self.hwproxy.servers.iter().map(|s| s.as_str()).collect();

        format!(
            r#"# hwproxy-session configuration
#
# Environment variables override this file:
#   HWPROXY_PROFILE, HWPROXY_DATA_DIR, HWPROXY_LOG_LEVEL, HWPROXY_HOST_TEMPLATE

# Server profile used when none has been chosen yet: prod, dev
profile = "{profile}"

# Directory for durable state (debug list cache, device catalog, profile)
data_dir = {data_dir:?}

# REST backend, one host per profile
[backend]
prod_host = "{prod_host}"
prod_port = {prod_port}
dev_host = "{dev_host}"
dev_port = {dev_port}
request_timeout_secs = {request_timeout}

# HWProxy instances; {{server}} is replaced by the server name
[hwproxy]
host_template = "{host_template}"
primary = "{primary}"
servers = {servers:?}
session_cookie = "{session_cookie}"

# Polling, login and retry timing
[timing]
poll_interval_secs = {poll_interval}
login_timeout_secs = {login_timeout}
catalog_retry_secs = {catalog_retry}
catalog_max_attempts = {catalog_max_attempts}
refresh_delay_ms = {refresh_delay}
form_debounce_ms = {form_debounce}

# Logging configuration (RUST_LOG env var overrides)
[logging]
level = "{log_level}"
# Colour stderr output; turn off when stderr is captured to a file
stderr_ansi = {log_stderr_ansi}
# JSON file logging in addition to stderr
file_enabled = {log_file_enabled}
file_dir = {log_file_dir:?}
file_rotation = "{log_file_rotation}"  # hourly, daily, never
file_prefix = "{log_file_prefix}"
"#,
            profile = self.profile.as_str(),
            data_dir = self.data_dir.display().to_string(),
            prod_host = self.backend.prod_host,
            prod_port = self.backend.prod_port,
            dev_host = self.backend.dev_host,
            dev_port = self.backend.dev_port,
            request_timeout = self.backend.request_timeout_secs,
            host_template = self.hwproxy.host_template,
            primary = self.hwproxy.primary.as_str(),
            servers = servers,
            session_cookie = self.hwproxy.session_cookie,
            poll_interval = self.timing.poll_interval_secs,
            login_timeout = self.timing.login_timeout_secs,
            catalog_retry = self.timing.catalog_retry_secs,
            catalog_max_attempts = self.timing.catalog_max_attempts,
            refresh_delay = self.timing.refresh_delay_ms,
            form_debounce = self.timing.form_debounce_ms,
            log_level = self.logging.level,
            log_stderr_ansi = self.logging.stderr_ansi,
            log_file_enabled = self.logging.file_enabled,
            log_file_dir = self.logging.file_dir.display().to_string(),
            log_file_rotation = self.logging.file_rotation.as_str(),
            log_file_prefix = self.logging.file_prefix,
        )
    }
}
