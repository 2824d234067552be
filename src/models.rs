//! Persisted records and wire payloads
//!
//! Field names follow the HWProxy JSON format (`debug_uid`, `debug_srv`, ...)
//! so a record fetched from the backend can be cached, rendered and sent back
//! without any mapping layer in between.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::collections::BTreeMap;

use crate::config::HwproxyConfig;
use std::fmt;
use std::str::FromStr;

// ─────────────────────────────────────────────────────────────────────────────
// Storage keys and scopes
// ─────────────────────────────────────────────────────────────────────────────

/// Lifetime of a storage area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Scope {
    /// Cleared on every process restart
    Volatile,
    /// Survives restarts (written to disk)
    Durable,
}

/// Every key the extension state is persisted under
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StorageKey {
    Auth,
    Debugs,
    HwList,
    Server,
    PopupValues,
    ViewMy,
}

impl StorageKey {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Auth => "auth",
            Self::Debugs => "debugs",
            Self::HwList => "hwList",
            Self::Server => "server",
            Self::PopupValues => "popupValues",
            Self::ViewMy => "viewMy",
        }
    }

    /// Which storage area owns this key
    pub fn scope(&self) -> Scope {
        match self {
            Self::Auth | Self::PopupValues | Self::ViewMy => Scope::Volatile,
            Self::Debugs | Self::HwList | Self::Server => Scope::Durable,
        }
    }
}

impl fmt::Display for StorageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Servers and profiles
// ─────────────────────────────────────────────────────────────────────────────

/// One HWProxy instance
///
/// Deserializes through [`FromStr`], so `"TGI"` and `" tgi"` both read as
/// [`Server::Tgi`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Server {
    Sgi,
    Mts,
    Usa,
    #[default]
    Tgi,
}

impl Server {
    /// Probe order used when no explicit server list is configured
    pub const ALL: [Server; 4] = [Server::Sgi, Server::Tgi, Server::Usa, Server::Mts];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sgi => "sgi",
            Self::Mts => "mts",
            Self::Usa => "usa",
            Self::Tgi => "tgi",
        }
    }

    /// Name of the Auth field holding this server's session credential
    pub fn credential_field(&self) -> String {
        format!("session_token_{}", self.as_str())
    }
}

impl fmt::Display for Server {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Server {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "sgi" => Ok(Self::Sgi),
            "mts" => Ok(Self::Mts),
            "usa" => Ok(Self::Usa),
            "tgi" => Ok(Self::Tgi),
            other => Err(format!("unknown server '{}'", other)),
        }
    }
}

impl<'de> Deserialize<'de> for Server {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Which backend deployment the REST calls go to
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServerProfile {
    #[default]
    Prod,
    Dev,
}

impl ServerProfile {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Prod => "prod",
            Self::Dev => "dev",
        }
    }

    /// Parse a profile flag; anything that is not `dev` means prod
    pub fn from_flag(s: &str) -> Self {
        if s.trim().eq_ignore_ascii_case("dev") {
            Self::Dev
        } else {
            Self::Prod
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Auth
// ─────────────────────────────────────────────────────────────────────────────

/// Authentication record kept in the volatile scope
///
/// Credentials are flattened into top-level `session_token_<server>` fields so
/// a shallow merge of one server's credential never touches another's.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Auth {
    #[serde(default)]
    pub status: bool,
    #[serde(default)]
    pub user: Option<String>,
    /// Primary server the interactive login ran against
    #[serde(default)]
    pub srv: Option<Server>,
    /// Login instant, unix milliseconds
    #[serde(default)]
    pub auth_at: Option<i64>,
    #[serde(flatten)]
    pub session_tokens: BTreeMap<String, Option<String>>,
}

impl Auth {
    /// The unauthenticated record: every field null, one null credential per server
    pub fn unauthenticated(servers: &[Server]) -> Self {
        Self {
            status: false,
            user: None,
            srv: None,
            auth_at: None,
            session_tokens: servers
                .iter()
                .map(|s| (s.credential_field(), None))
                .collect(),
        }
    }

    pub fn initial() -> Self {
        Self::unauthenticated(&Server::ALL)
    }

    pub fn credential(&self, server: Server) -> Option<&str> {
        self.session_tokens
            .get(&server.credential_field())
            .and_then(|v| v.as_deref())
    }

    pub fn set_credential(&mut self, server: Server, token: Option<String>) {
        self.session_tokens.insert(server.credential_field(), token);
    }

    /// Partial update carrying a single credential field
    pub fn credential_patch(server: Server, token: &str) -> serde_json::Value {
        let mut patch = serde_json::Map::new();
        patch.insert(server.credential_field(), serde_json::Value::from(token));
        serde_json::Value::Object(patch)
    }

    /// `status == false` implies every other field is null
    pub fn is_consistent(&self) -> bool {
        self.status
            || (self.user.is_none()
                && self.srv.is_none()
                && self.auth_at.is_none()
                && self.session_tokens.values().all(Option::is_none))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Debug sessions
// ─────────────────────────────────────────────────────────────────────────────

/// Backend-reported lifecycle state of a debug session
///
/// Serialized as the human-readable strings HWProxy uses on the wire.
/// Unknown states are kept verbatim rather than rejected.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DebugState {
    #[default]
    Creating,
    WaitForClient,
    WaitForClientAuto,
    DelayedCreation,
    Created,
    InProgress,
    Finished,
    Downloaded,
    FailedToCreate,
    FailedToDownload,
    FailedToRemove,
    FailedToCheck,
    ErrorOnHwproxy,
    Removed,
    Other(String),
}

impl DebugState {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Creating => "creating...",
            Self::WaitForClient => "wait for client",
            Self::WaitForClientAuto => "wait for client [auto]",
            Self::DelayedCreation => "delayed creation",
            Self::Created => "created",
            Self::InProgress => "in progress",
            Self::Finished => "finished",
            Self::Downloaded => "downloaded",
            Self::FailedToCreate => "failed to create",
            Self::FailedToDownload => "failed to download",
            Self::FailedToRemove => "failed to remove",
            Self::FailedToCheck => "failed to check",
            Self::ErrorOnHwproxy => "error on hwproxy",
            Self::Removed => "removed",
            Self::Other(s) => s,
        }
    }

    /// Display group for the state badge
    pub fn tone(&self) -> StateTone {
        match self {
            Self::Creating | Self::WaitForClient | Self::WaitForClientAuto | Self::DelayedCreation => {
                StateTone::Pending
            }
            Self::Created | Self::Finished | Self::Downloaded => StateTone::Ok,
            Self::InProgress => StateTone::Active,
            Self::FailedToCreate
            | Self::FailedToDownload
            | Self::FailedToRemove
            | Self::FailedToCheck
            | Self::ErrorOnHwproxy
            | Self::Removed => StateTone::Failed,
            Self::Other(_) => StateTone::Unknown,
        }
    }

    /// A finished debug offers "download", everything else "finish"
    pub fn finish_action(&self) -> FinishAction {
        if *self == Self::Finished {
            FinishAction::Download
        } else {
            FinishAction::Finish
        }
    }
}

impl From<String> for DebugState {
    fn from(s: String) -> Self {
        match s.as_str() {
            "creating..." | "creating" => Self::Creating,
            "wait for client" | "wait_for_client" => Self::WaitForClient,
            "wait for client [auto]" | "wait_for_client_auto" => Self::WaitForClientAuto,
            "delayed creation" | "delayed_creation" => Self::DelayedCreation,
            "created" => Self::Created,
            "in progress" | "in_progress" => Self::InProgress,
            "finished" => Self::Finished,
            "downloaded" => Self::Downloaded,
            "failed to create" | "failed_to_create" => Self::FailedToCreate,
            "failed to download" | "failed_to_download" => Self::FailedToDownload,
            "failed to remove" | "failed_to_remove" => Self::FailedToRemove,
            "failed to check" | "failed_to_check" => Self::FailedToCheck,
            "error on hwproxy" | "error_on_hwproxy" => Self::ErrorOnHwproxy,
            "removed" => Self::Removed,
            _ => Self::Other(s),
        }
    }
}

impl From<DebugState> for String {
    fn from(state: DebugState) -> Self {
        match state {
            DebugState::Other(s) => s,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for DebugState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Colour group of a state badge
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateTone {
    Pending,
    Ok,
    Active,
    Failed,
    Unknown,
}

/// Label of the finish button, derived from the state at display time
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishAction {
    Finish,
    Download,
}

impl FinishAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Finish => "finish",
            Self::Download => "download",
        }
    }
}

impl fmt::Display for FinishAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One time-bounded debug session against a hardware device
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DebugSession {
    pub device_uid: String,
    pub device_type: String,
    pub device_hwuid: String,
    /// Deterministic fingerprint, see [`crate::debugs::fingerprint`]
    pub debug_uid: String,
    pub debug_srv: Server,
    /// Unix seconds; sent as a decimal string
    #[serde(with = "epoch_string")]
    pub debug_start_at: i64,
    #[serde(with = "epoch_string")]
    pub debug_stop_at: i64,
    pub debug_state: DebugState,
    /// Server-assigned sequence number, `n/a` until the backend picks one
    #[serde(deserialize_with = "string_or_number")]
    pub debug_num: String,
    pub debug_creator: Option<String>,
    /// Unix milliseconds of the submit instant
    #[serde(deserialize_with = "lenient_i64")]
    pub debug_created_at: i64,
    pub session_token: Option<String>,
    pub auto_wait: bool,
    pub auto_remove: bool,
}

impl DebugSession {
    /// Copy of this record attributed to `creator`
    pub fn restamped(&self, creator: Option<String>) -> Self {
        Self {
            debug_creator: creator,
            ..self.clone()
        }
    }

    /// Page for this debug on the HWProxy instance that runs it
    pub fn hwproxy_link(&self, hwproxy: &HwproxyConfig) -> String {
        format!(
            "{}/debugs/{}",
            hwproxy.server_url(self.debug_srv),
            self.debug_uid
        )
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Device catalog
// ─────────────────────────────────────────────────────────────────────────────

/// Device type -> hardware id mapping, stored exactly as `/get_hw_list` returns it
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct DeviceCatalog {
    #[serde(default)]
    pub hw_list: BTreeMap<String, String>,
}

impl DeviceCatalog {
    pub fn is_empty(&self) -> bool {
        self.hw_list.is_empty()
    }

    pub fn len(&self) -> usize {
        self.hw_list.len()
    }

    /// Hardware id for a device type, with dashes stripped
    pub fn hw_id(&self, device_type: &str) -> Option<String> {
        self.hw_list
            .get(device_type)
            .map(|id| id.replace('-', ""))
    }

    pub fn device_types(&self) -> impl Iterator<Item = &str> {
        self.hw_list.keys().map(String::as_str)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Form values
// ─────────────────────────────────────────────────────────────────────────────

/// In-progress create form input, mirrored so a reopened popup restores it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FormValues {
    pub uid: String,
    pub start: String,
    pub stop: String,
    pub device_type: String,
    pub server: String,
    pub auto_wait: bool,
    pub auto_remove: bool,
}

impl Default for FormValues {
    fn default() -> Self {
        Self {
            uid: String::new(),
            start: "now".to_string(),
            stop: "+12h".to_string(),
            device_type: String::new(),
            server: Server::Tgi.as_str().to_string(),
            auto_wait: true,
            auto_remove: true,
        }
    }
}

impl FormValues {
    /// Names of required fields left empty, in form order
    pub fn unfilled_fields(&self) -> Vec<&'static str> {
        [
            ("uid", &self.uid),
            ("start", &self.start),
            ("stop", &self.stop),
            ("device_type", &self.device_type),
            ("server", &self.server),
        ]
        .into_iter()
        .filter(|(_, value)| value.trim().is_empty())
        .map(|(name, _)| name)
        .collect()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Lenient wire helpers
// ─────────────────────────────────────────────────────────────────────────────

/// Epoch seconds stored as i64, written as a string, read from either form
mod epoch_string {
    use super::*;

    pub fn serialize<S: Serializer>(value: &i64, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&value.to_string())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
        lenient_i64(deserializer)
    }
}

fn lenient_i64<'de, D: Deserializer<'de>>(deserializer: D) -> Result<i64, D::Error> {
    use serde::de::Error;

    match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .ok_or_else(|| D::Error::custom("timestamp out of range")),
        serde_json::Value::String(s) => s
            .trim()
            .parse::<f64>()
            .map(|f| f as i64)
            .map_err(|e| D::Error::custom(format!("invalid timestamp '{}': {}", s, e))),
        serde_json::Value::Null => Ok(0),
        other => Err(D::Error::custom(format!("invalid timestamp {}", other))),
    }
}

fn string_or_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::String(s) => s,
        serde_json::Value::Null => "n/a".to_string(),
        other => other.to_string(),
    })
}

/// Accepts `true`/`false` as well as the `0`/`1` integers some endpoints send
pub(crate) fn lenient_bool<'de, D: Deserializer<'de>>(deserializer: D) -> Result<bool, D::Error> {
    Ok(match serde_json::Value::deserialize(deserializer)? {
        serde_json::Value::Bool(b) => b,
        serde_json::Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        serde_json::Value::String(s) => matches!(s.as_str(), "1" | "true" | "ok"),
        _ => false,
    })
}
