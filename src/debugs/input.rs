//! Pure helpers for create input and list display

use crate::models::{DebugSession, Server};
use sha2::{Digest, Sha256};
use std::collections::HashSet;

/// Prefix of every debug fingerprint
pub const FINGERPRINT_PREFIX: &str = "easylog_";

/// Deterministic debug id for one device on one server
pub fn fingerprint(device_uid: &str, hw_id: &str, server: Server) -> String {
    let mut hasher = Sha256::new();
    hasher.update(device_uid.as_bytes());
    hasher.update(hw_id.as_bytes());
    hasher.update(server.as_str().as_bytes());
    let digest = format!("{:x}", hasher.finalize());
    format!("{}{}", FINGERPRINT_PREFIX, &digest[..16])
}

/// Split comma-separated device ids; `None` when any id repeats
pub fn extract_device_ids(input: &str) -> Option<Vec<String>> {
    let ids: Vec<String> = input
        .split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(str::to_string)
        .collect();

    let mut seen = HashSet::new();
    ids.iter().all(|id| seen.insert(id.as_str())).then_some(ids)
}

/// Newest first; equal timestamps keep their input order
pub fn sort_debugs(debugs: &mut [DebugSession]) {
    debugs.sort_by(|a, b| b.debug_created_at.cmp(&a.debug_created_at));
}
