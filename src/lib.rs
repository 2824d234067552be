//! Session core for the HWProxy debug tool
//!
//! Keeps a user logged into every HWProxy server, mirrors the backend's
//! debug-session list while someone is watching, and runs the create,
//! finish, delete and check actions with the validation and notifications
//! a popup needs. Presentation layers talk to it through [`worker::Command`]
//! and listen on [`events::EventBus`].

pub mod auth;
pub mod catalog;
pub mod client;
pub mod config;
pub mod debugs;
pub mod events;
pub mod form;
pub mod logging;
pub mod models;
pub mod storage;
pub mod worker;

#[cfg(test)]
mod testing;
