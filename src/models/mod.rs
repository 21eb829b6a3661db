//! Core data models for the timeline client.
//!
//! Backend payloads (events, storage config) deserialize straight into these
//! types via `serde`; local selections and preview state never leave the
//! process.

pub mod event;
pub mod media;
pub mod preview;
pub mod remote_config;
