//! Client runtime for the life-moments timeline.
//!
//! - [`services::preview`] turns selected files (HEIC included) into
//!   displayable object URLs, last selection wins.
//! - [`services::config_cache`] resolves stored media keys to addresses,
//!   fetching the backend's storage config at most once.
//! - [`services::poll`] re-reads the timeline for a bounded window after each
//!   submission.
//! - [`routes`] serves live object URLs over HTTP for viewing.

pub mod config;
pub mod errors;
pub mod handlers;
pub mod models;
pub mod routes;
pub mod services;
