//! Client-side services: the backend seam, media previews, address
//! resolution, and bounded polling.

pub mod backend;
pub mod config_cache;
pub mod object_urls;
pub mod poll;
pub mod preview;
pub mod timeline;
pub mod transcode;

#[cfg(test)]
pub(crate) mod test_support;
