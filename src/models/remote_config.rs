//! Remote storage parameters published by the backend.

use crate::models::media::MediaReference;
use serde::{Deserialize, Serialize};

const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

/// Where the backend keeps uploaded media.
///
/// Served by `GET /api/s3-config`. Used to build direct-to-store addresses
/// without routing every image through the backend.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct RemoteConfig {
    /// Bucket holding the media objects (must conform to DNS naming rules).
    pub bucket_name: String,

    /// Region the bucket lives in (e.g. "us-west-2").
    pub region: String,
}

impl RemoteConfig {
    pub fn new(bucket_name: impl Into<String>, region: impl Into<String>) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            region: region.into(),
        }
    }

    /// Check that the config can produce a working virtual-hosted address.
    ///
    /// Enforces S3 bucket naming:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    ///
    /// and a region made of lowercase letters, digits and hyphens.
    pub fn validate(&self) -> Result<(), String> {
        let name = self.bucket_name.as_str();

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(format!("bucket `{name}` must be between 3 and 63 characters"));
        }

        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(format!(
                "bucket `{name}` may only contain lowercase letters, digits, dots, and hyphens"
            ));
        }

        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(format!(
                "bucket `{name}` must start and end with a lowercase letter or digit"
            ));
        }

        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(format!(
                "bucket `{name}` cannot contain consecutive dots or dot-hyphen combinations"
            ));
        }

        if is_ipv4_like(name) {
            return Err(format!("bucket `{name}` must not be formatted like an IP address"));
        }

        let region = self.region.as_str();
        if region.is_empty()
            || !region
                .chars()
                .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '-'))
        {
            return Err(format!("region `{region}` is not a valid region identifier"));
        }

        Ok(())
    }

    /// Virtual-hosted public address for `reference` in this bucket.
    pub fn object_address(&self, reference: &MediaReference) -> String {
        format!(
            "https://{}.s3.{}.amazonaws.com/{}",
            self.bucket_name, self.region, reference
        )
    }
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    if parts.len() != 4 {
        return false;
    }
    parts.iter().all(|segment| {
        !segment.is_empty()
            && segment.len() <= 3
            && segment.chars().all(|c| c.is_ascii_digit())
            && segment.parse::<u8>().is_ok()
    })
}
