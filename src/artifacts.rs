//! Result artifact references
//!
//! The core stores artifacts as opaque references and never inspects content.
//! A resolver turns a reference into something a viewer can fetch.

use crate::types::{ConciergeError, Result};

pub trait ArtifactResolver: Send + Sync {
    fn resolve(&self, artifact_ref: &str) -> Result<String>;
}

/// Joins a base URL with the percent-encoded reference
#[derive(Debug, Clone)]
pub struct BaseUrlResolver {
    base_url: String,
}

impl BaseUrlResolver {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }
}

impl ArtifactResolver for BaseUrlResolver {
    fn resolve(&self, artifact_ref: &str) -> Result<String> {
        let artifact_ref = artifact_ref.trim();
        if artifact_ref.is_empty() {
            return Err(ConciergeError::BadRequest(
                "artifact reference is empty".to_string(),
            ));
        }
        Ok(format!(
            "{}/{}",
            self.base_url,
            urlencoding::encode(artifact_ref)
        ))
    }
}
