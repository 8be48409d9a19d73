// ABOUTME: Media provider capability: upload a file, look up an asset, render its URL
// ABOUTME: Handlers only see the MediaService trait, the Cloudinary client implements it

pub mod cloudinary;

use crate::error::{MediaError, Result};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::PathBuf;
use url::Url;

/// File uploaded by the `/apple` endpoint
pub const APPLE_FILE: &str = "apple.png";
/// Public id the apple image is stored under
pub const APPLE_PUBLIC_ID: &str = "docs/sdk/go/apple";
/// Incoming transformation applied by the provider on upload
pub const APPLE_TRANSFORMATION: &str = "c_crop,g_center/q_auto/f_auto";
pub const APPLE_TAGS: &[&str] = &["fruit"];

#[async_trait]
pub trait MediaService: Send + Sync {
    /// Upload a local file with the given options
    async fn upload(&self, request: &UploadRequest) -> Result<UploadResult>;

    /// Resolve an asset by public id into a renderable descriptor
    async fn lookup(&self, public_id: &str) -> Result<AssetDescriptor>;
}

/// What to upload and how the provider should store it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadRequest {
    pub file: PathBuf,
    pub public_id: String,
    pub transformation: String,
    pub tags: Vec<String>,
}

impl UploadRequest {
    /// The fixed apple upload served by `/apple`
    pub fn apple() -> Self {
        Self {
            file: PathBuf::from(APPLE_FILE),
            public_id: APPLE_PUBLIC_ID.to_string(),
            transformation: APPLE_TRANSFORMATION.to_string(),
            tags: APPLE_TAGS.iter().map(|t| t.to_string()).collect(),
        }
    }
}

/// Upload response returned by the provider
#[derive(Debug, Clone, Default, Deserialize)]
pub struct UploadResult {
    #[serde(default)]
    pub public_id: String,
    #[serde(default)]
    pub version: Option<u64>,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub secure_url: String,
    #[serde(default)]
    pub format: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
}

/// Reference to a stored asset that can be rendered into a delivery URL
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AssetDescriptor {
    pub delivery_prefix: String,
    pub cloud_name: String,
    pub resource_type: String,
    pub delivery_type: String,
    pub public_id: String,
}

impl AssetDescriptor {
    pub fn image(delivery_prefix: &str, cloud_name: &str, public_id: &str) -> Self {
        Self {
            delivery_prefix: delivery_prefix.to_string(),
            cloud_name: cloud_name.to_string(),
            resource_type: "image".to_string(),
            delivery_type: "upload".to_string(),
            public_id: public_id.to_string(),
        }
    }

    /// Render the canonical delivery URL,
    /// e.g. `https://res.cloudinary.com/<cloud>/image/upload/docs/sdk/go/apple`
    pub fn render(&self) -> Result<String> {
        if self.cloud_name.trim().is_empty() {
            return Err(MediaError::InvalidAsset("cloud name is empty".into()));
        }
        if self.public_id.trim().is_empty() {
            return Err(MediaError::InvalidAsset("public id is empty".into()));
        }

        let mut url = Url::parse(&self.delivery_prefix).map_err(|e| {
            MediaError::InvalidAsset(format!(
                "bad delivery prefix {}: {}",
                self.delivery_prefix, e
            ))
        })?;

        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                MediaError::InvalidAsset(format!(
                    "delivery prefix {} cannot be a base",
                    self.delivery_prefix
                ))
            })?;
            segments
                .pop_if_empty()
                .push(&self.cloud_name)
                .push(&self.resource_type)
                .push(&self.delivery_type);
            // Public ids carry folders, keep them as path segments
            segments.extend(self.public_id.split('/').filter(|s| !s.is_empty()));
        }

        Ok(url.to_string())
    }
}
