// ABOUTME: Process configuration loaded once at startup from the environment
// ABOUTME: Port, Cloudinary credentials and endpoint prefixes, listener limits

use crate::media::cloudinary::{
    Credentials, SignatureAlgorithm, DEFAULT_DELIVERY_PREFIX, DEFAULT_UPLOAD_PREFIX,
};
use crate::server::ConnectionLimits;
use anyhow::{anyhow, Context, Result};
use percent_encoding::percent_decode_str;
use std::{env, time::Duration};
use url::Url;

/// Deadline for the provider calls made while handling one request
pub const OPERATION_TIMEOUT: Duration = Duration::from_secs(10);

/// Room left inside the write timeout to serialize the response after the
/// provider calls give up
pub const RESPONSE_MARGIN: Duration = Duration::from_millis(500);

// Configuration
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub bind_host: String,
    pub credentials: Credentials,
    pub upload_prefix: String,
    pub delivery_prefix: String,
    pub signature_algorithm: SignatureAlgorithm,
    pub limits: ConnectionLimits,
    pub operation_timeout: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from any variable source; empty values count as unset
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let port = var("PORT")
            .ok_or_else(|| anyhow!("PORT must be set"))?
            .trim()
            .parse::<u16>()
            .context("PORT must be a valid port number")?;

        // CLOUDINARY_URL fills in whatever the individual variables leave out
        let from_url = match var("CLOUDINARY_URL") {
            Some(raw) => parse_cloudinary_url(&raw)?,
            None => Credentials::default(),
        };
        let credentials = Credentials {
            cloud_name: var("CLOUD_NAME").unwrap_or(from_url.cloud_name),
            api_key: var("API_KEY").unwrap_or(from_url.api_key),
            api_secret: var("API_SECRET").unwrap_or(from_url.api_secret),
        };

        let signature_algorithm = match var("CLOUDINARY_SIGNATURE_ALGORITHM") {
            Some(raw) => raw
                .parse::<SignatureAlgorithm>()
                .map_err(|e: String| anyhow!(e))
                .context("CLOUDINARY_SIGNATURE_ALGORITHM must be sha1 or sha256")?,
            None => SignatureAlgorithm::default(),
        };

        Ok(Self {
            port,
            bind_host: var("BIND_HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            credentials,
            upload_prefix: var("CLOUDINARY_UPLOAD_PREFIX")
                .unwrap_or_else(|| DEFAULT_UPLOAD_PREFIX.to_string()),
            delivery_prefix: var("CLOUDINARY_DELIVERY_PREFIX")
                .unwrap_or_else(|| DEFAULT_DELIVERY_PREFIX.to_string()),
            signature_algorithm,
            limits: ConnectionLimits::default(),
            operation_timeout: OPERATION_TIMEOUT,
        })
    }

    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.port)
    }

    /// Deadline for one request's provider calls. Kept inside the write
    /// timeout so a stalled call still falls through to a 200 response.
    pub fn operation_budget(&self) -> Duration {
        self.operation_timeout
            .min(self.limits.write_timeout.saturating_sub(RESPONSE_MARGIN))
    }
}

/// Parse `cloudinary://<api_key>:<api_secret>@<cloud_name>`
fn parse_cloudinary_url(raw: &str) -> Result<Credentials> {
    let url = Url::parse(raw).context("CLOUDINARY_URL is not a valid URL")?;
    if url.scheme() != "cloudinary" {
        return Err(anyhow!(
            "CLOUDINARY_URL must use the cloudinary:// scheme, got {}://",
            url.scheme()
        ));
    }

    Ok(Credentials {
        cloud_name: url.host_str().unwrap_or_default().to_string(),
        api_key: decode_userinfo(url.username())?,
        api_secret: decode_userinfo(url.password().unwrap_or_default())?,
    })
}

// Userinfo comes back percent-encoded
fn decode_userinfo(raw: &str) -> Result<String> {
    Ok(percent_decode_str(raw)
        .decode_utf8()
        .context("CLOUDINARY_URL credentials are not valid UTF-8")?
        .into_owned())
}
