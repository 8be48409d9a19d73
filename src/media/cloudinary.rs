// ABOUTME: Cloudinary implementation of the media capability
// ABOUTME: Signed multipart uploads over reqwest, local URL rendering for lookups

use super::{AssetDescriptor, MediaService, UploadRequest, UploadResult};
use crate::error::{MediaError, Result};
use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use sha1::Sha1;
use sha2::{Digest, Sha256};
use std::{
    fmt,
    str::FromStr,
    time::{SystemTime, UNIX_EPOCH},
};
use tracing::{debug, info};

pub const DEFAULT_UPLOAD_PREFIX: &str = "https://api.cloudinary.com";
pub const DEFAULT_DELIVERY_PREFIX: &str = "https://res.cloudinary.com";

/// Account credentials for signed API calls
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Credentials {
    pub cloud_name: String,
    pub api_key: String,
    pub api_secret: String,
}

impl Credentials {
    pub fn validate(&self) -> Result<()> {
        if self.cloud_name.trim().is_empty() {
            return Err(MediaError::Credentials("cloud name must be set"));
        }
        if self.api_key.trim().is_empty() {
            return Err(MediaError::Credentials("API key must be set"));
        }
        if self.api_secret.trim().is_empty() {
            return Err(MediaError::Credentials("API secret must be set"));
        }
        Ok(())
    }
}

/// Digest used for request signatures. Accounts sign with SHA-1 unless
/// they have been switched to SHA-256.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum SignatureAlgorithm {
    #[default]
    Sha1,
    Sha256,
}

impl SignatureAlgorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            SignatureAlgorithm::Sha1 => "sha1",
            SignatureAlgorithm::Sha256 => "sha256",
        }
    }

    fn digest_hex(&self, input: &[u8]) -> String {
        match self {
            SignatureAlgorithm::Sha1 => hex::encode(Sha1::digest(input)),
            SignatureAlgorithm::Sha256 => hex::encode(Sha256::digest(input)),
        }
    }
}

impl fmt::Display for SignatureAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SignatureAlgorithm {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sha1" => Ok(SignatureAlgorithm::Sha1),
            "sha256" => Ok(SignatureAlgorithm::Sha256),
            other => Err(format!("unsupported signature algorithm: {}", other)),
        }
    }
}

// Error body, e.g. {"error":{"message":"Invalid Signature ..."}}
#[derive(Debug, Deserialize)]
struct ProviderErrorBody {
    error: ProviderErrorMessage,
}

#[derive(Debug, Deserialize)]
struct ProviderErrorMessage {
    message: String,
}

pub struct CloudinaryClient {
    http: reqwest::Client,
    credentials: Credentials,
    upload_prefix: String,
    delivery_prefix: String,
    signature_algorithm: SignatureAlgorithm,
}

impl CloudinaryClient {
    pub fn new(credentials: Credentials, upload_prefix: &str, delivery_prefix: &str) -> Self {
        Self {
            http: reqwest::Client::new(),
            credentials,
            upload_prefix: upload_prefix.trim_end_matches('/').to_string(),
            delivery_prefix: delivery_prefix.to_string(),
            signature_algorithm: SignatureAlgorithm::default(),
        }
    }

    pub fn with_signature_algorithm(mut self, algorithm: SignatureAlgorithm) -> Self {
        self.signature_algorithm = algorithm;
        self
    }

    fn upload_endpoint(&self) -> String {
        format!(
            "{}/v1_1/{}/image/upload",
            self.upload_prefix, self.credentials.cloud_name
        )
    }
}

/// Sign upload parameters: sorted `key=value` pairs joined with `&`,
/// followed by the API secret, hashed and hex encoded.
/// Empty values are not part of the signature.
pub fn sign_params(
    params: &[(&str, String)],
    api_secret: &str,
    algorithm: SignatureAlgorithm,
) -> String {
    let mut signed: Vec<&(&str, String)> = params.iter().filter(|(_, v)| !v.is_empty()).collect();
    signed.sort_by(|a, b| a.0.cmp(b.0));

    let to_sign = signed
        .iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&");

    algorithm.digest_hex(format!("{}{}", to_sign, api_secret).as_bytes())
}

fn unix_timestamp() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

#[async_trait]
impl MediaService for CloudinaryClient {
    async fn upload(&self, request: &UploadRequest) -> Result<UploadResult> {
        self.credentials.validate()?;

        let data = tokio::fs::read(&request.file)
            .await
            .map_err(|source| MediaError::Io {
                path: request.file.display().to_string(),
                source,
            })?;
        let size = data.len();

        let params: Vec<(&'static str, String)> = vec![
            ("public_id", request.public_id.clone()),
            ("tags", request.tags.join(",")),
            ("timestamp", unix_timestamp().to_string()),
            ("transformation", request.transformation.clone()),
        ];
        let signature = sign_params(
            &params,
            &self.credentials.api_secret,
            self.signature_algorithm,
        );

        let file_name = request
            .file
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "file".to_string());

        let mut form = Form::new().part("file", Part::bytes(data).file_name(file_name));
        for (key, value) in params {
            if !value.is_empty() {
                form = form.text(key, value);
            }
        }
        let mut form = form
            .text("api_key", self.credentials.api_key.clone())
            .text("signature", signature);
        if self.signature_algorithm != SignatureAlgorithm::Sha1 {
            form = form.text("signature_algorithm", self.signature_algorithm.as_str());
        }

        let endpoint = self.upload_endpoint();
        debug!(endpoint = %endpoint, size, "uploading {}", request.file.display());

        let response = self.http.post(&endpoint).multipart(form).send().await?;
        let status = response.status();
        let body = response.bytes().await?;

        if !status.is_success() {
            let message = match serde_json::from_slice::<ProviderErrorBody>(&body) {
                Ok(parsed) => parsed.error.message,
                Err(_) => String::from_utf8_lossy(&body).into_owned(),
            };
            return Err(MediaError::Provider {
                status: status.as_u16(),
                message,
            });
        }

        let result: UploadResult = serde_json::from_slice(&body)?;
        info!(public_id = %result.public_id, size, "Uploaded {}", request.file.display());
        Ok(result)
    }

    async fn lookup(&self, public_id: &str) -> Result<AssetDescriptor> {
        if public_id.trim().is_empty() {
            return Err(MediaError::InvalidAsset("public id is empty".into()));
        }
        // Descriptors are derived from account config, no round-trip needed
        Ok(AssetDescriptor::image(
            &self.delivery_prefix,
            &self.credentials.cloud_name,
            public_id,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn credentials() -> Credentials {
        Credentials {
            cloud_name: "demo".to_string(),
            api_key: "123456".to_string(),
            api_secret: "abcd".to_string(),
        }
    }

    fn image_file() -> NamedTempFile {
        let mut file = NamedTempFile::with_suffix(".png").unwrap();
        file.write_all(b"PNG placeholder bytes").unwrap();
        file.flush().unwrap();
        file
    }

    fn request_for(file: &NamedTempFile) -> UploadRequest {
        UploadRequest {
            file: file.path().to_path_buf(),
            ..UploadRequest::apple()
        }
    }

    #[test]
    fn test_sign_params_sha1() {
        // Worked example from the provider's signing documentation
        let params = vec![
            ("timestamp", "1315060510".to_string()),
            ("public_id", "sample".to_string()),
        ];
        assert_eq!(
            sign_params(&params, "abcd", SignatureAlgorithm::Sha1),
            "c3470533147774275dd37996cc4d0e68fd03cd4f"
        );
    }

    #[test]
    fn test_sign_params_sha256() {
        let params = vec![
            ("timestamp", "1315060510".to_string()),
            ("public_id", "sample".to_string()),
        ];
        assert_eq!(
            sign_params(&params, "abcd", SignatureAlgorithm::Sha256),
            "0d4fe14b2b4a3f68a97ccc5097c43908b623d24293c296826a9390c14d891509"
        );
    }

    #[test]
    fn test_parse_signature_algorithm() {
        assert_eq!(SignatureAlgorithm::default(), SignatureAlgorithm::Sha1);
        assert_eq!("sha1".parse::<SignatureAlgorithm>(), Ok(SignatureAlgorithm::Sha1));
        assert_eq!(" SHA256 ".parse::<SignatureAlgorithm>(), Ok(SignatureAlgorithm::Sha256));
        assert!("md5".parse::<SignatureAlgorithm>().is_err());
    }

    #[test]
    fn test_sign_params_sorts_and_skips_empty() {
        let params = vec![
            ("transformation", "c_crop,g_center/q_auto/f_auto".to_string()),
            ("timestamp", "1700000000".to_string()),
            ("tags", "fruit".to_string()),
            ("public_id", "docs/sdk/go/apple".to_string()),
            ("folder", String::new()),
        ];
        assert_eq!(
            sign_params(&params, "abcd", SignatureAlgorithm::Sha1),
            "d0377eac3628e6905790fb0cfb02e62dc6d00c6a"
        );
    }

    #[test]
    fn test_validate_credentials() {
        assert!(credentials().validate().is_ok());

        let missing_secret = Credentials {
            api_secret: String::new(),
            ..credentials()
        };
        assert!(matches!(
            missing_secret.validate(),
            Err(MediaError::Credentials(_))
        ));
        assert!(Credentials::default().validate().is_err());
    }

    #[tokio::test]
    async fn test_upload_posts_signed_form() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1_1/demo/image/upload"))
            .and(body_string_contains("docs/sdk/go/apple"))
            .and(body_string_contains("c_crop,g_center/q_auto/f_auto"))
            .and(body_string_contains("name=\"signature\""))
            .and(body_string_contains("name=\"api_key\""))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "public_id": "docs/sdk/go/apple",
                "version": 1700000000u64,
                "format": "png",
                "tags": ["fruit"],
                "url": "http://res.cloudinary.com/demo/image/upload/v1700000000/docs/sdk/go/apple.png",
                "secure_url": "https://res.cloudinary.com/demo/image/upload/v1700000000/docs/sdk/go/apple.png"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CloudinaryClient::new(credentials(), &server.uri(), DEFAULT_DELIVERY_PREFIX);
        let file = image_file();
        let result = client.upload(&request_for(&file)).await.unwrap();

        assert_eq!(result.public_id, "docs/sdk/go/apple");
        assert_eq!(result.version, Some(1700000000));
        assert_eq!(result.format.as_deref(), Some("png"));
        assert_eq!(result.tags, vec!["fruit".to_string()]);
        assert!(result.secure_url.ends_with("docs/sdk/go/apple.png"));

        // SHA-1 is the provider default and is not announced
        let sent = server.received_requests().await.unwrap();
        let body = String::from_utf8_lossy(&sent[0].body);
        assert!(!body.contains("signature_algorithm"));
    }

    #[tokio::test]
    async fn test_upload_announces_sha256() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1_1/demo/image/upload"))
            .and(body_string_contains("name=\"signature_algorithm\""))
            .and(body_string_contains("sha256"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "public_id": "docs/sdk/go/apple"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let client = CloudinaryClient::new(credentials(), &server.uri(), DEFAULT_DELIVERY_PREFIX)
            .with_signature_algorithm(SignatureAlgorithm::Sha256);
        let file = image_file();
        let result = client.upload(&request_for(&file)).await.unwrap();
        assert_eq!(result.public_id, "docs/sdk/go/apple");
    }

    #[tokio::test]
    async fn test_upload_surfaces_provider_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/v1_1/demo/image/upload"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": { "message": "Invalid Signature" }
            })))
            .mount(&server)
            .await;

        let client = CloudinaryClient::new(credentials(), &server.uri(), DEFAULT_DELIVERY_PREFIX);
        let file = image_file();
        match client.upload(&request_for(&file)).await {
            Err(MediaError::Provider { status, message }) => {
                assert_eq!(status, 401);
                assert_eq!(message, "Invalid Signature");
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_non_json_error_body() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
            .mount(&server)
            .await;

        let client = CloudinaryClient::new(credentials(), &server.uri(), DEFAULT_DELIVERY_PREFIX);
        let file = image_file();
        match client.upload(&request_for(&file)).await {
            Err(MediaError::Provider { status, message }) => {
                assert_eq!(status, 502);
                assert_eq!(message, "bad gateway");
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_upload_missing_file() {
        let server = MockServer::start().await;
        let client = CloudinaryClient::new(credentials(), &server.uri(), DEFAULT_DELIVERY_PREFIX);
        let request = UploadRequest {
            file: "definitely/not/here.png".into(),
            ..UploadRequest::apple()
        };

        let err = client.upload(&request).await.unwrap_err();
        assert!(matches!(err, MediaError::Io { .. }));
        assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upload_rejects_missing_credentials() {
        let server = MockServer::start().await;
        let client = CloudinaryClient::new(Credentials::default(), &server.uri(), DEFAULT_DELIVERY_PREFIX);
        let file = image_file();

        let err = client.upload(&request_for(&file)).await.unwrap_err();
        assert!(matches!(err, MediaError::Credentials(_)));
    }

    #[tokio::test]
    async fn test_lookup_renders_delivery_url() {
        let client = CloudinaryClient::new(credentials(), DEFAULT_UPLOAD_PREFIX, DEFAULT_DELIVERY_PREFIX);

        let asset = client.lookup("docs/sdk/go/apple").await.unwrap();
        assert_eq!(
            asset.render().unwrap(),
            "https://res.cloudinary.com/demo/image/upload/docs/sdk/go/apple"
        );

        assert!(matches!(
            client.lookup("").await,
            Err(MediaError::InvalidAsset(_))
        ));
    }
}
