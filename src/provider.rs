//! Third-party background removal providers
//!
//! Each provider is a hosted API reached with a bearer key taken from the
//! environment. Without a key, or when the call fails, the upload comes back
//! watermarked so the UI still has something to show.

use crate::error::BgError;
use crate::watermark::watermark_png;
use reqwest::multipart::{Form, Part};
use reqwest::StatusCode;
#[cfg(test)]
use std::collections::HashMap;
use std::time::Duration;

const MISSING_KEY_TEXT: &str = "API KEY MISSING";
const API_ERROR_TEXT: &str = "API ERROR";

/// Known providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Provider {
    RemoveBg,
    Clipdrop,
    Photoroom,
}

impl Provider {
    pub const ALL: [Provider; 3] = [Provider::RemoveBg, Provider::Clipdrop, Provider::Photoroom];

    /// Name used in forms and in the request URL
    pub fn name(&self) -> &'static str {
        match self {
            Self::RemoveBg => "remove.bg",
            Self::Clipdrop => "clipdrop",
            Self::Photoroom => "photoroom",
        }
    }

    /// Environment variable holding the API key
    pub fn env_var(&self) -> &'static str {
        match self {
            Self::RemoveBg => "REMOVE_BG_API_KEY",
            Self::Clipdrop => "CLIPDROP_API_KEY",
            Self::Photoroom => "PHOTOROOM_API_KEY",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.name() == name)
    }
}

/// Where API keys are looked up
#[derive(Debug, Clone)]
pub enum KeySource {
    /// Read the provider's env var on every call
    Environment,
    /// Fixed keys, for tests
    #[cfg(test)]
    Fixed(HashMap<Provider, String>),
}

impl KeySource {
    fn key_for(&self, provider: Provider) -> Option<String> {
        let key = match self {
            Self::Environment => std::env::var(provider.env_var()).ok(),
            #[cfg(test)]
            Self::Fixed(keys) => keys.get(&provider).cloned(),
        };
        key.filter(|k| !k.is_empty())
    }
}

/// How a provider result was produced
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The provider returned an image
    Remote,
    /// No key configured, watermarked original
    MissingKey,
    /// The provider call failed, watermarked original
    ApiError,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Remote => "remote",
            Self::MissingKey => "mock",
            Self::ApiError => "api_error",
        }
    }
}

#[derive(Debug)]
pub struct ProviderOutput {
    pub bytes: Vec<u8>,
    pub outcome: Outcome,
}

/// HTTP client for provider calls
pub struct ProviderClient {
    http: reqwest::Client,
    base_url: String,
    keys: KeySource,
}

impl ProviderClient {
    pub fn new(base_url: &str, timeout: Duration, keys: KeySource) -> Result<Self, BgError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| BgError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            keys,
        })
    }

    /// Whether a key is available for the provider
    pub fn is_configured(&self, provider: Provider) -> bool {
        self.keys.key_for(provider).is_some()
    }

    /// Remove the background of `image` with the named provider
    ///
    /// Unknown provider names behave like a provider without a key.
    pub async fn remove_background(
        &self,
        provider_name: &str,
        image: &[u8],
    ) -> Result<ProviderOutput, BgError> {
        let key = Provider::from_name(provider_name).and_then(|p| self.keys.key_for(p));

        let Some(key) = key else {
            tracing::info!("No API key for provider '{}', returning mock", provider_name);
            return Ok(ProviderOutput {
                bytes: watermarked(image, MISSING_KEY_TEXT).await?,
                outcome: Outcome::MissingKey,
            });
        };

        match self.call(provider_name, &key, image).await {
            Ok(bytes) => Ok(ProviderOutput {
                bytes,
                outcome: Outcome::Remote,
            }),
            Err(e) => {
                tracing::warn!("Provider '{}' failed: {}", provider_name, e);
                Ok(ProviderOutput {
                    bytes: watermarked(image, API_ERROR_TEXT).await?,
                    outcome: Outcome::ApiError,
                })
            }
        }
    }

    async fn call(&self, provider_name: &str, key: &str, image: &[u8]) -> Result<Vec<u8>, BgError> {
        let url = format!("{}/{}/remove", self.base_url, provider_name);

        let part = Part::bytes(image.to_vec())
            .file_name("image.png")
            .mime_str("image/png")
            .map_err(|e| BgError::Provider(format!("Invalid part: {}", e)))?;
        let form = Form::new().part("image_file", part);

        let response = self
            .http
            .post(&url)
            .bearer_auth(key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| BgError::Provider(format!("Request to {} failed: {}", url, e)))?;

        let status = response.status();
        if status != StatusCode::OK {
            return Err(BgError::Provider(format!("{} returned {}", url, status)));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| BgError::Provider(format!("Failed to read response: {}", e)))?;
        if body.is_empty() {
            return Err(BgError::Provider(format!("{} returned an empty body", url)));
        }

        Ok(body.to_vec())
    }
}

/// Run `watermark_png` on the blocking pool
async fn watermarked(image: &[u8], text: &'static str) -> Result<Vec<u8>, BgError> {
    let data = image.to_vec();
    tokio::task::spawn_blocking(move || watermark_png(&data, text))
        .await
        .map_err(|e| BgError::Internal(format!("Watermark task failed: {}", e)))?
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::Multipart, http::HeaderMap, routing::post, Router};

    const STUB_BODY: &[u8] = b"\x89PNG-from-provider";

    fn sample_png() -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(48, 48, image::Rgba([0, 0, 255, 255]));
        crate::matting::encode_png(&img).unwrap()
    }

    fn keys(provider: Provider, key: &str) -> KeySource {
        KeySource::Fixed(HashMap::from([(provider, key.to_string())]))
    }

    /// Provider stand-in: answers 200 only to the expected key and form field
    async fn spawn_stub(body: &'static [u8]) -> String {
        let app = Router::new().route(
            "/:provider/remove",
            post(move |headers: HeaderMap, mut multipart: Multipart| async move {
                let authorized = headers
                    .get("authorization")
                    .and_then(|v| v.to_str().ok())
                    == Some("Bearer test-key");

                let mut has_file = false;
                while let Ok(Some(field)) = multipart.next_field().await {
                    if field.name() == Some("image_file") && field.file_name() == Some("image.png") {
                        has_file = true;
                    }
                }

                if authorized && has_file {
                    (axum::http::StatusCode::OK, body.to_vec())
                } else {
                    (axum::http::StatusCode::UNAUTHORIZED, Vec::new())
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{}", addr)
    }

    #[test]
    fn test_provider_names_and_env_vars() {
        assert_eq!(Provider::from_name("remove.bg"), Some(Provider::RemoveBg));
        assert_eq!(Provider::from_name("clipdrop"), Some(Provider::Clipdrop));
        assert_eq!(Provider::from_name("photoroom"), Some(Provider::Photoroom));
        assert_eq!(Provider::from_name("Remove.bg"), None);
        assert_eq!(Provider::Photoroom.env_var(), "PHOTOROOM_API_KEY");
    }

    #[test]
    fn test_only_empty_keys_count_as_missing() {
        let source = keys(Provider::Clipdrop, "");
        assert!(source.key_for(Provider::Clipdrop).is_none());
        assert!(source.key_for(Provider::RemoveBg).is_none());

        // Whitespace is still a value and gets sent to the provider
        let source = keys(Provider::Clipdrop, "  ");
        assert_eq!(source.key_for(Provider::Clipdrop).as_deref(), Some("  "));
    }

    #[tokio::test]
    async fn test_missing_key_returns_watermarked_mock() {
        let client = ProviderClient::new(
            "http://127.0.0.1:9",
            Duration::from_secs(1),
            KeySource::Fixed(HashMap::new()),
        )
        .unwrap();

        let out = client.remove_background("remove.bg", &sample_png()).await.unwrap();
        assert_eq!(out.outcome, Outcome::MissingKey);

        let img = image::load_from_memory(&out.bytes).unwrap().to_rgba8();
        assert_eq!(img.dimensions(), (48, 48));
        // Red ink lands near the top-left corner of the blue image
        assert!(img.pixels().any(|p| p.0[0] > 100));
        assert_eq!(*img.get_pixel(47, 47), image::Rgba([0, 0, 255, 255]));
    }

    #[tokio::test]
    async fn test_unknown_provider_is_mocked() {
        let client = ProviderClient::new(
            "http://127.0.0.1:9",
            Duration::from_secs(1),
            keys(Provider::RemoveBg, "test-key"),
        )
        .unwrap();

        let out = client.remove_background("nonexistent", &sample_png()).await.unwrap();
        assert_eq!(out.outcome, Outcome::MissingKey);
    }

    #[tokio::test]
    async fn test_remote_success_returns_provider_bytes() {
        let base = spawn_stub(STUB_BODY).await;
        let client = ProviderClient::new(
            &base,
            Duration::from_secs(5),
            keys(Provider::Clipdrop, "test-key"),
        )
        .unwrap();

        let out = client.remove_background("clipdrop", &sample_png()).await.unwrap();
        assert_eq!(out.outcome, Outcome::Remote);
        assert_eq!(out.bytes, STUB_BODY);
    }

    #[tokio::test]
    async fn test_rejected_call_falls_back_to_api_error() {
        let base = spawn_stub(STUB_BODY).await;
        let client = ProviderClient::new(
            &base,
            Duration::from_secs(5),
            keys(Provider::Photoroom, "wrong-key"),
        )
        .unwrap();

        let out = client.remove_background("photoroom", &sample_png()).await.unwrap();
        assert_eq!(out.outcome, Outcome::ApiError);
        assert_eq!(image::guess_format(&out.bytes).unwrap(), image::ImageFormat::Png);
    }

    #[tokio::test]
    async fn test_empty_body_falls_back_to_api_error() {
        let base = spawn_stub(b"").await;
        let client = ProviderClient::new(
            &base,
            Duration::from_secs(5),
            keys(Provider::RemoveBg, "test-key"),
        )
        .unwrap();

        let out = client.remove_background("remove.bg", &sample_png()).await.unwrap();
        assert_eq!(out.outcome, Outcome::ApiError);
    }

    #[tokio::test]
    async fn test_unreachable_provider_falls_back_to_api_error() {
        let client = ProviderClient::new(
            "http://127.0.0.1:9",
            Duration::from_secs(2),
            keys(Provider::RemoveBg, "test-key"),
        )
        .unwrap();

        let out = client.remove_background("remove.bg", &sample_png()).await.unwrap();
        assert_eq!(out.outcome, Outcome::ApiError);
    }
}
