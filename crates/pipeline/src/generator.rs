//! Execution boundary for spot-image generation.
//!
//! One call encapsulates prompt construction, the image-model call,
//! and the upload. The job system only sees the outcome; everything
//! behind the boundary lives in the generation service.

use async_trait::async_trait;
use serde::Deserialize;

/// Result of a successful generation run for one spot.
#[derive(Debug, Clone)]
pub struct SpotImageOutcome {
    /// Storage reference of the uploaded image (object key or URL).
    pub image_reference: String,
}

/// Errors surfaced by a generator implementation.
///
/// Implementations report failures through this value wherever
/// possible; callers also tolerate transport-level errors bubbling up
/// the same way.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// The generation service ran and reported a failure.
    #[error("Generation failed: {0}")]
    Failed(String),

    /// The generation service could not be reached or answered
    /// unintelligibly.
    #[error("Generator unreachable: {0}")]
    Upstream(String),
}

/// Produces and stores one image per point of interest.
#[async_trait]
pub trait SpotImageGenerator: Send + Sync {
    /// Generate and upload the image for `spot_name` in plan `plan_id`.
    async fn generate_for_spot(
        &self,
        plan_id: &str,
        spot_name: &str,
    ) -> Result<SpotImageOutcome, GenerateError>;
}

// ---------------------------------------------------------------------------
// HTTP adapter
// ---------------------------------------------------------------------------

/// Wire shape of the generation service's response.
#[derive(Debug, Deserialize)]
struct GenerateResponse {
    image_reference: Option<String>,
    status: String,
    error_message: Option<String>,
}

/// Generator backed by the internal generation service over HTTP.
///
/// POSTs `{plan_id, spot_name}` to the configured endpoint and maps the
/// reported `{image_reference, status, error_message}` back into an
/// outcome.
pub struct HttpSpotImageGenerator {
    http: reqwest::Client,
    endpoint: String,
}

impl HttpSpotImageGenerator {
    /// Create a generator targeting the given service endpoint.
    pub fn new(endpoint: String) -> Self {
        Self {
            http: reqwest::Client::new(),
            endpoint,
        }
    }

    /// Build from the `GENERATOR_URL` environment variable.
    ///
    /// Panics when unset: a process that executes jobs without a
    /// generator is misconfigured and should fail at startup.
    pub fn from_env() -> Self {
        let endpoint = std::env::var("GENERATOR_URL").expect("GENERATOR_URL must be set");
        Self::new(endpoint)
    }
}

#[async_trait]
impl SpotImageGenerator for HttpSpotImageGenerator {
    async fn generate_for_spot(
        &self,
        plan_id: &str,
        spot_name: &str,
    ) -> Result<SpotImageOutcome, GenerateError> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&serde_json::json!({
                "plan_id": plan_id,
                "spot_name": spot_name,
            }))
            .send()
            .await
            .map_err(|e| GenerateError::Upstream(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(GenerateError::Upstream(format!(
                "Generator responded with HTTP {status}"
            )));
        }

        let body: GenerateResponse = response
            .json()
            .await
            .map_err(|e| GenerateError::Upstream(e.to_string()))?;

        match body.status.as_str() {
            "succeeded" => {
                let image_reference = body.image_reference.ok_or_else(|| {
                    GenerateError::Upstream(
                        "Generator reported success without an image reference".to_string(),
                    )
                })?;
                Ok(SpotImageOutcome { image_reference })
            }
            _ => Err(GenerateError::Failed(
                body.error_message
                    .unwrap_or_else(|| "Generator reported failure without a message".to_string()),
            )),
        }
    }
}
