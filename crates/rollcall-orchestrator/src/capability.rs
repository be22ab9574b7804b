//! HTTP-backed implementations of the opaque ML capabilities.
//!
//! Feature extraction and classifier training run in an external training
//! service; this module adapts its two endpoints to the core traits. Both
//! calls are long-running and deliberately carry no client-side timeout —
//! connectivity failures surface on connect, not mid-epoch.

use reqwest::Client;
use rollcall_core::{
  Error, Result,
  capability::{ClassifierTrainer, FeatureExtractor},
};
use serde::Deserialize;

/// Client for the external training service.
#[derive(Clone)]
pub struct TrainingService {
  client:   Client,
  base_url: String,
}

#[derive(Deserialize)]
struct ExtractResponse {
  /// `null` when no usable face was found in the image.
  vector: Option<Vec<f32>>,
}

impl TrainingService {
  pub fn new(base_url: impl Into<String>) -> Self {
    Self { client: Client::new(), base_url: base_url.into() }
  }

  fn url(&self, path: &str) -> String {
    format!("{}{path}", self.base_url.trim_end_matches('/'))
  }
}

impl FeatureExtractor for TrainingService {
  async fn extract(&self, image: &[u8]) -> Result<Option<Vec<f32>>> {
    let resp = self
      .client
      .post(self.url("/extract"))
      .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
      .body(image.to_vec())
      .send()
      .await
      .map_err(|e| Error::Connectivity(e.to_string()))?;

    if !resp.status().is_success() {
      return Err(Error::Training(format!("extract → {}", resp.status())));
    }

    let body: ExtractResponse =
      resp.json().await.map_err(|e| Error::Connectivity(e.to_string()))?;
    Ok(body.vector)
  }
}

impl ClassifierTrainer for TrainingService {
  async fn train(&self, features: &[Vec<f32>], labels: &[u32]) -> Result<Vec<u8>> {
    let resp = self
      .client
      .post(self.url("/train"))
      .json(&serde_json::json!({
        "features": features,
        "labels":   labels,
      }))
      .send()
      .await
      .map_err(|e| Error::Connectivity(e.to_string()))?;

    if !resp.status().is_success() {
      return Err(Error::Training(format!("train → {}", resp.status())));
    }

    let bytes = resp
      .bytes()
      .await
      .map_err(|e| Error::Connectivity(e.to_string()))?;
    if bytes.is_empty() {
      return Err(Error::Training("training service returned an empty artifact".into()));
    }
    Ok(bytes.to_vec())
  }
}
