//! Async HTTP client wrapping the orchestrator's registry API.
//!
//! Network calls carry a bounded timeout; a timeout or connection failure
//! surfaces as [`Error::Connectivity`] and the calling tick treats it as
//! transient. A 401 triggers one re-authentication and retry.

use std::sync::Mutex;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use rollcall_core::{
  Error, Result,
  device::Device,
  model::{CourseId, ModelAssignment, ModelMetadata},
  schedule::{DayOfWeek, ScheduleEntry},
};
use serde::Deserialize;
use tracing::debug;
use uuid::Uuid;

/// Connection settings for the registry API.
#[derive(Debug, Clone)]
pub struct ClientConfig {
  pub base_url: String,
  pub username: String,
  pub password: String,
  pub timeout:  Duration,
}

/// Async client for the orchestrator's registry API.
pub struct RegistryClient {
  client: Client,
  config: ClientConfig,
  token:  Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct TokenResponse {
  token: String,
}

#[derive(Deserialize)]
struct AckResponse {
  updated: bool,
}

impl RegistryClient {
  pub fn new(config: ClientConfig) -> Result<Self> {
    let client = Client::builder()
      .timeout(config.timeout)
      .build()
      .map_err(|e| Error::Connectivity(e.to_string()))?;
    Ok(Self { client, config, token: Mutex::new(None) })
  }

  fn url(&self, path: &str) -> String {
    format!("{}/api{}", self.config.base_url.trim_end_matches('/'), path)
  }

  async fn authenticate(&self) -> Result<String> {
    let resp = self
      .client
      .post(self.url("/token"))
      .json(&serde_json::json!({
        "username": self.config.username,
        "password": self.config.password,
      }))
      .send()
      .await
      .map_err(|e| Error::Connectivity(e.to_string()))?;

    if resp.status() == StatusCode::UNAUTHORIZED {
      return Err(Error::Authentication);
    }
    if !resp.status().is_success() {
      return Err(Error::Connectivity(format!("token exchange → {}", resp.status())));
    }

    let body: TokenResponse =
      resp.json().await.map_err(|e| Error::Connectivity(e.to_string()))?;
    *self.token.lock().expect("token slot poisoned") = Some(body.token.clone());
    Ok(body.token)
  }

  /// Send `build(token)`, re-authenticating once on a 401.
  async fn send_authed(
    &self,
    build: impl Fn(&str) -> reqwest::RequestBuilder,
  ) -> Result<reqwest::Response> {
    let token = {
      let slot = self.token.lock().expect("token slot poisoned");
      slot.clone()
    };
    let token = match token {
      Some(t) => t,
      None    => self.authenticate().await?,
    };

    let resp = build(&token)
      .send()
      .await
      .map_err(|e| Error::Connectivity(e.to_string()))?;

    if resp.status() == StatusCode::UNAUTHORIZED {
      debug!("token rejected, re-authenticating");
      let fresh = self.authenticate().await?;
      let retry = build(&fresh)
        .send()
        .await
        .map_err(|e| Error::Connectivity(e.to_string()))?;
      if retry.status() == StatusCode::UNAUTHORIZED {
        return Err(Error::Authentication);
      }
      return Ok(retry);
    }
    Ok(resp)
  }

  // ── Endpoints ─────────────────────────────────────────────────────────────

  /// `POST /api/devices` — register (or relocate) this device.
  pub async fn register_device(&self, name: &str, room: &str) -> Result<Device> {
    let url  = self.url("/devices");
    let body = serde_json::json!({ "name": name, "room": room });
    let resp = self
      .send_authed(|token| self.client.post(&url).bearer_auth(token).json(&body))
      .await?;

    if !resp.status().is_success() {
      return Err(Error::Connectivity(format!("POST {url} → {}", resp.status())));
    }
    resp.json().await.map_err(|e| Error::Connectivity(e.to_string()))
  }

  /// `GET /api/schedule/{room}/{day}`
  pub async fn schedule(&self, room: &str, day: DayOfWeek) -> Result<Vec<ScheduleEntry>> {
    let url  = self.url(&format!("/schedule/{room}/{day}"));
    let resp = self
      .send_authed(|token| self.client.get(&url).bearer_auth(token))
      .await?;

    if !resp.status().is_success() {
      return Err(Error::Connectivity(format!("GET {url} → {}", resp.status())));
    }
    resp.json().await.map_err(|e| Error::Connectivity(e.to_string()))
  }

  /// `GET /api/models/{course_id}` — `None` when the course has no trained
  /// model yet.
  pub async fn model_metadata(&self, course_id: CourseId) -> Result<Option<ModelMetadata>> {
    let url  = self.url(&format!("/models/{course_id}"));
    let resp = self
      .send_authed(|token| self.client.get(&url).bearer_auth(token))
      .await?;

    if resp.status() == StatusCode::NOT_FOUND {
      return Ok(None);
    }
    if !resp.status().is_success() {
      return Err(Error::Connectivity(format!("GET {url} → {}", resp.status())));
    }
    resp
      .json()
      .await
      .map(Some)
      .map_err(|e| Error::Connectivity(e.to_string()))
  }

  /// `GET /api/models/{course_id}/{version}/artifact` — the raw bytes.
  pub async fn download_artifact(&self, course_id: CourseId, version: u32) -> Result<Vec<u8>> {
    let url  = self.url(&format!("/models/{course_id}/{version}/artifact"));
    let resp = self
      .send_authed(|token| self.client.get(&url).bearer_auth(token))
      .await?;

    if !resp.status().is_success() {
      return Err(Error::Connectivity(format!("GET {url} → {}", resp.status())));
    }
    let bytes = resp
      .bytes()
      .await
      .map_err(|e| Error::Connectivity(e.to_string()))?;
    Ok(bytes.to_vec())
  }

  /// `GET /api/devices/{id}/assignments`
  pub async fn pending_assignments(&self, device_id: Uuid) -> Result<Vec<ModelAssignment>> {
    let url  = self.url(&format!("/devices/{device_id}/assignments"));
    let resp = self
      .send_authed(|token| self.client.get(&url).bearer_auth(token))
      .await?;

    if !resp.status().is_success() {
      return Err(Error::Connectivity(format!("GET {url} → {}", resp.status())));
    }
    resp.json().await.map_err(|e| Error::Connectivity(e.to_string()))
  }

  /// `POST /api/devices/{id}/assignments/{model_id}/downloaded`
  ///
  /// Returns `false` when the assignment was already acknowledged.
  pub async fn ack_downloaded(&self, device_id: Uuid, model_id: Uuid) -> Result<bool> {
    let url = self.url(&format!("/devices/{device_id}/assignments/{model_id}/downloaded"));
    let resp = self
      .send_authed(|token| self.client.post(&url).bearer_auth(token))
      .await?;

    if !resp.status().is_success() {
      return Err(Error::Connectivity(format!("POST {url} → {}", resp.status())));
    }
    let body: AckResponse =
      resp.json().await.map_err(|e| Error::Connectivity(e.to_string()))?;
    Ok(body.updated)
  }
}
