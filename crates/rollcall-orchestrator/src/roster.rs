//! Read-only client for the external roster web application.
//!
//! The roster owns courses, enrollments, training images, the schedule feed,
//! and the service-config document. Everything here is behind the [`Roster`]
//! trait so the training engine can be exercised against an in-process stub.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Mutex;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use rollcall_core::{
  Error, Result,
  model::{CourseId, MemberId},
  schedule::{DayOfWeek, ScheduleEntry},
};
use serde::Deserialize;
use tracing::debug;

/// One training image for an enrolled member, already fetched.
#[derive(Debug, Clone)]
pub struct TrainingImage {
  pub member_id: MemberId,
  pub bytes:     Vec<u8>,
}

/// The roster surface the orchestrator consumes.
pub trait Roster: Send + Sync {
  /// Count of active enrollments for a course.
  fn enrollment_count(
    &self,
    course_id: CourseId,
  ) -> impl Future<Output = Result<u32>> + Send + '_;

  /// All current training images for members enrolled in a course.
  fn training_images(
    &self,
    course_id: CourseId,
  ) -> impl Future<Output = Result<Vec<TrainingImage>>> + Send + '_;

  /// The full schedule feed.
  fn schedule(&self) -> impl Future<Output = Result<Vec<ScheduleEntry>>> + Send + '_;

  /// The service-config key-value document for the training service.
  fn service_config(
    &self,
  ) -> impl Future<Output = Result<HashMap<String, String>>> + Send + '_;
}

// ─── HTTP implementation ─────────────────────────────────────────────────────

/// Connection settings for the roster API.
#[derive(Debug, Clone)]
pub struct RosterConfig {
  pub base_url: String,
  pub username: String,
  pub password: String,
  pub timeout:  Duration,
}

/// Roster client over the web application's JSON API.
///
/// Holds the current bearer token; a 401 triggers one re-authentication and
/// retry before the call is reported as an authentication failure.
pub struct HttpRoster {
  client: Client,
  config: RosterConfig,
  token:  Mutex<Option<String>>,
}

#[derive(Deserialize)]
struct TokenResponse {
  token: String,
}

/// Standard paginated collection envelope.
#[derive(Deserialize)]
struct Page<T> {
  count:   u64,
  next:    Option<String>,
  results: Vec<T>,
}

#[derive(Deserialize)]
struct TrainingImageRow {
  member:    MemberId,
  file_path: String,
}

#[derive(Deserialize)]
struct ScheduleRow {
  id:          i64,
  course:      CourseId,
  room:        String,
  day_of_week: String,
  start_time:  String,
  end_time:    String,
}

#[derive(Deserialize)]
struct ConfigRow {
  key:   String,
  value: String,
}

impl HttpRoster {
  pub fn new(config: RosterConfig) -> Result<Self> {
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

  /// GET `url`, re-authenticating once on a 401.
  async fn get(&self, url: &str) -> Result<reqwest::Response> {
    let token = {
      let slot = self.token.lock().expect("token slot poisoned");
      slot.clone()
    };
    let token = match token {
      Some(t) => t,
      None    => self.authenticate().await?,
    };

    let resp = self
      .client
      .get(url)
      .bearer_auth(&token)
      .send()
      .await
      .map_err(|e| Error::Connectivity(e.to_string()))?;

    if resp.status() == StatusCode::UNAUTHORIZED {
      debug!(url, "token rejected, re-authenticating");
      let fresh = self.authenticate().await?;
      let retry = self
        .client
        .get(url)
        .bearer_auth(&fresh)
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

  async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
    let resp = self.get(url).await?;
    if !resp.status().is_success() {
      return Err(Error::Connectivity(format!("GET {url} → {}", resp.status())));
    }
    resp.json().await.map_err(|e| Error::Connectivity(e.to_string()))
  }

  /// Collect every page of a paginated collection by following `next` links.
  async fn get_all_pages<T: serde::de::DeserializeOwned>(
    &self,
    first_url: String,
  ) -> Result<Vec<T>> {
    let mut out = Vec::new();
    let mut url = Some(first_url);
    while let Some(u) = url {
      let page: Page<T> = self.get_json(&u).await?;
      out.extend(page.results);
      url = page.next;
    }
    Ok(out)
  }
}

impl Roster for HttpRoster {
  async fn enrollment_count(&self, course_id: CourseId) -> Result<u32> {
    let page: Page<serde_json::Value> = self
      .get_json(&self.url(&format!("/enrollments/?course_id={course_id}&page_size=1")))
      .await?;
    Ok(page.count as u32)
  }

  async fn training_images(&self, course_id: CourseId) -> Result<Vec<TrainingImage>> {
    let rows: Vec<TrainingImageRow> = self
      .get_all_pages(self.url(&format!("/training-images/?course_id={course_id}")))
      .await?;

    let mut images = Vec::with_capacity(rows.len());
    for row in rows {
      let file_url = if row.file_path.starts_with("http") {
        row.file_path.clone()
      } else {
        format!(
          "{}/{}",
          self.config.base_url.trim_end_matches('/'),
          row.file_path.trim_start_matches('/')
        )
      };
      let resp = self.get(&file_url).await?;
      if !resp.status().is_success() {
        return Err(Error::Connectivity(format!(
          "GET {file_url} → {}",
          resp.status()
        )));
      }
      let bytes = resp
        .bytes()
        .await
        .map_err(|e| Error::Connectivity(e.to_string()))?;
      images.push(TrainingImage { member_id: row.member, bytes: bytes.to_vec() });
    }
    Ok(images)
  }

  async fn schedule(&self) -> Result<Vec<ScheduleEntry>> {
    let rows: Vec<ScheduleRow> =
      self.get_all_pages(self.url("/schedules/")).await?;

    rows
      .into_iter()
      .map(|row| {
        let day = DayOfWeek::parse(&row.day_of_week).ok_or_else(|| {
          Error::Connectivity(format!("bad day in schedule feed: {:?}", row.day_of_week))
        })?;
        let start = parse_time(&row.start_time)?;
        let end   = parse_time(&row.end_time)?;
        Ok(ScheduleEntry {
          entry_id:    row.id,
          course_id:   row.course,
          room:        row.room,
          day_of_week: day,
          start_time:  start,
          end_time:    end,
        })
      })
      .collect()
  }

  async fn service_config(&self) -> Result<HashMap<String, String>> {
    let rows: Vec<ConfigRow> = self
      .get_all_pages(self.url("/service-configs/by-service/Training/"))
      .await?;
    Ok(rows.into_iter().map(|r| (r.key, r.value)).collect())
  }
}

fn parse_time(s: &str) -> Result<chrono::NaiveTime> {
  chrono::NaiveTime::parse_from_str(s, "%H:%M:%S")
    .map_err(|e| Error::Connectivity(format!("bad time in schedule feed {s:?}: {e}")))
}
