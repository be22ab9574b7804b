//! On-device model cache: download, verify, activate, evict.
//!
//! Exactly one verified artifact is "current" per course at a time. Nothing
//! ever appears at a final cache path unless its digest checked out and the
//! write completed; activation is gated on the inference runtime actually
//! loading the artifact, and a failed candidate is discarded while the
//! previous model keeps serving.
//!
//! Layout: `<root>/course_<id>/v<version>/{model.bin,labels.json}` plus one
//! `current` pointer file per course.

use std::{
  collections::HashMap,
  fs,
  path::{Path, PathBuf},
};

use rollcall_core::{
  capability::ModelLoader,
  model::{CourseId, ModelMetadata},
};
use sha2::{Digest, Sha256};
use thiserror::Error;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::client::RegistryClient;

#[derive(Debug, Error)]
pub enum CacheError {
  #[error("cache io error: {0}")]
  Io(#[from] std::io::Error),

  #[error("artifact digest mismatch: expected {expected}, got {actual}")]
  DigestMismatch { expected: String, actual: String },

  #[error(transparent)]
  Core(#[from] rollcall_core::Error),

  #[error("labels serialization: {0}")]
  Json(#[from] serde_json::Error),
}

fn sha256_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

/// What [`ModelCache::ensure_active`] did for a course this tick.
#[derive(Debug)]
pub enum EnsureOutcome {
  /// The course has no trained model in the registry yet.
  NoModelPublished,
  /// The locally active version already matches the registry.
  AlreadyCurrent { version: u32, model_id: Uuid },
  /// A new version was downloaded (or found cached), verified, and made
  /// current.
  Activated { version: u32, model_id: Uuid },
}

// ─── Cache ───────────────────────────────────────────────────────────────────

pub struct ModelCache {
  root:   PathBuf,
  /// Per-course active version, mirrored by the on-disk pointer files.
  active: HashMap<CourseId, u32>,
}

impl ModelCache {
  /// Open the cache directory, creating it if needed, and rebuild the
  /// active-version map from the per-course pointer files.
  pub fn open(root: impl Into<PathBuf>) -> Result<Self, CacheError> {
    let root = root.into();
    fs::create_dir_all(&root)?;

    let mut active = HashMap::new();
    for entry in fs::read_dir(&root)? {
      let entry = entry?;
      let name = entry.file_name();
      let Some(course_id) = name
        .to_str()
        .and_then(|n| n.strip_prefix("course_"))
        .and_then(|n| n.parse::<CourseId>().ok())
      else {
        continue;
      };
      match fs::read_to_string(entry.path().join("current")) {
        Ok(raw) => {
          if let Ok(version) = raw.trim().parse::<u32>() {
            active.insert(course_id, version);
          }
        }
        Err(_) => continue,
      }
    }

    debug!(courses = active.len(), "model cache opened");
    Ok(Self { root, active })
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  pub fn active_version(&self, course_id: CourseId) -> Option<u32> {
    self.active.get(&course_id).copied()
  }

  fn course_dir(&self, course_id: CourseId) -> PathBuf {
    self.root.join(format!("course_{course_id}"))
  }

  fn version_dir(&self, course_id: CourseId, version: u32) -> PathBuf {
    self.course_dir(course_id).join(format!("v{version}"))
  }

  // ── Download / install ────────────────────────────────────────────────────

  /// Whether `(course, version)` is already cached with the expected digest.
  pub fn is_cached(&self, course_id: CourseId, version: u32, digest: &str) -> bool {
    let path = self.version_dir(course_id, version).join("model.bin");
    match fs::read(&path) {
      Ok(bytes) => sha256_hex(&bytes) == digest,
      Err(_)    => false,
    }
  }

  /// Verify downloaded bytes against the advertised digest and persist them
  /// with their label map. Writes go to temp names and are renamed into
  /// place only after they complete.
  pub fn install_artifact(
    &self,
    meta: &ModelMetadata,
    bytes: &[u8],
  ) -> Result<PathBuf, CacheError> {
    let actual = sha256_hex(bytes);
    if actual != meta.artifact_digest {
      return Err(CacheError::DigestMismatch {
        expected: meta.artifact_digest.clone(),
        actual,
      });
    }

    let dir = self.version_dir(meta.course_id, meta.version);
    fs::create_dir_all(&dir)?;

    let final_path = dir.join("model.bin");
    write_atomic(&final_path, bytes)?;
    write_atomic(&dir.join("labels.json"), &serde_json::to_vec(&meta.label_map)?)?;

    info!(
      course_id = meta.course_id,
      version = meta.version,
      "artifact installed into cache"
    );
    Ok(final_path)
  }

  // ── Activation ────────────────────────────────────────────────────────────

  /// Make a cached version current. Verification runs through the inference
  /// runtime's load capability; a version that is already active returns
  /// `Ok(false)` without redundant verification work. On load failure the
  /// candidate is deleted and the previous current model stays untouched.
  pub fn activate(
    &mut self,
    loader: &impl ModelLoader,
    course_id: CourseId,
    version: u32,
  ) -> Result<bool, CacheError> {
    if self.active_version(course_id) == Some(version) {
      return Ok(false);
    }

    let dir = self.version_dir(course_id, version);
    if let Err(e) = loader.load(&dir.join("model.bin")) {
      warn!(course_id, version, error = %e, "activation failed, discarding candidate");
      let _ = fs::remove_dir_all(&dir);
      return Err(CacheError::Core(e));
    }

    write_atomic(
      &self.course_dir(course_id).join("current"),
      version.to_string().as_bytes(),
    )?;
    self.active.insert(course_id, version);
    info!(course_id, version, "model activated");
    Ok(true)
  }

  /// Bring the locally active model for `course_id` in line with the
  /// registry. Idempotent and cheap when nothing changed.
  pub async fn ensure_active(
    &mut self,
    client: &RegistryClient,
    loader: &impl ModelLoader,
    course_id: CourseId,
  ) -> Result<EnsureOutcome, CacheError> {
    let Some(meta) = client.model_metadata(course_id).await? else {
      return Ok(EnsureOutcome::NoModelPublished);
    };

    if self.active_version(course_id) == Some(meta.version) {
      return Ok(EnsureOutcome::AlreadyCurrent {
        version:  meta.version,
        model_id: meta.model_id,
      });
    }

    if !self.is_cached(course_id, meta.version, &meta.artifact_digest) {
      let bytes = client.download_artifact(course_id, meta.version).await?;
      self.install_artifact(&meta, &bytes)?;
    }

    self.activate(loader, course_id, meta.version)?;
    Ok(EnsureOutcome::Activated { version: meta.version, model_id: meta.model_id })
  }

  // ── Eviction ──────────────────────────────────────────────────────────────

  /// Delete cached versions beyond the `keep` most recent. The currently
  /// active version is never deleted, however old. Returns the versions
  /// removed.
  pub fn cleanup_old(&self, course_id: CourseId, keep: usize) -> Result<Vec<u32>, CacheError> {
    let course_dir = self.course_dir(course_id);
    if !course_dir.exists() {
      return Ok(vec![]);
    }

    let mut versions: Vec<u32> = fs::read_dir(&course_dir)?
      .filter_map(|e| e.ok())
      .filter_map(|e| {
        e.file_name()
          .to_str()
          .and_then(|n| n.strip_prefix('v'))
          .and_then(|n| n.parse::<u32>().ok())
      })
      .collect();
    versions.sort_unstable_by(|a, b| b.cmp(a));

    let active = self.active_version(course_id);
    let mut removed = Vec::new();
    for version in versions.into_iter().skip(keep) {
      if Some(version) == active {
        continue;
      }
      fs::remove_dir_all(self.version_dir(course_id, version))?;
      info!(course_id, version, "evicted cached model");
      removed.push(version);
    }
    Ok(removed)
  }
}

/// Write to `<path>.tmp` then rename over `path`.
fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
  let tmp = path.with_extension("tmp");
  fs::write(&tmp, bytes)?;
  fs::rename(&tmp, path)?;
  Ok(())
}

// ─── Default loader ──────────────────────────────────────────────────────────

/// Stand-in for the inference runtime's load capability where the real
/// runtime is linked in elsewhere: the artifact must exist, be readable,
/// and be non-empty.
pub struct OpaqueArtifactLoader;

impl ModelLoader for OpaqueArtifactLoader {
  fn load(&self, artifact: &Path) -> rollcall_core::Result<()> {
    let meta = fs::metadata(artifact)
      .map_err(|e| rollcall_core::Error::ModelLoad(e.to_string()))?;
    if meta.len() == 0 {
      return Err(rollcall_core::Error::ModelLoad("artifact is empty".into()));
    }
    Ok(())
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::{AtomicUsize, Ordering};

  use rollcall_core::model::LabelMap;

  fn temp_root() -> PathBuf {
    std::env::temp_dir().join(format!("rollcall-cache-test-{}", Uuid::new_v4()))
  }

  fn meta_for(course_id: CourseId, version: u32, bytes: &[u8]) -> ModelMetadata {
    let mut label_map = LabelMap::new();
    label_map.insert(0, 1001);
    ModelMetadata {
      model_id: Uuid::new_v4(),
      course_id,
      version,
      label_map,
      artifact_digest: sha256_hex(bytes),
      last_enrollment_count: 1,
    }
  }

  /// Counts load calls so tests can assert verification is not repeated.
  #[derive(Default)]
  struct CountingLoader {
    calls: AtomicUsize,
  }

  impl ModelLoader for CountingLoader {
    fn load(&self, _: &Path) -> rollcall_core::Result<()> {
      self.calls.fetch_add(1, Ordering::SeqCst);
      Ok(())
    }
  }

  struct RejectingLoader;

  impl ModelLoader for RejectingLoader {
    fn load(&self, _: &Path) -> rollcall_core::Result<()> {
      Err(rollcall_core::Error::ModelLoad("runtime rejected artifact".into()))
    }
  }

  #[test]
  fn install_rejects_digest_mismatch() {
    let cache = ModelCache::open(temp_root()).unwrap();
    let mut meta = meta_for(5, 1, b"payload");
    meta.artifact_digest = "ff".repeat(32);

    let err = cache.install_artifact(&meta, b"payload").unwrap_err();
    assert!(matches!(err, CacheError::DigestMismatch { .. }));

    // Nothing appeared at the final cache path.
    assert!(!cache.root().join("course_5/v1/model.bin").exists());
  }

  #[test]
  fn install_and_activate_update_the_pointer() {
    let root = temp_root();
    let mut cache = ModelCache::open(&root).unwrap();
    let meta = meta_for(5, 1, b"payload");

    cache.install_artifact(&meta, b"payload").unwrap();
    let loader = CountingLoader::default();
    assert!(cache.activate(&loader, 5, 1).unwrap());
    assert_eq!(cache.active_version(5), Some(1));
    assert!(cache.is_cached(5, 1, &meta.artifact_digest));

    // The pointer survives a reopen (process restart).
    let reopened = ModelCache::open(&root).unwrap();
    assert_eq!(reopened.active_version(5), Some(1));
  }

  #[test]
  fn reactivating_the_same_version_skips_verification() {
    let mut cache = ModelCache::open(temp_root()).unwrap();
    let meta = meta_for(5, 1, b"payload");
    cache.install_artifact(&meta, b"payload").unwrap();

    let loader = CountingLoader::default();
    assert!(cache.activate(&loader, 5, 1).unwrap());
    assert!(!cache.activate(&loader, 5, 1).unwrap());
    assert_eq!(loader.calls.load(Ordering::SeqCst), 1);
  }

  #[test]
  fn failed_activation_discards_candidate_and_keeps_previous() {
    let mut cache = ModelCache::open(temp_root()).unwrap();
    let v1 = meta_for(5, 1, b"good");
    cache.install_artifact(&v1, b"good").unwrap();
    cache.activate(&CountingLoader::default(), 5, 1).unwrap();

    let v2 = meta_for(5, 2, b"bad-but-valid-digest");
    cache.install_artifact(&v2, b"bad-but-valid-digest").unwrap();

    let err = cache.activate(&RejectingLoader, 5, 2).unwrap_err();
    assert!(matches!(err, CacheError::Core(rollcall_core::Error::ModelLoad(_))));

    // Previous model still current; the candidate is gone.
    assert_eq!(cache.active_version(5), Some(1));
    assert!(!cache.root().join("course_5/v2").exists());
    assert!(cache.root().join("course_5/v1/model.bin").exists());
  }

  #[test]
  fn cleanup_keeps_recent_versions_and_the_active_one() {
    let mut cache = ModelCache::open(temp_root()).unwrap();
    for version in 1..=5 {
      let payload = format!("artifact-{version}");
      let meta = meta_for(5, version, payload.as_bytes());
      cache.install_artifact(&meta, payload.as_bytes()).unwrap();
    }
    // v1 is active even though it is the oldest.
    cache.activate(&CountingLoader::default(), 5, 1).unwrap();

    let removed = cache.cleanup_old(5, 2).unwrap();
    assert_eq!(removed, vec![3, 2]);

    assert!(cache.root().join("course_5/v5").exists());
    assert!(cache.root().join("course_5/v4").exists());
    assert!(cache.root().join("course_5/v1").exists());
    assert!(!cache.root().join("course_5/v3").exists());
    assert!(!cache.root().join("course_5/v2").exists());
  }

  #[test]
  fn cleanup_on_unknown_course_is_a_noop() {
    let cache = ModelCache::open(temp_root()).unwrap();
    assert!(cache.cleanup_old(99, 2).unwrap().is_empty());
  }

  #[test]
  fn opaque_loader_rejects_empty_and_missing_artifacts() {
    let root = temp_root();
    fs::create_dir_all(&root).unwrap();
    let empty = root.join("empty.bin");
    fs::write(&empty, b"").unwrap();

    assert!(OpaqueArtifactLoader.load(&empty).is_err());
    assert!(OpaqueArtifactLoader.load(&root.join("missing.bin")).is_err());

    let ok = root.join("ok.bin");
    fs::write(&ok, b"weights").unwrap();
    assert!(OpaqueArtifactLoader.load(&ok).is_ok());
  }
}
