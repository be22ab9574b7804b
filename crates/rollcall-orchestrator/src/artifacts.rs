//! On-disk artifact store for trained models.
//!
//! Artifacts live under `<root>/course_<id>/v<version>/` next to their label
//! map. Writes go to a temp name in the same directory and are renamed into
//! place, so a crash mid-write never leaves a half-written file at a final
//! path.

use std::path::{Path, PathBuf};

use rollcall_core::model::{CourseId, LabelMap};
use sha2::{Digest, Sha256};

/// SHA-256 hex digest of a byte slice.
pub fn sha256_hex(bytes: &[u8]) -> String {
  hex::encode(Sha256::digest(bytes))
}

/// What [`ArtifactStore::store`] hands back for the registry commit.
#[derive(Debug, Clone)]
pub struct StoredArtifact {
  /// Path relative to the store root, as recorded in the registry.
  pub rel_path: String,
  pub digest:   String,
}

#[derive(Clone)]
pub struct ArtifactStore {
  root: PathBuf,
}

impl ArtifactStore {
  pub fn new(root: impl Into<PathBuf>) -> Self {
    Self { root: root.into() }
  }

  pub fn root(&self) -> &Path {
    &self.root
  }

  /// Persist a trained artifact and its label map for `(course_id, version)`.
  pub async fn store(
    &self,
    course_id: CourseId,
    version: u32,
    artifact: &[u8],
    label_map: &LabelMap,
  ) -> std::io::Result<StoredArtifact> {
    let rel_dir  = format!("course_{course_id}/v{version}");
    let rel_path = format!("{rel_dir}/model.bin");
    let dir      = self.root.join(&rel_dir);
    tokio::fs::create_dir_all(&dir).await?;

    write_atomic(&dir.join("model.bin"), artifact).await?;

    let labels_json = serde_json::to_vec(label_map)
      .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    write_atomic(&dir.join("labels.json"), &labels_json).await?;

    Ok(StoredArtifact { rel_path, digest: sha256_hex(artifact) })
  }
}

/// Write to `<path>.tmp` then rename over `path`.
async fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
  let tmp = path.with_extension("tmp");
  tokio::fs::write(&tmp, bytes).await?;
  tokio::fs::rename(&tmp, path).await?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use uuid::Uuid;

  fn temp_store() -> ArtifactStore {
    let root =
      std::env::temp_dir().join(format!("rollcall-artifacts-test-{}", Uuid::new_v4()));
    ArtifactStore::new(root)
  }

  #[tokio::test]
  async fn store_writes_artifact_and_labels() {
    let store = temp_store();
    let mut label_map = LabelMap::new();
    label_map.insert(0, 1001);

    let stored = store.store(5, 1, b"weights", &label_map).await.unwrap();
    assert_eq!(stored.rel_path, "course_5/v1/model.bin");
    assert_eq!(stored.digest, sha256_hex(b"weights"));

    let on_disk = std::fs::read(store.root().join(&stored.rel_path)).unwrap();
    assert_eq!(on_disk, b"weights");

    let labels: LabelMap =
      serde_json::from_slice(&std::fs::read(store.root().join("course_5/v1/labels.json")).unwrap())
        .unwrap();
    assert_eq!(labels, label_map);

    // No temp files left behind.
    assert!(!store.root().join("course_5/v1/model.tmp").exists());
  }

  #[tokio::test]
  async fn versions_get_distinct_directories() {
    let store = temp_store();
    let label_map = LabelMap::new();

    let v1 = store.store(5, 1, b"one", &label_map).await.unwrap();
    let v2 = store.store(5, 2, b"two", &label_map).await.unwrap();
    assert_ne!(v1.rel_path, v2.rel_path);
    assert_ne!(v1.digest, v2.digest);
  }
}
