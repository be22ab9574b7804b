//! The training engine: staleness detection, per-course mutual exclusion,
//! and the atomic commit + assignment fan-out that follows a successful
//! training run.

use std::{
  collections::HashMap,
  sync::{Arc, Mutex as StdMutex},
};

use thiserror::Error;
use tokio::sync::{Mutex, OwnedMutexGuard, Semaphore};
use tracing::{debug, info, warn};

use rollcall_core::{
  capability::{ClassifierTrainer, FeatureExtractor, TrainingSet},
  model::{CourseId, FaceModel, NewModel},
  registry::ModelRegistry,
};

use crate::{
  artifacts::ArtifactStore,
  roster::Roster,
};

// ─── Errors ──────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum TrainError {
  #[error(transparent)]
  Core(#[from] rollcall_core::Error),

  #[error("registry error: {0}")]
  Registry(#[source] Box<dyn std::error::Error + Send + Sync>),

  #[error("artifact store error: {0}")]
  Artifact(#[from] std::io::Error),
}

fn registry_err<E>(e: E) -> TrainError
where
  E: std::error::Error + Send + Sync + 'static,
{
  TrainError::Registry(Box::new(e))
}

// ─── Per-course locks ────────────────────────────────────────────────────────

/// Keyed mutex map guaranteeing at most one training run per course at a
/// time within this process.
#[derive(Clone, Default)]
pub struct CourseLocks {
  inner: Arc<StdMutex<HashMap<CourseId, Arc<Mutex<()>>>>>,
}

impl CourseLocks {
  pub fn new() -> Self {
    Self::default()
  }

  /// Wait for and hold the lock for `course_id`.
  pub async fn acquire(&self, course_id: CourseId) -> OwnedMutexGuard<()> {
    let lock = {
      let mut map = self.inner.lock().expect("course lock map poisoned");
      Arc::clone(map.entry(course_id).or_default())
    };
    lock.lock_owned().await
  }
}

// ─── Outcome ─────────────────────────────────────────────────────────────────

#[derive(Debug)]
pub enum TrainOutcome {
  /// Enrollment unchanged since the version that is already current.
  Skipped { version: u32 },
  /// A new version was committed and fanned out.
  Trained { model: FaceModel, devices_assigned: usize },
}

// ─── Orchestrator ────────────────────────────────────────────────────────────

/// Owns everything one retrain decision needs: the registry, the roster,
/// the ML capabilities, the artifact store, and the per-course locks.
pub struct Orchestrator<R, S, X, T> {
  registry:  Arc<R>,
  roster:    Arc<S>,
  extractor: X,
  trainer:   T,
  artifacts: ArtifactStore,
  locks:     CourseLocks,
  /// Bounds concurrent training runs across the sweep.
  limit:     Arc<Semaphore>,
}

impl<R, S, X, T> Orchestrator<R, S, X, T>
where
  R: ModelRegistry + 'static,
  R::Error: std::error::Error + Send + Sync + 'static,
  S: Roster + 'static,
  X: FeatureExtractor + 'static,
  T: ClassifierTrainer + 'static,
{
  pub fn new(
    registry: Arc<R>,
    roster: Arc<S>,
    extractor: X,
    trainer: T,
    artifacts: ArtifactStore,
    max_parallel: usize,
  ) -> Self {
    Self {
      registry,
      roster,
      extractor,
      trainer,
      artifacts,
      locks: CourseLocks::new(),
      limit: Arc::new(Semaphore::new(max_parallel.max(1))),
    }
  }

  /// Retrain `course_id` if (and only if) its enrollment changed since the
  /// current model was trained.
  ///
  /// Failure anywhere before the registry commit leaves the previous model
  /// and all prior assignments untouched; the next sweep is the retry path.
  pub async fn maybe_train(&self, course_id: CourseId) -> Result<TrainOutcome, TrainError> {
    let enrollment = self.roster.enrollment_count(course_id).await?;

    // Cheap pre-lock check: most sweeps skip most courses.
    if let Some(current) = self
      .registry
      .get_current_model(course_id)
      .await
      .map_err(registry_err)?
      && current.last_enrollment_count == enrollment
    {
      debug!(course_id, version = current.version, "enrollment unchanged, skipping");
      return Ok(TrainOutcome::Skipped { version: current.version });
    }

    let _guard = self.locks.acquire(course_id).await;

    // Re-check under the lock: a concurrent run may have committed while we
    // waited, and its version already reflects this enrollment count.
    let current = self
      .registry
      .get_current_model(course_id)
      .await
      .map_err(registry_err)?;
    if let Some(model) = &current
      && model.last_enrollment_count == enrollment
    {
      return Ok(TrainOutcome::Skipped { version: model.version });
    }
    let expected = current.as_ref().map(|m| m.version);

    let set = self.gather_features(course_id).await?;
    if set.is_empty() {
      return Err(rollcall_core::Error::NoTrainingData(course_id).into());
    }

    info!(
      course_id,
      samples = set.len(),
      classes = set.class_count(),
      "training classifier"
    );
    let artifact = self.trainer.train(set.features(), set.labels()).await?;

    let next_version = expected.unwrap_or(0) + 1;
    let label_map = set.into_label_map();
    let stored = self
      .artifacts
      .store(course_id, next_version, &artifact, &label_map)
      .await?;

    let model = self
      .registry
      .upsert_model(
        course_id,
        NewModel {
          artifact_path:    stored.rel_path,
          label_map,
          artifact_digest:  stored.digest,
          enrollment_count: enrollment,
        },
        expected,
      )
      .await
      .map_err(registry_err)?;

    let devices_assigned = self.fan_out(&model).await?;
    info!(course_id, version = model.version, devices_assigned, "model committed");
    Ok(TrainOutcome::Trained { model, devices_assigned })
  }

  /// Fetch training images and extract features for every enrolled member.
  /// Images without a detectable face are dropped, not fatal.
  async fn gather_features(&self, course_id: CourseId) -> Result<TrainingSet, TrainError> {
    let images = self.roster.training_images(course_id).await?;

    let mut set = TrainingSet::new();
    for image in &images {
      match self.extractor.extract(&image.bytes).await? {
        Some(feature) => set.push(image.member_id, feature),
        None => debug!(course_id, member = image.member_id, "no face found in image"),
      }
    }
    Ok(set)
  }

  /// Create a pending assignment for every device whose room is scheduled
  /// for this model's course.
  async fn fan_out(&self, model: &FaceModel) -> Result<usize, TrainError> {
    let rooms = self
      .registry
      .rooms_for_course(model.course_id)
      .await
      .map_err(registry_err)?;

    let mut assigned = 0;
    for room in &rooms {
      let devices = self
        .registry
        .devices_in_room(room)
        .await
        .map_err(registry_err)?;
      for device in devices {
        self
          .registry
          .assign_model(device.device_id, model.model_id)
          .await
          .map_err(registry_err)?;
        assigned += 1;
      }
    }
    Ok(assigned)
  }

  /// Refresh the schedule mirror, then run `maybe_train` for every known
  /// course through the bounded pool. Per-course failures are logged and
  /// contained; they never abort the rest of the sweep.
  pub async fn sweep(self: &Arc<Self>) {
    match self.roster.schedule().await {
      Ok(entries) => {
        if let Err(e) = self.registry.replace_schedule(entries).await {
          warn!(error = %e, "schedule mirror refresh failed");
        }
      }
      Err(e) => {
        warn!(error = %e, "schedule feed unavailable, sweeping with last known mirror");
      }
    }

    let courses = match self.registry.list_courses().await {
      Ok(courses) => courses,
      Err(e) => {
        warn!(error = %e, "cannot list courses, skipping sweep");
        return;
      }
    };

    info!(courses = courses.len(), "starting retrain sweep");
    let mut handles = Vec::with_capacity(courses.len());
    for course_id in courses {
      let orch = Arc::clone(self);
      let permit = Arc::clone(&self.limit)
        .acquire_owned()
        .await
        .expect("training semaphore closed");
      handles.push(tokio::spawn(async move {
        let _permit = permit;
        match orch.maybe_train(course_id).await {
          Ok(TrainOutcome::Trained { model, devices_assigned }) => {
            info!(course_id, version = model.version, devices_assigned, "retrained");
          }
          Ok(TrainOutcome::Skipped { version }) => {
            debug!(course_id, version, "skipped");
          }
          Err(TrainError::Core(rollcall_core::Error::NoTrainingData(_))) => {
            info!(course_id, "no training data, skipping");
          }
          Err(e) => {
            warn!(course_id, error = %e, "training run failed");
          }
        }
      }));
    }
    for handle in handles {
      let _ = handle.await;
    }
    info!("retrain sweep finished");
  }
}

// ─── Tests ───────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
  use super::*;
  use std::collections::HashMap;
  use std::sync::Mutex as StdMutex;

  use chrono::NaiveTime;
  use rollcall_core::{
    Error, Result as CoreResult,
    schedule::{DayOfWeek, ScheduleEntry},
  };
  use rollcall_registry_sqlite::SqliteRegistry;
  use uuid::Uuid;

  use crate::roster::{Roster, TrainingImage};

  // ── Stubs ─────────────────────────────────────────────────────────────────

  #[derive(Default)]
  struct StubRoster {
    enrollment: StdMutex<HashMap<CourseId, u32>>,
    images:     StdMutex<HashMap<CourseId, Vec<TrainingImage>>>,
    schedule:   Vec<ScheduleEntry>,
  }

  impl StubRoster {
    fn set_enrollment(&self, course_id: CourseId, count: u32) {
      self.enrollment.lock().unwrap().insert(course_id, count);
    }

    fn set_images(&self, course_id: CourseId, images: Vec<TrainingImage>) {
      self.images.lock().unwrap().insert(course_id, images);
    }
  }

  impl Roster for StubRoster {
    async fn enrollment_count(&self, course_id: CourseId) -> CoreResult<u32> {
      Ok(*self.enrollment.lock().unwrap().get(&course_id).unwrap_or(&0))
    }

    async fn training_images(&self, course_id: CourseId) -> CoreResult<Vec<TrainingImage>> {
      Ok(
        self
          .images
          .lock()
          .unwrap()
          .get(&course_id)
          .cloned()
          .unwrap_or_default(),
      )
    }

    async fn schedule(&self) -> CoreResult<Vec<ScheduleEntry>> {
      Ok(self.schedule.clone())
    }

    async fn service_config(&self) -> CoreResult<HashMap<String, String>> {
      Ok(HashMap::new())
    }
  }

  /// Treats the first image byte as the whole feature; empty images have no
  /// face.
  struct StubExtractor;

  impl FeatureExtractor for StubExtractor {
    async fn extract(&self, image: &[u8]) -> CoreResult<Option<Vec<f32>>> {
      Ok(image.first().map(|b| vec![*b as f32]))
    }
  }

  struct StubTrainer;

  impl ClassifierTrainer for StubTrainer {
    async fn train(&self, features: &[Vec<f32>], labels: &[u32]) -> CoreResult<Vec<u8>> {
      Ok(format!("trained:{}:{}", features.len(), labels.len()).into_bytes())
    }
  }

  struct FailingTrainer;

  impl ClassifierTrainer for FailingTrainer {
    async fn train(&self, _: &[Vec<f32>], _: &[u32]) -> CoreResult<Vec<u8>> {
      Err(Error::Training("gpu on fire".into()))
    }
  }

  // ── Fixtures ──────────────────────────────────────────────────────────────

  fn entry(id: i64, course: CourseId, room: &str) -> ScheduleEntry {
    ScheduleEntry {
      entry_id:    id,
      course_id:   course,
      room:        room.into(),
      day_of_week: DayOfWeek::Monday,
      start_time:  NaiveTime::from_hms_opt(9, 0, 0).unwrap(),
      end_time:    NaiveTime::from_hms_opt(10, 30, 0).unwrap(),
    }
  }

  fn images(members: &[(i64, u8)]) -> Vec<TrainingImage> {
    members
      .iter()
      .map(|(member_id, byte)| TrainingImage {
        member_id: *member_id,
        bytes:     vec![*byte],
      })
      .collect()
  }

  fn artifact_store() -> ArtifactStore {
    ArtifactStore::new(
      std::env::temp_dir().join(format!("rollcall-train-test-{}", Uuid::new_v4())),
    )
  }

  async fn orchestrator<T: ClassifierTrainer + 'static>(
    roster: StubRoster,
    trainer: T,
  ) -> Arc<Orchestrator<SqliteRegistry, StubRoster, StubExtractor, T>> {
    let registry = Arc::new(SqliteRegistry::open_in_memory().await.unwrap());
    registry.replace_schedule(roster.schedule.clone()).await.unwrap();
    Arc::new(Orchestrator::new(
      registry,
      Arc::new(roster),
      StubExtractor,
      trainer,
      artifact_store(),
      2,
    ))
  }

  // ── Tests ─────────────────────────────────────────────────────────────────

  #[tokio::test]
  async fn first_training_commits_version_one_with_assignments() {
    let roster = StubRoster {
      schedule: vec![entry(1, 5, "B-204")],
      ..Default::default()
    };
    roster.set_enrollment(5, 10);
    roster.set_images(5, images(&[(1001, 10), (1002, 20)]));

    let orch = orchestrator(roster, StubTrainer).await;
    let dev_a = orch.registry.register_device("pi-a", "B-204").await.unwrap();
    let dev_b = orch.registry.register_device("pi-b", "B-204").await.unwrap();
    orch.registry.register_device("pi-c", "C-101").await.unwrap();

    let outcome = orch.maybe_train(5).await.unwrap();
    let TrainOutcome::Trained { model, devices_assigned } = outcome else {
      panic!("expected a training run");
    };
    assert_eq!(model.version, 1);
    assert_eq!(model.last_enrollment_count, 10);
    assert_eq!(model.label_map.len(), 2);
    assert_eq!(devices_assigned, 2);

    // Both devices in the scheduled room got a pending assignment; the
    // device in the other room did not.
    for dev in [&dev_a, &dev_b] {
      let pending = orch.registry.list_pending_assignments(dev.device_id).await.unwrap();
      assert_eq!(pending.len(), 1);
      assert_eq!(pending[0].model_id, model.model_id);
    }

    // The artifact landed on disk and matches the committed digest.
    let bytes =
      std::fs::read(orch.artifacts.root().join(&model.artifact_path)).unwrap();
    assert_eq!(crate::artifacts::sha256_hex(&bytes), model.artifact_digest);
  }

  #[tokio::test]
  async fn unchanged_enrollment_skips_without_new_version() {
    let roster = StubRoster {
      schedule: vec![entry(1, 5, "B-204")],
      ..Default::default()
    };
    roster.set_enrollment(5, 10);
    roster.set_images(5, images(&[(1001, 10)]));

    let orch = orchestrator(roster, StubTrainer).await;
    let device = orch.registry.register_device("pi-a", "B-204").await.unwrap();

    assert!(matches!(
      orch.maybe_train(5).await.unwrap(),
      TrainOutcome::Trained { .. }
    ));
    assert!(matches!(
      orch.maybe_train(5).await.unwrap(),
      TrainOutcome::Skipped { version: 1 }
    ));

    let current = orch.registry.get_current_model(5).await.unwrap().unwrap();
    assert_eq!(current.version, 1);
    let pending = orch.registry.list_pending_assignments(device.device_id).await.unwrap();
    assert_eq!(pending.len(), 1);
  }

  #[tokio::test]
  async fn enrollment_change_commits_the_next_version() {
    let roster = StubRoster {
      schedule: vec![entry(1, 5, "B-204")],
      ..Default::default()
    };
    roster.set_enrollment(5, 10);
    roster.set_images(5, images(&[(1001, 10)]));

    let orch = orchestrator(roster, StubTrainer).await;
    orch.maybe_train(5).await.unwrap();

    orch.roster.set_enrollment(5, 11);
    orch.roster.set_images(5, images(&[(1001, 10), (1003, 30)]));

    let TrainOutcome::Trained { model, .. } = orch.maybe_train(5).await.unwrap() else {
      panic!("expected a retrain");
    };
    assert_eq!(model.version, 2);
    assert_eq!(model.last_enrollment_count, 11);
  }

  #[tokio::test]
  async fn empty_feature_set_aborts_without_commit() {
    let roster = StubRoster {
      schedule: vec![entry(1, 5, "B-204")],
      ..Default::default()
    };
    roster.set_enrollment(5, 10);
    // One image with no detectable face.
    roster.set_images(5, vec![TrainingImage { member_id: 1001, bytes: vec![] }]);

    let orch = orchestrator(roster, StubTrainer).await;
    let err = orch.maybe_train(5).await.unwrap_err();
    assert!(matches!(err, TrainError::Core(Error::NoTrainingData(5))));
    assert!(orch.registry.get_current_model(5).await.unwrap().is_none());
  }

  #[tokio::test]
  async fn trainer_failure_leaves_previous_model_current() {
    let roster = StubRoster {
      schedule: vec![entry(1, 5, "B-204")],
      ..Default::default()
    };
    roster.set_enrollment(5, 10);
    roster.set_images(5, images(&[(1001, 10)]));

    let orch = orchestrator(roster, StubTrainer).await;
    let device = orch.registry.register_device("pi-a", "B-204").await.unwrap();
    orch.maybe_train(5).await.unwrap();
    let before = orch.registry.list_pending_assignments(device.device_id).await.unwrap();

    // Swap in a failing trainer by building a second orchestrator over the
    // same registry.
    let failing = Arc::new(Orchestrator::new(
      Arc::clone(&orch.registry),
      Arc::clone(&orch.roster),
      StubExtractor,
      FailingTrainer,
      artifact_store(),
      2,
    ));
    failing.roster.set_enrollment(5, 11);

    let err = failing.maybe_train(5).await.unwrap_err();
    assert!(matches!(err, TrainError::Core(Error::Training(_))));

    let current = failing.registry.get_current_model(5).await.unwrap().unwrap();
    assert_eq!(current.version, 1);
    assert_eq!(current.last_enrollment_count, 10);
    let after = failing.registry.list_pending_assignments(device.device_id).await.unwrap();
    assert_eq!(before.len(), after.len());
  }

  #[tokio::test]
  async fn concurrent_runs_for_one_course_train_once() {
    let roster = StubRoster {
      schedule: vec![entry(1, 5, "B-204")],
      ..Default::default()
    };
    roster.set_enrollment(5, 10);
    roster.set_images(5, images(&[(1001, 10)]));

    let orch = orchestrator(roster, StubTrainer).await;

    let (a, b) = tokio::join!(orch.maybe_train(5), orch.maybe_train(5));
    let outcomes = [a.unwrap(), b.unwrap()];

    let trained = outcomes
      .iter()
      .filter(|o| matches!(o, TrainOutcome::Trained { .. }))
      .count();
    let skipped = outcomes
      .iter()
      .filter(|o| matches!(o, TrainOutcome::Skipped { version: 1 }))
      .count();
    assert_eq!((trained, skipped), (1, 1));

    let current = orch.registry.get_current_model(5).await.unwrap().unwrap();
    assert_eq!(current.version, 1);
  }

  #[tokio::test]
  async fn sweep_covers_every_scheduled_course() {
    let roster = StubRoster {
      schedule: vec![entry(1, 5, "B-204"), entry(2, 6, "C-101")],
      ..Default::default()
    };
    roster.set_enrollment(5, 10);
    roster.set_enrollment(6, 3);
    roster.set_images(5, images(&[(1001, 10)]));
    roster.set_images(6, images(&[(2001, 40)]));

    let orch = orchestrator(roster, StubTrainer).await;
    orch.sweep().await;

    assert_eq!(
      orch.registry.get_current_model(5).await.unwrap().unwrap().version,
      1
    );
    assert_eq!(
      orch.registry.get_current_model(6).await.unwrap().unwrap().version,
      1
    );
  }
}
