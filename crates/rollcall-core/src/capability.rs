//! Opaque capability traits — the seams to the ML stack.
//!
//! Feature extraction and classifier training are external, swappable
//! services as far as this system is concerned; the inference runtime's
//! load step doubles as artifact verification on the device. None of the
//! algorithms are defined here.

use std::future::Future;
use std::path::Path;

use crate::{
  Result,
  model::{LabelMap, MemberId},
};

/// Turns a raw training image into a feature vector, or `None` when no
/// usable face is found in the image.
pub trait FeatureExtractor: Send + Sync {
  fn extract(
    &self,
    image: &[u8],
  ) -> impl Future<Output = Result<Option<Vec<f32>>>> + Send;
}

/// Trains a classifier over extracted features and returns the opaque
/// artifact bytes.
pub trait ClassifierTrainer: Send + Sync {
  fn train(
    &self,
    features: &[Vec<f32>],
    labels: &[u32],
  ) -> impl Future<Output = Result<Vec<u8>>> + Send;
}

/// The inference runtime's load capability, used on-device as the
/// verification gate before a downloaded artifact becomes current.
pub trait ModelLoader: Send + Sync {
  fn load(&self, artifact: &Path) -> Result<()>;
}

// ─── Training set assembly ───────────────────────────────────────────────────

/// Accumulates (member, feature) pairs and assigns contiguous label indexes
/// in first-seen order, producing the label map committed with the model.
#[derive(Debug, Default)]
pub struct TrainingSet {
  features:  Vec<Vec<f32>>,
  labels:    Vec<u32>,
  label_map: LabelMap,
}

impl TrainingSet {
  pub fn new() -> Self {
    Self::default()
  }

  /// Add one extracted feature vector for `member`.
  pub fn push(&mut self, member: MemberId, feature: Vec<f32>) {
    let label = match self.label_map.iter().find(|(_, m)| **m == member) {
      Some((label, _)) => *label,
      None => {
        let label = self.label_map.len() as u32;
        self.label_map.insert(label, member);
        label
      }
    };
    self.features.push(feature);
    self.labels.push(label);
  }

  pub fn is_empty(&self) -> bool {
    self.features.is_empty()
  }

  pub fn len(&self) -> usize {
    self.features.len()
  }

  /// Number of distinct members represented.
  pub fn class_count(&self) -> usize {
    self.label_map.len()
  }

  pub fn features(&self) -> &[Vec<f32>] {
    &self.features
  }

  pub fn labels(&self) -> &[u32] {
    &self.labels
  }

  pub fn into_label_map(self) -> LabelMap {
    self.label_map
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn labels_are_contiguous_in_first_seen_order() {
    let mut set = TrainingSet::new();
    set.push(900, vec![0.1]);
    set.push(901, vec![0.2]);
    set.push(900, vec![0.3]);
    set.push(902, vec![0.4]);

    assert_eq!(set.labels(), &[0, 1, 0, 2]);
    assert_eq!(set.len(), 4);
    assert_eq!(set.class_count(), 3);

    let map = set.into_label_map();
    assert_eq!(map.get(&0), Some(&900));
    assert_eq!(map.get(&1), Some(&901));
    assert_eq!(map.get(&2), Some(&902));
  }

  #[test]
  fn empty_set_reports_empty() {
    let set = TrainingSet::new();
    assert!(set.is_empty());
    assert_eq!(set.class_count(), 0);
  }
}
