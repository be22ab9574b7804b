//! Device — an edge unit bound to a physical room.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// An edge device registered with the registry.
///
/// The per-course last-activated versions live in their own registry table
/// and are queried separately; a device row holds identity and placement
/// only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Device {
  pub device_id: Uuid,
  /// Stable name the device registers under (e.g. a hostname or MAC).
  pub name:      String,
  /// The room whose schedule drives this device's active model.
  pub room:      String,
  /// Stamped on every download acknowledgement.
  pub last_seen: Option<DateTime<Utc>>,
}
