//! Worker lifecycle states and the reports returned by each phase.

use chrono::{DateTime, Utc};
use color_eyre::{eyre::eyre, Result};

/// Lifecycle of one shell version.
///
/// `Installing -> Installed -> Activating -> Activated`, and `Redundant`
/// once a newer version activates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
  Installing,
  /// Installed and waiting to activate
  Installed,
  Activating,
  Activated,
  Redundant,
}

impl WorkerState {
  pub fn as_str(&self) -> &'static str {
    match self {
      Self::Installing => "installing",
      Self::Installed => "installed",
      Self::Activating => "activating",
      Self::Activated => "activated",
      Self::Redundant => "redundant",
    }
  }

  pub fn parse(s: &str) -> Result<Self> {
    match s {
      "installing" => Ok(Self::Installing),
      "installed" => Ok(Self::Installed),
      "activating" => Ok(Self::Activating),
      "activated" => Ok(Self::Activated),
      "redundant" => Ok(Self::Redundant),
      other => Err(eyre!("Unknown worker state '{}'", other)),
    }
  }

  /// Whether a worker in this state may start activating.
  pub fn can_activate(&self) -> bool {
    matches!(self, Self::Installed | Self::Activating | Self::Activated)
  }
}

impl std::fmt::Display for WorkerState {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    f.pad(self.as_str())
  }
}

/// Persisted lifecycle record for a cache generation.
#[derive(Debug, Clone)]
pub struct Registration {
  pub generation: String,
  pub state: WorkerState,
  pub updated_at: DateTime<Utc>,
}

/// Outcome of a successful install.
#[derive(Debug, Clone)]
pub struct InstallReport {
  pub generation: String,
  /// Cached URLs, in manifest order
  pub cached: Vec<String>,
  pub bytes: u64,
}

/// Outcome of a successful activation.
#[derive(Debug, Clone)]
pub struct ActivationReport {
  pub generation: String,
  /// Stale generations that were purged
  pub deleted: Vec<String>,
  /// Open clients now controlled by this generation
  pub claimed: usize,
}
