//! Error taxonomy for the reconciliation engine.
//!
//! Errors are layered the same way the engine is: the runtime adapter
//! produces [`RuntimeError`], the detector and reconciler wrap it with the
//! per-container context they own, and [`TickError`] is the only error that
//! abandons a whole tick.  Nothing in here is fatal to the process; fatal
//! startup failures are reported through `anyhow` in `main`.

use std::fmt;

use thiserror::Error;

use crate::types::Platform;

/// Failure reported by a [`ContainerRuntime`](crate::runtime::ContainerRuntime).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RuntimeError {
    /// The runtime daemon could not be reached at all.
    #[error("runtime connection failed: {0}")]
    Connection(String),

    /// The referenced container or image does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// The registry has no manifest for the requested platform.
    #[error("no matching manifest for {platform}: {message}")]
    ManifestMismatch { platform: Platform, message: String },

    /// Any other API failure.
    #[error("runtime api error: {0}")]
    Api(String),
}

/// Failure while checking a single container for a newer image.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DetectError {
    #[error("inspect current image {image_id}: {source}")]
    CurrentImage {
        image_id: String,
        #[source]
        source: RuntimeError,
    },

    #[error("every tag failed for {repository} (last: {last})")]
    AllTagsFailed { repository: String, last: RuntimeError },
}

/// The reconciliation step that was running when a failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileStep {
    Snapshot,
    Stopping,
    Removing,
    Creating,
    Starting,
    Restarting,
}

impl fmt::Display for ReconcileStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let step = match self {
            Self::Snapshot => "inspect",
            Self::Stopping => "stop",
            Self::Removing => "remove",
            Self::Creating => "create",
            Self::Starting => "start",
            Self::Restarting => "restart",
        };
        f.write_str(step)
    }
}

/// A reconciliation aborted at `step`; the container is left in whatever
/// state that step produced.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{step} failed: {source}")]
pub struct ReconcileError {
    pub step: ReconcileStep,
    #[source]
    pub source: RuntimeError,
}

impl ReconcileError {
    pub fn new(step: ReconcileStep, source: RuntimeError) -> Self {
        Self { step, source }
    }
}

/// Per-container failure, surfaced in the tick report.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ContainerError {
    #[error(transparent)]
    Detect(#[from] DetectError),

    #[error(transparent)]
    Reconcile(#[from] ReconcileError),
}

/// Failure that abandons the current tick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TickError {
    #[error("error listing containers: {0}")]
    Inventory(#[source] RuntimeError),
}
