//! Cleanup manager: one prune per tick, only after a successful update.

use log::{debug, info, warn};

use crate::error::RuntimeError;
use crate::runtime::ContainerRuntime;
use crate::types::PruneSummary;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CleanupOutcome {
    /// Cleanup disabled, or nothing was updated this tick.
    Skipped,
    Pruned(PruneSummary),
    /// Prune failed; never affects updates already committed.
    Failed(RuntimeError),
}

pub async fn run<R: ContainerRuntime + ?Sized>(
    runtime: &R,
    enabled: bool,
    updated: usize,
) -> CleanupOutcome {
    if !enabled || updated == 0 {
        return CleanupOutcome::Skipped;
    }

    debug!("Cleaning up old images");
    match runtime.prune_images().await {
        Ok(summary) => {
            if summary.images_deleted > 0 {
                info!(
                    "Cleaned up {} images, reclaimed {} bytes",
                    summary.images_deleted, summary.space_reclaimed
                );
            }
            CleanupOutcome::Pruned(summary)
        }
        Err(e) => {
            warn!("Error pruning old images: {}", e);
            CleanupOutcome::Failed(e)
        }
    }
}
