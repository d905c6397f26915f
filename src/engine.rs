//! One reconciliation tick.
//!
//! Scan, then for each eligible container in scan order detect and
//! reconcile, then clean up once.  Every container ends in a
//! [`ReconciliationOutcome`]; the resulting [`TickReport`] is the only input
//! to notifications, so a failure on one container never stops the next.

use std::collections::HashSet;
use std::sync::Arc;

use log::{debug, error, info};
use tokio::sync::Mutex;

use crate::cleanup::{self, CleanupOutcome};
use crate::config::Config;
use crate::detector::{Detection, Detector};
use crate::error::{ContainerError, DetectError, TickError};
use crate::logging::UPDATE_TARGET;
use crate::notifier::Notifier;
use crate::reconciler::{Reconciler, Transition};
use crate::runtime::ContainerRuntime;
use crate::scanner::{self, ScannedContainer};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    NoUpdate,
    Updated(Transition),
    Failed(ContainerError),
}

#[derive(Debug, Clone)]
pub struct ContainerReport {
    pub name: String,
    pub outcome: ReconciliationOutcome,
}

#[derive(Debug, Clone)]
pub struct TickReport {
    /// Eligible containers in scan order.
    pub containers: Vec<ContainerReport>,
    /// Containers the scanner excluded.
    pub ineligible: usize,
    pub cleanup: CleanupOutcome,
}

impl TickReport {
    pub fn updated(&self) -> usize {
        self.count(|o| matches!(o, ReconciliationOutcome::Updated(_)))
    }

    pub fn failed(&self) -> usize {
        self.count(|o| matches!(o, ReconciliationOutcome::Failed(_)))
    }

    pub fn unchanged(&self) -> usize {
        self.count(|o| matches!(o, ReconciliationOutcome::NoUpdate))
    }

    fn count(&self, pred: impl Fn(&ReconciliationOutcome) -> bool) -> usize {
        self.containers.iter().filter(|c| pred(&c.outcome)).count()
    }

    /// Containers for which no tag could be pulled at all.
    pub fn unreachable(&self) -> HashSet<String> {
        self.containers
            .iter()
            .filter(|c| {
                matches!(
                    c.outcome,
                    ReconciliationOutcome::Failed(ContainerError::Detect(
                        DetectError::AllTagsFailed { .. }
                    ))
                )
            })
            .map(|c| c.name.clone())
            .collect()
    }

    /// Notification texts for this tick, in the order events happened.
    /// Containers in `muted` contribute no message.
    pub fn messages(&self, muted: &HashSet<String>) -> Vec<String> {
        let mut messages: Vec<String> = self
            .containers
            .iter()
            .filter(|c| !muted.contains(&c.name))
            .filter_map(|c| match &c.outcome {
                ReconciliationOutcome::NoUpdate => None,
                ReconciliationOutcome::Updated(Transition::Recreated { .. }) => {
                    Some(format!("Successfully updated {}", c.name))
                }
                ReconciliationOutcome::Updated(Transition::Restarted) => {
                    Some(format!("Successfully restarted {}", c.name))
                }
                ReconciliationOutcome::Failed(e) => {
                    Some(format!("Error updating {}: {}", c.name, e))
                }
            })
            .collect();
        if let CleanupOutcome::Failed(e) = &self.cleanup {
            messages.push(format!("Error pruning old images: {e}"));
        }
        messages
    }
}

pub struct Engine<R, N> {
    runtime: R,
    notifier: N,
    config: Arc<Config>,
    /// Containers whose registry was unreachable on the last tick.
    unreachable: Mutex<HashSet<String>>,
}

impl<R: ContainerRuntime, N: Notifier> Engine<R, N> {
    pub fn new(runtime: R, notifier: N, config: Arc<Config>) -> Self {
        Self {
            runtime,
            notifier,
            config,
            unreachable: Mutex::default(),
        }
    }

    #[cfg(test)]
    pub fn runtime(&self) -> &R {
        &self.runtime
    }

    #[cfg(test)]
    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    pub async fn announce_startup(&self) {
        self.notifier
            .notify(&format!(
                "Puller started, checking every {}s",
                self.config.interval
            ))
            .await;
    }

    /// Runs one tick and publishes its outcome.
    pub async fn run_once(&self) -> Result<TickReport, TickError> {
        let result = self.tick().await;
        self.publish(&result).await;
        result
    }

    pub async fn tick(&self) -> Result<TickReport, TickError> {
        let scanned = scanner::scan(&self.runtime, &self.config).await?;
        let credential = self.config.credential();
        let detector = Detector::new(
            &self.runtime,
            credential.as_ref(),
            self.config.registry_tag.as_deref(),
        );
        let reconciler = Reconciler::new(&self.runtime, self.config.stop_timeout());

        let mut containers = Vec::new();
        let mut ineligible = 0;
        for ScannedContainer {
            record,
            eligibility,
        } in scanned
        {
            if eligibility != scanner::Eligibility::Eligible {
                debug!("Skipping {}: {:?}", record.name, eligibility);
                ineligible += 1;
                continue;
            }

            let outcome = match detector.check(&record).await {
                Ok(Detection::NoUpdate) => {
                    debug!("No updates needed for {}", record.name);
                    ReconciliationOutcome::NoUpdate
                }
                Ok(Detection::UpdateAvailable(update)) => {
                    match reconciler.apply(&record, &update).await {
                        Ok(transition) => {
                            info!(target: UPDATE_TARGET, "Successfully updated {}", record.name);
                            if let Transition::Recreated { id } = &transition {
                                debug!("{} now runs as {}", record.name, id);
                            }
                            ReconciliationOutcome::Updated(transition)
                        }
                        Err(e) => {
                            error!("Error recreating container {}: {}", record.name, e);
                            ReconciliationOutcome::Failed(e.into())
                        }
                    }
                }
                Err(e) => {
                    error!("Error checking {}: {}", record.name, e);
                    ReconciliationOutcome::Failed(e.into())
                }
            };
            containers.push(ContainerReport {
                name: record.name,
                outcome,
            });
        }

        let updated = containers
            .iter()
            .filter(|c| matches!(c.outcome, ReconciliationOutcome::Updated(_)))
            .count();
        let cleanup = cleanup::run(&self.runtime, self.config.cleanup, updated).await;

        Ok(TickReport {
            containers,
            ineligible,
            cleanup,
        })
    }

    /// Logs the tick summary and sends its notifications.
    pub async fn publish(&self, result: &Result<TickReport, TickError>) {
        let report = match result {
            Ok(report) => report,
            Err(e) => {
                error!("Error in check cycle: {}", e);
                self.notifier
                    .notify(&format!("Error in check cycle: {e}"))
                    .await;
                return;
            }
        };

        let (updated, failed, unchanged) = (report.updated(), report.failed(), report.unchanged());
        if updated > 0 || failed > 0 {
            info!(
                "Check completed: {} containers updated, {} failed, {} unchanged",
                updated, failed, unchanged
            );
        } else {
            debug!(
                "Check completed: no updates needed for {} containers ({} ineligible)",
                unchanged, report.ineligible
            );
        }

        let muted = self.note_unreachable(report).await;
        for message in report.messages(&muted) {
            self.notifier.notify(&message).await;
        }
    }

    /// Records this tick's unreachable containers and returns those that
    /// were already unreachable, so an outage is notified once.
    async fn note_unreachable(&self, report: &TickReport) -> HashSet<String> {
        let current = report.unreachable();
        let mut previous = self.unreachable.lock().await;
        let repeated = current.intersection(&previous).cloned().collect();
        *previous = current;
        repeated
    }
}
