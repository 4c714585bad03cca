//! Reconciliation loop
//!
//! Each cycle lists the replica set pods, probes every member for its role,
//! and writes the role label on each pod. Members are handled one at a time
//! and independently: a failed probe or patch is logged and the cycle moves
//! on to the next member. Nothing is carried from one cycle to the next.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::time::Instant;
use tracing::{debug, error, info, instrument, warn};

use super::discovery::MemberDiscoverer;
use super::labels::{LabelPatch, LabelReconciler};
use super::member::ClusterMember;
use super::probe::{Role, RoleObservation, RoleProber};
use super::scheduler::Ticker;
use crate::config::LabelerConfig;
use crate::error::Result;

/// Receiving half of the shutdown signal; `true` once shutdown was requested
pub type ShutdownSignal = watch::Receiver<bool>;

/// What one cycle did
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleReport {
    /// Listing the pods failed; nothing else happened this cycle
    pub discovery_failed: bool,
    pub discovered: usize,
    pub leaders: usize,
    pub followers: usize,
    pub unknown: usize,
    /// Labels written to pods
    pub patched: usize,
    pub patch_failures: usize,
    /// Members left untouched because their role is unknown
    pub skipped: usize,
    /// Labels that dry-run mode would have written
    pub planned: usize,
    /// Shutdown was requested before every member was handled
    pub interrupted: bool,
}

impl CycleReport {
    pub fn outcome(&self) -> &'static str {
        if self.discovery_failed {
            "discovery_failed"
        } else if self.interrupted {
            "interrupted"
        } else if self.patch_failures > 0 {
            "partial"
        } else {
            "ok"
        }
    }

    fn record(&mut self, role: Role) {
        match role {
            Role::Leader => self.leaders += 1,
            Role::Follower => self.followers += 1,
            Role::Unknown => self.unknown += 1,
        }
    }
}

/// The reconciliation loop and the capabilities it drives
pub struct Labeler {
    config: LabelerConfig,
    discoverer: Arc<dyn MemberDiscoverer>,
    prober: Arc<dyn RoleProber>,
    reconciler: Arc<dyn LabelReconciler>,
}

impl Labeler {
    pub fn new(
        config: LabelerConfig,
        discoverer: Arc<dyn MemberDiscoverer>,
        prober: Arc<dyn RoleProber>,
        reconciler: Arc<dyn LabelReconciler>,
    ) -> Self {
        Self {
            config,
            discoverer,
            prober,
            reconciler,
        }
    }

    /// Run cycles until shutdown is requested.
    ///
    /// Returns only on shutdown, or when every sender of the shutdown signal
    /// is gone. Per-cycle failures never end the loop.
    pub async fn run(&self, ticker: &mut dyn Ticker, mut shutdown: ShutdownSignal) -> Result<()> {
        info!(
            "Starting mongo replica labeler (namespace: {}, selector: {}, dry run: {})",
            self.config.namespace, self.config.pod_selector, self.config.dry_run
        );

        loop {
            if *shutdown.borrow() {
                break;
            }

            let report = self.run_cycle(&shutdown).await;
            if report.interrupted {
                break;
            }

            info!("Sleeping {}s...", self.config.update_period.as_secs());
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        warn!("Shutdown signal dropped, stopping");
                        break;
                    }
                }
            }
        }

        info!("Mongo replica labeler stopped");
        Ok(())
    }

    /// One pass of discover, probe all, reconcile all
    #[instrument(skip(self, shutdown), fields(namespace = %self.config.namespace, selector = %self.config.pod_selector))]
    pub async fn run_cycle(&self, shutdown: &ShutdownSignal) -> CycleReport {
        let started = Instant::now();
        let mut report = CycleReport::default();

        match self
            .discoverer
            .discover(&self.config.namespace, &self.config.pod_selector)
            .await
        {
            Ok(members) => {
                report.discovered = members.len();
                if members.is_empty() {
                    info!(
                        "No pods match '{}' in namespace {}",
                        self.config.pod_selector, self.config.namespace
                    );
                } else {
                    debug!("Discovered {} member(s)", members.len());
                }

                let observations = self.probe_all(members, shutdown, &mut report).await;
                if !report.interrupted {
                    self.reconcile_all(&observations, shutdown, &mut report).await;
                }
            }
            Err(e) => {
                error!("Pod discovery failed, skipping this cycle: {}", e);
                report.discovery_failed = true;
            }
        }

        info!(
            "Cycle {}: {} member(s), {} primary, {} secondary, {} unknown, {} labeled, {} failed, {} skipped{}",
            report.outcome(),
            report.discovered,
            report.leaders,
            report.followers,
            report.unknown,
            report.patched,
            report.patch_failures,
            report.skipped,
            if self.config.dry_run {
                format!(", {} planned (dry run)", report.planned)
            } else {
                String::new()
            }
        );

        let elapsed = started.elapsed();
        debug!("Cycle took {:?}", elapsed);
        #[cfg(feature = "metrics")]
        record_cycle_metrics(&report, elapsed.as_secs_f64());

        report
    }

    async fn probe_all(
        &self,
        members: Vec<ClusterMember>,
        shutdown: &ShutdownSignal,
        report: &mut CycleReport,
    ) -> Vec<RoleObservation> {
        let mut observations = Vec::with_capacity(members.len());

        for member in members {
            if *shutdown.borrow() {
                info!("Shutdown requested, abandoning cycle before probing {}", member.identity);
                report.interrupted = true;
                break;
            }

            let role = self.prober.probe(&member.endpoint).await;
            match role {
                Role::Leader => debug!("{} is a primary", member.identity.name),
                Role::Follower => debug!("{} is a secondary", member.identity.name),
                Role::Unknown => warn!("Role of {} could not be determined", member.identity.name),
            }
            report.record(role);
            observations.push(RoleObservation { member, role });
        }

        observations
    }

    async fn reconcile_all(
        &self,
        observations: &[RoleObservation],
        shutdown: &ShutdownSignal,
        report: &mut CycleReport,
    ) {
        for observation in observations {
            if *shutdown.borrow() {
                info!("Shutdown requested, leaving remaining labels for the next run");
                report.interrupted = true;
                break;
            }

            let identity = &observation.member.identity;
            let Some(patch) = LabelPatch::for_role(
                identity,
                &self.config.role_label,
                observation.role,
                self.config.unknown_role_policy,
            ) else {
                warn!("Leaving labels of {} unchanged: role unknown", identity);
                report.skipped += 1;
                continue;
            };

            if self.config.dry_run {
                info!(
                    "Dry run: would apply label '{}={}' to {}",
                    patch.label_key, patch.label_value, identity
                );
                report.planned += 1;
                continue;
            }

            match self.reconciler.reconcile(&patch).await {
                Ok(()) => report.patched += 1,
                Err(e) => {
                    error!("{}", e);
                    if e.is_retriable() {
                        debug!("Will retry {} next cycle", identity);
                    }
                    report.patch_failures += 1;
                }
            }
        }
    }
}

#[cfg(feature = "metrics")]
fn record_cycle_metrics(report: &CycleReport, seconds: f64) {
    use super::metrics;

    metrics::inc_cycle(report.outcome());
    metrics::observe_cycle_duration_seconds(seconds);
    // A failed discovery reports zero members, not the previous listing.
    metrics::set_discovered_members(report.discovered);
    metrics::inc_probes(Role::Leader, report.leaders);
    metrics::inc_probes(Role::Follower, report.followers);
    metrics::inc_probes(Role::Unknown, report.unknown);
    metrics::inc_label_patches("applied", report.patched);
    metrics::inc_label_patches("failed", report.patch_failures);
    metrics::inc_label_patches("skipped", report.skipped);
    metrics::inc_label_patches("dry_run", report.planned);
}
