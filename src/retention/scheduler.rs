use super::rules::SweepPlan;
use super::{RetentionSweeper, SweepReport};
use crate::clock::Clock;
use crate::rollup::CalendarZone;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone, Copy)]
struct ScheduledSweep {
    plan: SweepPlan,
    next_fire: Option<DateTime<Utc>>,
}

/// Fires each [`SweepPlan`] at its calendar boundary. Time comes only from
/// the injected clock, so `tick` can be driven deterministically.
pub struct SweepScheduler {
    sweeper: RetentionSweeper,
    clock: Arc<dyn Clock>,
    zone: CalendarZone,
    jobs: Vec<ScheduledSweep>,
}

impl SweepScheduler {
    pub fn new(
        sweeper: RetentionSweeper,
        clock: Arc<dyn Clock>,
        zone: CalendarZone,
        plans: Vec<SweepPlan>,
    ) -> Self {
        let now = clock.now();
        let jobs = plans
            .into_iter()
            .map(|plan| ScheduledSweep {
                plan,
                next_fire: plan.rule.next_firing(&zone, now),
            })
            .collect();
        Self {
            sweeper,
            clock,
            zone,
            jobs,
        }
    }

    pub fn next_firings(&self) -> Vec<(SweepPlan, Option<DateTime<Utc>>)> {
        self.jobs.iter().map(|job| (job.plan, job.next_fire)).collect()
    }

    /// Runs every plan whose firing time has passed, once, then schedules
    /// its next firing after the current time. A failed sweep is logged and
    /// waits for its next regular firing.
    pub async fn tick(&mut self) -> Vec<SweepReport> {
        let now = self.clock.now();
        let mut reports = Vec::new();

        for job in &mut self.jobs {
            match job.next_fire {
                Some(due) if due <= now => {}
                _ => continue,
            }

            let granularity = job.plan.granularity;
            match job.plan.rule.cutoff(&self.zone, now) {
                Some(cutoff) => match self.sweeper.sweep(granularity, cutoff).await {
                    Ok(report) => reports.push(report),
                    Err(err) => {
                        tracing::warn!(
                            granularity = %granularity,
                            error = %format!("{err:#}"),
                            "retention sweep failed; retrying at next firing"
                        );
                    }
                },
                None => {
                    tracing::warn!(granularity = %granularity, now = %now, "no retention cutoff for current time");
                }
            }

            job.next_fire = job.plan.rule.next_firing(&self.zone, now);
            tracing::debug!(
                granularity = %granularity,
                next_fire = ?job.next_fire,
                "retention sweep rescheduled"
            );
        }

        reports
    }

    pub fn start(mut self, poll_interval: Duration, cancel: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(poll_interval.max(Duration::from_millis(100)));
            tracing::info!(
                plans = self.jobs.len(),
                mode = ?self.sweeper.mode(),
                "retention scheduler started"
            );
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = interval.tick() => {
                        self.tick().await;
                    }
                }
            }
            tracing::info!("retention scheduler stopped");
        })
    }
}
