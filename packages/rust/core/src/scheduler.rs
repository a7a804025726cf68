//! Weekly triggers feeding a single serialized worker.
//!
//! Each registered target owns one trigger task that sleeps until its next
//! weekly slot and then queues a job. One worker drains the queue, so no two
//! runs ever overlap, across targets or within one.
//!
//! Registration is keyed by target: registering again replaces the previous
//! trigger and bumps a generation counter. Jobs queued under an older
//! generation, or for a target no longer registered, are skipped when
//! dequeued. A run already in progress always completes.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Local, TimeZone, Utc};
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use pagewatch_shared::{FetchSpec, MonitoredTarget, Schedule, ScheduleTimezone, TargetId};

use crate::pipeline::PipelineRunner;

// ---------------------------------------------------------------------------
// TargetRunner
// ---------------------------------------------------------------------------

/// Executes one run for a target. Must not fail: errors are handled inside.
#[async_trait]
pub trait TargetRunner: Send + Sync + 'static {
    async fn run_target(&self, target_id: TargetId, spec: &FetchSpec);
}

#[async_trait]
impl TargetRunner for PipelineRunner {
    async fn run_target(&self, target_id: TargetId, spec: &FetchSpec) {
        let outcome = self.run(target_id, spec).await;
        debug!(%target_id, outcome = outcome.label(), "scheduled run finished");
    }
}

// ---------------------------------------------------------------------------
// Jobs and registrations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum JobReason {
    Immediate,
    Scheduled,
}

#[derive(Debug, Clone)]
struct Job {
    target_id: TargetId,
    generation: u64,
    spec: FetchSpec,
    reason: JobReason,
}

struct Registration {
    generation: u64,
    spec: FetchSpec,
    schedule: Schedule,
    /// Last activation seen by `reconcile`; `None` for direct registrations.
    activated_at: Option<DateTime<Utc>>,
    trigger: JoinHandle<()>,
}

type Registry = Arc<Mutex<HashMap<TargetId, Registration>>>;

/// Changes applied by [`JobScheduler::reconcile`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    pub registered: Vec<TargetId>,
    pub unregistered: Vec<TargetId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.registered.is_empty() && self.unregistered.is_empty()
    }
}

// ---------------------------------------------------------------------------
// JobScheduler
// ---------------------------------------------------------------------------

/// Scheduler service with explicit [`start`](Self::start) / [`stop`](Self::stop).
///
/// Jobs queued before `start` run once the worker is started.
pub struct JobScheduler {
    runner: Arc<dyn TargetRunner>,
    timezone: ScheduleTimezone,
    registry: Registry,
    next_generation: AtomicU64,
    queue: mpsc::UnboundedSender<Job>,
    pending: Mutex<Option<mpsc::UnboundedReceiver<Job>>>,
    shutdown: watch::Sender<bool>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobScheduler {
    pub fn new(runner: Arc<dyn TargetRunner>, timezone: ScheduleTimezone) -> Self {
        let (queue, pending) = mpsc::unbounded_channel();
        let (shutdown, _) = watch::channel(false);
        Self {
            runner,
            timezone,
            registry: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            queue,
            pending: Mutex::new(Some(pending)),
            shutdown,
            worker: Mutex::new(None),
        }
    }

    /// Spawn the worker. Calling `start` twice is a no-op.
    pub async fn start(&self) {
        let Some(jobs) = self.pending.lock().await.take() else {
            debug!("scheduler already started");
            return;
        };

        let handle = tokio::spawn(worker_loop(
            self.runner.clone(),
            self.registry.clone(),
            jobs,
            self.shutdown.subscribe(),
        ));
        *self.worker.lock().await = Some(handle);
        info!(timezone = ?self.timezone, "scheduler started");
    }

    /// Cancel all triggers, stop the worker after its current run, drop queued jobs.
    pub async fn stop(&self) {
        {
            let mut registry = self.registry.lock().await;
            for (_, registration) in registry.drain() {
                registration.trigger.abort();
            }
        }

        self.shutdown.send_replace(true);
        if let Some(handle) = self.worker.lock().await.take() {
            if let Err(e) = handle.await {
                warn!(error = %e, "scheduler worker ended abnormally");
            }
        }
        info!("scheduler stopped");
    }

    /// Install or replace the weekly trigger for `target_id` and queue one
    /// immediate run.
    #[instrument(skip_all, fields(target_id = %target_id, schedule = %schedule))]
    pub async fn register(&self, target_id: TargetId, spec: FetchSpec, schedule: Schedule) {
        self.install(target_id, spec, schedule, None).await;
    }

    async fn install(
        &self,
        target_id: TargetId,
        spec: FetchSpec,
        schedule: Schedule,
        activated_at: Option<DateTime<Utc>>,
    ) {
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed) + 1;

        let trigger = self.spawn_trigger(target_id, generation, spec.clone(), schedule.clone());

        let previous = self.registry.lock().await.insert(
            target_id,
            Registration {
                generation,
                spec: spec.clone(),
                schedule,
                activated_at,
                trigger,
            },
        );
        if let Some(previous) = previous {
            previous.trigger.abort();
            debug!("replaced existing trigger");
        }

        self.enqueue(Job {
            target_id,
            generation,
            spec,
            reason: JobReason::Immediate,
        });
        info!("target registered");
    }

    /// Remove the trigger for `target_id`. Unknown targets are ignored.
    pub async fn unregister(&self, target_id: &TargetId) -> bool {
        match self.registry.lock().await.remove(target_id) {
            Some(registration) => {
                registration.trigger.abort();
                info!(%target_id, "target unregistered");
                true
            }
            None => false,
        }
    }

    /// Target IDs with an installed trigger.
    pub async fn registered(&self) -> Vec<TargetId> {
        let mut ids: Vec<TargetId> = self.registry.lock().await.keys().copied().collect();
        ids.sort();
        ids
    }

    /// Bring triggers in line with the given active targets: register new,
    /// changed or re-activated ones, unregister everything else.
    pub async fn reconcile(&self, active: &[MonitoredTarget]) -> ReconcileReport {
        let mut report = ReconcileReport::default();

        let (to_register, to_remove) = {
            let registry = self.registry.lock().await;
            let to_register: Vec<&MonitoredTarget> = active
                .iter()
                .filter(|target| target.active)
                .filter(|target| match registry.get(&target.id) {
                    Some(existing) => {
                        existing.spec != target.fetch_spec()
                            || existing.schedule != target.schedule
                            || existing.activated_at != Some(target.activated_at)
                    }
                    None => true,
                })
                .collect();
            let to_remove: Vec<TargetId> = registry
                .keys()
                .filter(|id| !active.iter().any(|t| t.active && t.id == **id))
                .copied()
                .collect();
            (to_register, to_remove)
        };

        for id in to_remove {
            if self.unregister(&id).await {
                report.unregistered.push(id);
            }
        }
        for target in to_register {
            self.install(
                target.id,
                target.fetch_spec(),
                target.schedule.clone(),
                Some(target.activated_at),
            )
            .await;
            report.registered.push(target.id);
        }

        if !report.is_empty() {
            info!(
                registered = report.registered.len(),
                unregistered = report.unregistered.len(),
                "triggers reconciled"
            );
        }
        report
    }

    fn enqueue(&self, job: Job) {
        if self.queue.send(job).is_err() {
            warn!("scheduler queue closed, job dropped");
        }
    }

    fn spawn_trigger(
        &self,
        target_id: TargetId,
        generation: u64,
        spec: FetchSpec,
        schedule: Schedule,
    ) -> JoinHandle<()> {
        let queue = self.queue.clone();
        match self.timezone {
            ScheduleTimezone::Local => tokio::spawn(trigger_loop(
                target_id, generation, spec, schedule, Local::now, queue,
            )),
            ScheduleTimezone::Utc => tokio::spawn(trigger_loop(
                target_id, generation, spec, schedule, Utc::now, queue,
            )),
        }
    }
}

impl Drop for JobScheduler {
    fn drop(&mut self) {
        if let Ok(mut registry) = self.registry.try_lock() {
            for (_, registration) in registry.drain() {
                registration.trigger.abort();
            }
        }
        self.shutdown.send_replace(true);
    }
}

// ---------------------------------------------------------------------------
// Tasks
// ---------------------------------------------------------------------------

/// Time until `next`, clamped at zero.
fn delay_until<Tz: TimeZone>(next: &DateTime<Tz>, now: &DateTime<Tz>) -> Duration {
    next.clone()
        .signed_duration_since(now.clone())
        .to_std()
        .unwrap_or_default()
}

const NO_SLOT_RETRY: Duration = Duration::from_secs(3600);

async fn trigger_loop<Tz>(
    target_id: TargetId,
    generation: u64,
    spec: FetchSpec,
    schedule: Schedule,
    now: fn() -> DateTime<Tz>,
    queue: mpsc::UnboundedSender<Job>,
) where
    Tz: TimeZone + Send + Sync + 'static,
    Tz::Offset: Send + Sync,
{
    let mut last_fire: Option<DateTime<Tz>> = None;
    loop {
        let current = now();
        // Never fire the same slot twice if the timer wakes a little early.
        let after = match &last_fire {
            Some(last) if *last > current => last.clone(),
            _ => current.clone(),
        };
        let Some(next) = schedule.next_fire_after(&after) else {
            warn!(%target_id, "schedule has no upcoming slot, retrying in an hour");
            tokio::time::sleep(NO_SLOT_RETRY).await;
            continue;
        };

        debug!(%target_id, next = %next.naive_local(), "next fire");
        tokio::time::sleep(delay_until(&next, &current)).await;

        let job = Job {
            target_id,
            generation,
            spec: spec.clone(),
            reason: JobReason::Scheduled,
        };
        if queue.send(job).is_err() {
            return;
        }
        last_fire = Some(next);
    }
}

async fn worker_loop(
    runner: Arc<dyn TargetRunner>,
    registry: Registry,
    mut jobs: mpsc::UnboundedReceiver<Job>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let job = tokio::select! {
            biased;
            _ = shutdown.changed() => break,
            job = jobs.recv() => match job {
                Some(job) => job,
                None => break,
            },
        };

        let live = registry
            .lock()
            .await
            .get(&job.target_id)
            .is_some_and(|r| r.generation == job.generation);
        if !live {
            debug!(target_id = %job.target_id, "skipping job for replaced or removed trigger");
            continue;
        }

        debug!(target_id = %job.target_id, reason = ?job.reason, "running job");
        runner.run_target(job.target_id, &job.spec).await;
    }
    debug!("scheduler worker exiting");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    use pagewatch_shared::Weekday;

    /// Records every run and the highest number of overlapping runs.
    #[derive(Default)]
    struct RecordingRunner {
        runs: Mutex<Vec<TargetId>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
        delay: Duration,
    }

    impl RecordingRunner {
        fn with_delay(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                delay,
                ..Self::default()
            })
        }

        async fn runs(&self) -> Vec<TargetId> {
            self.runs.lock().await.clone()
        }
    }

    #[async_trait]
    impl TargetRunner for RecordingRunner {
        async fn run_target(&self, target_id: TargetId, _spec: &FetchSpec) {
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            tokio::time::sleep(self.delay).await;
            self.runs.lock().await.push(target_id);
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
    }

    fn spec(n: u32) -> FetchSpec {
        FetchSpec {
            url: format!("http://news.example/{n}"),
            selector: "#list".into(),
        }
    }

    fn weekly() -> Schedule {
        Schedule::new([Weekday::Monday], 8, 0).unwrap()
    }

    fn added_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn target(id: TargetId, n: u32, active: bool) -> MonitoredTarget {
        MonitoredTarget {
            id,
            url: format!("http://news.example/{n}"),
            selector: "#list".into(),
            schedule: weekly(),
            active,
            custom_instruction: None,
            created_at: added_at(),
            activated_at: added_at(),
        }
    }

    /// 100ms before the Monday 08:00 slot of `weekly()`.
    fn just_before_slot() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 7, 59, 59).unwrap() + chrono::TimeDelta::milliseconds(900)
    }

    async fn wait_for_runs(runner: &RecordingRunner, count: usize) {
        for _ in 0..200 {
            if runner.runs().await.len() >= count {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn register_runs_immediately() {
        let runner = RecordingRunner::with_delay(Duration::ZERO);
        let scheduler = JobScheduler::new(runner.clone(), ScheduleTimezone::Utc);
        scheduler.start().await;

        let id = TargetId::new();
        scheduler.register(id, spec(1), weekly()).await;
        wait_for_runs(&runner, 1).await;

        assert_eq!(runner.runs().await, vec![id]);
        assert_eq!(scheduler.registered().await, vec![id]);
        scheduler.stop().await;
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn runs_never_overlap() {
        let runner = RecordingRunner::with_delay(Duration::from_millis(30));
        let scheduler = JobScheduler::new(runner.clone(), ScheduleTimezone::Utc);
        scheduler.start().await;

        for n in 0..4 {
            scheduler.register(TargetId::new(), spec(n), weekly()).await;
        }
        wait_for_runs(&runner, 4).await;

        assert_eq!(runner.runs().await.len(), 4);
        assert_eq!(runner.max_in_flight.load(Ordering::SeqCst), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn jobs_queued_before_start_run_after_start() {
        let runner = RecordingRunner::with_delay(Duration::ZERO);
        let scheduler = JobScheduler::new(runner.clone(), ScheduleTimezone::Local);

        let id = TargetId::new();
        scheduler.register(id, spec(1), weekly()).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(runner.runs().await.is_empty());

        scheduler.start().await;
        wait_for_runs(&runner, 1).await;
        assert_eq!(runner.runs().await, vec![id]);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn reregistering_replaces_without_duplicate_runs() {
        let runner = RecordingRunner::with_delay(Duration::ZERO);
        let scheduler = JobScheduler::new(runner.clone(), ScheduleTimezone::Utc);

        let id = TargetId::new();
        scheduler.register(id, spec(1), weekly()).await;
        scheduler.register(id, spec(2), weekly()).await;
        scheduler.start().await;
        wait_for_runs(&runner, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        // The first registration's immediate job is stale and skipped.
        assert_eq!(runner.runs().await, vec![id]);
        assert_eq!(scheduler.registered().await.len(), 1);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn unregistered_target_is_skipped() {
        let runner = RecordingRunner::with_delay(Duration::ZERO);
        let scheduler = JobScheduler::new(runner.clone(), ScheduleTimezone::Utc);

        let removed = TargetId::new();
        let kept = TargetId::new();
        scheduler.register(removed, spec(1), weekly()).await;
        scheduler.register(kept, spec(2), weekly()).await;
        assert!(scheduler.unregister(&removed).await);
        assert!(!scheduler.unregister(&removed).await);

        scheduler.start().await;
        wait_for_runs(&runner, 1).await;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(runner.runs().await, vec![kept]);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn reconcile_tracks_active_targets() {
        let runner = RecordingRunner::with_delay(Duration::ZERO);
        let scheduler = JobScheduler::new(runner.clone(), ScheduleTimezone::Utc);
        scheduler.start().await;

        let a = TargetId::new();
        let b = TargetId::new();
        let report = scheduler
            .reconcile(&[target(a, 1, true), target(b, 2, true)])
            .await;
        assert_eq!(report.registered.len(), 2);
        wait_for_runs(&runner, 2).await;

        // Unchanged set: nothing to do.
        let report = scheduler
            .reconcile(&[target(a, 1, true), target(b, 2, true)])
            .await;
        assert!(report.is_empty());

        // b deactivated, a moved to another page.
        let report = scheduler
            .reconcile(&[target(a, 3, true), target(b, 2, false)])
            .await;
        assert_eq!(report.registered, vec![a]);
        assert_eq!(report.unregistered, vec![b]);
        assert_eq!(scheduler.registered().await, vec![a]);

        wait_for_runs(&runner, 3).await;
        assert_eq!(runner.runs().await.len(), 3);
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn reactivated_target_runs_again() {
        let runner = RecordingRunner::with_delay(Duration::ZERO);
        let scheduler = JobScheduler::new(runner.clone(), ScheduleTimezone::Utc);
        scheduler.start().await;

        let id = TargetId::new();
        scheduler.reconcile(&[target(id, 1, true)]).await;
        wait_for_runs(&runner, 1).await;

        // Paused and resumed between two reconciles: only the stamp moved.
        let mut resumed = target(id, 1, true);
        resumed.activated_at = added_at() + chrono::TimeDelta::minutes(5);
        let report = scheduler.reconcile(&[resumed.clone()]).await;
        assert_eq!(report.registered, vec![id]);
        assert!(report.unregistered.is_empty());

        wait_for_runs(&runner, 2).await;
        assert_eq!(runner.runs().await, vec![id, id]);

        assert!(scheduler.reconcile(&[resumed]).await.is_empty());
        scheduler.stop().await;
    }

    #[tokio::test]
    async fn trigger_queues_scheduled_job_once_per_slot() {
        let (queue, mut jobs) = mpsc::unbounded_channel();
        let id = TargetId::new();
        let trigger = tokio::spawn(trigger_loop(
            id,
            7,
            spec(1),
            weekly(),
            just_before_slot,
            queue,
        ));

        let job = tokio::time::timeout(Duration::from_secs(2), jobs.recv())
            .await
            .expect("trigger fired")
            .expect("queue open");
        assert_eq!(job.target_id, id);
        assert_eq!(job.generation, 7);
        assert_eq!(job.reason, JobReason::Scheduled);
        assert_eq!(job.spec, spec(1));

        // The clock still reads just before the slot, which has already fired.
        let again = tokio::time::timeout(Duration::from_millis(400), jobs.recv()).await;
        assert!(again.is_err(), "same slot fired twice");

        trigger.abort();
    }

    #[tokio::test]
    async fn stop_clears_triggers_and_is_idempotent() {
        let runner = RecordingRunner::with_delay(Duration::ZERO);
        let scheduler = JobScheduler::new(runner.clone(), ScheduleTimezone::Utc);
        scheduler.start().await;
        scheduler.start().await;

        scheduler.register(TargetId::new(), spec(1), weekly()).await;
        wait_for_runs(&runner, 1).await;

        scheduler.stop().await;
        assert!(scheduler.registered().await.is_empty());
        scheduler.stop().await;
    }

    #[test]
    fn delay_is_clamped_at_zero() {
        let now = Utc::now();
        let past = now - chrono::TimeDelta::seconds(5);
        assert_eq!(delay_until(&past, &now), Duration::ZERO);

        let later = now + chrono::TimeDelta::seconds(90);
        assert_eq!(delay_until(&later, &now), Duration::from_secs(90));
    }
}
