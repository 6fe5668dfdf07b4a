//! Progress persistence port.
//!
//! Buffers partial progress updates for one `(learner, quiz)` pair and decides
//! when they reach the `ProgressRepository`: on every request (immediate
//! policy), on a fixed timer (debounced policy), on explicit request, or when
//! the host raises an interruption signal. The in-memory attempt stays the
//! source of truth; failures here are logged and reported on a watch channel
//! and never roll the attempt back.

use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex as AsyncMutex, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use quiz_core::Clock;
use quiz_core::model::{AttemptStatus, PersistedProgressRecord, ProgressPatch};
use storage::repository::{ProgressKey, ProgressRepository, StorageError};

use crate::config::EngineConfig;
use crate::error::PersistenceError;
use crate::interrupt::{InterruptHandler, InterruptHub, InterruptSignal};

//
// ─── TYPES ─────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SavePolicy {
    /// Every request is written before it returns.
    Immediate,
    /// Requests are buffered and written by a periodic timer.
    #[default]
    Debounced,
}

/// Latest save state, for a non-intrusive "not saved" indicator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SaveStatus {
    Idle,
    Pending,
    Saved { at: DateTime<Utc> },
    Failed { reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlushTrigger {
    Immediate,
    Timer,
    Interrupt(InterruptSignal),
    Explicit,
}

impl FlushTrigger {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Immediate => "immediate",
            Self::Timer => "timer",
            Self::Interrupt(InterruptSignal::Hidden) => "hidden",
            Self::Interrupt(InterruptSignal::Unload) => "unload",
            Self::Explicit => "explicit",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SaveOptions {
    /// Write now regardless of the policy.
    pub immediate: bool,
}

impl SaveOptions {
    #[must_use]
    pub fn immediate() -> Self {
        Self { immediate: true }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SaveOutcome {
    Written { version: u64 },
    Buffered,
    /// Nothing was pending, or a timer flush yielded to one already running.
    Skipped,
}

//
// ─── PORT ──────────────────────────────────────────────────────────────────────
//

/// Cheap to clone; clones share the buffer, timer and status channel.
#[derive(Clone)]
pub struct ProgressPersistence {
    inner: Arc<Inner>,
}

struct Inner {
    key: ProgressKey,
    repo: Arc<dyn ProgressRepository>,
    clock: Clock,
    policy: SavePolicy,
    interval: Duration,
    state: AsyncMutex<PortState>,
    in_flight: AtomicUsize,
    timer: Mutex<Option<JoinHandle<()>>>,
    status: watch::Sender<SaveStatus>,
}

#[derive(Default)]
struct PortState {
    /// Last record known to be durable, or the base for the next write.
    record: Option<PersistedProgressRecord>,
    pending: Option<ProgressPatch>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

impl fmt::Debug for ProgressPersistence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressPersistence")
            .field("key", &self.inner.key)
            .field("policy", &self.inner.policy)
            .field("status", &*self.inner.status.borrow())
            .finish_non_exhaustive()
    }
}

impl ProgressPersistence {
    #[must_use]
    pub fn new(
        key: ProgressKey,
        repo: Arc<dyn ProgressRepository>,
        clock: Clock,
        config: &EngineConfig,
    ) -> Self {
        let (status, _) = watch::channel(SaveStatus::Idle);
        Self {
            inner: Arc::new(Inner {
                key,
                repo,
                clock,
                policy: config.save_policy,
                interval: config.debounce_interval.max(Duration::from_millis(1)),
                state: AsyncMutex::new(PortState::default()),
                in_flight: AtomicUsize::new(0),
                timer: Mutex::new(None),
                status,
            }),
        }
    }

    #[must_use]
    pub fn key(&self) -> ProgressKey {
        self.inner.key
    }

    #[must_use]
    pub fn policy(&self) -> SavePolicy {
        self.inner.policy
    }

    /// Flush on `Hidden`/`Unload` raised on `hub`, for as long as this port lives.
    pub fn attach(&self, hub: &InterruptHub) {
        let weak = Arc::downgrade(&self.inner);
        let handler: Weak<dyn InterruptHandler> = weak;
        hub.register(handler);
    }

    /// Read the most recent attempt's record and make it the merge base.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Storage` if the repository read fails.
    pub async fn load(&self) -> Result<Option<PersistedProgressRecord>, PersistenceError> {
        let key = self.inner.key;
        let loaded = self.inner.repo.load(key).await.map_err(|err| {
            warn!(learner = %key.learner_id, quiz = %key.quiz_id, error = %err, "progress load failed");
            PersistenceError::from(err)
        })?;

        let mut state = self.inner.state.lock().await;
        state.record.clone_from(&loaded);
        Ok(loaded)
    }

    /// Every stored attempt for this key, oldest first.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Storage` if the repository read fails.
    pub async fn history(&self) -> Result<Vec<PersistedProgressRecord>, PersistenceError> {
        Ok(self.inner.repo.history(self.inner.key).await?)
    }

    /// Flush whatever is buffered, then make `record` the active attempt and
    /// write it straight away.
    ///
    /// # Errors
    ///
    /// If the previous attempt's buffer cannot be written, returns that error
    /// and leaves the previous attempt active with its buffer intact.
    /// Otherwise returns the error of the initial write; the record stays
    /// active and the next flush retries it.
    pub async fn begin_attempt(
        &self,
        mut record: PersistedProgressRecord,
    ) -> Result<SaveOutcome, PersistenceError> {
        let _guard = InFlight::enter(&self.inner.in_flight);
        let mut state = self.inner.state.lock().await;

        if state.pending.is_some() {
            self.inner.write_pending(&mut state, FlushTrigger::Explicit).await?;
        }
        if let Some(current) = &state.record {
            if current.attempt_number == record.attempt_number {
                record.version = record.version.max(current.version);
            }
        }

        info!(
            learner = %self.inner.key.learner_id,
            quiz = %self.inner.key.quiz_id,
            attempt = record.attempt_number,
            "attempt started"
        );
        state.record = Some(record);
        state.pending = Some(ProgressPatch::new());
        self.inner.write_pending(&mut state, FlushTrigger::Immediate).await
    }

    /// Queue a partial update.
    ///
    /// With `options.immediate` or the immediate policy the buffer is written
    /// before this returns; otherwise the periodic timer picks it up.
    ///
    /// # Errors
    ///
    /// Returns the write error for immediate saves. The patch stays buffered.
    pub async fn request_save(
        &self,
        patch: ProgressPatch,
        options: SaveOptions,
    ) -> Result<SaveOutcome, PersistenceError> {
        let buffered = {
            let mut state = self.inner.state.lock().await;
            match state.pending.as_mut() {
                Some(pending) => pending.merge(patch),
                None if patch.is_empty() => {}
                None => state.pending = Some(patch),
            }
            state.pending.is_some()
        };
        if buffered {
            self.inner.status.send_replace(SaveStatus::Pending);
        }

        if options.immediate || self.inner.policy == SavePolicy::Immediate {
            return self.inner.flush(FlushTrigger::Immediate).await;
        }
        if !buffered {
            return Ok(SaveOutcome::Skipped);
        }

        self.ensure_timer();
        debug!(
            learner = %self.inner.key.learner_id,
            quiz = %self.inner.key.quiz_id,
            "progress buffered"
        );
        Ok(SaveOutcome::Buffered)
    }

    /// Write the buffer now.
    ///
    /// # Errors
    ///
    /// Returns the write error; the buffer is kept for the next attempt.
    pub async fn flush(&self) -> Result<SaveOutcome, PersistenceError> {
        self.inner.flush(FlushTrigger::Explicit).await
    }

    /// Drop the buffer, stop the timer and delete the active attempt's record.
    ///
    /// # Errors
    ///
    /// Returns `PersistenceError::Storage` if the delete fails; the record
    /// stays active in that case.
    pub async fn clear(&self) -> Result<(), PersistenceError> {
        self.inner.stop_timer();
        let mut state = self.inner.state.lock().await;
        state.pending = None;

        if let Some(record) = state.record.take() {
            if let Err(err) = self.inner.repo.delete(self.inner.key, record.attempt_number).await {
                state.record = Some(record);
                return Err(err.into());
            }
            info!(
                learner = %self.inner.key.learner_id,
                quiz = %self.inner.key.quiz_id,
                attempt = record.attempt_number,
                "progress cleared"
            );
        }
        self.inner.status.send_replace(SaveStatus::Idle);
        Ok(())
    }

    #[must_use]
    pub fn status(&self) -> SaveStatus {
        self.inner.status.borrow().clone()
    }

    #[must_use]
    pub fn subscribe_status(&self) -> watch::Receiver<SaveStatus> {
        self.inner.status.subscribe()
    }

    /// The merge base: last written record, or the loaded/begun one.
    pub async fn record(&self) -> Option<PersistedProgressRecord> {
        self.inner.state.lock().await.record.clone()
    }

    pub async fn has_pending(&self) -> bool {
        self.inner.state.lock().await.pending.is_some()
    }

    fn ensure_timer(&self) {
        let Ok(mut slot) = self.inner.timer.lock() else {
            return;
        };
        if slot.as_ref().is_some_and(|handle| !handle.is_finished()) {
            return;
        }
        *slot = Some(tokio::spawn(run_timer(
            Arc::downgrade(&self.inner),
            self.inner.interval,
        )));
    }
}

async fn run_timer(inner: Weak<Inner>, period: Duration) {
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        let Some(inner) = inner.upgrade() else {
            break;
        };
        // Failures are logged and published on the status channel.
        let _ = inner.flush(FlushTrigger::Timer).await;
    }
}

impl Inner {
    async fn flush(&self, trigger: FlushTrigger) -> Result<SaveOutcome, PersistenceError> {
        if trigger == FlushTrigger::Timer && self.in_flight.load(Ordering::SeqCst) > 0 {
            debug!(
                learner = %self.key.learner_id,
                quiz = %self.key.quiz_id,
                trigger = trigger.as_str(),
                "flush already in flight"
            );
            return Ok(SaveOutcome::Skipped);
        }
        let _guard = InFlight::enter(&self.in_flight);
        let mut state = self.state.lock().await;
        self.write_pending(&mut state, trigger).await
    }

    async fn write_pending(
        &self,
        state: &mut PortState,
        trigger: FlushTrigger,
    ) -> Result<SaveOutcome, PersistenceError> {
        let Some(patch) = state.pending.take() else {
            return Ok(SaveOutcome::Skipped);
        };
        let Some(base) = state.record.as_ref() else {
            state.pending = Some(patch);
            warn!(
                learner = %self.key.learner_id,
                quiz = %self.key.quiz_id,
                trigger = trigger.as_str(),
                "progress buffered without an active record"
            );
            return Err(PersistenceError::NoActiveRecord);
        };

        let now = self.clock.now();
        let mut next = next_record(base, &patch, now);
        let mut saved = self.repo.save(self.key, &next).await;

        // Another writer moved this attempt forward: rebase once on its record.
        if matches!(saved, Err(StorageError::Conflict)) {
            if let Some(newer) = self.reload_attempt(next.attempt_number, trigger).await {
                next = next_record(&newer, &patch, now);
                state.record = Some(newer);
                saved = self.repo.save(self.key, &next).await;
            }
        }

        match saved {
            Ok(()) => {
                let version = next.version;
                debug!(
                    learner = %self.key.learner_id,
                    quiz = %self.key.quiz_id,
                    attempt = next.attempt_number,
                    version,
                    trigger = trigger.as_str(),
                    "progress saved"
                );
                state.record = Some(next);
                self.status.send_replace(SaveStatus::Saved { at: now });
                Ok(SaveOutcome::Written { version })
            }
            Err(err) => {
                let err = PersistenceError::from(err);
                warn!(
                    learner = %self.key.learner_id,
                    quiz = %self.key.quiz_id,
                    attempt = next.attempt_number,
                    trigger = trigger.as_str(),
                    error = %err,
                    "progress save failed"
                );
                state.pending = Some(patch);
                self.status.send_replace(SaveStatus::Failed {
                    reason: err.to_string(),
                });
                Err(err)
            }
        }
    }

    async fn reload_attempt(
        &self,
        attempt_number: u32,
        trigger: FlushTrigger,
    ) -> Option<PersistedProgressRecord> {
        match self.repo.history(self.key).await {
            Ok(history) => {
                let newer = history
                    .into_iter()
                    .find(|record| record.attempt_number == attempt_number)?;
                info!(
                    learner = %self.key.learner_id,
                    quiz = %self.key.quiz_id,
                    attempt = attempt_number,
                    version = newer.version,
                    trigger = trigger.as_str(),
                    "progress was written elsewhere; rebasing"
                );
                Some(newer)
            }
            Err(err) => {
                warn!(
                    learner = %self.key.learner_id,
                    quiz = %self.key.quiz_id,
                    error = %err,
                    "progress reload failed"
                );
                None
            }
        }
    }

    fn stop_timer(&self) {
        if let Ok(mut slot) = self.timer.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

fn next_record(
    base: &PersistedProgressRecord,
    patch: &ProgressPatch,
    now: DateTime<Utc>,
) -> PersistedProgressRecord {
    let mut next = base.clone();
    next.apply(&applicable(base, patch));
    next.version = base.version + 1;
    next.saved_at = Some(now);
    next
}

/// A submitted record is final. Unless `patch` submits too, only the lesson
/// and video maps are carried onto it.
fn applicable(base: &PersistedProgressRecord, patch: &ProgressPatch) -> ProgressPatch {
    if base.is_submitted() && patch.status != Some(AttemptStatus::Submitted) {
        return ProgressPatch {
            lesson_progress: patch.lesson_progress.clone(),
            video_progress: patch.video_progress.clone(),
            ..ProgressPatch::new()
        };
    }
    patch.clone()
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.stop_timer();
    }
}

#[async_trait]
impl InterruptHandler for Inner {
    async fn on_interrupt(&self, signal: InterruptSignal) {
        // Failures are logged and published on the status channel.
        let _ = self.flush(FlushTrigger::Interrupt(signal)).await;
    }
}
