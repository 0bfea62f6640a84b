//! Coordinator for complete and partial content cache updates
//!
//! Readers get an immutable snapshot of the cache and never wait on an
//! update. Writers go through two locks, always taken in this order:
//!
//! - the *mutation* lock serializes every change to the published
//!   snapshot (partial updates, publishing a rebuilt cache);
//! - the *admission* lock guards the `current`/`next` complete update
//!   slots and the partial updates buffered with them.
//!
//! At most one complete update runs at a time. While one runs, at most one
//! more is queued as `next`; every further submission joins `next` and
//! shares its outcome. Partial updates that hit the live snapshot while a
//! rebuild runs are replayed on the rebuilt cache before it is published.

use crate::action::{
    ObservationInsertion, ObservationInsertionUpdate, ResultInsertion, ResultInsertionUpdate,
    ResultTemplateInsertion, ResultTemplateInsertionUpdate, SensorDeletionUpdate, SensorInsertion,
    SensorInsertionUpdate,
};
use crate::content::ContentCache;
use crate::persist::SnapshotFile;
use crate::scheduler::{UpdateScheduler, UpdateTarget};
use crate::slot::{Slot, SlotState, Ticket};
use crate::update::ContentCacheUpdate;
use parking_lot::{Mutex, RwLock};
use sos_common::{CacheConfig, Config, Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// Controller statistics
#[derive(Debug, Default)]
pub struct ControllerStats {
    /// Complete updates that finished successfully
    pub complete_updates: AtomicU64,
    /// Complete updates that failed
    pub complete_failures: AtomicU64,
    /// Complete update submissions merged into another update
    pub coalesced: AtomicU64,
    /// Partial updates applied to the live snapshot
    pub partial_updates: AtomicU64,
    /// Partial updates that returned an error
    pub partial_failures: AtomicU64,
    /// Buffered partial updates replayed on a rebuilt cache
    pub replayed: AtomicU64,
    /// Replays that returned an error
    pub replay_failures: AtomicU64,
    /// Snapshot files written
    pub snapshot_stores: AtomicU64,
    /// Snapshot files that could not be written
    pub store_failures: AtomicU64,
}

impl ControllerStats {
    fn inc(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

#[derive(Debug, Default)]
struct Admission {
    current: Option<Slot>,
    next: Option<Slot>,
}

/// What a complete update submission has to do after admission
enum Admitted {
    /// Run the new current slot
    Run(u64),
    /// Wait for `current` to finish, then run the slot queued as next
    RunAfter { id: u64, current: Ticket },
    /// Share the outcome of an already admitted slot
    Join(Ticket),
}

fn live(slot: Option<&Slot>) -> Option<(SlotState, Ticket)> {
    slot.filter(|s| !s.state().is_terminal())
        .map(|s| (s.state(), s.ticket()))
}

/// Owner of the content cache
pub struct ContentCacheController {
    published: RwLock<Arc<ContentCache>>,
    mutation: Mutex<()>,
    admission: Mutex<Admission>,
    slot_ids: AtomicU64,
    partial_ids: AtomicU64,
    initialized: AtomicBool,
    snapshot: Option<SnapshotFile>,
    default_update: Arc<dyn ContentCacheUpdate>,
    wait_timeout: Option<Duration>,
    update_interval: Duration,
    scheduler: Mutex<Option<UpdateScheduler>>,
    stats: ControllerStats,
}

impl std::fmt::Debug for ContentCacheController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCacheController")
            .field("snapshot", &self.snapshot)
            .field("initialized", &self.is_initialized())
            .field("update_interval", &self.update_interval)
            .finish_non_exhaustive()
    }
}

impl ContentCacheController {
    /// Create a controller persisting to the configured snapshot file
    ///
    /// `default_update` is the complete update run by
    /// [`Self::update_from_datasource`] and the scheduler.
    pub fn new(config: &Config, default_update: Arc<dyn ContentCacheUpdate>) -> Result<Self> {
        config.validate()?;
        let snapshot = config
            .cache
            .persist
            .then(|| SnapshotFile::new(config.cache_file_path()));
        Self::with_snapshot(snapshot, &config.cache, default_update)
    }

    /// Create a controller with an explicit snapshot file, `None` to keep
    /// the cache in memory only
    ///
    /// An existing snapshot is loaded and then deleted. A snapshot that
    /// cannot be read is logged and the controller starts empty.
    pub fn with_snapshot(
        snapshot: Option<SnapshotFile>,
        config: &CacheConfig,
        default_update: Arc<dyn ContentCacheUpdate>,
    ) -> Result<Self> {
        if !default_update.is_complete_update() {
            return Err(Error::invalid_argument(format!(
                "default update {default_update:?} is not a complete update"
            )));
        }

        let empty = || ContentCache::with_default_epsg_code(config.default_epsg_code);
        let (cache, initialized) = match snapshot.as_ref().map(SnapshotFile::take) {
            None | Some(Ok(None)) => (empty(), false),
            Some(Ok(Some(cache))) => {
                info!(
                    "Loaded content cache with {} offerings from {:?}",
                    cache.offerings().len(),
                    snapshot.as_ref().map(SnapshotFile::path)
                );
                (cache, true)
            }
            Some(Err(e)) => {
                error!(
                    "Failed to load content cache from {:?}, starting empty: {}",
                    snapshot.as_ref().map(SnapshotFile::path),
                    e
                );
                (empty(), false)
            }
        };

        Ok(Self {
            published: RwLock::new(Arc::new(cache)),
            mutation: Mutex::new(()),
            admission: Mutex::new(Admission::default()),
            slot_ids: AtomicU64::new(1),
            partial_ids: AtomicU64::new(1),
            initialized: AtomicBool::new(initialized),
            snapshot,
            default_update,
            wait_timeout: config.wait_timeout(),
            update_interval: config.update_interval(),
            scheduler: Mutex::new(None),
            stats: ControllerStats::default(),
        })
    }

    /// The current snapshot
    pub fn get_cache(&self) -> Arc<ContentCache> {
        Arc::clone(&*self.published.read())
    }

    /// True once the cache was loaded from disk or rebuilt successfully
    pub fn is_initialized(&self) -> bool {
        self.initialized.load(Ordering::Acquire)
    }

    pub const fn stats(&self) -> &ControllerStats {
        &self.stats
    }

    pub const fn snapshot_file(&self) -> Option<&SnapshotFile> {
        self.snapshot.as_ref()
    }

    /// Run `update` and return once it is reflected in the published cache
    ///
    /// A complete update may be merged with one submitted concurrently, in
    /// which case the caller returns with that update's outcome.
    pub fn update(&self, update: Arc<dyn ContentCacheUpdate>) -> Result<()> {
        if update.is_complete_update() {
            self.update_complete(update)
        } else {
            self.update_partial(update)
        }
    }

    /// Rebuild the cache with the default complete update
    pub fn update_from_datasource(&self) -> Result<()> {
        self.update(Arc::clone(&self.default_update))
    }

    pub fn update_after_sensor_insertion(&self, insertion: SensorInsertion) -> Result<()> {
        self.update(Arc::new(SensorInsertionUpdate::new(insertion)?))
    }

    pub fn update_after_sensor_deletion(&self, procedure: &str) -> Result<()> {
        self.update(Arc::new(SensorDeletionUpdate::new(procedure)?))
    }

    pub fn update_after_observation_insertion(&self, insertion: ObservationInsertion) -> Result<()> {
        self.update(Arc::new(ObservationInsertionUpdate::new(insertion)?))
    }

    pub fn update_after_result_template_insertion(
        &self,
        insertion: ResultTemplateInsertion,
    ) -> Result<()> {
        self.update(Arc::new(ResultTemplateInsertionUpdate::new(insertion)?))
    }

    pub fn update_after_result_insertion(&self, insertion: ResultInsertion) -> Result<()> {
        self.update(Arc::new(ResultInsertionUpdate::new(insertion)?))
    }

    /// Start scheduled rebuilds at the configured interval
    pub fn start_scheduler(self: &Arc<Self>) -> Result<()> {
        let mut scheduler = self.scheduler.lock();
        if scheduler.is_some() {
            return Err(Error::illegal_state("update scheduler already running"));
        }
        if self.update_interval.is_zero() {
            info!("Scheduled content cache updates are disabled");
        } else {
            info!(
                "Next content cache update in {} minutes",
                self.update_interval.as_secs() / 60
            );
        }
        *scheduler = Some(UpdateScheduler::start(
            Arc::downgrade(self),
            self.update_interval,
        )?);
        Ok(())
    }

    /// Change the interval between scheduled rebuilds
    pub fn reschedule(&self, interval: Duration) -> Result<()> {
        match self.scheduler.lock().as_ref() {
            Some(scheduler) => {
                scheduler.reschedule(interval);
                Ok(())
            }
            None => Err(Error::illegal_state("update scheduler not started")),
        }
    }

    /// Stop scheduled rebuilds and persist the final snapshot
    pub fn cleanup(&self) {
        let scheduler = self.scheduler.lock().take();
        if let Some(scheduler) = scheduler {
            scheduler.stop();
        }
        let _guard = self.mutation.lock();
        let cache = self.get_cache();
        self.persist(&cache);
        info!("Content cache controller shut down");
    }

    // ---- Partial updates ----

    fn update_partial(&self, update: Arc<dyn ContentCacheUpdate>) -> Result<()> {
        let label = format!(
            "PartialUpdate[#{}]",
            self.partial_ids.fetch_add(1, Ordering::Relaxed)
        );
        let _guard = self.mutation.lock();

        let mut working = ContentCache::clone(&self.published.read());
        update.reset();
        let outcome = update.execute(&mut working);
        // Published even on failure; partial updates are not rolled back
        self.publish_locked(working);
        ControllerStats::inc(&self.stats.partial_updates);

        if let Err(e) = outcome {
            ControllerStats::inc(&self.stats.partial_failures);
            warn!("{} {:?} failed: {}", label, update, e);
            return Err(Error::update_failed(label, Arc::new(e)));
        }

        let mut admission = self.admission.lock();
        if let Some(slot) = admission
            .current
            .as_mut()
            .filter(|s| s.state().accepts_partial_updates())
        {
            slot.buffer(update)?;
            trace!(
                "{} buffered for {} ({} pending)",
                label,
                slot.label(),
                slot.buffered_len()
            );
        }
        Ok(())
    }

    fn publish_locked(&self, cache: ContentCache) {
        let cache = Arc::new(cache);
        *self.published.write() = Arc::clone(&cache);
        self.persist(&cache);
    }

    fn persist(&self, cache: &ContentCache) {
        let Some(file) = &self.snapshot else {
            return;
        };
        match file.store(cache) {
            Ok(_) => ControllerStats::inc(&self.stats.snapshot_stores),
            Err(e) => {
                ControllerStats::inc(&self.stats.store_failures);
                error!("Failed to serialize content cache to {:?}: {}", file.path(), e);
            }
        }
    }

    // ---- Complete updates ----

    fn update_complete(&self, update: Arc<dyn ContentCacheUpdate>) -> Result<()> {
        let admitted = self.admit(update);
        match admitted {
            Admitted::Run(id) => self.run_current(id),
            Admitted::RunAfter { id, current } => {
                debug!("CompleteUpdate[#{}] queued behind {}", id, current.label);
                // Runs regardless of how the current update ended
                let _ = current.completion.wait();
                self.run_current(id)
            }
            Admitted::Join(ticket) => {
                ControllerStats::inc(&self.stats.coalesced);
                debug!("Complete update merged into {}", ticket.label);
                self.wait_for(&ticket)
            }
        }
    }

    fn admit(&self, update: Arc<dyn ContentCacheUpdate>) -> Admitted {
        let mut admission = self.admission.lock();

        let Some((state, current)) = live(admission.current.as_ref()) else {
            let slot = Slot::new(self.slot_ids.fetch_add(1, Ordering::Relaxed), update);
            let id = slot.id();
            admission.current = Some(slot);
            return Admitted::Run(id);
        };
        if state == SlotState::Waiting {
            return Admitted::Join(current);
        }

        match live(admission.next.as_ref()) {
            Some((_, next)) => Admitted::Join(next),
            None => {
                let slot = Slot::new(self.slot_ids.fetch_add(1, Ordering::Relaxed), update);
                let id = slot.id();
                admission.next = Some(slot);
                Admitted::RunAfter { id, current }
            }
        }
    }

    fn wait_for(&self, ticket: &Ticket) -> Result<()> {
        let outcome = match self.wait_timeout {
            None => ticket.completion.wait(),
            Some(timeout) => ticket.completion.wait_timeout(timeout).ok_or_else(|| {
                Error::WaitTimeout {
                    update: ticket.label.clone(),
                    waited: timeout,
                }
            })?,
        };
        outcome.map_err(|cause| Error::update_failed(ticket.label.clone(), cause))
    }

    /// Execute the current slot, which must be `id` and still waiting
    fn run_current(&self, id: u64) -> Result<()> {
        let (update, ticket) = {
            let mut admission = self.admission.lock();
            let slot = admission
                .current
                .as_mut()
                .filter(|s| s.id() == id)
                .ok_or_else(|| {
                    Error::illegal_state(format!("CompleteUpdate[#{id}] is not the current update"))
                })?;
            slot.transition(SlotState::Running)?;
            (slot.update(), slot.ticket())
        };

        info!("Starting {}", ticket.label);
        let mut working = ContentCache::clone(&self.get_cache());
        update.reset();
        if let Err(e) = update.execute(&mut working) {
            return Err(self.fail(id, &ticket, e));
        }

        {
            let _guard = self.mutation.lock();
            let buffered = {
                let mut admission = self.admission.lock();
                match admission.current.as_mut().filter(|s| s.id() == id) {
                    Some(slot) => slot
                        .transition(SlotState::ApplyingUpdates)
                        .map(|()| slot.drain_buffered()),
                    None => Err(Error::illegal_state(format!(
                        "{} lost its slot while running",
                        ticket.label
                    ))),
                }
            };
            let buffered = match buffered {
                Ok(buffered) => buffered,
                Err(e) => return Err(self.fail(id, &ticket, e)),
            };

            if !buffered.is_empty() {
                debug!(
                    "Replaying {} partial updates on {}",
                    buffered.len(),
                    ticket.label
                );
            }
            for partial in buffered {
                partial.reset();
                match partial.execute(&mut working) {
                    Ok(()) => ControllerStats::inc(&self.stats.replayed),
                    Err(e) => {
                        ControllerStats::inc(&self.stats.replay_failures);
                        warn!("Replaying {:?} on {} failed: {}", partial, ticket.label, e);
                    }
                }
            }

            self.publish_locked(working);
            self.initialized.store(true, Ordering::Release);
            self.finish(id, SlotState::Finished);
        }

        ticket.completion.resolve(Ok(()));
        ControllerStats::inc(&self.stats.complete_updates);
        info!("Finished {}", ticket.label);
        Ok(())
    }

    fn fail(&self, id: u64, ticket: &Ticket, error: Error) -> Error {
        let cause = Arc::new(error);
        ControllerStats::inc(&self.stats.complete_failures);
        warn!("{} failed: {}", ticket.label, cause);
        self.finish(id, SlotState::Failed);
        ticket.completion.resolve(Err(Arc::clone(&cause)));
        Error::update_failed(ticket.label.clone(), cause)
    }

    /// Move the current slot to its terminal state and promote `next`
    fn finish(&self, id: u64, terminal: SlotState) {
        let mut admission = self.admission.lock();
        match admission.current.as_mut() {
            Some(slot) if slot.id() == id => {
                if let Err(e) = slot.transition(terminal) {
                    error!("{}", e);
                }
            }
            _ => {
                error!("CompleteUpdate[#{}] finished but is not the current update", id);
                return;
            }
        }
        admission.current = admission.next.take();
        if let Some(next) = &admission.current {
            trace!("{} promoted to current", next.label());
        }
    }
}

impl UpdateTarget for ContentCacheController {
    fn run_scheduled_update(&self) -> Result<()> {
        self.update_from_datasource()
    }
}
