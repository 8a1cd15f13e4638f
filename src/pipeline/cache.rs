//! Interval-keyed memoization store of one pipeline stage.
//!
//! Entries never overlap. A freshly computed state whose content matches a
//! cached neighbour (same root data object, same status) is merged with it
//! into one longer validity interval; a state with different content
//! replaces whatever part of the existing entries it covers.
//!
//! Besides the entries, the cache tracks the computations currently in
//! flight so that concurrent requests for the same interval share one task,
//! and a revision counter that lets late results detect that the cache was
//! invalidated while they were being computed.

use crate::concurrent::{SharedFuture, TaskId, WeakFuture};
use crate::config::CacheSettings;
use crate::pipeline::flow_state::PipelineFlowState;
use crate::types::{TimeInterval, TimePoint};

/// Lifecycle state of a cache instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CacheStatus {
    #[default]
    Empty,
    Populated,
    /// Content was dropped because an upstream dependency changed.
    Invalidated,
    /// Content was installed from outside instead of being computed.
    Overridden,
}

/// How many entries a cache may keep.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
    /// `None` keeps every entry (trajectory caching).
    pub max_entries: Option<usize>,
}

impl CachePolicy {
    pub fn unbounded() -> Self {
        Self { max_entries: None }
    }

    pub fn bounded(max_entries: usize) -> Self {
        Self {
            max_entries: Some(max_entries.max(1)),
        }
    }

    pub fn from_settings(settings: &CacheSettings) -> Self {
        if settings.trajectory_caching {
            Self::unbounded()
        } else {
            Self::bounded(settings.max_entries)
        }
    }
}

impl Default for CachePolicy {
    fn default() -> Self {
        Self::bounded(4)
    }
}

#[derive(Debug, Clone)]
struct CacheEntry {
    state: PipelineFlowState,
    /// Insertion order; the highest value is the primary entry.
    seq: u64,
}

impl CacheEntry {
    fn interval(&self) -> TimeInterval {
        self.state.validity()
    }
}

struct PendingRequest {
    interval: TimeInterval,
    task: TaskId,
    future: WeakFuture<PipelineFlowState>,
}

pub struct PipelineCache {
    entries: Vec<CacheEntry>,
    next_seq: u64,
    policy: CachePolicy,
    status: CacheStatus,
    revision: u64,
    preliminary: PipelineFlowState,
    pending: Vec<PendingRequest>,
}

impl PipelineCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            entries: Vec::new(),
            next_seq: 0,
            policy,
            status: CacheStatus::Empty,
            revision: 0,
            preliminary: PipelineFlowState::default(),
            pending: Vec::new(),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn set_policy(&mut self, policy: CachePolicy) {
        self.policy = policy;
        self.evict();
    }

    pub fn status(&self) -> CacheStatus {
        self.status
    }

    /// Bumped by every invalidation, reset and override.
    pub fn revision(&self) -> u64 {
        self.revision
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Validity intervals of all entries, sorted by start time.
    pub fn intervals(&self) -> Vec<TimeInterval> {
        let mut intervals: Vec<_> = self.entries.iter().map(CacheEntry::interval).collect();
        intervals.sort_by_key(TimeInterval::start);
        intervals
    }

    pub fn entries(&self) -> impl Iterator<Item = &PipelineFlowState> {
        self.entries.iter().map(|entry| &entry.state)
    }

    // ── Lookup ──

    /// A cached state whose validity contains `interval`.
    pub fn lookup(&self, interval: &TimeInterval) -> Option<&PipelineFlowState> {
        self.entries
            .iter()
            .find(|entry| entry.interval().contains(interval))
            .map(|entry| &entry.state)
    }

    pub fn lookup_time(&self, time: TimePoint) -> Option<&PipelineFlowState> {
        self.lookup(&TimeInterval::instant(time))
    }

    /// Most recently inserted or installed state. Survives invalidation.
    pub fn preliminary(&self) -> &PipelineFlowState {
        &self.preliminary
    }

    pub fn set_preliminary(&mut self, state: PipelineFlowState) {
        self.preliminary = state;
    }

    // ── Insertion ──

    /// Merge a freshly computed state into the cache.
    ///
    /// Returns `false` if the state had an empty validity and was not cached.
    pub fn insert(&mut self, state: PipelineFlowState) -> bool {
        self.preliminary = state.clone();
        let mut merged = state.validity();
        if merged.is_empty() {
            tracing::debug!("Not caching state with empty validity");
            return false;
        }

        // Absorb neighbours with identical content until nothing touches.
        while let Some(index) = self
            .entries
            .iter()
            .position(|entry| entry.interval().touches(&merged) && entry.state.same_content(&state))
        {
            let absorbed = self.entries.swap_remove(index);
            tracing::debug!(
                "Merging cache entry {} into {}",
                absorbed.interval(),
                merged
            );
            merged = merged.hull(&absorbed.interval());
        }

        self.cut_out(&merged);

        let mut state = state;
        state.set_validity(merged);
        let seq = self.bump_seq();
        self.entries.push(CacheEntry { state, seq });
        self.evict();
        self.status = CacheStatus::Populated;
        true
    }

    /// Forcibly install `state` for `interval`, replacing whatever the cache
    /// holds there. In-flight computations will not be cached.
    pub fn override_cache(&mut self, state: PipelineFlowState, interval: TimeInterval) {
        let mut state = state;
        state.set_validity(interval);
        self.preliminary = state.clone();
        self.revision += 1;
        self.pending.clear();
        self.status = CacheStatus::Overridden;
        if interval.is_empty() {
            return;
        }
        self.cut_out(&interval);
        let seq = self.bump_seq();
        self.entries.push(CacheEntry { state, seq });
        self.evict();
        tracing::debug!("Cache overridden for {}", interval);
    }

    /// Remove `interval` from every entry, splitting entries that straddle it.
    fn cut_out(&mut self, interval: &TimeInterval) {
        let mut kept = Vec::with_capacity(self.entries.len() + 1);
        for entry in self.entries.drain(..) {
            if !entry.interval().overlaps(interval) {
                kept.push(entry);
                continue;
            }
            for piece in entry.interval().subtract(interval) {
                let mut state = entry.state.clone();
                state.set_validity(piece);
                kept.push(CacheEntry {
                    state,
                    seq: entry.seq,
                });
            }
        }
        self.entries = kept;
    }

    fn bump_seq(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn evict(&mut self) {
        let Some(max) = self.policy.max_entries else {
            return;
        };
        while self.entries.len() > max {
            let Some(oldest) = self
                .entries
                .iter()
                .enumerate()
                .min_by_key(|(_, entry)| entry.seq)
                .map(|(index, _)| index)
            else {
                break;
            };
            let evicted = self.entries.swap_remove(oldest);
            tracing::trace!("Evicted cache entry {}", evicted.interval());
        }
    }

    // ── Invalidation ──

    /// Drop all content outside `keep`.
    pub fn invalidate(&mut self, keep: &TimeInterval) {
        let before = self.entries.len();
        let mut changed = false;
        self.entries.retain_mut(|entry| {
            let trimmed = entry.interval().intersection(keep);
            if trimmed != entry.interval() {
                changed = true;
            }
            entry.state.set_validity(trimmed);
            !trimmed.is_empty()
        });
        self.revision += 1;
        self.pending.clear();
        if changed {
            tracing::debug!(
                "Cache invalidated ({} of {} entries kept, keep {})",
                self.entries.len(),
                before,
                keep
            );
            self.status = CacheStatus::Invalidated;
        }
    }

    /// Drop everything except the preliminary state.
    pub fn reset(&mut self) {
        self.entries.clear();
        self.pending.clear();
        self.revision += 1;
        self.status = CacheStatus::Empty;
    }

    // ── In-flight computations ──

    /// Attach to a computation already running for an overlapping interval.
    pub fn find_pending(&mut self, interval: &TimeInterval) -> Option<SharedFuture<PipelineFlowState>> {
        self.pending.retain(|request| request.future.is_alive());
        self.pending
            .iter()
            .filter(|request| request.interval.overlaps(interval))
            .find_map(|request| request.future.upgrade())
    }

    pub fn register_pending(
        &mut self,
        interval: TimeInterval,
        task: TaskId,
        future: WeakFuture<PipelineFlowState>,
    ) {
        self.pending.push(PendingRequest {
            interval,
            task,
            future,
        });
    }

    pub fn complete_pending(&mut self, task: TaskId) {
        self.pending.retain(|request| request.task != task);
    }

    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }
}

impl Default for PipelineCache {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}

impl Clone for PipelineCache {
    /// Copies the policy only. Cached content belongs to the original stage.
    fn clone(&self) -> Self {
        Self::new(self.policy)
    }
}
