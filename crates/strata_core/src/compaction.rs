//! Background compaction.
//!
//! Rolled writable segments are rebuilt into compressed readonly segments,
//! and readonly segments carrying too many deleted rows are rebuilt without
//! them. A rebuild works from a snapshot of its source segments while they
//! stay readable and mutable:
//!
//! 1. The sources move to [`SegmentState::Flushing`] and start booking
//!    mutations.
//! 2. Live rows of the snapshot are copied into a new readonly segment,
//!    built in a staging directory and published by rename.
//! 3. Under the table write lock, the booked mutations are replayed onto
//!    the new segment, the manifest is saved and the segment list swapped.
//!
//! Any failure before the swap leaves the sources live and unchanged.

use crate::error::{CoreError, CoreResult};
use crate::manifest::segment_dir_name;
use crate::segment::{BookedOp, DeletionBitmap, Segment, SegmentBuilder};
use crate::store::BuildOptions;
use crate::table::TableShared;
use crate::types::{SegmentId, SegmentKind, SegmentState};
use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::fs;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, error, info, warn};

/// How often idle workers check for aged segments and purge candidates.
const SWEEP_INTERVAL: Duration = Duration::from_millis(200);

/// Rows copied between cancellation checks.
const CANCEL_CHECK_ROWS: u32 = 4096;

/// Cooperative stop signal for background work.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    /// Creates a token that is not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Running rebuilds abort at the next check.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Returns true once [`CancellationToken::cancel`] has been called.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

#[derive(Debug, Default)]
struct Queue {
    jobs: VecDeque<SegmentId>,
    stopping: bool,
}

#[derive(Debug, Default)]
struct ServiceInner {
    queue: Mutex<Queue>,
    wake: Condvar,
}

impl ServiceInner {
    fn push(&self, id: SegmentId) -> bool {
        let mut queue = self.queue.lock();
        if queue.stopping || queue.jobs.contains(&id) {
            return false;
        }
        queue.jobs.push_back(id);
        drop(queue);
        self.wake.notify_one();
        true
    }

    /// Waits for a job. `Ok(None)` means the sweep interval elapsed and
    /// `Err(())` that the service is stopping.
    fn next_job(&self) -> Result<Option<SegmentId>, ()> {
        let mut queue = self.queue.lock();
        loop {
            if queue.stopping {
                return Err(());
            }
            if let Some(id) = queue.jobs.pop_front() {
                return Ok(Some(id));
            }
            if self.wake.wait_for(&mut queue, SWEEP_INTERVAL).timed_out() {
                return if queue.stopping { Err(()) } else { Ok(None) };
            }
        }
    }
}

/// Pool of compaction worker threads for one table.
#[derive(Debug)]
pub(crate) struct CompactionService {
    inner: Arc<ServiceInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl CompactionService {
    /// Spawns [`crate::TableConfig::compaction_threads`] workers.
    pub(crate) fn start(shared: &Arc<TableShared>) -> Self {
        let inner = Arc::new(ServiceInner::default());
        let mut workers = Vec::with_capacity(shared.config.compaction_threads);
        for n in 0..shared.config.compaction_threads {
            let inner = Arc::clone(&inner);
            let table = Arc::downgrade(shared);
            let spawned = std::thread::Builder::new()
                .name(format!("strata-compact-{n}"))
                .spawn(move || worker_loop(&inner, &table));
            match spawned {
                Ok(handle) => workers.push(handle),
                Err(err) => warn!(error = %err, "failed to spawn compaction worker"),
            }
        }
        Self {
            inner,
            workers: Mutex::new(workers),
        }
    }

    /// Queues a segment for compaction. Duplicates are ignored.
    pub(crate) fn enqueue(&self, id: SegmentId) {
        if self.inner.push(id) {
            debug!(segment = %id, "queued for compaction");
        }
    }

    /// Drops queued jobs, lets running ones finish and joins the workers.
    pub(crate) fn shutdown(&self) {
        {
            let mut queue = self.inner.queue.lock();
            queue.stopping = true;
            queue.jobs.clear();
        }
        self.inner.wake.notify_all();
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                error!("compaction worker panicked");
            }
        }
    }
}

fn worker_loop(inner: &ServiceInner, table: &Weak<TableShared>) {
    while let Ok(job) = inner.next_job() {
        let Some(shared) = table.upgrade() else {
            return;
        };
        if shared.closed.load(Ordering::Acquire) || shared.config.cancel.is_cancelled() {
            return;
        }
        match job {
            Some(id) => run_job(&shared, id),
            None => sweep(&shared, inner),
        }
    }
}

fn run_job(shared: &TableShared, id: SegmentId) {
    let seg = shared
        .state
        .read()
        .segments
        .iter()
        .find(|s| s.id() == id)
        .cloned();
    let Some(seg) = seg else {
        debug!(segment = %id, "queued segment is gone");
        return;
    };
    if is_candidate(shared, &seg) {
        // Failures are logged and counted by `rebuild`.
        let _ = rebuild(shared, &[seg]);
    }
}

/// Rolls an aged writable segment and queues purge candidates.
fn sweep(shared: &TableShared, inner: &ServiceInner) {
    if !shared.config.auto_compact {
        return;
    }
    match shared.roll(false) {
        Ok(Some(rolled)) => {
            inner.push(rolled.id());
        }
        Ok(None) => {}
        Err(err) => warn!(error = %err, "failed to roll aged segment"),
    }
    let snapshot = shared.snapshot();
    for seg in &snapshot.segments {
        if seg.kind() == SegmentKind::Readonly && is_candidate(shared, seg) {
            inner.push(seg.id());
        }
    }
}

/// Returns true if `seg` should be rebuilt: a rolled writable segment with
/// rows, or a readonly segment whose deleted fraction exceeds the purge
/// ratio.
pub(crate) fn is_candidate(shared: &TableShared, seg: &Arc<Segment>) -> bool {
    match (seg.kind(), seg.state()) {
        (SegmentKind::Writable, SegmentState::Writable) => {
            let state = shared.state.read();
            let is_current = state.segments.last().is_some_and(|s| Arc::ptr_eq(s, seg));
            !is_current && seg.num_rows() > 0
        }
        (SegmentKind::Readonly, SegmentState::Readonly) => {
            let rows = seg.num_rows();
            let ratio = seg.num_deleted() as f64 / f64::from(rows.max(1));
            rows > 0 && ratio > shared.config.purge_delete_ratio
        }
        _ => false,
    }
}

/// What a source looked like when its rebuild started.
struct SourceSnapshot {
    seg: Arc<Segment>,
    rows: u32,
    deletion: DeletionBitmap,
}

impl SourceSnapshot {
    fn live_rows(&self) -> u32 {
        self.rows - self.deletion.len() as u32
    }
}

/// Rebuilds the contiguous segments `sources` into one readonly segment.
///
/// Returns `Ok(false)` if another rebuild already claimed one of them.
///
/// # Errors
///
/// Returns [`CoreError::CompactionAborted`] if the rebuild fails; the
/// sources stay in place.
pub(crate) fn rebuild(shared: &TableShared, sources: &[Arc<Segment>]) -> CoreResult<bool> {
    let Some(first) = sources.first().map(|s| s.id()) else {
        return Ok(false);
    };
    let mut claimed: Vec<(Arc<Segment>, SegmentState)> = Vec::with_capacity(sources.len());
    for seg in sources {
        let prior = match seg.kind() {
            SegmentKind::Writable => SegmentState::Writable,
            SegmentKind::Readonly => SegmentState::Readonly,
        };
        if !seg.transition(prior, SegmentState::Flushing) {
            for (seg, prior) in &claimed {
                seg.set_state(*prior);
            }
            debug!(segment = %seg.id(), "segment already claimed");
            return Ok(false);
        }
        claimed.push((Arc::clone(seg), prior));
    }

    let mut snapshots = Vec::with_capacity(claimed.len());
    let result = start_sources(&claimed, &mut snapshots)
        .and_then(|()| build(shared, &snapshots))
        .and_then(|built| swap(shared, &snapshots, built));
    match result {
        Ok(()) => Ok(true),
        Err(err) => {
            error!(segment = %first, error = %err, "compaction aborted");
            for (seg, prior) in &claimed {
                seg.finish_booking();
                seg.set_state(*prior);
            }
            shared.stats.record_compaction_failure();
            Err(CoreError::compaction_aborted(first, err.to_string()))
        }
    }
}

fn start_sources(
    claimed: &[(Arc<Segment>, SegmentState)],
    out: &mut Vec<SourceSnapshot>,
) -> CoreResult<()> {
    for (seg, _) in claimed {
        let (rows, deletion) = seg.start_booking()?;
        out.push(SourceSnapshot {
            seg: Arc::clone(seg),
            rows,
            deletion,
        });
    }
    Ok(())
}

fn check_cancel(shared: &TableShared) -> CoreResult<()> {
    if shared.config.cancel.is_cancelled() {
        Err(CoreError::invalid_operation("compaction cancelled"))
    } else {
        Ok(())
    }
}

/// Copies live snapshot rows into a new published readonly segment.
fn build(shared: &TableShared, sources: &[SourceSnapshot]) -> CoreResult<Option<Arc<Segment>>> {
    check_cancel(shared)?;
    let estimate: u64 = sources.iter().map(|s| s.seg.data_size()).sum();
    let _grant = shared.config.memory_limit.request(estimate);

    let mut builder = SegmentBuilder::new(Arc::clone(&shared.schema));
    for source in sources {
        for sub_id in 0..source.rows {
            if source.deletion.contains(sub_id) {
                continue;
            }
            if sub_id % CANCEL_CHECK_ROWS == 0 {
                check_cancel(shared)?;
            }
            builder.push_colgroups(&source.seg.read_colgroups(sub_id)?)?;
        }
    }
    if builder.num_rows() == 0 {
        return Ok(None);
    }

    let id = {
        let _guard = shared.write_lock.lock();
        let (id, manifest) = {
            let mut state = shared.state.write();
            let id = state.allocate_segment_id();
            (id, state.manifest())
        };
        shared.dir.save_manifest(&manifest)?;
        id
    };
    let temp = shared.dir.segment_temp_path(SegmentKind::Readonly, id);
    let dest = shared.dir.segment_path(SegmentKind::Readonly, id);
    let options = BuildOptions::from(&shared.config);
    builder.finish(&temp, &dest, id, &options, shared.config.sync_on_flush)?;
    let opened = Segment::open(
        &dest,
        SegmentKind::Readonly,
        id,
        &shared.schema,
        shared.config.populate_mappings,
    );
    match opened {
        Ok(seg) => Ok(Some(Arc::new(seg))),
        Err(err) => {
            if let Err(e) = fs::remove_dir_all(&dest) {
                warn!(path = %dest.display(), error = %e, "failed to remove unopenable segment");
            }
            Err(err)
        }
    }
}

/// Replays booked mutations onto `built` and swaps it in for the sources.
fn swap(
    shared: &TableShared,
    sources: &[SourceSnapshot],
    built: Option<Arc<Segment>>,
) -> CoreResult<()> {
    let _guard = shared.write_lock.lock();
    let result = replay_and_swap(shared, sources, built.as_ref());
    if result.is_err() {
        if let Some(seg) = &built {
            seg.retire();
        }
        return result;
    }

    let sync = shared.config.sync_on_flush;
    let mut total_rows = 0u64;
    for source in sources {
        total_rows += u64::from(source.rows);
        shared
            .sizes
            .remove_from_cache(&segment_dir_name(source.seg.kind(), source.seg.id()));
        source.seg.retire();
    }
    let (new_id, new_rows) = match &built {
        Some(seg) => {
            if let Err(err) = seg.flush(sync) {
                warn!(segment = %seg.id(), error = %err, "failed to flush compacted segment");
            }
            let name = segment_dir_name(seg.kind(), seg.id());
            shared.sizes.store_to_cache(&name, seg.live_rows(), seg.data_size());
            (Some(seg.id()), u64::from(seg.num_rows()))
        }
        None => (None, 0),
    };
    if let Err(err) = shared.sizes.sync_cache(sync) {
        warn!(error = %err, "failed to persist size cache");
    }
    shared.stats.record_compaction(total_rows - new_rows);
    info!(
        sources = ?sources.iter().map(|s| s.seg.id()).collect::<Vec<_>>(),
        replacement = ?new_id,
        rows = new_rows,
        purged = total_rows - new_rows,
        "compacted segments"
    );
    Ok(())
}

fn replay_and_swap(
    shared: &TableShared,
    sources: &[SourceSnapshot],
    built: Option<&Arc<Segment>>,
) -> CoreResult<()> {
    let mut offset = 0u32;
    for source in sources {
        for op in source.seg.finish_booking() {
            let sub_id = match &op {
                BookedOp::Remove(sub_id) | BookedOp::UpdateColgroup { sub_id, .. } => *sub_id,
            };
            let Some(compacted) = source.deletion.compacted_id(sub_id) else {
                continue;
            };
            let Some(seg) = built else {
                continue;
            };
            let target = offset + compacted;
            match op {
                BookedOp::Remove(_) => seg.remove(target)?,
                BookedOp::UpdateColgroup {
                    colgroup, value, ..
                } => seg.update_colgroup(target, colgroup, &value)?,
            }
        }
        offset += source.live_rows();
    }

    // Callers hold the write lock, so the segment list only changes here.
    let (segments, manifest) = {
        let state = shared.state.read();
        let first = sources[0].seg.id();
        let pos = state
            .segments
            .iter()
            .position(|s| s.id() == first)
            .ok_or_else(|| CoreError::invalid_operation(format!("{first} left the table")))?;
        let end = pos + sources.len();
        let contiguous = end <= state.segments.len()
            && state.segments[pos..end]
                .iter()
                .zip(sources)
                .all(|(a, b)| Arc::ptr_eq(a, &b.seg));
        if !contiguous {
            return Err(CoreError::invalid_operation("compaction sources are not contiguous"));
        }
        let mut segments = Vec::with_capacity(state.segments.len() + 1 - sources.len());
        segments.extend_from_slice(&state.segments[..pos]);
        segments.extend(built.cloned());
        segments.extend_from_slice(&state.segments[end..]);
        let manifest = state.manifest_with(&segments, state.generation + 1);
        (segments, manifest)
    };
    shared.dir.save_manifest(&manifest)?;

    let mut state = shared.state.write();
    state.segments = segments;
    state.generation += 1;
    state.recompute_row_nums();
    Ok(())
}
