use std::collections::{HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread;

use tracing::{debug, info, warn};

use crate::backup::space::VolumeSpace;
use crate::backup::{run_backup, BackupRequest};
use crate::copy::CancelFlag;
use crate::error::{Result, VaultError};
use crate::events::{EventSink, JobEvent};
use crate::job::{JobContext, JobOutcome};
use crate::profile::AccountProbe;
use crate::restore::{run_restore, target_roots, RestoreRequest};
use crate::types::{ActionStatus, RunMode};

pub mod actions;
pub mod elevated;

pub type JobId = u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobKind {
    Backup,
    Restore,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::Backup => "backup",
            JobKind::Restore => "restore",
        }
    }

    fn slot(&self) -> usize {
        match self {
            JobKind::Backup => 0,
            JobKind::Restore => 1,
        }
    }
}

#[derive(Debug, Clone)]
pub enum JobRequest {
    Backup(BackupRequest),
    Restore(RestoreRequest),
}

impl JobRequest {
    pub fn kind(&self) -> JobKind {
        match self {
            JobRequest::Backup(_) => JobKind::Backup,
            JobRequest::Restore(_) => JobKind::Restore,
        }
    }

    /// Every tree the job reads or writes: a backup's destination and the
    /// profiles it reads, a restore's backup root and the profiles it writes.
    pub fn touched_paths(&self, probe: &dyn AccountProbe) -> Vec<PathBuf> {
        match self {
            JobRequest::Backup(req) => {
                let mut paths = vec![req.destination.clone()];
                paths.extend(req.users.iter().map(|u| u.profile_root.clone()));
                paths
            }
            JobRequest::Restore(req) => {
                let mut paths = vec![req.backup_root.clone()];
                paths.extend(target_roots(req, probe));
                paths
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum DispatchEvent {
    Queued { id: JobId, kind: JobKind },
    Started { id: JobId, kind: JobKind },
    Job { id: JobId, event: JobEvent },
    Finished(JobReport),
}

/// Terminal summary of one dispatched job.
#[derive(Debug, Clone, PartialEq)]
pub struct JobReport {
    pub id: JobId,
    pub kind: JobKind,
    pub status: ActionStatus,
    pub message: String,
    pub files_copied: u64,
    pub bytes_copied: u64,
}

impl JobReport {
    fn from_result(id: JobId, kind: JobKind, result: &Result<JobOutcome>) -> Self {
        match result {
            Ok(outcome) => Self {
                id,
                kind,
                status: outcome.status,
                message: outcome.message.clone(),
                files_copied: outcome.stats.files_copied,
                bytes_copied: outcome.stats.bytes_copied,
            },
            Err(err) => Self {
                id,
                kind,
                status: if err.is_cancelled() {
                    ActionStatus::Cancelled
                } else {
                    ActionStatus::Failed
                },
                message: err.to_string(),
                files_copied: 0,
                bytes_copied: 0,
            },
        }
    }

    fn cancelled_in_queue(id: JobId, kind: JobKind) -> Self {
        Self {
            id,
            kind,
            status: ActionStatus::Cancelled,
            message: "cancelled before start".to_string(),
            files_copied: 0,
            bytes_copied: 0,
        }
    }
}

struct Pending {
    id: JobId,
    request: JobRequest,
    paths: Vec<PathBuf>,
    cancel: CancelFlag,
}

struct Active {
    id: JobId,
    paths: Vec<PathBuf>,
    cancel: CancelFlag,
}

#[derive(Default)]
struct Slot {
    running: Option<Active>,
    queue: VecDeque<Pending>,
}

#[derive(Default)]
struct State {
    next_id: JobId,
    slots: [Slot; 2],
    statuses: HashMap<JobId, ActionStatus>,
    finished: HashMap<JobId, JobReport>,
}

impl State {
    fn set_status(&mut self, id: JobId, next: ActionStatus) {
        let current = self.statuses.get(&id).copied().unwrap_or_default();
        match current.transition(next) {
            Ok(status) => {
                self.statuses.insert(id, status);
            }
            Err(err) => warn!("job {}: {}", id, err),
        }
    }

    fn idle(&self) -> bool {
        self.slots
            .iter()
            .all(|slot| slot.running.is_none() && slot.queue.is_empty())
    }
}

struct Shared {
    state: Mutex<State>,
    changed: Condvar,
    events: Mutex<Sender<DispatchEvent>>,
    probe: Arc<dyn AccountProbe + Send + Sync>,
    space: Arc<dyn VolumeSpace + Send + Sync>,
    run_mode: RunMode,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn send(&self, event: DispatchEvent) {
        if let Ok(tx) = self.events.lock() {
            let _ = tx.send(event);
        }
    }
}

/// Runs backup and restore jobs on worker threads: at most one of each at a
/// time, further requests wait in FIFO order, and two jobs never touch
/// nested or equal paths at once.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<Shared>,
}

impl Dispatcher {
    pub fn new(
        probe: Arc<dyn AccountProbe + Send + Sync>,
        space: Arc<dyn VolumeSpace + Send + Sync>,
        run_mode: RunMode,
    ) -> (Self, Receiver<DispatchEvent>) {
        let (tx, rx) = mpsc::channel();
        let shared = Shared {
            state: Mutex::new(State::default()),
            changed: Condvar::new(),
            events: Mutex::new(tx),
            probe,
            space,
            run_mode,
        };
        (
            Self {
                shared: Arc::new(shared),
            },
            rx,
        )
    }

    pub fn submit(&self, request: JobRequest) -> JobId {
        let kind = request.kind();
        let paths = request.touched_paths(self.shared.probe.as_ref());
        let mut state = self.shared.lock();
        state.next_id += 1;
        let id = state.next_id;
        state.statuses.insert(id, ActionStatus::Idle);
        state.slots[kind.slot()].queue.push_back(Pending {
            id,
            request,
            paths,
            cancel: CancelFlag::new(),
        });
        debug!("queued {} job {}", kind.as_str(), id);
        self.shared.send(DispatchEvent::Queued { id, kind });
        self.pump(&mut state);
        id
    }

    pub fn status(&self, id: JobId) -> Option<ActionStatus> {
        self.shared.lock().statuses.get(&id).copied()
    }

    pub fn report(&self, id: JobId) -> Option<JobReport> {
        self.shared.lock().finished.get(&id).cloned()
    }

    /// Stops the running job of `kind`; queued jobs stay queued.
    pub fn cancel(&self, kind: JobKind) {
        let state = self.shared.lock();
        if let Some(active) = &state.slots[kind.slot()].running {
            info!("cancelling {} job {}", kind.as_str(), active.id);
            active.cancel.cancel();
        }
    }

    /// Cancels one job whether it is running or still queued.
    pub fn cancel_job(&self, id: JobId) -> Result<()> {
        let mut state = self.shared.lock();
        for index in 0..state.slots.len() {
            if let Some(active) = state.slots[index].running.as_ref().filter(|a| a.id == id) {
                active.cancel.cancel();
                return Ok(());
            }
            let slot = &mut state.slots[index];
            if let Some(pos) = slot.queue.iter().position(|p| p.id == id) {
                if let Some(pending) = slot.queue.remove(pos) {
                    pending.cancel.cancel();
                    let kind = pending.request.kind();
                    self.finish_unstarted(&mut state, id, kind);
                }
                return Ok(());
            }
        }
        Err(VaultError::message(format!("no active job {}", id)))
    }

    /// Cancels every running job and drops everything queued.
    pub fn cancel_all(&self) {
        let mut state = self.shared.lock();
        let mut dropped = Vec::new();
        for slot in state.slots.iter_mut() {
            if let Some(active) = &slot.running {
                active.cancel.cancel();
            }
            dropped.extend(slot.queue.drain(..).map(|p| (p.id, p.request.kind())));
        }
        for (id, kind) in dropped {
            self.finish_unstarted(&mut state, id, kind);
        }
    }

    /// Blocks until nothing is running or queued.
    pub fn wait_idle(&self) {
        let mut state = self.shared.lock();
        while !state.idle() {
            state = self
                .shared
                .changed
                .wait(state)
                .unwrap_or_else(|poisoned| poisoned.into_inner());
        }
    }

    fn finish_unstarted(&self, state: &mut State, id: JobId, kind: JobKind) {
        state.set_status(id, ActionStatus::Cancelled);
        let report = JobReport::cancelled_in_queue(id, kind);
        state.finished.insert(id, report.clone());
        self.shared.send(DispatchEvent::Finished(report));
        self.shared.changed.notify_all();
    }

    /// Starts the head of each queue whose slot is free and whose paths do
    /// not overlap the other slot's running job.
    fn pump(&self, state: &mut State) {
        for kind in [JobKind::Backup, JobKind::Restore] {
            let index = kind.slot();
            if state.slots[index].running.is_some() {
                continue;
            }
            let Some(head) = state.slots[index].queue.front() else {
                continue;
            };
            let blocked = state.slots.iter().any(|slot| {
                slot.running
                    .as_ref()
                    .is_some_and(|a| any_overlap(&a.paths, &head.paths))
            });
            if blocked {
                debug!("{} job {} waiting on a running job", kind.as_str(), head.id);
                continue;
            }
            let Some(pending) = state.slots[index].queue.pop_front() else {
                continue;
            };
            state.slots[index].running = Some(Active {
                id: pending.id,
                paths: pending.paths.clone(),
                cancel: pending.cancel.clone(),
            });
            state.set_status(pending.id, ActionStatus::Running);
            self.spawn(state, pending);
        }
    }

    fn spawn(&self, state: &mut State, pending: Pending) {
        let dispatcher = self.clone();
        let id = pending.id;
        let kind = pending.request.kind();
        self.shared.send(DispatchEvent::Started { id, kind });
        let spawned = thread::Builder::new()
            .name(format!("{}-{}", kind.as_str(), id))
            .spawn(move || dispatcher.work(pending));
        if let Err(err) = spawned {
            warn!("start {} job {}: {}", kind.as_str(), id, err);
            let result = Err(VaultError::message(format!("start worker: {}", err)));
            self.complete(state, JobReport::from_result(id, kind, &result));
        }
    }

    fn work(&self, pending: Pending) {
        let Pending {
            id,
            request,
            cancel,
            ..
        } = pending;
        let kind = request.kind();
        let sink = {
            let shared = Arc::clone(&self.shared);
            EventSink::from_fn(move |event| shared.send(DispatchEvent::Job { id, event }))
        };
        let ctx = JobContext::new(cancel, sink, self.shared.run_mode);
        let result = match request {
            JobRequest::Backup(req) => run_backup(req, &ctx, self.shared.space.as_ref()),
            JobRequest::Restore(req) => run_restore(req, &ctx, self.shared.probe.as_ref()),
        };
        let report = JobReport::from_result(id, kind, &result);
        let mut state = self.shared.lock();
        self.complete(&mut state, report);
    }

    fn complete(&self, state: &mut State, report: JobReport) {
        let index = report.kind.slot();
        if state.slots[index]
            .running
            .as_ref()
            .is_some_and(|a| a.id == report.id)
        {
            state.slots[index].running = None;
        }
        info!(
            "{} job {} finished: {}",
            report.kind.as_str(),
            report.id,
            report.status
        );
        state.set_status(report.id, report.status);
        state.finished.insert(report.id, report.clone());
        self.shared.send(DispatchEvent::Finished(report));
        self.pump(state);
        self.shared.changed.notify_all();
    }
}

fn overlaps(a: &Path, b: &Path) -> bool {
    a.starts_with(b) || b.starts_with(a)
}

fn any_overlap(running: &[PathBuf], queued: &[PathBuf]) -> bool {
    running
        .iter()
        .any(|a| queued.iter().any(|b| overlaps(a, b)))
}
