// src/comm.rs
//
// SPMD message-passing runtime.
//
// Each worker runs on its own OS thread and owns all of its data; the only way workers
// interact is by sending `Vec<f64>` payloads over channels. Messages are matched by
// (source, tag) and are non-overtaking per (source, destination) pair, so two ranks that
// call the same sequence of operations always pair up the right messages.
//
// Collectives are rooted at rank 0 and combine contributions in rank order, which makes
// every reduction deterministic for a given worker count.
//
// When a worker fails (error or panic) it raises a shared abort flag; peers blocked in
// `recv` notice it on their next poll and return `MgError::Comm` instead of hanging.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender, channel};
use std::time::Duration;

use log::{debug, trace};

use crate::error::{MgError, MgResult};
use crate::topology::Face;

/// How long a blocked receive waits before re-checking the abort flag.
const ABORT_POLL: Duration = Duration::from_millis(50);

/// Message kind, used together with the source rank to match receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    /// Face data for the ghost layer on `face` of the receiver, level `level`.
    Halo { level: usize, face: Face },
    Reduce,
    Broadcast,
    /// Interior block of level `level` on its way to rank 0.
    Gather { level: usize },
    /// Interior block of level `level` on its way back from rank 0.
    Scatter { level: usize },
    /// Extremum candidates while placing the source charges.
    Charges,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReduceOp {
    Sum,
    Max,
}

impl ReduceOp {
    fn combine(self, acc: &mut [f64], part: &[f64]) {
        for (a, p) in acc.iter_mut().zip(part) {
            match self {
                ReduceOp::Sum => *a += p,
                ReduceOp::Max => *a = a.max(*p),
            }
        }
    }
}

struct Envelope {
    src: usize,
    tag: Tag,
    payload: Vec<f64>,
}

/// Traffic counters for one worker.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CommStats {
    pub messages_sent: u64,
    pub values_sent: u64,
}

/// One worker's endpoint.
pub struct Communicator {
    rank: usize,
    size: usize,
    outboxes: Vec<Sender<Envelope>>,
    inbox: Receiver<Envelope>,
    /// Arrived messages nobody asked for yet, in arrival order.
    pending: VecDeque<Envelope>,
    abort: Arc<AtomicBool>,
    stats: CommStats,
}

impl Communicator {
    pub fn rank(&self) -> usize {
        self.rank
    }

    pub fn size(&self) -> usize {
        self.size
    }

    pub fn is_root(&self) -> bool {
        self.rank == 0
    }

    pub fn stats(&self) -> CommStats {
        self.stats
    }

    /// Signal every worker to stop waiting.
    pub fn raise_abort(&self) {
        self.abort.store(true, Ordering::Release);
    }

    /// Non-blocking send (channels are unbounded). Sending to oneself is allowed.
    pub fn send(&mut self, dst: usize, tag: Tag, payload: Vec<f64>) -> MgResult<()> {
        trace!(
            "rank {} -> {}: {:?} ({} values)",
            self.rank,
            dst,
            tag,
            payload.len()
        );
        self.stats.messages_sent += 1;
        self.stats.values_sent += payload.len() as u64;
        let env = Envelope {
            src: self.rank,
            tag,
            payload,
        };
        self.outboxes[dst]
            .send(env)
            .map_err(|_| MgError::comm(self.rank, format!("rank {dst} is no longer running")))
    }

    /// Block until the message `(src, tag)` arrives.
    pub fn recv(&mut self, src: usize, tag: Tag) -> MgResult<Vec<f64>> {
        if let Some(pos) = self
            .pending
            .iter()
            .position(|e| e.src == src && e.tag == tag)
        {
            if let Some(env) = self.pending.remove(pos) {
                return Ok(env.payload);
            }
        }

        loop {
            match self.inbox.recv_timeout(ABORT_POLL) {
                Ok(env) if env.src == src && env.tag == tag => return Ok(env.payload),
                Ok(env) => self.pending.push_back(env),
                Err(RecvTimeoutError::Timeout) => {
                    if self.abort.load(Ordering::Acquire) {
                        return Err(MgError::comm(
                            self.rank,
                            format!("aborted while waiting for {tag:?} from rank {src}"),
                        ));
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(MgError::comm(self.rank, "all peers disconnected"));
                }
            }
        }
    }

    /// Element-wise reduction of `values` over all ranks; every rank gets the result.
    pub fn allreduce(&mut self, values: &[f64], op: ReduceOp) -> MgResult<Vec<f64>> {
        if self.size == 1 {
            return Ok(values.to_vec());
        }
        if self.is_root() {
            let mut acc = values.to_vec();
            for src in 1..self.size {
                let part = self.recv(src, Tag::Reduce)?;
                if part.len() != acc.len() {
                    return Err(MgError::comm(
                        self.rank,
                        format!(
                            "reduction length mismatch from rank {src}: {} vs {}",
                            part.len(),
                            acc.len()
                        ),
                    ));
                }
                op.combine(&mut acc, &part);
            }
            self.broadcast(Some(acc))
        } else {
            self.send(0, Tag::Reduce, values.to_vec())?;
            self.broadcast(None)
        }
    }

    pub fn allreduce_sum(&mut self, value: f64) -> MgResult<f64> {
        Ok(self.allreduce(&[value], ReduceOp::Sum)?[0])
    }

    pub fn allreduce_max(&mut self, value: f64) -> MgResult<f64> {
        Ok(self.allreduce(&[value], ReduceOp::Max)?[0])
    }

    /// Distribute rank 0's payload to everyone. Non-root ranks pass `None`.
    pub fn broadcast(&mut self, payload: Option<Vec<f64>>) -> MgResult<Vec<f64>> {
        if self.is_root() {
            let payload = payload.unwrap_or_default();
            for dst in 1..self.size {
                self.send(dst, Tag::Broadcast, payload.clone())?;
            }
            Ok(payload)
        } else {
            self.recv(0, Tag::Broadcast)
        }
    }

    /// Collect one payload per rank on rank 0, in rank order.
    pub fn gather(&mut self, tag: Tag, payload: Vec<f64>) -> MgResult<Option<Vec<Vec<f64>>>> {
        if self.is_root() {
            let mut parts = Vec::with_capacity(self.size);
            parts.push(payload);
            for src in 1..self.size {
                parts.push(self.recv(src, tag)?);
            }
            Ok(Some(parts))
        } else {
            self.send(0, tag, payload)?;
            Ok(None)
        }
    }

    /// Hand part `r` of rank 0's `parts` to rank `r`. Non-root ranks pass `None`.
    pub fn scatter(&mut self, tag: Tag, parts: Option<Vec<Vec<f64>>>) -> MgResult<Vec<f64>> {
        if self.is_root() {
            let parts = parts.unwrap_or_default();
            if parts.len() != self.size {
                return Err(MgError::comm(
                    self.rank,
                    format!("scatter needs {} parts, got {}", self.size, parts.len()),
                ));
            }
            let mut own = Vec::new();
            for (dst, part) in parts.into_iter().enumerate() {
                if dst == 0 {
                    own = part;
                } else {
                    self.send(dst, tag, part)?;
                }
            }
            Ok(own)
        } else {
            self.recv(0, tag)
        }
    }

    pub fn barrier(&mut self) -> MgResult<()> {
        self.allreduce(&[], ReduceOp::Sum).map(|_| ())
    }
}

struct AbortOnUnwind(Arc<AtomicBool>);

impl Drop for AbortOnUnwind {
    fn drop(&mut self) {
        if std::thread::panicking() {
            self.0.store(true, Ordering::Release);
        }
    }
}

/// Run `worker` on `nranks` threads, each with its own `Communicator`.
///
/// Returns the per-rank results in rank order. If any worker fails, the error of the
/// worker that failed first-hand is returned (not the secondary aborts of its peers).
pub fn run_spmd<T, F>(nranks: usize, worker: F) -> MgResult<Vec<T>>
where
    T: Send,
    F: Fn(&mut Communicator) -> MgResult<T> + Sync,
{
    if nranks == 0 {
        return Err(MgError::topology("at least one worker is required"));
    }

    let abort = Arc::new(AtomicBool::new(false));
    let (senders, inboxes): (Vec<Sender<Envelope>>, Vec<Receiver<Envelope>>) =
        (0..nranks).map(|_| channel()).unzip();

    let comms: Vec<Communicator> = inboxes
        .into_iter()
        .enumerate()
        .map(|(rank, inbox)| Communicator {
            rank,
            size: nranks,
            outboxes: senders.clone(),
            inbox,
            pending: VecDeque::new(),
            abort: Arc::clone(&abort),
            stats: CommStats::default(),
        })
        .collect();
    drop(senders);

    debug!("starting {nranks} worker threads");

    let worker = &worker;
    let results: Vec<MgResult<T>> = std::thread::scope(|scope| {
        let mut handles = Vec::with_capacity(nranks);
        let mut spawn_error = None;

        for mut comm in comms {
            let rank = comm.rank;
            let spawned = std::thread::Builder::new()
                .name(format!("mg-rank-{rank}"))
                .spawn_scoped(scope, move || {
                    let _guard = AbortOnUnwind(Arc::clone(&comm.abort));
                    let out = worker(&mut comm);
                    if out.is_err() {
                        comm.raise_abort();
                    }
                    out
                });
            match spawned {
                Ok(h) => handles.push(h),
                Err(e) => {
                    abort.store(true, Ordering::Release);
                    spawn_error = Some(MgError::Io(e));
                    break;
                }
            }
        }

        let mut out: Vec<MgResult<T>> = handles
            .into_iter()
            .enumerate()
            .map(|(rank, h)| {
                h.join()
                    .unwrap_or_else(|_| Err(MgError::comm(rank, "worker panicked")))
            })
            .collect();
        if let Some(e) = spawn_error {
            out.push(Err(e));
        }
        out
    });

    let mut values = Vec::with_capacity(nranks);
    let mut first_err: Option<MgError> = None;
    for r in results {
        match r {
            Ok(v) => values.push(v),
            Err(e) => {
                let replace = match &first_err {
                    None => true,
                    Some(prev) => prev.is_peer_abort() && !e.is_peer_abort(),
                };
                if replace {
                    first_err = Some(e);
                }
            }
        }
    }
    match first_err {
        Some(e) => Err(e),
        None => Ok(values),
    }
}
