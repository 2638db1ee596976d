//! Worker pool and collective operations.
//!
//! Every component that synchronizes with other workers receives an
//! explicit [`Communicator`] rather than reaching for a process-wide
//! handle. The only implementation shipped here is [`LocalComm`], one
//! endpoint of an in-process [`LocalWorld`] where each rank runs on its
//! own scoped thread.
//!
//! All collectives are blocking: a call returns only once every
//! participant has taken part (or a peer has failed). Ranks talk over one
//! FIFO channel per ordered `(source, destination)` pair, so two
//! back-to-back collectives can never have their messages interleaved.
//!
//! # Failure model
//!
//! A worker that returns early drops its endpoint. Any rank blocked on a
//! receive from it then fails with [`CommError::Disconnected`] instead of
//! hanging, which carries the failure to every other worker in turn. An
//! optional receive timeout bounds how long a rank waits on a peer that is
//! alive but stuck.

use std::any::{Any, type_name};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use log::trace;

/// A type-erased message travelling between two ranks.
type Payload = Box<dyn Any + Send>;

/// Errors raised by collective operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CommError {
    /// The peer's endpoint was dropped before the collective completed.
    #[error("worker {peer} left the pool before the collective completed")]
    Disconnected {
        /// Rank of the missing peer.
        peer: usize,
    },

    /// No message arrived from the peer within the configured timeout.
    #[error("timed out after {after:?} waiting for worker {peer}")]
    Timeout {
        /// Rank being waited on.
        peer: usize,
        /// The configured timeout.
        after: Duration,
    },

    /// The peer sent a payload of a different type than this collective
    /// expects, meaning the two ranks are in different collectives.
    #[error("worker {peer} is out of step: expected a {expected} payload")]
    Desynchronized {
        /// Rank of the out-of-step peer.
        peer: usize,
        /// Type name this rank was waiting for.
        expected: &'static str,
    },

    /// A variable-count gather received a different number of elements
    /// than the leader's layout reserves for that rank.
    #[error("worker {peer} contributed {actual} elements, layout expects {expected}")]
    CountMismatch {
        /// Contributing rank.
        peer: usize,
        /// Element count reserved for it.
        expected: usize,
        /// Element count it sent.
        actual: usize,
    },

    /// A variable-count gather layout points past the end of the target
    /// buffer, or does not list one slot per rank.
    #[error("gather layout does not fit: {0}")]
    InvalidLayout(String),

    /// The root of a rooted collective is not a rank in the pool.
    #[error("root {root} is not a rank in a pool of {size}")]
    InvalidRoot {
        /// Requested root.
        root: usize,
        /// Pool size.
        size: usize,
    },

    /// The root of a broadcast did not supply the value to broadcast.
    #[error("broadcast root {root} has nothing to send")]
    MissingPayload {
        /// The root rank.
        root: usize,
    },

    /// A worker thread panicked.
    #[error("worker {rank} panicked")]
    WorkerPanicked {
        /// Rank of the panicked worker.
        rank: usize,
    },
}

/// Destination of a variable-count gather at the root.
///
/// Rank `i`'s contribution of `counts[i]` elements lands at
/// `buffer[offsets[i]..offsets[i] + counts[i]]`.
pub struct GatherTarget<'a, T> {
    /// Pre-allocated receive buffer.
    pub buffer: &'a mut [T],
    /// Element count expected from each rank.
    pub counts: &'a [usize],
    /// Start offset of each rank's contribution.
    pub offsets: &'a [usize],
}

/// Handle to a fixed pool of cooperating workers.
///
/// Every rooted collective must be called by every rank with the same
/// `root`; calls are matched purely by program order.
pub trait Communicator {
    /// This worker's rank in `[0, size)`.
    fn rank(&self) -> usize;

    /// Number of workers in the pool.
    fn size(&self) -> usize;

    /// Whether this worker is the leader.
    fn is_leader(&self) -> bool {
        self.rank() == crate::types::LEADER_RANK
    }

    /// Block until every worker has reached the barrier.
    ///
    /// # Errors
    ///
    /// Fails if a peer disconnects or times out.
    fn barrier(&self) -> Result<(), CommError>;

    /// Replicate `value` from `root` to every rank.
    ///
    /// The root passes `Some(value)`; other ranks pass `None` and receive
    /// their own copy.
    ///
    /// # Errors
    ///
    /// Fails if the root passes `None`, or a peer disconnects, times out,
    /// or is in a different collective.
    fn broadcast<T: Clone + Send + 'static>(
        &self,
        value: Option<T>,
        root: usize,
    ) -> Result<T, CommError>;

    /// Overwrite `buffer` on every non-root rank with the root's
    /// contents. All ranks must pass buffers of the same length.
    ///
    /// # Errors
    ///
    /// Fails on length disagreement, disconnect, timeout, or
    /// desynchronization.
    fn broadcast_into<T: Copy + Send + 'static>(
        &self,
        buffer: &mut [T],
        root: usize,
    ) -> Result<(), CommError>;

    /// Collect one value from every rank at `root`, in rank order.
    ///
    /// Returns `Some` at the root and `None` elsewhere.
    ///
    /// # Errors
    ///
    /// Fails on disconnect, timeout, or desynchronization.
    fn gather<T: Send + 'static>(&self, value: T, root: usize)
    -> Result<Option<Vec<T>>, CommError>;

    /// Collect a variable number of elements from every rank into the
    /// root's `target` at the offsets it lists.
    ///
    /// Non-root ranks pass `None`.
    ///
    /// # Errors
    ///
    /// Fails if a contribution's length differs from its reserved count,
    /// the layout does not fit the buffer, or on disconnect, timeout, or
    /// desynchronization.
    fn gather_into<T: Copy + Send + 'static>(
        &self,
        send: &[T],
        target: Option<GatherTarget<'_, T>>,
        root: usize,
    ) -> Result<(), CommError>;
}

/// One rank's endpoint in a [`LocalWorld`].
pub struct LocalComm {
    rank: usize,
    size: usize,
    timeout: Option<Duration>,
    /// Indexed by destination rank.
    outboxes: Vec<Sender<Payload>>,
    /// Indexed by source rank.
    inboxes: Vec<Receiver<Payload>>,
}

impl LocalComm {
    fn check_root(&self, root: usize) -> Result<(), CommError> {
        if root < self.size {
            Ok(())
        } else {
            Err(CommError::InvalidRoot {
                root,
                size: self.size,
            })
        }
    }

    fn send<T: Send + 'static>(&self, dest: usize, value: T) -> Result<(), CommError> {
        trace!("worker {} -> {dest}: {}", self.rank, type_name::<T>());
        self.outboxes[dest]
            .send(Box::new(value))
            .map_err(|_| CommError::Disconnected { peer: dest })
    }

    fn recv<T: 'static>(&self, source: usize) -> Result<T, CommError> {
        let inbox = &self.inboxes[source];
        let payload = match self.timeout {
            Some(after) => inbox.recv_timeout(after).map_err(|e| match e {
                RecvTimeoutError::Timeout => CommError::Timeout {
                    peer: source,
                    after,
                },
                RecvTimeoutError::Disconnected => CommError::Disconnected { peer: source },
            })?,
            None => inbox
                .recv()
                .map_err(|_| CommError::Disconnected { peer: source })?,
        };
        trace!("worker {} <- {source}: {}", self.rank, type_name::<T>());
        payload
            .downcast::<T>()
            .map(|boxed| *boxed)
            .map_err(|_| CommError::Desynchronized {
                peer: source,
                expected: type_name::<T>(),
            })
    }

    fn peers(&self) -> impl Iterator<Item = usize> + '_ {
        (0..self.size).filter(move |&r| r != self.rank)
    }
}

impl Communicator for LocalComm {
    fn rank(&self) -> usize {
        self.rank
    }

    fn size(&self) -> usize {
        self.size
    }

    fn barrier(&self) -> Result<(), CommError> {
        let root = crate::types::LEADER_RANK;
        self.gather((), root)?;
        self.broadcast(Some(()), root)
    }

    fn broadcast<T: Clone + Send + 'static>(
        &self,
        value: Option<T>,
        root: usize,
    ) -> Result<T, CommError> {
        self.check_root(root)?;
        if self.rank != root {
            return self.recv(root);
        }
        let value = value.ok_or(CommError::MissingPayload { root })?;
        for peer in self.peers() {
            self.send(peer, value.clone())?;
        }
        Ok(value)
    }

    fn broadcast_into<T: Copy + Send + 'static>(
        &self,
        buffer: &mut [T],
        root: usize,
    ) -> Result<(), CommError> {
        self.check_root(root)?;
        if self.rank == root {
            for peer in self.peers() {
                self.send(peer, buffer.to_vec())?;
            }
            return Ok(());
        }
        let received: Vec<T> = self.recv(root)?;
        if received.len() != buffer.len() {
            return Err(CommError::CountMismatch {
                peer: root,
                expected: buffer.len(),
                actual: received.len(),
            });
        }
        buffer.copy_from_slice(&received);
        Ok(())
    }

    fn gather<T: Send + 'static>(
        &self,
        value: T,
        root: usize,
    ) -> Result<Option<Vec<T>>, CommError> {
        self.check_root(root)?;
        if self.rank != root {
            self.send(root, value)?;
            return Ok(None);
        }
        let mut own = Some(value);
        let mut gathered = Vec::with_capacity(self.size);
        for source in 0..self.size {
            if source == root {
                gathered.extend(own.take());
            } else {
                gathered.push(self.recv(source)?);
            }
        }
        Ok(Some(gathered))
    }

    fn gather_into<T: Copy + Send + 'static>(
        &self,
        send: &[T],
        target: Option<GatherTarget<'_, T>>,
        root: usize,
    ) -> Result<(), CommError> {
        self.check_root(root)?;
        if self.rank != root {
            return self.send(root, send.to_vec());
        }
        let Some(target) = target else {
            return Err(CommError::MissingPayload { root });
        };
        if target.counts.len() != self.size || target.offsets.len() != self.size {
            return Err(CommError::InvalidLayout(format!(
                "{} counts and {} offsets for {} workers",
                target.counts.len(),
                target.offsets.len(),
                self.size,
            )));
        }

        for source in 0..self.size {
            let received;
            let contribution: &[T] = if source == root {
                send
            } else {
                received = self.recv::<Vec<T>>(source)?;
                &received
            };

            let expected = target.counts[source];
            if contribution.len() != expected {
                return Err(CommError::CountMismatch {
                    peer: source,
                    expected,
                    actual: contribution.len(),
                });
            }
            let start = target.offsets[source];
            let slot = match start.checked_add(expected) {
                Some(end) => target.buffer.get_mut(start..end),
                None => None,
            };
            let Some(slot) = slot else {
                return Err(CommError::InvalidLayout(format!(
                    "worker {source} slot of {expected} at offset {start} exceeds buffer of {}",
                    target.buffer.len(),
                )));
            };
            slot.copy_from_slice(contribution);
        }
        Ok(())
    }
}

/// An in-process pool of workers, one scoped thread per rank.
pub struct LocalWorld;

impl LocalWorld {
    /// Build the fully connected set of endpoints for `size` ranks.
    ///
    /// The returned vector is in rank order. Useful on its own when the
    /// caller manages threads; [`LocalWorld::run`] is the usual entry
    /// point.
    #[must_use]
    pub fn endpoints(size: usize, timeout: Option<Duration>) -> Vec<LocalComm> {
        let mut outboxes: Vec<Vec<Sender<Payload>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();
        let mut inboxes: Vec<Vec<Receiver<Payload>>> =
            (0..size).map(|_| Vec::with_capacity(size)).collect();

        // Source-major order keeps `outboxes[src]` indexed by destination
        // and `inboxes[dst]` indexed by source.
        for outbox in &mut outboxes {
            for inbox in &mut inboxes {
                let (tx, rx) = crossbeam_channel::unbounded();
                outbox.push(tx);
                inbox.push(rx);
            }
        }

        outboxes
            .into_iter()
            .zip(inboxes)
            .enumerate()
            .map(|(rank, (outboxes, inboxes))| LocalComm {
                rank,
                size,
                timeout,
                outboxes,
                inboxes,
            })
            .collect()
    }

    /// Run `worker` once per rank on its own thread and return each
    /// rank's result in rank order.
    ///
    /// Blocks until every worker has finished. A worker that panics is
    /// reported as [`CommError::WorkerPanicked`]; its peers observe it as
    /// a disconnect.
    pub fn run<F, R>(size: usize, timeout: Option<Duration>, worker: F) -> Vec<Result<R, CommError>>
    where
        F: Fn(LocalComm) -> R + Sync,
        R: Send,
    {
        let endpoints = Self::endpoints(size, timeout);
        std::thread::scope(|scope| {
            let handles: Vec<_> = endpoints
                .into_iter()
                .map(|comm| {
                    let worker = &worker;
                    scope.spawn(move || worker(comm))
                })
                .collect();

            handles
                .into_iter()
                .enumerate()
                .map(|(rank, handle)| {
                    handle
                        .join()
                        .map_err(|_| CommError::WorkerPanicked { rank })
                })
                .collect()
        })
    }
}
