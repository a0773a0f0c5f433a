use std::num::NonZeroUsize;

use log::debug;
use tokio::{
    sync::mpsc,
    task::{self, JoinHandle},
};
use tokio_util::sync::CancellationToken;

use crate::{
    data::{Batch, DataSource},
    error::{BufferClosed, DataErr},
};

/// Creates a bounded FIFO buffer of batches.
///
/// # Arguments
/// * `capacity` - The most batches the buffer holds before `push` waits.
///
/// # Returns
/// The producer and consumer halves.
pub fn channel(capacity: NonZeroUsize) -> (BatchSender, BatchReceiver) {
    let (tx, rx) = mpsc::channel(capacity.get());
    (BatchSender { tx }, BatchReceiver { rx })
}

/// The producing half of a prefetch buffer.
#[derive(Debug, Clone)]
pub struct BatchSender {
    tx: mpsc::Sender<Batch>,
}

impl BatchSender {
    /// Enqueues a batch, waiting while the buffer is full.
    ///
    /// # Returns
    /// `BufferClosed` if the consumer shut the buffer down.
    pub async fn push(&self, batch: Batch) -> Result<(), BufferClosed> {
        self.tx.send(batch).await.map_err(|_| BufferClosed)
    }

    /// Blocking variant of `push` for producers running off the async runtime.
    ///
    /// Must not be called from an async context.
    pub fn blocking_push(&self, batch: Batch) -> Result<(), BufferClosed> {
        self.tx.blocking_send(batch).map_err(|_| BufferClosed)
    }
}

/// The consuming half of a prefetch buffer.
#[derive(Debug)]
pub struct BatchReceiver {
    rx: mpsc::Receiver<Batch>,
}

impl BatchReceiver {
    /// Dequeues the oldest batch, waiting while the buffer is empty.
    ///
    /// # Returns
    /// `BufferClosed` once the buffer is empty and every producer is gone, or
    /// it was closed.
    pub async fn pop(&mut self) -> Result<Batch, BufferClosed> {
        self.rx.recv().await.ok_or(BufferClosed)
    }

    /// Shuts the buffer down.
    ///
    /// Blocked and future pushes fail with `BufferClosed`; batches already
    /// buffered stay poppable until `drain` or the buffer is dropped.
    pub fn close(&mut self) {
        self.rx.close();
    }

    /// Takes every batch still buffered, without waiting.
    pub fn drain(&mut self) -> Vec<Batch> {
        let mut out = Vec::with_capacity(self.rx.len());
        while let Ok(batch) = self.rx.try_recv() {
            out.push(batch);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.rx.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rx.is_empty()
    }
}

/// Why a prefetch producer stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedEnd {
    /// The source reached the end of the epoch.
    Exhausted,
    /// The cancellation token fired.
    Cancelled,
    /// The consumer closed the buffer.
    Closed,
}

/// What a finished prefetch producer hands back.
#[derive(Debug)]
pub struct Prefetched<S> {
    /// The source, so it can be reset and fed again next epoch.
    pub source: S,
    /// The number of batches pushed into the buffer.
    pub produced: usize,
    pub end: Result<FeedEnd, DataErr>,
}

/// Runs `source` on the blocking pool, feeding its batches into a new buffer.
///
/// Batches are stamped with their epoch-local sequence number in production
/// order. The producer stops at the end of the epoch, on cancellation, when
/// the consumer closes the buffer, or at the first data error; in every case
/// it drops its sender, so the consumer sees `BufferClosed` after the last
/// buffered batch.
///
/// # Arguments
/// * `source` - A source already positioned at the start of the epoch.
/// * `capacity` - The buffer capacity.
/// * `token` - Stops the producer between batches when cancelled.
///
/// # Returns
/// The consuming half and a handle resolving to the source and end reason.
pub fn spawn_prefetch<S>(
    mut source: S,
    capacity: NonZeroUsize,
    token: CancellationToken,
) -> (BatchReceiver, JoinHandle<Prefetched<S>>)
where
    S: DataSource,
{
    let (tx, rx) = channel(capacity);

    let handle = task::spawn_blocking(move || {
        let mut produced = 0;

        let end = loop {
            if token.is_cancelled() {
                break Ok(FeedEnd::Cancelled);
            }

            match source.next_batch() {
                Ok(Some(mut batch)) => {
                    batch.set_seq(produced);
                    if tx.blocking_push(batch).is_err() {
                        break Ok(FeedEnd::Closed);
                    }
                    produced += 1;
                }
                Ok(None) => break Ok(FeedEnd::Exhausted),
                Err(e) => break Err(e),
            }
        };

        debug!(produced = produced; "prefetch producer stopped: {end:?}");
        Prefetched {
            source,
            produced,
            end,
        }
    });

    (rx, handle)
}
