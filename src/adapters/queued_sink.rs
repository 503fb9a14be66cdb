//! Queued persistence adapter.
//!
//! [`QueuedCountSink`] moves store latency off the message path.  Counts go
//! into a bounded `embassy-sync` channel and a dedicated writer thread
//! drains it into the wrapped store, in detection order.
//!
//! ```text
//! ┌─────────────────┐  SinkMsg   ┌────────────────┐
//! │ supervisor loop │──────────▶│  count-writer   │──▶ CountSink
//! │ (record_count)  │  depth 16  │  (own thread)   │──▶ EventSink
//! └─────────────────┘            └────────────────┘
//! ```
//!
//! When the queue is full, `record_count` blocks until the writer frees a
//! slot.  Intake stalls rather than dropping a count, unless the writer
//! has died, in which case the count is refused with `QueueClosed`.  The writer reports
//! each final outcome (`CountRecorded` with `Ack::Stored`, or `CountLost`)
//! through its own event sink.

use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::channel::{Channel, TrySendError};
use log::{info, warn};

use crate::app::events::AppEvent;
use crate::app::ports::{Ack, CountSink, EventSink, PersistenceError};
use crate::detector::CountEvent;
use crate::error::Error;

/// Queue depth between the message path and the writer.
pub const QUEUE_DEPTH: usize = 16;

/// Pause between attempts while the queue is full.
const FULL_RETRY: Duration = Duration::from_millis(2);

enum SinkMsg {
    Record(CountEvent),
    Shutdown,
}

type SinkChannel = Channel<CriticalSectionRawMutex, SinkMsg, QUEUE_DEPTH>;

/// Queue `msg`, waiting while the queue is full.  Hands the message back
/// if the writer is gone, since nothing would ever drain it.
fn push<T>(channel: &SinkChannel, worker: &JoinHandle<T>, mut msg: SinkMsg) -> Result<(), SinkMsg> {
    loop {
        if worker.is_finished() {
            return Err(msg);
        }
        match channel.try_send(msg) {
            Ok(()) => return Ok(()),
            Err(TrySendError::Full(back)) => {
                msg = back;
                std::thread::sleep(FULL_RETRY);
            }
        }
    }
}

pub struct QueuedCountSink<S: CountSink + Send + 'static> {
    channel: Arc<SinkChannel>,
    worker: Option<JoinHandle<S>>,
}

impl<S: CountSink + Send + 'static> QueuedCountSink<S> {
    /// Start the writer thread.  It owns `store` and `reporter` until
    /// [`close`](Self::close).
    pub fn spawn<E>(store: S, mut reporter: E) -> Result<Self, Error>
    where
        E: EventSink + Send + 'static,
    {
        let channel: Arc<SinkChannel> = Arc::new(Channel::new());
        let rx = Arc::clone(&channel);

        let worker = std::thread::Builder::new()
            .name("count-writer".into())
            .spawn(move || {
                let mut store = store;
                loop {
                    match futures_lite::future::block_on(rx.receive()) {
                        SinkMsg::Record(event) => match store.record_count(&event) {
                            Ok(ack) => reporter.emit(&AppEvent::CountRecorded { event, ack }),
                            Err(e) => reporter.emit(&AppEvent::CountLost { event, error: e }),
                        },
                        SinkMsg::Shutdown => break,
                    }
                }
                store
            })
            .map_err(|_| Error::Init("count-writer thread"))?;

        info!("QueuedCountSink: writer started (depth {})", QUEUE_DEPTH);
        Ok(Self {
            channel,
            worker: Some(worker),
        })
    }

    /// Drain everything already queued, stop the writer and hand the store
    /// back.  Returns `None` if already closed or the writer panicked.
    pub fn close(&mut self) -> Option<S> {
        let worker = self.worker.take()?;
        // Shutdown is queued behind pending records, so they are written first.
        let _ = push(&self.channel, &worker, SinkMsg::Shutdown);
        match worker.join() {
            Ok(store) => {
                info!("QueuedCountSink: writer drained and stopped");
                Some(store)
            }
            Err(_) => {
                warn!("QueuedCountSink: writer panicked");
                None
            }
        }
    }

    pub fn is_closed(&self) -> bool {
        self.worker.is_none()
    }

    /// Records currently waiting for the writer.
    pub fn pending(&self) -> usize {
        self.channel.len()
    }
}

impl<S: CountSink + Send + 'static> CountSink for QueuedCountSink<S> {
    fn record_count(&mut self, event: &CountEvent) -> Result<Ack, PersistenceError> {
        let worker = self.worker.as_ref().ok_or(PersistenceError::QueueClosed)?;
        push(&self.channel, worker, SinkMsg::Record(event.clone())).map_err(|_| PersistenceError::QueueClosed)?;
        Ok(Ack::Queued)
    }

    /// Drains the queue and stops the writer; later counts are refused.
    fn flush(&mut self) -> Result<(), PersistenceError> {
        if self.is_closed() {
            return Ok(());
        }
        let mut store = self.close().ok_or(PersistenceError::QueueClosed)?;
        store.flush()
    }
}

impl<S: CountSink + Send + 'static> Drop for QueuedCountSink<S> {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
