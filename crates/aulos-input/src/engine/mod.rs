//! Transfer engine wrapper
//!
//! Owns the process-wide registry of active transfers. Every method here
//! runs on the I/O thread, which is why the registry itself needs no
//! lock; per-stream state crosses the thread boundary through the
//! stream's own mutex.

pub(crate) mod backend;

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crossbeam_channel::{bounded, Sender};
use tracing::{debug, warn};

use crate::config::buffer::HIGH_WATERMARK;
use crate::error::{InputError, Result};
use crate::stream::headers::apply_header_line;
use crate::stream::input::StreamShared;
use backend::{
    ChunkAck, TransferBackend, TransferEvent, TransferId, TransferLink, TransferRequest,
};

struct ActiveTransfer {
    id: TransferId,
    stream: Arc<StreamShared>,
    ack: Sender<ChunkAck>,
    cancelled: Arc<AtomicBool>,
    /// Chunk rejected by the watermark check, waiting for resume.
    pending: Option<Vec<u8>>,
    /// HTTP status observed when the response headers arrived.
    status: Option<u16>,
}

pub(crate) struct Engine {
    backend: Box<dyn TransferBackend>,
    event_tx: Sender<TransferEvent>,
    transfers: Vec<ActiveTransfer>,
    next_id: u64,
}

impl Engine {
    pub fn new(backend: Box<dyn TransferBackend>, event_tx: Sender<TransferEvent>) -> Self {
        Self {
            backend,
            event_tx,
            transfers: Vec::new(),
            next_id: 0,
        }
    }

    pub fn active_count(&self) -> usize {
        self.transfers.len()
    }

    /// Attach a stream to the registry and launch its transfer.
    pub fn add(&mut self, stream: &Arc<StreamShared>, request: TransferRequest) -> Result<()> {
        let id = TransferId(self.next_id);
        self.next_id += 1;

        let (ack_tx, ack_rx) = bounded(1);
        let cancelled = Arc::new(AtomicBool::new(false));

        {
            let mut st = stream.lock();
            debug_assert!(st.handle.is_none());
            st.handle = Some(id);
        }

        self.transfers.push(ActiveTransfer {
            id,
            stream: Arc::clone(stream),
            ack: ack_tx,
            cancelled: Arc::clone(&cancelled),
            pending: None,
            status: None,
        });

        let link = TransferLink {
            events: self.event_tx.clone(),
            ack: ack_rx,
            cancelled,
        };
        if let Err(err) = self.backend.launch(id, request, link) {
            self.transfers.pop();
            stream.lock().handle = None;
            return Err(err);
        }

        debug!("transfer {} added for {}", id.0, stream.uri);
        Ok(())
    }

    /// Detach a stream's transfer, if any.
    ///
    /// Never blocks on network I/O: the worker notices the dropped ack
    /// channel or the cancel flag and winds down on its own.
    pub fn remove(&mut self, stream: &Arc<StreamShared>) {
        let Some(index) = self.index_of_stream(stream) else {
            return;
        };
        let transfer = self.transfers.swap_remove(index);
        transfer.cancelled.store(true, Ordering::Relaxed);

        let mut st = transfer.stream.lock();
        st.handle = None;
        st.range = None;
        debug!("transfer {} removed", transfer.id.0);
    }

    /// Continue a paused transfer: re-deliver the chunk the watermark
    /// check rejected, then release the worker.
    pub fn resume(&mut self, stream: &Arc<StreamShared>) {
        {
            let mut st = stream.lock();
            if !st.paused {
                return;
            }
            st.paused = false;
        }

        let Some(index) = self.index_of_stream(stream) else {
            return;
        };
        if let Some(data) = self.transfers[index].pending.take() {
            if self.deliver(index, data) {
                let _ = self.transfers[index].ack.send(ChunkAck::Continue);
            }
        }
    }

    /// Abort every active transfer, distributing a copy of `error` to
    /// each stream. Used only when the engine itself fails.
    pub fn abort_all(&mut self, error: InputError) {
        warn!("aborting {} active transfers: {error}", self.transfers.len());

        for transfer in self.transfers.drain(..) {
            transfer.cancelled.store(true, Ordering::Relaxed);

            let mut st = transfer.stream.lock();
            debug_assert!(st.postponed_error.is_none());
            st.postponed_error = Some(error.clone());
            st.handle = None;
            st.range = None;
            st.ready = true;
            transfer.stream.cond.notify_all();
        }
    }

    /// Route one transfer event. Events bearing an id that is no longer
    /// registered come from a transfer detached by seek or close; they
    /// are dropped.
    pub fn dispatch(&mut self, event: TransferEvent) {
        match event {
            TransferEvent::Status { id, code } => {
                if let Some(index) = self.index_of(id) {
                    self.transfers[index].status = Some(code);
                }
            }
            TransferEvent::Header { id, line } => {
                if let Some(index) = self.index_of(id) {
                    let stream = &self.transfers[index].stream;
                    let mut st = stream.lock();
                    apply_header_line(&mut st, &line);
                }
            }
            TransferEvent::Chunk { id, data } => {
                let Some(index) = self.index_of(id) else {
                    debug!("chunk for stale transfer {}", id.0);
                    return;
                };
                if self.deliver(index, data) {
                    let _ = self.transfers[index].ack.send(ChunkAck::Continue);
                }
            }
            TransferEvent::Done { id, result } => self.handle_done(id, result),
        }
    }

    /// Write path: append a chunk under the stream mutex unless it would
    /// cross the high watermark, in which case the transfer is paused
    /// and the chunk kept for re-delivery. Returns whether the chunk was
    /// appended.
    fn deliver(&mut self, index: usize, data: Vec<u8>) -> bool {
        let transfer = &mut self.transfers[index];
        let mut st = transfer.stream.lock();

        if st.buffers.total_size() + data.len() >= HIGH_WATERMARK {
            st.paused = true;
            drop(st);
            transfer.pending = Some(data);
            return false;
        }

        st.buffers.push(data);
        st.ready = true;
        transfer.stream.cond.notify_all();
        true
    }

    /// A transfer finished: release the handle, classify the outcome and
    /// wake the consumer. The reader observes EOF once the buffer queue
    /// drains.
    fn handle_done(&mut self, id: TransferId, result: std::result::Result<(), String>) {
        let Some(index) = self.index_of(id) else {
            debug!("completion for stale transfer {}", id.0);
            return;
        };
        let transfer = self.transfers.swap_remove(index);

        let mut st = transfer.stream.lock();
        let error = match result {
            Err(text) => Some(InputError::TransferFailed(text)),
            Ok(()) => {
                let status = transfer.status.unwrap_or(0);
                if (200..300).contains(&status) {
                    None
                } else if st.range.is_some() {
                    Some(InputError::RangeRejected(status))
                } else {
                    Some(InputError::HttpStatus(status))
                }
            }
        };

        if let Some(error) = error {
            debug_assert!(st.postponed_error.is_none());
            warn!("transfer {} failed: {error}", transfer.id.0);
            st.postponed_error = Some(error);
        }

        st.handle = None;
        st.range = None;
        st.ready = true;
        transfer.stream.cond.notify_all();
    }

    fn index_of(&self, id: TransferId) -> Option<usize> {
        self.transfers.iter().position(|t| t.id == id)
    }

    fn index_of_stream(&self, stream: &Arc<StreamShared>) -> Option<usize> {
        self.transfers
            .iter()
            .position(|t| Arc::ptr_eq(&t.stream, stream))
    }
}
