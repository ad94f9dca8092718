//! Per-URL input stream object
//!
//! The public handle exposing the pull interface: open happens through the
//! plugin facade; read, seek, tag, availability and close live here. One
//! mutex and one condition variable per stream connect the consumer with
//! the transfer engine's callbacks on the I/O thread.
//!
//! The consumer must never hold the stream mutex across a call into the
//! I/O thread; the read and seek paths drop the guard first.

use std::io::{self, SeekFrom};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};

use crate::config::buffer::RESUME_AT;
use crate::engine::backend::TransferId;
use crate::error::{InputError, Result};
use crate::io_thread::IoThread;
use crate::plugin::RequestContext;
use crate::stream::buffer::BufferQueue;
use crate::stream::icy::IcyParser;
use crate::stream::tag::{Tag, TagKind};

/// Everything the stream mutex guards.
pub(crate) struct StreamState {
    /// True once the first bytes or the first error have arrived.
    pub(crate) ready: bool,
    pub(crate) seekable: bool,
    pub(crate) size: Option<u64>,
    /// Current byte offset; monotonic across reads, reset by seek.
    pub(crate) offset: u64,
    /// Starting offset of the current transfer. `content-length`
    /// arithmetic relies on `offset` still being equal to it when the
    /// headers arrive; a reopen for seek updates both before re-init.
    pub(crate) transfer_offset: u64,
    pub(crate) mime: Option<String>,
    pub(crate) buffers: BufferQueue,
    /// The transfer was paused because the buffer crossed the high
    /// watermark; cleared when the consumer requests a resume.
    pub(crate) paused: bool,
    pub(crate) icy: IcyParser,
    /// Tag ready to be handed to the consumer.
    pub(crate) tag: Option<Tag>,
    /// Stream name from the `icy-name` response header.
    pub(crate) meta_name: Option<String>,
    /// Present while a transfer is active.
    pub(crate) handle: Option<TransferId>,
    /// Range suffix ("<offset>-") owned while a ranged transfer is active.
    pub(crate) range: Option<String>,
    /// Error captured on the I/O thread, surfaced by the next consumer
    /// operation.
    pub(crate) postponed_error: Option<InputError>,
}

impl StreamState {
    pub(crate) fn new() -> Self {
        Self {
            ready: false,
            seekable: false,
            size: None,
            offset: 0,
            transfer_offset: 0,
            mime: None,
            buffers: BufferQueue::new(),
            paused: false,
            icy: IcyParser::new(),
            tag: None,
            meta_name: None,
            handle: None,
            range: None,
            postponed_error: None,
        }
    }
}

/// State shared between the consumer and the I/O thread.
pub(crate) struct StreamShared {
    pub(crate) uri: String,
    state: Mutex<StreamState>,
    pub(crate) cond: Condvar,
}

impl StreamShared {
    pub(crate) fn new(uri: &str) -> Self {
        Self {
            uri: uri.to_string(),
            state: Mutex::new(StreamState::new()),
            cond: Condvar::new(),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, StreamState> {
        self.state.lock().expect("stream mutex poisoned")
    }

    fn wait<'a>(&self, guard: MutexGuard<'a, StreamState>) -> MutexGuard<'a, StreamState> {
        self.cond.wait(guard).expect("stream mutex poisoned")
    }
}

/// An open HTTP input stream.
///
/// Dropping the handle detaches the transfer exactly as
/// [`close`](Self::close) does.
pub struct InputStream {
    shared: Arc<StreamShared>,
    io: Arc<IoThread>,
    context: Arc<RequestContext>,
    detached: bool,
}

impl InputStream {
    pub(crate) fn new(
        shared: Arc<StreamShared>,
        io: Arc<IoThread>,
        context: Arc<RequestContext>,
    ) -> Self {
        Self {
            shared,
            io,
            context,
            detached: false,
        }
    }

    pub fn uri(&self) -> &str {
        &self.shared.uri
    }

    pub fn ready(&self) -> bool {
        self.shared.lock().ready
    }

    pub fn seekable(&self) -> bool {
        self.shared.lock().seekable
    }

    /// Total stream size, when the server announced one.
    pub fn size(&self) -> Option<u64> {
        self.shared.lock().size
    }

    pub fn offset(&self) -> u64 {
        self.shared.lock().offset
    }

    /// MIME type from the `content-type` response header.
    pub fn mime(&self) -> Option<String> {
        self.shared.lock().mime.clone()
    }

    /// Block until the stream is ready, surfacing any postponed error.
    pub fn wait_ready(&self) -> Result<()> {
        let mut st = self.shared.lock();
        while !st.ready {
            st = self.shared.wait(st);
        }
        match st.postponed_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Take the postponed error, if one is pending.
    pub fn check(&self) -> Result<()> {
        match self.shared.lock().postponed_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Hand off the pending tag, leaving the slot empty.
    pub fn tag(&self) -> Option<Tag> {
        self.shared.lock().tag.take()
    }

    /// True when the next read will not block.
    pub fn available(&self) -> bool {
        let st = self.shared.lock();
        st.postponed_error.is_some() || st.handle.is_none() || !st.buffers.is_empty()
    }

    pub fn eof(&self) -> bool {
        let st = self.shared.lock();
        st.handle.is_none() && st.buffers.is_empty()
    }

    /// Copy up to `dest.len()` bytes out of the stream.
    ///
    /// Blocks while the transfer is active and nothing is buffered.
    /// Returns the number of bytes copied; 0 means end of stream.
    pub fn read(&mut self, dest: &mut [u8]) -> Result<usize> {
        if dest.is_empty() {
            return Ok(0);
        }

        let mut st = self.shared.lock();
        let mut nbytes = 0;

        loop {
            while st.handle.is_some() && st.buffers.is_empty() {
                st = self.shared.wait(st);
            }

            if let Some(err) = st.postponed_error.take() {
                return Err(err);
            }

            if st.buffers.is_empty() {
                // transfer gone and nothing buffered: end of stream
                return Ok(0);
            }

            while nbytes < dest.len() && !st.buffers.is_empty() {
                nbytes += read_from_buffer(&mut st, &mut dest[nbytes..]);
            }

            // a head buffer holding only metadata yields no audio;
            // wait for more
            if nbytes > 0 {
                break;
            }
        }

        if st.icy.is_enabled() {
            copy_icy_tag(&mut st);
        }

        st.offset += nbytes as u64;

        if st.paused && st.buffers.total_size() < RESUME_AT {
            drop(st);
            let stream = Arc::clone(&self.shared);
            self.io.call(move |engine| engine.resume(&stream));
        }

        Ok(nbytes)
    }

    /// Reposition the stream.
    ///
    /// Forward seeks are served from the buffer where possible; anything
    /// else tears the transfer down and reopens it with a range request.
    pub fn seek(&mut self, pos: SeekFrom) -> Result<()> {
        let mut st = self.shared.lock();
        assert!(st.ready, "seek on a stream that is not ready");

        // no-op shortcut, checked before seekability
        if pos == SeekFrom::Start(st.offset) {
            return Ok(());
        }

        if !st.seekable {
            return Err(InputError::NotSeekable);
        }

        let target = resolve_target(&st, pos)?;

        // fast-forward through already-buffered bytes, no network involved
        while target > st.offset {
            let remaining = target - st.offset;
            let Some(head) = st.buffers.head_mut() else {
                break;
            };
            let take = (head.available() as u64).min(remaining) as usize;
            if !head.consume(take) {
                st.buffers.pop_head();
            }
            st.offset += take as u64;
        }

        if target == st.offset {
            return Ok(());
        }

        // close the old connection and open a new one
        drop(st);
        let stream = Arc::clone(&self.shared);
        self.io.call(move |engine| engine.remove(&stream));

        let mut st = self.shared.lock();
        st.buffers.clear();
        st.offset = target;
        st.transfer_offset = target;

        if st.size == Some(target) {
            // seek to end of stream: simulate the empty result instead of
            // provoking a "416 Requested Range Not Satisfiable"
            return Ok(());
        }

        st.ready = false;
        let range = (target > 0).then(|| format!("{target}-"));
        st.range = range.clone();
        drop(st);

        let request = self.context.request(&self.shared.uri, range);
        let stream = Arc::clone(&self.shared);
        self.io.call(move |engine| engine.add(&stream, request))?;

        let mut st = self.shared.lock();
        while !st.ready {
            st = self.shared.wait(st);
        }

        match st.postponed_error.take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Detach the transfer and release the stream.
    ///
    /// Does not block on network I/O; the transfer worker winds down on
    /// its own.
    pub fn close(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if self.detached {
            return;
        }
        self.detached = true;
        let stream = Arc::clone(&self.shared);
        self.io.call(move |engine| engine.remove(&stream));
    }
}

impl Drop for InputStream {
    fn drop(&mut self) {
        self.detach();
    }
}

impl io::Read for InputStream {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        InputStream::read(self, buf).map_err(io::Error::other)
    }
}

impl io::Seek for InputStream {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        InputStream::seek(self, pos).map_err(io::Error::other)?;
        Ok(self.offset())
    }
}

fn resolve_target(st: &StreamState, pos: SeekFrom) -> Result<u64> {
    match pos {
        SeekFrom::Start(offset) => Ok(offset),
        SeekFrom::Current(delta) => st
            .offset
            .checked_add_signed(delta)
            .ok_or(InputError::InvalidSeek("before start of stream")),
        SeekFrom::End(delta) => {
            let size = st
                .size
                .ok_or(InputError::InvalidSeek("stream size is not known"))?;
            size.checked_add_signed(delta)
                .ok_or(InputError::InvalidSeek("before start of stream"))
        }
    }
}

/// Copy audio bytes out of the head buffer through the ICY parser.
///
/// Alternates audio and metadata queries against the head until the
/// destination is filled or the head runs out. Parser state survives
/// across buffers, so a metadata block may span several of them.
fn read_from_buffer(st: &mut StreamState, dest: &mut [u8]) -> usize {
    let StreamState { icy, buffers, .. } = st;

    let head_available = match buffers.head() {
        Some(head) => head.available(),
        None => return 0,
    };
    let mut length = dest.len().min(head_available);
    let mut nbytes = 0;

    loop {
        let chunk = icy.data(length);
        if chunk > 0 {
            let Some(head) = buffers.head_mut() else { break };
            let emptied = !head.read(&mut dest[nbytes..nbytes + chunk]);

            nbytes += chunk;
            length -= chunk;

            if emptied {
                buffers.pop_head();
                break;
            }
            if length == 0 {
                break;
            }
        }

        let chunk = match buffers.head() {
            Some(head) => icy.meta(head.begin(), length),
            None => break,
        };
        if chunk > 0 {
            let Some(head) = buffers.head_mut() else { break };
            let emptied = !head.consume(chunk);

            length -= chunk;

            if emptied {
                buffers.pop_head();
                break;
            }
            if length == 0 {
                break;
            }
        }
    }

    nbytes
}

/// Move a completed ICY tag into the stream's pending slot, merging in
/// the station name when the block itself carried none.
fn copy_icy_tag(st: &mut StreamState) {
    let Some(mut tag) = st.icy.read_tag() else {
        return;
    };

    if let Some(name) = &st.meta_name {
        if !tag.has(TagKind::Name) {
            tag.add(TagKind::Name, name.clone());
        }
    }

    st.tag = Some(tag);
}
