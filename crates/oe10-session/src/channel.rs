//! ---
//! oe10_section: "03-device-session"
//! oe10_subsection: "module"
//! oe10_type: "source"
//! oe10_scope: "code"
//! oe10_description: "Device session state machine and byte channel seam."
//! oe10_version: "v0.0.0-prealpha"
//! oe10_owner: "tbd"
//! ---
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

/// Byte-level link to a peripheral.
pub trait ByteChannel: Send {
    /// Write every byte of `bytes`.
    fn write(&mut self, bytes: &[u8]) -> io::Result<()>;
    /// Bytes that arrived within `max_wait`; empty when the window closed silently.
    fn read_available(&mut self, max_wait: Duration) -> io::Result<Vec<u8>>;
    /// Bytes readable without waiting.
    fn bytes_available(&mut self) -> io::Result<usize>;
    /// Release the underlying resource.
    fn close(&mut self) -> io::Result<()>;
    /// Human-readable channel name for logging.
    fn name(&self) -> &'static str;
}

impl<C: ByteChannel + ?Sized> ByteChannel for Box<C> {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        (**self).write(bytes)
    }

    fn read_available(&mut self, max_wait: Duration) -> io::Result<Vec<u8>> {
        (**self).read_available(max_wait)
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        (**self).bytes_available()
    }

    fn close(&mut self) -> io::Result<()> {
        (**self).close()
    }

    fn name(&self) -> &'static str {
        (**self).name()
    }
}

/// What a [`ScriptedChannel`] does in response to one write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptStep {
    /// Nothing arrives.
    Silence,
    /// The bytes arrive in a single read.
    Bytes(Vec<u8>),
    /// The bytes arrive split over several reads.
    Chunks(Vec<Vec<u8>>),
}

#[derive(Debug, Default)]
struct ScriptState {
    script: VecDeque<ScriptStep>,
    pending: VecDeque<Vec<u8>>,
    written: Vec<Vec<u8>>,
    closed: bool,
}

/// Channel that answers each write from a prepared script and records what was sent.
///
/// Clones share state, so a test can keep one handle after moving another into a
/// session. Reads never block: an exhausted script behaves like a silent line.
#[derive(Debug, Clone, Default)]
pub struct ScriptedChannel {
    inner: Arc<Mutex<ScriptState>>,
}

impl ScriptedChannel {
    /// Create a channel with an empty script.
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a reply delivered after the next unscripted write.
    pub fn push_reply(&self, bytes: impl Into<Vec<u8>>) -> &Self {
        self.push_step(ScriptStep::Bytes(bytes.into()))
    }

    /// Queue a write that goes unanswered.
    pub fn push_silence(&self) -> &Self {
        self.push_step(ScriptStep::Silence)
    }

    /// Queue an arbitrary step.
    pub fn push_step(&self, step: ScriptStep) -> &Self {
        self.inner.lock().script.push_back(step);
        self
    }

    /// Make `bytes` readable immediately, before any write.
    pub fn preload(&self, bytes: impl Into<Vec<u8>>) {
        self.inner.lock().pending.push_back(bytes.into());
    }

    /// Every write so far, in order.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.inner.lock().written.clone()
    }

    /// Number of writes so far.
    pub fn write_count(&self) -> usize {
        self.inner.lock().written.len()
    }

    /// Bytes queued for reading.
    pub fn pending_len(&self) -> usize {
        self.inner.lock().pending.iter().map(Vec::len).sum()
    }

    /// Whether `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }
}

impl ByteChannel for ScriptedChannel {
    fn write(&mut self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.inner.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::NotConnected, "channel closed"));
        }
        state.written.push(bytes.to_vec());
        match state.script.pop_front() {
            Some(ScriptStep::Bytes(reply)) => state.pending.push_back(reply),
            Some(ScriptStep::Chunks(chunks)) => state.pending.extend(chunks),
            Some(ScriptStep::Silence) | None => {}
        }
        Ok(())
    }

    fn read_available(&mut self, _max_wait: Duration) -> io::Result<Vec<u8>> {
        Ok(self.inner.lock().pending.pop_front().unwrap_or_default())
    }

    fn bytes_available(&mut self) -> io::Result<usize> {
        Ok(self.pending_len())
    }

    fn close(&mut self) -> io::Result<()> {
        let mut state = self.inner.lock();
        state.closed = true;
        state.pending.clear();
        Ok(())
    }

    fn name(&self) -> &'static str {
        "scripted"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_follow_writes_in_script_order() {
        let mut channel = ScriptedChannel::new();
        channel.push_silence().push_reply(vec![0x3C, 0x3E]);

        channel.write(b"first").expect("write");
        assert!(channel.read_available(Duration::ZERO).expect("read").is_empty());

        channel.write(b"second").expect("write");
        assert_eq!(channel.bytes_available().expect("available"), 2);
        assert_eq!(
            channel.read_available(Duration::ZERO).expect("read"),
            vec![0x3C, 0x3E]
        );
        assert_eq!(channel.written(), vec![b"first".to_vec(), b"second".to_vec()]);
    }

    #[test]
    fn chunks_arrive_over_several_reads() {
        let mut channel = ScriptedChannel::new();
        channel.push_step(ScriptStep::Chunks(vec![vec![1, 2], vec![3]]));
        channel.write(b"x").expect("write");
        assert_eq!(channel.read_available(Duration::ZERO).expect("read"), vec![1, 2]);
        assert_eq!(channel.read_available(Duration::ZERO).expect("read"), vec![3]);
        assert!(channel.read_available(Duration::ZERO).expect("read").is_empty());
    }

    #[test]
    fn closed_channel_rejects_writes() {
        let mut channel = ScriptedChannel::new();
        let observer = channel.clone();
        channel.preload(vec![0xAA]);
        channel.close().expect("close");
        assert!(observer.is_closed());
        assert_eq!(observer.pending_len(), 0);
        let err = channel.write(b"late").expect_err("closed");
        assert_eq!(err.kind(), io::ErrorKind::NotConnected);
    }

    #[test]
    fn boxed_channels_delegate() {
        let observer = ScriptedChannel::new();
        let mut boxed: Box<dyn ByteChannel> = Box::new(observer.clone());
        boxed.write(b"ping").expect("write");
        assert_eq!(boxed.name(), "scripted");
        assert_eq!(observer.write_count(), 1);
    }
}
