// In-memory serial port for tests: records writes, replays scripted replies

use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::sync::{Arc, Mutex, MutexGuard};

use super::error::Result;
use super::md49::Md49Port;

#[derive(Debug, Default)]
struct MockState {
    written: Vec<u8>,
    replies: VecDeque<u8>,
    /// Released into `replies` by the next write
    on_write: Vec<u8>,
    clears: usize,
    fail_writes: bool,
}

/// Cloneable handle; every clone sees the same port
#[derive(Debug, Clone, Default)]
pub struct MockPort {
    state: Arc<Mutex<MockState>>,
}

impl MockPort {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MockState> {
        self.state.lock().unwrap()
    }

    pub fn queue_reply(&self, bytes: &[u8]) {
        self.state().replies.extend(bytes.iter().copied());
    }

    /// Reply that only arrives once a request has been written
    pub fn reply_on_next_write(&self, bytes: &[u8]) {
        self.state().on_write.extend_from_slice(bytes);
    }

    pub fn input_clears(&self) -> usize {
        self.state().clears
    }

    pub fn take_written(&self) -> Vec<u8> {
        std::mem::take(&mut self.state().written)
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.state().fail_writes = fail;
    }
}

impl Read for MockPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.replies.is_empty() {
            return Err(io::Error::new(io::ErrorKind::TimedOut, "mock read timed out"));
        }
        let n = buf.len().min(state.replies.len());
        for (slot, byte) in buf.iter_mut().zip(state.replies.drain(..n)) {
            *slot = byte;
        }
        Ok(n)
    }
}

impl Write for MockPort {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state();
        if state.fail_writes {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock port unplugged"));
        }
        state.written.extend_from_slice(buf);
        let released = std::mem::take(&mut state.on_write);
        state.replies.extend(released);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Md49Port for MockPort {
    fn clear_input(&mut self) -> Result<()> {
        let mut state = self.state();
        state.replies.clear();
        state.clears += 1;
        Ok(())
    }
}
