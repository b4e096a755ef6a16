//! A scripted transport for scenario tests (§9.1 "Ambient test tooling").
//!
//! Grounded on `probe-rs`'s `FakeProbe` (`probe-rs/src/probe/fake_probe.rs`):
//! a plain, always-compiled public type rather than one hidden behind
//! `#[cfg(test)]`, since integration tests under `tests/` build against this
//! crate as an ordinary dependency and can't see `cfg(test)` items.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use super::{Result, TransportError};

struct Inner {
    unit_size: usize,
    writes: RefCell<Vec<Vec<u8>>>,
    reads: RefCell<VecDeque<Vec<u8>>>,
}

/// Records every write and replays a queue of scripted reads. Each `read`
/// call consumes exactly one queued reply; an empty queue yields a timeout,
/// matching how a real device would behave on an unanswered poll.
///
/// Cloning shares the underlying script: callers keep one handle to drive
/// the script (`queue_read`/`writes`) and move another into a
/// [`super::UsbTransport::Fake`] consumed by the code under test.
#[derive(Clone)]
pub struct FakeTransport {
    inner: Rc<Inner>,
}

impl FakeTransport {
    pub fn new(unit_size: usize) -> Self {
        Self {
            inner: Rc::new(Inner {
                unit_size,
                writes: RefCell::new(Vec::new()),
                reads: RefCell::new(VecDeque::new()),
            }),
        }
    }

    /// Appends one scripted reply, to be returned by the next `read` call.
    pub fn queue_read(&self, data: Vec<u8>) {
        self.inner.reads.borrow_mut().push_back(data);
    }

    /// Every write issued so far, in order.
    pub fn writes(&self) -> Vec<Vec<u8>> {
        self.inner.writes.borrow().clone()
    }

    pub fn unit_size(&self) -> usize {
        self.inner.unit_size
    }

    pub fn write(&self, buf: &[u8]) -> Result<usize> {
        self.inner.writes.borrow_mut().push(buf.to_vec());
        Ok(buf.len())
    }

    pub fn read(&self, buf: &mut [u8]) -> Result<usize> {
        match self.inner.reads.borrow_mut().pop_front() {
            Some(data) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok(n)
            }
            None => Err(TransportError::Timeout),
        }
    }
}
