//! Shutdown handle untuk reactor
//!
//! Flag atomik plus `mio::Waker` yang terdaftar di poll server. Handle bisa
//! di-clone dan dikirim ke thread lain (signal thread, test harness).

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::{Registry, Token, Waker};
use tracing::warn;

#[derive(Clone)]
pub struct Shutdown {
    flag: Arc<AtomicBool>,
    waker: Arc<Waker>,
}

impl Shutdown {
    pub(crate) fn new(registry: &Registry, token: Token) -> io::Result<Self> {
        Ok(Self {
            flag: Arc::new(AtomicBool::new(false)),
            waker: Arc::new(Waker::new(registry, token)?),
        })
    }

    /// Request the reactor to stop after the current wake.
    pub fn trigger(&self) {
        self.flag.store(true, Ordering::Release);
        if let Err(e) = self.waker.wake() {
            warn!(error = %e, "failed to wake reactor for shutdown");
        }
    }

    #[inline]
    pub fn is_triggered(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Events, Poll};
    use std::time::Duration;

    #[test]
    fn test_trigger_wakes_poll() {
        let mut poll = Poll::new().unwrap();
        let shutdown = Shutdown::new(poll.registry(), Token(1)).unwrap();
        let remote = shutdown.clone();

        let t = std::thread::spawn(move || remote.trigger());
        let mut events = Events::with_capacity(4);
        poll.poll(&mut events, Some(Duration::from_secs(5))).unwrap();
        t.join().unwrap();

        assert!(events.iter().any(|e| e.token() == Token(1)));
        assert!(shutdown.is_triggered());
    }
}
