//! Cap on concurrently open connections.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Counts requests in flight and blocks callers once `limit` is reached.
///
/// A slot is held from send until the response is dropped, so a streaming
/// feed keeps its slot for as long as it is open.
#[derive(Debug)]
pub(crate) struct ConnectionGate {
    limit: usize,
    in_use: Mutex<usize>,
    released: Condvar,
}

impl ConnectionGate {
    pub(crate) fn new(limit: usize) -> Arc<Self> {
        Arc::new(Self {
            limit: limit.max(1),
            in_use: Mutex::new(0),
            released: Condvar::new(),
        })
    }

    /// Wait for a free slot.
    pub(crate) fn acquire(self: &Arc<Self>) -> Permit {
        let mut in_use = self.in_use.lock();
        if *in_use >= self.limit {
            tracing::debug!(limit = self.limit, "waiting for a free connection");
        }
        while *in_use >= self.limit {
            self.released.wait(&mut in_use);
        }
        *in_use += 1;
        Permit {
            gate: Arc::clone(self),
        }
    }

    pub(crate) fn in_use(&self) -> usize {
        *self.in_use.lock()
    }
}

/// One occupied slot; freed on drop.
#[derive(Debug)]
pub(crate) struct Permit {
    gate: Arc<ConnectionGate>,
}

impl Drop for Permit {
    fn drop(&mut self) {
        let mut in_use = self.gate.in_use.lock();
        *in_use = in_use.saturating_sub(1);
        self.gate.released.notify_one();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_acquire_waits_for_release() {
        let gate = ConnectionGate::new(1);
        let first = gate.acquire();

        let (tx, rx) = mpsc::channel();
        let waiter = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                let _second = gate.acquire();
                tx.send(()).unwrap();
            })
        };

        assert!(rx.recv_timeout(Duration::from_millis(200)).is_err());
        assert_eq!(gate.in_use(), 1);

        drop(first);
        rx.recv_timeout(Duration::from_secs(5)).unwrap();
        waiter.join().unwrap();
        assert_eq!(gate.in_use(), 0);
    }

    #[test]
    fn test_permits_up_to_limit() {
        let gate = ConnectionGate::new(2);
        let a = gate.acquire();
        let b = gate.acquire();
        assert_eq!(gate.in_use(), 2);
        drop(a);
        drop(b);
        assert_eq!(gate.in_use(), 0);
    }
}
