//! The single writer slot.
//!
//! At most one write transaction holds the slot at a time. Readers never
//! touch it.

use log::debug;
use parking_lot::{Condvar, Mutex};
use std::time::Instant;

use crate::config::WriterPolicy;
use crate::error::{Error, Result};
use crate::transaction::TransactionId;

#[derive(Debug, Default)]
pub struct WriterSlot {
    holder: Mutex<Option<TransactionId>>,
    cv: Condvar,
}

impl WriterSlot {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claims the slot for `txn`, waiting according to `policy`.
    pub fn acquire(&self, txn: TransactionId, policy: WriterPolicy) -> Result<()> {
        let mut holder = self.holder.lock();

        match policy {
            WriterPolicy::FailFast => {}
            WriterPolicy::Block => {
                while holder.is_some() {
                    self.cv.wait(&mut holder);
                }
            }
            WriterPolicy::Timeout(timeout) => {
                let deadline = Instant::now() + timeout;
                while holder.is_some() {
                    if self.cv.wait_until(&mut holder, deadline).timed_out() {
                        break;
                    }
                }
            }
        }

        if let Some(current) = *holder {
            debug!("{} denied writer slot held by {}", txn, current);
            return Err(Error::WriteConflict { holder: current });
        }

        *holder = Some(txn);
        debug!("{} acquired writer slot", txn);
        Ok(())
    }

    /// Gives the slot back. Releasing a slot held by someone else is a no-op.
    pub fn release(&self, txn: TransactionId) {
        let mut holder = self.holder.lock();
        if *holder == Some(txn) {
            *holder = None;
            self.cv.notify_one();
        }
    }

    pub fn holder(&self) -> Option<TransactionId> {
        *self.holder.lock()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn test_fail_fast_conflict() {
        let slot = WriterSlot::new();
        let t1 = TransactionId::new(1);
        let t2 = TransactionId::new(2);

        slot.acquire(t1, WriterPolicy::FailFast).unwrap();
        assert!(matches!(
            slot.acquire(t2, WriterPolicy::FailFast),
            Err(Error::WriteConflict { holder }) if holder == t1
        ));

        slot.release(t1);
        slot.acquire(t2, WriterPolicy::FailFast).unwrap();
        assert_eq!(slot.holder(), Some(t2));
    }

    #[test]
    fn test_release_by_non_holder_is_ignored() {
        let slot = WriterSlot::new();
        let t1 = TransactionId::new(1);

        slot.acquire(t1, WriterPolicy::FailFast).unwrap();
        slot.release(TransactionId::new(9));
        assert_eq!(slot.holder(), Some(t1));
    }

    #[test]
    fn test_timeout_expires() {
        let slot = WriterSlot::new();
        slot.acquire(TransactionId::new(1), WriterPolicy::FailFast).unwrap();

        let start = Instant::now();
        let result = slot.acquire(
            TransactionId::new(2),
            WriterPolicy::Timeout(Duration::from_millis(50)),
        );
        assert!(matches!(result, Err(Error::WriteConflict { .. })));
        assert!(start.elapsed() >= Duration::from_millis(50));
    }

    #[test]
    fn test_block_waits_for_release() {
        let slot = Arc::new(WriterSlot::new());
        let t1 = TransactionId::new(1);
        slot.acquire(t1, WriterPolicy::FailFast).unwrap();

        let waiter = {
            let slot = Arc::clone(&slot);
            thread::spawn(move || slot.acquire(TransactionId::new(2), WriterPolicy::Block))
        };

        thread::sleep(Duration::from_millis(50));
        slot.release(t1);

        waiter.join().unwrap().unwrap();
        assert_eq!(slot.holder(), Some(TransactionId::new(2)));
    }
}
