//! Process-wide memory gate for segment memory.
//!
//! Builders request an estimate of the memory they are about to use and
//! hold the returned [`MemoryGrant`] until they are done. Requests that
//! would push usage past the limits block until enough is released.
//! Writable segments charge their growing stores and indexes without
//! waiting, so builds back off while writers hold a lot of memory.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::time::{Duration, Instant};

const GIB: u64 = 1024 * 1024 * 1024;

#[derive(Debug, Default)]
struct Usage {
    requested: u64,
    charged: u64,
}

impl Usage {
    fn total(&self) -> u64 {
        self.requested.saturating_add(self.charged)
    }
}

/// Caps outstanding allocation across all tables sharing the gate.
///
/// A request of `size` bytes is admitted when no other request is
/// outstanding or `used + size` stays below the applicable ceiling: `hard`
/// for requests no larger than `check`, `soft + check` for larger ones.
/// Large requests therefore back off earlier than small ones. `used`
/// includes charges, but charges alone never hold a request back, since
/// they are only released once a build finishes.
#[derive(Debug)]
pub struct MemoryLimit {
    usage: Mutex<Usage>,
    released: Condvar,
    check: u64,
    soft: u64,
    hard: u64,
}

impl Default for MemoryLimit {
    fn default() -> Self {
        Self::new(2 * GIB, 12 * GIB, 24 * GIB)
    }
}

impl MemoryLimit {
    /// Creates a gate with explicit limits.
    ///
    /// # Panics
    ///
    /// Panics unless `check <= soft <= hard`.
    #[must_use]
    pub fn new(check: u64, soft: u64, hard: u64) -> Self {
        assert!(check <= soft && soft <= hard, "memory limits out of order");
        Self {
            usage: Mutex::new(Usage::default()),
            released: Condvar::new(),
            check,
            soft,
            hard,
        }
    }

    fn admits(&self, usage: &Usage, size: u64) -> bool {
        let ceiling = if size <= self.check {
            self.hard
        } else {
            self.soft.saturating_add(self.check)
        };
        usage.requested == 0 || usage.total().saturating_add(size) < ceiling
    }

    fn grant(self: &Arc<Self>, usage: &mut Usage, size: u64, charged: bool) -> MemoryGrant {
        if charged {
            usage.charged += size;
        } else {
            usage.requested += size;
        }
        MemoryGrant {
            limit: Arc::clone(self),
            size,
            charged,
        }
    }

    /// Requests `size` bytes, blocking until they are admitted.
    pub fn request(self: &Arc<Self>, size: u64) -> MemoryGrant {
        let mut usage = self.usage.lock();
        while !self.admits(&usage, size) {
            tracing::debug!(size, used = usage.total(), "memory gate full, waiting");
            self.released.wait(&mut usage);
        }
        self.grant(&mut usage, size, false)
    }

    /// Requests `size` bytes, giving up once `timeout` has passed in total.
    /// Wakeups that still do not admit the request keep the same deadline.
    pub fn request_timeout(self: &Arc<Self>, size: u64, timeout: Duration) -> Option<MemoryGrant> {
        let deadline = Instant::now() + timeout;
        let mut usage = self.usage.lock();
        while !self.admits(&usage, size) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return None;
            }
            self.released.wait_for(&mut usage, left);
        }
        Some(self.grant(&mut usage, size, false))
    }

    /// Records `size` bytes already in use. Charges count against later
    /// requests but are never refused.
    pub fn charge(self: &Arc<Self>, size: u64) -> MemoryGrant {
        let mut usage = self.usage.lock();
        self.grant(&mut usage, size, true)
    }

    /// Returns the bytes currently granted or charged.
    #[must_use]
    pub fn used(&self) -> u64 {
        self.usage.lock().total()
    }

    fn adjust(&self, charged: bool, grow: u64, shrink: u64) {
        let mut usage = self.usage.lock();
        let slot = if charged {
            &mut usage.charged
        } else {
            &mut usage.requested
        };
        *slot = slot.saturating_add(grow).saturating_sub(shrink);
        if shrink > 0 {
            self.released.notify_all();
        }
    }
}

/// An admitted allocation; released on drop.
#[derive(Debug)]
pub struct MemoryGrant {
    limit: Arc<MemoryLimit>,
    size: u64,
    charged: bool,
}

impl MemoryGrant {
    /// Returns the granted size.
    #[must_use]
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Changes the granted size to `size` without waiting.
    pub fn resize(&mut self, size: u64) {
        let grow = size.saturating_sub(self.size);
        let shrink = self.size.saturating_sub(size);
        self.limit.adjust(self.charged, grow, shrink);
        self.size = size;
    }
}

impl Drop for MemoryGrant {
    fn drop(&mut self) {
        self.limit.adjust(self.charged, 0, self.size);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::thread;

    #[test]
    fn first_request_always_admitted() {
        let limit = Arc::new(MemoryLimit::new(10, 20, 40));
        let grant = limit.request(1000);
        assert_eq!(limit.used(), 1000);
        drop(grant);
        assert_eq!(limit.used(), 0);
    }

    #[test]
    fn large_requests_use_soft_ceiling() {
        let limit = Arc::new(MemoryLimit::new(10, 20, 40));
        let _a = limit.request(5);
        // 5 + 25 is not below 20 + 10
        assert!(limit
            .request_timeout(25, Duration::from_millis(10))
            .is_none());
        // small requests may go up to the hard limit
        let _b = limit.request(10);
        let _c = limit.request(10);
        assert_eq!(limit.used(), 25);
    }

    #[test]
    fn charges_are_never_refused() {
        let limit = Arc::new(MemoryLimit::new(10, 20, 40));
        let mut charge = limit.charge(50);
        assert_eq!(limit.used(), 50);
        // Charges alone never block a request.
        let first = limit.request(1);
        // A second request sees both.
        assert!(limit.request_timeout(1, Duration::from_millis(10)).is_none());
        drop(first);

        charge.resize(70);
        assert_eq!(limit.used(), 70);
        charge.resize(4);
        assert_eq!((limit.used(), charge.size()), (4, 4));
        let _a = limit.request(10);
        let _b = limit.request(10);
        assert_eq!(limit.used(), 24);
        drop(charge);
        assert_eq!(limit.used(), 20);
    }

    #[test]
    fn timeout_is_a_deadline_across_wakeups() {
        let limit = Arc::new(MemoryLimit::new(10, 20, 40));
        let _held = limit.request(5);
        let stop = Arc::new(AtomicBool::new(false));
        let churn = {
            let limit = Arc::clone(&limit);
            let stop = Arc::clone(&stop);
            thread::spawn(move || {
                let until = Instant::now() + Duration::from_secs(5);
                while !stop.load(Ordering::Relaxed) && Instant::now() < until {
                    drop(limit.request(1));
                    thread::sleep(Duration::from_millis(1));
                }
            })
        };
        let start = Instant::now();
        assert!(limit.request_timeout(25, Duration::from_millis(50)).is_none());
        let waited = start.elapsed();
        stop.store(true, Ordering::Relaxed);
        churn.join().unwrap();
        assert!(waited < Duration::from_secs(2), "waited {waited:?}");
    }

    #[test]
    fn blocked_request_wakes_on_release() {
        let limit = Arc::new(MemoryLimit::new(10, 20, 40));
        let first = limit.request(35);
        let waiter = {
            let limit = Arc::clone(&limit);
            thread::spawn(move || limit.request(10).size())
        };
        thread::sleep(Duration::from_millis(20));
        assert_eq!(limit.used(), 35);
        drop(first);
        assert_eq!(waiter.join().unwrap(), 10);
        assert_eq!(limit.used(), 0);
    }
}
