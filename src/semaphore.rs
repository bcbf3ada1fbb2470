//! A counting semaphore whose capacity can be resized while waiters are
//! queued.
//!
//! The stock tokio semaphore cannot shrink its capacity below the number of
//! permits currently handed out, and it does not expose a waiter count, so
//! this module keeps its own slot accounting behind a mutex and uses
//! [`tokio::sync::Notify`] purely for wakeups. When the capacity shrinks
//! below the number of slots in use, no permit is revoked; the excess drains
//! as in-flight holders finish.

use std::sync::Mutex;

use tokio::sync::Notify;

/// A weighted semaphore that can be resized dynamically.
///
/// Safe for concurrent use from any number of tasks.
#[derive(Debug)]
pub struct Semaphore {
    inner: Mutex<Inner>,
    notify: Notify,
}

#[derive(Debug)]
struct Inner {
    max: usize,
    in_use: usize,
    waiters: usize,
}

impl Semaphore {
    /// Create a new semaphore with the given capacity
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                max: capacity,
                in_use: 0,
                waiters: 0,
            }),
            notify: Notify::new(),
        }
    }

    /// Wait until a slot is free, then claim it.
    ///
    /// The returned permit releases the slot on drop. The future is
    /// cancel-safe: dropping it while it waits restores the waiter count and
    /// claims nothing. Callers that need a bounded wait wrap this in
    /// [`tokio::time::timeout`].
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub async fn acquire(&self) -> SemaphorePermit<'_> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // Register for wakeups before checking capacity, so a release
            // that lands between the check and the sleep is not lost.
            notified.as_mut().enable();

            {
                let mut inner = self.inner.lock().unwrap();
                if inner.in_use < inner.max {
                    inner.in_use += 1;
                    return SemaphorePermit { semaphore: self };
                }
                inner.waiters += 1;
            }

            let waiting = WaiterGuard { semaphore: self };
            notified.await;
            drop(waiting);
        }
    }

    /// Claim a slot without waiting.
    ///
    /// Returns `None` if the semaphore is at capacity.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn try_acquire(&self) -> Option<SemaphorePermit<'_>> {
        let mut inner = self.inner.lock().unwrap();
        if inner.in_use < inner.max {
            inner.in_use += 1;
            Some(SemaphorePermit { semaphore: self })
        } else {
            None
        }
    }

    /// Change the capacity.
    ///
    /// Growing wakes all queued waiters so they can re-check; at most
    /// `capacity - in_use` of them will claim a slot. Shrinking never revokes
    /// a claimed slot.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    pub fn resize(&self, capacity: usize) {
        let grew = {
            let mut inner = self.inner.lock().unwrap();
            let old_max = inner.max;
            inner.max = capacity;
            capacity > old_max
        };

        if grew {
            self.notify.notify_waiters();
        }
    }

    /// The current maximum capacity
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.inner.lock().unwrap().max
    }

    /// The number of slots currently claimed.
    ///
    /// May transiently exceed [`capacity`](Self::capacity) after a shrink.
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn in_use(&self) -> usize {
        self.inner.lock().unwrap().in_use
    }

    /// The number of free slots, saturating at zero
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn available(&self) -> usize {
        let inner = self.inner.lock().unwrap();
        inner.max.saturating_sub(inner.in_use)
    }

    /// The number of tasks currently waiting for a slot
    ///
    /// # Panics
    ///
    /// Panics if the internal lock is poisoned.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.inner.lock().unwrap().waiters
    }

    /// Release one claimed slot and wake at most one waiter.
    fn release(&self) {
        let wake = {
            let mut inner = self.inner.lock().unwrap();
            if inner.in_use == 0 {
                return;
            }
            inner.in_use -= 1;
            // Only wake when the freed slot is actually usable; after a
            // shrink the slot may still be over capacity.
            inner.waiters > 0 && inner.in_use < inner.max
        };

        if wake {
            self.notify.notify_one();
        }
    }
}

/// RAII permit for one semaphore slot; dropping it releases the slot
#[derive(Debug)]
#[must_use = "the slot is released as soon as the permit is dropped"]
pub struct SemaphorePermit<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for SemaphorePermit<'_> {
    fn drop(&mut self) {
        self.semaphore.release();
    }
}

/// Keeps the waiter gauge accurate on every exit path, including
/// cancellation while parked on the notify.
struct WaiterGuard<'a> {
    semaphore: &'a Semaphore,
}

impl Drop for WaiterGuard<'_> {
    fn drop(&mut self) {
        self.semaphore.inner.lock().unwrap().waiters -= 1;
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use tokio::time::timeout;

    use super::Semaphore;

    #[tokio::test]
    async fn test_acquire_release_counts() {
        let sem = Semaphore::new(2);
        assert_eq!(sem.capacity(), 2);
        assert_eq!(sem.available(), 2);

        let first = sem.acquire().await;
        let second = sem.acquire().await;
        assert_eq!(sem.in_use(), 2);
        assert_eq!(sem.available(), 0);

        drop(first);
        assert_eq!(sem.in_use(), 1);
        assert_eq!(sem.available(), 1);

        drop(second);
        assert_eq!(sem.in_use(), 0);
    }

    #[tokio::test]
    async fn test_try_acquire_at_capacity() {
        let sem = Semaphore::new(1);
        let held = sem.try_acquire();
        assert!(held.is_some());
        assert!(sem.try_acquire().is_none());

        drop(held);
        assert!(sem.try_acquire().is_some());
    }

    #[tokio::test]
    async fn test_release_wakes_one_waiter() {
        let sem = Arc::new(Semaphore::new(1));
        let permit = sem.acquire().await;

        let waiter = tokio::spawn({
            let sem = Arc::clone(&sem);
            async move {
                let _permit = sem.acquire().await;
            }
        });

        // Let the waiter park itself.
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sem.waiting(), 1);

        drop(permit);
        timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should proceed after release")
            .unwrap();
        assert_eq!(sem.waiting(), 0);
    }

    #[tokio::test]
    async fn test_resize_up_unblocks_waiter() {
        let sem = Arc::new(Semaphore::new(2));
        let _first = sem.acquire().await;
        let _second = sem.acquire().await;
        assert_eq!(sem.available(), 0);

        let (started_tx, started_rx) = tokio::sync::oneshot::channel();
        let waiter = tokio::spawn({
            let sem = Arc::clone(&sem);
            async move {
                started_tx.send(()).unwrap();
                let permit = sem.acquire().await;
                std::mem::forget(permit);
            }
        });

        started_rx.await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        sem.resize(3);

        timeout(Duration::from_millis(100), waiter)
            .await
            .expect("waiter should acquire after resize")
            .unwrap();
        assert_eq!(sem.in_use(), 3);
    }

    #[tokio::test]
    async fn test_resize_down_keeps_claimed_slots() {
        let sem = Semaphore::new(3);
        let first = sem.acquire().await;
        let _second = sem.acquire().await;
        let _third = sem.acquire().await;

        sem.resize(1);
        assert_eq!(sem.capacity(), 1);
        assert_eq!(sem.in_use(), 3);
        assert_eq!(sem.available(), 0);

        // Draining one leaves the semaphore still over capacity.
        drop(first);
        assert_eq!(sem.in_use(), 2);
        assert!(sem.try_acquire().is_none());
    }

    #[tokio::test]
    async fn test_cancelled_acquire_restores_waiter_count() {
        let sem = Arc::new(Semaphore::new(1));
        let _permit = sem.acquire().await;

        let result = timeout(Duration::from_millis(50), sem.acquire()).await;
        assert!(result.is_err());
        assert_eq!(sem.waiting(), 0);
        assert_eq!(sem.in_use(), 1);
    }

    #[tokio::test]
    async fn test_zero_timeout_acts_as_try_acquire() {
        let sem = Semaphore::new(1);

        // A free slot is claimed on the first poll, before the deadline check.
        let permit = timeout(Duration::ZERO, sem.acquire()).await;
        assert!(permit.is_ok());

        // At capacity, the same call reports elapsed instead of waiting.
        let blocked = timeout(Duration::ZERO, sem.acquire()).await;
        assert!(blocked.is_err());
    }

    #[tokio::test]
    async fn test_waiters_drain_in_bounded_time_after_resize() {
        let sem = Arc::new(Semaphore::new(1));
        let _held = sem.acquire().await;

        let mut waiters = Vec::new();
        for _ in 0..4 {
            waiters.push(tokio::spawn({
                let sem = Arc::clone(&sem);
                async move {
                    let permit = sem.acquire().await;
                    std::mem::forget(permit);
                }
            }));
        }

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(sem.waiting(), 4);

        sem.resize(5);

        for waiter in waiters {
            timeout(Duration::from_millis(100), waiter)
                .await
                .expect("every queued waiter fits the grown capacity")
                .unwrap();
        }
        assert_eq!(sem.in_use(), 5);
        assert_eq!(sem.waiting(), 0);
    }
}
