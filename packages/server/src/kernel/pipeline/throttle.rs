//! Concurrency throttle for rate-limited external dependencies.
//!
//! Two bounds compose: a counting semaphore caps simultaneous in-flight
//! calls, and a monotonic-clock gate enforces a minimum spacing between
//! consecutive call starts across all callers. Permits release on drop,
//! so a call that errors can never leak a slot.

use anyhow::{anyhow, Result};
use tokio::sync::{Mutex, Semaphore, SemaphorePermit};
use tokio::time::{sleep_until, Duration, Instant};

/// One explicitly constructed throttle instance is shared by every call
/// site that talks to the protected dependency.
pub struct Throttle {
    semaphore: Semaphore,
    min_interval: Duration,
    last_start: Mutex<Option<Instant>>,
}

/// Held for the duration of one throttled call.
pub struct ThrottlePermit<'a> {
    _permit: SemaphorePermit<'a>,
}

impl Throttle {
    pub fn new(max_in_flight: usize, min_interval: Duration) -> Self {
        Self {
            semaphore: Semaphore::new(max_in_flight.max(1)),
            min_interval,
            last_start: Mutex::new(None),
        }
    }

    /// Wait for an admission slot and for the minimum spacing since the
    /// previous call start. Suspends as long as needed; there is no
    /// timeout at this layer.
    pub async fn acquire(&self) -> Result<ThrottlePermit<'_>> {
        let permit = self
            .semaphore
            .acquire()
            .await
            .map_err(|_| anyhow!("throttle semaphore closed"))?;

        if !self.min_interval.is_zero() {
            let mut last_start = self.last_start.lock().await;
            let now = Instant::now();
            if let Some(last) = *last_start {
                let earliest = last + self.min_interval;
                if earliest > now {
                    sleep_until(earliest).await;
                }
            }
            *last_start = Some(Instant::now());
        }

        Ok(ThrottlePermit { _permit: permit })
    }
}

impl std::fmt::Debug for Throttle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Throttle")
            .field("available", &self.semaphore.available_permits())
            .field("min_interval", &self.min_interval)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn consecutive_calls_are_spaced_by_min_interval() {
        let throttle = Throttle::new(4, Duration::from_millis(500));

        let start = Instant::now();
        let mut starts = Vec::new();
        for _ in 0..3 {
            let permit = throttle.acquire().await.unwrap();
            starts.push(Instant::now());
            drop(permit);
        }

        assert!(starts[0] - start < Duration::from_millis(500));
        assert!(starts[1] - starts[0] >= Duration::from_millis(500));
        assert!(starts[2] - starts[1] >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn in_flight_calls_are_bounded() {
        let throttle = Arc::new(Throttle::new(2, Duration::ZERO));
        let in_flight = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..6 {
            let throttle = throttle.clone();
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            handles.push(tokio::spawn(async move {
                let _permit = throttle.acquire().await.unwrap();
                let current = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(current, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(10)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
            }));
        }
        for handle in handles {
            handle.await.unwrap();
        }

        assert!(peak.load(Ordering::SeqCst) <= 2);
    }

    #[tokio::test(start_paused = true)]
    async fn dropped_permit_frees_the_slot_after_an_error() {
        let throttle = Throttle::new(1, Duration::ZERO);

        let failing_call = async {
            let _permit = throttle.acquire().await?;
            Err::<(), _>(anyhow!("upstream exploded"))
        };
        assert!(failing_call.await.is_err());

        // The slot must be free again.
        let _permit = throttle.acquire().await.unwrap();
    }
}
