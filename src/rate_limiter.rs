//! Per-venue token bucket with priority classes (spec §4.B, component B).
//!
//! Generalizes two teacher shapes into one: `middleware::rate_limit`'s
//! sliding-window burst/limit accounting, and
//! `scrapers::polymarket_api::RateLimiter`'s per-API-class token tracking
//! loop (`acquire().await` that sleeps until the window resets). Neither
//! teacher limiter has a priority dimension; this adds one (EMERGENCY > HIGH
//! > NORMAL > LOW) so emergency closes preempt routine opens, which in turn
//! preempt discovery calls (spec §5).
//!
//! `acquire` is a genuine suspension point (spec §5), so the bucket is guarded
//! by `tokio::sync::Mutex` rather than `parking_lot` (never held across an
//! `.await` other than the `Notify` wait itself).

use crate::config::RateLimiterConfig;
use crate::errors::AdapterError;
use crate::models::Venue;
use std::cmp::Ordering as CmpOrdering;
use std::collections::{BinaryHeap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify};
use tokio::time::timeout;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Low,
    Normal,
    High,
    Emergency,
}

struct Waiter {
    priority: Priority,
    seq: u64,
}

impl PartialEq for Waiter {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}
impl Eq for Waiter {}

impl Ord for Waiter {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // BinaryHeap is a max-heap: higher priority must compare greater, and
        // within the same priority, the earlier-enqueued (lower seq) is
        // served first (FIFO), so it must also compare greater.
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}
impl PartialOrd for Waiter {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

struct BucketState {
    tokens: f64,
    capacity: f64,
    refill_per_sec: f64,
    last_refill: Instant,
    queue: BinaryHeap<Waiter>,
}

impl BucketState {
    fn refill(&mut self) {
        let now = Instant::now();
        let elapsed = now.duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.refill_per_sec).min(self.capacity);
        self.last_refill = now;
    }
}

struct Bucket {
    state: Mutex<BucketState>,
    notify: Notify,
}

/// Per-venue token bucket rate limiter with priority preemption.
pub struct RateLimiter {
    buckets: HashMap<Venue, Arc<Bucket>>,
    seq: AtomicU64,
}

impl RateLimiter {
    pub fn new(configs: &HashMap<Venue, RateLimiterConfig>) -> Self {
        let mut buckets = HashMap::new();
        for (venue, cfg) in configs {
            buckets.insert(
                *venue,
                Arc::new(Bucket {
                    state: Mutex::new(BucketState {
                        tokens: cfg.bucket_size as f64,
                        capacity: cfg.bucket_size as f64,
                        refill_per_sec: cfg.refill_per_sec,
                        last_refill: Instant::now(),
                        queue: BinaryHeap::new(),
                    }),
                    notify: Notify::new(),
                }),
            );
        }
        Self {
            buckets,
            seq: AtomicU64::new(0),
        }
    }

    /// Acquires `weight` tokens from `venue`'s bucket at the given priority,
    /// suspending until enough tokens are available or `deadline` elapses
    /// (spec §4.B). On deadline expiry returns `AdapterErrorKind::RateLimited`.
    pub async fn acquire(
        &self,
        venue: Venue,
        weight: u32,
        priority: Priority,
        deadline: Duration,
    ) -> Result<(), AdapterError> {
        let bucket = self
            .buckets
            .get(&venue)
            .ok_or_else(|| AdapterError::internal(format!("no rate limiter configured for {venue}")))?
            .clone();

        let seq = self.seq.fetch_add(1, Ordering::Relaxed);
        let weight = weight as f64;

        let fut = async {
            {
                let mut state = bucket.state.lock().await;
                state.queue.push(Waiter { priority, seq });
            }

            loop {
                let wait_notified = {
                    let mut state = bucket.state.lock().await;
                    state.refill();

                    let is_front = state
                        .queue
                        .peek()
                        .map(|w| w.priority == priority && w.seq == seq)
                        .unwrap_or(false);

                    if is_front && state.tokens >= weight {
                        state.tokens -= weight;
                        state.queue.pop();
                        bucket.notify.notify_waiters();
                        return;
                    }
                    bucket.notify.notified()
                };
                wait_notified.await;
            }
        };

        match timeout(deadline, fut).await {
            Ok(()) => Ok(()),
            Err(_) => {
                // Remove ourselves from the queue so we don't block others.
                let mut state = bucket.state.lock().await;
                let remaining: BinaryHeap<Waiter> = std::mem::take(&mut state.queue)
                    .into_iter()
                    .filter(|w| !(w.priority == priority && w.seq == seq))
                    .collect();
                state.queue = remaining;
                drop(state);
                bucket.notify.notify_waiters();
                Err(AdapterError::rate_limited(format!(
                    "deadline of {deadline:?} exceeded waiting for {weight} tokens on {venue}"
                )))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configs(bucket_size: u32, refill_per_sec: f64) -> HashMap<Venue, RateLimiterConfig> {
        let mut m = HashMap::new();
        m.insert(
            Venue::Hyperliquid,
            RateLimiterConfig {
                bucket_size,
                refill_per_sec,
            },
        );
        m
    }

    #[tokio::test]
    async fn acquires_immediately_when_tokens_available() {
        let limiter = RateLimiter::new(&configs(10, 1.0));
        limiter
            .acquire(Venue::Hyperliquid, 5, Priority::Normal, Duration::from_secs(1))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn fails_with_rate_limited_on_deadline() {
        let limiter = RateLimiter::new(&configs(1, 0.001));
        limiter
            .acquire(Venue::Hyperliquid, 1, Priority::Normal, Duration::from_secs(1))
            .await
            .unwrap();
        let err = limiter
            .acquire(Venue::Hyperliquid, 1, Priority::Normal, Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind, crate::errors::AdapterErrorKind::RateLimited);
    }

    #[tokio::test]
    async fn emergency_priority_preempts_waiting_normal() {
        let limiter = Arc::new(RateLimiter::new(&configs(1, 2.0)));
        // Drain the bucket.
        limiter
            .acquire(Venue::Hyperliquid, 1, Priority::Normal, Duration::from_secs(1))
            .await
            .unwrap();

        let order = Arc::new(Mutex::new(Vec::<&'static str>::new()));

        let l1 = limiter.clone();
        let o1 = order.clone();
        let normal_task = tokio::spawn(async move {
            l1.acquire(Venue::Hyperliquid, 1, Priority::Normal, Duration::from_secs(2))
                .await
                .unwrap();
            o1.lock().await.push("normal");
        });

        // Give the normal request time to enqueue first.
        tokio::time::sleep(Duration::from_millis(20)).await;

        let l2 = limiter.clone();
        let o2 = order.clone();
        let emergency_task = tokio::spawn(async move {
            l2.acquire(Venue::Hyperliquid, 1, Priority::Emergency, Duration::from_secs(2))
                .await
                .unwrap();
            o2.lock().await.push("emergency");
        });

        normal_task.await.unwrap();
        emergency_task.await.unwrap();

        let finished = order.lock().await.clone();
        assert_eq!(finished, vec!["emergency", "normal"]);
    }
}
