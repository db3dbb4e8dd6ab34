//! Abandonment detection for inbound transmissions.
//!
//! Each announced transmission gets one detector task. The first check is
//! due an initial grace period after the announcement, later ones at a
//! fixed interval after that, until the transmission completes or is
//! evicted. A sender that vanishes
//! mid-transmission therefore cannot pin receiver memory forever.
//!
//! Eviction is silent on the wire: the sender is never told.

use std::sync::Weak;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};

use lixnet_core::config::AbandonConfig;

use crate::diagnostics::{AbandonReason, Diagnostic};
use crate::inbound::InboundTransmission;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AbandonPolicy {
    pub initial_delay: Duration,
    pub check_interval: Duration,
    pub stall_timeout: Duration,
    pub max_completion_estimate: Duration,
    /// How long an outbound transmission waits for its launch signal.
    pub launch_timeout: Duration,
}

impl Default for AbandonPolicy {
    fn default() -> Self {
        Self::from_config(&AbandonConfig::default())
    }
}

impl AbandonPolicy {
    pub fn from_config(config: &AbandonConfig) -> Self {
        Self {
            initial_delay: config.initial_delay(),
            check_interval: config.check_interval(),
            stall_timeout: config.stall_timeout(),
            max_completion_estimate: config.max_completion_estimate(),
            launch_timeout: config.launch_timeout(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Keep,
    Complete,
    Evict(AbandonReason),
}

/// Judge one transmission at `now`.
///
/// Stalled: no chunk yet, or the newest chunk is older than the stall
/// timeout. Too slow: with two or more chunks, the mean gap between
/// arrivals times the chunks still missing exceeds the completion budget.
pub fn assess(transmission: &InboundTransmission, now: Instant, policy: &AbandonPolicy) -> Verdict {
    if transmission.is_complete() {
        return Verdict::Complete;
    }

    let Some(last) = transmission.last_arrival() else {
        return Verdict::Evict(AbandonReason::Stalled);
    };
    if now.saturating_duration_since(last) > policy.stall_timeout {
        return Verdict::Evict(AbandonReason::Stalled);
    }

    let times = transmission.arrival_times();
    if times.len() > 1 {
        let total: Duration = times.windows(2).map(|w| w[1] - w[0]).sum();
        let gaps = u32::try_from(times.len() - 1).unwrap_or(u32::MAX);
        let missing = u32::try_from(transmission.missing()).unwrap_or(u32::MAX);
        let estimate = (total / gaps).saturating_mul(missing);
        if estimate > policy.max_completion_estimate {
            return Verdict::Evict(AbandonReason::TooSlow { estimate });
        }
    }

    Verdict::Keep
}

/// Watch `transmission_id` in `table` until it completes or is evicted.
///
/// Check times are fixed relative to `announced_at`, not to when the task
/// first runs. The task holds only a weak reference, so dropping the
/// owning peer also ends every detector.
pub fn spawn_detector(
    table: Weak<DashMap<String, InboundTransmission>>,
    transmission_id: String,
    announced_at: Instant,
    policy: AbandonPolicy,
    diagnostics: broadcast::Sender<Diagnostic>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        // `interval_at` panics on a zero period.
        let period = policy.check_interval.max(Duration::from_millis(1));
        let mut checks = tokio::time::interval_at(announced_at + policy.initial_delay, period);
        checks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            checks.tick().await;
            let Some(table) = table.upgrade() else {
                return;
            };

            let now = Instant::now();
            let mut verdict = None;
            let evicted = table.remove_if(&transmission_id, |_, t| {
                let v = assess(t, now, &policy);
                verdict = Some(v);
                matches!(v, Verdict::Evict(_))
            });

            match verdict {
                // Gone already: completed and delivered, or replaced.
                None | Some(Verdict::Complete) => return,
                Some(Verdict::Evict(reason)) => {
                    if let Some((_, t)) = evicted {
                        tracing::warn!(
                            transmission_id = %transmission_id,
                            event = %t.event,
                            received = t.received(),
                            chunk_count = t.chunk_count,
                            ?reason,
                            "abandoning inbound transmission"
                        );
                    }
                    let _ = diagnostics.send(Diagnostic::Abandoned {
                        transmission_id,
                        reason,
                    });
                    return;
                }
                Some(Verdict::Keep) => {}
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn secs(n: u64) -> Duration {
        Duration::from_secs(n)
    }

    #[tokio::test(start_paused = true)]
    async fn no_chunks_is_stalled() {
        let t = InboundTransmission::new("e", 2, None);
        assert_eq!(
            assess(&t, Instant::now(), &AbandonPolicy::default()),
            Verdict::Evict(AbandonReason::Stalled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn old_last_chunk_is_stalled() {
        let policy = AbandonPolicy::default();
        let start = Instant::now();
        let mut t = InboundTransmission::new("e", 3, None);
        t.insert_at(0, "a".into(), start);

        assert_eq!(assess(&t, start + secs(30), &policy), Verdict::Keep);
        assert_eq!(
            assess(&t, start + secs(31), &policy),
            Verdict::Evict(AbandonReason::Stalled)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn slow_progress_is_too_slow() {
        let policy = AbandonPolicy::default();
        let start = Instant::now();
        let mut t = InboundTransmission::new("e", 20, None);
        t.insert_at(0, "a".into(), start);
        t.insert_at(1, "b".into(), start + secs(20));

        // 20s per chunk with 18 to go projects 360s.
        assert_eq!(
            assess(&t, start + secs(30), &policy),
            Verdict::Evict(AbandonReason::TooSlow {
                estimate: secs(360)
            })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn steady_progress_is_kept() {
        let policy = AbandonPolicy::default();
        let start = Instant::now();
        let mut t = InboundTransmission::new("e", 3, None);
        t.insert_at(0, "a".into(), start);
        t.insert_at(1, "b".into(), start + secs(5));
        assert_eq!(assess(&t, start + secs(30), &policy), Verdict::Keep);
    }

    #[tokio::test(start_paused = true)]
    async fn complete_is_never_evicted() {
        let start = Instant::now();
        let mut t = InboundTransmission::new("e", 1, None);
        t.insert_at(0, "a".into(), start);
        assert_eq!(
            assess(&t, start + secs(3600), &AbandonPolicy::default()),
            Verdict::Complete
        );
    }

    #[tokio::test(start_paused = true)]
    async fn detector_evicts_at_first_check() {
        let table = Arc::new(DashMap::new());
        table.insert("LX-t".to_string(), InboundTransmission::new("e", 2, None));
        let (tx, mut rx) = broadcast::channel(8);

        let handle = spawn_detector(
            Arc::downgrade(&table),
            "LX-t".into(),
            Instant::now(),
            AbandonPolicy::default(),
            tx,
        );

        tokio::time::sleep(secs(29)).await;
        assert!(table.contains_key("LX-t"));

        handle.await.unwrap();
        assert!(!table.contains_key("LX-t"));
        assert_eq!(
            rx.recv().await.unwrap(),
            Diagnostic::Abandoned {
                transmission_id: "LX-t".into(),
                reason: AbandonReason::Stalled,
            }
        );
    }

    #[tokio::test(start_paused = true)]
    async fn detector_stops_when_transmission_is_gone() {
        let table = Arc::new(DashMap::new());
        table.insert("LX-t".to_string(), InboundTransmission::new("e", 2, None));
        let (tx, mut rx) = broadcast::channel(8);

        let handle = spawn_detector(
            Arc::downgrade(&table),
            "LX-t".into(),
            Instant::now(),
            AbandonPolicy::default(),
            tx,
        );
        table.remove("LX-t");

        handle.await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn first_check_is_anchored_to_the_announcement() {
        let announced_at = Instant::now();
        let table = Arc::new(DashMap::new());
        table.insert("LX-t".to_string(), InboundTransmission::new("e", 2, None));
        let (tx, mut rx) = broadcast::channel(8);

        // The detector only starts running well after the announcement.
        tokio::time::advance(secs(31)).await;
        let handle = spawn_detector(
            Arc::downgrade(&table),
            "LX-t".into(),
            announced_at,
            AbandonPolicy::default(),
            tx,
        );

        handle.await.unwrap();
        assert!(announced_at.elapsed() < secs(32));
        assert!(!table.contains_key("LX-t"));
        assert!(matches!(rx.try_recv(), Ok(Diagnostic::Abandoned { .. })));
    }
}
