//! Finality resolution by predicate polling.
//!
//! Some EVM chains never expose a `finalized` block tag; the only way to
//! learn whether a block is final is to ask a per-block predicate (e.g.
//! Moonbeam's `moon_isBlockFinalized`). This module polls that predicate
//! for a candidate height with linearly growing sleeps.
//!
//! The probe is a trait so the strategy composes with any adapter (and
//! with test doubles) instead of being baked into one client.

use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use watchtower_core::error::{ChainError, ChainResult};
use watchtower_core::models::FinalityResolution;

/// Chain-side operations the finality poll needs.
#[async_trait]
pub trait FinalityProbe: Send + Sync {
    /// Candidate height obtained via the chain's generic height method.
    async fn candidate_height(&self) -> ChainResult<u64>;

    /// Hash of the block at `height`.
    async fn block_hash(&self, height: u64) -> ChainResult<String>;

    /// Whether the block with `hash` is final.
    async fn is_finalized(&self, hash: &str) -> ChainResult<bool>;
}

/// Attempt budget and linear backoff for the predicate poll.
#[derive(Debug, Clone, Copy)]
pub struct FinalityPollPolicy {
    pub max_attempts: u32,
    pub initial_delay: Duration,
    /// Fixed increment added to the sleep after every attempt. The delay
    /// never decreases and has no cap - observed production behavior,
    /// kept tunable rather than silently replaced with exponential.
    pub step: Duration,
}

impl Default for FinalityPollPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 10,
            initial_delay: Duration::from_secs(1),
            step: Duration::from_secs(1),
        }
    }
}

impl FinalityPollPolicy {
    /// Build from the job-level configuration, if it selects polling.
    pub fn from_resolution(resolution: &FinalityResolution) -> Option<Self> {
        match resolution {
            FinalityResolution::Tag => None,
            FinalityResolution::Poll {
                max_attempts,
                initial_delay_ms,
                step_ms,
            } => Some(Self {
                max_attempts: *max_attempts,
                initial_delay: Duration::from_millis(*initial_delay_ms),
                step: Duration::from_millis(*step_ms),
            }),
        }
    }
}

/// Resolve a finalized height by polling the per-block predicate.
///
/// Obtains a candidate height once, then repeats (sleep, fetch hash, query
/// predicate) until the predicate confirms or the attempt budget runs out.
/// RPC failures from the hash fetch or the predicate itself are logged and
/// count as no-progress attempts against the same budget.
///
/// Exhausting the budget is [`ChainError::FinalityUnresolved`] naming the
/// candidate height - never a silently stale answer.
pub async fn resolve_finalized_height<P: FinalityProbe + ?Sized>(
    probe: &P,
    policy: &FinalityPollPolicy,
) -> ChainResult<u64> {
    let candidate = probe.candidate_height().await?;
    debug!(candidate, "Polling finality predicate");

    let mut delay = policy.initial_delay;

    for attempt in 1..=policy.max_attempts {
        tokio::time::sleep(delay).await;

        match check_once(probe, candidate).await {
            Ok(true) => {
                debug!(candidate, attempt, "Block finalized");
                return Ok(candidate);
            }
            Ok(false) => {
                debug!(candidate, attempt, delay_ms = delay.as_millis() as u64, "Not final yet");
            }
            Err(e) => {
                warn!(
                    candidate,
                    attempt,
                    error = %e,
                    "⚠️  Finality predicate call failed, counting as no progress"
                );
            }
        }

        delay += policy.step;
    }

    Err(ChainError::FinalityUnresolved {
        height: candidate,
        attempts: policy.max_attempts,
    })
}

async fn check_once<P: FinalityProbe + ?Sized>(probe: &P, height: u64) -> ChainResult<bool> {
    let hash = probe.block_hash(height).await?;
    probe.is_finalized(&hash).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;

    struct MockProbe {
        height: u64,
        finalize_after: u32,
        predicate_calls: AtomicU32,
        hash_failures: AtomicU32,
        call_instants: Mutex<Vec<tokio::time::Instant>>,
    }

    impl MockProbe {
        fn new(height: u64, finalize_after: u32) -> Self {
            Self {
                height,
                finalize_after,
                predicate_calls: AtomicU32::new(0),
                hash_failures: AtomicU32::new(0),
                call_instants: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl FinalityProbe for MockProbe {
        async fn candidate_height(&self) -> ChainResult<u64> {
            Ok(self.height)
        }

        async fn block_hash(&self, height: u64) -> ChainResult<String> {
            if self.hash_failures.load(Ordering::SeqCst) > 0 {
                self.hash_failures.fetch_sub(1, Ordering::SeqCst);
                return Err(ChainError::Rpc("hash lookup failed".into()));
            }
            Ok(format!("0xhash{height}"))
        }

        async fn is_finalized(&self, _hash: &str) -> ChainResult<bool> {
            self.call_instants
                .lock()
                .unwrap()
                .push(tokio::time::Instant::now());
            let calls = self.predicate_calls.fetch_add(1, Ordering::SeqCst) + 1;
            Ok(calls >= self.finalize_after)
        }
    }

    fn policy(max_attempts: u32) -> FinalityPollPolicy {
        FinalityPollPolicy {
            max_attempts,
            initial_delay: Duration::from_millis(100),
            step: Duration::from_millis(100),
        }
    }

    // Propriété: le sondage se termine après exactement k appels quand le
    // prédicat devient vrai au k-ième, et renvoie la hauteur obtenue au départ
    #[tokio::test(start_paused = true)]
    async fn terminates_when_predicate_confirms() {
        let probe = MockProbe::new(5_000, 3);
        let height = resolve_finalized_height(&probe, &policy(10)).await.unwrap();

        assert_eq!(height, 5_000);
        assert_eq!(probe.predicate_calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn sleep_intervals_never_decrease() {
        let probe = MockProbe::new(1, 5);
        resolve_finalized_height(&probe, &policy(10)).await.unwrap();

        let instants = probe.call_instants.lock().unwrap();
        let gaps: Vec<Duration> = instants.windows(2).map(|w| w[1] - w[0]).collect();
        // Linear growth: 100ms, then 200ms, 300ms, 400ms between calls.
        for pair in gaps.windows(2) {
            assert!(pair[1] >= pair[0], "sleep interval decreased: {gaps:?}");
        }
        assert_eq!(gaps[0], Duration::from_millis(200));
        assert_eq!(gaps[1], Duration::from_millis(300));
    }

    // Propriété: un prédicat qui ne confirme jamais épuise le budget et
    // échoue en nommant le bloc non résolu
    #[tokio::test(start_paused = true)]
    async fn exhaustion_names_the_block() {
        let probe = MockProbe::new(7_777, u32::MAX);
        let err = resolve_finalized_height(&probe, &policy(4)).await.unwrap_err();

        match err {
            ChainError::FinalityUnresolved { height, attempts } => {
                assert_eq!(height, 7_777);
                assert_eq!(attempts, 4);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(probe.predicate_calls.load(Ordering::SeqCst), 4);
    }

    // RPC errors during the poll count against the same budget.
    #[tokio::test(start_paused = true)]
    async fn rpc_failures_count_as_no_progress() {
        let probe = MockProbe::new(10, 1);
        probe.hash_failures.store(2, Ordering::SeqCst);

        let height = resolve_finalized_height(&probe, &policy(5)).await.unwrap();
        assert_eq!(height, 10);
        // Two attempts lost to hash failures, confirmed on the third.
        assert_eq!(probe.predicate_calls.load(Ordering::SeqCst), 1);
    }
}
