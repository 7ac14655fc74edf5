//! Claim / compound cycle scheduling
//!
//! The core operations never sleep themselves; the delay between claiming
//! and compounding, and the optional repeat interval, live here behind a
//! [`Timer`] so cycles can be driven without wall-clock time in tests.

use crate::chain::ChainClient;
use crate::compounder::Compounder;
use crate::config::CompounderConfig;
use crate::error::{CompounderError, CompounderResult};
use crate::metrics;
use crate::tx::TxOutcome;

use async_trait::async_trait;
use std::time::Duration;
use tracing::{error, info};

/// Source of delays between cycle steps
#[async_trait]
pub trait Timer: Send + Sync {
    async fn sleep(&self, duration: Duration);
}

/// Timer backed by the tokio runtime clock
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// The two steps of a compounding cycle
#[async_trait]
pub trait CompoundJob: Send + Sync {
    async fn claim_rewards(&self) -> CompounderResult<TxOutcome>;
    async fn compound(&self) -> CompounderResult<TxOutcome>;
}

#[async_trait]
impl<C: ChainClient> CompoundJob for Compounder<C> {
    async fn claim_rewards(&self) -> CompounderResult<TxOutcome> {
        Compounder::claim_rewards(self).await
    }

    async fn compound(&self) -> CompounderResult<TxOutcome> {
        Compounder::compound(self).await
    }
}

/// Result of one claim / compound cycle
#[derive(Debug)]
pub struct CycleReport {
    pub claim: CompounderResult<TxOutcome>,
    pub compound: CompounderResult<TxOutcome>,
}

impl CycleReport {
    pub fn is_success(&self) -> bool {
        self.claim.is_ok() && self.compound.is_ok()
    }

    fn label(&self) -> &'static str {
        match (self.claim.is_ok(), self.compound.is_ok()) {
            (true, true) => "success",
            (false, false) => "failed",
            _ => "partial",
        }
    }
}

pub struct Scheduler<T> {
    timer: T,
    claim_to_compound_delay: Duration,
    repeat_interval: Option<Duration>,
}

impl Scheduler<TokioTimer> {
    pub fn from_config(config: &CompounderConfig) -> Self {
        Self::new(
            TokioTimer,
            Duration::from_secs(config.claim_to_compound_delay_secs),
            config.repeat_interval_secs.map(Duration::from_secs),
        )
    }
}

impl<T: Timer> Scheduler<T> {
    pub fn new(timer: T, claim_to_compound_delay: Duration, repeat_interval: Option<Duration>) -> Self {
        Self {
            timer,
            claim_to_compound_delay,
            repeat_interval,
        }
    }

    /// Claim, wait, then compound. A failed claim does not skip the compound
    /// step.
    pub async fn run_cycle<J: CompoundJob + ?Sized>(&self, job: &J) -> CycleReport {
        let claim = job.claim_rewards().await;
        if let Err(e) = &claim {
            log_failure("Claim", e);
        }

        info!(
            "Waiting {}s before compounding",
            self.claim_to_compound_delay.as_secs()
        );
        self.timer.sleep(self.claim_to_compound_delay).await;

        let compound = job.compound().await;
        if let Err(e) = &compound {
            log_failure("Compound", e);
        }

        let report = CycleReport { claim, compound };
        metrics::record_cycle(report.label());
        info!("Cycle finished: {}", report.label());
        report
    }

    /// Run one cycle, or keep cycling when a repeat interval is configured.
    /// Returns the last cycle's report.
    pub async fn run<J: CompoundJob + ?Sized>(&self, job: &J) -> CycleReport {
        loop {
            let report = self.run_cycle(job).await;
            match self.repeat_interval {
                Some(interval) => {
                    info!("Next cycle in {}s", interval.as_secs());
                    self.timer.sleep(interval).await;
                }
                None => return report,
            }
        }
    }
}

fn log_failure(step: &str, err: &CompounderError) {
    match err {
        CompounderError::InsufficientBalance { .. } | CompounderError::NoStakeAssignments { .. } => {
            error!("{} skipped: {}", step, err)
        }
        _ => error!("{} failed: {}", step, err),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct RecordingTimer {
        sleeps: Arc<Mutex<Vec<Duration>>>,
    }

    #[async_trait]
    impl Timer for RecordingTimer {
        async fn sleep(&self, duration: Duration) {
            self.sleeps.lock().unwrap().push(duration);
            tokio::task::yield_now().await;
        }
    }

    /// Records the order of calls; claim fails while `fail_claim` is set
    #[derive(Default)]
    struct FakeJob {
        calls: Mutex<Vec<&'static str>>,
        fail_claim: bool,
        compounds: AtomicU32,
    }

    fn outcome(hash: &str) -> TxOutcome {
        TxOutcome {
            height: 10,
            tx_hash: hash.to_string(),
            gas_used: 1000,
            attempts: 1,
        }
    }

    #[async_trait]
    impl CompoundJob for FakeJob {
        async fn claim_rewards(&self) -> CompounderResult<TxOutcome> {
            self.calls.lock().unwrap().push("claim");
            if self.fail_claim {
                return Err(CompounderError::Transport("connection reset".into()));
            }
            Ok(outcome("CLAIM"))
        }

        async fn compound(&self) -> CompounderResult<TxOutcome> {
            self.calls.lock().unwrap().push("compound");
            self.compounds.fetch_add(1, Ordering::SeqCst);
            Ok(outcome("STAKE"))
        }
    }

    #[tokio::test]
    async fn test_cycle_order_and_delay() {
        let timer = RecordingTimer::default();
        let scheduler = Scheduler::new(timer.clone(), Duration::from_secs(10), None);
        let job = FakeJob::default();

        let report = scheduler.run_cycle(&job).await;

        assert!(report.is_success());
        assert_eq!(report.compound.unwrap().tx_hash, "STAKE");
        assert_eq!(*job.calls.lock().unwrap(), vec!["claim", "compound"]);
        assert_eq!(*timer.sleeps.lock().unwrap(), vec![Duration::from_secs(10)]);
    }

    #[tokio::test]
    async fn test_failed_claim_still_compounds() {
        let scheduler = Scheduler::new(RecordingTimer::default(), Duration::from_secs(10), None);
        let job = FakeJob {
            fail_claim: true,
            ..Default::default()
        };

        let report = scheduler.run_cycle(&job).await;

        assert!(!report.is_success());
        assert_eq!(report.label(), "partial");
        assert!(matches!(report.claim, Err(CompounderError::Transport(_))));
        assert!(report.compound.is_ok());
    }

    #[tokio::test]
    async fn test_run_once_without_repeat() {
        let timer = RecordingTimer::default();
        let scheduler = Scheduler::new(timer.clone(), Duration::from_secs(3), None);
        let job = FakeJob::default();

        scheduler.run(&job).await;

        assert_eq!(job.compounds.load(Ordering::SeqCst), 1);
        assert_eq!(timer.sleeps.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_run_repeats_on_interval() {
        let timer = RecordingTimer::default();
        let scheduler = Scheduler::new(
            timer.clone(),
            Duration::from_secs(3),
            Some(Duration::from_secs(60)),
        );
        let job = FakeJob::default();

        tokio::select! {
            _ = scheduler.run(&job) => unreachable!("repeating scheduler returned"),
            _ = async {
                while job.compounds.load(Ordering::SeqCst) < 3 {
                    tokio::task::yield_now().await;
                }
            } => {}
        }

        let sleeps = timer.sleeps.lock().unwrap().clone();
        assert!(sleeps.len() >= 5);
        assert_eq!(
            &sleeps[..5],
            &[
                Duration::from_secs(3),
                Duration::from_secs(60),
                Duration::from_secs(3),
                Duration::from_secs(60),
                Duration::from_secs(3),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_tokio_timer_uses_runtime_clock() {
        let start = tokio::time::Instant::now();
        TokioTimer.sleep(Duration::from_secs(10)).await;
        assert!(start.elapsed() >= Duration::from_secs(10));
    }
}
