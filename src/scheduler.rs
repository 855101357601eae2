use crate::upstream::{GenerationBackend, GenerationParams, GenerationResult, SeedSpec};
use crate::{Error, Result};
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, info};

/// Stagger and batch limits, threaded in at construction.
#[derive(Debug, Clone)]
pub struct BatchConfig {
    pub max_batch: usize,
    pub delay_min_ms: u64,
    pub delay_max_ms: u64,
}

/// One slot in a batch. Consumed exactly once by the backend.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationTask {
    pub index: usize,
    pub seed: SeedSpec,
    /// Absolute delay before this task starts, cumulative over all earlier
    /// slots so attempts hit the upstream queue strictly in index order.
    pub start_delay: Duration,
}

/// Fans one request out into staggered concurrent generation attempts and
/// collects their results in slot order.
pub struct BatchScheduler {
    backend: Arc<dyn GenerationBackend>,
    config: BatchConfig,
}

impl BatchScheduler {
    pub fn new(backend: Arc<dyn GenerationBackend>, config: BatchConfig) -> Self {
        Self { backend, config }
    }

    /// Oversized batches are clamped, never rejected.
    pub fn clamp(&self, n: usize) -> usize {
        n.clamp(1, self.config.max_batch)
    }

    pub fn plan(&self, n: usize, seed: SeedSpec) -> Vec<GenerationTask> {
        let n = self.clamp(n);
        let mut rng = rand::thread_rng();
        let mut accumulated_ms = 0u64;

        (0..n)
            .map(|index| {
                if index > 0 {
                    accumulated_ms += rng.gen_range(self.config.delay_min_ms..=self.config.delay_max_ms);
                }
                GenerationTask {
                    index,
                    seed: seed.offset(index as i64),
                    start_delay: Duration::from_millis(accumulated_ms),
                }
            })
            .collect()
    }

    /// Runs a whole batch. Fail-fast: the first failed attempt fails the
    /// aggregate immediately, regardless of which slot it is, and no partial
    /// results are surfaced. Sibling attempts that are already in flight are
    /// left to finish on their own.
    pub async fn run(
        &self,
        params: &GenerationParams,
        seed: SeedSpec,
        n: usize,
    ) -> Result<Vec<GenerationResult>> {
        let tasks = self.plan(n, seed);
        let n = tasks.len();
        info!(batch = n, "launching generation batch");

        let (tx, mut rx) = mpsc::channel(n);
        for task in tasks {
            let backend = Arc::clone(&self.backend);
            let params = params.clone();
            let tx = tx.clone();
            tokio::spawn(async move {
                if !task.start_delay.is_zero() {
                    debug!(index = task.index, delay_ms = task.start_delay.as_millis() as u64, "staggering task start");
                    tokio::time::sleep(task.start_delay).await;
                }
                let result = backend.generate(&params, task.seed).await;
                // Nobody listens once the batch has already failed
                let _ = tx.send((task.index, result)).await;
            });
        }
        drop(tx);

        // Collect outcomes in completion order but place them by slot, so the
        // output stays index-correlated and the first failure surfaces
        // without waiting on slower siblings.
        let mut slots: Vec<Option<GenerationResult>> = (0..n).map(|_| None).collect();
        let mut remaining = n;
        while remaining > 0 {
            let Some((index, result)) = rx.recv().await else {
                return Err(Error::internal("generation task exited without reporting"));
            };
            slots[index] = Some(result?);
            remaining -= 1;
        }

        slots
            .into_iter()
            .map(|slot| slot.ok_or_else(|| Error::internal("batch slot left unfilled")))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;

    fn test_config() -> BatchConfig {
        BatchConfig {
            max_batch: 4,
            delay_min_ms: 1500,
            delay_max_ms: 3500,
        }
    }

    struct StubBackend {
        fail_on_seed: Option<i64>,
    }

    impl StubBackend {
        fn new() -> Self {
            Self { fail_on_seed: None }
        }

        fn failing_on(seed: i64) -> Self {
            Self {
                fail_on_seed: Some(seed),
            }
        }
    }

    #[async_trait]
    impl GenerationBackend for StubBackend {
        async fn generate(
            &self,
            _params: &GenerationParams,
            seed: SeedSpec,
        ) -> crate::Result<GenerationResult> {
            let seed = match seed {
                SeedSpec::Fixed(seed) => seed,
                SeedSpec::Randomized => 99,
            };
            if self.fail_on_seed == Some(seed) {
                return Err(Error::JoinFailed { status: 503 });
            }
            // Later slots finish faster, to prove output stays slot-ordered
            tokio::time::sleep(Duration::from_millis(20u64.saturating_sub(seed as u64))).await;
            Ok(GenerationResult {
                media_url: format!("https://upstream/img-{seed}.png"),
                seed,
                duration: 1.0,
            })
        }
    }

    fn params() -> GenerationParams {
        GenerationParams {
            prompt: "cat".to_string(),
            width: 1024,
            height: 1024,
            steps: 20,
        }
    }

    fn scheduler_with(backend: StubBackend, config: BatchConfig) -> BatchScheduler {
        BatchScheduler::new(Arc::new(backend), config)
    }

    #[test]
    fn test_plan_first_task_starts_immediately() {
        let scheduler = scheduler_with(StubBackend::new(), test_config());

        for n in 1..=4 {
            let tasks = scheduler.plan(n, SeedSpec::Randomized);
            assert_eq!(tasks[0].start_delay, Duration::ZERO);
        }
    }

    #[test]
    fn test_plan_delays_are_cumulative_and_bounded() {
        let scheduler = scheduler_with(StubBackend::new(), test_config());
        let tasks = scheduler.plan(4, SeedSpec::Randomized);

        let mut previous = Duration::ZERO;
        for (i, task) in tasks.iter().enumerate() {
            assert_eq!(task.index, i);
            assert!(task.start_delay >= previous);
            if i > 0 {
                let step = (task.start_delay - previous).as_millis() as u64;
                assert!((1500..=3500).contains(&step), "step {step} out of bounds");
            }
            previous = task.start_delay;
        }
    }

    #[test]
    fn test_plan_fixed_seeds_shift_by_slot() {
        let scheduler = scheduler_with(StubBackend::new(), test_config());
        let tasks = scheduler.plan(3, SeedSpec::Fixed(5));

        let seeds: Vec<_> = tasks.iter().map(|t| t.seed).collect();
        assert_eq!(
            seeds,
            vec![
                SeedSpec::Fixed(5),
                SeedSpec::Fixed(6),
                SeedSpec::Fixed(7)
            ]
        );
    }

    #[test]
    fn test_plan_randomized_seed_stays_randomized() {
        let scheduler = scheduler_with(StubBackend::new(), test_config());
        let tasks = scheduler.plan(3, SeedSpec::Randomized);

        assert!(tasks.iter().all(|t| t.seed == SeedSpec::Randomized));
    }

    #[test]
    fn test_plan_clamps_batch_size() {
        let scheduler = scheduler_with(StubBackend::new(), test_config());

        assert_eq!(scheduler.plan(10, SeedSpec::Randomized).len(), 4);
        assert_eq!(scheduler.plan(0, SeedSpec::Randomized).len(), 1);
    }

    #[tokio::test]
    async fn test_run_preserves_slot_order() {
        let config = BatchConfig {
            max_batch: 4,
            delay_min_ms: 0,
            delay_max_ms: 1,
        };
        let scheduler = scheduler_with(StubBackend::new(), config);

        let results = scheduler.run(&params(), SeedSpec::Fixed(0), 4).await.unwrap();

        let seeds: Vec<_> = results.iter().map(|r| r.seed).collect();
        assert_eq!(seeds, vec![0, 1, 2, 3]);
    }

    #[tokio::test]
    async fn test_run_fails_fast_when_any_attempt_fails() {
        let config = BatchConfig {
            max_batch: 4,
            delay_min_ms: 0,
            delay_max_ms: 1,
        };
        // Slot 1 (seed 6) fails, slots 0 and 2 would succeed
        let scheduler = scheduler_with(StubBackend::failing_on(6), config);

        let result = scheduler.run(&params(), SeedSpec::Fixed(5), 3).await;

        assert!(matches!(result, Err(Error::JoinFailed { status: 503 })));
    }

    /// A slot that fails instantly must fail the batch immediately, even
    /// while an earlier slot is still mid-generation.
    #[tokio::test]
    async fn test_run_failure_surfaces_before_slow_siblings_finish() {
        struct SlowThenFailBackend;

        #[async_trait]
        impl GenerationBackend for SlowThenFailBackend {
            async fn generate(
                &self,
                _params: &GenerationParams,
                seed: SeedSpec,
            ) -> crate::Result<GenerationResult> {
                match seed {
                    // Slot 0: slow success
                    SeedSpec::Fixed(0) => {
                        tokio::time::sleep(Duration::from_secs(2)).await;
                        Ok(GenerationResult {
                            media_url: "https://upstream/img-0.png".to_string(),
                            seed: 0,
                            duration: 1.0,
                        })
                    }
                    // Slot 1: immediate rejection
                    _ => Err(Error::JoinFailed { status: 503 }),
                }
            }
        }

        let config = BatchConfig {
            max_batch: 2,
            delay_min_ms: 0,
            delay_max_ms: 1,
        };
        let scheduler = BatchScheduler::new(Arc::new(SlowThenFailBackend), config);

        let started = std::time::Instant::now();
        let result = scheduler.run(&params(), SeedSpec::Fixed(0), 2).await;
        let elapsed = started.elapsed();

        assert!(matches!(result, Err(Error::JoinFailed { status: 503 })));
        assert!(
            elapsed < Duration::from_secs(1),
            "failure took {elapsed:?} to surface, blocked on a slow sibling"
        );
    }
}
