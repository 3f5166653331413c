use crate::registry::MetricRegistry;
use crate::schedule::RampSchedule;
use crate::transaction::{VuContext, VU_CONTEXT};
use std::future::Future;
use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};
use std::time::Duration;
use surge_core::Executor;
use tokio::task::JoinHandle;
use tokio::time::Instant;
#[allow(unused)]
use tracing::{debug, error, info, trace, warn};

/// The VU target over time for one executor.
pub(crate) enum Workload {
    Ramping(RampSchedule),
    Constant {
        vus: usize,
        duration: Duration,
    },
    Shared {
        vus: usize,
        budget: Arc<IterationBudget>,
        max_duration: Duration,
    },
}

impl Workload {
    pub fn new(executor: &Executor) -> Self {
        match executor {
            Executor::RampingVus { start_vus, stages } => {
                Workload::Ramping(RampSchedule::new(*start_vus, stages.clone()))
            }
            Executor::ConstantVus { vus, duration } => Workload::Constant {
                vus: *vus,
                duration: *duration,
            },
            Executor::SharedIterations {
                vus,
                iterations,
                max_duration,
            } => Workload::Shared {
                vus: *vus,
                budget: Arc::new(IterationBudget::new(*iterations)),
                max_duration: *max_duration,
            },
        }
    }

    /// VUs wanted at `elapsed`, `None` once no more work should be scheduled.
    pub fn target_at(&self, elapsed: Duration) -> Option<usize> {
        match self {
            Workload::Ramping(schedule) => schedule.target_at(elapsed),
            Workload::Constant { vus, duration } => (elapsed < *duration).then_some(*vus),
            Workload::Shared {
                vus, max_duration, ..
            } => (elapsed < *max_duration).then_some(*vus),
        }
    }

    pub fn budget(&self) -> Option<Arc<IterationBudget>> {
        match self {
            Workload::Shared { budget, .. } => Some(budget.clone()),
            _ => None,
        }
    }

    /// Whether VUs which stop on their own should be replaced.
    pub fn replaces_finished(&self) -> bool {
        !matches!(self, Workload::Shared { .. })
    }
}

/// Iterations left to hand out under the shared-iterations executor.
pub(crate) struct IterationBudget {
    remaining: AtomicU64,
}

impl IterationBudget {
    pub fn new(iterations: u64) -> Self {
        Self {
            remaining: AtomicU64::new(iterations),
        }
    }

    /// Claim one iteration, `false` once the budget is spent.
    pub fn claim(&self) -> bool {
        self.remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1))
            .is_ok()
    }
}

struct Vu {
    id: usize,
    handle: JoinHandle<()>,
    running: Arc<AtomicBool>,
}

impl Vu {
    fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }
}

/// The set of running VUs.
///
/// VUs taken out of service are asked to stop after their current iteration and are given until
/// their deadline to do so before being aborted. Aborted iterations are not recorded.
pub(crate) struct VuPool<T> {
    scenario: T,
    context: VuContext,
    budget: Option<Arc<IterationBudget>>,
    active: Vec<Vu>,
    retiring: Vec<(Vu, Instant)>,
    next_id: usize,
    vus_max: usize,
}

impl<T, F> VuPool<T>
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    pub fn new(
        scenario: T,
        registry: Arc<MetricRegistry>,
        discard_response_bodies: bool,
        budget: Option<Arc<IterationBudget>>,
    ) -> Self {
        Self {
            scenario,
            context: VuContext::new(registry, discard_response_bodies),
            budget,
            active: vec![],
            retiring: vec![],
            next_id: 1,
            vus_max: 0,
        }
    }

    pub fn set_vus(&mut self, vus: usize, graceful_ramp_down: Duration) {
        if self.active.len() > vus {
            let deadline = Instant::now() + graceful_ramp_down;
            for vu in self.active.drain(vus..) {
                trace!("Retiring VU {}", vu.id);
                vu.stop();
                self.retiring.push((vu, deadline));
            }
        } else {
            while self.active.len() < vus {
                let vu = self.spawn_vu();
                self.active.push(vu);
            }
        }

        self.vus_max = self.vus_max.max(self.running());
    }

    /// Drop VUs which have finished, aborting retiring VUs past their deadline.
    ///
    /// With `replace_finished`, active VUs which stopped on their own (a panicking scenario) are
    /// dropped too, so the next [`VuPool::set_vus`] replaces them.
    pub fn reap(&mut self, replace_finished: bool) {
        let now = Instant::now();
        self.retiring.retain(|(vu, deadline)| {
            if vu.handle.is_finished() {
                false
            } else if now >= *deadline {
                debug!("VU {} did not finish in time, interrupting.", vu.id);
                vu.handle.abort();
                false
            } else {
                true
            }
        });

        if replace_finished {
            self.active.retain(|vu| {
                if vu.handle.is_finished() {
                    error!("VU {} stopped unexpectedly, replacing it.", vu.id);
                    false
                } else {
                    true
                }
            });
        }
    }

    /// VUs currently executing, including those still finishing an iteration.
    pub fn running(&self) -> usize {
        self.active
            .iter()
            .chain(self.retiring.iter().map(|(vu, _)| vu))
            .filter(|vu| !vu.handle.is_finished())
            .count()
    }

    pub fn vus_max(&self) -> usize {
        self.vus_max
    }

    pub fn is_idle(&self) -> bool {
        self.running() == 0
    }

    /// Stop every VU, waiting up to `graceful_stop` for in-flight iterations.
    pub async fn shutdown(mut self, graceful_stop: Duration) {
        let deadline = Instant::now() + graceful_stop;
        let vus: Vec<Vu> = self
            .active
            .drain(..)
            .chain(self.retiring.drain(..).map(|(vu, _)| vu))
            .collect();

        for vu in &vus {
            vu.stop();
        }

        let mut interrupted = 0;
        for vu in vus {
            let mut handle = vu.handle;
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(())) => {}
                Ok(Err(err)) if err.is_panic() => error!("VU {} panicked: {err}", vu.id),
                Ok(Err(_)) => {}
                Err(_) => {
                    handle.abort();
                    interrupted += 1;
                }
            }
        }

        if interrupted > 0 {
            warn!("Interrupted {interrupted} VUs still running after {graceful_stop:?}.");
        }
    }

    fn spawn_vu(&mut self) -> Vu {
        let id = self.next_id;
        self.next_id += 1;

        let running = Arc::new(AtomicBool::new(true));
        let ctx = self.context.clone();

        let scenario = self.scenario.clone();
        let registry = self.context.registry.clone();
        let budget = self.budget.clone();
        let flag = running.clone();
        let handle = tokio::spawn(VU_CONTEXT.scope(ctx, async move {
            while flag.load(Ordering::Relaxed) {
                if let Some(budget) = &budget {
                    if !budget.claim() {
                        break;
                    }
                }

                let start = Instant::now();
                scenario().await;
                registry.record_iteration(start.elapsed());

                // An iteration which never awaits would otherwise starve the control loop.
                tokio::task::yield_now().await;
            }
        }));

        Vu {
            id,
            handle,
            running,
        }
    }
}

impl<T> Drop for VuPool<T> {
    fn drop(&mut self) {
        for vu in &self.active {
            vu.handle.abort();
        }
        for (vu, _) in &self.retiring {
            vu.handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::Observed;
    use surge_core::{Aggregation, Stage, ITERATIONS};

    #[test]
    fn budget_is_claimed_exactly() {
        let budget = IterationBudget::new(3);
        assert!(budget.claim());
        assert!(budget.claim());
        assert!(budget.claim());
        assert!(!budget.claim());
    }

    #[test]
    fn workload_targets() {
        let ramp = Workload::new(&Executor::RampingVus {
            start_vus: 0,
            stages: vec![Stage::new(Duration::from_secs(10), 10)],
        });
        assert_eq!(ramp.target_at(Duration::from_secs(5)), Some(5));
        assert_eq!(ramp.target_at(Duration::from_secs(11)), None);
        assert!(ramp.replaces_finished());
        assert!(ramp.budget().is_none());

        let constant = Workload::new(&Executor::ConstantVus {
            vus: 4,
            duration: Duration::from_secs(2),
        });
        assert_eq!(constant.target_at(Duration::from_secs(1)), Some(4));
        assert_eq!(constant.target_at(Duration::from_secs(2)), None);

        let shared = Workload::new(&Executor::SharedIterations {
            vus: 2,
            iterations: 10,
            max_duration: Duration::from_secs(60),
        });
        assert_eq!(shared.target_at(Duration::from_secs(59)), Some(2));
        assert!(!shared.replaces_finished());
        let budget = shared.budget().unwrap();
        assert_eq!((0..20).filter(|_| budget.claim()).count(), 10);
    }

    #[tokio::test]
    async fn pool_scales_up_and_down() {
        let registry = Arc::new(MetricRegistry::new());
        let scenario = || async {
            tokio::time::sleep(Duration::from_millis(5)).await;
        };
        let mut pool = VuPool::new(scenario, registry.clone(), true, None);

        pool.set_vus(8, Duration::from_secs(1));
        assert_eq!(pool.running(), 8);
        assert_eq!(pool.vus_max(), 8);

        pool.set_vus(2, Duration::from_secs(1));
        tokio::time::sleep(Duration::from_millis(50)).await;
        pool.reap(true);
        assert_eq!(pool.running(), 2);
        assert_eq!(pool.vus_max(), 8);

        pool.shutdown(Duration::from_secs(1)).await;

        match registry.observe(ITERATIONS, &Aggregation::Count, Duration::from_secs(1)) {
            Observed::Value(n) => assert!(n > 0.),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn retiring_vus_are_interrupted_after_ramp_down() {
        let registry = Arc::new(MetricRegistry::new());
        let scenario = || async {
            tokio::time::sleep(Duration::from_secs(60)).await;
        };
        let mut pool = VuPool::new(scenario, registry.clone(), true, None);

        pool.set_vus(3, Duration::ZERO);
        tokio::task::yield_now().await;
        pool.set_vus(0, Duration::ZERO);
        pool.reap(true);

        assert!(pool.is_idle());
        pool.shutdown(Duration::ZERO).await;
        assert_eq!(
            registry.observe(ITERATIONS, &Aggregation::Count, Duration::from_secs(1)),
            Observed::NoData
        );
    }

    #[tokio::test]
    async fn shared_budget_bounds_iterations() {
        let registry = Arc::new(MetricRegistry::new());
        let budget = Arc::new(IterationBudget::new(25));
        let scenario = || async {
            tokio::time::sleep(Duration::from_millis(1)).await;
        };
        let mut pool = VuPool::new(scenario, registry.clone(), true, Some(budget));

        pool.set_vus(4, Duration::ZERO);
        while !pool.is_idle() {
            tokio::time::sleep(Duration::from_millis(5)).await;
            pool.reap(false);
        }
        pool.shutdown(Duration::from_secs(1)).await;

        assert_eq!(
            registry.observe(ITERATIONS, &Aggregation::Count, Duration::from_secs(1)),
            Observed::Value(25.)
        );
    }
}
