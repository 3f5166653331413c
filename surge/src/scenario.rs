//! Scenario logic and the control loop
use crate::error::ScenarioError;
use crate::executor::{VuPool, Workload};
use crate::registry::MetricRegistry;
use crate::thresholds::ThresholdSet;
use crate::timer::Timer;
use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll},
    time::Duration,
};
use surge_core::{
    ConfigError, RunStatistics, ScenarioConfig, Stage, Threshold, ThresholdSpec, TICKS_PER_WINDOW,
    TICK_INTERVAL, VUS, VUS_MAX,
};
use tokio::time::Instant;
#[allow(unused_imports)]
use tracing::{debug, error, info, instrument, trace, warn};

pub type ScenarioResult = Result<RunStatistics, ScenarioError>;

/// Load test scenario structure
///
/// Handler for running scenarios. Not intended for manual creation, use the [`#[scenario]`](surge_macros::scenario) macro which will add these methods to functions.
#[pin_project::pin_project]
pub struct Scenario<T> {
    func: T,
    runner_fut: Option<Pin<Box<dyn Future<Output = ScenarioResult> + Send>>>,
    config: ScenarioConfig,
    invalid: Option<ConfigError>,
}

impl<T> Scenario<T> {
    #[doc(hidden)]
    pub fn new(name: &str, func: T) -> Self {
        Self {
            func,
            runner_fut: None,
            config: ScenarioConfig::new(name),
            invalid: None,
        }
    }
}

impl<T, F> Future for Scenario<T>
where
    T: Fn() -> F + Send + 'static + Clone + Sync,
    F: Future<Output = ()> + Send + 'static,
{
    type Output = ScenarioResult;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.runner_fut.is_none() {
            let func = self.func.clone();
            let config = self.config.clone();
            let invalid = self.invalid.take();
            self.runner_fut = Some(Box::pin(async move {
                match invalid {
                    Some(err) => Err(err.into()),
                    None => run_scenario(func, config).await,
                }
            }));
        }

        if let Some(runner) = &mut self.runner_fut {
            runner.as_mut().poll(cx)
        } else {
            unreachable!()
        }
    }
}

pub trait ConfigurableScenario<T: Send>: Future<Output = T> + Sized + Send {
    fn stages(self, stages: impl IntoIterator<Item = Stage>) -> Self;
    fn stage(self, duration: Duration, target: usize) -> Self;
    fn threshold(self, metric: &str, threshold: &str) -> Self;
    fn threshold_spec(self, metric: &str, spec: ThresholdSpec) -> Self;
    fn discard_response_bodies(self, discard: bool) -> Self;
    fn vus(self, vus: usize) -> Self;
    fn duration(self, duration: Duration) -> Self;
    fn iterations(self, iterations: u64) -> Self;
    fn graceful_ramp_down(self, period: Duration) -> Self;
    fn graceful_stop(self, period: Duration) -> Self;
    fn max_duration(self, max_duration: Duration) -> Self;
    fn config(self, config: ScenarioConfig) -> Self;
}

impl<T, F> ConfigurableScenario<ScenarioResult> for Scenario<T>
where
    T: Fn() -> F + Send + 'static + Clone + Sync,
    F: Future<Output = ()> + Send + 'static,
{
    /// Ramp VUs through the given stages. Each stage moves linearly from the previous target to
    /// its own over its duration.
    ///
    /// # Example
    /// ```no_run
    /// use surge::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let _ = my_scenario()
    ///         .stages([
    ///             Stage::new(Duration::from_secs(60), 100),
    ///             Stage::new(Duration::from_secs(30), 0),
    ///         ])
    ///         .await;
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario() {
    /// }
    /// ```
    fn stages(mut self, stages: impl IntoIterator<Item = Stage>) -> Self {
        self.config.stages.extend(stages);
        self
    }

    /// Append a single ramp stage.
    fn stage(mut self, duration: Duration, target: usize) -> Self {
        self.config.stages.push(Stage::new(duration, target));
        self
    }

    /// Attach a pass/fail criterion to a metric.
    ///
    /// An unparsable expression fails the scenario when it is awaited.
    ///
    /// # Example
    /// ```no_run
    /// use surge::prelude::*;
    /// use std::time::Duration;
    ///
    /// #[tokio::main]
    /// async fn main() {
    ///     let stats = my_scenario()
    ///         .stage(Duration::from_secs(60), 50)
    ///         .threshold("http_req_failed", "rate<0.01")
    ///         .threshold("http_req_duration", "p(95)<500")
    ///         .await
    ///         .unwrap();
    ///     assert!(stats.passed());
    /// }
    ///
    /// #[scenario]
    /// async fn my_scenario() {
    /// }
    /// ```
    fn threshold(mut self, metric: &str, threshold: &str) -> Self {
        match threshold.parse::<Threshold>() {
            Ok(threshold) => self.config.add_threshold(metric, threshold),
            Err(err) => {
                self.invalid.get_or_insert(err.into());
            }
        }
        self
    }

    /// Attach a threshold with abort options.
    fn threshold_spec(mut self, metric: &str, spec: ThresholdSpec) -> Self {
        self.config.add_threshold(metric, spec);
        self
    }

    /// Drop response bodies once read rather than handing them to the scenario.
    fn discard_response_bodies(mut self, discard: bool) -> Self {
        self.config.discard_response_bodies = discard;
        self
    }

    /// VUs for the constant and shared-iterations executors, or the starting VUs of a ramp.
    fn vus(mut self, vus: usize) -> Self {
        self.config.vus = Some(vus);
        self
    }

    /// Run `vus` VUs for the given duration.
    ///
    /// Ignored when stages are configured.
    fn duration(mut self, duration: Duration) -> Self {
        self.config.duration = Some(duration);
        self
    }

    /// Share a fixed number of iterations between `vus` VUs.
    ///
    /// Ignored when stages are configured.
    fn iterations(mut self, iterations: u64) -> Self {
        self.config.iterations = Some(iterations);
        self
    }

    fn graceful_ramp_down(mut self, period: Duration) -> Self {
        self.config.graceful_ramp_down = period;
        self
    }

    fn graceful_stop(mut self, period: Duration) -> Self {
        self.config.graceful_stop = period;
        self
    }

    fn max_duration(mut self, max_duration: Duration) -> Self {
        self.config.max_duration = max_duration;
        self
    }

    /// Replace the whole configuration, e.g. one loaded with [`ScenarioConfig::from_path`].
    /// The scenario keeps its own name.
    fn config(mut self, config: ScenarioConfig) -> Self {
        let name = std::mem::take(&mut self.config.name);
        self.config = ScenarioConfig { name, ..config };
        self
    }
}

#[instrument(name="scenario", skip_all, fields(name=config.name))]
pub(crate) async fn run_scenario<T, F>(scenario: T, config: ScenarioConfig) -> ScenarioResult
where
    T: Fn() -> F + Send + Sync + 'static + Clone,
    F: Future<Output = ()> + Send + 'static,
{
    config.validate()?;
    let executor = config.executor()?;
    info!("Running {} with config {:?}", config.name, &config);

    let registry = Arc::new(MetricRegistry::new());
    let thresholds = ThresholdSet::new(&config.thresholds);
    let workload = Workload::new(&executor);
    let replace_finished = workload.replaces_finished();
    let mut pool = VuPool::new(
        scenario,
        registry.clone(),
        config.discard_response_bodies,
        workload.budget(),
    );

    let start = Instant::now();
    let mut timer = Timer::new(TICK_INTERVAL).await;
    trace!("Control loop ticking every {timer}");
    let mut ticks = 0;
    let mut window = Duration::ZERO;
    let mut aborted = false;

    // NOTE: This loop is time-sensitive. Any long awaits or blocking will throw off the ramp.
    loop {
        let Some(target) = workload.target_at(start.elapsed()) else {
            debug!("Workload complete.");
            break;
        };

        if replace_finished || ticks == 0 {
            pool.set_vus(target, config.graceful_ramp_down);
        }
        pool.reap(replace_finished);

        if !replace_finished && pool.is_idle() {
            debug!("Iterations exhausted.");
            break;
        }

        registry.set_gauge(VUS, pool.running() as f64);
        registry.set_gauge(VUS_MAX, pool.vus_max() as f64);

        window += timer.tick().await;
        ticks += 1;

        if ticks % TICKS_PER_WINDOW == 0 {
            let measurement = registry.collect_window(window, pool.running());
            debug!("{measurement}");
            window = Duration::ZERO;

            registry.drain();
            if let Some(tripped) = thresholds.check_abort(&registry, start.elapsed()) {
                error!(
                    "Threshold `{}` on {} crossed, aborting.",
                    tripped.threshold, tripped.metric
                );
                aborted = true;
                break;
            }
        }
    }

    let graceful_stop = if aborted {
        Duration::ZERO
    } else {
        config.graceful_stop
    };
    pool.shutdown(graceful_stop).await;

    let elapsed = start.elapsed();
    registry.drain();
    let thresholds = thresholds.evaluate(&registry, elapsed);

    let stats = RunStatistics {
        name: config.name.clone(),
        elapsed,
        aborted,
        metrics: registry.summaries(elapsed),
        checks: registry.check_summaries(),
        thresholds,
    };

    if stats.passed() {
        info!("Scenario {} complete in {elapsed:?}.", config.name);
    } else {
        warn!("Scenario {} complete with failing thresholds.", config.name);
    }

    Ok(stats)
}
