use crate::registry::MetricRegistry;
use std::future::Future;
use std::sync::Arc;
use surge_core::TransactionLabels;
use tokio::time::Instant;

/// Transaction hook used by the `#[transaction]` macro. Not intended to be used manually.
pub async fn transaction_hook<T, R, E>(labels: TransactionLabels, func: T) -> T::Output
where
    T: Future<Output = Result<R, E>>,
{
    if let Some(registry) = registry() {
        let start = Instant::now();
        let res = func.await;
        registry.record_transaction(labels, start.elapsed(), res.is_ok());
        res
    } else {
        tracing::warn!("No hook available. {} is not recorded.", labels.count);
        func.await
    }
}

/// Per-VU state, installed for the lifetime of each VU task.
#[derive(Clone)]
pub(crate) struct VuContext {
    pub registry: Arc<MetricRegistry>,
    pub discard_response_bodies: bool,
    /// Shared by every VU of a run, so connections are pooled on the run's runtime.
    #[cfg(feature = "http")]
    pub client: reqwest::Client,
}

impl VuContext {
    pub fn new(registry: Arc<MetricRegistry>, discard_response_bodies: bool) -> Self {
        Self {
            registry,
            discard_response_bodies,
            #[cfg(feature = "http")]
            client: crate::http::build_client(),
        }
    }
}

tokio::task_local! {
    pub(crate) static VU_CONTEXT: VuContext;
}

pub(crate) fn registry() -> Option<Arc<MetricRegistry>> {
    VU_CONTEXT.try_with(|ctx| ctx.registry.clone()).ok()
}
