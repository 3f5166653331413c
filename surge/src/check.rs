use crate::transaction::registry;
use surge_core::CheckResult;
use tracing::warn;

/// Record a named boolean assertion for the current iteration.
///
/// Passing checks do not affect control flow; failures are counted towards the `checks` rate and
/// the per-name tally in the run summary.
///
/// # Example
/// ```no_run
/// use surge::prelude::*;
///
/// #[scenario]
/// async fn users() {
///     let res = surge::http::get("http://localhost:3000/users").await;
///     check("status is 200", res.status == 200);
/// }
/// ```
pub fn check(name: &str, passed: bool) -> CheckResult {
    match registry() {
        Some(registry) => registry.record_check(name, passed),
        None => warn!("No hook available. Check `{name}` is not recorded."),
    }

    CheckResult {
        name: name.to_string(),
        passed,
    }
}
