mod utils;
#[allow(unused)]
use utils::*;

// Runs in its own binary: `traced_test` installs the global subscriber, so nothing here may call
// `init()`.
mod tests {
    use super::*;
    use std::time::Duration;
    use surge::prelude::*;

    #[tracing_test::traced_test]
    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(30_000)]
    async fn abort_on_fail_ends_the_run_early() {
        let threshold = "rate<0.01".parse::<surge::Threshold>().unwrap();
        let stats = server_error()
            .stage(Duration::from_secs(20), 4)
            .threshold_spec(
                "http_req_failed",
                ThresholdSpec::new(threshold).abort_on_fail(Some(Duration::from_secs(1))),
            )
            .await
            .unwrap();

        assert!(stats.aborted);
        assert!(!stats.passed());
        assert!(stats.elapsed < Duration::from_secs(10));
        assert!(logs_contain("on http_req_failed crossed, aborting."));
    }

    #[scenario]
    async fn server_error() {
        let res = surge::http::get(&format!("{}/status/500", mock_base())).await;
        check("status is 200", res.status == 200);
    }
}
