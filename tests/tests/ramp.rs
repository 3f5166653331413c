mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;

    use reqwest::Client;
    use std::time::Duration;
    use surge::core::{
        MetricSummary, DATA_RECEIVED, HTTP_REQS, HTTP_REQ_DURATION, HTTP_REQ_FAILED, ITERATIONS,
    };
    use surge::prelude::*;

    fn short_ramp() -> [Stage; 3] {
        [
            Stage::new(Duration::from_millis(700), 8),
            Stage::new(Duration::from_millis(700), 8),
            Stage::new(Duration::from_millis(300), 0),
        ]
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(30_000)]
    async fn healthy_service_passes_error_threshold() {
        init();

        let stats = users()
            .stages(short_ramp())
            .threshold("http_req_failed", "rate<0.01")
            .discard_response_bodies(true)
            .graceful_ramp_down(Duration::from_secs(1))
            .graceful_stop(Duration::from_secs(1))
            .await
            .unwrap();

        assert!(stats.passed(), "{stats}");
        assert!(!stats.aborted);
        assert!(stats.count(HTTP_REQS) > 0);
        assert_eq!(stats.count(HTTP_REQS), stats.count(ITERATIONS));

        let check = stats.check("status is 200").unwrap();
        assert!(check.passes > 0);
        assert_eq!(check.fails, 0);

        let failed = stats.threshold(HTTP_REQ_FAILED, "rate<0.01").unwrap();
        assert_eq!(failed.observed, Some(0.));
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(30_000)]
    async fn fast_service_passes_latency_threshold() {
        init();

        let stats = delayed_20ms()
            .stages(short_ramp())
            .threshold("http_req_duration", "p(95)<500")
            .threshold("http_req_duration", "avg>=20")
            .graceful_stop(Duration::from_secs(1))
            .await
            .unwrap();

        assert!(stats.passed(), "{stats}");
        match stats.metric(HTTP_REQ_DURATION) {
            Some(MetricSummary::Trend { p95, min, .. }) => {
                assert!(*min >= 20.);
                assert!(*p95 < 500.);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(30_000)]
    async fn server_errors_fail_thresholds_and_checks() {
        init();

        let stats = server_error()
            .stages(short_ramp())
            .threshold("http_req_failed", "rate<0.01")
            .graceful_stop(Duration::from_secs(1))
            .await
            .unwrap();

        assert!(!stats.passed());
        assert!(!stats.aborted);
        assert_eq!(stats.check("status is 200").unwrap().passes, 0);
        assert_eq!(
            stats.threshold(HTTP_REQ_FAILED, "rate<0.01").unwrap().observed,
            Some(1.)
        );
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(30_000)]
    async fn refused_connections_count_as_failures() {
        init();

        let stats = refused()
            .vus(2)
            .iterations(10)
            .threshold("http_req_failed", "rate<0.01")
            .await
            .unwrap();

        assert!(!stats.passed());
        assert_eq!(stats.count(HTTP_REQS), 10);
        assert_eq!(stats.check("status is 200").unwrap().fails, 10);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(30_000)]
    async fn discarded_bodies_are_dropped_but_counted() {
        init();

        let kept = body_kept()
            .vus(1)
            .iterations(3)
            .discard_response_bodies(false)
            .await
            .unwrap();
        assert_eq!(kept.check("body kept").unwrap().passes, 3);
        assert_eq!(kept.check("body is the user list").unwrap().passes, 3);
        assert!(kept.count(DATA_RECEIVED) > 0);

        let dropped = body_kept()
            .vus(1)
            .iterations(3)
            .discard_response_bodies(true)
            .await
            .unwrap();
        assert_eq!(dropped.check("body kept").unwrap().fails, 3);
        assert_eq!(dropped.check("body is the user list").unwrap().fails, 3);
        assert!(dropped.count(DATA_RECEIVED) > 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(30_000)]
    async fn shared_iterations_are_exact() {
        init();

        let stats = users().vus(5).iterations(120).await.unwrap();

        assert_eq!(stats.count(ITERATIONS), 120);
        assert_eq!(stats.count(HTTP_REQS), 120);
        assert_eq!(stats.check("status is 200").unwrap().passes, 120);
    }

    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(30_000)]
    async fn transactions_get_their_own_metrics() {
        init();

        let stats = create_and_delete()
            .vus(3)
            .duration(Duration::from_millis(800))
            .threshold("create_user_failed", "rate==0")
            .threshold("create_user_duration", "p(99)<1000")
            .await
            .unwrap();

        assert!(stats.passed(), "{stats}");
        assert!(stats.count("create_user_count") > 0);
        assert!(stats.count("delete_user_count") > 0);
    }

    #[tokio::test]
    async fn unknown_aggregation_is_rejected() {
        let res = users()
            .stage(Duration::from_secs(1), 1)
            .threshold("http_req_failed", "p(95)<1")
            .await;

        assert!(matches!(
            res,
            Err(surge::ScenarioError::Config(
                surge::ConfigError::UnsupportedAggregation { .. }
            ))
        ));
    }

    /* Scenario Helpers */

    #[scenario]
    async fn users() {
        let res = surge::http::get(&format!("{}/users", mock_base())).await;
        check("status is 200", res.status == 200);
    }

    #[scenario]
    async fn delayed_20ms() {
        let res = surge::http::get(&format!("{}/delay/ms/20", mock_base())).await;
        check("status is 200", res.status == 200);
    }

    #[scenario]
    async fn server_error() {
        let res = surge::http::get(&format!("{}/status/500", mock_base())).await;
        check("status is 200", res.status == 200);
    }

    #[scenario]
    async fn body_kept() {
        let res = surge::http::get(&format!("{}/users", mock_base())).await;
        check("body kept", res.body.is_some());
        check(
            "body is the user list",
            res.body_text().is_some_and(|body| body.starts_with('[')),
        );
    }

    #[scenario]
    async fn refused() {
        let res = surge::http::get(&format!("{}/users", refused_base())).await;
        check("status is 200", res.status == 200);
    }

    #[scenario]
    async fn create_and_delete() {
        if let Ok(id) = create_user().await {
            let _ = delete_user(id).await;
        }
    }

    #[transaction]
    async fn create_user() -> anyhow::Result<u64> {
        static NEXT: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let n = NEXT.fetch_add(1, std::sync::atomic::Ordering::Relaxed);

        let body = serde_json::json!({
            "name": format!("Load {n}"),
            "email": format!("load{n}@example.com"),
        });
        let res = Client::new()
            .post(format!("{}/users", mock_base()))
            .body(body.to_string())
            .send()
            .await?
            .error_for_status()?;
        let user: serde_json::Value = serde_json::from_slice(&res.bytes().await?)?;
        user["id"]
            .as_u64()
            .ok_or_else(|| anyhow::anyhow!("created user has no id"))
    }

    #[transaction]
    async fn delete_user(id: u64) -> anyhow::Result<()> {
        Client::new()
            .delete(format!("{}/users/{id}", mock_base()))
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}
