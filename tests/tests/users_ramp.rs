mod utils;
#[allow(unused)]
use utils::*;

mod tests {
    use super::*;
    use std::time::Duration;
    use surge::core::{HTTP_REQ_DURATION, HTTP_REQ_FAILED};
    use surge::prelude::*;
    use users_ramp::options::{options, STAGES, THRESHOLDS};

    #[test]
    fn built_in_options_match_the_ramp() {
        let config = options().unwrap();
        assert_eq!(config.stages, STAGES.to_vec());
        assert_eq!(config.total_duration().unwrap(), Duration::from_secs(16 * 60));
        for (metric, threshold) in THRESHOLDS {
            assert_eq!(config.thresholds[metric][0].threshold.to_string(), threshold);
        }
    }

    /// The built-in thresholds applied to a compressed version of the ramp.
    #[tokio::test(flavor = "multi_thread")]
    #[ntest::timeout(60_000)]
    async fn compressed_ramp_passes_built_in_thresholds() {
        init();
        users_ramp::set_target(format!("{}/users", mock_base()));

        let mut config = options().unwrap();
        // Same shape, one second per minute and a hundredth of the VUs.
        config.stages = STAGES
            .iter()
            .map(|s| Stage::new(s.duration / 60, s.target / 100))
            .collect();
        config.graceful_ramp_down = Duration::from_secs(1);
        config.graceful_stop = Duration::from_secs(1);

        let stats = users_ramp::users_ramp().config(config).await.unwrap();

        assert!(stats.passed(), "{stats}");
        assert!(stats.threshold(HTTP_REQ_FAILED, "rate<0.01").unwrap().passed);
        assert!(stats.threshold(HTTP_REQ_DURATION, "p(95)<500").unwrap().passed);
        assert_eq!(stats.check("status is 200").unwrap().fails, 0);
    }

    #[cfg(feature = "integration")]
    #[tokio::test(flavor = "multi_thread")]
    async fn full_ramp() {
        init();
        users_ramp::set_target(format!("{}/users", mock_base()));

        let stats = users_ramp::users_ramp()
            .config(options().unwrap())
            .await
            .unwrap();

        println!("{stats}");
        assert!(stats.passed());
    }
}
