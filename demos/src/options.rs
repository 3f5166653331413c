use std::time::Duration;
use surge::{ConfigError, ScenarioConfig, Stage};

const fn minutes(m: u64) -> Duration {
    Duration::from_secs(m * 60)
}

/// Ramp to 2000 VUs over 14 minutes, then back down to zero.
pub const STAGES: [Stage; 6] = [
    Stage::new(minutes(2), 200),
    Stage::new(minutes(3), 500),
    Stage::new(minutes(3), 1000),
    Stage::new(minutes(3), 1500),
    Stage::new(minutes(3), 2000),
    Stage::new(minutes(2), 0),
];

/// Fewer than 1% of requests may fail, and 95% of them must finish within 500ms.
pub const THRESHOLDS: [(&str, &str); 2] = [
    ("http_req_failed", "rate<0.01"),
    ("http_req_duration", "p(95)<500"),
];

pub fn options() -> Result<ScenarioConfig, ConfigError> {
    let mut config = ScenarioConfig::new("users_ramp");
    config.stages = STAGES.to_vec();
    config.discard_response_bodies = true;
    for (metric, threshold) in THRESHOLDS {
        config.add_threshold(metric, threshold.parse::<surge::Threshold>()?);
    }
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stages_run_in_order() {
        let targets: Vec<_> = STAGES.iter().map(|s| s.target).collect();
        assert_eq!(targets, vec![200, 500, 1000, 1500, 2000, 0]);

        let minutes: Vec<_> = STAGES.iter().map(|s| s.duration.as_secs() / 60).collect();
        assert_eq!(minutes, vec![2, 3, 3, 3, 3, 2]);
    }

    #[test]
    fn options_are_valid() {
        let config = options().unwrap();
        config.validate().unwrap();

        assert!(config.discard_response_bodies);
        assert_eq!(config.total_duration().unwrap(), minutes(16));
        assert_eq!(config.thresholds["http_req_failed"].len(), 1);
        assert_eq!(
            config.thresholds["http_req_duration"][0].threshold.to_string(),
            "p(95)<500"
        );
    }

    #[test]
    fn matches_the_options_document() {
        let doc = r#"{
            "stages": [
                { "duration": "2m", "target": 200 },
                { "duration": "3m", "target": 500 },
                { "duration": "3m", "target": 1000 },
                { "duration": "3m", "target": 1500 },
                { "duration": "3m", "target": 2000 },
                { "duration": "2m", "target": 0 }
            ],
            "thresholds": {
                "http_req_failed": ["rate<0.01"],
                "http_req_duration": ["p(95)<500"]
            },
            "discardResponseBodies": true
        }"#;

        let mut parsed = ScenarioConfig::from_json_str(doc).unwrap();
        parsed.name = "users_ramp".to_string();
        assert_eq!(parsed, options().unwrap());
    }
}
