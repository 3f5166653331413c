use std::time::Duration;
use surge_core::{stages_duration, Stage};

/// VU targets over time for a sequence of ramp stages.
#[derive(Debug, Clone)]
pub(crate) struct RampSchedule {
    start_vus: usize,
    stages: Vec<Stage>,
    total: Duration,
}

impl RampSchedule {
    pub fn new(start_vus: usize, stages: Vec<Stage>) -> Self {
        let total = stages_duration(&stages);
        Self {
            start_vus,
            stages,
            total,
        }
    }

    /// The VU target at `elapsed`, `None` once the schedule has run out.
    ///
    /// Each stage moves linearly from the previous target (or the starting VUs) to its own
    /// target; zero-length stages jump straight to their target.
    pub fn target_at(&self, elapsed: Duration) -> Option<usize> {
        if elapsed > self.total {
            return None;
        }

        let mut from = self.start_vus;
        let mut offset = Duration::ZERO;
        for stage in &self.stages {
            let end = offset + stage.duration;
            if elapsed < end {
                let progress = (elapsed - offset).as_secs_f64() / stage.duration.as_secs_f64();
                return Some(interpolate(from, stage.target, progress));
            }
            from = stage.target;
            offset = end;
        }

        Some(from)
    }

}

fn interpolate(from: usize, to: usize, progress: f64) -> usize {
    let from = from as f64;
    let to = to as f64;
    (from + (to - from) * progress).round().max(0.) as usize
}
