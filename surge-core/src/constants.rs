use std::time::Duration;

/// VUs used when `vus` is not configured.
pub const DEFAULT_VUS: usize = 1;

/// The default `gracefulRampDown` and `gracefulStop` period.
pub const DEFAULT_GRACEFUL_PERIOD: Duration = Duration::from_secs(30);

/// The default `maxDuration` bounding a shared-iterations run.
pub const DEFAULT_MAX_DURATION: Duration = Duration::from_secs(600);

/// Interval at which the executor re-evaluates the VU target.
pub const TICK_INTERVAL: Duration = Duration::from_millis(100);

/// Ticks per measurement window (one window per second).
pub const TICKS_PER_WINDOW: u32 = 10;

/// Timeout applied to every request made by the built-in HTTP helper.
pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(60);

/// Process exit code signalling that at least one threshold failed.
pub const THRESHOLDS_FAILED_EXIT_CODE: i32 = 99;
