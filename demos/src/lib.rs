use std::sync::OnceLock;
use surge::prelude::*;

pub mod options;

pub const DEFAULT_URL: &str = "http://localhost:3000/users";

static TARGET: OnceLock<String> = OnceLock::new();

/// Point the scenario at `url`. Only the first call has an effect.
pub fn set_target(url: impl Into<String>) -> bool {
    TARGET.set(url.into()).is_ok()
}

pub fn target() -> &'static str {
    TARGET.get().map(String::as_str).unwrap_or(DEFAULT_URL)
}

#[scenario]
pub async fn users_ramp() {
    let res = surge::http::get(target()).await;
    check("status is 200", res.status == 200);
}
