//! Default `/debug/pprof/*` endpoints
//!
//! The telemetry server treats profiling as an opaque router. This default
//! serves a profile index and the process command line; callers with a real
//! profiler plug in their own router instead.

use axum::{extract::Path, http::StatusCode, response::IntoResponse, routing::get, Router};

/// Profiles served by [`default_profiling_router`]
pub const AVAILABLE_PROFILES: &[&str] = &["cmdline"];

async fn profile_index() -> String {
    let mut body = String::from("Available profiles:\n");
    for profile in AVAILABLE_PROFILES {
        body.push_str("  /debug/pprof/");
        body.push_str(profile);
        body.push('\n');
    }
    body
}

/// Process arguments, NUL-separated
async fn cmdline() -> String {
    std::env::args().collect::<Vec<_>>().join("\0")
}

async fn unknown_profile(Path(profile): Path<String>) -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        format!("Unknown profile: {}", profile),
    )
}

/// Build the default profiling router
pub fn default_profiling_router() -> Router {
    Router::new()
        .route("/debug/pprof/", get(profile_index))
        .route("/debug/pprof/cmdline", get(cmdline))
        .route("/debug/pprof/{profile}", get(unknown_profile))
}
