//! Liveness probe.

pub async fn handle() -> &'static str {
    "OK"
}
