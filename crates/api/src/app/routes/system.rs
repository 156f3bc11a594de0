/// Liveness probe.
pub async fn info() -> &'static str {
    "ok"
}
