use std::time::Duration;

pub const COVERAGE_SUMMARY_TTL: Duration = Duration::from_secs(5 * 60);

pub fn coverage_summary_key(user_id: &str) -> String {
    format!("coverage:{}:summary", user_id)
}
