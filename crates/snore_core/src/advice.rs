//! crates/snore_core/src/advice.rs
//!
//! Turns a night's snore totals into guidance text for the user.

const NO_SNORING: &str = "No snoring was detected. Overall sleep quality looks good tonight.";

const RECOMMENDATION: &str = "Try sleeping on your side, avoid alcohol and heavy meals \
before bed, and consider humidifying your nasal passages. If snoring persists, \
consulting a sleep clinic is recommended.";

/// Builds the advice shown in a nightly report.
pub fn build_advice(count: u32, total_sec: u32) -> String {
    if count == 0 {
        return NO_SNORING.to_string();
    }
    format!("{} snore events, {}s total detected. {}", count, total_sec, RECOMMENDATION)
}
