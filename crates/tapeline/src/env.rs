use std::env;
use std::sync::OnceLock;

static TAPELINE_PASS_STATS: OnceLock<bool> = OnceLock::new();
static TAPELINE_OPTIMIZE: OnceLock<Option<bool>> = OnceLock::new();

fn parse_bool(value: &str) -> bool {
    let normalized = value.trim().to_ascii_lowercase();
    matches!(normalized.as_str(), "1" | "true" | "yes" | "on")
}

pub(crate) fn pass_stats_enabled() -> bool {
    *TAPELINE_PASS_STATS.get_or_init(|| match env::var("TAPELINE_PASS_STATS") {
        Ok(value) if !value.trim().is_empty() => parse_bool(&value),
        _ => false,
    })
}

/// Optional override for the optimization pipeline default (on).
pub(crate) fn optimize_override() -> Option<bool> {
    *TAPELINE_OPTIMIZE.get_or_init(|| match env::var("TAPELINE_OPTIMIZE") {
        Ok(value) if !value.trim().is_empty() => Some(parse_bool(&value)),
        _ => None,
    })
}
