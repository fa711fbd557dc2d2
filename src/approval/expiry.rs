use crate::queue::TaskMeta;
use chrono::{DateTime, Duration, Utc};

/// When a pending task expires: its own `expires`, else `created + ttl`,
/// else `fallback + ttl` (the file's modification time).
pub fn deadline(
    meta: &TaskMeta,
    default_ttl: Duration,
    fallback: Option<DateTime<Utc>>,
) -> Option<DateTime<Utc>> {
    meta.expires.or_else(|| {
        meta.created
            .or(fallback)
            .and_then(|start| start.checked_add_signed(default_ttl))
    })
}

/// Human-readable waiting time, e.g. `26h 5m` or `42m`.
pub fn format_waited(waited: Duration) -> String {
    let minutes = waited.num_minutes().max(0);
    let (hours, minutes) = (minutes / 60, minutes % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m")
    } else {
        format!("{minutes}m")
    }
}
