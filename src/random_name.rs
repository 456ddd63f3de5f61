use std::sync::atomic::{AtomicU64, Ordering};
use std::time::SystemTime;

static SEQUENCE: AtomicU64 = AtomicU64::new(0);

/// Represents a randomly generated name segment, placed between a prefix and a suffix.
pub(crate) struct RandomName {
    name: String,
}

impl RandomName {
    pub fn new(prefix: &str, suffix: &str) -> Self {
        let pid = std::process::id();

        // Distinguishes names generated within the same clock tick.
        let sequence = SEQUENCE.fetch_add(1, Ordering::Relaxed);

        // Current timestamp for added variation.
        let now = SystemTime::now()
            .duration_since(SystemTime::UNIX_EPOCH)
            .unwrap_or(std::time::Duration::from_secs(0));
        let (secs, subsec_nanos) = (now.as_secs(), now.subsec_nanos());

        Self {
            name: format!(
                "{}{:x}{:x}{:x}{:x}{}",
                prefix, pid, sequence, secs, subsec_nanos, suffix
            ),
        }
    }
}

impl AsRef<str> for RandomName {
    fn as_ref(&self) -> &str {
        &self.name
    }
}
