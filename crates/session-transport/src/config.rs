use std::time::Duration;

/// Tunables for the outbound queue and recovery behavior. Defaults match
/// the recommended constants; hosts that need different values
/// (e.g. faster retries under test) construct their own.
#[derive(Debug, Clone, Copy)]
pub struct TransportConfig {
    pub max_retry: u32,
    pub base_delay: Duration,
    pub history_fetch_limit: usize,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            max_retry: 5,
            base_delay: Duration::from_millis(100),
            history_fetch_limit: 50,
        }
    }
}
