//! Layered config for the protocol's recommended tunables. `Default`
//! gives the recommended values; hosts that need different tunables (e.g.
//! shorter TTLs under test) construct their own or overlay from the
//! environment with [`SessionConfig::from_env`].

use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Deadline an initiator waits for a `handshake-offer`, untrusted mode.
    pub session_request_ttl: Duration,
    /// Extra grace a responder/initiator grants around handshake deadlines
    /// (e.g. trusted-mode offer wait, ack wait) to tolerate host suspension.
    pub handshake_timeout: Duration,
    /// How long an OTP stays valid after being generated.
    pub otp_ttl: Duration,
    /// Wrong-OTP attempts allowed before the handshake aborts.
    pub otp_max_attempts: u32,
    /// Outbound publish retry ceiling.
    pub max_retry: u32,
    /// Exponential backoff base for publish retries.
    pub base_delay: Duration,
    /// Publications fetched per `history()` call during recovery.
    pub history_fetch_limit: usize,
    /// Default `Session.expires_at` horizon from the moment of handshake.
    pub default_session_ttl: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            session_request_ttl: Duration::from_secs(60),
            handshake_timeout: Duration::from_secs(30),
            otp_ttl: Duration::from_secs(60),
            otp_max_attempts: 3,
            max_retry: 5,
            base_delay: Duration::from_millis(100),
            history_fetch_limit: 50,
            default_session_ttl: Duration::from_secs(30 * 24 * 60 * 60),
        }
    }
}

impl SessionConfig {
    /// Overlay the defaults with any of the following environment
    /// variables, each a decimal number of seconds (or a plain count for
    /// `otp_max_attempts`/`max_retry`/`history_fetch_limit`):
    /// `SESSION_REQUEST_TTL_SECS`, `HANDSHAKE_TIMEOUT_SECS`, `OTP_TTL_SECS`,
    /// `OTP_MAX_ATTEMPTS`, `MAX_RETRY`, `BASE_DELAY_MS`,
    /// `HISTORY_FETCH_LIMIT`, `DEFAULT_SESSION_TTL_SECS`.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(v) = env_secs("SESSION_REQUEST_TTL_SECS") {
            config.session_request_ttl = v;
        }
        if let Some(v) = env_secs("HANDSHAKE_TIMEOUT_SECS") {
            config.handshake_timeout = v;
        }
        if let Some(v) = env_secs("OTP_TTL_SECS") {
            config.otp_ttl = v;
        }
        if let Some(v) = env_u32("OTP_MAX_ATTEMPTS") {
            config.otp_max_attempts = v;
        }
        if let Some(v) = env_u32("MAX_RETRY") {
            config.max_retry = v;
        }
        if let Some(v) = env_millis("BASE_DELAY_MS") {
            config.base_delay = v;
        }
        if let Some(v) = env_usize("HISTORY_FETCH_LIMIT") {
            config.history_fetch_limit = v;
        }
        if let Some(v) = env_secs("DEFAULT_SESSION_TTL_SECS") {
            config.default_session_ttl = v;
        }
        config
    }
}

fn env_secs(key: &str) -> Option<Duration> {
    std::env::var(key).ok()?.parse::<u64>().ok().map(Duration::from_secs)
}

fn env_millis(key: &str) -> Option<Duration> {
    std::env::var(key).ok()?.parse::<u64>().ok().map(Duration::from_millis)
}

fn env_u32(key: &str) -> Option<u32> {
    std::env::var(key).ok()?.parse().ok()
}

fn env_usize(key: &str) -> Option<usize> {
    std::env::var(key).ok()?.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_spec_recommendations() {
        let c = SessionConfig::default();
        assert_eq!(c.session_request_ttl, Duration::from_secs(60));
        assert_eq!(c.handshake_timeout, Duration::from_secs(30));
        assert_eq!(c.otp_ttl, Duration::from_secs(60));
        assert_eq!(c.otp_max_attempts, 3);
        assert_eq!(c.max_retry, 5);
        assert_eq!(c.base_delay, Duration::from_millis(100));
        assert_eq!(c.history_fetch_limit, 50);
        assert_eq!(c.default_session_ttl, Duration::from_secs(30 * 24 * 60 * 60));
    }

    #[test]
    fn from_env_overrides_only_set_vars() {
        std::env::set_var("OTP_MAX_ATTEMPTS", "7");
        let c = SessionConfig::from_env();
        assert_eq!(c.otp_max_attempts, 7);
        assert_eq!(c.max_retry, 5);
        std::env::remove_var("OTP_MAX_ATTEMPTS");
    }
}
