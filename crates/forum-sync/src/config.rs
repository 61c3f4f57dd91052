use std::time::Duration;

/// Client settings, read from the environment (and `.env` if present).
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Base URL of the HTTP store, e.g. `http://localhost:5001`.
    pub api_url: String,
    /// WebSocket URL of the live channel. Derived from `api_url` when unset.
    pub gateway_url: String,
    pub token: String,
    pub reconnect_attempts: u32,
    pub reconnect_delay: Duration,
    /// Unread refresh period while the forum view is unfocused.
    pub refresh_interval: Duration,
    pub typing_ttl: Duration,
}

impl Default for SyncConfig {
    fn default() -> Self {
        let api_url = "http://localhost:5001".to_string();
        Self {
            gateway_url: gateway_url_for(&api_url),
            api_url,
            token: String::new(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            refresh_interval: Duration::from_secs(10),
            typing_ttl: Duration::from_millis(3000),
        }
    }
}

impl SyncConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let _ = dotenvy::dotenv();
        let defaults = Self::default();

        let api_url = env_or("FORUM_API_URL", defaults.api_url)
            .trim_end_matches('/')
            .to_string();
        let gateway_url = std::env::var("FORUM_GATEWAY_URL").unwrap_or_else(|_| gateway_url_for(&api_url));

        Ok(Self {
            gateway_url,
            api_url,
            token: std::env::var("FORUM_TOKEN")
                .map_err(|_| anyhow::anyhow!("FORUM_TOKEN must be set"))?,
            reconnect_attempts: env_or("FORUM_RECONNECT_ATTEMPTS", defaults.reconnect_attempts.to_string())
                .parse()?,
            reconnect_delay: Duration::from_millis(
                env_or("FORUM_RECONNECT_DELAY_MS", defaults.reconnect_delay.as_millis().to_string()).parse()?,
            ),
            refresh_interval: Duration::from_secs(
                env_or("FORUM_REFRESH_SECS", defaults.refresh_interval.as_secs().to_string()).parse()?,
            ),
            typing_ttl: Duration::from_millis(
                env_or("FORUM_TYPING_TTL_MS", defaults.typing_ttl.as_millis().to_string()).parse()?,
            ),
        })
    }

    /// Same settings pointed at another server.
    pub fn for_server(api_url: &str, token: impl Into<String>) -> Self {
        let api_url = api_url.trim_end_matches('/').to_string();
        Self {
            gateway_url: gateway_url_for(&api_url),
            api_url,
            token: token.into(),
            ..Self::default()
        }
    }
}

fn env_or(key: &str, default: String) -> String {
    std::env::var(key).unwrap_or(default)
}

/// `http(s)://host` -> `ws(s)://host/gateway`
pub fn gateway_url_for(api_url: &str) -> String {
    format!(
        "{}/gateway",
        api_url
            .trim_end_matches('/')
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gateway_url_follows_api_scheme() {
        assert_eq!(gateway_url_for("http://localhost:5001/"), "ws://localhost:5001/gateway");
        assert_eq!(gateway_url_for("https://forum.example.com"), "wss://forum.example.com/gateway");
    }

    #[test]
    fn defaults_match_documented_timings() {
        let config = SyncConfig::default();
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.refresh_interval, Duration::from_secs(10));
        assert_eq!(config.typing_ttl, Duration::from_secs(3));
    }
}
