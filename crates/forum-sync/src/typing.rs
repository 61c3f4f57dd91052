use std::time::Duration;

use tokio::time::Instant;

/// Who is typing in one room. Only the most recent signal is shown, and it
/// clears itself `ttl` after receipt unless renewed.
#[derive(Debug, Clone)]
pub struct TypingIndicator {
    ttl: Duration,
    current: Option<TypingSignal>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct TypingSignal {
    user_name: String,
    expires_at: Instant,
}

impl TypingIndicator {
    pub fn new(ttl: Duration) -> Self {
        Self { ttl, current: None }
    }

    /// A `user-typing` push arrived. Replaces any previous signal.
    pub fn show(&mut self, user_name: impl Into<String>, now: Instant) {
        self.current = Some(TypingSignal {
            user_name: user_name.into(),
            expires_at: now + self.ttl,
        });
    }

    /// Explicit stop. Returns whether anything was showing.
    pub fn stop(&mut self) -> bool {
        self.current.take().is_some()
    }

    pub fn visible(&self, now: Instant) -> Option<&str> {
        self.current
            .as_ref()
            .filter(|s| now < s.expires_at)
            .map(|s| s.user_name.as_str())
    }

    /// When the event loop should next call [`TypingIndicator::expire`].
    pub fn expires_at(&self) -> Option<Instant> {
        self.current.as_ref().map(|s| s.expires_at)
    }

    /// Drop the signal once its deadline has passed. Returns whether it was cleared.
    pub fn expire(&mut self, now: Instant) -> bool {
        match &self.current {
            Some(s) if now >= s.expires_at => {
                self.current = None;
                true
            }
            _ => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_millis(3000);

    #[test]
    fn signal_clears_after_three_seconds() {
        let t0 = Instant::now();
        let mut typing = TypingIndicator::new(TTL);
        typing.show("Alice", t0);

        assert_eq!(typing.visible(t0 + Duration::from_millis(2900)), Some("Alice"));
        assert!(!typing.expire(t0 + Duration::from_millis(2900)));

        let later = t0 + Duration::from_millis(3100);
        assert_eq!(typing.visible(later), None);
        assert!(typing.expire(later));
        assert_eq!(typing.expires_at(), None);
    }

    #[test]
    fn renewal_extends_and_replaces() {
        let t0 = Instant::now();
        let mut typing = TypingIndicator::new(TTL);
        typing.show("Alice", t0);
        typing.show("Bob", t0 + Duration::from_secs(2));

        let t = t0 + Duration::from_millis(3100);
        assert_eq!(typing.visible(t), Some("Bob"));
        assert!(!typing.expire(t));
    }

    #[test]
    fn explicit_stop_clears_immediately() {
        let t0 = Instant::now();
        let mut typing = TypingIndicator::new(TTL);
        typing.show("Alice", t0);

        assert!(typing.stop());
        assert_eq!(typing.visible(t0), None);
        assert!(!typing.stop());
    }
}
