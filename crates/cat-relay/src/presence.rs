//! Active-user records
//!
//! Refreshed on every heartbeat, pruned when read and on the relay's prune
//! tick.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use serde::Serialize;

/// Records older than this are expired
pub const LIVENESS_WINDOW: Duration = Duration::from_secs(10);

/// How long users stay listed and how often the list is re-checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PresenceConfig {
    pub liveness_window: Duration,
    pub prune_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            liveness_window: LIVENESS_WINDOW,
            prune_interval: Duration::from_secs(1),
        }
    }
}

#[derive(Debug, Clone)]
struct Presence {
    last_seen: Instant,
    rtt_ms: Option<u64>,
    rig: Option<String>,
}

/// One live user, serialized as `[username, rtt_ms, rig]`
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ActiveUser(pub String, pub Option<u64>, pub Option<String>);

#[derive(Debug)]
pub struct ActiveUsers {
    records: HashMap<String, Presence>,
    window: Duration,
}

impl Default for ActiveUsers {
    fn default() -> Self {
        Self::with_window(LIVENESS_WINDOW)
    }
}

impl ActiveUsers {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_window(window: Duration) -> Self {
        Self {
            records: HashMap::new(),
            window,
        }
    }

    /// Refresh a user's heartbeat, optionally with a new RTT sample
    pub fn touch(&mut self, user: &str, now: Instant, rtt_ms: Option<u64>) {
        let entry = self.records.entry(user.to_string()).or_insert(Presence {
            last_seen: now,
            rtt_ms: None,
            rig: None,
        });
        entry.last_seen = now;
        if rtt_ms.is_some() {
            entry.rtt_ms = rtt_ms;
        }
    }

    /// Record the rig a user is looking at
    pub fn set_rig(&mut self, user: &str, now: Instant, rig: Option<String>) {
        self.touch(user, now, None);
        if let Some(entry) = self.records.get_mut(user) {
            entry.rig = rig;
        }
    }

    pub fn remove(&mut self, user: &str) {
        self.records.remove(user);
    }

    /// Prune expired records and list the rest, sorted by username
    pub fn snapshot_at(&mut self, now: Instant) -> Vec<ActiveUser> {
        let window = self.window;
        self.records
            .retain(|_, p| now.saturating_duration_since(p.last_seen) < window);

        let mut users: Vec<ActiveUser> = self
            .records
            .iter()
            .map(|(name, p)| ActiveUser(name.clone(), p.rtt_ms, p.rig.clone()))
            .collect();
        users.sort_by(|a, b| a.0.cmp(&b.0));
        users
    }

    pub fn snapshot(&mut self) -> Vec<ActiveUser> {
        self.snapshot_at(Instant::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stale_record_is_pruned() {
        let start = Instant::now();
        let mut users = ActiveUsers::new();
        users.touch("alice", start, Some(40));
        users.touch("bob", start + Duration::from_secs(5), None);

        let later = start + Duration::from_secs(11);
        let snapshot = users.snapshot_at(later);
        assert_eq!(snapshot, vec![ActiveUser("bob".into(), None, None)]);

        // Pruned for good, even if the clock is read earlier afterwards
        assert_eq!(users.snapshot_at(start).len(), 1);
    }

    #[test]
    fn test_exactly_ten_seconds_is_expired() {
        let start = Instant::now();
        let mut users = ActiveUsers::new();
        users.touch("alice", start, None);
        assert!(users.snapshot_at(start + Duration::from_millis(9_999)).len() == 1);
        assert!(users.snapshot_at(start + LIVENESS_WINDOW).is_empty());
    }

    #[test]
    fn test_rtt_and_rig_survive_plain_touch() {
        let now = Instant::now();
        let mut users = ActiveUsers::new();
        users.touch("alice", now, Some(25));
        users.set_rig("alice", now, Some("DL1ABC".into()));
        users.touch("alice", now, None);

        assert_eq!(
            users.snapshot_at(now),
            vec![ActiveUser("alice".into(), Some(25), Some("DL1ABC".into()))]
        );
        assert_eq!(
            serde_json::to_string(&users.snapshot_at(now)).unwrap(),
            r#"[["alice",25,"DL1ABC"]]"#
        );

        users.remove("alice");
        assert!(users.snapshot_at(now).is_empty());
    }

    #[test]
    fn test_custom_window() {
        let start = Instant::now();
        let mut users = ActiveUsers::with_window(Duration::from_millis(300));
        users.touch("alice", start, None);
        assert_eq!(users.snapshot_at(start + Duration::from_millis(299)).len(), 1);
        assert!(users.snapshot_at(start + Duration::from_millis(300)).is_empty());
    }
}
