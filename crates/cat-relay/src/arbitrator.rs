//! Per-rig exclusive control grant
//!
//! At most one user may issue mutating commands to a rig. A grant is taken
//! only when free (or already held by the same user); there is no
//! preemption and no queue.

use std::collections::HashMap;

use tracing::debug;

use crate::error::AuthorizationError;

/// Who holds each rig
#[derive(Debug, Default)]
pub struct ControlArbitrator {
    holders: HashMap<String, String>,
}

impl ControlArbitrator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the grant for `rig`; true if `user` now holds it
    pub fn take(&mut self, rig: &str, user: &str) -> bool {
        match self.holders.get(rig) {
            Some(holder) => holder == user,
            None => {
                debug!("{} takes control of {}", user, rig);
                self.holders.insert(rig.to_string(), user.to_string());
                true
            }
        }
    }

    /// Release the grant if `user` holds it
    pub fn release(&mut self, rig: &str, user: &str) -> bool {
        if self.is_authorized(rig, user) {
            debug!("{} releases control of {}", user, rig);
            self.holders.remove(rig);
            true
        } else {
            false
        }
    }

    /// Release every grant held by `user`; returns the affected rigs
    pub fn release_all(&mut self, user: &str) -> Vec<String> {
        let rigs: Vec<String> = self
            .holders
            .iter()
            .filter(|(_, holder)| holder.as_str() == user)
            .map(|(rig, _)| rig.clone())
            .collect();
        for rig in &rigs {
            self.holders.remove(rig);
        }
        rigs
    }

    /// Drop the grant for a rig that went away
    pub fn clear(&mut self, rig: &str) {
        self.holders.remove(rig);
    }

    pub fn is_authorized(&self, rig: &str, user: &str) -> bool {
        self.holders.get(rig).is_some_and(|holder| holder == user)
    }

    /// Like [`is_authorized`](Self::is_authorized) but as a `Result`
    pub fn authorize(&self, rig: &str, user: &str) -> Result<(), AuthorizationError> {
        if self.is_authorized(rig, user) {
            Ok(())
        } else {
            Err(AuthorizationError {
                user: user.to_string(),
                rig: rig.to_string(),
            })
        }
    }

    pub fn holder(&self, rig: &str) -> Option<&str> {
        self.holders.get(rig).map(String::as_str)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_take_release_sequence() {
        let mut arb = ControlArbitrator::new();

        assert!(arb.take("DL1ABC", "alice"));
        assert!(!arb.take("DL1ABC", "bob"));
        assert_eq!(arb.holder("DL1ABC"), Some("alice"));

        assert!(!arb.release("DL1ABC", "bob"));
        assert_eq!(arb.holder("DL1ABC"), Some("alice"));

        assert!(arb.release("DL1ABC", "alice"));
        assert_eq!(arb.holder("DL1ABC"), None);

        assert!(arb.take("DL1ABC", "bob"));
        assert!(arb.is_authorized("DL1ABC", "bob"));
    }

    #[test]
    fn test_take_is_idempotent_for_holder() {
        let mut arb = ControlArbitrator::new();
        assert!(arb.take("DL1ABC", "alice"));
        assert!(arb.take("DL1ABC", "alice"));
        assert!(arb.is_authorized("DL1ABC", "alice"));
    }

    #[test]
    fn test_release_all_only_touches_user() {
        let mut arb = ControlArbitrator::new();
        arb.take("A", "alice");
        arb.take("B", "alice");
        arb.take("C", "bob");

        let mut released = arb.release_all("alice");
        released.sort();
        assert_eq!(released, vec!["A".to_string(), "B".to_string()]);
        assert_eq!(arb.holder("A"), None);
        assert_eq!(arb.holder("C"), Some("bob"));
    }

    #[test]
    fn test_clear_and_authorize() {
        let mut arb = ControlArbitrator::new();
        arb.take("A", "alice");
        assert!(arb.authorize("A", "alice").is_ok());

        arb.clear("A");
        let err = arb.authorize("A", "alice").unwrap_err();
        assert_eq!(err.to_string(), "alice does not hold control of A");
    }
}
