//! Resource-conflict screening for mutating task kinds.
//!
//! Two mutating tasks that target the same resource key (by default
//! `symbol` + `ownerId` from the payload) must not be in flight together.
//! Kinds not registered as mutating always pass.

use std::collections::HashSet;

use crate::config::ConflictConfig;
use crate::task::TaskPayload;

#[derive(Debug, Clone)]
pub struct ConflictPolicy {
    mutating_kinds: HashSet<String>,
    key_fields: Vec<String>,
}

impl ConflictPolicy {
    pub fn new(
        mutating_kinds: impl IntoIterator<Item = String>,
        key_fields: impl IntoIterator<Item = String>,
    ) -> Self {
        Self {
            mutating_kinds: mutating_kinds.into_iter().collect(),
            key_fields: key_fields.into_iter().collect(),
        }
    }

    pub fn from_config(config: &ConflictConfig) -> Self {
        Self::new(config.mutating_kinds.clone(), config.key_fields.clone())
    }

    pub fn is_mutating(&self, kind: &str) -> bool {
        self.mutating_kinds.contains(kind)
    }

    /// Resource key for a mutating task, or `None` when the kind is not
    /// mutating or the payload carries none of the key fields.
    pub fn resource_key(&self, kind: &str, payload: &TaskPayload) -> Option<String> {
        if !self.is_mutating(kind) {
            return None;
        }
        let mut parts = Vec::new();
        for field in &self.key_fields {
            if let Some(value) = payload.get(field) {
                let rendered = match value.as_str() {
                    Some(s) => s.to_string(),
                    None => value.to_string(),
                };
                parts.push(format!("{}={}", field, rendered));
            }
        }
        if parts.is_empty() {
            None
        } else {
            Some(parts.join("&"))
        }
    }

    /// Returns the offending resource key when the candidate collides with
    /// any of the given in-flight tasks.
    pub fn find_conflict<'a>(
        &self,
        kind: &str,
        payload: &TaskPayload,
        in_flight: impl Iterator<Item = (&'a str, &'a TaskPayload)>,
    ) -> Option<String> {
        let key = self.resource_key(kind, payload)?;
        for (other_kind, other_payload) in in_flight {
            if self.resource_key(other_kind, other_payload).as_deref() == Some(key.as_str()) {
                return Some(key);
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn policy() -> ConflictPolicy {
        ConflictPolicy::new(
            ["trade".to_string(), "order.place".to_string()],
            ["symbol".to_string(), "ownerId".to_string()],
        )
    }

    fn payload(symbol: &str, owner: &str) -> TaskPayload {
        let mut map = TaskPayload::new();
        map.insert("symbol".into(), json!(symbol));
        map.insert("ownerId".into(), json!(owner));
        map
    }

    #[test]
    fn test_same_resource_conflicts() {
        let policy = policy();
        let first = payload("BTC", "u1");
        let candidate = payload("BTC", "u1");

        let in_flight = [("trade", &first)];
        let hit = policy.find_conflict("trade", &candidate, in_flight.iter().copied());
        assert_eq!(hit.as_deref(), Some("symbol=BTC&ownerId=u1"));
    }

    #[test]
    fn test_different_owner_passes() {
        let policy = policy();
        let first = payload("BTC", "u1");
        let candidate = payload("BTC", "u2");

        let in_flight = [("trade", &first)];
        assert!(policy
            .find_conflict("trade", &candidate, in_flight.iter().copied())
            .is_none());
    }

    #[test]
    fn test_non_mutating_kind_passes() {
        let policy = policy();
        let first = payload("BTC", "u1");
        let candidate = payload("BTC", "u1");

        let in_flight = [("trade", &first)];
        assert!(policy
            .find_conflict("analysis", &candidate, in_flight.iter().copied())
            .is_none());
    }

    #[test]
    fn test_mutating_kinds_collide_across_kind_names() {
        let policy = policy();
        let first = payload("ETH", "u1");
        let candidate = payload("ETH", "u1");

        // A pending order.place blocks a trade on the same resource.
        let in_flight = [("order.place", &first)];
        assert!(policy
            .find_conflict("trade", &candidate, in_flight.iter().copied())
            .is_some());
    }

    #[test]
    fn test_missing_key_fields_never_conflict() {
        let policy = policy();
        let empty = TaskPayload::new();
        let first = payload("BTC", "u1");

        let in_flight = [("trade", &first)];
        assert!(policy
            .find_conflict("trade", &empty, in_flight.iter().copied())
            .is_none());
    }

    #[test]
    fn test_numeric_key_values() {
        let policy = policy();
        let mut first = TaskPayload::new();
        first.insert("symbol".into(), json!("BTC"));
        first.insert("ownerId".into(), json!(42));
        let candidate = first.clone();

        let in_flight = [("trade", &first)];
        let hit = policy.find_conflict("trade", &candidate, in_flight.iter().copied());
        assert_eq!(hit.as_deref(), Some("symbol=BTC&ownerId=42"));
    }
}
