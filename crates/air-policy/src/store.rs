use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::sync::Arc;

use air_core::PolicyId;

use crate::killswitch::SwitchBank;
use crate::policy::Policy;

/// A stored policy together with its kill-switch counters.
#[derive(Debug)]
pub struct PolicyRecord {
    pub policy: Policy,
    pub switches: SwitchBank,
    pub stored_at: DateTime<Utc>,
}

impl PolicyRecord {
    pub fn new(policy: Policy) -> Self {
        let switches = SwitchBank::new(&policy.kill_switches);
        Self {
            policy,
            switches,
            stored_at: Utc::now(),
        }
    }
}

/// Storage for policies. Implementations must be safe to share across tasks.
pub trait PolicyStore: Send + Sync {
    fn get(&self, id: &str) -> Option<Arc<PolicyRecord>>;

    /// Insert or replace. Replacing discards the old switch state. Returns the
    /// stored record and whether an existing policy was replaced.
    fn put(&self, policy: Policy) -> (Arc<PolicyRecord>, bool);

    fn delete(&self, id: &str) -> Option<Arc<PolicyRecord>>;

    /// All policies, sorted by id.
    fn list(&self) -> Vec<Arc<PolicyRecord>>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Policies that apply to the agent, sorted by id.
    fn applicable(&self, agent_id: &str) -> Vec<Arc<PolicyRecord>> {
        self.list()
            .into_iter()
            .filter(|r| r.policy.applies_to(agent_id))
            .collect()
    }
}

/// Process-local store; contents are lost on restart.
#[derive(Debug, Default)]
pub struct InMemoryPolicyStore {
    policies: DashMap<PolicyId, Arc<PolicyRecord>>,
}

impl InMemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl PolicyStore for InMemoryPolicyStore {
    fn get(&self, id: &str) -> Option<Arc<PolicyRecord>> {
        self.policies.get(id).map(|r| Arc::clone(r.value()))
    }

    fn put(&self, policy: Policy) -> (Arc<PolicyRecord>, bool) {
        let id = policy.id.clone();
        let record = Arc::new(PolicyRecord::new(policy));
        let replaced = self.policies.insert(id, Arc::clone(&record)).is_some();
        (record, replaced)
    }

    fn delete(&self, id: &str) -> Option<Arc<PolicyRecord>> {
        self.policies.remove(id).map(|(_, r)| r)
    }

    fn list(&self) -> Vec<Arc<PolicyRecord>> {
        let mut all: Vec<_> = self.policies.iter().map(|r| Arc::clone(r.value())).collect();
        all.sort_by(|a, b| a.policy.id.cmp(&b.policy.id));
        all
    }

    fn len(&self) -> usize {
        self.policies.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tier::AutonomyTier;

    fn policy(id: &str) -> Policy {
        Policy {
            id: id.into(),
            name: id.to_uppercase(),
            description: String::new(),
            autonomy_tier: AutonomyTier::Gated,
            tool_risks: vec![],
            kill_switches: vec![],
            conditions: vec![],
            agents: vec![],
        }
    }

    #[test]
    fn test_put_get_delete() {
        let store = InMemoryPolicyStore::new();
        assert!(store.is_empty());
        let (_, replaced) = store.put(policy("p1"));
        assert!(!replaced);
        assert_eq!(store.get("p1").unwrap().policy.name, "P1");
        assert!(store.delete("p1").is_some());
        assert!(store.get("p1").is_none());
        assert!(store.delete("p1").is_none());
    }

    #[test]
    fn test_put_replaces() {
        let store = InMemoryPolicyStore::new();
        store.put(policy("p1"));
        let mut next = policy("p1");
        next.name = "second".into();
        let (_, replaced) = store.put(next);
        assert!(replaced);
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("p1").unwrap().policy.name, "second");
    }

    #[test]
    fn test_list_sorted_and_applicable() {
        let store = InMemoryPolicyStore::new();
        store.put(policy("b"));
        let mut scoped = policy("a");
        scoped.agents = vec!["agent-x".into()];
        store.put(scoped);
        store.put(policy("c"));

        let ids: Vec<_> = store.list().iter().map(|r| r.policy.id.clone()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);

        let ids: Vec<_> = store
            .applicable("agent-y")
            .iter()
            .map(|r| r.policy.id.clone())
            .collect();
        assert_eq!(ids, vec!["b", "c"]);
        assert_eq!(store.applicable("agent-x").len(), 3);
    }
}
