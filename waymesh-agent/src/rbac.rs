//! Interface to the authorization policy collaborator. The engine only
//! forwards policy resources; whoever implements [`PolicyHandler`] owns
//! the policy state and its evaluation.

use tracing::debug;

use waymesh_api::security::Authorization;

use crate::{Error, Result};

pub trait PolicyHandler {
    /// An error aborts the remainder of the authorization batch.
    fn update_policy(&mut self, policy: Authorization) -> Result<()>;

    fn remove_policy(&mut self, name: &str);
}

/// In-memory policy store keyed by `namespace/name`.
#[derive(Default)]
pub struct PolicyStore {
    policies: ahash::HashMap<String, Authorization>,
}

impl PolicyStore {
    pub fn get(&self, name: &str) -> Option<&Authorization> {
        self.policies.get(name)
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

impl PolicyHandler for PolicyStore {
    fn update_policy(&mut self, policy: Authorization) -> Result<()> {
        if policy.name.is_empty() {
            return Err(Error::PolicyRejected(
                "authorization policy has no name".to_string(),
            ));
        }
        let name = policy.resource_name();
        debug!(policy = %name, "storing authorization policy");
        self.policies.insert(name, policy);
        Ok(())
    }

    fn remove_policy(&mut self, name: &str) {
        self.policies.remove(name);
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn policies_are_keyed_by_namespace_and_name() {
        let mut store = PolicyStore::default();
        store
            .update_policy(Authorization {
                name: "deny-all".to_string(),
                namespace: "prod".to_string(),
                ..Default::default()
            })
            .unwrap();
        assert!(store.get("prod/deny-all").is_some());

        store.remove_policy("prod/deny-all");
        assert!(store.is_empty());
    }

    #[test]
    fn nameless_policy_is_rejected() {
        let mut store = PolicyStore::default();
        assert!(store.update_policy(Authorization::default()).is_err());
    }
}
