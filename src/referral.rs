use std::collections::HashMap;
use std::sync::RwLock;

use serde::{Deserialize, Serialize};

/// A referral partner. The fee share is the percentage of the service fee
/// passed on; the API credentials authenticate the partner's requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Referral {
    pub id: String,
    pub fee_share: u64,
    pub routing_node: Option<String>,
    pub api_key: String,
    pub api_secret: String,
}

/// In-memory view of the persisted referrals, with a reverse index from
/// routing node to referral.
#[derive(Default)]
pub struct ReferralRegistry {
    by_id: RwLock<HashMap<String, Referral>>,
    by_routing_node: RwLock<HashMap<String, String>>,
}

impl ReferralRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn load(&self, referrals: Vec<Referral>) {
        for referral in referrals {
            self.add(referral);
        }
    }

    pub fn add(&self, referral: Referral) {
        if let Some(node) = &referral.routing_node {
            self.by_routing_node
                .write()
                .expect("referral registry lock poisoned")
                .insert(node.clone(), referral.id.clone());
        }
        self.by_id
            .write()
            .expect("referral registry lock poisoned")
            .insert(referral.id.clone(), referral);
    }

    pub fn get(&self, id: &str) -> Option<Referral> {
        self.by_id
            .read()
            .expect("referral registry lock poisoned")
            .get(id)
            .cloned()
    }

    pub fn find_by_routing_node(&self, routing_node: &str) -> Option<Referral> {
        let id = self
            .by_routing_node
            .read()
            .expect("referral registry lock poisoned")
            .get(routing_node)
            .cloned()?;
        self.get(&id)
    }

    /// Referral id for a swap request, preferring the explicit id over the
    /// routing-node lookup.
    pub fn resolve(&self, explicit_id: Option<&str>, routing_node: Option<&str>) -> Option<String> {
        match explicit_id {
            Some(id) if !id.is_empty() => Some(id.to_string()),
            _ => routing_node
                .and_then(|node| self.find_by_routing_node(node))
                .map(|referral| referral.id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn referral(id: &str, routing_node: Option<&str>) -> Referral {
        Referral {
            id: id.to_string(),
            fee_share: 10,
            routing_node: routing_node.map(str::to_string),
            api_key: "key".to_string(),
            api_secret: "secret".to_string(),
        }
    }

    #[test]
    fn resolves_explicit_id_over_routing_node() {
        let registry = ReferralRegistry::new();
        registry.add(referral("partner", Some("02abc")));

        assert_eq!(
            registry.resolve(Some("other"), Some("02abc")),
            Some("other".to_string())
        );
        assert_eq!(
            registry.resolve(None, Some("02abc")),
            Some("partner".to_string())
        );
        assert_eq!(
            registry.resolve(Some(""), Some("02abc")),
            Some("partner".to_string())
        );
        assert_eq!(registry.resolve(None, Some("02def")), None);
        assert_eq!(registry.resolve(None, None), None);
    }
}
