/// Subscription registry
///
/// Maps clients to their subscriptions and resolves which subscriptions want
/// a published event. Keyed by client so disconnect removal is a single map
/// entry; a secondary id index serves unsubscribe-by-id.
///
/// Reads (find_matches from delivery workers) take the lock briefly and
/// share it; writes are per-registration and do not starve readers.
use super::event::Event;
use super::subscription::Subscription;
use crate::errors::RouterError;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;

#[derive(Default)]
pub struct SubscriptionRegistry {
    /// client_id -> subscription_id -> subscription
    by_client: RwLock<HashMap<String, HashMap<String, Arc<Subscription>>>>,

    /// subscription_id -> client_id (for remove-by-id)
    owners: RwLock<HashMap<String, String>>,
}

impl SubscriptionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription (pattern already validated by construction)
    pub fn add(&self, subscription: Subscription) -> Arc<Subscription> {
        let subscription = Arc::new(subscription);

        self.owners.write().insert(
            subscription.subscription_id.clone(),
            subscription.client_id.clone(),
        );
        self.by_client
            .write()
            .entry(subscription.client_id.clone())
            .or_default()
            .insert(subscription.subscription_id.clone(), subscription.clone());

        subscription
    }

    /// Remove one subscription by id
    pub fn remove(&self, subscription_id: &str) -> Result<(), RouterError> {
        let client_id = self
            .owners
            .write()
            .remove(subscription_id)
            .ok_or_else(|| RouterError::SubscriptionNotFound(subscription_id.to_string()))?;

        let mut by_client = self.by_client.write();
        if let Some(subs) = by_client.get_mut(&client_id) {
            subs.remove(subscription_id);
            if subs.is_empty() {
                by_client.remove(&client_id);
            }
        }

        Ok(())
    }

    /// Remove every subscription owned by a client (session destruction)
    pub fn remove_by_client(&self, client_id: &str) -> usize {
        let removed = self.by_client.write().remove(client_id);

        match removed {
            Some(subs) => {
                let mut owners = self.owners.write();
                for id in subs.keys() {
                    owners.remove(id);
                }
                subs.len()
            }
            None => 0,
        }
    }

    /// Remove only non-durable subscriptions (client disconnect)
    pub fn remove_non_durable(&self, client_id: &str) -> usize {
        let mut by_client = self.by_client.write();
        let Some(subs) = by_client.get_mut(client_id) else {
            return 0;
        };

        let doomed: Vec<String> = subs
            .values()
            .filter(|s| !s.durable)
            .map(|s| s.subscription_id.clone())
            .collect();

        let mut owners = self.owners.write();
        for id in &doomed {
            subs.remove(id);
            owners.remove(id);
        }
        if subs.is_empty() {
            by_client.remove(client_id);
        }

        doomed.len()
    }

    /// All subscriptions that want this event
    ///
    /// Per-subscription checks short-circuit cheapest-first (topic, then
    /// priority threshold, then payload predicate).
    pub fn find_matches(&self, event: &Event) -> Vec<Arc<Subscription>> {
        self.by_client
            .read()
            .values()
            .flat_map(|subs| subs.values())
            .filter(|sub| sub.wants(event))
            .cloned()
            .collect()
    }

    /// Matching subscriptions restricted to one client (targeted redelivery)
    pub fn find_matches_for_client(&self, event: &Event, client_id: &str) -> Vec<Arc<Subscription>> {
        match self.by_client.read().get(client_id) {
            Some(subs) => subs.values().filter(|sub| sub.wants(event)).cloned().collect(),
            None => Vec::new(),
        }
    }

    /// All subscriptions owned by a client (subscription restore, replay)
    pub fn for_client(&self, client_id: &str) -> Vec<Arc<Subscription>> {
        self.by_client
            .read()
            .get(client_id)
            .map(|subs| subs.values().cloned().collect())
            .unwrap_or_default()
    }

    /// An existing subscription with identical parameters, if any.
    /// Reconnecting clients re-issue their durable subscriptions; matching
    /// them here keeps the registry duplicate-free.
    pub fn find_equivalent(
        &self,
        client_id: &str,
        pattern: &str,
        filter: &Option<crate::broker::filter::PayloadFilter>,
        priority_filter: Option<crate::broker::event::Priority>,
        durable: bool,
    ) -> Option<Arc<Subscription>> {
        let filter_value = serde_json::to_value(filter).ok()?;
        self.by_client
            .read()
            .get(client_id)?
            .values()
            .find(|s| {
                s.pattern == pattern
                    && s.priority_filter == priority_filter
                    && s.durable == durable
                    && serde_json::to_value(&s.filter)
                        .map(|v| v == filter_value)
                        .unwrap_or(false)
            })
            .cloned()
    }

    /// Get a subscription by id
    pub fn get(&self, subscription_id: &str) -> Option<Arc<Subscription>> {
        let owners = self.owners.read();
        let client_id = owners.get(subscription_id)?;
        self.by_client
            .read()
            .get(client_id)
            .and_then(|subs| subs.get(subscription_id))
            .cloned()
    }

    /// Total registered subscriptions
    pub fn len(&self) -> usize {
        self.owners.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.owners.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::event::Priority;
    use serde_json::json;

    fn sub(client: &str, pattern: &str, durable: bool) -> Subscription {
        Subscription::new(client.to_string(), pattern.to_string(), None, None, durable).unwrap()
    }

    fn event(topic: &str) -> Event {
        Event::accept(topic.to_string(), json!({}), Priority::NORMAL, None, None)
    }

    #[test]
    fn test_add_and_find() {
        let registry = SubscriptionRegistry::new();
        registry.add(sub("c1", "task.*", false));
        registry.add(sub("c2", "task.created", false));
        registry.add(sub("c3", "agent.*", false));

        let matches = registry.find_matches(&event("task.created"));
        assert_eq!(matches.len(), 2);

        let matches = registry.find_matches(&event("agent.ready"));
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].client_id, "c3");
    }

    #[test]
    fn test_remove_by_id() {
        let registry = SubscriptionRegistry::new();
        let s = registry.add(sub("c1", "task.*", false));

        assert!(registry.remove(&s.subscription_id).is_ok());
        assert!(registry.find_matches(&event("task.created")).is_empty());

        // Second removal reports not-found
        assert!(matches!(
            registry.remove(&s.subscription_id),
            Err(RouterError::SubscriptionNotFound(_))
        ));
    }

    #[test]
    fn test_remove_by_client_clears_index() {
        let registry = SubscriptionRegistry::new();
        let s1 = registry.add(sub("c1", "task.*", false));
        registry.add(sub("c1", "agent.*", true));
        registry.add(sub("c2", "task.*", false));

        assert_eq!(registry.remove_by_client("c1"), 2);
        assert_eq!(registry.len(), 1);
        assert!(registry.get(&s1.subscription_id).is_none());
    }

    #[test]
    fn test_remove_non_durable_keeps_durable() {
        let registry = SubscriptionRegistry::new();
        registry.add(sub("c1", "task.*", false));
        let durable = registry.add(sub("c1", "agent.*", true));

        assert_eq!(registry.remove_non_durable("c1"), 1);
        assert_eq!(registry.for_client("c1").len(), 1);
        assert!(registry.get(&durable.subscription_id).is_some());
    }

    #[test]
    fn test_find_matches_for_client_is_scoped() {
        let registry = SubscriptionRegistry::new();
        registry.add(sub("c1", "task.*", false));
        registry.add(sub("c2", "task.*", false));

        let matches = registry.find_matches_for_client(&event("task.created"), "c2");
        assert_eq!(matches.len(), 1);
        assert_eq!(matches[0].client_id, "c2");
    }
}
