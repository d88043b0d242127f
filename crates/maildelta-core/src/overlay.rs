//! Data overlays: pending-work annotations for UI-facing records.
//!
//! Complex tasks register resolvers per `(namespace, name)`. Resolving an item
//! asks every provider name for a contribution and keeps the first non-null
//! answer per name. Subscribers learn about changed items through a broadcast
//! channel.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, warn};

use crate::config::EngineConfig;
use crate::{Error, Result};

/// Answers "what does pending work look like for this item" synchronously.
pub type OverlayResolver = Arc<dyn Fn(&str) -> Option<serde_json::Value> + Send + Sync>;

/// Identifies one registered resolver so it can be removed again.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ProviderHandle {
    namespace: String,
    name: String,
    id: u64,
}

impl ProviderHandle {
    /// Namespace the resolver is registered in.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Provider name the resolver contributes under.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }
}

/// An item whose overlay data changed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OverlayUpdate {
    /// Namespace of the item.
    pub namespace: String,
    /// Item id.
    pub id: String,
}

type ProvidersByName = HashMap<String, Vec<(u64, OverlayResolver)>>;

/// Registry of overlay providers per namespace.
pub struct DataOverlayManager {
    providers: RwLock<HashMap<String, ProvidersByName>>,
    next_id: AtomicU64,
    updates: broadcast::Sender<OverlayUpdate>,
}

impl DataOverlayManager {
    /// Create a manager serving the given namespaces.
    #[must_use]
    pub fn new<I, S>(namespaces: I, channel_capacity: usize) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let providers = namespaces
            .into_iter()
            .map(|namespace| (namespace.into(), HashMap::new()))
            .collect();
        let (updates, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            providers: RwLock::new(providers),
            next_id: AtomicU64::new(1),
            updates,
        }
    }

    /// Create a manager from the engine configuration.
    #[must_use]
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::new(
            config.overlay_namespaces.iter().cloned(),
            config.overlay_channel_capacity,
        )
    }

    /// Register a resolver under `(namespace, name)`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::UnknownNamespace`] if the namespace is not served.
    pub fn register_provider(
        &self,
        namespace: &str,
        name: &str,
        resolver: OverlayResolver,
    ) -> Result<ProviderHandle> {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(by_name) = providers.get_mut(namespace) else {
            warn!("Overlay provider {} registered for unknown namespace {}", name, namespace);
            return Err(Error::UnknownNamespace(namespace.to_string()));
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        by_name
            .entry(name.to_string())
            .or_default()
            .push((id, resolver));

        Ok(ProviderHandle {
            namespace: namespace.to_string(),
            name: name.to_string(),
            id,
        })
    }

    /// Remove a previously registered resolver. Unknown handles are ignored.
    pub fn unregister_provider(&self, handle: &ProviderHandle) {
        let mut providers = self
            .providers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(by_name) = providers.get_mut(&handle.namespace) else {
            return;
        };
        if let Some(resolvers) = by_name.get_mut(&handle.name) {
            resolvers.retain(|(id, _)| *id != handle.id);
            if resolvers.is_empty() {
                by_name.remove(&handle.name);
            }
        }
    }

    /// Collect the overlay contributions for one item.
    ///
    /// For every provider name the first resolver returning a value wins.
    /// Unknown namespaces resolve to nothing.
    #[must_use]
    pub fn resolve_overlays(&self, namespace: &str, id: &str) -> BTreeMap<String, serde_json::Value> {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let Some(by_name) = providers.get(namespace) else {
            return BTreeMap::new();
        };

        by_name
            .iter()
            .filter_map(|(name, resolvers)| {
                resolvers
                    .iter()
                    .find_map(|(_, resolver)| resolver(id))
                    .map(|contribution| (name.clone(), contribution))
            })
            .collect()
    }

    /// A resolver for one namespace that can be handed to list views.
    pub fn bound_resolver(
        self: &Arc<Self>,
        namespace: &str,
    ) -> impl Fn(&str) -> BTreeMap<String, serde_json::Value> + Send + Sync + 'static {
        let manager = Arc::clone(self);
        let namespace = namespace.to_string();
        move |id| manager.resolve_overlays(&namespace, id)
    }

    /// Tell subscribers that the overlay data of an item changed.
    pub fn announce_updated_overlay_data(&self, namespace: &str, id: &str) {
        debug!("Overlay data updated: {} {}", namespace, id);
        let update = OverlayUpdate {
            namespace: namespace.to_string(),
            id: id.to_string(),
        };
        if self.updates.send(update).is_err() {
            debug!("No overlay subscribers for {}", namespace);
        }
    }

    /// Subscribe to overlay update announcements.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<OverlayUpdate> {
        self.updates.subscribe()
    }
}

impl Default for DataOverlayManager {
    fn default() -> Self {
        Self::from_config(&EngineConfig::default())
    }
}

impl std::fmt::Debug for DataOverlayManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let providers = self
            .providers
            .read()
            .unwrap_or_else(PoisonError::into_inner);
        let mut namespaces: Vec<&String> = providers.keys().collect();
        namespaces.sort();
        f.debug_struct("DataOverlayManager")
            .field("namespaces", &namespaces)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use serde_json::json;

    use super::*;

    fn constant(value: Option<serde_json::Value>) -> OverlayResolver {
        Arc::new(move |_: &str| value.clone())
    }

    #[test]
    fn first_non_null_contribution_wins() {
        let manager = DataOverlayManager::default();
        manager
            .register_provider("messages", "store_flags", constant(None))
            .unwrap();
        manager
            .register_provider("messages", "store_flags", constant(Some(json!("a"))))
            .unwrap();
        manager
            .register_provider("messages", "store_flags", constant(Some(json!("b"))))
            .unwrap();
        manager
            .register_provider("messages", "store_labels", constant(None))
            .unwrap();

        let overlays = manager.resolve_overlays("messages", "u1");
        assert_eq!(overlays.len(), 1);
        assert_eq!(overlays["store_flags"], json!("a"));
    }

    #[test]
    fn resolver_sees_item_id() {
        let manager = DataOverlayManager::default();
        manager
            .register_provider(
                "messages",
                "echo",
                Arc::new(|id: &str| (id == "u7").then(|| json!({ "id": id }))),
            )
            .unwrap();

        assert_eq!(manager.resolve_overlays("messages", "u7")["echo"], json!({ "id": "u7" }));
        assert!(manager.resolve_overlays("messages", "u8").is_empty());
        assert!(manager.resolve_overlays("nowhere", "u7").is_empty());
    }

    #[test]
    fn unknown_namespace_is_rejected() {
        let manager = DataOverlayManager::new(["messages"], 4);
        let result = manager.register_provider("folders", "x", constant(None));
        assert!(matches!(result, Err(Error::UnknownNamespace(ns)) if ns == "folders"));
    }

    #[test]
    fn unregister_removes_only_that_resolver() {
        let manager = DataOverlayManager::default();
        let first = manager
            .register_provider("messages", "store_flags", constant(Some(json!(1))))
            .unwrap();
        manager
            .register_provider("messages", "store_flags", constant(Some(json!(2))))
            .unwrap();

        manager.unregister_provider(&first);
        assert_eq!(manager.resolve_overlays("messages", "u1")["store_flags"], json!(2));
    }

    #[test]
    fn bound_resolver_targets_namespace() {
        let manager = Arc::new(DataOverlayManager::default());
        manager
            .register_provider("conversations", "p", constant(Some(json!(true))))
            .unwrap();
        let resolve = manager.bound_resolver("conversations");
        assert_eq!(resolve("c1")["p"], json!(true));
    }

    #[tokio::test]
    async fn announcements_reach_subscribers() {
        let manager = DataOverlayManager::default();
        let mut updates = manager.subscribe();

        manager.announce_updated_overlay_data("messages", "u1");

        let update = updates.recv().await.unwrap();
        assert_eq!(
            update,
            OverlayUpdate {
                namespace: "messages".to_string(),
                id: "u1".to_string(),
            }
        );
    }
}
