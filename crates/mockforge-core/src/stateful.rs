//! The stateful resource bridge: an in-memory CRUD collection reachable by
//! path-prefix matching inside the HTTP handler. The persistent-store-backed
//! cold-load of resource definitions is an out-of-scope collaborator; this
//! module only owns the runtime collection and its CRUD semantics.

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tokio::sync::RwLock;

/// One of the five operations the HTTP handler's stateful bridge dispatches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatefulOp {
    /// Fetch one item, or the whole collection if no ID is given
    Get,
    /// Insert a new item
    Create,
    /// Replace an existing item wholesale
    Update,
    /// Merge fields into an existing item
    Patch,
    /// Remove an item
    Delete,
}

/// Error taxonomy for stateful operations.
#[derive(Debug, Clone)]
pub enum StatefulError {
    /// No item with the given ID in this resource
    NotFound,
    /// An item with this ID already exists (on create)
    Conflict,
    /// The request body didn't satisfy the resource's basic shape
    Validation(String),
    /// The resource is at its configured item cap
    CapacityExceeded,
    /// Any other internal failure
    Internal(String),
}

impl StatefulError {
    /// The HTTP status this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::Validation(_) => 400,
            Self::CapacityExceeded => 507,
            Self::Internal(_) => 500,
        }
    }

    /// A short hint string suitable for the error response's `hint` field.
    pub fn hint(&self) -> Option<String> {
        match self {
            Self::Validation(msg) => Some(msg.clone()),
            Self::Internal(msg) => Some(msg.clone()),
            _ => None,
        }
    }
}

/// A single in-memory resource collection: a JSON object keyed by an `id`
/// field extracted from each item (falling back to an internally assigned
/// key when absent).
#[derive(Debug, Default)]
struct Collection {
    items: HashMap<String, Value>,
    max_items: Option<usize>,
}

/// The full set of named stateful resource collections available to the
/// handler, keyed by resource name (the path-prefix segment).
#[derive(Clone, Default)]
pub struct StatefulStore {
    resources: Arc<RwLock<HashMap<String, Arc<RwLock<Collection>>>>>,
}

impl StatefulStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Declare a resource collection, optionally capped at `max_items`.
    /// Re-declaring an existing resource is a no-op on its contents.
    pub async fn declare_resource(&self, name: &str, max_items: Option<usize>) {
        let mut guard = self.resources.write().await;
        guard
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(RwLock::new(Collection::default())))
            .write()
            .await
            .max_items = max_items;
    }

    async fn collection(&self, name: &str) -> Option<Arc<RwLock<Collection>>> {
        self.resources.read().await.get(name).cloned()
    }

    /// Fetch one item by ID, or `None` if the resource or item is absent.
    pub async fn get(&self, resource: &str, id: &str) -> Result<Value, StatefulError> {
        let coll = self.collection(resource).await.ok_or(StatefulError::NotFound)?;
        coll.read()
            .await
            .items
            .get(id)
            .cloned()
            .ok_or(StatefulError::NotFound)
    }

    /// List every item in a resource collection.
    pub async fn list(&self, resource: &str) -> Result<Vec<Value>, StatefulError> {
        let coll = self.collection(resource).await.ok_or(StatefulError::NotFound)?;
        Ok(coll.read().await.items.values().cloned().collect())
    }

    /// Create a new item. `id` is taken from the body's `id` field if
    /// present, else generated.
    pub async fn create(&self, resource: &str, body: Value) -> Result<Value, StatefulError> {
        let coll = self.collection(resource).await.ok_or(StatefulError::NotFound)?;
        let mut guard = coll.write().await;
        if let Some(cap) = guard.max_items {
            if guard.items.len() >= cap {
                return Err(StatefulError::CapacityExceeded);
            }
        }
        let id = body
            .get("id")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if guard.items.contains_key(&id) {
            return Err(StatefulError::Conflict);
        }
        let mut stamped = body;
        if let Value::Object(map) = &mut stamped {
            map.insert("id".to_string(), Value::String(id.clone()));
        } else {
            return Err(StatefulError::Validation("body must be a JSON object".to_string()));
        }
        guard.items.insert(id, stamped.clone());
        Ok(stamped)
    }

    /// Replace an existing item wholesale.
    pub async fn update(&self, resource: &str, id: &str, body: Value) -> Result<Value, StatefulError> {
        let coll = self.collection(resource).await.ok_or(StatefulError::NotFound)?;
        let mut guard = coll.write().await;
        if !guard.items.contains_key(id) {
            return Err(StatefulError::NotFound);
        }
        let mut stamped = body;
        if let Value::Object(map) = &mut stamped {
            map.insert("id".to_string(), Value::String(id.to_string()));
        } else {
            return Err(StatefulError::Validation("body must be a JSON object".to_string()));
        }
        guard.items.insert(id.to_string(), stamped.clone());
        Ok(stamped)
    }

    /// Merge fields from `patch` into an existing item.
    pub async fn patch(&self, resource: &str, id: &str, patch: Value) -> Result<Value, StatefulError> {
        let coll = self.collection(resource).await.ok_or(StatefulError::NotFound)?;
        let mut guard = coll.write().await;
        let existing = guard.items.get_mut(id).ok_or(StatefulError::NotFound)?;
        let (Value::Object(existing_map), Value::Object(patch_map)) = (existing, patch) else {
            return Err(StatefulError::Validation("patch body must be a JSON object".to_string()));
        };
        for (k, v) in patch_map {
            existing_map.insert(k, v);
        }
        Ok(Value::Object(existing_map.clone()))
    }

    /// Remove an item by ID.
    pub async fn delete(&self, resource: &str, id: &str) -> Result<(), StatefulError> {
        let coll = self.collection(resource).await.ok_or(StatefulError::NotFound)?;
        let mut guard = coll.write().await;
        guard.items.remove(id).map(|_| ()).ok_or(StatefulError::NotFound)
    }

    /// Remove every item from every declared resource, keeping the
    /// resource declarations themselves (used by `POST /state/reset`).
    pub async fn reset_all(&self) {
        let guard = self.resources.read().await;
        for coll in guard.values() {
            coll.write().await.items.clear();
        }
    }

    /// Remove every item from a single named resource (used by
    /// `DELETE /state/{name}`).
    pub async fn reset_resource(&self, resource: &str) -> Result<(), StatefulError> {
        let coll = self.collection(resource).await.ok_or(StatefulError::NotFound)?;
        coll.write().await.items.clear();
        Ok(())
    }

    /// The names of every declared resource.
    pub async fn resource_names(&self) -> Vec<String> {
        self.resources.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn create_then_get_roundtrips() {
        let store = StatefulStore::new();
        store.declare_resource("widgets", None).await;
        let created = store.create("widgets", json!({"name": "a"})).await.unwrap();
        let id = created["id"].as_str().unwrap().to_string();
        let fetched = store.get("widgets", &id).await.unwrap();
        assert_eq!(fetched["name"], "a");
    }

    #[tokio::test]
    async fn create_with_explicit_duplicate_id_conflicts() {
        let store = StatefulStore::new();
        store.declare_resource("widgets", None).await;
        store.create("widgets", json!({"id": "x"})).await.unwrap();
        let err = store.create("widgets", json!({"id": "x"})).await.unwrap_err();
        assert!(matches!(err, StatefulError::Conflict));
    }

    #[tokio::test]
    async fn capacity_exceeded_rejects_further_creates() {
        let store = StatefulStore::new();
        store.declare_resource("widgets", Some(1)).await;
        store.create("widgets", json!({"id": "a"})).await.unwrap();
        let err = store.create("widgets", json!({"id": "b"})).await.unwrap_err();
        assert!(matches!(err, StatefulError::CapacityExceeded));
    }

    #[tokio::test]
    async fn patch_merges_fields() {
        let store = StatefulStore::new();
        store.declare_resource("widgets", None).await;
        store.create("widgets", json!({"id": "a", "name": "old", "color": "red"})).await.unwrap();
        let patched = store.patch("widgets", "a", json!({"name": "new"})).await.unwrap();
        assert_eq!(patched["name"], "new");
        assert_eq!(patched["color"], "red");
    }

    #[tokio::test]
    async fn delete_missing_item_is_not_found() {
        let store = StatefulStore::new();
        store.declare_resource("widgets", None).await;
        let err = store.delete("widgets", "nope").await.unwrap_err();
        assert!(matches!(err, StatefulError::NotFound));
    }
}
