//! The concurrent mock store and its workspace-filtered view.

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::RwLock;

use crate::mock::{Mock, MockType};

/// A concurrent map of mock IDs to mock configurations, with priority-sorted
/// listing. Safe for any number of concurrent readers and writers; readers
/// always observe a consistent pre- or post-mutation snapshot because every
/// operation clones out of (or replaces wholesale) the guarded map rather
/// than handing out references that outlive the lock.
#[derive(Debug, Clone, Default)]
pub struct MockStore {
    inner: Arc<RwLock<HashMap<String, Mock>>>,
}

impl MockStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Fetch a mock by ID.
    pub async fn get(&self, id: &str) -> Option<Mock> {
        self.inner.read().await.get(id).cloned()
    }

    /// Insert or replace a mock by its ID.
    pub async fn set(&self, mock: Mock) {
        self.inner.write().await.insert(mock.id.clone(), mock);
    }

    /// Remove a mock by ID, reporting whether it was present.
    pub async fn delete(&self, id: &str) -> bool {
        self.inner.write().await.remove(id).is_some()
    }

    /// Whether a mock with this ID is present.
    pub async fn exists(&self, id: &str) -> bool {
        self.inner.read().await.contains_key(id)
    }

    /// Number of stored mocks.
    pub async fn count(&self) -> usize {
        self.inner.read().await.len()
    }

    /// Remove every mock.
    pub async fn clear(&self) {
        self.inner.write().await.clear();
    }

    /// All mocks, ordered priority-desc then createdAt-asc. Non-HTTP mocks
    /// have implicit priority 0.
    pub async fn list(&self) -> Vec<Mock> {
        let guard = self.inner.read().await;
        let mut mocks: Vec<Mock> = guard.values().cloned().collect();
        drop(guard);
        sort_by_priority_then_age(&mut mocks);
        mocks
    }

    /// All mocks of a given type. Unordered in general, but preserves
    /// [`Self::list`]'s order for `MockType::Http` members, since the HTTP
    /// handler depends on that ordering when scanning candidates.
    pub async fn list_by_type(&self, mock_type: MockType) -> Vec<Mock> {
        let mut mocks = self.list().await;
        mocks.retain(|m| m.mock_type() == mock_type);
        mocks
    }
}

/// Sort priority-desc, then createdAt-asc, as the HTTP handler's candidate
/// scan and the management API's listing both require.
pub(crate) fn sort_by_priority_then_age(mocks: &mut [Mock]) {
    mocks.sort_by(|a, b| {
        b.priority()
            .cmp(&a.priority())
            .then_with(|| a.created_at.cmp(&b.created_at))
    });
}

/// A workspace-scoped view over an underlying [`MockStore`]. All writes are
/// stamped with the bound workspace ID; all reads/deletes are restricted to
/// mocks carrying that same workspace ID, so cross-workspace access behaves
/// as "not found" rather than surfacing another tenant's data.
///
/// Two filters over the same underlying store are isolated in the sense
/// that a `set` through one is invisible to the other's reads even under
/// a shared ID: the underlying map holds one record per ID, and the last
/// writer's workspace stamp wins.
#[derive(Debug, Clone)]
pub struct FilteredMockStore {
    inner: MockStore,
    workspace_id: String,
}

impl FilteredMockStore {
    /// Bind a filtered view to `workspace_id` over `inner`.
    pub fn new(inner: MockStore, workspace_id: impl Into<String>) -> Self {
        Self {
            inner,
            workspace_id: workspace_id.into(),
        }
    }

    /// The workspace ID this view is bound to.
    pub fn workspace_id(&self) -> &str {
        &self.workspace_id
    }

    /// Fetch a mock by ID, only if it belongs to this view's workspace.
    pub async fn get(&self, id: &str) -> Option<Mock> {
        self.inner
            .get(id)
            .await
            .filter(|m| m.workspace_id.as_deref() == Some(self.workspace_id.as_str()))
    }

    /// Insert or replace a mock, stamping a copy with this view's workspace
    /// ID before storing. The caller's input is left untouched.
    pub async fn set(&self, mut mock: Mock) {
        mock.workspace_id = Some(self.workspace_id.clone());
        self.inner.set(mock).await;
    }

    /// Remove a mock by ID, only if it belongs to this view's workspace.
    /// Returns `false` without deleting when the ID belongs to another
    /// workspace or is absent.
    pub async fn delete(&self, id: &str) -> bool {
        if !self.exists(id).await {
            return false;
        }
        self.inner.delete(id).await
    }

    /// Whether a mock with this ID, scoped to this view's workspace, exists.
    pub async fn exists(&self, id: &str) -> bool {
        self.get(id).await.is_some()
    }

    /// Number of mocks belonging to this view's workspace.
    pub async fn count(&self) -> usize {
        self.list().await.len()
    }

    /// Remove every mock belonging to this view's workspace, leaving other
    /// workspaces' mocks in the underlying store untouched.
    pub async fn clear(&self) {
        let ids: Vec<String> = self.list().await.into_iter().map(|m| m.id).collect();
        for id in ids {
            self.inner.delete(&id).await;
        }
    }

    /// Mocks belonging to this view's workspace, priority-desc then
    /// createdAt-asc.
    pub async fn list(&self) -> Vec<Mock> {
        let mut mocks = self.inner.list().await;
        mocks.retain(|m| m.workspace_id.as_deref() == Some(self.workspace_id.as_str()));
        mocks
    }

    /// Mocks of a given type belonging to this view's workspace.
    pub async fn list_by_type(&self, mock_type: MockType) -> Vec<Mock> {
        let mut mocks = self.list().await;
        mocks.retain(|m| m.mock_type() == mock_type);
        mocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{HttpMatcher, HttpResponse, HttpSpec, MockSpec};
    use chrono::{Duration, Utc};
    use std::collections::HashMap as StdHashMap;

    fn http_mock(id: &str, priority: i32, age_offset_secs: i64) -> Mock {
        let created = Utc::now() - Duration::seconds(age_offset_secs);
        Mock {
            id: id.into(),
            name: None,
            enabled: None,
            created_at: created,
            updated_at: created,
            workspace_id: None,
            spec: MockSpec::Http(HttpSpec {
                priority,
                matcher: HttpMatcher::default(),
                response: HttpResponse {
                    status_code: 200,
                    headers: StdHashMap::new(),
                    body: Some("ok".into()),
                    body_file: None,
                    delay_ms: None,
                    seed: None,
                    sse: None,
                    chunked: None,
                    validation: None,
                    stateful_operation: None,
                },
            }),
        }
    }

    #[tokio::test]
    async fn set_and_get_roundtrip() {
        let store = MockStore::new();
        store.set(http_mock("a", 0, 0)).await;
        assert!(store.get("a").await.is_some());
        assert!(store.get("b").await.is_none());
    }

    #[tokio::test]
    async fn delete_reports_presence() {
        let store = MockStore::new();
        store.set(http_mock("a", 0, 0)).await;
        assert!(store.delete("a").await);
        assert!(!store.delete("a").await);
    }

    #[tokio::test]
    async fn list_orders_by_priority_desc_then_age_asc() {
        let store = MockStore::new();
        store.set(http_mock("low-old", 1, 100)).await;
        store.set(http_mock("high", 5, 10)).await;
        store.set(http_mock("low-new", 1, 5)).await;
        let ids: Vec<String> = store.list().await.into_iter().map(|m| m.id).collect();
        assert_eq!(ids, vec!["high", "low-old", "low-new"]);
    }

    #[tokio::test]
    async fn filtered_view_isolates_workspaces() {
        let underlying = MockStore::new();
        let ws1 = FilteredMockStore::new(underlying.clone(), "ws1");
        let ws2 = FilteredMockStore::new(underlying.clone(), "ws2");

        ws1.set(http_mock("shared-id", 0, 0)).await;
        assert!(ws1.get("shared-id").await.is_some());
        assert!(ws2.get("shared-id").await.is_none());

        // ws2 writing the same ID overwrites the underlying record's stamp.
        ws2.set(http_mock("shared-id", 0, 0)).await;
        assert!(ws1.get("shared-id").await.is_none());
        assert!(ws2.get("shared-id").await.is_some());
    }

    #[tokio::test]
    async fn filtered_delete_does_not_cross_workspaces() {
        let underlying = MockStore::new();
        let ws1 = FilteredMockStore::new(underlying.clone(), "ws1");
        let ws2 = FilteredMockStore::new(underlying.clone(), "ws2");
        ws1.set(http_mock("a", 0, 0)).await;

        assert!(!ws2.delete("a").await);
        assert!(ws1.exists("a").await);
        assert!(ws1.delete("a").await);
    }

    #[tokio::test]
    async fn filtered_set_stamps_workspace_without_mutating_caller_copy() {
        let underlying = MockStore::new();
        let ws1 = FilteredMockStore::new(underlying, "ws1");
        let mock = http_mock("a", 0, 0);
        assert_eq!(mock.workspace_id, None);
        ws1.set(mock.clone()).await;
        assert_eq!(mock.workspace_id, None);
        let stored = ws1.get("a").await.unwrap();
        assert_eq!(stored.workspace_id.as_deref(), Some("ws1"));
    }
}
