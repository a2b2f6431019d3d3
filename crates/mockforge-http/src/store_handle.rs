//! A handle abstracting over a global [`MockStore`] or a workspace-scoped
//! [`FilteredMockStore`], so [`HttpHandler`](crate::handler::HttpHandler) and
//! the mock manager can be built once and reused for both the main server
//! and per-workspace listeners.

use mockforge_core::{FilteredMockStore, Mock, MockStore, MockType};

/// Either the central store or a workspace-filtered view over it.
#[derive(Debug, Clone)]
pub enum StoreHandle {
    /// The unscoped, global store.
    Global(MockStore),
    /// A workspace-scoped view.
    Filtered(FilteredMockStore),
}

impl From<MockStore> for StoreHandle {
    fn from(store: MockStore) -> Self {
        Self::Global(store)
    }
}

impl From<FilteredMockStore> for StoreHandle {
    fn from(store: FilteredMockStore) -> Self {
        Self::Filtered(store)
    }
}

impl StoreHandle {
    /// Fetch a mock by ID.
    pub async fn get(&self, id: &str) -> Option<Mock> {
        match self {
            Self::Global(s) => s.get(id).await,
            Self::Filtered(s) => s.get(id).await,
        }
    }

    /// Insert or replace a mock by its ID.
    pub async fn set(&self, mock: Mock) {
        match self {
            Self::Global(s) => s.set(mock).await,
            Self::Filtered(s) => s.set(mock).await,
        }
    }

    /// Remove a mock by ID, reporting whether it was present.
    pub async fn delete(&self, id: &str) -> bool {
        match self {
            Self::Global(s) => s.delete(id).await,
            Self::Filtered(s) => s.delete(id).await,
        }
    }

    /// Whether a mock with this ID is present (and visible through this view).
    pub async fn exists(&self, id: &str) -> bool {
        match self {
            Self::Global(s) => s.exists(id).await,
            Self::Filtered(s) => s.exists(id).await,
        }
    }

    /// Number of mocks visible through this view.
    pub async fn count(&self) -> usize {
        match self {
            Self::Global(s) => s.count().await,
            Self::Filtered(s) => s.count().await,
        }
    }

    /// Remove every mock visible through this view.
    pub async fn clear(&self) {
        match self {
            Self::Global(s) => s.clear().await,
            Self::Filtered(s) => s.clear().await,
        }
    }

    /// Mocks visible through this view, priority-desc then createdAt-asc.
    pub async fn list(&self) -> Vec<Mock> {
        match self {
            Self::Global(s) => s.list().await,
            Self::Filtered(s) => s.list().await,
        }
    }

    /// Mocks of a given type visible through this view.
    pub async fn list_by_type(&self, mock_type: MockType) -> Vec<Mock> {
        match self {
            Self::Global(s) => s.list_by_type(mock_type).await,
            Self::Filtered(s) => s.list_by_type(mock_type).await,
        }
    }

    /// The bound workspace ID, if this is a filtered view.
    pub fn workspace_id(&self) -> Option<&str> {
        match self {
            Self::Global(_) => None,
            Self::Filtered(s) => Some(s.workspace_id()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn global_handle_delegates_to_mock_store() {
        let handle = StoreHandle::from(MockStore::new());
        assert_eq!(handle.count().await, 0);
        assert_eq!(handle.workspace_id(), None);
    }

    #[tokio::test]
    async fn filtered_handle_reports_its_workspace() {
        let handle = StoreHandle::from(FilteredMockStore::new(MockStore::new(), "ws-1"));
        assert_eq!(handle.workspace_id(), Some("ws-1"));
    }
}
