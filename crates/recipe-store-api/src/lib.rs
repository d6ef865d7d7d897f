use std::sync::Arc;

use recipe_store_core::{new_record_id, Ingredient, Record, RecordStore, SortKey, StoreError};
use serde::{Deserialize, Serialize};

pub const API_CONTRACT_VERSION: &str = "api.v1";
pub const DEFAULT_PAGE: usize = 1;
pub const DEFAULT_PAGE_LIMIT: usize = 2;

#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("unsupported sort key: {0}")]
    UnsupportedSortKey(String),
    #[error("acting principal is required")]
    MissingPrincipal,
}

/// Body of a create-or-update call. The author is never taken from here.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UpsertRecordRequest {
    #[serde(default)]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub ingredients: Vec<Ingredient>,
    #[serde(default)]
    pub temperature: i64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ListQuery {
    pub page: Option<usize>,
    pub limit: Option<usize>,
    pub sort_by: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RecordListResponse {
    pub recipes: Vec<Record>,
    pub total: usize,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TotalResponse {
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct IdResponse {
    pub id: String,
}

#[derive(Debug, Clone)]
pub struct RecipeApi {
    store: Arc<RecordStore>,
    max_page_limit: usize,
}

impl RecipeApi {
    #[must_use]
    pub fn new(store: Arc<RecordStore>, max_page_limit: usize) -> Self {
        Self { store, max_page_limit: max_page_limit.max(1) }
    }

    #[must_use]
    pub fn store(&self) -> &Arc<RecordStore> {
        &self.store
    }

    /// # Errors
    /// Returns [`StoreError::NotFound`] wrapped in [`ApiError::Store`].
    pub fn get(&self, id: &str) -> Result<Record, ApiError> {
        Ok(self.store.get(id)?)
    }

    /// Create a record, or overwrite the one with the requested id.
    ///
    /// A missing or blank id gets a freshly generated one. The author is
    /// always the acting principal supplied by the caller.
    ///
    /// # Errors
    /// Returns [`ApiError::MissingPrincipal`] when `author_id` is blank.
    pub fn upsert(
        &self,
        request: UpsertRecordRequest,
        author_id: &str,
    ) -> Result<Record, ApiError> {
        let author_id = author_id.trim();
        if author_id.is_empty() {
            return Err(ApiError::MissingPrincipal);
        }

        let id = request
            .id
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .unwrap_or_else(new_record_id);
        let record = Record {
            id: id.clone(),
            author_id: author_id.to_string(),
            name: request.name,
            ingredients: request.ingredients,
            temperature: request.temperature,
        };
        self.store.set(id, record.clone());
        Ok(record)
    }

    /// List one page of records.
    ///
    /// Page and limit values below 1 fall back to the defaults, and the limit
    /// is clamped to the configured maximum.
    ///
    /// # Errors
    /// - [`ApiError::UnsupportedSortKey`] for any sort key other than `name`.
    /// - [`ApiError::Store`] for an empty store or a page past the end.
    pub fn list(&self, query: &ListQuery) -> Result<RecordListResponse, ApiError> {
        let sort_by = match query.sort_by.as_deref().map(str::trim) {
            None | Some("") => SortKey::default(),
            Some(raw) => {
                SortKey::parse(raw).ok_or_else(|| ApiError::UnsupportedSortKey(raw.to_string()))?
            }
        };
        let page = query.page.filter(|page| *page >= 1).unwrap_or(DEFAULT_PAGE);
        let limit = query
            .limit
            .filter(|limit| *limit >= 1)
            .unwrap_or(DEFAULT_PAGE_LIMIT)
            .min(self.max_page_limit);

        let recipes = self.store.list_page(page, limit, sort_by)?;
        Ok(RecordListResponse { recipes, total: self.store.len() })
    }

    #[must_use]
    pub fn count(&self) -> TotalResponse {
        TotalResponse { total: self.store.len() }
    }

    /// # Errors
    /// Returns [`StoreError::NotFound`] wrapped in [`ApiError::Store`].
    pub fn delete(&self, id: &str) -> Result<IdResponse, ApiError> {
        self.store.delete(id)?;
        Ok(IdResponse { id: id.to_string() })
    }
}
