//! Record-access contract.
//!
//! The relational store is an external collaborator. Everything above it
//! talks through [`RecordStore`]: find by id, find by unique field, create,
//! update, delete, and paginated listing. Each call either returns a record
//! or fails with `NotFound` / `ConstraintViolation` (or `Unavailable` when the
//! store itself cannot be reached).

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::id::RecordId;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("{kind} {id} not found")]
    NotFound { kind: &'static str, id: String },

    #[error("constraint violation on {kind}.{field}")]
    ConstraintViolation { kind: &'static str, field: &'static str },

    #[error("store unavailable: {0}")]
    Unavailable(String),
}

impl StoreError {
    pub fn not_found(kind: &'static str, id: impl ToString) -> Self {
        Self::NotFound {
            kind,
            id: id.to_string(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound { .. })
    }
}

/// A persisted record type.
pub trait Record: Clone + Send + Sync + 'static {
    type Id: RecordId;

    /// Logical table name (used in errors and logs).
    const KIND: &'static str;

    /// Fields that must be unique across all records of this kind.
    const UNIQUE_FIELDS: &'static [&'static str] = &[];

    fn id(&self) -> Self::Id;

    /// Called by the store on create.
    fn assign_id(&mut self, id: Self::Id);

    /// Value of a unique field, if `field` is one.
    fn unique_value(&self, _field: &str) -> Option<String> {
        None
    }
}

/// Pagination request (1-based page).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageRequest {
    pub page: u32,
    pub limit: u32,
}

impl PageRequest {
    pub const DEFAULT_LIMIT: u32 = 10;
    pub const MAX_LIMIT: u32 = 100;

    /// Build a request, clamping out-of-range values.
    pub fn new(page: u32, limit: u32) -> Self {
        Self {
            page: page.max(1),
            limit: limit.clamp(1, Self::MAX_LIMIT),
        }
    }

    pub fn offset(&self) -> usize {
        (self.page as usize - 1) * self.limit as usize
    }
}

impl Default for PageRequest {
    fn default() -> Self {
        Self::new(1, Self::DEFAULT_LIMIT)
    }
}

/// One page of records plus the total count.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page<R> {
    pub items: Vec<R>,
    pub total: usize,
    pub request: PageRequest,
}

impl<R> Page<R> {
    pub fn total_pages(&self) -> usize {
        self.total.div_ceil(self.request.limit as usize)
    }
}

/// Narrow record-access contract consumed by the core.
pub trait RecordStore<R: Record>: Send + Sync {
    fn find_by_id(&self, id: R::Id) -> StoreResult<R>;

    fn find_by_unique(&self, field: &str, value: &str) -> StoreResult<R>;

    /// Insert a record; the store assigns the id.
    fn create(&self, record: R) -> StoreResult<R>;

    /// Atomic single-row update: `apply` runs against the current row and
    /// the result is written back as one step.
    fn update(&self, id: R::Id, apply: &mut dyn FnMut(&mut R)) -> StoreResult<R>;

    /// Delete and return the removed record.
    fn delete(&self, id: R::Id) -> StoreResult<R>;

    /// Newest first.
    fn list(&self, page: PageRequest) -> StoreResult<Page<R>>;
}

impl<R: Record, S: RecordStore<R> + ?Sized> RecordStore<R> for Arc<S> {
    fn find_by_id(&self, id: R::Id) -> StoreResult<R> {
        (**self).find_by_id(id)
    }

    fn find_by_unique(&self, field: &str, value: &str) -> StoreResult<R> {
        (**self).find_by_unique(field, value)
    }

    fn create(&self, record: R) -> StoreResult<R> {
        (**self).create(record)
    }

    fn update(&self, id: R::Id, apply: &mut dyn FnMut(&mut R)) -> StoreResult<R> {
        (**self).update(id, apply)
    }

    fn delete(&self, id: R::Id) -> StoreResult<R> {
        (**self).delete(id)
    }

    fn list(&self, page: PageRequest) -> StoreResult<Page<R>> {
        (**self).list(page)
    }
}
