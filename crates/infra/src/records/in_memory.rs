use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use newsdesk_core::{Page, PageRequest, Record, RecordId, RecordStore, StoreError, StoreResult};

/// In-memory record store for tests/dev.
///
/// Every mutation happens under one write lock, so `update` is an atomic
/// single-row read-modify-write and unique fields are checked against a
/// consistent snapshot.
#[derive(Debug)]
pub struct InMemoryRecordStore<R> {
    inner: RwLock<Table<R>>,
}

#[derive(Debug)]
struct Table<R> {
    rows: BTreeMap<i64, R>,
    next_id: i64,
}

impl<R> InMemoryRecordStore<R> {
    pub fn new() -> Self {
        Self {
            inner: RwLock::new(Table {
                rows: BTreeMap::new(),
                next_id: 1,
            }),
        }
    }

    fn read(&self) -> StoreResult<RwLockReadGuard<'_, Table<R>>> {
        self.inner
            .read()
            .map_err(|_| StoreError::Unavailable("record table lock poisoned".to_string()))
    }

    fn write(&self) -> StoreResult<RwLockWriteGuard<'_, Table<R>>> {
        self.inner
            .write()
            .map_err(|_| StoreError::Unavailable("record table lock poisoned".to_string()))
    }
}

impl<R> Default for InMemoryRecordStore<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R: Record> Table<R> {
    /// First unique field whose value is already held by another row.
    fn violated_field(&self, candidate: &R, skip: Option<i64>) -> Option<&'static str> {
        R::UNIQUE_FIELDS.iter().copied().find(|field| {
            let Some(value) = candidate.unique_value(field) else {
                return false;
            };
            self.rows
                .iter()
                .filter(|(id, _)| Some(**id) != skip)
                .any(|(_, row)| row.unique_value(field).as_deref() == Some(value.as_str()))
        })
    }
}

impl<R: Record> RecordStore<R> for InMemoryRecordStore<R> {
    fn find_by_id(&self, id: R::Id) -> StoreResult<R> {
        self.read()?
            .rows
            .get(&id.raw())
            .cloned()
            .ok_or_else(|| StoreError::not_found(R::KIND, id))
    }

    fn find_by_unique(&self, field: &str, value: &str) -> StoreResult<R> {
        self.read()?
            .rows
            .values()
            .find(|row| row.unique_value(field).as_deref() == Some(value))
            .cloned()
            .ok_or_else(|| StoreError::not_found(R::KIND, format!("{field}={value}")))
    }

    fn create(&self, mut record: R) -> StoreResult<R> {
        let mut table = self.write()?;
        if let Some(field) = table.violated_field(&record, None) {
            return Err(StoreError::ConstraintViolation { kind: R::KIND, field });
        }

        let id = table.next_id;
        table.next_id += 1;
        record.assign_id(R::Id::from_raw(id));
        table.rows.insert(id, record.clone());
        Ok(record)
    }

    fn update(&self, id: R::Id, apply: &mut dyn FnMut(&mut R)) -> StoreResult<R> {
        let mut table = self.write()?;
        let mut row = table
            .rows
            .get(&id.raw())
            .cloned()
            .ok_or_else(|| StoreError::not_found(R::KIND, id))?;

        apply(&mut row);
        row.assign_id(id);

        if let Some(field) = table.violated_field(&row, Some(id.raw())) {
            return Err(StoreError::ConstraintViolation { kind: R::KIND, field });
        }

        table.rows.insert(id.raw(), row.clone());
        Ok(row)
    }

    fn delete(&self, id: R::Id) -> StoreResult<R> {
        self.write()?
            .rows
            .remove(&id.raw())
            .ok_or_else(|| StoreError::not_found(R::KIND, id))
    }

    fn list(&self, page: PageRequest) -> StoreResult<Page<R>> {
        let table = self.read()?;
        let items = table
            .rows
            .values()
            .rev()
            .skip(page.offset())
            .take(page.limit as usize)
            .cloned()
            .collect();

        Ok(Page {
            items,
            total: table.rows.len(),
            request: page,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use newsdesk_core::{News, User, UserId};

    fn user(email: &str) -> User {
        User::new("Ada", email, "hash")
    }

    #[test]
    fn create_assigns_sequential_ids() {
        let store = InMemoryRecordStore::<User>::new();
        let a = store.create(user("a@example.com")).unwrap();
        let b = store.create(user("b@example.com")).unwrap();

        assert_eq!(a.id.get(), 1);
        assert_eq!(b.id.get(), 2);
        assert_eq!(store.find_by_id(b.id).unwrap().email, "b@example.com");
    }

    #[test]
    fn unique_email_is_enforced_on_create_and_update() {
        let store = InMemoryRecordStore::<User>::new();
        store.create(user("a@example.com")).unwrap();
        let b = store.create(user("b@example.com")).unwrap();

        assert!(matches!(
            store.create(user("a@example.com")),
            Err(StoreError::ConstraintViolation { field: "email", .. })
        ));

        let err = store
            .update(b.id, &mut |u| u.email = "a@example.com".to_string())
            .unwrap_err();
        assert!(matches!(err, StoreError::ConstraintViolation { .. }));
        // Failed update leaves the row untouched.
        assert_eq!(store.find_by_id(b.id).unwrap().email, "b@example.com");
    }

    #[test]
    fn find_by_unique_field() {
        let store = InMemoryRecordStore::<User>::new();
        let created = store.create(user("a@example.com")).unwrap();

        assert_eq!(store.find_by_unique("email", "a@example.com").unwrap().id, created.id);
        assert!(store.find_by_unique("email", "x@example.com").unwrap_err().is_not_found());
    }

    #[test]
    fn update_and_delete_missing_rows_are_not_found() {
        let store = InMemoryRecordStore::<User>::new();
        let missing = UserId::new(99);

        assert!(store.update(missing, &mut |_| {}).unwrap_err().is_not_found());
        assert!(store.delete(missing).unwrap_err().is_not_found());
    }

    #[test]
    fn list_is_newest_first_and_paginated() {
        let store = InMemoryRecordStore::<News>::new();
        for i in 0..5 {
            store
                .create(News::new(UserId::new(1), format!("title {i}"), "content", "a.png"))
                .unwrap();
        }

        let page = store.list(PageRequest::new(1, 2)).unwrap();
        assert_eq!(page.total, 5);
        assert_eq!(page.total_pages(), 3);
        assert_eq!(page.items[0].title, "title 4");
        assert_eq!(page.items[1].title, "title 3");

        let last = store.list(PageRequest::new(3, 2)).unwrap();
        assert_eq!(last.items.len(), 1);
        assert_eq!(last.items[0].title, "title 0");
    }
}
