//! # In-Memory Remote
//!
//! An authoritative table service living in process memory. It keeps the same
//! rules a real table service enforces, so the engine can be exercised
//! end to end without a network.
//!
//! ## Rules
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  insert  id exists (live)         → Conflict { server copy }           │
//! │          id exists (tombstone)    → Conflict { none }                  │
//! │  update  id missing / tombstone   → Conflict { none }                  │
//! │          stale version            → Conflict { server copy }           │
//! │  delete  id missing / tombstone   → Conflict { none }                  │
//! │          stale version            → Conflict { server copy }           │
//! │                                                                         │
//! │  Every accepted write bumps a logical clock; the record's version and  │
//! │  change sequence come from it. Query returns records with a change     │
//! │  sequence greater than the checkpoint, tombstones included.            │
//! │                                                                         │
//! │  set_online(false) → every call fails with Unavailable                 │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, TimeZone, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

use driftwood_core::{Item, RemoteRecord};

use crate::error::{RemoteError, RemoteResult};
use crate::remote::{QueryRequest, RemoteClient, RemotePage};

#[derive(Debug, Clone)]
struct StoredRecord {
    item: Item,
    deleted: bool,
    change: u64,
}

#[derive(Debug, Default)]
struct State {
    tables: HashMap<String, HashMap<String, StoredRecord>>,
    clock: u64,
    scripted_failure: Option<(usize, RemoteError)>,
}

impl State {
    fn tick(&mut self) -> (u64, String, DateTime<Utc>) {
        self.clock += 1;
        let stamp = logical_epoch() + ChronoDuration::milliseconds(self.clock as i64);
        (self.clock, format!("{:08x}", self.clock), stamp)
    }

    fn table(&mut self, name: &str) -> &mut HashMap<String, StoredRecord> {
        self.tables.entry(name.to_string()).or_default()
    }

    fn write(&mut self, table: &str, mut item: Item, deleted: bool) -> Item {
        let (change, version, stamp) = self.tick();
        item.version = Some(version);
        item.updated_at = Some(stamp);
        self.table(table).insert(
            item.id.clone(),
            StoredRecord {
                item: item.clone(),
                deleted,
                change,
            },
        );
        item
    }
}

fn logical_epoch() -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000, 0)
        .single()
        .unwrap_or_else(Utc::now)
}

/// In-process authoritative remote.
#[derive(Debug, Default)]
pub struct MemoryRemote {
    state: Mutex<State>,
    offline: AtomicBool,
    binds: AtomicUsize,
    writes: AtomicUsize,
    queries: AtomicUsize,
}

impl MemoryRemote {
    /// Creates an empty, online remote.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // =========================================================================
    // Test Controls
    // =========================================================================

    /// Simulates losing (`false`) or regaining (`true`) connectivity.
    pub fn set_online(&self, online: bool) {
        self.offline.store(!online, Ordering::SeqCst);
    }

    /// Returns true unless [`set_online(false)`](Self::set_online) is in effect.
    pub fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    /// Lets the next `successes` write calls through, then fails the
    /// following one with `error`. Applies once.
    pub fn fail_write_after(&self, successes: usize, error: RemoteError) {
        self.lock().scripted_failure = Some((successes, error));
    }

    /// Number of `bind()` calls.
    pub fn bind_count(&self) -> usize {
        self.binds.load(Ordering::SeqCst)
    }

    /// Number of insert, update and delete calls that reached the remote.
    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }

    /// Number of query calls that reached the remote.
    pub fn query_count(&self) -> usize {
        self.queries.load(Ordering::SeqCst)
    }

    // =========================================================================
    // Server-Side Edits (another client writing)
    // =========================================================================

    /// Writes a record directly, as another client would. Returns the stored
    /// copy with fresh metadata.
    pub fn server_upsert(&self, table: &str, item: Item) -> Item {
        self.lock().write(table, item, false)
    }

    /// Deletes a record directly, leaving a tombstone. Returns false if the
    /// record did not exist.
    pub fn server_delete(&self, table: &str, id: &str) -> bool {
        let mut state = self.lock();
        let existing = state.table(table).get(id).cloned();
        match existing {
            Some(record) if !record.deleted => {
                state.write(table, record.item, true);
                true
            }
            _ => false,
        }
    }

    /// Live copy of a record.
    pub fn get(&self, table: &str, id: &str) -> Option<Item> {
        self.lock()
            .tables
            .get(table)
            .and_then(|records| records.get(id))
            .filter(|record| !record.deleted)
            .map(|record| record.item.clone())
    }

    /// All live records, in change order.
    pub fn items(&self, table: &str) -> Vec<Item> {
        let state = self.lock();
        let mut records: Vec<&StoredRecord> = state
            .tables
            .get(table)
            .map(|records| records.values().filter(|r| !r.deleted).collect())
            .unwrap_or_default();
        records.sort_by_key(|r| r.change);
        records.into_iter().map(|r| r.item.clone()).collect()
    }

    // =========================================================================
    // Call Gate
    // =========================================================================

    fn check_online(&self) -> RemoteResult<()> {
        if self.is_online() {
            Ok(())
        } else {
            Err(RemoteError::Unavailable("remote unreachable".into()))
        }
    }

    fn admit_write(&self, state: &mut State) -> RemoteResult<()> {
        self.check_online()?;
        self.writes.fetch_add(1, Ordering::SeqCst);

        if let Some((remaining, error)) = state.scripted_failure.take() {
            if remaining == 0 {
                return Err(error);
            }
            state.scripted_failure = Some((remaining - 1, error));
        }
        Ok(())
    }
}

fn stale(candidate: &Item, stored: &StoredRecord) -> bool {
    matches!(&candidate.version, Some(v) if Some(v) != stored.item.version.as_ref())
}

#[async_trait]
impl RemoteClient for MemoryRemote {
    async fn bind(&self) -> RemoteResult<()> {
        self.binds.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn insert(&self, table: &str, item: &Item) -> RemoteResult<Item> {
        let mut state = self.lock();
        self.admit_write(&mut state)?;

        let mut item = item.clone();
        item.ensure_id();

        if let Some(existing) = state.table(table).get(&item.id) {
            let server_item = (!existing.deleted).then(|| existing.item.clone());
            return Err(RemoteError::Conflict { server_item });
        }

        Ok(state.write(table, item, false))
    }

    async fn update(&self, table: &str, item: &Item) -> RemoteResult<Item> {
        let mut state = self.lock();
        self.admit_write(&mut state)?;

        match state.table(table).get(&item.id) {
            None => return Err(RemoteError::Conflict { server_item: None }),
            Some(existing) if existing.deleted => {
                return Err(RemoteError::Conflict { server_item: None })
            }
            Some(existing) if stale(item, existing) => {
                return Err(RemoteError::Conflict {
                    server_item: Some(existing.item.clone()),
                })
            }
            Some(_) => {}
        }

        Ok(state.write(table, item.clone(), false))
    }

    async fn delete(&self, table: &str, item: &Item) -> RemoteResult<()> {
        let mut state = self.lock();
        self.admit_write(&mut state)?;

        let existing = match state.table(table).get(&item.id) {
            None => return Err(RemoteError::Conflict { server_item: None }),
            Some(existing) if existing.deleted => {
                return Err(RemoteError::Conflict { server_item: None })
            }
            Some(existing) if stale(item, existing) => {
                return Err(RemoteError::Conflict {
                    server_item: Some(existing.item.clone()),
                })
            }
            Some(existing) => existing.item.clone(),
        };

        state.write(table, existing, true);
        Ok(())
    }

    async fn query(&self, request: &QueryRequest) -> RemoteResult<RemotePage> {
        self.check_online()?;
        self.queries.fetch_add(1, Ordering::SeqCst);

        let since = match &request.checkpoint {
            Some(token) => token
                .parse::<u64>()
                .map_err(|_| RemoteError::Malformed(format!("unknown checkpoint '{token}'")))?,
            None => 0,
        };

        let state = self.lock();
        let mut changed: Vec<&StoredRecord> = state
            .tables
            .get(&request.table)
            .map(|records| {
                records
                    .values()
                    .filter(|r| r.change > since)
                    .filter(|r| r.deleted || request.filter.matches(&r.item))
                    .collect()
            })
            .unwrap_or_default();
        changed.sort_by_key(|r| r.change);

        let page: Vec<&StoredRecord> = changed
            .into_iter()
            .skip(request.skip as usize)
            .take(request.top as usize)
            .collect();

        let checkpoint = page.last().map(|r| r.change.to_string());
        let records = page
            .into_iter()
            .map(|r| RemoteRecord {
                item: r.item.clone(),
                deleted: r.deleted,
            })
            .collect();

        Ok(RemotePage {
            records,
            checkpoint,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use driftwood_core::ItemFilter;

    /// Unsaved item; the remote assigns its id.
    fn sample_item(text: &str) -> Item {
        Item::new(text, "")
    }

    fn all(checkpoint: Option<String>) -> QueryRequest {
        QueryRequest {
            table: "item".into(),
            query_name: "allItem".into(),
            filter: ItemFilter::all(),
            checkpoint,
            skip: 0,
            top: 50,
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_metadata() {
        let remote = MemoryRemote::new();
        let stored = remote
            .insert("item", &Item::new("milk", "").with_id("m"))
            .await
            .unwrap();

        assert!(stored.version.is_some());
        assert!(stored.updated_at.is_some());
        assert_eq!(remote.get("item", "m"), Some(stored));
    }

    #[tokio::test]
    async fn test_stale_update_conflicts_with_server_copy() {
        let remote = MemoryRemote::new();
        let v1 = remote.server_upsert("item", Item::new("a", "").with_id("x"));
        let v2 = remote.server_upsert("item", Item::new("b", "").with_id("x"));

        let err = remote.update("item", &v1).await.unwrap_err();
        match err {
            RemoteError::Conflict { server_item } => assert_eq!(server_item, Some(v2.clone())),
            other => panic!("expected conflict, got {other:?}"),
        }

        let accepted = remote.update("item", &v2).await.unwrap();
        assert_ne!(accepted.version, v2.version);
    }

    #[tokio::test]
    async fn test_delete_of_deleted_record_conflicts_without_copy() {
        let remote = MemoryRemote::new();
        let item = remote.server_upsert("item", Item::new("a", "").with_id("y"));
        assert!(remote.server_delete("item", "y"));

        let err = remote.delete("item", &item).await.unwrap_err();
        assert!(matches!(err, RemoteError::Conflict { server_item: None }));
    }

    #[tokio::test]
    async fn test_offline_calls_are_transient() {
        let remote = MemoryRemote::new();
        remote.set_online(false);

        let err = remote.insert("item", &sample_item("x")).await.unwrap_err();
        assert!(err.is_transient());
        assert!(remote.query(&all(None)).await.unwrap_err().is_transient());
        assert_eq!(remote.write_count(), 0);
    }

    #[tokio::test]
    async fn test_scripted_failure_fires_once() {
        let remote = MemoryRemote::new();
        remote.fail_write_after(1, RemoteError::Unavailable("flaky".into()));

        remote.insert("item", &sample_item("a")).await.unwrap();
        assert!(remote.insert("item", &sample_item("b")).await.is_err());
        remote.insert("item", &sample_item("c")).await.unwrap();
    }

    #[tokio::test]
    async fn test_query_is_incremental_and_includes_tombstones() {
        let remote = MemoryRemote::new();
        remote.server_upsert("item", Item::new("a", "").with_id("a"));
        remote.server_upsert("item", Item::new("b", "").with_id("b"));

        let first = remote.query(&all(None)).await.unwrap();
        assert_eq!(first.records.len(), 2);

        let empty = remote.query(&all(first.checkpoint.clone())).await.unwrap();
        assert!(empty.records.is_empty());
        assert!(empty.checkpoint.is_none());

        remote.server_delete("item", "a");
        let delta = remote.query(&all(first.checkpoint)).await.unwrap();
        assert_eq!(delta.records.len(), 1);
        assert!(delta.records[0].deleted);
    }

    #[tokio::test]
    async fn test_query_pages() {
        let remote = MemoryRemote::new();
        for i in 0..5 {
            remote.server_upsert("item", Item::new(format!("{i}"), "").with_id(format!("{i}")));
        }

        let mut request = all(None);
        request.top = 2;
        request.skip = 4;
        let last = remote.query(&request).await.unwrap();
        assert_eq!(last.records.len(), 1);
        assert_eq!(last.records[0].item.id, "4");
        assert_eq!(last.checkpoint.as_deref(), Some("5"));
    }
}
