//! In-memory group repository.
//!
//! Stores groups by id with a secondary index from application id to the ids
//! of the groups in that namespace. A single mutex guards both maps so the
//! index can never drift from the primary map; every public operation is one
//! critical section and never performs I/O while holding the lock.
//!
//! Reads hand out clones. Callers cannot reach into the stored records, so
//! the repository stays the only mutator of `last_updated` and of the index.

use crate::errors::RendezvousError;
use crate::models::Group;
use crate::observability::metrics;
use chrono::Utc;
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;
use uuid::Uuid;

/// Thread-safe in-memory registry of groups.
#[derive(Debug, Default)]
pub struct GroupRepository {
    inner: Mutex<GroupIndex>,
}

#[derive(Debug, Default)]
struct GroupIndex {
    /// group id => group
    groups_by_id: HashMap<String, Group>,
    /// app id => [group id, ...]
    groups_by_app_id: HashMap<String, Vec<String>>,
}

impl GroupIndex {
    fn remove(&mut self, id: &str) -> Option<Group> {
        let group = self.groups_by_id.remove(id)?;

        if let Some(bucket) = self.groups_by_app_id.get_mut(&group.app_id) {
            if let Some(pos) = bucket.iter().position(|gid| gid == id) {
                bucket.swap_remove(pos);
            }
            if bucket.is_empty() {
                self.groups_by_app_id.remove(&group.app_id);
            }
        }

        Some(group)
    }
}

impl GroupRepository {
    /// Create an empty repository.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return a snapshot of every stored group, keyed by id.
    pub fn get_all(&self) -> HashMap<String, Group> {
        self.inner.lock().groups_by_id.clone()
    }

    /// Return a snapshot of the groups registered under `app_id`.
    ///
    /// An unknown application id yields an empty map.
    pub fn get_all_by_app_id(&self, app_id: &str) -> HashMap<String, Group> {
        let index = self.inner.lock();

        let Some(bucket) = index.groups_by_app_id.get(app_id) else {
            return HashMap::new();
        };

        bucket
            .iter()
            .filter_map(|gid| {
                index
                    .groups_by_id
                    .get(gid)
                    .map(|group| (gid.clone(), group.clone()))
            })
            .collect()
    }

    /// Return a snapshot of a single group.
    pub fn get(&self, id: &str) -> Result<Group, RendezvousError> {
        self.inner
            .lock()
            .groups_by_id
            .get(id)
            .cloned()
            .ok_or_else(|| RendezvousError::NotFound(format!("Group {} not found", id)))
    }

    /// Insert or update a group and return its id.
    ///
    /// - An empty id mints a fresh UUID and creates the group.
    /// - A non-empty id that is not stored creates the group under that id
    ///   (peers rejoining a group they already know).
    /// - A stored id replaces `name` and `peers`. The genesis peer list is
    ///   kept and the application id may not change.
    ///
    /// `last_updated` is always set by the repository.
    pub fn set(&self, group: Group) -> Result<String, RendezvousError> {
        self.set_at(group, Utc::now().timestamp())
    }

    pub(crate) fn set_at(&self, mut group: Group, now: i64) -> Result<String, RendezvousError> {
        if group.app_id.is_empty() {
            return Err(RendezvousError::InvalidArgument(
                "Group appID not specified".to_string(),
            ));
        }

        let mut index = self.inner.lock();

        if group.id.is_empty() {
            // Minting under the lock keeps ids unique across concurrent creates.
            let mut id = Uuid::new_v4().to_string();
            while index.groups_by_id.contains_key(&id) {
                id = Uuid::new_v4().to_string();
            }
            group.id = id;
        }

        if let Some(existing) = index.groups_by_id.get_mut(&group.id) {
            if existing.app_id != group.app_id {
                return Err(RendezvousError::InvalidArgument(format!(
                    "Group {} belongs to appID {}, appID cannot be changed",
                    existing.id, existing.app_id
                )));
            }

            existing.name = group.name;
            existing.peers = group.peers;
            existing.last_updated = existing.last_updated.max(now);

            debug!(
                target: "rendezvous.repository",
                group_id = %existing.id,
                app_id = %existing.app_id,
                peers = existing.peers.len(),
                "Updated group"
            );

            return Ok(existing.id.clone());
        }

        group.last_updated = now;

        let id = group.id.clone();
        index
            .groups_by_app_id
            .entry(group.app_id.clone())
            .or_default()
            .push(id.clone());

        debug!(
            target: "rendezvous.repository",
            group_id = %id,
            app_id = %group.app_id,
            peers = group.peers.len(),
            "Created group"
        );

        index.groups_by_id.insert(id.clone(), group);

        metrics::record_group_created();
        metrics::set_group_count(index.groups_by_id.len());

        Ok(id)
    }

    /// Remove a group. Deleting an unknown id is not an error.
    pub fn delete(&self, id: &str) {
        let mut index = self.inner.lock();

        if let Some(group) = index.remove(id) {
            debug!(
                target: "rendezvous.repository",
                group_id = %id,
                app_id = %group.app_id,
                "Deleted group"
            );
            metrics::record_group_deleted();
            metrics::set_group_count(index.groups_by_id.len());
        }
    }

    /// Remove every group whose `last_updated + ttl_seconds < now` and return
    /// the evicted groups.
    pub fn evict_expired(&self, ttl_seconds: i64, now: i64) -> Vec<Group> {
        let mut index = self.inner.lock();

        let expired: Vec<String> = index
            .groups_by_id
            .values()
            .filter(|group| group.last_updated.saturating_add(ttl_seconds) < now)
            .map(|group| group.id.clone())
            .collect();

        let evicted: Vec<Group> = expired.iter().filter_map(|id| index.remove(id)).collect();

        if !evicted.is_empty() {
            metrics::set_group_count(index.groups_by_id.len());
        }

        evicted
    }

    /// Number of stored groups.
    pub fn len(&self) -> usize {
        self.inner.lock().groups_by_id.len()
    }

    /// Whether the repository holds no groups.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Check that the application index mirrors the primary map exactly.
    #[cfg(test)]
    pub(crate) fn index_is_consistent(&self) -> bool {
        let index = self.inner.lock();

        let indexed: usize = index.groups_by_app_id.values().map(Vec::len).sum();
        if indexed != index.groups_by_id.len() {
            return false;
        }

        index.groups_by_app_id.iter().all(|(app_id, bucket)| {
            !bucket.is_empty()
                && bucket.iter().all(|gid| {
                    index
                        .groups_by_id
                        .get(gid)
                        .is_some_and(|group| &group.app_id == app_id)
                })
        })
    }
}
