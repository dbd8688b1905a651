//! In-memory fakes for the source and destination boundaries.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::Path;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use tokio::sync::Notify;

use crate::destination::{DeleteOutcome, DestinationStore, StoreError, StoreProvider};
use crate::source::{Batch, ByteStream, ContentHandle, ItemId, ItemSource, MediaItem, SourceError};
use crate::types::Direction;

pub fn item(id: ItemId, filename: &str, size: u64) -> MediaItem {
    MediaItem {
        id,
        filename: filename.to_string(),
        size,
        content: ContentHandle(format!("mem://{}", id)),
    }
}

/// Deterministic content for an item: `size` bytes cycling through 0..=250.
fn body(size: u64) -> Vec<u8> {
    (0..size).map(|i| (i % 251) as u8).collect()
}

/// Lets a test hold a download open until it says so.
#[derive(Clone, Default)]
pub struct Gate {
    pub entered: Arc<Notify>,
    pub release: Arc<Notify>,
}

#[derive(Default)]
pub struct FakeSource {
    items: Vec<MediaItem>,
    download_failures: Mutex<HashMap<ItemId, VecDeque<SourceError>>>,
    short_bodies: Mutex<HashMap<ItemId, u64>>,
    list_failures: Mutex<HashMap<usize, SourceError>>,
    list_calls: Mutex<usize>,
    downloads: Mutex<Vec<ItemId>>,
    gates: HashMap<ItemId, Gate>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_item(mut self, item: MediaItem) -> Self {
        self.items.push(item);
        self.items.sort_by_key(|i| i.id);
        self
    }

    /// Queue an error for the next download of `id`.
    pub fn fail_download(self, id: ItemId, err: SourceError) -> Self {
        self.download_failures
            .lock()
            .unwrap()
            .entry(id)
            .or_default()
            .push_back(err);
        self
    }

    /// Next download of `id` ends after `len` bytes.
    pub fn short_body_once(self, id: ItemId, len: u64) -> Self {
        self.short_bodies.lock().unwrap().insert(id, len);
        self
    }

    /// Fail the listing call with this 0-based index.
    pub fn fail_listing(self, call: usize, err: SourceError) -> Self {
        self.list_failures.lock().unwrap().insert(call, err);
        self
    }

    pub fn gated(mut self, id: ItemId, gate: Gate) -> Self {
        self.gates.insert(id, gate);
        self
    }

    pub fn downloads(&self) -> Vec<ItemId> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ItemSource for FakeSource {
    async fn next_batch(
        &self,
        _channel: &str,
        after: Option<ItemId>,
        direction: Direction,
        limit: usize,
    ) -> Result<Batch, SourceError> {
        let call = {
            let mut calls = self.list_calls.lock().unwrap();
            *calls += 1;
            *calls - 1
        };
        if let Some(err) = self.list_failures.lock().unwrap().remove(&call) {
            return Err(err);
        }
        let mut ordered: Vec<MediaItem> = self.items.clone();
        if direction == Direction::NewestFirst {
            ordered.reverse();
        }
        let start = match after {
            Some(key) => ordered
                .iter()
                .position(|i| i.id == key)
                .map_or(ordered.len(), |p| p + 1),
            None => 0,
        };
        let rest = &ordered[start..];
        let items: Vec<MediaItem> = rest.iter().take(limit).cloned().collect();
        Ok(Batch {
            has_more: rest.len() > items.len(),
            items,
        })
    }

    async fn download(&self, item: &MediaItem) -> Result<ByteStream, SourceError> {
        self.downloads.lock().unwrap().push(item.id);
        let failure = self
            .download_failures
            .lock()
            .unwrap()
            .get_mut(&item.id)
            .and_then(|q| q.pop_front());
        if let Some(err) = failure {
            return Err(err);
        }
        if let Some(gate) = self.gates.get(&item.id) {
            gate.entered.notify_one();
            gate.release.notified().await;
        }

        let mut content = body(item.size);
        if let Some(len) = self.short_bodies.lock().unwrap().remove(&item.id) {
            content.truncate(len as usize);
        }
        let mid = content.len() / 2;
        let second = content.split_off(mid);
        let chunks = vec![Ok(Bytes::from(content)), Ok(Bytes::from(second))];
        Ok(stream::iter(chunks).boxed())
    }
}

#[derive(Default)]
pub struct MemoryStore {
    objects: Mutex<BTreeMap<String, Vec<u8>>>,
    truncate: HashMap<String, usize>,
    write_failures: Mutex<HashMap<String, VecDeque<StoreError>>>,
    exists_failures: Mutex<HashMap<String, VecDeque<StoreError>>>,
    deleted: Mutex<Vec<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Pre-populate an object, as if mirrored by an earlier run.
    pub fn with_object(self, name: &str, size: u64) -> Self {
        self.objects
            .lock()
            .unwrap()
            .insert(name.to_string(), body(size));
        self
    }

    /// Writes of `name` commit only the first `len` bytes.
    pub fn truncating(mut self, name: &str, len: usize) -> Self {
        self.truncate.insert(name.to_string(), len);
        self
    }

    pub fn fail_write(self, name: &str, err: StoreError) -> Self {
        self.write_failures
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(err);
        self
    }

    pub fn fail_exists(self, name: &str, err: StoreError) -> Self {
        self.exists_failures
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default()
            .push_back(err);
        self
    }

    pub fn size_of(&self, name: &str) -> Option<u64> {
        self.objects
            .lock()
            .unwrap()
            .get(name)
            .map(|b| b.len() as u64)
    }

    pub fn names(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn deleted(&self) -> Vec<String> {
        self.deleted.lock().unwrap().clone()
    }

    fn pop_failure(
        map: &Mutex<HashMap<String, VecDeque<StoreError>>>,
        name: &str,
    ) -> Option<StoreError> {
        map.lock()
            .unwrap()
            .get_mut(name)
            .and_then(|q| q.pop_front())
    }
}

#[async_trait::async_trait]
impl DestinationStore for MemoryStore {
    async fn exists(&self, name: &str) -> Result<bool, StoreError> {
        if let Some(err) = Self::pop_failure(&self.exists_failures, name) {
            return Err(err);
        }
        Ok(self.objects.lock().unwrap().contains_key(name))
    }

    async fn write(&self, name: &str, staged: &Path) -> Result<u64, StoreError> {
        if let Some(err) = Self::pop_failure(&self.write_failures, name) {
            return Err(err);
        }
        let mut bytes = tokio::fs::read(staged).await?;
        if let Some(&len) = self.truncate.get(name) {
            bytes.truncate(len);
        }
        let size = bytes.len() as u64;
        self.objects.lock().unwrap().insert(name.to_string(), bytes);
        Ok(size)
    }

    async fn delete(&self, name: &str) -> Result<DeleteOutcome, StoreError> {
        self.deleted.lock().unwrap().push(name.to_string());
        match self.objects.lock().unwrap().remove(name) {
            Some(_) => Ok(DeleteOutcome::Deleted),
            None => Ok(DeleteOutcome::NotFound),
        }
    }

    async fn list_names(&self) -> Result<Vec<String>, StoreError> {
        Ok(self.names())
    }

    async fn free_space(&self) -> Result<Option<u64>, StoreError> {
        Ok(None)
    }

    fn describe(&self) -> String {
        "memory".to_string()
    }
}

/// Hands out the same [`MemoryStore`] for every target folder.
pub struct MemoryProvider(pub Arc<MemoryStore>);

impl StoreProvider for MemoryProvider {
    fn open(&self, _target_folder: &str) -> Result<Arc<dyn DestinationStore>, StoreError> {
        Ok(self.0.clone())
    }
}
