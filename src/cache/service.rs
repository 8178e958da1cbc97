//! Lifecycle coordination for the two cache tiers.
//!
//! Disk work is serialized through a single worker task fed by a message
//! channel, so init, clear, flush, and close always apply in submission
//! order no matter which task requested them. The blocking store itself
//! runs on the blocking thread pool. Memory tier operations are cheap and
//! handled inline.
//!
//! Disk failures never surface to callers of the read/write path: a tier
//! that fails to open or hits an IO error degrades to absent values and a
//! warning in the log, and image loading continues through the network.

use crate::cache::disk::DiskStore;
use crate::cache::memory::MemoryStore;
use crate::cache::stats::CacheStats;
use crate::cache::types::{CacheConfig, CacheError};
use crate::key::ContentKey;
use std::fs;
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot};
use tokio::task;
use tracing::{debug, info, warn};

/// Where the cache system is in its life.
///
/// `Uninitialized -> Initializing -> Ready`, with `Clearing` as a
/// transient detour back to `Ready`. `Closed` is teardown; a later
/// init brings the system back up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LifecycleState {
    Uninitialized,
    Initializing,
    Ready,
    Clearing,
    Closed,
}

/// Disk state shared between the service handle and the worker task.
struct DiskShared {
    store: Mutex<Option<DiskStore>>,
    directory: std::path::PathBuf,
    capacity_bytes: u64,
}

enum LifecycleOp {
    Init { done: oneshot::Sender<()> },
    Clear { done: oneshot::Sender<()> },
    Flush { done: oneshot::Sender<()> },
    Close { done: oneshot::Sender<()> },
}

/// Handle to the two-tier cache system.
///
/// Cheap to clone via `Arc`; all clones share the same tiers and worker.
pub struct CacheService {
    config: CacheConfig,
    memory: Mutex<Option<Arc<MemoryStore>>>,
    disk: Arc<DiskShared>,
    state: Arc<Mutex<LifecycleState>>,
    ops: mpsc::UnboundedSender<LifecycleOp>,
}

impl CacheService {
    /// Create the service and spawn its lifecycle worker.
    ///
    /// Must run inside a Tokio runtime. The tiers stay empty until
    /// [`init_cache`](Self::init_cache).
    pub fn new(config: CacheConfig) -> Self {
        let disk = Arc::new(DiskShared {
            store: Mutex::new(None),
            directory: config.disk.directory.clone(),
            capacity_bytes: config.disk.max_size_bytes,
        });
        let state = Arc::new(Mutex::new(LifecycleState::Uninitialized));
        let (ops, rx) = mpsc::unbounded_channel();

        tokio::spawn(run_worker(rx, Arc::clone(&disk), Arc::clone(&state)));

        Self {
            config,
            memory: Mutex::new(None),
            disk,
            state,
            ops,
        }
    }

    pub fn state(&self) -> LifecycleState {
        *self.state.lock().unwrap()
    }

    /// Bring both tiers up. The memory tier is created inline; the disk
    /// store opens on the worker. Returns once the disk attempt finished;
    /// a disk open failure still leaves the system `Ready` with the disk
    /// tier disabled.
    pub async fn init_cache(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if !matches!(
                *state,
                LifecycleState::Uninitialized | LifecycleState::Closed
            ) {
                warn!(state = ?*state, "init_cache ignored in current state");
                return;
            }
            *state = LifecycleState::Initializing;
        }

        *self.memory.lock().unwrap() =
            Some(Arc::new(MemoryStore::new(self.config.memory.max_size_units)));

        self.submit(|done| LifecycleOp::Init { done }).await;
        info!(state = ?self.state(), "cache system initialized");
    }

    /// Empty both tiers, keeping them usable. The disk store is closed,
    /// its directory deleted, and a fresh store opened in its place.
    pub async fn clear_cache(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state != LifecycleState::Ready {
                warn!(state = ?*state, "clear_cache ignored in current state");
                return;
            }
            *state = LifecycleState::Clearing;
        }

        if let Some(memory) = self.memory_store() {
            memory.clear();
        }

        self.submit(|done| LifecycleOp::Clear { done }).await;
        debug!("cache cleared");
    }

    /// Force the disk journal to stable storage.
    pub async fn flush_cache(&self) {
        if self.state() != LifecycleState::Ready {
            return;
        }
        self.submit(|done| LifecycleOp::Flush { done }).await;
    }

    /// Shut the system down. The memory tier is dropped, the disk store
    /// flushed and closed. Only a fresh init brings the tiers back.
    pub async fn close_cache(&self) {
        {
            let mut state = self.state.lock().unwrap();
            if *state == LifecycleState::Closed {
                return;
            }
            *state = LifecycleState::Closed;
        }

        self.memory.lock().unwrap().take();
        self.submit(|done| LifecycleOp::Close { done }).await;
        info!("cache system closed");
    }

    /// Look up a decoded image in the memory tier.
    pub fn memory_get(&self, key: &ContentKey) -> Option<Arc<crate::decode::DecodedImage>> {
        self.memory_store()?.get(key)
    }

    /// Store a decoded image in the memory tier.
    pub fn memory_put(&self, key: ContentKey, image: Arc<crate::decode::DecodedImage>) {
        if let Some(memory) = self.memory_store() {
            memory.put(key, image);
        }
    }

    /// The memory tier, when initialized.
    pub fn memory_store(&self) -> Option<Arc<MemoryStore>> {
        self.memory.lock().unwrap().as_ref().map(Arc::clone)
    }

    /// Read encoded bytes for a source key from the disk tier.
    ///
    /// Absent key, disabled tier, and IO failure all come back as `None`.
    pub async fn disk_read(&self, key: &ContentKey) -> Option<Vec<u8>> {
        let disk = Arc::clone(&self.disk);
        let key = key.clone();
        let result = task::spawn_blocking(move || {
            let mut guard = disk.store.lock().unwrap();
            let store = guard.as_mut()?;
            match store.get(&key) {
                Ok(snapshot) => snapshot.map(|s| s.into_bytes()),
                Err(e) => {
                    warn!(key = %key, error = %e, "disk cache read failed");
                    None
                }
            }
        })
        .await;

        match result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(error = %e, "disk cache read task failed");
                None
            }
        }
    }

    /// Write encoded bytes for a source key to the disk tier.
    ///
    /// Skips keys already present. Failures are logged and swallowed.
    pub async fn disk_write(&self, key: &ContentKey, bytes: Vec<u8>) {
        let disk = Arc::clone(&self.disk);
        let key = key.clone();
        let result = task::spawn_blocking(move || {
            let mut guard = disk.store.lock().unwrap();
            let Some(store) = guard.as_mut() else {
                return;
            };
            if store.contains(&key) {
                return;
            }
            if let Err(e) = write_entry(store, &key, &bytes) {
                warn!(key = %key, error = %e, "disk cache write failed");
            }
        })
        .await;

        if let Err(e) = result {
            warn!(error = %e, "disk cache write task failed");
        }
    }

    /// Whether the disk tier currently holds a committed value for a key.
    pub async fn disk_contains(&self, key: &ContentKey) -> bool {
        let disk = Arc::clone(&self.disk);
        let key = key.clone();
        task::spawn_blocking(move || {
            disk.store
                .lock()
                .unwrap()
                .as_ref()
                .is_some_and(|store| store.contains(&key))
        })
        .await
        .unwrap_or(false)
    }

    pub fn memory_stats(&self) -> CacheStats {
        self.memory_store()
            .map(|memory| memory.stats())
            .unwrap_or_default()
    }

    pub fn disk_stats(&self) -> CacheStats {
        self.disk
            .store
            .lock()
            .unwrap()
            .as_ref()
            .map(|store| store.stats())
            .unwrap_or_default()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Queue a lifecycle op and wait for the worker to finish it.
    async fn submit(&self, make: impl FnOnce(oneshot::Sender<()>) -> LifecycleOp) {
        let (done, ack) = oneshot::channel();
        if self.ops.send(make(done)).is_err() {
            warn!("cache lifecycle worker is gone");
            return;
        }
        let _ = ack.await;
    }
}

/// Write a single value through the editor protocol.
fn write_entry(store: &mut DiskStore, key: &ContentKey, bytes: &[u8]) -> Result<(), CacheError> {
    let Some(mut editor) = store.edit(key)? else {
        // Another writer holds the key; let theirs win.
        return Ok(());
    };
    if let Err(e) = editor.write_all(bytes) {
        store.abort(editor)?;
        return Err(e.into());
    }
    store.commit(editor)
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<LifecycleOp>,
    disk: Arc<DiskShared>,
    state: Arc<Mutex<LifecycleState>>,
) {
    while let Some(op) = rx.recv().await {
        match op {
            LifecycleOp::Init { done } => {
                let disk = Arc::clone(&disk);
                let join = task::spawn_blocking(move || open_store(&disk)).await;
                if let Err(e) = join {
                    warn!(error = %e, "disk cache init task failed");
                }
                *state.lock().unwrap() = LifecycleState::Ready;
                let _ = done.send(());
            }
            LifecycleOp::Clear { done } => {
                let disk = Arc::clone(&disk);
                let join = task::spawn_blocking(move || {
                    close_and_wipe(&disk);
                    open_store(&disk);
                })
                .await;
                if let Err(e) = join {
                    warn!(error = %e, "disk cache clear task failed");
                }
                *state.lock().unwrap() = LifecycleState::Ready;
                let _ = done.send(());
            }
            LifecycleOp::Flush { done } => {
                let disk = Arc::clone(&disk);
                let join = task::spawn_blocking(move || {
                    if let Some(store) = disk.store.lock().unwrap().as_mut() {
                        if let Err(e) = store.flush() {
                            warn!(error = %e, "disk cache flush failed");
                        }
                    }
                })
                .await;
                if let Err(e) = join {
                    warn!(error = %e, "disk cache flush task failed");
                }
                let _ = done.send(());
            }
            LifecycleOp::Close { done } => {
                let disk = Arc::clone(&disk);
                let join = task::spawn_blocking(move || {
                    if let Some(mut store) = disk.store.lock().unwrap().take() {
                        if let Err(e) = store.close() {
                            warn!(error = %e, "disk cache close failed");
                        }
                    }
                })
                .await;
                if let Err(e) = join {
                    warn!(error = %e, "disk cache close task failed");
                }
                let _ = done.send(());
            }
        }
    }
}

fn open_store(disk: &DiskShared) {
    match DiskStore::open(&disk.directory, disk.capacity_bytes) {
        Ok(store) => {
            *disk.store.lock().unwrap() = Some(store);
        }
        Err(e) => {
            warn!(
                directory = %disk.directory.display(),
                error = %e,
                "disk cache unavailable, continuing without it"
            );
            *disk.store.lock().unwrap() = None;
        }
    }
}

fn close_and_wipe(disk: &DiskShared) {
    if let Some(mut store) = disk.store.lock().unwrap().take() {
        if let Err(e) = store.close() {
            warn!(error = %e, "disk cache close during clear failed");
        }
    }
    if let Err(e) = fs::remove_dir_all(&disk.directory) {
        if e.kind() != std::io::ErrorKind::NotFound {
            warn!(error = %e, "disk cache wipe failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decode::DecodedImage;
    use image::RgbaImage;
    use tempfile::TempDir;

    fn test_config(temp: &TempDir) -> CacheConfig {
        CacheConfig::new()
            .with_memory_size(1_000_000)
            .with_disk_size(10_000_000)
            .with_cache_dir(temp.path().join("cache"))
    }

    fn test_key(n: u32) -> ContentKey {
        ContentKey::source(&format!("https://example.com/{}.jpg", n))
    }

    fn test_image() -> Arc<DecodedImage> {
        Arc::new(DecodedImage::new(RgbaImage::new(4, 4)))
    }

    #[tokio::test]
    async fn test_starts_uninitialized() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));
        assert_eq!(service.state(), LifecycleState::Uninitialized);
        assert!(service.memory_store().is_none());
        assert!(service.disk_read(&test_key(1)).await.is_none());
    }

    #[tokio::test]
    async fn test_init_reaches_ready() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));

        service.init_cache().await;

        assert_eq!(service.state(), LifecycleState::Ready);
        assert!(service.memory_store().is_some());
    }

    #[tokio::test]
    async fn test_init_twice_is_ignored() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));

        service.init_cache().await;
        service.init_cache().await;

        assert_eq!(service.state(), LifecycleState::Ready);
    }

    #[tokio::test]
    async fn test_disk_round_trip() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));
        service.init_cache().await;

        let key = test_key(1);
        service.disk_write(&key, b"encoded".to_vec()).await;

        assert!(service.disk_contains(&key).await);
        assert_eq!(service.disk_read(&key).await.unwrap(), b"encoded");
    }

    #[tokio::test]
    async fn test_disk_write_skips_existing() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));
        service.init_cache().await;

        let key = test_key(1);
        service.disk_write(&key, b"first".to_vec()).await;
        service.disk_write(&key, b"second".to_vec()).await;

        assert_eq!(service.disk_read(&key).await.unwrap(), b"first");
    }

    #[tokio::test]
    async fn test_memory_round_trip() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));
        service.init_cache().await;

        let key = ContentKey::derive("https://example.com/a.jpg", 8, 8);
        service.memory_put(key.clone(), test_image());
        assert!(service.memory_get(&key).is_some());
    }

    #[tokio::test]
    async fn test_clear_empties_both_tiers() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));
        service.init_cache().await;

        let sized = ContentKey::derive("https://example.com/a.jpg", 8, 8);
        service.memory_put(sized.clone(), test_image());
        let source = test_key(1);
        service.disk_write(&source, b"encoded".to_vec()).await;

        service.clear_cache().await;

        assert_eq!(service.state(), LifecycleState::Ready);
        assert!(service.memory_get(&sized).is_none());
        assert!(service.disk_read(&source).await.is_none());

        // Both tiers stay usable after a clear.
        service.disk_write(&source, b"again".to_vec()).await;
        assert_eq!(service.disk_read(&source).await.unwrap(), b"again");
    }

    #[tokio::test]
    async fn test_close_disables_both_tiers() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));
        service.init_cache().await;

        let key = test_key(1);
        service.disk_write(&key, b"encoded".to_vec()).await;

        service.close_cache().await;

        assert_eq!(service.state(), LifecycleState::Closed);
        assert!(service.memory_store().is_none());
        assert!(service.disk_read(&key).await.is_none());

        // Later lifecycle calls are no-ops.
        service.close_cache().await;
        service.clear_cache().await;
        assert_eq!(service.state(), LifecycleState::Closed);
    }

    #[tokio::test]
    async fn test_reinit_after_close() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));
        service.init_cache().await;

        let key = test_key(1);
        service.disk_write(&key, b"encoded".to_vec()).await;
        service.close_cache().await;

        service.init_cache().await;
        assert_eq!(service.state(), LifecycleState::Ready);
        assert!(service.memory_store().is_some());
        assert_eq!(service.disk_read(&key).await.unwrap(), b"encoded");
    }

    #[tokio::test]
    async fn test_disk_survives_close_and_new_service() {
        let temp = TempDir::new().unwrap();
        let key = test_key(1);

        {
            let service = CacheService::new(test_config(&temp));
            service.init_cache().await;
            service.disk_write(&key, b"durable".to_vec()).await;
            service.close_cache().await;
        }

        let service = CacheService::new(test_config(&temp));
        service.init_cache().await;
        assert_eq!(service.disk_read(&key).await.unwrap(), b"durable");
    }

    #[tokio::test]
    async fn test_unopenable_disk_degrades_to_ready() {
        let temp = TempDir::new().unwrap();
        // A file where the cache directory should be makes open fail.
        let blocked = temp.path().join("blocked");
        std::fs::write(&blocked, b"not a directory").unwrap();

        let config = CacheConfig::new()
            .with_memory_size(1_000_000)
            .with_cache_dir(blocked);
        let service = CacheService::new(config);
        service.init_cache().await;

        assert_eq!(service.state(), LifecycleState::Ready);
        let key = test_key(1);
        service.disk_write(&key, b"encoded".to_vec()).await;
        assert!(service.disk_read(&key).await.is_none());

        // Memory tier is unaffected.
        let sized = ContentKey::derive("https://example.com/a.jpg", 8, 8);
        service.memory_put(sized.clone(), test_image());
        assert!(service.memory_get(&sized).is_some());
    }

    #[tokio::test]
    async fn test_stats_exposed_per_tier() {
        let temp = TempDir::new().unwrap();
        let service = CacheService::new(test_config(&temp));
        service.init_cache().await;

        let key = test_key(1);
        service.disk_write(&key, b"encoded".to_vec()).await;
        service.disk_read(&key).await;
        service.disk_read(&test_key(2)).await;

        let disk = service.disk_stats();
        assert_eq!(disk.hits, 1);
        assert_eq!(disk.misses, 1);

        let sized = ContentKey::derive("https://example.com/a.jpg", 8, 8);
        service.memory_put(sized.clone(), test_image());
        service.memory_get(&sized);
        assert_eq!(service.memory_stats().hits, 1);
    }
}
