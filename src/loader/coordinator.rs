//! The load pipeline: memory, disk, network, decode, publish.

use crate::cache::CacheService;
use crate::decode::{DecodeError, DecodedImage, ImageDecoder};
use crate::key::{ContentKey, KeyMode};
use crate::loader::target::DisplaySlot;
use crate::loader::task::FetchTask;
use crate::net::ImageFetcher;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task;
use tracing::{debug, warn};

/// Errors surfaced directly to the caller of [`ImageLoader::load`].
///
/// Everything past request validation (network, decode, cache IO) is
/// handled inside the pipeline; those failures leave the slot on its
/// placeholder instead of surfacing here.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("invalid load request: {0}")]
    InvalidArgument(String),
}

/// Loader tuning knobs.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// Permits for concurrently running fetch pipelines. Default: 8.
    pub max_concurrent_fetches: usize,
    /// Hash mode for key derivation. Default: SHA-256.
    pub key_mode: KeyMode,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            max_concurrent_fetches: 8,
            key_mode: KeyMode::default(),
        }
    }
}

impl LoaderConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_concurrent_fetches(mut self, permits: usize) -> Self {
        self.max_concurrent_fetches = permits;
        self
    }

    pub fn with_key_mode(mut self, mode: KeyMode) -> Self {
        self.key_mode = mode;
        self
    }
}

/// Front end for loading images into display slots.
///
/// A memory tier hit completes synchronously inside [`load`](Self::load).
/// Anything else spawns a pipeline task that checks the disk tier, fetches
/// over the network, decodes to the requested size, populates both tiers,
/// and publishes to the slot if it still wants the result. Concurrent
/// pipelines are bounded by a semaphore.
pub struct ImageLoader<F: ImageFetcher, D: ImageDecoder> {
    cache: Arc<CacheService>,
    fetcher: Arc<F>,
    decoder: Arc<D>,
    permits: Arc<Semaphore>,
    key_mode: KeyMode,
}

impl<F: ImageFetcher, D: ImageDecoder> ImageLoader<F, D> {
    pub fn new(cache: Arc<CacheService>, fetcher: F, decoder: D, config: LoaderConfig) -> Self {
        Self {
            cache,
            fetcher: Arc::new(fetcher),
            decoder: Arc::new(decoder),
            permits: Arc::new(Semaphore::new(config.max_concurrent_fetches.max(1))),
            key_mode: config.key_mode,
        }
    }

    /// Load `locator` at the given target size into `slot`.
    ///
    /// Returns after validation; the pipeline itself runs in the
    /// background. Binding rules when the slot already has work in
    /// flight: identical work is left running (the request is a no-op),
    /// different work is cancelled and replaced.
    pub fn load(
        &self,
        locator: &str,
        width: u32,
        height: u32,
        slot: &DisplaySlot,
    ) -> Result<(), LoadError> {
        if locator.trim().is_empty() {
            return Err(LoadError::InvalidArgument("empty locator".to_string()));
        }
        if width == 0 || height == 0 {
            return Err(LoadError::InvalidArgument(format!(
                "zero target dimension {}x{}",
                width, height
            )));
        }

        let key = ContentKey::derive_with(self.key_mode, locator, width, height);

        if let Some(image) = self.cache.memory_get(&key) {
            if let Some(stale) = slot.pending_task() {
                stale.cancel();
            }
            slot.show(image);
            return Ok(());
        }

        if let Some(pending) = slot.pending_task() {
            if pending.key() == &key && !pending.is_cancelled() {
                debug!(key = %key, "identical load already in flight");
                return Ok(());
            }
            pending.cancel();
        }

        let fetch_task = Arc::new(FetchTask::new(key, locator, width, height));
        slot.bind(&fetch_task);

        tokio::spawn(run_pipeline(
            Arc::clone(&self.cache),
            Arc::clone(&self.fetcher),
            Arc::clone(&self.decoder),
            Arc::clone(&self.permits),
            self.key_mode,
            fetch_task,
            slot.clone(),
        ));
        Ok(())
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }
}

/// The background half of a load: disk tier, then network, then decode.
///
/// Cancellation and slot staleness are rechecked at every suspension
/// point; a task whose slot moved on stops without touching the caches.
/// A cancellation that lands after the fetch finished discards the
/// response without caching it.
async fn run_pipeline<F: ImageFetcher, D: ImageDecoder>(
    cache: Arc<CacheService>,
    fetcher: Arc<F>,
    decoder: Arc<D>,
    permits: Arc<Semaphore>,
    key_mode: KeyMode,
    fetch_task: Arc<FetchTask>,
    slot: DisplaySlot,
) {
    let _permit = tokio::select! {
        _ = fetch_task.cancelled() => return,
        permit = Arc::clone(&permits).acquire_owned() => match permit {
            Ok(permit) => permit,
            Err(_) => return,
        },
    };
    if fetch_task.is_cancelled() || !slot.is_current(&fetch_task) {
        return;
    }

    let source_key = ContentKey::source_with(key_mode, fetch_task.locator());

    // Disk tier holds the original encoded bytes; any target size can be
    // produced from them without touching the network.
    if let Some(bytes) = cache.disk_read(&source_key).await {
        if fetch_task.is_cancelled() || !slot.is_current(&fetch_task) {
            return;
        }
        match decode_off_thread(Arc::clone(&decoder), bytes, &fetch_task).await {
            Ok(image) => {
                publish(&cache, &fetch_task, &slot, image);
                return;
            }
            Err(e) => {
                warn!(
                    locator = fetch_task.locator(),
                    error = %e,
                    "cached bytes failed to decode, refetching"
                );
            }
        }
    }

    if fetch_task.is_cancelled() || !slot.is_current(&fetch_task) {
        return;
    }

    let bytes = tokio::select! {
        _ = fetch_task.cancelled() => return,
        result = fetcher.fetch(fetch_task.locator()) => match result {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(
                    locator = fetch_task.locator(),
                    error = %e,
                    "image fetch failed"
                );
                return;
            }
        },
    };

    if fetch_task.is_cancelled() || !slot.is_current(&fetch_task) {
        return;
    }

    let encoded = bytes.to_vec();
    let image = match decode_off_thread(Arc::clone(&decoder), encoded.clone(), &fetch_task).await {
        Ok(image) => image,
        Err(e) => {
            warn!(
                locator = fetch_task.locator(),
                error = %e,
                "fetched bytes failed to decode"
            );
            return;
        }
    };

    cache.disk_write(&source_key, encoded).await;
    publish(&cache, &fetch_task, &slot, image);
}

/// Run the CPU-bound decode on the blocking pool.
async fn decode_off_thread<D: ImageDecoder>(
    decoder: Arc<D>,
    bytes: Vec<u8>,
    fetch_task: &Arc<FetchTask>,
) -> Result<DecodedImage, DecodeError> {
    let width = fetch_task.width();
    let height = fetch_task.height();
    match task::spawn_blocking(move || decoder.decode_at_size(&bytes, width, height)).await {
        Ok(result) => result,
        Err(e) => Err(DecodeError::Malformed(format!("decode task failed: {}", e))),
    }
}

/// Cache the decoded image and hand it to the slot if it still wants it.
fn publish(
    cache: &CacheService,
    fetch_task: &Arc<FetchTask>,
    slot: &DisplaySlot,
    image: DecodedImage,
) {
    let image = Arc::new(image);
    cache.memory_put(fetch_task.key().clone(), Arc::clone(&image));
    if !slot.complete(fetch_task, image) {
        debug!(key = %fetch_task.key(), "slot rebound before completion");
    }
}
