//! End-to-end checks of the cache lifecycle through the public API.

use pixfetch::cache::{CacheConfig, CacheService, LifecycleState};
use pixfetch::decode::DecodedImage;
use pixfetch::key::ContentKey;
use std::sync::Arc;
use tempfile::TempDir;

fn config(temp: &TempDir) -> CacheConfig {
    CacheConfig::new()
        .with_memory_size(1_000_000)
        .with_disk_size(1_000_000)
        .with_cache_dir(temp.path().join("cache"))
}

fn image() -> Arc<DecodedImage> {
    Arc::new(DecodedImage::new(image::RgbaImage::new(8, 8)))
}

#[tokio::test]
async fn full_lifecycle() {
    let temp = TempDir::new().unwrap();
    let service = CacheService::new(config(&temp));
    assert_eq!(service.state(), LifecycleState::Uninitialized);

    service.init_cache().await;
    assert_eq!(service.state(), LifecycleState::Ready);

    let sized = ContentKey::derive("https://example.com/a.jpg", 8, 8);
    let source = ContentKey::source("https://example.com/a.jpg");

    service.memory_put(sized.clone(), image());
    service.disk_write(&source, b"encoded payload".to_vec()).await;

    assert!(service.memory_get(&sized).is_some());
    assert_eq!(service.disk_read(&source).await.unwrap(), b"encoded payload");

    service.flush_cache().await;

    service.clear_cache().await;
    assert_eq!(service.state(), LifecycleState::Ready);
    assert!(service.memory_get(&sized).is_none());
    assert!(service.disk_read(&source).await.is_none());

    service.close_cache().await;
    assert_eq!(service.state(), LifecycleState::Closed);
    assert!(service.memory_get(&sized).is_none());
}

#[tokio::test]
async fn disk_tier_survives_restart() {
    let temp = TempDir::new().unwrap();
    let source = ContentKey::source("https://example.com/a.jpg");

    {
        let service = CacheService::new(config(&temp));
        service.init_cache().await;
        service.disk_write(&source, b"persisted".to_vec()).await;
        service.close_cache().await;
    }

    let service = CacheService::new(config(&temp));
    service.init_cache().await;
    assert_eq!(service.disk_read(&source).await.unwrap(), b"persisted");
}

#[tokio::test]
async fn stats_track_tier_activity() {
    let temp = TempDir::new().unwrap();
    let service = CacheService::new(config(&temp));
    service.init_cache().await;

    let sized = ContentKey::derive("https://example.com/a.jpg", 8, 8);
    service.memory_put(sized.clone(), image());
    service.memory_get(&sized);
    service.memory_get(&ContentKey::derive("https://example.com/b.jpg", 8, 8));

    let stats = service.memory_stats();
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!(stats.hit_rate() > 0.0);
}
