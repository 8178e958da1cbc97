//! PixFetch - remote image loading with a two-tier cache.
//!
//! This library fetches images over HTTP, decodes them at a requested
//! target resolution, and delivers them to display slots while avoiding
//! redundant network and decode work.
//!
//! # High-Level API
//!
//! ```ignore
//! use pixfetch::cache::{CacheConfig, CacheService};
//! use pixfetch::decode::StandardDecoder;
//! use pixfetch::loader::{DisplaySlot, ImageLoader, LoaderConfig};
//! use pixfetch::net::ReqwestFetcher;
//! use std::sync::Arc;
//!
//! let cache = Arc::new(CacheService::new(CacheConfig::default()));
//! cache.init_cache().await;
//!
//! let loader = ImageLoader::new(
//!     cache,
//!     ReqwestFetcher::new()?,
//!     StandardDecoder,
//!     LoaderConfig::default(),
//! );
//!
//! let slot = DisplaySlot::new();
//! loader.load("https://example.com/photo.jpg", 256, 256, &slot)?;
//! ```

pub mod cache;
pub mod decode;
pub mod key;
pub mod loader;
pub mod logging;
pub mod net;

/// Version of the PixFetch library.
///
/// Defined in `Cargo.toml` and injected at compile time.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
