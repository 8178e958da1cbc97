//! Image loading front end.
//!
//! [`ImageLoader`] ties the pieces together: it derives cache keys,
//! consults the memory tier synchronously, and spawns bounded background
//! work that walks disk tier, network, and decode before publishing the
//! result to the requesting [`DisplaySlot`]. Rebinding a slot cancels the
//! work it no longer wants.

mod coordinator;
mod target;
mod task;

pub use coordinator::{ImageLoader, LoadError, LoaderConfig};
pub use target::DisplaySlot;
pub use task::FetchTask;
