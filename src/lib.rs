//! # fieldsync-core
//!
//! A reactive synchronization engine for metadata-bound fields.
//!
//! ## Overview
//!
//! Interactive fields embedded in documents (toggles, sliders, inputs, derived displays) each
//! bind to one slot of structured metadata: the YAML frontmatter of a markdown file, a
//! per-document scratch store, or a process wide global store. fieldsync-core keeps every
//! field bound to the same slot consistent:
//!
//! - **Shared cache**: one [`cache::CacheItem`] per `(source, storage_path)`, shared by all
//!   subscribers
//! - **Overlap aware notification**: a write reaches exactly the subscribers whose
//!   [`prop_path::PropPath`] overlaps the written one
//! - **Computed fields**: derived values recomputed whenever a dependency changes, with cycles
//!   refused at registration
//! - **Write lock**: external snapshots are ignored for a few ticks after a local write, so the
//!   echo of our own write to disk never overwrites newer local state
//! - **Eviction**: cache items without subscribers are dropped after an inactivity threshold
//!
//! ## Architecture
//!
//! - **[`manager`]**: [`manager::MetadataManager`], the coordinator fields talk to
//! - **[`source`]**: the [`source::MetadataSource`] trait and the built-in backends
//! - **[`bind_target`]** and **[`prop_path`]**: addressing and the overlap rules
//! - **[`subscription`]**: handles, listeners and compute functions
//! - **[`config`]**: tuning constants, loadable from TOML
//!
//! ## Quick Start
//!
//! ```rust
//! use fieldsync_core::{
//!     bind_target::BindTarget,
//!     config::ManagerConfig,
//!     manager::MetadataManager,
//!     prop_path::PropPath,
//!     source::{memory::MEMORY_SOURCE_ID, MemorySource},
//! };
//! use serde_json::{json, Value};
//!
//! # fn main() -> Result<(), fieldsync_core::FieldsyncError> {
//! let config = ManagerConfig {
//!     default_source: MEMORY_SOURCE_ID.to_string(),
//!     ..Default::default()
//! };
//! let manager = MetadataManager::new(config.clone());
//! manager.register_source(Box::new(MemorySource::new(&config)))?;
//!
//! let target = BindTarget::new(MEMORY_SOURCE_ID, "note.md", PropPath::from_keys(["done"]));
//! let toggle = manager.subscribe(target.clone(), |value: &Value| println!("toggle: {value}"))?;
//! let _label = manager.subscribe(target.clone(), |value: &Value| println!("label: {value}"))?;
//!
//! // Only the label is told; the toggle made the change itself.
//! manager.update(&toggle, json!(true))?;
//! assert_eq!(manager.read(&target)?, json!(true));
//! # Ok(())
//! # }
//! ```
//!
//! ## Features
//!
//! - **default**: the engine and all built-in sources
//! - **service**: [`watch::FrontmatterWatcher`], feeding on-disk edits back into the cache
//!   (`notify`)

pub mod bind_target;
pub mod cache;
pub mod config;
pub mod error;
pub mod manager;
pub mod prop_path;
pub mod source;
pub mod subscription;
#[cfg(test)]
mod tests;
#[cfg(feature = "service")]
pub mod watch;

pub use error::*;
