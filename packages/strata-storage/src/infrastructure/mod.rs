//! Infrastructure layer - Storage adapters
//!
//! In-memory adapter. Database-backed adapters implement the same
//! `ModelStore` port outside this crate.

#[cfg(feature = "memory")]
pub mod memory;

#[cfg(feature = "memory")]
pub use memory::InMemoryModelStore;
