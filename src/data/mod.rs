//! Catalog access, persistence, and the records that pass between them.

pub mod catalog;
pub mod kv;
pub mod models;
pub mod sink;

pub use catalog::{AlbumCatalog, PgCatalog};
pub use sink::{HarvestStore, PgStore};
