//! Storage backends for folio
//!
//! Jobs and usage entries persist through the `JobStore` trait.
//! The provided implementation is `SqliteStore`.

mod sqlite;
mod traits;

pub use sqlite::SqliteStore;
pub use traits::{JobStore, OpenStore, StorageError, StorageResult};
