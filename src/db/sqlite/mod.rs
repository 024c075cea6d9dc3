mod common;
mod index_store;

pub use index_store::SqliteIndexStore;
