mod index_store;

pub use index_store::*;
