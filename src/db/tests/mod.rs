//! Shared index store test infrastructure
//!
//! The same test logic runs against every `IndexStore` backend. Each test is an
//! async function taking `&dyn IndexStore`, and per-backend modules wire it up:
//!
//! - **In-memory**: always compiled
//! - **SQLite**: file-backed databases in a temp dir with real migrations
