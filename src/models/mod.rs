mod instance;
mod pending_deletion;

pub use instance::*;
pub use pending_deletion::*;
