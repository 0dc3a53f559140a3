//! Seams between the executor and its backends.

mod storage;
mod transport;

pub use storage::{CredentialStorage, MemoryStorage};
pub use transport::Transport;
