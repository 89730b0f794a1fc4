pub mod aggregate;
pub mod collaboration;
pub mod notify;
pub mod reactions;
pub mod storage;
pub mod thread;
