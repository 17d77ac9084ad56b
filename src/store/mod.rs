//! Persistence of in-flight frames across restarts.
//!
//! The store holds encoded wire frames keyed by direction and packet id
//! (`o:<id>` for outbound, `i:<id>` for inbound QoS 2 state). The logic
//! core is the only writer while the client runs; implementations need
//! per-key atomicity but nothing across keys.

mod file;
mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store io failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("store record corrupt: {0}")]
    Corrupt(String),
}

/// Direction of the in-flight message a key refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Outbound,
    Inbound,
}

/// Key for an outbound in-flight frame.
pub fn outbound_key(packet_id: u16) -> String {
    format!("o:{packet_id}")
}

/// Key for an inbound QoS 2 in-flight frame.
pub fn inbound_key(packet_id: u16) -> String {
    format!("i:{packet_id}")
}

/// Split a store key back into direction and packet id.
pub fn parse_key(key: &str) -> Option<(Direction, u16)> {
    let (prefix, id) = key.split_once(':')?;
    let direction = match prefix {
        "o" => Direction::Outbound,
        "i" => Direction::Inbound,
        _ => return None,
    };
    Some((direction, id.parse().ok()?))
}

/// Keyed persistence for in-flight frames.
pub trait Store: Send + Sync {
    /// Prepare the backing medium. Called once at Start.
    fn open(&self) -> Result<(), StoreError>;

    /// Release the backing medium. Called on disconnect.
    fn close(&self);

    /// Drop every record (clean-session start).
    fn reset(&self) -> Result<(), StoreError>;

    fn put(&self, key: &str, frame: &[u8]) -> Result<(), StoreError>;

    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StoreError>;

    fn del(&self, key: &str) -> Result<(), StoreError>;

    /// Every key currently present. Used at resume.
    fn all(&self) -> Result<Vec<String>, StoreError>;
}
