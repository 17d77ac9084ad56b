//! Per-connection delivery state: packet identifiers and receipts.

pub mod ids;
pub mod receipts;

pub use ids::MsgIdAllocator;
pub use receipts::{CompletionHandle, Receipt, ReceiptRegistry};
