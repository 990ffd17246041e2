//! In-process query layer over the shared incremental store.
//!
//! Each consumer process builds its own [`MemoryIndex`] by replaying the
//! store's record set, then keeps it current by draining the update log
//! through its replay cursor. Nothing here writes to the store.

mod index;
mod query;

pub use index::MemoryIndex;
pub use query::{Filter, GroupBy, GroupStats};

#[cfg(test)]
mod tests;
