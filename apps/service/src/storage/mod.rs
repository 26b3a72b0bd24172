/// Durable storage for the engine
///
/// - `records`: keyed JSON documents grouped in named collections
/// - `logs`: append-only per-check log segments and their gzip archives
/// - `locks`: per-key async mutual exclusion shared by both
pub mod locks;
pub mod logs;
pub mod records;

pub use locks::KeyedLocks;
pub use logs::{FileLogStore, LogStore};
pub use records::{FileRecordStore, MemoryRecordStore, RecordStore};

/// Keys and log names become file names, so path separators and
/// dot-prefixed names are refused
pub(crate) fn is_safe_name(name: &str) -> bool {
    !name.is_empty()
        && !name.starts_with('.')
        && !name.contains(['/', '\\', '\0'])
}
