pub mod core;
pub mod exchange;
pub mod persistence;

/// In-memory test doubles. Not behind `#[cfg(test)]`: integration tests
/// under `tests/` depend on this crate as an external consumer, where
/// `cfg(test)` items of the library are invisible.
pub mod mock;
