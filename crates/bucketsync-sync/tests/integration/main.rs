//! Integration tests for bucketsync-sync
//!
//! The pipelines run against in-memory storage and broker fakes; outbound
//! tests also use real temporary directories and the OS file watcher.

mod common;

mod test_supervisor;
