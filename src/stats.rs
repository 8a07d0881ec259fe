//! Statistics collection, gated behind `--features stats` (or the per-counter `PDS_*` environment
//! variables `pds-stats`'s build script wires up).
//!
//! The counters themselves live in `pds-stats` (a separate workspace member: statistics
//! collection is an independent concern other crates in this family can reuse). This module just
//! re-exports its public surface so callers write `pds::stats::print_stats()` rather than
//! depending on `pds-stats` directly.

pub use pds_stats::{print_stats, stats, thread_stats, Stats, ThreadStats};
