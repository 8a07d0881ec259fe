//! A persistent epoch subsystem for non-blocking and blocking recoverable data structures.
//!
//! This crate is the clock/reclamation core a persistent-memory data structure builds on, not a
//! data structure itself: it hands out operation frames, tracks which epoch each PBlk belongs to,
//! decides when writes are durable, and reconstructs the live object set after a crash. A data
//! structure built on top of it gets linearizable, crash-consistent mutation of its own PBlk graph
//! in exchange for going through [`OpFrame`]/[`pblk::Pblk`]/[`lin_var::LinVar`] instead of raw
//! pointers.
//!
//! # Examples
//!
//! Standing up the subsystem and running one operation:
//! ```
//! use pds::{
//!     chunk::HeapChunkAllocator, config::{EpochSysConfig, PwbKind}, epochsys::EpochSys,
//! };
//!
//! let config = EpochSysConfig::new(1).with_pwb_kind(PwbKind::Clwb);
//! let epoch_sys = EpochSys::init(config, Box::new(HeapChunkAllocator::new(PwbKind::Clwb)));
//! epoch_sys.thread_init(0).unwrap();
//!
//! let guard = epoch_sys.scoped_op(0);
//! // ... open_read/open_write/register_update/retire PBlks through `guard` ...
//! drop(guard); // commits: publishes pending writes and may trigger an epoch advance
//! ```
//!
//! # Shape
//!
//! * [`chunk`] — the persistent-heap seam ([`chunk::ChunkAllocator`]) a real allocator plugs into.
//! * [`pblk`] — the PBlk object model: headers, copy-on-write, retire/reclaim.
//! * [`lin_var`] — the 128-bit `{raw, cnt}` indirection word data structures CAS through.
//! * [`sc_desc`] — the software descriptor pool backing `lin_var`'s CAS when hardware
//!   transactional memory isn't available or keeps aborting.
//! * [`op_frame`] — `begin_op`/`end_op`/`abort_op` and their RAII equivalents.
//! * [`recovery`] — walks a [`chunk::ChunkAllocator`]'s surviving chunks after a restart.
//! * [`epochsys`] — [`epochsys::EpochSys`], the handle tying all of the above together.
//! * [`config`]/[`error`]/[`mode`] — the ambient configuration, error, and mode types.
//! * [`stats`] — optional counters, gated behind `--features stats`.

#![warn(missing_debug_implementations)]
#![warn(unused_lifetimes)]
#![cfg_attr(not(test), warn(unused_results))]
#![deny(rust_2018_idioms)]
#![deny(unused_must_use)]

pub mod chunk;
pub mod config;
pub mod epochsys;
pub mod error;
pub(crate) mod internal;
pub mod lin_var;
pub mod mode;
pub mod op_frame;
pub mod pblk;
pub mod recovery;
pub mod sc_desc;
pub mod stats;

pub use epochsys::EpochSys;
pub use error::{EpochSysError, Result};
pub use op_frame::OpFrame;
#[doc(inline)]
pub use pds_htm as htm;
