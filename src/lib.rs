//! flow-table: a fixed-bucket index from IPv4 address to the TCP/UDP
//! ports currently active on it.
//!
//! Internal Design:
//!
//! Summary
//! - Goal: a minimal connection-tracking index (address -> endpoints)
//!   whose two levels of linked structure can be reasoned about
//!   separately.
//! - Layers:
//!   - `chain`: singly-linked chains stored in a generational arena.
//!     One `unlink` covers every splice position (sole head, head with
//!     successor, tail, interior) for both levels.
//!   - `id_pool`: bitmap pools handing out the lowest free id per class
//!     (address, TCP, UDP).
//!   - `FlowTable`: 128 bucket heads, each owning a chain of address
//!     entries; each entry owns a list of transport records.
//!
//! Constraints
//! - Fixed bucket count ([`BUCKETS`]); the table never rehashes.
//! - Keys are unique within a bucket chain; records are appended at the
//!   tail, so a list reads in insertion order.
//! - An entry with records cannot be deleted; remove its records first.
//! - Every destructive delete returns the node's id to its pool.
//! - Single actor: mutation takes `&mut FlowTable`; no internal locking.
//!
//! Handles
//! - [`Handle`] wraps a generational arena key. A handle to a deleted
//!   entry never resolves again, even when its slot is reused.
//!
//! Records
//! - [`TransportRecord`] is an enum; the variant is the protocol, so a
//!   node's tag always describes the node itself.
//! - Raw IP protocol numbers other than 6 and 17 are rejected by
//!   [`FlowTable::set_raw`] before anything is allocated.
//!
//! Logging
//! - Structural changes emit `tracing` events at `debug`/`trace` level.
//!   The crate installs no subscriber.

mod chain;
pub mod dump;
mod error;
mod flow_table;
mod flow_table_proptest;
pub mod hash;
pub mod id_pool;
mod record;

// Public surface
pub use error::{DeleteError, TableError};
pub use flow_table::{Entry, FlowTable, Handle, Records};
pub use hash::BUCKETS;
pub use id_pool::{Id, IdClass, IdPool, IdPools, PoolConfig, PoolError};
pub use record::{Endpoint, PortRecord, Protocol, TransportRecord};
