//! Error types returned by table operations.

use crate::id_pool::PoolError;
use std::net::Ipv4Addr;
use thiserror::Error;

/// Failure to insert into the table. The table is unchanged.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum TableError {
    #[error(transparent)]
    Pool(#[from] PoolError),
    #[error("unknown IP protocol number {0}")]
    UnknownProtocol(u8),
}

/// Why an address entry was not deleted. The table is unchanged.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum DeleteError {
    #[error("no entry for {0}")]
    NotFound(Ipv4Addr),
    #[error("{addr} still has {records} active record(s)")]
    RecordsAttached { addr: Ipv4Addr, records: usize },
}
