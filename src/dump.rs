//! Human-readable rendering of a table's contents.
//!
//! The layout is for inspection only and may change:
//!
//! ```text
//! DUMP TABLE:
//! slot[0012]: [0  ]70.130.112.36    --> {[0  ] UDP 119 } --> {[0  ] TCP 119 }
//!             [1  ]0.0.1.204       NULL
//! ```

use crate::flow_table::FlowTable;
use crate::hash::BUCKETS;
use core::fmt;

/// Continuation indent for further entries of a bucket; as wide as `slot[NNNN]: `.
const INDENT: &str = "            ";

/// `Display` adapter returned by [`FlowTable::dump`].
pub struct Dump<'a> {
    table: &'a FlowTable,
}

impl<'a> Dump<'a> {
    pub(crate) fn new(table: &'a FlowTable) -> Self {
        Self { table }
    }
}

impl fmt::Display for Dump<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "DUMP TABLE:")?;
        for b in 0..BUCKETS {
            let mut entries = self.table.bucket(b).peekable();
            if entries.peek().is_none() {
                continue;
            }
            write!(f, "slot[{b:04}]: ")?;
            for (i, e) in entries.enumerate() {
                if i > 0 {
                    write!(f, "\n{INDENT}")?;
                }
                let addr = e.addr().to_string();
                let empty = if e.has_records() { "" } else { "NULL" };
                write!(f, "[{:<3}]{addr:<15} {empty} ", e.id())?;
                for r in e.records() {
                    write!(f, "--> {r} ")?;
                }
            }
            writeln!(f)?;
        }
        Ok(())
    }
}
