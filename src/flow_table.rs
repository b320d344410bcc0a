//! FlowTable: fixed-bucket address table with per-address record lists.

use crate::chain::{self, Link};
use crate::dump::Dump;
use crate::error::{DeleteError, TableError};
use crate::hash::{hash_u32, BUCKETS};
use crate::id_pool::{Id, IdClass, IdPools, PoolConfig, PoolError};
use crate::record::{Endpoint, Protocol, TransportRecord};
use slotmap::SlotMap;
use std::collections::HashSet;
use std::net::Ipv4Addr;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, trace};

slotmap::new_key_type! {
    pub(crate) struct EntryKey;
    pub(crate) struct RecordKey;
}

/// Source of per-table owner tags carried by every [`Handle`].
static NEXT_OWNER: AtomicU64 = AtomicU64::new(0);

/// Stable reference to an address entry. Stops resolving once the entry
/// is deleted, even if its storage is reused.
///
/// A handle only resolves against the table that issued it; any other
/// table treats it as stale.
#[derive(Copy, Clone, Debug, Eq, PartialEq, Hash)]
pub struct Handle {
    owner: u64,
    key: EntryKey,
}

impl Handle {
    pub fn key(&self, table: &FlowTable) -> Option<u32> {
        table.entry(*self).map(|e| e.key())
    }

    pub fn id(&self, table: &FlowTable) -> Option<Id> {
        table.entry(*self).map(|e| e.id())
    }

    pub fn records<'a>(&self, table: &'a FlowTable) -> Option<Records<'a>> {
        table.entry(*self).map(|e| e.records())
    }
}

#[derive(Debug)]
struct AddressNode {
    key: u32,
    id: Id,
    records: Option<RecordKey>,
    next: Option<EntryKey>,
}

impl Link<EntryKey> for AddressNode {
    fn next(&self) -> Option<EntryKey> {
        self.next
    }
    fn set_next(&mut self, next: Option<EntryKey>) {
        self.next = next;
    }
}

#[derive(Debug)]
struct RecordNode {
    record: TransportRecord,
    next: Option<RecordKey>,
}

impl Link<RecordKey> for RecordNode {
    fn next(&self) -> Option<RecordKey> {
        self.next
    }
    fn set_next(&mut self, next: Option<RecordKey>) {
        self.next = next;
    }
}

/// Read-only view of one address entry.
#[derive(Copy, Clone)]
pub struct Entry<'a> {
    table: &'a FlowTable,
    key: EntryKey,
    node: &'a AddressNode,
}

impl<'a> Entry<'a> {
    pub fn handle(&self) -> Handle {
        Handle {
            owner: self.table.owner,
            key: self.key,
        }
    }

    pub fn key(&self) -> u32 {
        self.node.key
    }

    pub fn addr(&self) -> Ipv4Addr {
        Ipv4Addr::from(self.node.key)
    }

    pub fn id(&self) -> Id {
        self.node.id
    }

    /// Records in list order (insertion order).
    pub fn records(&self) -> Records<'a> {
        Records {
            it: chain::iter(&self.table.records, self.node.records),
        }
    }

    pub fn has_records(&self) -> bool {
        self.node.records.is_some()
    }
}

impl core::fmt::Debug for Entry<'_> {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("Entry")
            .field("addr", &self.addr())
            .field("id", &self.id())
            .field("records", &self.records().collect::<Vec<_>>())
            .finish()
    }
}

/// Iterator over an entry's records, head first.
pub struct Records<'a> {
    it: chain::Iter<'a, RecordKey, RecordNode>,
}

impl<'a> Iterator for Records<'a> {
    type Item = &'a TransportRecord;

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        self.it.next().map(|(_, n)| &n.record)
    }
}

/// Address -> transport record index with a fixed number of buckets.
///
/// Each bucket holds a chain of address entries; each entry holds a list
/// of TCP/UDP records. Entries and records draw their ids from the
/// table's own [`IdPools`].
#[derive(Debug)]
pub struct FlowTable {
    buckets: [Option<EntryKey>; BUCKETS],
    entries: SlotMap<EntryKey, AddressNode>,
    records: SlotMap<RecordKey, RecordNode>,
    pools: IdPools,
    // Per-class ids that were already allocated when the pools came in.
    reserved: [usize; 3],
    owner: u64,
}

impl Default for FlowTable {
    fn default() -> Self {
        Self::new()
    }
}

impl FlowTable {
    pub fn new() -> Self {
        Self::with_pools(IdPools::default())
    }

    /// Fails when a capacity in `config` exceeds
    /// [`MAX_CAPACITY`](crate::id_pool::MAX_CAPACITY).
    pub fn with_config(config: PoolConfig) -> Result<Self, PoolError> {
        Ok(Self::with_pools(IdPools::new(config)?))
    }

    /// Build a table drawing ids from `pools`. Ids already allocated in
    /// `pools` stay reserved: the table never hands them out or releases
    /// them, and `validate` counts them separately from live nodes.
    pub fn with_pools(pools: IdPools) -> Self {
        let reserved = CLASSES.map(|class| pools.pool(class).in_use());
        let owner = NEXT_OWNER.fetch_add(1, Ordering::Relaxed);
        debug!(buckets = BUCKETS, owner, ?reserved, "flow table initialised");
        Self {
            buckets: [None; BUCKETS],
            entries: SlotMap::with_key(),
            records: SlotMap::with_key(),
            pools,
            reserved,
            owner,
        }
    }

    fn handle(&self, key: EntryKey) -> Handle {
        Handle {
            owner: self.owner,
            key,
        }
    }

    /// Arena key behind `handle`, if the handle was issued by this table.
    fn own_key(&self, handle: Handle) -> Option<EntryKey> {
        (handle.owner == self.owner).then_some(handle.key)
    }

    /// Number of address entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Number of transport records across all entries.
    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    pub fn occupied_buckets(&self) -> usize {
        self.buckets.iter().filter(|b| b.is_some()).count()
    }

    pub fn pools(&self) -> &IdPools {
        &self.pools
    }

    pub fn get(&self, key: u32) -> Option<Handle> {
        chain::find(&self.entries, self.buckets[hash_u32(key)], |e| e.key == key)
            .map(|k| self.handle(k))
    }

    pub fn contains_key(&self, key: u32) -> bool {
        self.get(key).is_some()
    }

    pub fn entry(&self, handle: Handle) -> Option<Entry<'_>> {
        let key = self.own_key(handle)?;
        self.entries.get(key).map(|node| Entry {
            table: self,
            key,
            node,
        })
    }

    /// Find or create the entry for `key`, then append `endpoint` (if any)
    /// to the tail of its record list.
    ///
    /// Ids are allocated before the structure is touched; on exhaustion
    /// nothing is created and every id taken so far is returned.
    pub fn set(&mut self, key: u32, endpoint: Option<Endpoint>) -> Result<Handle, TableError> {
        let bucket = hash_u32(key);
        let existing = chain::find(&self.entries, self.buckets[bucket], |e| e.key == key);
        let record_id = endpoint
            .map(|ep| self.pools.allocate(ep.protocol.id_class()))
            .transpose()?;

        let ek = match existing {
            Some(ek) => ek,
            None => {
                let id = match self.pools.allocate(IdClass::Address) {
                    Ok(id) => id,
                    Err(e) => {
                        if let (Some(ep), Some(rid)) = (endpoint, record_id) {
                            release_id(&mut self.pools, ep.protocol.id_class(), rid);
                        }
                        return Err(e.into());
                    }
                };
                let node = AddressNode {
                    key,
                    id,
                    records: None,
                    next: None,
                };
                let ek = chain::push_back(&mut self.entries, &mut self.buckets[bucket], node);
                debug!(addr = %Ipv4Addr::from(key), %id, bucket, "address entry created");
                ek
            }
        };

        if let (Some(ep), Some(rid)) = (endpoint, record_id) {
            let record = TransportRecord::new(ep.protocol, rid, ep.port);
            let entry = &mut self.entries[ek];
            chain::push_back(
                &mut self.records,
                &mut entry.records,
                RecordNode { record, next: None },
            );
            trace!(addr = %Ipv4Addr::from(key), record = %record, "record attached");
        }
        Ok(self.handle(ek))
    }

    /// `set` with a raw IP protocol number. Numbers other than TCP (6)
    /// and UDP (17) are rejected before anything is allocated.
    pub fn set_raw(&mut self, key: u32, ip_proto: u8, port: u16) -> Result<Handle, TableError> {
        let protocol = Protocol::try_from(ip_proto).inspect_err(|_| {
            debug!(addr = %Ipv4Addr::from(key), ip_proto, port, "record with unknown protocol rejected");
        })?;
        self.set(key, Some(Endpoint { protocol, port }))
    }

    /// Remove the entry for `key` and release its id. Entries that still
    /// have records are left untouched.
    pub fn delete(&mut self, key: u32) -> Result<(), DeleteError> {
        let addr = Ipv4Addr::from(key);
        let bucket = hash_u32(key);
        let ek = chain::find(&self.entries, self.buckets[bucket], |e| e.key == key)
            .ok_or(DeleteError::NotFound(addr))?;

        let head = self.entries[ek].records;
        if head.is_some() {
            let records = chain::iter(&self.records, head).count();
            debug!(%addr, records, "delete rejected, records attached");
            return Err(DeleteError::RecordsAttached { addr, records });
        }

        if let Some(node) = chain::unlink(&mut self.entries, &mut self.buckets[bucket], |e| e.key == key) {
            release_id(&mut self.pools, IdClass::Address, node.id);
            debug!(%addr, id = %node.id, bucket, "address entry deleted");
        }
        Ok(())
    }

    /// Unlink the first record matching `(protocol, port)` from the
    /// entry's list and release its id. Returns false when nothing
    /// matched or the handle is stale.
    pub fn delete_record(&mut self, handle: Handle, protocol: Protocol, port: u16) -> bool {
        let Some(entry) = self.own_key(handle).and_then(|k| self.entries.get_mut(k)) else {
            return false;
        };
        let Some(node) = chain::unlink(&mut self.records, &mut entry.records, |r| {
            r.record.matches(protocol, port)
        }) else {
            trace!(addr = %Ipv4Addr::from(entry.key), %protocol, port, "no matching record");
            return false;
        };
        let addr = Ipv4Addr::from(entry.key);
        release_id(&mut self.pools, protocol.id_class(), node.record.id());
        debug!(%addr, record = %node.record, "record deleted");
        true
    }

    /// Entries in bucket order, then chain order.
    pub fn iter(&self) -> impl Iterator<Item = Entry<'_>> + '_ {
        (0..BUCKETS).flat_map(move |b| self.bucket(b))
    }

    /// Entries of one bucket in chain order. Empty for an out-of-range index.
    pub fn bucket(&self, index: usize) -> impl Iterator<Item = Entry<'_>> + '_ {
        let head = self.buckets.get(index).copied().flatten();
        chain::iter(&self.entries, head).map(move |(key, node)| Entry {
            table: self,
            key,
            node,
        })
    }

    pub fn dump(&self) -> Dump<'_> {
        Dump::new(self)
    }

    /// Remove every entry and record and return all their ids.
    pub fn clear(&mut self) {
        let (entries, records) = (self.entries.len(), self.records.len());
        for (_, node) in self.records.drain() {
            release_id(&mut self.pools, node.record.protocol().id_class(), node.record.id());
        }
        for (_, node) in self.entries.drain() {
            release_id(&mut self.pools, IdClass::Address, node.id);
        }
        self.buckets = [None; BUCKETS];
        debug!(entries, records, "flow table cleared");
    }

    /// Check every structural invariant of the table.
    ///
    /// Panics on the first violation: a bucket chain or record list that
    /// cycles, shares nodes or strands nodes, an entry in the wrong bucket,
    /// a repeated key within a chain, or id bookkeeping that disagrees
    /// with the live nodes plus the ids reserved at construction.
    pub fn validate(&self) {
        let mut live_entries = 0;
        let mut live_records = 0;
        let mut ids: [HashSet<Id>; 3] = Default::default();
        for (b, &head) in self.buckets.iter().enumerate() {
            let mut keys = HashSet::new();
            for (steps, (_, e)) in chain::iter(&self.entries, head).enumerate() {
                assert!(steps < self.entries.len(), "bucket {b}: chain does not terminate");
                assert_eq!(hash_u32(e.key), b, "{} placed in bucket {b}", Ipv4Addr::from(e.key));
                assert!(keys.insert(e.key), "bucket {b}: duplicate key {}", Ipv4Addr::from(e.key));
                assert!(
                    ids[class_slot(IdClass::Address)].insert(e.id),
                    "address id {} shared",
                    e.id
                );
                live_entries += 1;

                for (rsteps, (_, r)) in chain::iter(&self.records, e.records).enumerate() {
                    assert!(
                        rsteps < self.records.len(),
                        "{}: record list does not terminate",
                        Ipv4Addr::from(e.key)
                    );
                    let class = r.record.protocol().id_class();
                    assert!(
                        ids[class_slot(class)].insert(r.record.id()),
                        "{class} id {} shared",
                        r.record.id()
                    );
                    live_records += 1;
                }
            }
        }

        assert_eq!(live_entries, self.entries.len(), "unreachable address entries");
        assert_eq!(live_records, self.records.len(), "unreachable or shared records");
        for class in CLASSES {
            let pool = self.pools.pool(class);
            let live = ids[class_slot(class)].len();
            assert_eq!(
                pool.in_use(),
                self.reserved[class_slot(class)] + live,
                "{class} pool out of sync"
            );
            for &id in &ids[class_slot(class)] {
                assert!(pool.is_allocated(id), "{class} id {id} live but not allocated");
            }
        }
    }
}

const CLASSES: [IdClass; 3] = [IdClass::Address, IdClass::Tcp, IdClass::Udp];

fn class_slot(class: IdClass) -> usize {
    match class {
        IdClass::Address => 0,
        IdClass::Tcp => 1,
        IdClass::Udp => 2,
    }
}

/// Every live node holds an allocated id, so a failed release means the
/// bookkeeping is corrupt.
fn release_id(pools: &mut IdPools, class: IdClass, id: Id) {
    let released = pools.release(class, id);
    assert!(released.is_ok(), "id bookkeeping corrupt: {released:?}");
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADDR: u32 = 0x4682_7024;

    fn endpoints(t: &FlowTable, key: u32) -> Vec<Endpoint> {
        let h = t.get(key).expect("entry present");
        h.records(t).unwrap().map(|r| r.endpoint()).collect()
    }

    /// Invariant: set on an empty bucket creates the entry with the record
    /// as sole list head.
    #[test]
    fn set_into_empty_bucket() {
        let mut t = FlowTable::new();
        let h = t.set(ADDR, Some(Endpoint::udp(0x77))).unwrap();
        assert_eq!(t.get(ADDR), Some(h));
        assert_eq!(h.key(&t), Some(ADDR));
        assert_eq!(endpoints(&t, ADDR), vec![Endpoint::udp(0x77)]);
        assert_eq!(t.len(), 1);
        assert_eq!(t.record_count(), 1);
        t.validate();
    }

    #[test]
    fn set_without_endpoint_creates_empty_entry() {
        let mut t = FlowTable::new();
        let h = t.set(ADDR, None).unwrap();
        assert!(!t.entry(h).unwrap().has_records());
        assert_eq!(h.records(&t).unwrap().count(), 0);

        // Re-setting with no endpoint is a no-op.
        assert_eq!(t.set(ADDR, None).unwrap(), h);
        assert_eq!(t.len(), 1);
        assert_eq!(t.pools().pool(IdClass::Address).in_use(), 1);
    }

    /// Invariant: records are appended at the tail in insertion order and
    /// TCP/UDP may mix in one list.
    #[test]
    fn records_append_in_order() {
        let mut t = FlowTable::new();
        t.set(ADDR, None).unwrap();
        t.set(ADDR, Some(Endpoint::tcp(80))).unwrap();
        t.set(ADDR, Some(Endpoint::udp(53))).unwrap();
        t.set(ADDR, Some(Endpoint::tcp(443))).unwrap();
        assert_eq!(
            endpoints(&t, ADDR),
            vec![Endpoint::tcp(80), Endpoint::udp(53), Endpoint::tcp(443)]
        );
        t.validate();
    }

    /// Keys 1, 173 and 332 all hash to bucket 32: colliding keys chain in
    /// insertion order and stay individually addressable.
    #[test]
    fn colliding_keys_chain_in_one_bucket() {
        let keys = [1u32, 173, 332];
        assert!(keys.iter().all(|&k| hash_u32(k) == 32));

        let mut t = FlowTable::new();
        for &k in &keys {
            t.set(k, Some(Endpoint::tcp(k as u16))).unwrap();
        }
        let chain: Vec<u32> = t.bucket(32).map(|e| e.key()).collect();
        assert_eq!(chain, keys);
        for &k in &keys {
            assert_eq!(endpoints(&t, k), vec![Endpoint::tcp(k as u16)]);
        }
        assert!(t.get(361).is_none(), "same bucket, never inserted");
        assert_eq!(t.occupied_buckets(), 1);
        t.validate();
    }

    #[test]
    fn delete_rejected_while_records_attached() {
        let mut t = FlowTable::new();
        let h = t.set(ADDR, Some(Endpoint::tcp(22))).unwrap();
        assert_eq!(
            t.delete(ADDR),
            Err(DeleteError::RecordsAttached {
                addr: Ipv4Addr::from(ADDR),
                records: 1
            })
        );
        assert_eq!(t.get(ADDR), Some(h));
        assert_eq!(t.record_count(), 1);

        assert!(t.delete_record(h, Protocol::Tcp, 22));
        assert_eq!(t.delete(ADDR), Ok(()));
        assert!(t.get(ADDR).is_none());
        assert_eq!(t.pools().in_use(), 0);
    }

    #[test]
    fn delete_missing_key() {
        let mut t = FlowTable::new();
        assert_eq!(t.delete(7), Err(DeleteError::NotFound(Ipv4Addr::from(7))));
        // Occupied bucket, different key.
        t.set(1, None).unwrap();
        assert_eq!(t.delete(173), Err(DeleteError::NotFound(Ipv4Addr::from(173))));
        assert_eq!(t.len(), 1);
    }

    /// Each splice position in a bucket chain: sole head, head with
    /// successor, tail, interior.
    #[test]
    fn delete_each_chain_position() {
        let keys = [1u32, 173, 332, 361];
        let fresh = || {
            let mut t = FlowTable::new();
            for &k in &keys {
                t.set(k, None).unwrap();
            }
            t
        };
        let chain = |t: &FlowTable| t.bucket(32).map(|e| e.key()).collect::<Vec<_>>();

        let mut t = fresh();
        t.delete(1).unwrap();
        assert_eq!(chain(&t), vec![173, 332, 361]);

        let mut t = fresh();
        t.delete(361).unwrap();
        assert_eq!(chain(&t), vec![1, 173, 332]);

        let mut t = fresh();
        t.delete(173).unwrap();
        assert_eq!(chain(&t), vec![1, 332, 361]);
        t.validate();

        let mut t = FlowTable::new();
        t.set(1, None).unwrap();
        t.delete(1).unwrap();
        assert_eq!(t.occupied_buckets(), 0);
        t.validate();
    }

    /// Same four positions within a record list.
    #[test]
    fn delete_record_each_list_position() {
        let list = [
            Endpoint::tcp(1),
            Endpoint::udp(2),
            Endpoint::tcp(3),
            Endpoint::udp(4),
        ];
        let fresh = || {
            let mut t = FlowTable::new();
            for ep in list {
                t.set(ADDR, Some(ep)).unwrap();
            }
            let h = t.get(ADDR).unwrap();
            (t, h)
        };

        let (mut t, h) = fresh();
        assert!(t.delete_record(h, Protocol::Tcp, 1));
        assert_eq!(endpoints(&t, ADDR), list[1..].to_vec());

        let (mut t, h) = fresh();
        assert!(t.delete_record(h, Protocol::Udp, 4));
        assert_eq!(endpoints(&t, ADDR), list[..3].to_vec());

        let (mut t, h) = fresh();
        assert!(t.delete_record(h, Protocol::Udp, 2));
        assert_eq!(endpoints(&t, ADDR), vec![list[0], list[2], list[3]]);
        t.validate();

        let mut t = FlowTable::new();
        let h = t.set(ADDR, Some(Endpoint::udp(9))).unwrap();
        assert!(t.delete_record(h, Protocol::Udp, 9));
        assert!(!t.entry(h).unwrap().has_records());
        t.validate();
    }

    /// Invariant: a record matches on its own protocol, not its neighbour's.
    #[test]
    fn delete_record_matches_own_protocol() {
        let mut t = FlowTable::new();
        t.set(ADDR, Some(Endpoint::udp(0x77))).unwrap();
        let h = t.set(ADDR, Some(Endpoint::tcp(0x77))).unwrap();

        assert!(!t.delete_record(h, Protocol::Tcp, 0x78));
        assert!(t.delete_record(h, Protocol::Tcp, 0x77));
        assert_eq!(endpoints(&t, ADDR), vec![Endpoint::udp(0x77)]);
        assert!(!t.delete_record(h, Protocol::Tcp, 0x77), "second delete is a no-op");
        t.validate();
    }

    #[test]
    fn stale_handle_does_not_resolve() {
        let mut t = FlowTable::new();
        let h1 = t.set(ADDR, None).unwrap();
        t.delete(ADDR).unwrap();
        let h2 = t.set(ADDR, Some(Endpoint::tcp(1))).unwrap();
        assert_ne!(h1, h2);
        assert!(t.entry(h1).is_none());
        assert!(h1.key(&t).is_none());
        assert!(!t.delete_record(h1, Protocol::Tcp, 1));
        assert_eq!(t.record_count(), 1);
    }

    /// Invariant: ids are unique among live entities per class and are
    /// reused after release.
    #[test]
    fn ids_are_released_and_reused() {
        let mut t = FlowTable::new();
        let a = t.set(1, Some(Endpoint::tcp(1))).unwrap();
        let b = t.set(2, Some(Endpoint::tcp(2))).unwrap();
        assert_eq!(a.id(&t), Some(Id::from(0)));
        assert_eq!(b.id(&t), Some(Id::from(1)));
        let tcp_ids: Vec<Id> = t.iter().flat_map(|e| e.records().map(|r| r.id())).collect();
        assert_eq!(tcp_ids.len(), 2);
        assert_ne!(tcp_ids[0], tcp_ids[1]);

        assert!(t.delete_record(a, Protocol::Tcp, 1));
        t.delete(1).unwrap();
        let c = t.set(3, Some(Endpoint::tcp(3))).unwrap();
        assert_eq!(c.id(&t), Some(Id::from(0)));
        let rec = c.records(&t).unwrap().next().unwrap();
        assert_eq!(rec.id(), Id::from(0));
        t.validate();
    }

    /// Invariant: exhaustion aborts the insert and gives back any id taken.
    #[test]
    fn exhaustion_leaves_table_unchanged() {
        let mut t = FlowTable::with_config(PoolConfig {
            address: 1,
            tcp: 1,
            udp: 4,
        })
        .unwrap();
        t.set(1, Some(Endpoint::tcp(1))).unwrap();

        // TCP pool is full.
        let err = t.set(1, Some(Endpoint::tcp(2))).unwrap_err();
        assert_eq!(
            err,
            TableError::Pool(PoolError::Exhausted {
                class: IdClass::Tcp,
                capacity: 1
            })
        );

        // Address pool is full; the UDP id taken first must come back.
        let err = t.set(2, Some(Endpoint::udp(2))).unwrap_err();
        assert!(matches!(
            err,
            TableError::Pool(PoolError::Exhausted {
                class: IdClass::Address,
                ..
            })
        ));
        assert_eq!(t.pools().pool(IdClass::Udp).in_use(), 0);
        assert!(t.get(2).is_none());
        assert_eq!(t.len(), 1);
        assert_eq!(t.record_count(), 1);
        t.validate();
    }

    #[test]
    fn set_raw_rejects_unknown_protocol() {
        let mut t = FlowTable::new();
        assert_eq!(t.set_raw(ADDR, 1, 7), Err(TableError::UnknownProtocol(1)));
        assert!(t.get(ADDR).is_none());
        assert_eq!(t.pools().in_use(), 0);

        let h = t.set_raw(ADDR, 17, 53).unwrap();
        t.set_raw(ADDR, 6, 80).unwrap();
        assert_eq!(t.set_raw(ADDR, 41, 9), Err(TableError::UnknownProtocol(41)));
        let protos: Vec<Protocol> = h.records(&t).unwrap().map(|r| r.protocol()).collect();
        assert_eq!(protos, vec![Protocol::Udp, Protocol::Tcp]);
    }

    /// Duplicate (protocol, port) pairs are kept as separate records; each
    /// delete removes the first one.
    #[test]
    fn duplicate_endpoints_are_listed_twice() {
        let mut t = FlowTable::new();
        t.set(ADDR, Some(Endpoint::tcp(80))).unwrap();
        let h = t.set(ADDR, Some(Endpoint::tcp(80))).unwrap();
        let ids: Vec<Id> = h.records(&t).unwrap().map(|r| r.id()).collect();
        assert_eq!(ids, vec![Id::from(0), Id::from(1)]);

        assert!(t.delete_record(h, Protocol::Tcp, 80));
        let ids: Vec<Id> = h.records(&t).unwrap().map(|r| r.id()).collect();
        assert_eq!(ids, vec![Id::from(1)]);
    }

    #[test]
    fn clear_releases_everything() {
        let mut t = FlowTable::new();
        for k in 0..40u32 {
            t.set(k, Some(Endpoint::tcp(k as u16))).unwrap();
            t.set(k, Some(Endpoint::udp(k as u16))).unwrap();
        }
        assert_eq!(t.pools().in_use(), 120);
        t.clear();
        assert!(t.is_empty());
        assert_eq!(t.record_count(), 0);
        assert_eq!(t.occupied_buckets(), 0);
        assert_eq!(t.pools().in_use(), 0);
        t.validate();

        let h = t.set(5, Some(Endpoint::udp(5))).unwrap();
        assert_eq!(h.id(&t), Some(Id::from(0)));
    }

    #[test]
    fn with_pools_keeps_reserved_ids() {
        let mut pools = IdPools::default();
        let reserved = pools.allocate(IdClass::Address).unwrap();
        let mut t = FlowTable::with_pools(pools);
        let h = t.set(ADDR, None).unwrap();
        assert_ne!(h.id(&t), Some(reserved));
        assert_eq!(t.pools().pool(IdClass::Address).in_use(), 2);
        t.validate();

        t.set(ADDR, Some(Endpoint::udp(53))).unwrap();
        t.validate();
        t.clear();
        t.validate();
        assert!(t.pools().pool(IdClass::Address).is_allocated(reserved));
        assert_eq!(t.pools().in_use(), 1, "clear leaves reserved ids alone");
    }

    /// Invariant: a handle resolves only against the table that issued it,
    /// even when another table holds an entry in the same arena slot.
    #[test]
    fn foreign_handle_is_treated_as_stale() {
        let mut a = FlowTable::new();
        let mut b = FlowTable::new();
        let ha = a.set(ADDR, Some(Endpoint::tcp(80))).unwrap();
        let hb = b.set(ADDR, Some(Endpoint::tcp(80))).unwrap();
        assert_ne!(ha, hb);
        assert_eq!(ha.key, hb.key, "same slot and version in both arenas");

        assert!(b.entry(ha).is_none());
        assert!(ha.key(&b).is_none());
        assert!(ha.records(&b).is_none());
        assert!(!b.delete_record(ha, Protocol::Tcp, 80));
        assert_eq!(b.record_count(), 1);

        assert!(b.delete_record(hb, Protocol::Tcp, 80));
        assert_eq!(a.entry(ha).unwrap().handle(), ha);
        assert_eq!(a.record_count(), 1);
    }

    #[test]
    #[should_panic(expected = "placed in bucket")]
    fn validate_catches_misplaced_entry() {
        let mut t = FlowTable::new();
        let h = t.set(1, None).unwrap();
        // Move the chain to a bucket its key does not hash to.
        t.buckets[hash_u32(1)] = None;
        t.buckets[0] = Some(h.key);
        t.validate();
    }

    #[test]
    #[should_panic(expected = "does not terminate")]
    fn validate_catches_record_cycle() {
        let mut t = FlowTable::new();
        t.set(ADDR, Some(Endpoint::tcp(1))).unwrap();
        let h = t.set(ADDR, Some(Endpoint::udp(2))).unwrap();
        let head = t.entries[h.key].records.unwrap();
        let tail = t.records[head].next.unwrap();
        t.records[tail].next = Some(head);
        t.validate();
    }
}
