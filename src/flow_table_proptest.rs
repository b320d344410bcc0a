#![cfg(test)]

// Property tests for FlowTable kept inside the crate so they can run the
// full structural check after every step.

use crate::error::DeleteError;
use crate::flow_table::FlowTable;
use crate::id_pool::PoolConfig;
use crate::record::{Endpoint, Protocol, TransportRecord};
use proptest::prelude::*;
use std::collections::HashMap;

// Keys 1, 173, 332 and 361 share bucket 32, so chains get exercised.
const COLLIDING: [u32; 4] = [1, 173, 332, 361];

#[derive(Clone, Debug)]
enum Op {
    Set(usize, Option<Endpoint>),
    DeleteRecord(usize, Protocol, u16),
    Delete(usize),
    Get(usize),
    Clear,
}

fn arb_endpoint() -> impl Strategy<Value = Endpoint> {
    (prop_oneof![Just(Protocol::Tcp), Just(Protocol::Udp)], 0u16..6).prop_map(
        |(protocol, port)| Endpoint { protocol, port },
    )
}

fn arb_scenario() -> impl Strategy<Value = (Vec<u32>, Vec<Op>)> {
    proptest::collection::vec(any::<u32>(), 0..=4).prop_flat_map(|extra| {
        let pool: Vec<u32> = COLLIDING.iter().copied().chain(extra).collect();
        let idx = 0..pool.len();
        let op = prop_oneof![
            4 => (idx.clone(), proptest::option::of(arb_endpoint())).prop_map(|(i, e)| Op::Set(i, e)),
            3 => (idx.clone(), arb_endpoint()).prop_map(|(i, e)| Op::DeleteRecord(i, e.protocol, e.port)),
            2 => idx.clone().prop_map(Op::Delete),
            1 => idx.clone().prop_map(Op::Get),
            1 => Just(Op::Clear),
        ];
        proptest::collection::vec(op, 1..80).prop_map(move |ops| (pool.clone(), ops))
    })
}

// Property: state-machine equivalence against a map of endpoint lists.
// Invariants exercised across random operation sequences:
// - `set` appends at the tail; list order equals insertion order.
// - `delete_record` removes the first match of the node's own tag.
// - `delete` succeeds iff the entry exists with an empty list.
// - `validate` holds after every step: placement, key uniqueness, no
//   cycles, and pool usage equal to live nodes (no id leaks).
proptest! {
    #![proptest_config(ProptestConfig { cases: 128, .. ProptestConfig::default() })]
    #[test]
    fn prop_state_machine((pool, ops) in arb_scenario()) {
        let mut sut = FlowTable::new();
        let mut model: HashMap<u32, Vec<Endpoint>> = HashMap::new();

        for op in ops {
            match op {
                Op::Set(i, ep) => {
                    let k = pool[i];
                    let h = sut.set(k, ep).expect("pools are large enough");
                    prop_assert_eq!(sut.get(k), Some(h));
                    let list = model.entry(k).or_default();
                    list.extend(ep);
                }
                Op::DeleteRecord(i, protocol, port) => {
                    let k = pool[i];
                    let removed = match sut.get(k) {
                        Some(h) => sut.delete_record(h, protocol, port),
                        None => false,
                    };
                    let expected = match model.get_mut(&k) {
                        Some(list) => match list.iter().position(|e| e.protocol == protocol && e.port == port) {
                            Some(p) => {
                                list.remove(p);
                                true
                            }
                            None => false,
                        },
                        None => false,
                    };
                    prop_assert_eq!(removed, expected);
                }
                Op::Delete(i) => {
                    let k = pool[i];
                    let res = sut.delete(k);
                    match model.get(&k) {
                        None => prop_assert!(matches!(res, Err(DeleteError::NotFound(_)))),
                        Some(list) if list.is_empty() => {
                            prop_assert_eq!(res, Ok(()));
                            model.remove(&k);
                        }
                        Some(list) => {
                            prop_assert!(
                                matches!(res, Err(DeleteError::RecordsAttached { records, .. }) if records == list.len()),
                                "got {:?}", res
                            );
                        }
                    }
                    prop_assert_eq!(sut.contains_key(k), model.contains_key(&k));
                }
                Op::Get(i) => {
                    let k = pool[i];
                    prop_assert_eq!(sut.get(k).is_some(), model.contains_key(&k));
                }
                Op::Clear => {
                    sut.clear();
                    model.clear();
                    prop_assert_eq!(sut.pools().in_use(), 0);
                }
            }

            sut.validate();
            prop_assert_eq!(sut.len(), model.len());
            prop_assert_eq!(sut.record_count(), model.values().map(Vec::len).sum::<usize>());
            for (&k, list) in &model {
                let h = sut.get(k).expect("model key present");
                let got: Vec<Endpoint> = h.records(&sut).unwrap().map(|r| r.endpoint()).collect();
                prop_assert_eq!(&got, list);
            }
        }
    }
}

// Property: a record's protocol always equals its variant, whatever the
// mix of neighbours around it.
proptest! {
    #[test]
    fn prop_record_tag_is_self_describing(eps in proptest::collection::vec(arb_endpoint(), 1..20)) {
        let mut t = FlowTable::new();
        for ep in &eps {
            t.set(0x4682_7024, Some(*ep)).unwrap();
        }
        let h = t.get(0x4682_7024).unwrap();
        for (rec, ep) in h.records(&t).unwrap().zip(&eps) {
            let variant = match rec {
                TransportRecord::Tcp(_) => Protocol::Tcp,
                TransportRecord::Udp(_) => Protocol::Udp,
            };
            prop_assert_eq!(rec.protocol(), variant);
            prop_assert_eq!(variant, ep.protocol);
            prop_assert_eq!(rec.port(), ep.port);
        }
    }
}

// Property: under repeated insert/delete churn the id space does not
// shrink; a small pool never runs dry.
proptest! {
    #![proptest_config(ProptestConfig { cases: 32, .. ProptestConfig::default() })]
    #[test]
    fn prop_churn_does_not_leak_ids(keys in proptest::collection::vec(any::<u32>(), 1..8), rounds in 1usize..40) {
        let mut t = FlowTable::with_config(PoolConfig::uniform(8)).unwrap();
        for round in 0..rounds {
            for &k in &keys {
                let port = round as u16;
                t.set(k, Some(Endpoint::tcp(port))).unwrap();
                t.set(k, Some(Endpoint::udp(port))).unwrap();
            }
            for &k in &keys {
                if let Some(h) = t.get(k) {
                    while t.delete_record(h, Protocol::Tcp, round as u16) {}
                    while t.delete_record(h, Protocol::Udp, round as u16) {}
                }
                // Every record was drained, so only a repeated key can miss.
                let res = t.delete(k);
                prop_assert!(
                    matches!(res, Ok(()) | Err(DeleteError::NotFound(_))),
                    "got {:?}", res
                );
            }
            prop_assert!(t.is_empty());
            prop_assert_eq!(t.pools().in_use(), 0);
        }
    }
}
