//! Singly-linked chains stored in a generational arena.
//!
//! Both levels of the table (bucket chains of address entries and
//! per-entry record lists) are the same shape: a head link plus nodes that
//! each link to their successor. Nodes live in a `SlotMap` and links are
//! its keys, so every node has exactly one owner link (the head or its
//! predecessor) and a removed node's key never resolves again.
//!
//! The helpers here are the only code that rewires links.

use slotmap::{Key, SlotMap};

/// A node that links to its successor in a chain.
pub(crate) trait Link<K: Key> {
    fn next(&self) -> Option<K>;
    fn set_next(&mut self, next: Option<K>);
}

/// Iterator over the nodes of one chain, head first.
pub(crate) struct Iter<'a, K: Key, N> {
    nodes: &'a SlotMap<K, N>,
    cur: Option<K>,
}

impl<'a, K: Key, N: Link<K>> Iterator for Iter<'a, K, N> {
    type Item = (K, &'a N);

    #[inline]
    fn next(&mut self) -> Option<Self::Item> {
        let k = self.cur?;
        let node = self.nodes.get(k)?;
        self.cur = node.next();
        Some((k, node))
    }
}

pub(crate) fn iter<K: Key, N: Link<K>>(nodes: &SlotMap<K, N>, head: Option<K>) -> Iter<'_, K, N> {
    Iter { nodes, cur: head }
}

/// Key of the first node matching `pred`.
pub(crate) fn find<K, N, F>(nodes: &SlotMap<K, N>, head: Option<K>, mut pred: F) -> Option<K>
where
    K: Key,
    N: Link<K>,
    F: FnMut(&N) -> bool,
{
    iter(nodes, head).find(|(_, n)| pred(n)).map(|(k, _)| k)
}

/// Append `node` at the tail of the chain starting at `head`.
pub(crate) fn push_back<K: Key, N: Link<K>>(
    nodes: &mut SlotMap<K, N>,
    head: &mut Option<K>,
    node: N,
) -> K {
    debug_assert!(node.next().is_none(), "appended node must be detached");
    let tail = iter(nodes, *head).last().map(|(k, _)| k);
    let k = nodes.insert(node);
    match tail {
        None => *head = Some(k),
        Some(t) => nodes[t].set_next(Some(k)),
    }
    k
}

/// Unlink and return the first node matching `pred`.
///
/// Handles every position uniformly: a head node moves the head link to
/// its successor (or clears it), any other node reattaches its
/// predecessor to its successor (or terminates the chain there).
pub(crate) fn unlink<K, N, F>(nodes: &mut SlotMap<K, N>, head: &mut Option<K>, mut pred: F) -> Option<N>
where
    K: Key,
    N: Link<K>,
    F: FnMut(&N) -> bool,
{
    let mut prev: Option<K> = None;
    let mut cur = *head;
    while let Some(k) = cur {
        let node = nodes.get(k)?;
        if pred(node) {
            let next = node.next();
            match prev {
                None => *head = next,
                Some(p) => nodes[p].set_next(next),
            }
            let mut removed = nodes.remove(k)?;
            removed.set_next(None);
            return Some(removed);
        }
        prev = Some(k);
        cur = node.next();
    }
    None
}
