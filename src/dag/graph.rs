//! Generic directed graph with an acyclicity check.
//!
//! Nodes are keyed by `K` and may carry a weight `V`. Weights are optional so
//! topology can be built from identifiers first and payloads attached later.
//! Children keep insertion order; that order is the enumeration order used by
//! every lookup built on top of this type.

use std::collections::{HashMap, VecDeque};
use std::hash::Hash;

#[derive(Debug, Clone)]
struct Slot<K, V> {
    weight: Option<V>,
    parents: Vec<K>,
    children: Vec<K>,
}

impl<K, V> Default for Slot<K, V> {
    fn default() -> Self {
        Self {
            weight: None,
            parents: Vec::new(),
            children: Vec::new(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Dag<K, V> {
    slots: HashMap<K, Slot<K, V>>,
    order: Vec<K>,
}

impl<K, V> Default for Dag<K, V> {
    fn default() -> Self {
        Self {
            slots: HashMap::new(),
            order: Vec::new(),
        }
    }
}

impl<K: Clone + Eq + Hash, V> Dag<K, V> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    pub fn contains(&self, key: &K) -> bool {
        self.slots.contains_key(key)
    }

    /// Add a node without a weight. Returns false if it already existed.
    pub fn add_node(&mut self, key: K) -> bool {
        if self.slots.contains_key(&key) {
            return false;
        }
        self.order.push(key.clone());
        self.slots.insert(key, Slot::default());
        true
    }

    /// Add `from -> to`, creating either endpoint if missing.
    pub fn add_edge(&mut self, from: K, to: K) {
        self.add_node(from.clone());
        self.add_node(to.clone());
        if let Some(slot) = self.slots.get_mut(&from) {
            if slot.children.contains(&to) {
                return;
            }
            slot.children.push(to.clone());
        }
        if let Some(slot) = self.slots.get_mut(&to) {
            slot.parents.push(from);
        }
    }

    /// Remove a node and all incident edges, returning its weight.
    pub fn remove_node(&mut self, key: &K) -> Option<V> {
        let slot = self.slots.remove(key)?;
        self.order.retain(|k| k != key);
        for parent in &slot.parents {
            if let Some(p) = self.slots.get_mut(parent) {
                p.children.retain(|k| k != key);
            }
        }
        for child in &slot.children {
            if let Some(c) = self.slots.get_mut(child) {
                c.parents.retain(|k| k != key);
            }
        }
        slot.weight
    }

    /// Attach a weight to an existing node. Returns false if the node is absent.
    pub fn set_weight(&mut self, key: &K, weight: V) -> bool {
        match self.slots.get_mut(key) {
            Some(slot) => {
                slot.weight = Some(weight);
                true
            }
            None => false,
        }
    }

    pub fn weight(&self, key: &K) -> Option<&V> {
        self.slots.get(key).and_then(|s| s.weight.as_ref())
    }

    pub fn weight_mut(&mut self, key: &K) -> Option<&mut V> {
        self.slots.get_mut(key).and_then(|s| s.weight.as_mut())
    }

    pub fn children(&self, key: &K) -> &[K] {
        self.slots.get(key).map(|s| s.children.as_slice()).unwrap_or(&[])
    }

    pub fn parents(&self, key: &K) -> &[K] {
        self.slots.get(key).map(|s| s.parents.as_slice()).unwrap_or(&[])
    }

    /// Node keys in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &K> {
        self.order.iter()
    }

    /// Nodes without inbound edges, in insertion order.
    pub fn roots(&self) -> Vec<&K> {
        self.order
            .iter()
            .filter(|k| self.parents(k).is_empty())
            .collect()
    }

    /// Nodes a topological sort cannot place (Kahn's algorithm).
    ///
    /// Empty iff the graph is acyclic. Otherwise contains every node on a
    /// cycle plus anything reachable only through one.
    pub fn unsorted_nodes(&self) -> Vec<&K> {
        let mut in_degree: HashMap<&K, usize> = self
            .order
            .iter()
            .map(|k| (k, self.parents(k).len()))
            .collect();
        let mut ready: VecDeque<&K> = self
            .order
            .iter()
            .filter(|k| in_degree.get(k) == Some(&0))
            .collect();

        while let Some(key) = ready.pop_front() {
            for child in self.children(key) {
                if let Some(degree) = in_degree.get_mut(child) {
                    *degree -= 1;
                    if *degree == 0 {
                        ready.push_back(child);
                    }
                }
            }
        }

        self.order
            .iter()
            .filter(|k| in_degree.get(k).is_some_and(|d| *d > 0))
            .collect()
    }

    pub fn is_acyclic(&self) -> bool {
        self.unsorted_nodes().is_empty()
    }
}
