//! HNSW (Hierarchical Navigable Small World) vector index
//!
//! Approximate nearest-neighbor search over one embedding dimension. The
//! database keeps at most one graph per dimension; callers address vectors by
//! their external row id, while the graph wires dense internal ids.
//!
//! ## Algorithm
//!
//! Standard hierarchical-NSW construction with parameters `M` (connection cap
//! per layer) and `ef_construction` (build-time beam width). Layer assignment
//! draws from the exponential distribution `floor(-ln(U) / ln(M))`. Search
//! descends greedily from the top layer, then runs an `ef`-bounded beam
//! search on layer 0. Distance is cosine distance (lower = closer).
//!
//! ## Deletion
//!
//! Removing a node must not sever the graph: every pair of the node's former
//! neighbors is bridged with a bidirectional edge before the node's edges are
//! dropped, then neighbor lists are shrunk back to the layer cap by distance.
//! If the removed node was the entry point, the highest-layer survivor
//! (lowest internal id on ties) is promoted.
//!
//! ## Determinism
//!
//! Level assignment uses a SplitMix64 sequence over a fixed seed and a
//! monotonic counter, and neighbor sets are `BTreeSet`s, so identical insert
//! sequences produce identical graphs.

use crate::distance::cosine_distance;
use rustc_hash::FxHashMap;
use std::cmp::{Ordering, Reverse};
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use tessera_core::{Error, Result};

/// Dense node id used inside the graph
pub type InternalId = u64;

/// HNSW tuning parameters
#[derive(Debug, Clone)]
pub struct HnswConfig {
    /// Max connections per node per layer (layer 0 allows 2·M)
    pub m: usize,
    /// Beam width while building
    pub ef_construction: usize,
    /// Beam width while searching
    pub ef_search: usize,
    /// Level multiplier: 1/ln(M)
    ml: f64,
}

impl Default for HnswConfig {
    fn default() -> Self {
        Self::with_m(16, 200, 50)
    }
}

impl HnswConfig {
    /// Build a config from explicit parameters
    pub fn with_m(m: usize, ef_construction: usize, ef_search: usize) -> Self {
        HnswConfig {
            m,
            ef_construction,
            ef_search,
            ml: 1.0 / (m as f64).ln(),
        }
    }

    fn layer_cap(&self, layer: usize) -> usize {
        if layer == 0 {
            self.m * 2
        } else {
            self.m
        }
    }
}

#[derive(Debug, Clone)]
struct HnswNode {
    external_id: u64,
    embedding: Vec<f32>,
    /// neighbors[layer] = internal ids adjacent at that layer
    neighbors: Vec<BTreeSet<InternalId>>,
    max_layer: usize,
}

/// Scored candidate: orders by distance ascending, internal id as tie-break
#[derive(Debug, Clone, PartialEq)]
struct Scored {
    dist: f32,
    id: InternalId,
}

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> Ordering {
        // Natural ordering: larger distance = Greater, so
        // BinaryHeap<Scored> pops the worst result and
        // BinaryHeap<Reverse<Scored>> pops the nearest candidate.
        self.dist
            .total_cmp(&other.dist)
            .then_with(|| self.id.cmp(&other.id))
    }
}

/// SplitMix64 step, the deterministic PRNG behind level assignment
fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e3779b97f4a7c15);
    x = (x ^ (x >> 30)).wrapping_mul(0xbf58476d1ce4e5b9);
    x = (x ^ (x >> 27)).wrapping_mul(0x94d049bb133111eb);
    x ^ (x >> 31)
}

/// HNSW graph for one embedding dimension
#[derive(Debug)]
pub struct HnswIndex {
    dimension: usize,
    config: HnswConfig,
    /// BTreeMap for deterministic iteration during promotion and dumps
    nodes: BTreeMap<InternalId, HnswNode>,
    external_to_internal: FxHashMap<u64, InternalId>,
    entry_point: Option<InternalId>,
    max_level: usize,
    next_internal_id: InternalId,
    rng_seed: u64,
    rng_counter: u64,
}

impl HnswIndex {
    /// Create an empty graph for vectors of the given dimension
    pub fn new(dimension: usize, config: HnswConfig) -> Self {
        HnswIndex {
            dimension,
            config,
            nodes: BTreeMap::new(),
            external_to_internal: FxHashMap::default(),
            entry_point: None,
            max_level: 0,
            next_internal_id: 1,
            rng_seed: 42,
            rng_counter: 0,
        }
    }

    /// Embedding dimension served by this graph
    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of indexed vectors
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Whether the graph holds no vectors
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Internal id for an external row id
    pub fn get_internal_id(&self, external_id: u64) -> Option<InternalId> {
        self.external_to_internal.get(&external_id).copied()
    }

    /// Whether the external row id is indexed
    pub fn contains(&self, external_id: u64) -> bool {
        self.external_to_internal.contains_key(&external_id)
    }

    /// External ids with their embeddings, ascending by internal id
    pub fn entries(&self) -> impl Iterator<Item = (u64, &[f32])> + '_ {
        self.nodes
            .values()
            .map(|n| (n.external_id, n.embedding.as_slice()))
    }

    /// Index a vector under an external row id
    ///
    /// Re-inserting an already-indexed id replaces its vector: the old node
    /// is removed (with reconnection) and a fresh one inserted.
    pub fn insert(&mut self, vector: &[f32], external_id: u64) -> Result<InternalId> {
        if vector.len() != self.dimension {
            return Err(Error::type_mismatch(format!(
                "vector dimension {} does not match index dimension {}",
                vector.len(),
                self.dimension
            )));
        }
        if self.contains(external_id) {
            self.remove_node(external_id)?;
        }

        let internal = self.next_internal_id;
        self.next_internal_id += 1;
        self.external_to_internal.insert(external_id, internal);
        self.insert_into_graph(internal, external_id, vector.to_vec());
        Ok(internal)
    }

    /// Search for the `k` nearest vectors to `query`
    ///
    /// Returns `(external_id, distance)` pairs sorted by ascending distance.
    pub fn search(&self, query: &[f32], k: usize) -> Vec<(u64, f32)> {
        if k == 0 || query.len() != self.dimension {
            return Vec::new();
        }
        let entry = match self.entry_point {
            Some(id) => id,
            None => return Vec::new(),
        };

        let mut current = entry;
        if self.max_level > 0 {
            current = self.greedy_descend(query, entry, self.max_level, 1);
        }

        let ef = self.config.ef_search.max(k);
        self.search_layer(query, current, ef, 0)
            .into_iter()
            .take(k)
            .map(|s| (self.nodes[&s.id].external_id, s.dist))
            .collect()
    }

    /// Remove a vector from the graph, keeping its neighborhood connected
    pub fn remove_node(&mut self, external_id: u64) -> Result<()> {
        let internal = self
            .get_internal_id(external_id)
            .ok_or(Error::NodeNotFound { id: external_id })?;

        let node = match self.nodes.remove(&internal) {
            Some(n) => n,
            None => return Err(Error::NodeNotFound { id: external_id }),
        };

        for (layer, neighbor_set) in node.neighbors.iter().enumerate() {
            let neighbors: Vec<InternalId> = neighbor_set
                .iter()
                .copied()
                .filter(|&id| id != internal && self.nodes.contains_key(&id))
                .collect();

            // Bridge every pair of former neighbors so paths that ran
            // through the removed node survive.
            for i in 0..neighbors.len() {
                for j in (i + 1)..neighbors.len() {
                    self.add_edge(neighbors[i], neighbors[j], layer);
                }
            }

            for &neighbor in &neighbors {
                if let Some(n) = self.nodes.get_mut(&neighbor) {
                    if layer < n.neighbors.len() {
                        n.neighbors[layer].remove(&internal);
                    }
                }
                self.shrink_connections(neighbor, layer);
            }
        }

        self.external_to_internal.remove(&external_id);

        if self.entry_point == Some(internal) {
            self.promote_entry_point();
        } else if let Some(entry) = self.entry_point {
            self.max_level = self.nodes[&entry].max_layer;
        }
        Ok(())
    }

    // ========================================================================
    // Internal: level assignment
    // ========================================================================

    /// Exponential layer draw: floor(-ln(U) / ln(M))
    fn assign_level(&mut self) -> usize {
        self.rng_counter += 1;
        let hash = splitmix64(self.rng_seed.wrapping_add(self.rng_counter));
        let uniform = ((hash as f64) / (u64::MAX as f64)).max(1e-15);
        (-uniform.ln() * self.config.ml) as usize
    }

    // ========================================================================
    // Internal: graph operations
    // ========================================================================

    fn distance_to(&self, query: &[f32], id: InternalId) -> f32 {
        cosine_distance(query, &self.nodes[&id].embedding)
    }

    /// Add a bidirectional edge at `layer` if both endpoints participate
    ///
    /// A self-edge collapses to a single neighbor-set insertion; the sets own
    /// the dedup, so repeated adds are no-ops.
    fn add_edge(&mut self, a: InternalId, b: InternalId, layer: usize) {
        if a == b {
            if let Some(node) = self.nodes.get_mut(&a) {
                if layer < node.neighbors.len() {
                    node.neighbors[layer].insert(a);
                }
            }
            return;
        }
        let a_has_layer = self
            .nodes
            .get(&a)
            .map(|n| layer < n.neighbors.len())
            .unwrap_or(false);
        let b_has_layer = self
            .nodes
            .get(&b)
            .map(|n| layer < n.neighbors.len())
            .unwrap_or(false);
        if !a_has_layer || !b_has_layer {
            return;
        }
        if let Some(node) = self.nodes.get_mut(&a) {
            node.neighbors[layer].insert(b);
        }
        if let Some(node) = self.nodes.get_mut(&b) {
            node.neighbors[layer].insert(a);
        }
    }

    /// Trim a node's neighbor list at `layer` back to the layer cap,
    /// keeping the closest by distance (lowest id on ties)
    fn shrink_connections(&mut self, id: InternalId, layer: usize) {
        let cap = self.config.layer_cap(layer);

        let (embedding, over) = match self.nodes.get(&id) {
            Some(n) if layer < n.neighbors.len() && n.neighbors[layer].len() > cap => {
                (n.embedding.clone(), n.neighbors[layer].clone())
            }
            _ => return,
        };

        let mut scored: Vec<Scored> = over
            .iter()
            .filter(|&&nid| nid != id)
            .filter_map(|&nid| {
                self.nodes.get(&nid).map(|n| Scored {
                    dist: cosine_distance(&embedding, &n.embedding),
                    id: nid,
                })
            })
            .collect();
        scored.sort();

        let keep: BTreeSet<InternalId> = scored.into_iter().take(cap).map(|s| s.id).collect();
        if let Some(node) = self.nodes.get_mut(&id) {
            node.neighbors[layer] = keep;
        }
    }

    /// Beam search at one layer; results sorted by ascending distance
    fn search_layer(
        &self,
        query: &[f32],
        entry: InternalId,
        ef: usize,
        layer: usize,
    ) -> Vec<Scored> {
        let entry_dist = self.distance_to(query, entry);

        let mut visited: BTreeSet<InternalId> = BTreeSet::new();
        visited.insert(entry);

        // Candidates pop nearest-first; results keep the worst on top for
        // O(1) eviction.
        let mut candidates: BinaryHeap<Reverse<Scored>> = BinaryHeap::new();
        candidates.push(Reverse(Scored {
            dist: entry_dist,
            id: entry,
        }));
        let mut results: BinaryHeap<Scored> = BinaryHeap::new();
        results.push(Scored {
            dist: entry_dist,
            id: entry,
        });

        while let Some(Reverse(nearest)) = candidates.pop() {
            let worst = results.peek().map(|s| s.dist).unwrap_or(f32::INFINITY);
            if results.len() >= ef && nearest.dist > worst {
                break;
            }

            let node = match self.nodes.get(&nearest.id) {
                Some(n) => n,
                None => continue,
            };
            if layer >= node.neighbors.len() {
                continue;
            }
            for &neighbor in &node.neighbors[layer] {
                if !visited.insert(neighbor) {
                    continue;
                }
                let Some(neighbor_node) = self.nodes.get(&neighbor) else {
                    continue;
                };
                let dist = cosine_distance(query, &neighbor_node.embedding);
                let worst = results.peek().map(|s| s.dist).unwrap_or(f32::INFINITY);
                if results.len() < ef || dist < worst {
                    candidates.push(Reverse(Scored { dist, id: neighbor }));
                    results.push(Scored { dist, id: neighbor });
                    if results.len() > ef {
                        results.pop();
                    }
                }
            }
        }

        let mut out: Vec<Scored> = results.into_vec();
        out.sort();
        out
    }

    /// Greedy descent from `from_layer` down to `to_layer`
    fn greedy_descend(
        &self,
        query: &[f32],
        entry: InternalId,
        from_layer: usize,
        to_layer: usize,
    ) -> InternalId {
        let mut current = entry;
        for layer in (to_layer..=from_layer).rev() {
            loop {
                let mut best = Scored {
                    dist: self.distance_to(query, current),
                    id: current,
                };
                let node = match self.nodes.get(&current) {
                    Some(n) => n,
                    None => break,
                };
                if layer < node.neighbors.len() {
                    for &neighbor in &node.neighbors[layer] {
                        if let Some(n) = self.nodes.get(&neighbor) {
                            let candidate = Scored {
                                dist: cosine_distance(query, &n.embedding),
                                id: neighbor,
                            };
                            if candidate < best {
                                best = candidate;
                            }
                        }
                    }
                }
                if best.id == current {
                    break;
                }
                current = best.id;
            }
        }
        current
    }

    fn insert_into_graph(&mut self, internal: InternalId, external_id: u64, embedding: Vec<f32>) {
        let level = self.assign_level();
        let node = HnswNode {
            external_id,
            embedding: embedding.clone(),
            neighbors: (0..=level).map(|_| BTreeSet::new()).collect(),
            max_layer: level,
        };
        self.nodes.insert(internal, node);

        let entry = match self.entry_point {
            Some(id) => id,
            None => {
                self.entry_point = Some(internal);
                self.max_level = level;
                return;
            }
        };

        let mut current = entry;
        if self.max_level > level {
            current = self.greedy_descend(&embedding, entry, self.max_level, level + 1);
        }

        for layer in (0..=level.min(self.max_level)).rev() {
            let candidates =
                self.search_layer(&embedding, current, self.config.ef_construction, layer);

            let selected: Vec<InternalId> = candidates
                .iter()
                .filter(|s| s.id != internal)
                .take(self.config.m)
                .map(|s| s.id)
                .collect();

            for &neighbor in &selected {
                self.add_edge(internal, neighbor, layer);
            }
            for &neighbor in &selected {
                self.shrink_connections(neighbor, layer);
            }

            if let Some(closest) = candidates.first() {
                current = closest.id;
            }
        }

        if level > self.max_level {
            self.entry_point = Some(internal);
            self.max_level = level;
        }
    }

    /// Promote the highest-layer survivor (lowest internal id among ties)
    fn promote_entry_point(&mut self) {
        let mut best: Option<(InternalId, usize)> = None;
        for (&id, node) in &self.nodes {
            match best {
                Some((_, layer)) if node.max_layer <= layer => {}
                _ => best = Some((id, node.max_layer)),
            }
        }
        match best {
            Some((id, layer)) => {
                self.entry_point = Some(id);
                self.max_level = layer;
            }
            None => {
                self.entry_point = None;
                self.max_level = 0;
            }
        }
    }

    // ========================================================================
    // Dump / load
    // ========================================================================

    /// Serialize the full graph state to bytes (little-endian)
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::new();

        match self.entry_point {
            Some(id) => {
                data.push(1u8);
                data.extend_from_slice(&id.to_le_bytes());
            }
            None => data.push(0u8),
        }
        data.extend_from_slice(&(self.max_level as u64).to_le_bytes());
        data.extend_from_slice(&self.next_internal_id.to_le_bytes());
        data.extend_from_slice(&self.rng_seed.to_le_bytes());
        data.extend_from_slice(&self.rng_counter.to_le_bytes());

        data.extend_from_slice(&(self.nodes.len() as u64).to_le_bytes());
        for (&internal, node) in &self.nodes {
            data.extend_from_slice(&internal.to_le_bytes());
            data.extend_from_slice(&node.external_id.to_le_bytes());
            data.extend_from_slice(&(node.max_layer as u64).to_le_bytes());
            for value in &node.embedding {
                data.extend_from_slice(&value.to_le_bytes());
            }
            data.extend_from_slice(&(node.neighbors.len() as u64).to_le_bytes());
            for layer in &node.neighbors {
                data.extend_from_slice(&(layer.len() as u64).to_le_bytes());
                for &neighbor in layer {
                    data.extend_from_slice(&neighbor.to_le_bytes());
                }
            }
        }
        data
    }

    /// Rebuild a graph from bytes produced by [`HnswIndex::to_bytes`]
    pub fn from_bytes(dimension: usize, config: HnswConfig, data: &[u8]) -> Result<Self> {
        let mut pos = 0usize;

        let read_u8 = |pos: &mut usize| -> Result<u8> {
            let v = *data
                .get(*pos)
                .ok_or_else(|| Error::corruption("truncated vector index dump"))?;
            *pos += 1;
            Ok(v)
        };
        let read_u64 = |pos: &mut usize| -> Result<u64> {
            let end = *pos + 8;
            let bytes: [u8; 8] = data
                .get(*pos..end)
                .ok_or_else(|| Error::corruption("truncated vector index dump"))?
                .try_into()
                .map_err(|_| Error::corruption("truncated vector index dump"))?;
            *pos = end;
            Ok(u64::from_le_bytes(bytes))
        };
        let read_f32 = |pos: &mut usize| -> Result<f32> {
            let end = *pos + 4;
            let bytes: [u8; 4] = data
                .get(*pos..end)
                .ok_or_else(|| Error::corruption("truncated vector index dump"))?
                .try_into()
                .map_err(|_| Error::corruption("truncated vector index dump"))?;
            *pos = end;
            Ok(f32::from_le_bytes(bytes))
        };

        let mut index = HnswIndex::new(dimension, config);

        let has_entry = read_u8(&mut pos)?;
        index.entry_point = if has_entry == 1 {
            Some(read_u64(&mut pos)?)
        } else {
            None
        };
        index.max_level = read_u64(&mut pos)? as usize;
        index.next_internal_id = read_u64(&mut pos)?;
        index.rng_seed = read_u64(&mut pos)?;
        index.rng_counter = read_u64(&mut pos)?;

        let node_count = read_u64(&mut pos)? as usize;
        for _ in 0..node_count {
            let internal = read_u64(&mut pos)?;
            let external_id = read_u64(&mut pos)?;
            let max_layer = read_u64(&mut pos)? as usize;

            let mut embedding = Vec::with_capacity(dimension);
            for _ in 0..dimension {
                embedding.push(read_f32(&mut pos)?);
            }

            let layer_count = read_u64(&mut pos)? as usize;
            let mut neighbors = Vec::with_capacity(layer_count);
            for _ in 0..layer_count {
                let neighbor_count = read_u64(&mut pos)? as usize;
                let mut layer = BTreeSet::new();
                for _ in 0..neighbor_count {
                    layer.insert(read_u64(&mut pos)?);
                }
                neighbors.push(layer);
            }

            index.external_to_internal.insert(external_id, internal);
            index.nodes.insert(
                internal,
                HnswNode {
                    external_id,
                    embedding,
                    neighbors,
                    max_layer,
                },
            );
        }

        Ok(index)
    }
}
