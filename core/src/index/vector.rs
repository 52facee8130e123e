//! Vector index: brute-force flat scan or a persistent HNSW proximity graph.
//!
//! Layout under `S/I/<name>`:
//!
//! ```text
//! V/<id…>          -> vector bytes (f32 little-endian)
//! E                -> entry point (element bytes, top level)
//! G/<level>/<id…>  -> neighbor list (bincode Vec of element bytes)
//! X/<id…>          -> tombstone
//! ```
//!
//! Inserts descend from the entry point greedily, then connect to the M
//! nearest candidates per layer. Deletes tombstone the node; tombstoned nodes
//! still route traversals but are never returned and are skipped as new
//! neighbors.

use super::{IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::index::{VectorMetric, VectorMode, VectorOptions};
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::tuple;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::RangeOptions;
use std::cmp::Reverse;
use std::collections::{BTreeSet, BinaryHeap, HashSet};

const MAX_GRAPH_LEVEL: usize = 5;

fn decode_vector(raw: &[u8], dimensions: usize) -> Result<Vec<f32>> {
    if raw.len() != dimensions * 4 {
        return Err(Error::UnsupportedType(format!("vector of {} bytes does not hold {dimensions} f32 components", raw.len())));
    }
    Ok(raw.chunks_exact(4).map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]])).collect())
}

pub fn encode_vector(components: &[f32]) -> Vec<u8> {
    components.iter().flat_map(|c| c.to_le_bytes()).collect()
}

fn distance(metric: VectorMetric, a: &[f32], b: &[f32]) -> f64 {
    match metric {
        VectorMetric::L2 => a.iter().zip(b).map(|(x, y)| ((x - y) as f64).powi(2)).sum(),
        VectorMetric::Dot => -a.iter().zip(b).map(|(x, y)| (x * y) as f64).sum::<f64>(),
        VectorMetric::Cosine => {
            let dot: f64 = a.iter().zip(b).map(|(x, y)| (x * y) as f64).sum();
            let norm_a: f64 = a.iter().map(|x| (x * x) as f64).sum::<f64>().sqrt();
            let norm_b: f64 = b.iter().map(|x| (x * x) as f64).sum::<f64>().sqrt();
            if norm_a == 0.0 || norm_b == 0.0 {
                return 1.0;
            }
            1.0 - dot / (norm_a * norm_b)
        }
    }
}

/// Ordered distance/element pair for heaps.
#[derive(PartialEq)]
struct Scored(f64, Vec<u8>);

impl Eq for Scored {}

impl PartialOrd for Scored {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> { Some(self.cmp(other)) }
}

impl Ord for Scored {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering { self.0.total_cmp(&other.0).then_with(|| self.1.cmp(&other.1)) }
}

struct Graph<'a> {
    txn: &'a Transaction,
    space: Subspace,
    options: VectorOptions,
}

impl<'a> Graph<'a> {
    fn new(txn: &'a Transaction, space: Subspace, options: VectorOptions) -> Self { Self { txn, space, options } }

    fn vector_key(&self, element: &[u8]) -> Result<Vec<u8>> {
        let mut key = self.space.subspace(&[Value::from("V")])?.prefix().to_vec();
        key.extend_from_slice(element);
        Ok(key)
    }

    fn neighbor_key(&self, level: usize, element: &[u8]) -> Result<Vec<u8>> {
        let mut key = self.space.subspace(&[Value::from("G"), Value::Int(level as i64)])?.prefix().to_vec();
        key.extend_from_slice(element);
        Ok(key)
    }

    fn tombstone_key(&self, element: &[u8]) -> Result<Vec<u8>> {
        let mut key = self.space.subspace(&[Value::from("X")])?.prefix().to_vec();
        key.extend_from_slice(element);
        Ok(key)
    }

    fn entry_key(&self) -> Result<Vec<u8>> { self.space.pack_one(&Value::from("E")) }

    async fn entry_point(&self) -> Result<Option<(Vec<u8>, usize)>> {
        match self.txn.get(&self.entry_key()?).await? {
            Some(raw) => {
                let (element, level): (Vec<u8>, u8) = bincode::deserialize(&raw)?;
                Ok(Some((element, level as usize)))
            }
            None => Ok(None),
        }
    }

    async fn vector_of(&self, element: &[u8]) -> Result<Option<Vec<f32>>> {
        match self.txn.get(&self.vector_key(element)?).await? {
            Some(raw) => Ok(Some(decode_vector(&raw, self.options.dimensions)?)),
            None => Ok(None),
        }
    }

    async fn neighbors(&self, level: usize, element: &[u8]) -> Result<Vec<Vec<u8>>> {
        match self.txn.get(&self.neighbor_key(level, element)?).await? {
            Some(raw) => Ok(bincode::deserialize(&raw)?),
            None => Ok(Vec::new()),
        }
    }

    async fn is_tombstoned(&self, element: &[u8]) -> Result<bool> {
        Ok(self.txn.get_snapshot(&self.tombstone_key(element)?).await?.is_some())
    }

    fn set_neighbors(&self, level: usize, element: &[u8], neighbors: &[Vec<u8>]) -> Result<()> {
        self.txn.set(&self.neighbor_key(level, element)?, &bincode::serialize(&neighbors)?)
    }

    fn hnsw(&self) -> (usize, usize, usize) {
        match &self.options.mode {
            VectorMode::Hnsw { m, ef_construction, ef_search } => (*m, *ef_construction, *ef_search),
            VectorMode::Flat => (16, 64, 32),
        }
    }

    fn draw_level(&self) -> usize {
        let (m, _, _) = self.hnsw();
        let ml = 1.0 / (m.max(2) as f64).ln();
        ((-rand::random::<f64>().max(f64::MIN_POSITIVE).ln() * ml) as usize).min(MAX_GRAPH_LEVEL)
    }

    /// Best-first expansion on one layer; returns up to `ef` closest
    /// elements, closest first.
    async fn search_layer(&self, query: &[f32], seeds: Vec<Scored>, ef: usize, level: usize) -> Result<Vec<Scored>> {
        let mut visited: HashSet<Vec<u8>> = seeds.iter().map(|s| s.1.clone()).collect();
        let mut frontier: BinaryHeap<Reverse<Scored>> = seeds.iter().map(|s| Reverse(Scored(s.0, s.1.clone()))).collect();
        let mut best: BinaryHeap<Scored> = seeds.into_iter().collect();

        while let Some(Reverse(candidate)) = frontier.pop() {
            let worst = best.peek().map(|s| s.0).unwrap_or(f64::INFINITY);
            if best.len() >= ef && candidate.0 > worst {
                break;
            }
            for neighbor in self.neighbors(level, &candidate.1).await? {
                if !visited.insert(neighbor.clone()) {
                    continue;
                }
                let vector = match self.vector_of(&neighbor).await? {
                    Some(vector) => vector,
                    None => continue,
                };
                let d = distance(self.options.metric, query, &vector);
                let worst = best.peek().map(|s| s.0).unwrap_or(f64::INFINITY);
                if best.len() < ef || d < worst {
                    frontier.push(Reverse(Scored(d, neighbor.clone())));
                    best.push(Scored(d, neighbor));
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }
        Ok(best.into_sorted_vec())
    }

    async fn insert(&self, element: &[u8], vector: &[f32]) -> Result<()> {
        let (m, ef_construction, _) = self.hnsw();
        self.txn.set(&self.vector_key(element)?, &encode_vector(vector))?;
        self.txn.clear(&self.tombstone_key(element)?)?;

        let node_level = self.draw_level();
        let entry = match self.entry_point().await? {
            Some(entry) => entry,
            None => {
                for level in 0..=node_level {
                    self.set_neighbors(level, element, &[])?;
                }
                let encoded = bincode::serialize(&(element.to_vec(), node_level as u8))?;
                return self.txn.set(&self.entry_key()?, &encoded);
            }
        };

        let (entry_element, entry_level) = entry;
        let entry_vector = self
            .vector_of(&entry_element)
            .await?
            .ok_or_else(|| Error::corrupt("vector graph entry point has no vector"))?;
        let mut seeds = vec![Scored(distance(self.options.metric, vector, &entry_vector), entry_element.clone())];

        // Greedy single-path descent through the layers above the node.
        for level in ((node_level + 1)..=entry_level).rev() {
            seeds = self.search_layer(vector, seeds, 1, level).await?;
        }

        for level in (0..=node_level.min(entry_level)).rev() {
            let candidates = self.search_layer(vector, seeds, ef_construction, level).await?;
            let max_degree = if level == 0 { m * 2 } else { m };

            let mut chosen = Vec::with_capacity(m);
            for candidate in &candidates {
                if candidate.1 != element && !self.is_tombstoned(&candidate.1).await? {
                    chosen.push(candidate.1.clone());
                    if chosen.len() == m {
                        break;
                    }
                }
            }
            self.set_neighbors(level, element, &chosen)?;

            // Back-links, pruned to the layer's degree bound by distance.
            for neighbor in &chosen {
                let mut links = self.neighbors(level, neighbor).await?;
                if links.iter().any(|l| l == element) {
                    continue;
                }
                links.push(element.to_vec());
                if links.len() > max_degree {
                    let neighbor_vector = self
                        .vector_of(neighbor)
                        .await?
                        .ok_or_else(|| Error::corrupt("graph neighbor has no vector"))?;
                    let mut scored = Vec::with_capacity(links.len());
                    for link in links {
                        let link_vector =
                            self.vector_of(&link).await?.ok_or_else(|| Error::corrupt("graph link has no vector"))?;
                        scored.push(Scored(distance(self.options.metric, &neighbor_vector, &link_vector), link));
                    }
                    scored.sort();
                    scored.truncate(max_degree);
                    links = scored.into_iter().map(|s| s.1).collect();
                }
                self.set_neighbors(level, neighbor, &links)?;
            }

            seeds = candidates;
        }

        if node_level > entry_level {
            for level in (entry_level + 1)..=node_level {
                self.set_neighbors(level, element, &[])?;
            }
            let encoded = bincode::serialize(&(element.to_vec(), node_level as u8))?;
            self.txn.set(&self.entry_key()?, &encoded)?;
        }
        Ok(())
    }

    async fn search(&self, query: &[f32], k: usize) -> Result<Vec<(f64, Vec<u8>)>> {
        let (_, _, ef_search) = self.hnsw();
        let (entry_element, entry_level) = match self.entry_point().await? {
            Some(entry) => entry,
            None => return Ok(Vec::new()),
        };
        let entry_vector = match self.vector_of(&entry_element).await? {
            Some(vector) => vector,
            None => return Ok(Vec::new()),
        };
        let mut seeds = vec![Scored(distance(self.options.metric, query, &entry_vector), entry_element)];
        for level in (1..=entry_level).rev() {
            seeds = self.search_layer(query, seeds, 1, level).await?;
        }
        let found = self.search_layer(query, seeds, ef_search.max(k), 0).await?;

        let mut out = Vec::with_capacity(k);
        for Scored(d, element) in found {
            if !self.is_tombstoned(&element).await? {
                out.push((d, element));
                if out.len() == k {
                    break;
                }
            }
        }
        Ok(out)
    }
}

pub struct VectorMaintainer;

impl VectorMaintainer {
    fn options(ctx: &IndexContext<'_>) -> Result<VectorOptions> {
        ctx.index.config.vector.clone().ok_or_else(|| Error::Schema(format!("vector index {} has no options", ctx.index.name)))
    }

    fn vector_bytes(ctx: &IndexContext<'_>, record: &RecordValues) -> Option<Vec<u8>> {
        record.get_or_null(&ctx.index.key_paths[0]).as_bytes().map(|b| b.to_vec())
    }
}

#[async_trait]
impl IndexMaintainer for VectorMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let options = Self::options(ctx)?;
        let space = ctx.index_space()?;
        let element = tuple::pack(id)?;
        let old_bytes = old.and_then(|record| Self::vector_bytes(ctx, record));
        let new_bytes = new.and_then(|record| Self::vector_bytes(ctx, record));
        if old_bytes == new_bytes {
            return Ok(());
        }

        match options.mode {
            VectorMode::Flat => {
                let graph = Graph::new(ctx.txn, space, options);
                match new_bytes {
                    Some(bytes) => {
                        let vector = decode_vector(&bytes, graph.options.dimensions)?;
                        graph.txn.set(&graph.vector_key(&element)?, &encode_vector(&vector))
                    }
                    None => graph.txn.clear(&graph.vector_key(&element)?),
                }
            }
            VectorMode::Hnsw { .. } => {
                let graph = Graph::new(ctx.txn, space, options);
                match new_bytes {
                    Some(bytes) => {
                        let vector = decode_vector(&bytes, graph.options.dimensions)?;
                        graph.insert(&element, &vector).await
                    }
                    None => graph.txn.set(&graph.tombstone_key(&element)?, &[]),
                }
            }
        }
    }

    fn expected_keys(&self, ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        if Self::vector_bytes(ctx, record).is_none() {
            return Ok(BTreeSet::new());
        }
        let space = ctx.index_space()?;
        let mut key = space.subspace(&[Value::from("V")])?.prefix().to_vec();
        key.extend(tuple::pack(id)?);
        Ok(BTreeSet::from([key]))
    }
}

/// Nearest-neighbor query over a vector index; `(distance, id)` pairs,
/// closest first.
pub async fn nearest(
    txn: &Transaction,
    container: &Subspace,
    index_name: &str,
    options: &VectorOptions,
    query: &[f32],
    k: usize,
) -> Result<Vec<(f64, Vec<Value>)>> {
    if query.len() != options.dimensions {
        return Err(Error::InvalidQuery(format!("query vector has {} dimensions, index expects {}", query.len(), options.dimensions)));
    }
    let space = container.subspace(&[Value::from("I"), Value::from(index_name)])?;

    let raw = match options.mode {
        VectorMode::Flat => {
            let vector_space = space.subspace(&[Value::from("V")])?;
            let (begin, end) = vector_space.range();
            let mut heap: BinaryHeap<Scored> = BinaryHeap::new();
            for entry in txn.get_range(&begin, &end, RangeOptions::default()).await? {
                let vector = decode_vector(&entry.value, options.dimensions)?;
                let d = distance(options.metric, query, &vector);
                heap.push(Scored(d, entry.key[vector_space.prefix().len()..].to_vec()));
                if heap.len() > k {
                    heap.pop();
                }
            }
            heap.into_sorted_vec().into_iter().map(|s| (s.0, s.1)).collect::<Vec<_>>()
        }
        VectorMode::Hnsw { .. } => Graph::new(txn, space, options.clone()).search(query, k).await?,
    };

    raw.into_iter().map(|(d, element)| tuple::unpack(&element).map(|id| (d, id))).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::index::{IndexConfig, IndexDescriptor, IndexKind};
    use crate::schema::{FieldKind, TypeDescriptor};
    use crate::transaction::Database;
    use lamina_kv::memory::MemoryKv;
    use std::sync::Arc;

    fn options(mode: VectorMode) -> VectorOptions { VectorOptions { dimensions: 3, metric: VectorMetric::L2, mode } }

    fn descriptor(mode: VectorMode) -> TypeDescriptor {
        TypeDescriptor::new("Item")
            .field("id", FieldKind::String)
            .field("embedding", FieldKind::Bytes)
            .primary_key(["id"])
            .index(IndexDescriptor::new("Item_vec", IndexKind::Vector, ["embedding"]).with_config(IndexConfig {
                vector: Some(options(mode)),
                ..IndexConfig::default()
            }))
    }

    fn item(id: &str, v: [f32; 3]) -> RecordValues {
        RecordValues::from_pairs([("id", Value::from(id)), ("embedding", Value::Bytes(encode_vector(&v)))])
    }

    async fn apply(db: &Database, mode: VectorMode, old: Option<RecordValues>, new: Option<RecordValues>, id: &str) {
        let descriptor = descriptor(mode);
        let id = vec![Value::from(id)];
        db.run(|txn| {
            let (descriptor, id, old, new) = (descriptor.clone(), id.clone(), old.clone(), new.clone());
            async move {
                let container = Subspace::from_elements(&[Value::from("vx")])?;
                let ctx = IndexContext { txn: &txn, container: &container, descriptor: &descriptor, index: &descriptor.indexes[0] };
                VectorMaintainer.update(&ctx, &id, old.as_ref(), new.as_ref()).await
            }
        })
        .await
        .unwrap();
    }

    async fn query(db: &Database, mode: VectorMode, q: [f32; 3], k: usize) -> Vec<Value> {
        db.run(|txn| {
            let options = options(mode.clone());
            async move {
                let container = Subspace::from_elements(&[Value::from("vx")])?;
                let found = nearest(&txn, &container, "Item_vec", &options, &q, k).await?;
                Ok(found.into_iter().map(|(_, mut id)| id.remove(0)).collect::<Vec<_>>())
            }
        })
        .await
        .unwrap()
    }

    #[tokio::test]
    async fn flat_scan_finds_exact_nearest() {
        let db = Database::new(Arc::new(MemoryKv::new()));
        apply(&db, VectorMode::Flat, None, Some(item("a", [0.0, 0.0, 0.0])), "a").await;
        apply(&db, VectorMode::Flat, None, Some(item("b", [1.0, 0.0, 0.0])), "b").await;
        apply(&db, VectorMode::Flat, None, Some(item("c", [5.0, 5.0, 5.0])), "c").await;

        let found = query(&db, VectorMode::Flat, [0.9, 0.1, 0.0], 2).await;
        assert_eq!(found, vec![Value::from("b"), Value::from("a")]);
    }

    #[tokio::test]
    async fn flat_delete_removes_candidate() {
        let db = Database::new(Arc::new(MemoryKv::new()));
        apply(&db, VectorMode::Flat, None, Some(item("a", [0.0, 0.0, 0.0])), "a").await;
        apply(&db, VectorMode::Flat, Some(item("a", [0.0, 0.0, 0.0])), None, "a").await;
        assert!(query(&db, VectorMode::Flat, [0.0, 0.0, 0.0], 1).await.is_empty());
    }

    fn hnsw() -> VectorMode { VectorMode::Hnsw { m: 4, ef_construction: 16, ef_search: 16 } }

    #[tokio::test]
    async fn hnsw_recalls_true_neighbors() {
        let db = Database::new(Arc::new(MemoryKv::new()));
        // A small grid of points; exact search is unambiguous.
        let mut points = Vec::new();
        for x in 0..4 {
            for y in 0..4 {
                points.push((format!("p{x}_{y}"), [x as f32, y as f32, 0.0]));
            }
        }
        for (id, v) in &points {
            apply(&db, hnsw(), None, Some(item(id, *v)), id).await;
        }

        let found = query(&db, hnsw(), [2.1, 1.9, 0.0], 1).await;
        assert_eq!(found, vec![Value::from("p2_2")]);

        let found = query(&db, hnsw(), [0.0, 0.1, 0.0], 3).await;
        assert!(found.contains(&Value::from("p0_0")));
    }

    #[tokio::test]
    async fn hnsw_tombstoned_nodes_are_not_returned() {
        let db = Database::new(Arc::new(MemoryKv::new()));
        apply(&db, hnsw(), None, Some(item("a", [0.0, 0.0, 0.0])), "a").await;
        apply(&db, hnsw(), None, Some(item("b", [2.0, 0.0, 0.0])), "b").await;
        apply(&db, hnsw(), Some(item("a", [0.0, 0.0, 0.0])), None, "a").await;

        let found = query(&db, hnsw(), [0.0, 0.0, 0.0], 2).await;
        assert_eq!(found, vec![Value::from("b")]);
    }
}
