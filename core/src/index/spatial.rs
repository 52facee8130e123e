//! Spatial index: z-order cell coverage over (latitude, longitude) points.
//!
//! A point is quantized at each configured level into an interleaved-bit cell
//! id and emitted as `S/I/<name>/<level>/<cell>/<id…>`. Queries cover a
//! bounding box with cells at the finest level whose cover stays within a
//! bounded cell count, then post-filter exact coordinates.

use super::{IndexContext, IndexMaintainer};
use crate::error::{Error, Result};
use crate::schema::RecordValues;
use crate::subspace::Subspace;
use crate::transaction::Transaction;
use crate::value::Value;
use async_trait::async_trait;
use lamina_kv::RangeOptions;
use std::collections::BTreeSet;

/// Covers larger than this fall back to a coarser level.
const MAX_COVER_CELLS: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Self { Self { lat, lng } }
}

fn quantize(value: f64, min: f64, max: f64, level: u8) -> u32 {
    let cells = 1u64 << level;
    let normalized = ((value - min) / (max - min)).clamp(0.0, 1.0);
    ((normalized * cells as f64) as u64).min(cells - 1) as u32
}

fn interleave(x: u32, y: u32, level: u8) -> u64 {
    let mut cell = 0u64;
    for bit in (0..level).rev() {
        cell = (cell << 2) | (((y >> bit) & 1) as u64) << 1 | ((x >> bit) & 1) as u64;
    }
    cell
}

/// Cell id of a point at `level`.
pub fn cell_of(point: Point, level: u8) -> u64 {
    let x = quantize(point.lng, -180.0, 180.0, level);
    let y = quantize(point.lat, -90.0, 90.0, level);
    interleave(x, y, level)
}

/// Cells covering a bounding box at `level`; `None` when the cover exceeds
/// the cell budget and a coarser level should be used.
pub fn cover_bbox(min: Point, max: Point, level: u8) -> Option<Vec<u64>> {
    let x0 = quantize(min.lng, -180.0, 180.0, level);
    let x1 = quantize(max.lng, -180.0, 180.0, level);
    let y0 = quantize(min.lat, -90.0, 90.0, level);
    let y1 = quantize(max.lat, -90.0, 90.0, level);
    let count = (x1 - x0 + 1) as usize * (y1 - y0 + 1) as usize;
    if count > MAX_COVER_CELLS {
        return None;
    }
    let mut cells = Vec::with_capacity(count);
    for y in y0..=y1 {
        for x in x0..=x1 {
            cells.push(interleave(x, y, level));
        }
    }
    Some(cells)
}

pub struct SpatialMaintainer;

impl SpatialMaintainer {
    fn point_of(ctx: &IndexContext<'_>, record: &RecordValues) -> Option<Point> {
        let lat = record.get_or_null(&ctx.index.key_paths[0]).as_float()?;
        let lng = record.get_or_null(&ctx.index.key_paths[1]).as_float()?;
        Some(Point::new(lat, lng))
    }

    fn keys_for(ctx: &IndexContext<'_>, id: &[Value], point: Point) -> Result<BTreeSet<Vec<u8>>> {
        let space = ctx.index_space()?;
        let mut keys = BTreeSet::new();
        for &level in &ctx.index.config.spatial_levels {
            let mut elements = vec![Value::Int(level as i64), Value::Int(cell_of(point, level) as i64)];
            elements.extend_from_slice(id);
            keys.insert(space.pack(&elements)?);
        }
        Ok(keys)
    }
}

#[async_trait]
impl IndexMaintainer for SpatialMaintainer {
    async fn update(&self, ctx: &IndexContext<'_>, id: &[Value], old: Option<&RecordValues>, new: Option<&RecordValues>) -> Result<()> {
        let old_keys = match old.and_then(|record| Self::point_of(ctx, record)) {
            Some(point) => Self::keys_for(ctx, id, point)?,
            None => BTreeSet::new(),
        };
        let new_keys = match new.and_then(|record| Self::point_of(ctx, record)) {
            Some(point) => Self::keys_for(ctx, id, point)?,
            None => BTreeSet::new(),
        };
        for key in old_keys.difference(&new_keys) {
            ctx.txn.clear(key)?;
        }
        for key in new_keys.difference(&old_keys) {
            ctx.txn.set(key, &[])?;
        }
        Ok(())
    }

    fn expected_keys(&self, ctx: &IndexContext<'_>, id: &[Value], record: &RecordValues) -> Result<BTreeSet<Vec<u8>>> {
        match Self::point_of(ctx, record) {
            Some(point) => Self::keys_for(ctx, id, point),
            None => Ok(BTreeSet::new()),
        }
    }
}

/// Candidate ids whose indexed point falls in a cell covering the box. The
/// cover is approximate: callers post-filter against exact coordinates.
pub async fn search_bbox(
    txn: &Transaction,
    container: &Subspace,
    index_name: &str,
    levels: &[u8],
    min: Point,
    max: Point,
) -> Result<Vec<Vec<Value>>> {
    let space = container.subspace(&[Value::from("I"), Value::from(index_name)])?;

    // Finest configured level whose cover fits the budget.
    let mut chosen: Option<(u8, Vec<u64>)> = None;
    let mut sorted: Vec<u8> = levels.to_vec();
    sorted.sort_unstable_by(|a, b| b.cmp(a));
    for level in sorted {
        if let Some(cells) = cover_bbox(min, max, level) {
            chosen = Some((level, cells));
            break;
        }
    }
    let (level, cells) = chosen.ok_or_else(|| Error::InvalidQuery("bounding box too large for configured spatial levels".into()))?;

    let mut out = BTreeSet::new();
    for cell in cells {
        let cell_space = space.subspace(&[Value::Int(level as i64), Value::Int(cell as i64)])?;
        let (begin, end) = cell_space.range();
        for entry in txn.get_range(&begin, &end, RangeOptions::default()).await? {
            out.insert(cell_space.unpack(&entry.key)?);
        }
    }
    Ok(out.into_iter().collect())
}
