//! Geometric index over [`Point`] fields: an STR-packed rectangle tree
//! rebuilt at commit, with a linear fallback while dirty. Serves `DWithin`
//! as an index hit; `nearest` exists for the k-NN surface.

use super::{IndexDef, IndexMemStat, SelectKeyResult, SelectOpts};
use crate::ctx::Context;
use crate::idset::{IdSet, RowId};
use crate::query::CondType;
use crate::types::{Point, Variant, VariantArray};
use eyre::Result;

const LEAF_CAPACITY: usize = 16;

#[derive(Debug, Clone)]
struct Rect {
    min_x: f64,
    min_y: f64,
    max_x: f64,
    max_y: f64,
}

impl Rect {
    fn of(points: &[(Point, RowId)]) -> Rect {
        let mut r = Rect {
            min_x: f64::INFINITY,
            min_y: f64::INFINITY,
            max_x: f64::NEG_INFINITY,
            max_y: f64::NEG_INFINITY,
        };
        for (p, _) in points {
            r.min_x = r.min_x.min(p.x);
            r.min_y = r.min_y.min(p.y);
            r.max_x = r.max_x.max(p.x);
            r.max_y = r.max_y.max(p.y);
        }
        r
    }

    fn merge(&mut self, other: &Rect) {
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    /// Squared distance from `center` to the nearest rect point.
    fn dist2(&self, center: &Point) -> f64 {
        let dx = (self.min_x - center.x).max(0.0).max(center.x - self.max_x);
        let dy = (self.min_y - center.y).max(0.0).max(center.y - self.max_y);
        dx * dx + dy * dy
    }
}

#[derive(Debug, Clone)]
enum NodeKind {
    /// Range into the packed leaf entry array.
    Leaf(usize, usize),
    Inner(Vec<usize>),
}

#[derive(Debug, Clone)]
struct Node {
    rect: Rect,
    kind: NodeKind,
}

#[derive(Clone)]
pub struct RtreeIndex {
    pub def: IndexDef,
    entries: Vec<(Point, RowId)>,
    packed: Vec<(Point, RowId)>,
    nodes: Vec<Node>,
    root: Option<usize>,
    dirty: bool,
}

impl RtreeIndex {
    pub fn new(def: IndexDef) -> Self {
        Self {
            def,
            entries: Vec::new(),
            packed: Vec::new(),
            nodes: Vec::new(),
            root: None,
            dirty: false,
        }
    }

    pub fn size(&self) -> usize {
        self.entries.len()
    }

    pub fn upsert(&mut self, key: Variant, id: RowId) -> Result<Variant> {
        let Variant::Point(p) = key else {
            return Err(crate::error::Error::params(format!(
                "index '{}' takes point keys",
                self.def.name
            ))
            .into());
        };
        self.entries.push((p, id));
        self.dirty = true;
        Ok(Variant::Point(p))
    }

    pub fn delete(&mut self, key: Variant, id: RowId) {
        let Variant::Point(p) = key else { return };
        if let Some(pos) = self.entries.iter().position(|(q, i)| *i == id && *q == p) {
            self.entries.swap_remove(pos);
            self.dirty = true;
        }
    }

    pub fn select_key(
        &self,
        keys: &VariantArray,
        cond: CondType,
        _opts: SelectOpts,
    ) -> Result<SelectKeyResult> {
        match cond {
            CondType::DWithin => {
                if keys.len() != 3 {
                    return Err(crate::error::Error::params(
                        "DWithin takes x, y and distance",
                    )
                    .into());
                }
                let (x, y, dist) = (
                    keys[0].as_double(),
                    keys[1].as_double(),
                    keys[2].as_double(),
                );
                let (Some(x), Some(y), Some(dist)) = (x, y, dist) else {
                    return Err(crate::error::Error::params("DWithin takes numeric args").into());
                };
                let ids = self.dwithin(&Point::new(x, y), dist);
                Ok(SelectKeyResult::Ids(vec![std::sync::Arc::new(ids)]))
            }
            _ => Ok(SelectKeyResult::Scan),
        }
    }

    pub fn dwithin(&self, center: &Point, dist: f64) -> IdSet {
        let mut out = IdSet::new();
        if self.dirty || self.root.is_none() {
            for (p, id) in &self.entries {
                if p.dwithin(center, dist) {
                    out.add_unordered(*id);
                }
            }
            out.commit();
            return out;
        }
        let mut stack = vec![self.root.unwrap()];
        let dist2 = dist * dist;
        while let Some(node_idx) = stack.pop() {
            let node = &self.nodes[node_idx];
            if node.rect.dist2(center) > dist2 {
                continue;
            }
            match &node.kind {
                NodeKind::Leaf(start, end) => {
                    for (p, id) in &self.packed[*start..*end] {
                        if p.dwithin(center, dist) {
                            out.add_unordered(*id);
                        }
                    }
                }
                NodeKind::Inner(children) => stack.extend_from_slice(children),
            }
        }
        out.commit();
        out
    }

    /// k nearest entries to `center`, closest first.
    pub fn nearest(&self, center: &Point, k: usize) -> Vec<(RowId, f64)> {
        let mut all: Vec<(RowId, f64)> = self
            .entries
            .iter()
            .map(|(p, id)| (*id, p.distance(center)))
            .collect();
        all.sort_by(|a, b| a.1.total_cmp(&b.1));
        all.truncate(k);
        all
    }

    /// STR bulk load: sort by x into vertical slices, each slice sorted by
    /// y, then chunked into leaves.
    pub fn commit(&mut self, ctx: &Context) -> Result<()> {
        if !self.dirty {
            return Ok(());
        }
        ctx.check()?;
        self.nodes.clear();
        self.packed = self.entries.clone();
        if self.packed.is_empty() {
            self.root = None;
            self.dirty = false;
            return Ok(());
        }

        let n = self.packed.len();
        let leaf_count = n.div_ceil(LEAF_CAPACITY);
        let slice_count = (leaf_count as f64).sqrt().ceil() as usize;
        let slice_len = n.div_ceil(slice_count.max(1));

        self.packed.sort_by(|a, b| a.0.x.total_cmp(&b.0.x));
        let mut leaves = Vec::new();
        let mut start = 0;
        while start < n {
            ctx.check()?;
            let end = (start + slice_len).min(n);
            self.packed[start..end].sort_by(|a, b| a.0.y.total_cmp(&b.0.y));
            let mut leaf_start = start;
            while leaf_start < end {
                let leaf_end = (leaf_start + LEAF_CAPACITY).min(end);
                let rect = Rect::of(&self.packed[leaf_start..leaf_end]);
                self.nodes.push(Node { rect, kind: NodeKind::Leaf(leaf_start, leaf_end) });
                leaves.push(self.nodes.len() - 1);
                leaf_start = leaf_end;
            }
            start = end;
        }

        // Pack upwards until a single root remains.
        let mut level = leaves;
        while level.len() > 1 {
            let mut next = Vec::new();
            for chunk in level.chunks(LEAF_CAPACITY) {
                let mut rect = self.nodes[chunk[0]].rect.clone();
                for &child in &chunk[1..] {
                    rect.merge(&self.nodes[child].rect);
                }
                self.nodes.push(Node { rect, kind: NodeKind::Inner(chunk.to_vec()) });
                next.push(self.nodes.len() - 1);
            }
            level = next;
        }
        self.root = level.first().copied();
        self.dirty = false;
        Ok(())
    }

    pub fn mem_stat(&self) -> IndexMemStat {
        IndexMemStat {
            name: self.def.name.clone(),
            unique_keys_count: self.entries.len(),
            data_size: (self.entries.len() + self.packed.len())
                * std::mem::size_of::<(Point, RowId)>()
                + self.nodes.len() * std::mem::size_of::<Node>(),
            expired_strings_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::index::IndexType;
    use crate::types::KeyValueKind;

    fn rtree_with_grid(n: i32) -> RtreeIndex {
        let mut idx = RtreeIndex::new(IndexDef::new("spot", KeyValueKind::Point, IndexType::Rtree));
        let mut id = 0;
        for x in 0..n {
            for y in 0..n {
                idx.upsert(Variant::Point(Point::new(f64::from(x), f64::from(y))), id)
                    .unwrap();
                id += 1;
            }
        }
        idx
    }

    #[test]
    fn dwithin_matches_linear_scan_after_commit() {
        let mut idx = rtree_with_grid(20);
        let center = Point::new(7.3, 11.8);
        let dist = 3.5;

        let before = idx.dwithin(&center, dist);
        idx.commit(&Context::new()).unwrap();
        let after = idx.dwithin(&center, dist);

        assert_eq!(before, after);
        assert!(!after.is_empty());
        for &id in after.iter() {
            let (x, y) = (f64::from(id / 20), f64::from(id % 20));
            assert!(Point::new(x, y).dwithin(&center, dist));
        }
    }

    #[test]
    fn delete_removes_the_entry() {
        let mut idx = rtree_with_grid(2);
        idx.delete(Variant::Point(Point::new(0.0, 0.0)), 0);
        idx.commit(&Context::new()).unwrap();
        let hits = idx.dwithin(&Point::new(0.0, 0.0), 0.1);
        assert!(hits.is_empty());
    }

    #[test]
    fn nearest_orders_by_distance() {
        let idx = rtree_with_grid(3);
        let hits = idx.nearest(&Point::new(0.0, 0.0), 2);
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].0, 0);
        assert!(hits[0].1 <= hits[1].1);
    }
}
