use foundation::bbox::Bbox;
use foundation::ids::MapId;
use foundation::precision::stable_total_cmp_f64;

/// Spatial index over projectedGeo map footprints.
///
/// A bulk-loaded R-tree: entries are packed sort-tile-recursive, so the
/// tree shape is a pure function of the entry set and never depends on
/// insertion history. The list rebuilds the index whenever a footprint
/// changes; at map-collection sizes the rebuild is cheap and buys us
/// reproducible queries.
///
/// Ordering contract: `query_bbox` returns map ids ascending.
#[derive(Debug, Clone, Default)]
pub struct SpatialIndex {
    root: Option<Node>,
}

#[derive(Debug, Copy, Clone, PartialEq)]
pub struct Item {
    pub map_id: MapId,
    pub bounds: Bbox,
}

#[derive(Debug, Clone)]
struct Node {
    bounds: Bbox,
    kind: NodeKind,
}

#[derive(Debug, Clone)]
enum NodeKind {
    Leaf(Vec<Item>),
    Branch(Vec<Node>),
}

const NODE_CAPACITY: usize = 8;

impl SpatialIndex {
    pub fn build(items: Vec<Item>) -> Self {
        if items.is_empty() {
            return Self::default();
        }
        let mut level = pack_leaves(items);
        while level.len() > 1 {
            level = pack_parents(level);
        }
        Self { root: level.pop() }
    }

    pub fn is_empty(&self) -> bool {
        self.root.is_none()
    }

    /// Map ids whose footprint intersects `query`, ascending.
    pub fn query_bbox(&self, query: &Bbox) -> Vec<MapId> {
        let mut hits = Vec::new();
        if let Some(root) = &self.root {
            collect_hits(root, query, &mut hits);
        }
        // Each id appears at most once (one entry per map), so sorting
        // alone restores the contract.
        hits.sort();
        hits
    }
}

/// Sort-tile-recursive leaf packing: order by x-center, cut into vertical
/// strips, order each strip by y-center, fill leaves in that order. Center
/// ties fall back to the map id so equal footprints pack the same way
/// every build.
fn pack_leaves(mut items: Vec<Item>) -> Vec<Node> {
    let leaf_target = items.len().div_ceil(NODE_CAPACITY);
    let strip_count = (leaf_target as f64).sqrt().ceil().max(1.0) as usize;
    let strip_len = items.len().div_ceil(strip_count);

    items.sort_by(|a, b| {
        stable_total_cmp_f64(a.bounds.center().x, b.bounds.center().x)
            .then_with(|| a.map_id.cmp(&b.map_id))
    });

    let mut leaves = Vec::with_capacity(leaf_target);
    for strip in items.chunks_mut(strip_len) {
        strip.sort_by(|a, b| {
            stable_total_cmp_f64(a.bounds.center().y, b.bounds.center().y)
                .then_with(|| a.map_id.cmp(&b.map_id))
        });
        for group in strip.chunks(NODE_CAPACITY) {
            leaves.push(Node {
                bounds: enclose(group.iter().map(|item| item.bounds)),
                kind: NodeKind::Leaf(group.to_vec()),
            });
        }
    }
    leaves
}

/// Group a packed level into parents. The level is already spatially
/// coherent from the strip order, so plain consecutive grouping keeps
/// sibling overlap low.
fn pack_parents(level: Vec<Node>) -> Vec<Node> {
    let mut parents = Vec::with_capacity(level.len().div_ceil(NODE_CAPACITY));
    let mut children: Vec<Node> = Vec::with_capacity(NODE_CAPACITY);
    for node in level {
        children.push(node);
        if children.len() == NODE_CAPACITY {
            parents.push(branch(std::mem::take(&mut children)));
        }
    }
    if !children.is_empty() {
        parents.push(branch(children));
    }
    parents
}

fn branch(children: Vec<Node>) -> Node {
    Node {
        bounds: enclose(children.iter().map(|child| child.bounds)),
        kind: NodeKind::Branch(children),
    }
}

fn enclose(mut bounds: impl Iterator<Item = Bbox>) -> Bbox {
    let first = bounds.next().unwrap_or(Bbox::new([0.0, 0.0], [0.0, 0.0]));
    bounds.fold(first, |acc, b| acc.union(&b))
}

fn collect_hits(node: &Node, query: &Bbox, hits: &mut Vec<MapId>) {
    if !node.bounds.intersects(query) {
        return;
    }
    match &node.kind {
        NodeKind::Leaf(items) => {
            for item in items {
                if item.bounds.intersects(query) {
                    hits.push(item.map_id);
                }
            }
        }
        NodeKind::Branch(children) => {
            for child in children {
                collect_hits(child, query, hits);
            }
        }
    }
}
