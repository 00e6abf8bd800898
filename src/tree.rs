use super::geom::{real, Bounds, Ray};
use super::traits::Containment;

use cgmath::{BaseFloat, Point3, Vector3};
use smallvec::SmallVec;

/// Handle of a leaf in a [`DynamicTree`]
///
/// Handles stay valid (and keep their value) across updates and reinsertions; they are
/// invalidated only by [`DynamicTree::remove`], after which the slot may be reused.
///
/// [`DynamicTree`]: struct.DynamicTree.html
/// [`DynamicTree::remove`]: struct.DynamicTree.html#method.remove
#[cfg_attr(feature="serde", derive(Deserialize, Serialize))]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct ProxyId(u32);

impl ProxyId {
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

#[derive(Clone, Debug)]
enum NodeKind<S, T> {
    Internal([usize; 2]),
    Leaf{payload: T, tight: Bounds<Point3<S>>},
    Free
}

#[derive(Clone, Debug)]
struct Node<S, T> {
    /// fat bounds for leaves, union of the children for internal nodes
    aabb: Bounds<Point3<S>>,
    parent: Option<usize>,
    /// 0 for leaves, -1 for free slots
    height: i32,
    kind: NodeKind<S, T>
}

/// A balanced binary tree of fattened AABBs
///
/// Nodes live in a single array; freed slots are recycled through a free-list.  Leaves
/// carry a payload `T` (typically a proxy-shape key) along with the tight bounds last
/// supplied for it.  Operating on a removed or never-issued [`ProxyId`] panics.
///
/// [`ProxyId`]: struct.ProxyId.html
#[derive(Clone, Debug)]
pub struct DynamicTree<S, T> {
    nodes: Vec<Node<S, T>>,
    free_list: Vec<usize>,
    root: Option<usize>,
    leaf_count: usize,
    margin: S,
    displacement_multiplier: S
}

impl<S, T> DynamicTree<S, T>
where
    S: BaseFloat,
    T: Copy + std::fmt::Debug
{
    pub fn new() -> Self {
        DynamicTreeBuilder::new().build()
    }

    pub fn margin(&self) -> S {
        self.margin
    }

    /// Number of live leaves
    pub fn len(&self) -> usize {
        self.leaf_count
    }

    pub fn is_empty(&self) -> bool {
        self.leaf_count == 0
    }

    /// Height of the root (0 for an empty tree or a lone leaf)
    pub fn height(&self) -> i32 {
        self.root.map_or(0, |root| self.nodes[root].height)
    }

    pub fn clear(&mut self) {
        self.nodes.clear();
        self.free_list.clear();
        self.root = None;
        self.leaf_count = 0;
    }

    /// Add a leaf for `aabb`, stored fattened by the tree margin
    pub fn insert(&mut self, aabb: Bounds<Point3<S>>, payload: T) -> ProxyId {
        let leaf = self.allocate(Node{
            aabb: aabb.fattened(self.margin),
            parent: None,
            height: 0,
            kind: NodeKind::Leaf{payload, tight: aabb}
        });
        self.insert_leaf(leaf);
        self.leaf_count += 1;
        ProxyId(leaf as u32)
    }

    /// Remove a leaf, returning its payload
    pub fn remove(&mut self, proxy: ProxyId) -> T {
        let leaf = self.leaf_index(proxy);
        let payload = self.payload(proxy);
        self.remove_leaf(leaf);
        self.release(leaf);
        self.leaf_count -= 1;
        payload
    }

    /// Refresh the bounds of a leaf after its shape moved
    ///
    /// While `aabb` stays within the stored fat bounds only the tight bounds change.
    /// Otherwise the leaf is reinserted with new fat bounds: `aabb` grown by the margin
    /// and stretched along `displacement` (scaled by the displacement multiplier).
    /// Returns true if the leaf was reinserted.
    pub fn update(&mut self, proxy: ProxyId, aabb: Bounds<Point3<S>>, displacement: Vector3<S>) -> bool {
        let leaf = self.leaf_index(proxy);

        if let NodeKind::Leaf{ref mut tight, ..} = self.nodes[leaf].kind {
            *tight = aabb;
        }

        if self.nodes[leaf].aabb.contains(&aabb) {
            return false;
        }

        self.remove_leaf(leaf);
        self.nodes[leaf].aabb = aabb
            .fattened(self.margin)
            .extended(displacement * self.displacement_multiplier);
        self.insert_leaf(leaf);

        trace!("reinserted tree proxy {:?}", proxy);
        true
    }

    pub fn fat_aabb(&self, proxy: ProxyId) -> &Bounds<Point3<S>> {
        &self.nodes[self.leaf_index(proxy)].aabb
    }

    pub fn tight_aabb(&self, proxy: ProxyId) -> &Bounds<Point3<S>> {
        match self.nodes[self.leaf_index(proxy)].kind {
            NodeKind::Leaf{ref tight, ..} => tight,
            _ => unreachable!()
        }
    }

    pub fn payload(&self, proxy: ProxyId) -> T {
        match self.nodes[self.leaf_index(proxy)].kind {
            NodeKind::Leaf{payload, ..} => payload,
            _ => unreachable!()
        }
    }

    /// Iterate over all live leaves
    pub fn leaves<'a>(&'a self) -> impl Iterator<Item = (ProxyId, T)> + 'a {
        self.nodes.iter()
            .enumerate()
            .filter_map(|(index, node)| match node.kind {
                NodeKind::Leaf{payload, ..} => Some((ProxyId(index as u32), payload)),
                _ => None
            })
    }

    /// Invoke `visitor` for every leaf whose fat bounds overlap `aabb`, in no particular order
    pub fn query_overlap<F>(&self, aabb: &Bounds<Point3<S>>, mut visitor: F)
    where
        F: FnMut(ProxyId)
    {
        let mut stack: SmallVec<[usize; 64]> = SmallVec::new();
        stack.extend(self.root);

        while let Some(index) = stack.pop() {
            let node = &self.nodes[index];
            if !node.aabb.overlaps(aabb) {
                continue;
            }
            match node.kind {
                NodeKind::Internal(children) => stack.extend_from_slice(&children),
                NodeKind::Leaf{..} => visitor(ProxyId(index as u32)),
                NodeKind::Free => unreachable!("free node {} reachable from root", index)
            }
        }
    }

    /// Invoke `visitor` for every leaf whose fat bounds the ray crosses
    ///
    /// The visitor receives the ray clipped to the closest hit so far and returns the hit
    /// fraction for that leaf, or a negative value for a miss.  A positive fraction shorter
    /// than the current one shortens the ray for the rest of the traversal; returning zero
    /// stops the traversal.
    pub fn query_ray<F>(&self, ray: &Ray<S>, mut visitor: F)
    where
        F: FnMut(ProxyId, &Ray<S>) -> S
    {
        let mut max_fraction = ray.max_fraction;
        let mut stack: SmallVec<[usize; 64]> = SmallVec::new();
        stack.extend(self.root);

        while let Some(index) = stack.pop() {
            let clipped = Ray::with_max_fraction(ray.point1, ray.point2, max_fraction);
            let node = &self.nodes[index];
            if !node.aabb.intersects_ray(&clipped) {
                continue;
            }
            match node.kind {
                NodeKind::Internal(children) => stack.extend_from_slice(&children),
                NodeKind::Leaf{..} => {
                    let fraction = visitor(ProxyId(index as u32), &clipped);
                    if fraction == S::zero() {
                        return;
                    }
                    if fraction > S::zero() && fraction < max_fraction {
                        max_fraction = fraction;
                    }
                },
                NodeKind::Free => unreachable!("free node {} reachable from root", index)
            }
        }
    }

    /// Check structural invariants, panicking on the first violation
    ///
    /// Intended for tests and debugging: walks the whole tree.
    pub fn validate(&self) {
        let mut reachable = 0usize;
        let mut leaves = 0usize;
        if let Some(root) = self.root {
            assert!(self.nodes[root].parent.is_none(), "root {} has a parent", root);
            self.validate_node(root, &mut reachable, &mut leaves);
        }
        assert_eq!(leaves, self.leaf_count, "leaf count mismatch");
        assert_eq!(reachable + self.free_list.len(), self.nodes.len(), "leaked tree nodes");
    }

    fn validate_node(&self, index: usize, reachable: &mut usize, leaves: &mut usize) {
        *reachable += 1;
        let node = &self.nodes[index];
        match node.kind {
            NodeKind::Leaf{ref tight, ..} => {
                *leaves += 1;
                assert_eq!(node.height, 0, "leaf {} has nonzero height", index);
                assert!(node.aabb.contains(tight), "leaf {} fat bounds do not contain tight bounds", index);
            },
            NodeKind::Internal([left, right]) => {
                for &child in &[left, right] {
                    assert_eq!(self.nodes[child].parent, Some(index), "broken parent link at {}", child);
                }
                let (lh, rh) = (self.nodes[left].height, self.nodes[right].height);
                assert_eq!(node.height, 1 + std::cmp::max(lh, rh), "stale height at {}", index);
                assert!(node.aabb.contains(&self.nodes[left].aabb.union(&self.nodes[right].aabb)),
                    "stale bounds at {}", index);
                self.validate_node(left, reachable, leaves);
                self.validate_node(right, reachable, leaves);
            },
            NodeKind::Free => panic!("free node {} reachable from root", index)
        }
    }

    fn leaf_index(&self, proxy: ProxyId) -> usize {
        match self.nodes.get(proxy.index()) {
            Some(Node{kind: NodeKind::Leaf{..}, ..}) => proxy.index(),
            _ => panic!("invalid tree proxy {:?}", proxy)
        }
    }

    fn allocate(&mut self, node: Node<S, T>) -> usize {
        match self.free_list.pop() {
            Some(index) => {
                self.nodes[index] = node;
                index
            },
            None => {
                self.nodes.push(node);
                self.nodes.len() - 1
            }
        }
    }

    fn release(&mut self, index: usize) {
        let node = &mut self.nodes[index];
        node.kind = NodeKind::Free;
        node.parent = None;
        node.height = -1;
        self.free_list.push(index);
    }

    fn children(&self, index: usize) -> [usize; 2] {
        match self.nodes[index].kind {
            NodeKind::Internal(children) => children,
            _ => panic!("tree node {} is not internal", index)
        }
    }

    fn set_child(&mut self, index: usize, slot: usize, child: usize) {
        match self.nodes[index].kind {
            NodeKind::Internal(ref mut children) => children[slot] = child,
            _ => panic!("tree node {} is not internal", index)
        }
    }

    /// Point whichever link referenced `old` (a parent's child slot, or the root) at `new`
    fn relink(&mut self, parent: Option<usize>, old: usize, new: usize) {
        match parent {
            Some(parent) => {
                let slot = if self.children(parent)[0] == old { 0 } else { 1 };
                self.set_child(parent, slot, new);
            },
            None => self.root = Some(new)
        }
    }

    /// Cost of pushing a leaf with `aabb` down into `child`
    fn descent_cost(&self, child: usize, aabb: &Bounds<Point3<S>>) -> S {
        let node = &self.nodes[child];
        let merged = node.aabb.union(aabb).surface_area();
        match node.kind {
            NodeKind::Leaf{..} => merged,
            _ => merged - node.aabb.surface_area()
        }
    }

    fn insert_leaf(&mut self, leaf: usize) {
        let root = match self.root {
            Some(root) => root,
            None => {
                self.root = Some(leaf);
                self.nodes[leaf].parent = None;
                return;
            }
        };

        // descend towards the cheapest sibling
        let aabb = self.nodes[leaf].aabb;
        let two = real::<S>(2.0);
        let mut index = root;
        while let NodeKind::Internal([left, right]) = self.nodes[index].kind {
            let area = self.nodes[index].aabb.surface_area();
            let merged_area = self.nodes[index].aabb.union(&aabb).surface_area();

            // pairing with this whole subtree
            let cost = two * merged_area;
            // enlargement pushed onto every ancestor if we keep descending
            let inheritance = two * (merged_area - area);

            let cost_left = self.descent_cost(left, &aabb) + inheritance;
            let cost_right = self.descent_cost(right, &aabb) + inheritance;

            if cost < cost_left && cost < cost_right {
                break;
            }
            index = if cost_left < cost_right { left } else { right };
        }

        let sibling = index;
        let old_parent = self.nodes[sibling].parent;
        let new_parent = self.allocate(Node{
            aabb: self.nodes[sibling].aabb.union(&aabb),
            parent: old_parent,
            height: self.nodes[sibling].height + 1,
            kind: NodeKind::Internal([sibling, leaf])
        });
        self.relink(old_parent, sibling, new_parent);
        self.nodes[sibling].parent = Some(new_parent);
        self.nodes[leaf].parent = Some(new_parent);

        self.refit(Some(new_parent));
    }

    fn remove_leaf(&mut self, leaf: usize) {
        if self.root == Some(leaf) {
            self.root = None;
            return;
        }

        let parent = self.nodes[leaf].parent
            .unwrap_or_else(|| panic!("detached tree leaf {}", leaf));
        let grand_parent = self.nodes[parent].parent;
        let [left, right] = self.children(parent);
        let sibling = if left == leaf { right } else { left };

        self.relink(grand_parent, parent, sibling);
        self.nodes[sibling].parent = grand_parent;
        self.nodes[leaf].parent = None;
        self.release(parent);

        self.refit(grand_parent);
    }

    /// Rebalance and recompute bounds and heights from `start` up to the root
    fn refit(&mut self, start: Option<usize>) {
        let mut cursor = start;
        while let Some(index) = cursor {
            let index = self.balance(index);
            let [left, right] = self.children(index);
            self.nodes[index].height = 1 + std::cmp::max(self.nodes[left].height, self.nodes[right].height);
            self.nodes[index].aabb = self.nodes[left].aabb.union(&self.nodes[right].aabb);
            cursor = self.nodes[index].parent;
        }
    }

    /// Rotate the taller child of `index` up if the subtree heights differ by more than one
    ///
    /// Returns the node now occupying the position of `index`.
    fn balance(&mut self, index: usize) -> usize {
        if self.nodes[index].height < 2 {
            return index;
        }

        let [left, right] = self.children(index);
        let skew = self.nodes[right].height - self.nodes[left].height;
        if skew > 1 {
            self.rotate_up(index, 1)
        } else if skew < -1 {
            self.rotate_up(index, 0)
        } else {
            index
        }
    }

    /// Promote the child of `index` in `slot` to take its place
    fn rotate_up(&mut self, index: usize, slot: usize) -> usize {
        let children = self.children(index);
        let promoted = children[slot];
        let other = children[1 - slot];
        let [first, second] = self.children(promoted);

        // the promoted node adopts `index` and keeps its taller child
        let parent = self.nodes[index].parent;
        self.set_child(promoted, 0, index);
        self.nodes[promoted].parent = parent;
        self.nodes[index].parent = Some(promoted);
        self.relink(parent, index, promoted);

        let (keep, give) = if self.nodes[first].height > self.nodes[second].height {
            (first, second)
        } else {
            (second, first)
        };

        self.set_child(promoted, 1, keep);
        self.set_child(index, slot, give);
        self.nodes[give].parent = Some(index);

        self.nodes[index].aabb = self.nodes[other].aabb.union(&self.nodes[give].aabb);
        self.nodes[index].height = 1 + std::cmp::max(self.nodes[other].height, self.nodes[give].height);
        self.nodes[promoted].aabb = self.nodes[index].aabb.union(&self.nodes[keep].aabb);
        self.nodes[promoted].height = 1 + std::cmp::max(self.nodes[index].height, self.nodes[keep].height);

        promoted
    }
}

impl<S, T> Default for DynamicTree<S, T>
where
    S: BaseFloat,
    T: Copy + std::fmt::Debug
{
    fn default() -> Self {
        Self::new()
    }
}

/// A builder for `DynamicTree`s
#[derive(Clone, Debug)]
pub struct DynamicTreeBuilder {
    margin: f64,
    displacement_multiplier: f64,
    capacity: Option<usize>
}

impl Default for DynamicTreeBuilder {
    fn default() -> Self {
        Self{
            margin: 0.1,
            displacement_multiplier: 1.7,
            capacity: None
        }
    }
}

impl DynamicTreeBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Gap added on every side of a leaf's bounds when it is (re)inserted
    pub fn with_margin(&mut self, margin: f64) -> &mut Self {
        self.margin = margin;
        self
    }

    /// Scale applied to the predicted displacement when stretching fat bounds
    pub fn with_displacement_multiplier(&mut self, multiplier: f64) -> &mut Self {
        self.displacement_multiplier = multiplier;
        self
    }

    /// Expected number of leaves
    pub fn with_capacity(&mut self, capacity: usize) -> &mut Self {
        self.capacity = Some(capacity);
        self
    }

    pub fn build<S, T>(&self) -> DynamicTree<S, T>
    where
        S: BaseFloat
    {
        assert!(self.margin >= 0.0, "negative tree margin {}", self.margin);
        DynamicTree{
            nodes: match self.capacity {
                    // a tree of n leaves holds 2n - 1 nodes
                    Some(capacity) => Vec::with_capacity(2 * capacity),
                    None => Vec::new()
                },
            free_list: Vec::new(),
            root: None,
            leaf_count: 0,
            margin: real(self.margin),
            displacement_multiplier: real(self.displacement_multiplier)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Zero;

    fn unit_box(x: f32, y: f32, z: f32) -> Bounds<Point3<f32>> {
        Bounds::new(Point3::new(x, y, z), Point3::new(x + 1.0, y + 1.0, z + 1.0))
    }

    fn query(tree: &DynamicTree<f32, u32>, aabb: &Bounds<Point3<f32>>) -> Vec<u32> {
        let mut found = Vec::new();
        tree.query_overlap(aabb, |proxy| found.push(tree.payload(proxy)));
        found.sort();
        found
    }

    #[test]
    fn insert_and_query() {
        let mut tree = DynamicTree::new();
        tree.insert(unit_box(0.0, 0.0, 0.0), 0u32);
        tree.insert(unit_box(10.0, 10.0, 10.0), 1);
        tree.insert(unit_box(20.0, 20.0, 20.0), 2);
        tree.validate();

        assert_eq!(tree.len(), 3);
        assert_eq!(query(&tree, &unit_box(-0.5, -0.5, -0.5)), vec![0]);
        assert_eq!(query(&tree, &Bounds::new(
            Point3::new(-100.0, -100.0, -100.0),
            Point3::new(100.0, 100.0, 100.0))), vec![0, 1, 2]);
    }

    #[test]
    fn fat_bounds_include_margin() {
        let mut tree: DynamicTree<f32, u32> = DynamicTreeBuilder::new().with_margin(0.5).build();
        let proxy = tree.insert(unit_box(0.0, 0.0, 0.0), 7);
        assert_eq!(*tree.fat_aabb(proxy), unit_box(0.0, 0.0, 0.0).fattened(0.5));
        assert_eq!(*tree.tight_aabb(proxy), unit_box(0.0, 0.0, 0.0));
        assert_eq!(tree.payload(proxy), 7);
    }

    #[test]
    fn remove_recycles_slots() {
        let mut tree = DynamicTree::new();
        tree.insert(unit_box(0.0, 0.0, 0.0), 0u32);
        let p1 = tree.insert(unit_box(5.0, 5.0, 5.0), 1);
        tree.insert(unit_box(10.0, 10.0, 10.0), 2);

        assert_eq!(tree.remove(p1), 1);
        tree.validate();
        assert_eq!(tree.len(), 2);
        assert_eq!(query(&tree, &unit_box(5.0, 5.0, 5.0)), Vec::<u32>::new());

        let nodes = tree.nodes.len();
        tree.insert(unit_box(5.0, 5.0, 5.0), 3);
        tree.validate();
        assert_eq!(tree.nodes.len(), nodes);
    }

    #[test]
    fn small_move_keeps_leaf() {
        let mut tree = DynamicTree::new();
        let proxy = tree.insert(unit_box(0.0, 0.0, 0.0), 0u32);
        let fat = *tree.fat_aabb(proxy);

        assert!(!tree.update(proxy, unit_box(0.05, 0.0, 0.0), Vector3::zero()));
        assert_eq!(*tree.fat_aabb(proxy), fat);
        assert_eq!(*tree.tight_aabb(proxy), unit_box(0.05, 0.0, 0.0));
        tree.validate();
    }

    #[test]
    fn touching_the_margin_is_inside() {
        let mut tree: DynamicTree<f32, u32> = DynamicTreeBuilder::new().with_margin(0.5).build();
        let proxy = tree.insert(unit_box(0.0, 0.0, 0.0), 0);
        assert!(!tree.update(proxy, unit_box(0.5, 0.0, 0.0), Vector3::zero()));
    }

    #[test]
    fn large_move_reinserts() {
        let mut tree = DynamicTree::new();
        let proxy = tree.insert(unit_box(0.0, 0.0, 0.0), 0u32);
        tree.insert(unit_box(3.0, 0.0, 0.0), 1);

        assert!(tree.update(proxy, unit_box(100.0, 100.0, 100.0), Vector3::zero()));
        tree.validate();
        assert_eq!(tree.payload(proxy), 0);
        assert_eq!(query(&tree, &unit_box(99.5, 99.5, 99.5)), vec![0]);
        assert_eq!(query(&tree, &unit_box(0.0, 0.0, 0.0)), Vec::<u32>::new());
    }

    #[test]
    fn displacement_stretches_fat_bounds() {
        let mut tree: DynamicTree<f32, u32> = DynamicTreeBuilder::new()
            .with_margin(0.1)
            .with_displacement_multiplier(2.0)
            .build();
        let proxy = tree.insert(unit_box(0.0, 0.0, 0.0), 0);
        assert!(tree.update(proxy, unit_box(5.0, 0.0, 0.0), Vector3::new(1.0, 0.0, -0.5)));

        let fat = tree.fat_aabb(proxy);
        assert!((fat.max.x - 8.1).abs() < 1e-5);
        assert!((fat.min.x - 4.9).abs() < 1e-5);
        assert!((fat.min.z + 1.1).abs() < 1e-5);
        assert!((fat.max.z - 1.1).abs() < 1e-5);
    }

    #[test]
    fn stays_balanced() {
        let mut tree = DynamicTree::new();
        for i in 0..100 {
            tree.insert(unit_box(3.0 * i as f32, 0.0, 0.0), i as u32);
        }
        tree.validate();
        assert_eq!(tree.len(), 100);
        assert!(tree.height() < 20, "height = {}", tree.height());
    }

    #[test]
    fn ray_query_tightens() {
        let mut tree = DynamicTree::new();
        for i in 0..10 {
            tree.insert(unit_box(2.0 * i as f32, 0.0, 0.0), i as u32);
        }
        let ray = Ray::new(Point3::new(-1.0, 0.5, 0.5), Point3::new(100.0, 0.5, 0.5));

        // every leaf reports a hit where the ray enters its fat bounds
        let mut visited = Vec::new();
        tree.query_ray(&ray, |proxy, clipped| {
            visited.push(tree.payload(proxy));
            let entry = (tree.fat_aabb(proxy).min.x - ray.point1.x) / 101.0;
            assert!(entry <= clipped.max_fraction + 1e-6);
            entry
        });

        // nothing lies beyond the closest box once the ray has been shortened to it
        assert_eq!(visited.last(), Some(&0));
    }

    #[test]
    fn ray_query_stops_on_zero() {
        let mut tree = DynamicTree::new();
        for i in 0..10 {
            tree.insert(unit_box(2.0 * i as f32, 0.0, 0.0), i as u32);
        }
        let ray = Ray::new(Point3::new(-1.0, 0.5, 0.5), Point3::new(100.0, 0.5, 0.5));
        let mut calls = 0;
        tree.query_ray(&ray, |_, _| {
            calls += 1;
            0.0
        });
        assert_eq!(calls, 1);
    }

    #[test]
    #[should_panic]
    fn removed_handle_is_fatal() {
        let mut tree = DynamicTree::new();
        let proxy = tree.insert(unit_box(0.0, 0.0, 0.0), 0u32);
        tree.remove(proxy);
        tree.fat_aabb(proxy);
    }
}
