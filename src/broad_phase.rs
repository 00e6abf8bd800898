use super::geom::{real, Bounds, Pose, Ray};
use super::proxy::{Bodies, ProxyShapes};
use super::shape::RaycastInfo;
use super::traits::ObjectID;
use super::tree::{DynamicTree, DynamicTreeBuilder, ProxyId};

use cgmath::{BaseFloat, Point3, Vector3, Zero};
use rustc_hash::FxHashSet;

use std::mem;

/// How the predicted displacement of a shape is estimated when its bounds are refreshed
#[cfg_attr(feature="serde", derive(Deserialize, Serialize))]
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum DisplacementPolicy<S> {
    /// No anticipation; fat bounds grow by the margin only
    Zero,
    /// The owning body's linear velocity times `time_step`
    LinearVelocity{time_step: S}
}

impl DisplacementPolicy<f64> {
    fn cast<S: BaseFloat>(self) -> DisplacementPolicy<S> {
        match self {
            DisplacementPolicy::Zero => DisplacementPolicy::Zero,
            DisplacementPolicy::LinearVelocity{time_step} =>
                DisplacementPolicy::LinearVelocity{time_step: real(time_step)}
        }
    }
}

/// The closest shape hit by a ray
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RaycastHit<S, ID> {
    pub shape: ID,
    pub info: RaycastInfo<S>
}

/// Candidate-pair generation over a dynamic AABB tree
///
/// Tracks which shapes' fat bounds changed since the last pass (the moved set) and, in
/// [`compute_overlapping_pairs`], queries the tree with each of them.  Proxy shapes and
/// bodies are not owned here; operations that need them take them as arguments.
///
/// [`compute_overlapping_pairs`]: struct.BroadPhase.html#method.compute_overlapping_pairs
pub struct BroadPhase<S, ID> {
    tree: DynamicTree<S, ID>,
    displacement: DisplacementPolicy<S>,

    // insertion order for iteration, set for membership; stale entries in the list
    // (removed shapes) are skipped because they are absent from the set
    moved_shapes: Vec<ProxyId>,
    moved_set: FxHashSet<ProxyId>,

    // scratch buffers reused across passes
    potential_pairs: Vec<(ProxyId, ProxyId)>,
    overlapping_nodes: Vec<ProxyId>,
    leaves: Vec<(ProxyId, ID)>
}

impl<S, ID> BroadPhase<S, ID>
where
    S: BaseFloat,
    ID: ObjectID
{
    pub fn new() -> Self {
        BroadPhaseBuilder::new().build()
    }

    pub fn tree(&self) -> &DynamicTree<S, ID> {
        &self.tree
    }

    pub fn displacement_policy(&self) -> DisplacementPolicy<S> {
        self.displacement
    }

    pub fn set_displacement_policy(&mut self, policy: DisplacementPolicy<S>) {
        self.displacement = policy;
    }

    /// True if `handle` changed since the last pair computation
    pub fn is_moved(&self, handle: ProxyId) -> bool {
        self.moved_set.contains(&handle)
    }

    pub fn moved_count(&self) -> usize {
        self.moved_set.len()
    }

    /// Insert a shape with world bounds `aabb`, recording its handle on the proxy
    pub fn add_shape<P>(&mut self, shapes: &mut P, id: ID, aabb: Bounds<Point3<S>>) -> ProxyId
    where
        P: ProxyShapes<S, ShapeId = ID>
    {
        let proxy = shapes.proxy_mut(id);
        assert!(proxy.broad_phase_id().is_none(),
            "shape {:?} is already in the broad phase as {:?}", id, proxy.broad_phase_id());

        let handle = self.tree.insert(aabb, id);
        proxy.set_broad_phase_id(Some(handle));
        self.mark_moved(handle);

        debug!("added shape {:?} as {:?}", id, handle);
        handle
    }

    pub fn remove_shape<P>(&mut self, shapes: &mut P, id: ID)
    where
        P: ProxyShapes<S, ShapeId = ID>
    {
        let proxy = shapes.proxy_mut(id);
        let handle = proxy.broad_phase_id()
            .unwrap_or_else(|| panic!("shape {:?} is not in the broad phase", id));

        self.tree.remove(handle);
        proxy.set_broad_phase_id(None);
        self.moved_set.remove(&handle);

        debug!("removed shape {:?} ({:?})", id, handle);
    }

    /// Refresh one shape's bounds from its body's current transform
    ///
    /// Shapes of inactive bodies are left as they are.
    pub fn update_shape<P, B>(&mut self, shapes: &P, bodies: &B, id: ID)
    where
        P: ProxyShapes<S, ShapeId = ID>,
        B: Bodies<S>
    {
        let proxy = shapes.proxy(id);
        let handle = proxy.broad_phase_id()
            .unwrap_or_else(|| panic!("shape {:?} is not in the broad phase", id));
        if bodies.is_active(proxy.body()) {
            self.update_impl(shapes, bodies, handle, id);
        }
    }

    /// Refresh the bounds of every shape of an active body
    pub fn update_all_shapes<P, B>(&mut self, shapes: &P, bodies: &B)
    where
        P: ProxyShapes<S, ShapeId = ID>,
        B: Bodies<S>
    {
        let mut leaves = mem::take(&mut self.leaves);
        leaves.clear();
        leaves.extend(self.tree.leaves()
            .filter(|&(_, id)| bodies.is_active(shapes.proxy(id).body())));

        for &(handle, id) in &leaves {
            self.update_impl(shapes, bodies, handle, id);
        }

        self.leaves = leaves;
    }

    /// Move a shape on its body and refresh its bounds right away
    ///
    /// The bounds are refreshed even if the body is inactive; callers that track sleep
    /// state should wake the body as well.
    pub fn set_local_to_body_transform<P, B>(&mut self, shapes: &mut P, bodies: &B, id: ID, local_to_body: Pose<S>)
    where
        P: ProxyShapes<S, ShapeId = ID>,
        B: Bodies<S>
    {
        let proxy = shapes.proxy_mut(id);
        proxy.set_local_to_body_transform(local_to_body);
        if let Some(handle) = proxy.broad_phase_id() {
            self.update_impl(&*shapes, bodies, handle, id);
        }
    }

    fn update_impl<P, B>(&mut self, shapes: &P, bodies: &B, handle: ProxyId, id: ID)
    where
        P: ProxyShapes<S, ShapeId = ID>,
        B: Bodies<S>
    {
        let proxy = shapes.proxy(id);
        let aabb = proxy.world_aabb(bodies);
        let displacement = match self.displacement {
            DisplacementPolicy::Zero => Vector3::zero(),
            DisplacementPolicy::LinearVelocity{time_step} =>
                bodies.linear_velocity(proxy.body()) * time_step
        };

        if self.tree.update(handle, aabb, displacement) {
            self.mark_moved(handle);
        }
    }

    fn mark_moved(&mut self, handle: ProxyId) {
        if self.moved_set.insert(handle) {
            self.moved_shapes.push(handle);
        }
    }

    /// Report every distinct pair of overlapping shapes involving at least one moved shape
    ///
    /// Each pair is reported once per pass, never pairs a shape with itself, and never
    /// pairs two shapes of the same body.  The moved set is empty afterwards.  Returns
    /// the number of pairs reported.
    pub fn compute_overlapping_pairs<P, F>(&mut self, shapes: &P, mut consumer: F) -> usize
    where
        P: ProxyShapes<S, ShapeId = ID>,
        F: FnMut(ID, ID)
    {
        let mut moved = mem::take(&mut self.moved_shapes);
        let mut overlapping = mem::take(&mut self.overlapping_nodes);
        self.potential_pairs.clear();

        for &handle in &moved {
            if !self.moved_set.remove(&handle) {
                continue;
            }

            overlapping.clear();
            let aabb = *self.tree.fat_aabb(handle);
            self.tree.query_overlap(&aabb, |other| overlapping.push(other));

            for &other in &overlapping {
                if other != handle {
                    self.potential_pairs.push((handle.min(other), handle.max(other)));
                }
            }
        }
        debug_assert!(self.moved_set.is_empty(), "moved set out of sync with moved list");

        moved.clear();
        self.moved_shapes = moved;
        self.overlapping_nodes = overlapping;

        self.potential_pairs.sort_unstable();

        let mut reported = 0;
        let mut previous = None;
        for &pair in &self.potential_pairs {
            if previous == Some(pair) {
                continue;
            }
            previous = Some(pair);

            let id1 = self.tree.payload(pair.0);
            let id2 = self.tree.payload(pair.1);
            if shapes.proxy(id1).body() != shapes.proxy(id2).body() {
                consumer(id1, id2);
                reported += 1;
            }
        }

        debug!("broad phase: {} pairs reported from {} candidates", reported, self.potential_pairs.len());
        reported
    }

    /// Fat-bounds overlap of two shapes; false unless both are in the broad phase
    pub fn test_overlap<P>(&self, shapes: &P, id1: ID, id2: ID) -> bool
    where
        P: ProxyShapes<S, ShapeId = ID>
    {
        match (shapes.proxy(id1).broad_phase_id(), shapes.proxy(id2).broad_phase_id()) {
            (Some(handle1), Some(handle2)) =>
                self.tree.fat_aabb(handle1).overlaps(self.tree.fat_aabb(handle2)),
            _ => false
        }
    }

    /// All shapes whose fat bounds overlap `aabb`, in no particular order
    pub fn report_all_shapes_overlapping_with_aabb(&self, aabb: &Bounds<Point3<S>>) -> Vec<ID> {
        let mut found = Vec::new();
        self.tree.query_overlap(aabb, |handle| found.push(self.tree.payload(handle)));
        found
    }

    /// Offer shapes whose category matches `category_mask` to `consumer`, nearest-first pruned
    ///
    /// `consumer` follows the tree's ray visitor contract: it returns the hit fraction for
    /// the shape, a negative value for a miss, or zero to stop.
    pub fn raycast<P, F>(&self, shapes: &P, ray: &Ray<S>, category_mask: u16, mut consumer: F)
    where
        P: ProxyShapes<S, ShapeId = ID>,
        F: FnMut(ID, &Ray<S>) -> S
    {
        if ray.point1 == ray.point2 {
            warn!("raycast with zero-length ray at {:?}", ray.point1);
        }

        self.tree.query_ray(ray, |handle, clipped| {
            let id = self.tree.payload(handle);
            if shapes.proxy(id).collision_category_bits() & category_mask == 0 {
                return -S::one();
            }
            consumer(id, clipped)
        });
    }

    /// Closest exact hit among shapes whose category matches `category_mask`
    pub fn raycast_closest<P, B>(&self, shapes: &P, bodies: &B, ray: &Ray<S>, category_mask: u16)
        -> Option<RaycastHit<S, ID>>
    where
        P: ProxyShapes<S, ShapeId = ID>,
        B: Bodies<S>
    {
        let mut closest = None;
        self.raycast(shapes, ray, category_mask, |id, clipped| {
            match shapes.proxy(id).raycast(bodies, clipped) {
                Some(info) => {
                    closest = Some(RaycastHit{shape: id, info});
                    info.hit_fraction
                },
                None => -S::one()
            }
        });
        closest
    }
}

impl<S, ID> Default for BroadPhase<S, ID>
where
    S: BaseFloat,
    ID: ObjectID
{
    fn default() -> Self {
        Self::new()
    }
}

/// A builder for `BroadPhase`s
#[derive(Clone, Debug)]
pub struct BroadPhaseBuilder {
    tree: DynamicTreeBuilder,
    displacement: DisplacementPolicy<f64>,
    pair_capacity: usize
}

impl Default for BroadPhaseBuilder {
    fn default() -> Self {
        Self{
            tree: DynamicTreeBuilder::new(),
            displacement: DisplacementPolicy::Zero,
            pair_capacity: 0
        }
    }
}

impl BroadPhaseBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// See [`DynamicTreeBuilder::with_margin`](struct.DynamicTreeBuilder.html#method.with_margin)
    pub fn with_margin(&mut self, margin: f64) -> &mut Self {
        self.tree.with_margin(margin);
        self
    }

    pub fn with_displacement_multiplier(&mut self, multiplier: f64) -> &mut Self {
        self.tree.with_displacement_multiplier(multiplier);
        self
    }

    /// Expected number of shapes
    pub fn with_capacity(&mut self, capacity: usize) -> &mut Self {
        self.tree.with_capacity(capacity);
        self
    }

    pub fn with_displacement(&mut self, policy: DisplacementPolicy<f64>) -> &mut Self {
        self.displacement = policy;
        self
    }

    /// Expected number of candidate pairs per pass
    pub fn with_pair_capacity(&mut self, capacity: usize) -> &mut Self {
        self.pair_capacity = capacity;
        self
    }

    pub fn build<S, ID>(&self) -> BroadPhase<S, ID>
    where
        S: BaseFloat,
        ID: ObjectID
    {
        BroadPhase{
            tree: self.tree.build(),
            displacement: self.displacement.cast(),
            moved_shapes: Vec::new(),
            moved_set: FxHashSet::default(),
            potential_pairs: Vec::with_capacity(self.pair_capacity),
            overlapping_nodes: Vec::new(),
            leaves: Vec::new()
        }
    }
}
