use super::geom::{rotate, Bounds, Pose, Ray};
use super::narrow_phase::Motion;
use super::shape::{CollisionShape, RaycastInfo};
use super::traits::ObjectID;
use super::tree::ProxyId;

use cgmath::{BaseFloat, InnerSpace, Point3, Transform, Vector3, Zero};
use rustc_hash::FxHashMap;

/// Identifier of the rigid body a proxy shape is attached to
#[cfg_attr(feature="serde", derive(Deserialize, Serialize))]
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct BodyId(pub u32);

/// Read access to the bodies that own proxy shapes
pub trait Bodies<S>
where
    S: BaseFloat
{
    /// Body-to-world transform
    fn transform(&self, body: BodyId) -> Pose<S>;

    fn linear_velocity(&self, _body: BodyId) -> Vector3<S> {
        Vector3::zero()
    }

    /// Inactive (sleeping or disabled) bodies are never hit by rays
    fn is_active(&self, _body: BodyId) -> bool {
        true
    }
}

/// Plain per-body state, for callers without their own body storage
#[derive(Clone, Copy, Debug)]
pub struct BodyState<S>
where
    S: BaseFloat
{
    pub transform: Pose<S>,
    pub linear_velocity: Vector3<S>,
    pub active: bool
}

impl<S> BodyState<S>
where
    S: BaseFloat
{
    pub fn new(transform: Pose<S>) -> Self {
        Self{
            transform,
            linear_velocity: Vector3::zero(),
            active: true
        }
    }
}

/// Bodies indexed by `BodyId`
impl<S> Bodies<S> for Vec<BodyState<S>>
where
    S: BaseFloat
{
    fn transform(&self, body: BodyId) -> Pose<S> {
        self[body.0 as usize].transform
    }

    fn linear_velocity(&self, body: BodyId) -> Vector3<S> {
        self[body.0 as usize].linear_velocity
    }

    fn is_active(&self, body: BodyId) -> bool {
        self[body.0 as usize].active
    }
}

/// A collision shape attached to a body, as seen by the broad phase
///
/// The broad-phase handle is `None` until the shape is added to a [`BroadPhase`] and
/// again after it is removed.
///
/// [`BroadPhase`]: struct.BroadPhase.html
#[derive(Clone, Debug)]
pub struct ProxyShape<S>
where
    S: BaseFloat
{
    body: BodyId,
    shape: CollisionShape<S>,
    local_to_body: Pose<S>,
    collision_category_bits: u16,
    collide_with_mask_bits: u16,
    broad_phase_id: Option<ProxyId>
}

impl<S> ProxyShape<S>
where
    S: BaseFloat
{
    /// New shape in category `0x0001`, colliding with every category
    pub fn new(body: BodyId, shape: CollisionShape<S>, local_to_body: Pose<S>) -> Self {
        Self{
            body,
            shape,
            local_to_body,
            collision_category_bits: 0x0001,
            collide_with_mask_bits: 0xFFFF,
            broad_phase_id: None
        }
    }

    pub fn body(&self) -> BodyId {
        self.body
    }

    pub fn shape(&self) -> &CollisionShape<S> {
        &self.shape
    }

    pub fn local_to_body_transform(&self) -> &Pose<S> {
        &self.local_to_body
    }

    pub fn collision_category_bits(&self) -> u16 {
        self.collision_category_bits
    }

    pub fn collide_with_mask_bits(&self) -> u16 {
        self.collide_with_mask_bits
    }

    pub fn broad_phase_id(&self) -> Option<ProxyId> {
        self.broad_phase_id
    }

    pub(crate) fn set_broad_phase_id(&mut self, id: Option<ProxyId>) {
        self.broad_phase_id = id;
    }

    pub fn set_collision_category_bits(&mut self, bits: u16) {
        self.collision_category_bits = bits;
        info!("proxy shape {:?} of body {:?}: collision category bits {:#06x}",
            self.broad_phase_id, self.body, bits);
    }

    pub fn set_collide_with_mask_bits(&mut self, bits: u16) {
        self.collide_with_mask_bits = bits;
        info!("proxy shape {:?} of body {:?}: collide-with mask bits {:#06x}",
            self.broad_phase_id, self.body, bits);
    }

    /// Replace the shape's placement on its body
    ///
    /// The broad phase sees the change on the next update of this shape.  Use
    /// [`BroadPhase::set_local_to_body_transform`] to refresh its bounds at once.
    ///
    /// [`BroadPhase::set_local_to_body_transform`]: struct.BroadPhase.html#method.set_local_to_body_transform
    pub fn set_local_to_body_transform(&mut self, local_to_body: Pose<S>) {
        self.local_to_body = local_to_body;
        info!("proxy shape {:?} of body {:?}: local-to-body transform {:?}",
            self.broad_phase_id, self.body, local_to_body);
    }

    /// True if each shape's category is accepted by the other's mask
    pub fn can_collide_with(&self, other: &Self) -> bool {
        (self.collision_category_bits & other.collide_with_mask_bits) != 0 &&
        (other.collision_category_bits & self.collide_with_mask_bits) != 0
    }

    pub fn local_to_world<B: Bodies<S>>(&self, bodies: &B) -> Pose<S> {
        bodies.transform(self.body).concat(&self.local_to_body)
    }

    /// Tight world-space bounds
    pub fn world_aabb<B: Bodies<S>>(&self, bodies: &B) -> Bounds<Point3<S>> {
        self.shape.compute_aabb(&self.local_to_world(bodies))
    }

    /// Narrow-phase input: world-space volume and the owning body's velocity
    pub fn motion<B: Bodies<S>>(&self, bodies: &B) -> Motion<S> {
        Motion{
            volume: self.shape.bounding_volume(&self.local_to_world(bodies)),
            velocity: bodies.linear_velocity(self.body)
        }
    }

    /// `point` is in world space
    pub fn test_point_inside<B: Bodies<S>>(&self, bodies: &B, point: Point3<S>) -> bool {
        self.local_to_world(bodies)
            .inverse_transform()
            .map_or(false, |to_local| self.shape.test_point_inside(to_local.transform_point(point)))
    }

    /// World-space raycast against the exact shape
    pub fn raycast<B: Bodies<S>>(&self, bodies: &B, ray: &Ray<S>) -> Option<RaycastInfo<S>> {
        if !bodies.is_active(self.body) {
            return None;
        }

        let to_world = self.local_to_world(bodies);
        let to_local = to_world.inverse_transform()?;
        let hit = self.shape.raycast(&ray.transformed(&to_local))?;

        Some(RaycastInfo{
            point: to_world.transform_point(hit.point),
            normal: rotate(&to_world, hit.normal).normalize(),
            hit_fraction: hit.hit_fraction
        })
    }
}

/// Storage of proxy shapes, keyed by `ShapeId`
///
/// Looking up an unknown key is a caller error and panics.
pub trait ProxyShapes<S>
where
    S: BaseFloat
{
    type ShapeId: ObjectID;

    fn proxy(&self, id: Self::ShapeId) -> &ProxyShape<S>;
    fn proxy_mut(&mut self, id: Self::ShapeId) -> &mut ProxyShape<S>;
}

impl<S> ProxyShapes<S> for Vec<ProxyShape<S>>
where
    S: BaseFloat
{
    type ShapeId = usize;

    fn proxy(&self, id: usize) -> &ProxyShape<S> {
        &self[id]
    }

    fn proxy_mut(&mut self, id: usize) -> &mut ProxyShape<S> {
        &mut self[id]
    }
}

impl<ID, S> ProxyShapes<S> for FxHashMap<ID, ProxyShape<S>>
where
    ID: ObjectID,
    S: BaseFloat
{
    type ShapeId = ID;

    fn proxy(&self, id: ID) -> &ProxyShape<S> {
        self.get(&id).unwrap_or_else(|| panic!("unknown proxy shape {:?}", id))
    }

    fn proxy_mut(&mut self, id: ID) -> &mut ProxyShape<S> {
        self.get_mut(&id).unwrap_or_else(|| panic!("unknown proxy shape {:?}", id))
    }
}
