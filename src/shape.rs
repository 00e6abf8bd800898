use super::geom::{Bounds, OrientedBox, Pose, Ray};
use super::narrow_phase::BoundingVolume;

use cgmath::{BaseFloat, Point3, Vector3, Zero};

/// Result of a ray hitting a shape
///
/// Coordinates are in whatever space the ray was expressed in.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct RaycastInfo<S> {
    pub point: Point3<S>,
    pub normal: Vector3<S>,
    pub hit_fraction: S
}

/// A box centered on the shape origin
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Cuboid<S> {
    pub half_extents: Vector3<S>
}

impl<S> Cuboid<S>
where
    S: BaseFloat
{
    pub fn new(half_extents: Vector3<S>) -> Self {
        assert!(half_extents.x >= S::zero() && half_extents.y >= S::zero() && half_extents.z >= S::zero(),
            "negative cuboid half-extents {:?}", half_extents);
        Self{half_extents}
    }

    pub fn compute_aabb(&self, pose: &Pose<S>) -> Bounds<Point3<S>> {
        self.oriented_box(pose).bounds()
    }

    pub fn oriented_box(&self, pose: &Pose<S>) -> OrientedBox<S> {
        OrientedBox::from_pose(self.half_extents, pose)
    }

    pub fn test_point_inside(&self, point: Point3<S>) -> bool {
        point.x.abs() <= self.half_extents.x &&
        point.y.abs() <= self.half_extents.y &&
        point.z.abs() <= self.half_extents.z
    }

    /// Slab raycast; rays starting inside the box report no hit
    pub fn raycast(&self, ray: &Ray<S>) -> Option<RaycastInfo<S>> {
        let direction = ray.point2 - ray.point1;
        let mut t_min = S::neg_infinity();
        let mut t_max = S::infinity();
        let mut normal = Vector3::zero();

        for axis in 0..3 {
            let origin = ray.point1[axis];
            let extent = self.half_extents[axis];
            if direction[axis].abs() <= S::epsilon() {
                if origin < -extent || origin > extent {
                    return None;
                }
                continue;
            }

            let inv = S::one() / direction[axis];
            let mut t1 = (-extent - origin) * inv;
            let mut t2 = (extent - origin) * inv;
            let mut face = Vector3::zero();
            face[axis] = -S::one();
            if t1 > t2 {
                std::mem::swap(&mut t1, &mut t2);
                face[axis] = S::one();
            }

            if t1 > t_min {
                t_min = t1;
                normal = face;
            }
            t_max = t_max.min(t2);

            if t_min > ray.max_fraction || t_min > t_max {
                return None;
            }
        }

        if t_min < S::zero() || t_min > ray.max_fraction {
            return None;
        }

        Some(RaycastInfo{
            point: ray.point_at(t_min),
            normal,
            hit_fraction: t_min
        })
    }
}

/// Geometry a proxy shape can carry
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum CollisionShape<S> {
    Cuboid(Cuboid<S>)
}

impl<S> CollisionShape<S>
where
    S: BaseFloat
{
    pub fn cuboid(half_extents: Vector3<S>) -> Self {
        CollisionShape::Cuboid(Cuboid::new(half_extents))
    }

    /// World bounds of the shape placed by `pose`
    pub fn compute_aabb(&self, pose: &Pose<S>) -> Bounds<Point3<S>> {
        match self {
            CollisionShape::Cuboid(cuboid) => cuboid.compute_aabb(pose)
        }
    }

    /// `point` is in shape-local space
    pub fn test_point_inside(&self, point: Point3<S>) -> bool {
        match self {
            CollisionShape::Cuboid(cuboid) => cuboid.test_point_inside(point)
        }
    }

    /// `ray` is in shape-local space, and so is the result
    pub fn raycast(&self, ray: &Ray<S>) -> Option<RaycastInfo<S>> {
        match self {
            CollisionShape::Cuboid(cuboid) => cuboid.raycast(ray)
        }
    }

    /// Narrow-phase input for the shape placed by `pose`
    pub fn bounding_volume(&self, pose: &Pose<S>) -> BoundingVolume<S> {
        match self {
            CollisionShape::Cuboid(cuboid) => BoundingVolume::OrientedBox(cuboid.oriented_box(pose))
        }
    }
}
