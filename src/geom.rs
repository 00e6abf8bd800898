use super::traits::Containment;

use cgmath::{BaseFloat, Decomposed, EuclideanSpace, InnerSpace, Matrix3, Point3, Quaternion, Vector3, Zero};
use cgmath::{Rotation, Transform};

/// Body and shape placement: uniform scale, rotation, then translation
pub type Pose<S> = Decomposed<Vector3<S>, Quaternion<S>>;

/// Converts an `f64` constant into the scalar type in use
pub(crate) fn real<S: BaseFloat>(value: f64) -> S {
    num_traits::cast(value).expect("constant not representable by scalar type")
}

pub fn identity_pose<S: BaseFloat>() -> Pose<S> {
    translation_pose(Vector3::zero())
}

pub fn translation_pose<S: BaseFloat>(disp: Vector3<S>) -> Pose<S> {
    Decomposed{
        scale: S::one(),
        rot: Quaternion::from_sv(S::one(), Vector3::zero()),
        disp
    }
}

pub(crate) fn min_point<S: BaseFloat>(lhs: Point3<S>, rhs: Point3<S>) -> Point3<S> {
    Point3::new(lhs.x.min(rhs.x), lhs.y.min(rhs.y), lhs.z.min(rhs.z))
}

pub(crate) fn max_point<S: BaseFloat>(lhs: Point3<S>, rhs: Point3<S>) -> Point3<S> {
    Point3::new(lhs.x.max(rhs.x), lhs.y.max(rhs.y), lhs.z.max(rhs.z))
}

/// An axis-aligned bounding box
///
/// `min` must not exceed `max` on any axis.
#[cfg_attr(feature="serde", derive(Deserialize, Serialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Bounds<Point> {
    pub min: Point,
    pub max: Point
}

impl<Point> Bounds<Point>
where
    Point: EuclideanSpace + Copy
{
    pub fn new(min: Point, max: Point) -> Self {
        Self{min, max}
    }

    pub fn size(self) -> Point::Diff {
        self.max - self.min
    }
}

impl<S> Bounds<Point3<S>>
where
    S: BaseFloat
{
    pub fn from_half_extents(center: Point3<S>, half_extents: Vector3<S>) -> Self {
        Self::new(center - half_extents, center + half_extents)
    }

    pub fn center(&self) -> Point3<S> {
        self.min.midpoint(self.max)
    }

    pub fn half_extents(&self) -> Vector3<S> {
        self.size() * real::<S>(0.5)
    }

    /// True if the closed boxes share at least one point
    pub fn overlaps(&self, other: &Self) -> bool {
        self.min.x <= other.max.x && other.min.x <= self.max.x &&
        self.min.y <= other.max.y && other.min.y <= self.max.y &&
        self.min.z <= other.max.z && other.min.z <= self.max.z
    }

    pub fn union(&self, other: &Self) -> Self {
        Self::new(min_point(self.min, other.min), max_point(self.max, other.max))
    }

    /// Surface area, the tree's insertion cost metric
    pub fn surface_area(&self) -> S {
        let size = self.size();
        (size.x * size.y + size.y * size.z + size.z * size.x) * real::<S>(2.0)
    }

    /// Grows every face outward by `margin`
    pub fn fattened(&self, margin: S) -> Self {
        let gap = Vector3::new(margin, margin, margin);
        Self::new(self.min - gap, self.max + gap)
    }

    /// Stretches the box along `displacement` only, on the side it points to
    pub fn extended(&self, displacement: Vector3<S>) -> Self {
        let mut extended = *self;
        for axis in 0..3 {
            if displacement[axis] < S::zero() {
                extended.min[axis] += displacement[axis];
            } else {
                extended.max[axis] += displacement[axis];
            }
        }
        extended
    }

    /// Slab test of the segment `[0, ray.max_fraction]` against this box
    pub fn intersects_ray(&self, ray: &Ray<S>) -> bool {
        let direction = ray.point2 - ray.point1;
        let mut t_min = S::zero();
        let mut t_max = ray.max_fraction;

        for axis in 0..3 {
            let origin = ray.point1[axis];
            if direction[axis].abs() <= S::epsilon() {
                if origin < self.min[axis] || origin > self.max[axis] {
                    return false;
                }
            } else {
                let inv = S::one() / direction[axis];
                let mut t1 = (self.min[axis] - origin) * inv;
                let mut t2 = (self.max[axis] - origin) * inv;
                if t1 > t2 {
                    std::mem::swap(&mut t1, &mut t2);
                }
                t_min = t_min.max(t1);
                t_max = t_max.min(t2);
                if t_min > t_max {
                    return false;
                }
            }
        }

        true
    }
}

impl<S> Containment for Bounds<Point3<S>>
where
    S: BaseFloat
{
    fn contains(&self, other: &Bounds<Point3<S>>) -> bool {
        self.min.x <= other.min.x &&
        self.min.y <= other.min.y &&
        self.min.z <= other.min.z &&
        self.max.x >= other.max.x &&
        self.max.y >= other.max.y &&
        self.max.z >= other.max.z
    }
}

/// A segment from `point1` towards `point2`, cut off at `max_fraction` of its length
#[cfg_attr(feature="serde", derive(Deserialize, Serialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Ray<S> {
    pub point1: Point3<S>,
    pub point2: Point3<S>,
    pub max_fraction: S
}

impl<S> Ray<S>
where
    S: BaseFloat
{
    pub fn new(point1: Point3<S>, point2: Point3<S>) -> Self {
        Self{point1, point2, max_fraction: S::one()}
    }

    pub fn with_max_fraction(point1: Point3<S>, point2: Point3<S>, max_fraction: S) -> Self {
        Self{point1, point2, max_fraction}
    }

    pub fn point_at(&self, fraction: S) -> Point3<S> {
        self.point1 + (self.point2 - self.point1) * fraction
    }

    pub fn transformed(&self, pose: &Pose<S>) -> Self {
        Self{
            point1: pose.transform_point(self.point1),
            point2: pose.transform_point(self.point2),
            max_fraction: self.max_fraction
        }
    }
}

/// A box with arbitrary orientation: center, orthonormal axes and half-extents along them
#[cfg_attr(feature="serde", derive(Deserialize, Serialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct OrientedBox<S> {
    pub center: Point3<S>,
    pub axes: [Vector3<S>; 3],
    pub half_extents: Vector3<S>
}

impl<S> OrientedBox<S>
where
    S: BaseFloat
{
    pub fn new(center: Point3<S>, axes: [Vector3<S>; 3], half_extents: Vector3<S>) -> Self {
        Self{center, axes, half_extents}
    }

    pub fn axis_aligned(center: Point3<S>, half_extents: Vector3<S>) -> Self {
        Self::new(center, [Vector3::unit_x(), Vector3::unit_y(), Vector3::unit_z()], half_extents)
    }

    /// Places a local box of `half_extents` (centered on the shape origin) by `pose`
    pub fn from_pose(half_extents: Vector3<S>, pose: &Pose<S>) -> Self {
        let rotation = Matrix3::from(pose.rot);
        Self{
            center: Point3::from_vec(pose.disp),
            axes: [rotation.x, rotation.y, rotation.z],
            half_extents: half_extents * pose.scale
        }
    }

    /// Interval covered by the box when projected onto `axis`
    pub fn project(&self, axis: Vector3<S>) -> (S, S) {
        let center = self.center.to_vec().dot(axis);
        let radius =
            self.half_extents.x * self.axes[0].dot(axis).abs() +
            self.half_extents.y * self.axes[1].dot(axis).abs() +
            self.half_extents.z * self.axes[2].dot(axis).abs();
        (center - radius, center + radius)
    }

    pub fn translated(&self, offset: Vector3<S>) -> Self {
        Self{center: self.center + offset, ..*self}
    }

    /// Coordinates of a world point in this box's frame
    pub fn to_local(&self, point: Point3<S>) -> Point3<S> {
        let offset = point - self.center;
        Point3::new(
            offset.dot(self.axes[0]),
            offset.dot(self.axes[1]),
            offset.dot(self.axes[2]))
    }

    pub fn bounds(&self) -> Bounds<Point3<S>> {
        let mut extent = Vector3::zero();
        for axis in 0..3 {
            let unit = {
                let mut unit = Vector3::zero();
                unit[axis] = S::one();
                unit
            };
            let (min, max) = self.project(unit);
            extent[axis] = (max - min) * real::<S>(0.5);
        }
        Bounds::from_half_extents(self.center, extent)
    }
}

/// Rotates `vector` by the rotational part of `pose` only
pub(crate) fn rotate<S: BaseFloat>(pose: &Pose<S>, vector: Vector3<S>) -> Vector3<S> {
    pose.rot.rotate_vector(vector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Deg, Rotation3};

    fn unit_box(x: f32, y: f32, z: f32) -> Bounds<Point3<f32>> {
        Bounds::new(Point3::new(x, y, z), Point3::new(x + 1.0, y + 1.0, z + 1.0))
    }

    #[test]
    fn overlap_is_inclusive() {
        assert!(unit_box(0.0, 0.0, 0.0).overlaps(&unit_box(1.0, 0.0, 0.0)));
        assert!(!unit_box(0.0, 0.0, 0.0).overlaps(&unit_box(1.5, 0.0, 0.0)));
        assert!(!unit_box(0.0, 0.0, 0.0).overlaps(&unit_box(0.0, 0.0, -1.01)));
        let b = unit_box(3.0, 3.0, 3.0);
        assert!(b.overlaps(&b));
    }

    #[test]
    fn containment_includes_boundary() {
        let outer = unit_box(0.0, 0.0, 0.0);
        assert!(outer.contains(&outer));
        assert!(outer.fattened(0.1).contains(&outer));
        assert!(!outer.contains(&outer.fattened(0.1)));
    }

    #[test]
    fn union_and_area() {
        let merged = unit_box(0.0, 0.0, 0.0).union(&unit_box(1.0, 0.0, 0.0));
        assert_eq!(merged, Bounds::new(Point3::new(0.0, 0.0, 0.0), Point3::new(2.0, 1.0, 1.0)));
        assert_eq!(merged.surface_area(), 10.0);
    }

    #[test]
    fn extension_follows_displacement_sign() {
        let extended = unit_box(0.0, 0.0, 0.0).extended(Vector3::new(-1.0, 2.0, 0.0));
        assert_eq!(extended.min, Point3::new(-1.0, 0.0, 0.0));
        assert_eq!(extended.max, Point3::new(1.0, 3.0, 1.0));
    }

    #[test]
    fn ray_slab() {
        let b = unit_box(0.0, 0.0, 0.0);
        let hit = Ray::new(Point3::new(-1.0, 0.5, 0.5), Point3::new(2.0, 0.5, 0.5));
        assert!(b.intersects_ray(&hit));
        let short = Ray::with_max_fraction(hit.point1, hit.point2, 0.2);
        assert!(!b.intersects_ray(&short));
        let miss = Ray::new(Point3::new(-1.0, 2.0, 0.5), Point3::new(2.0, 2.0, 0.5));
        assert!(!b.intersects_ray(&miss));
    }

    #[test]
    fn rotated_box_bounds() {
        let pose = Decomposed{
            scale: 1.0f32,
            rot: Quaternion::from_angle_z(Deg(45.0)),
            disp: Vector3::new(1.0, 0.0, 0.0)
        };
        let obb = OrientedBox::from_pose(Vector3::new(1.0, 1.0, 1.0), &pose);
        let bounds = obb.bounds();
        let r = 2f32.sqrt();
        assert!((bounds.max.x - (1.0 + r)).abs() < 1e-5);
        assert!((bounds.max.y - r).abs() < 1e-5);
        assert!((bounds.max.z - 1.0).abs() < 1e-5);
    }
}
