//! Continuous separating-axis test for oriented boxes
//!
//! Both boxes translate at constant velocity over `[0, time_max]`.  Each candidate axis
//! (three face normals per box and the nine edge-edge cross products) yields the time
//! span during which the projections of the boxes overlap; the boxes touch when every
//! span is open at once.  The latest opening time is the time of impact.

use super::geom::{real, OrientedBox};
use super::narrow_phase::Contact;

use cgmath::{BaseFloat, EuclideanSpace, InnerSpace, Vector3};
use smallvec::SmallVec;

/// Squared length under which a cross product of two box axes is treated as degenerate
const PARALLEL_EPSILON: f64 = 1.0e-6;

/// Speed under which projections are treated as stationary along an axis
const SPEED_EPSILON: f64 = 1.0e-9;

/// Time span within `[0, time_max]` during which `moving` overlaps `fixed`
///
/// `speed` is the velocity of `moving` relative to `fixed` along the projection axis.
/// Returns `None` if the intervals stay disjoint for the whole window.
pub fn interval_intersection_time<S>(time_max: S, speed: S, fixed: (S, S), moving: (S, S)) -> Option<(S, S)>
where
    S: BaseFloat
{
    let (min0, max0) = fixed;
    let (min1, max1) = moving;
    let still = speed.abs() <= real::<S>(SPEED_EPSILON);

    if max1 < min0 {
        // below, must move up
        if still || speed < S::zero() {
            return None;
        }
        let first = (min0 - max1) / speed;
        if first > time_max {
            return None;
        }
        Some((first, ((max0 - min1) / speed).min(time_max)))
    } else if max0 < min1 {
        // above, must move down
        if still || speed > S::zero() {
            return None;
        }
        let first = (max0 - min1) / speed;
        if first > time_max {
            return None;
        }
        Some((first, ((min0 - max1) / speed).min(time_max)))
    } else if still {
        Some((S::zero(), time_max))
    } else {
        let last = if speed > S::zero() {
            (max0 - min1) / speed
        } else {
            (min0 - max1) / speed
        };
        Some((S::zero(), last.min(time_max)))
    }
}

struct AxisSpan<S> {
    axis: Vector3<S>,
    first: S,
    fixed: (S, S),
    moving: (S, S),
    speed: S
}

impl<S: BaseFloat> AxisSpan<S> {
    /// Length of the projection overlap at time `t`
    fn depth_at(&self, t: S) -> S {
        let shift = self.speed * t;
        let lo = self.fixed.0.max(self.moving.0 + shift);
        let hi = self.fixed.1.min(self.moving.1 + shift);
        hi - lo
    }
}

/// Candidate separating axes: face normals of both boxes, then non-degenerate edge crosses
fn candidate_axes<S>(box1: &OrientedBox<S>, box2: &OrientedBox<S>) -> SmallVec<[Vector3<S>; 15]>
where
    S: BaseFloat
{
    let mut axes: SmallVec<[Vector3<S>; 15]> = SmallVec::new();
    axes.extend_from_slice(&box1.axes);
    axes.extend_from_slice(&box2.axes);

    let epsilon = real::<S>(PARALLEL_EPSILON);
    for (i, a) in box1.axes.iter().enumerate() {
        for (j, b) in box2.axes.iter().enumerate() {
            let cross = a.cross(*b);
            if cross.magnitude2() > epsilon {
                axes.push(cross.normalize());
            } else {
                trace!("skipping near-parallel axis pair ({}, {})", i, j);
            }
        }
    }
    axes
}

/// First contact of two translating oriented boxes within `[0, time_max]`
///
/// The normal of the returned contact points from `box1` towards `box2`.  Boxes that
/// already overlap report a contact at time zero along the axis of least penetration.
pub fn test_oriented_boxes<S>(
    box1: &OrientedBox<S>,
    velocity1: Vector3<S>,
    box2: &OrientedBox<S>,
    velocity2: Vector3<S>,
    time_max: S) -> Option<Contact<S>>
where
    S: BaseFloat
{
    assert!(time_max >= S::zero(), "negative time window");

    let relative = velocity2 - velocity1;
    let mut spans: SmallVec<[AxisSpan<S>; 15]> = SmallVec::new();
    let mut enter = S::zero();
    let mut exit = time_max;

    for axis in candidate_axes(box1, box2) {
        let fixed = box1.project(axis);
        let moving = box2.project(axis);
        let speed = relative.dot(axis);

        let (first, last) = interval_intersection_time(time_max, speed, fixed, moving)?;
        enter = enter.max(first);
        exit = exit.min(last);
        if enter > exit {
            return None;
        }

        spans.push(AxisSpan{axis, first, fixed, moving, speed});
    }

    // among the axes that opened last, the one with the shallowest overlap
    let mut best: Option<(Vector3<S>, S)> = None;
    for span in spans.iter().filter(|span| span.first == enter) {
        let depth = span.depth_at(enter);
        match best {
            Some((_, best_depth)) if best_depth <= depth => (),
            _ => best = Some((span.axis, depth))
        }
    }
    let (mut normal, _) = best?;

    let moved1 = box1.translated(velocity1 * enter);
    let moved2 = box2.translated(velocity2 * enter);
    if (moved2.center - moved1.center).dot(normal) < S::zero() {
        normal = -normal;
    }

    let (min1, max1) = moved1.project(normal);
    let (min2, max2) = moved2.project(normal);
    let lo = min1.max(min2);
    let hi = max1.min(max2);
    let along = (lo + hi) * real::<S>(0.5);
    let mid = moved1.center.midpoint(moved2.center);
    let point = mid + normal * (along - mid.to_vec().dot(normal));

    Some(Contact{
        point,
        normal,
        penetration_depth: (hi - lo).max(S::zero()),
        time_of_impact: enter,
        local_point1: moved1.to_local(point),
        local_point2: moved2.to_local(point)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::{Deg, Matrix3, Point3, Zero};

    fn cube(x: f64, y: f64, z: f64) -> OrientedBox<f64> {
        OrientedBox::axis_aligned(Point3::new(x, y, z), Vector3::new(1.0, 1.0, 1.0))
    }

    #[test]
    fn approaching_intervals() {
        assert_eq!(interval_intersection_time(10.0, 2.0, (0.0, 1.0), (-5.0, -3.0)), Some((1.5, 3.0)));
        assert_eq!(interval_intersection_time(10.0, -2.0, (0.0, 1.0), (3.0, 5.0)), Some((1.0, 2.5)));
        assert_eq!(interval_intersection_time(0.5, -2.0, (0.0, 1.0), (3.0, 5.0)), None);
    }

    #[test]
    fn receding_or_still_intervals() {
        assert_eq!(interval_intersection_time(10.0, -1.0, (0.0, 1.0), (-5.0, -3.0)), None);
        assert_eq!(interval_intersection_time(10.0, 0.0, (0.0, 1.0), (3.0, 5.0)), None);
        assert_eq!(interval_intersection_time(10.0, 0.0, (0.0, 1.0), (0.5, 5.0)), Some((0.0, 10.0)));
        assert_eq!(interval_intersection_time(10.0, 1.0, (0.0, 1.0), (0.5, 5.0)), Some((0.0, 0.5)));
    }

    #[test]
    fn head_on_boxes_touch_at_four() {
        let contact = test_oriented_boxes(
            &cube(0.0, 0.0, 0.0), Vector3::zero(),
            &cube(0.0, 0.0, 10.0), Vector3::new(0.0, 0.0, -2.0),
            10.0).expect("boxes should collide");

        assert_eq!(contact.time_of_impact, 4.0);
        assert_eq!(contact.normal, Vector3::unit_z());
        assert_eq!(contact.point, Point3::new(0.0, 0.0, 1.0));
        assert_eq!(contact.penetration_depth, 0.0);
        assert_eq!(contact.local_point1, Point3::new(0.0, 0.0, 1.0));
        assert_eq!(contact.local_point2, Point3::new(0.0, 0.0, -1.0));
    }

    #[test]
    fn normal_points_from_first_to_second() {
        let contact = test_oriented_boxes(
            &cube(0.0, 0.0, 10.0), Vector3::new(0.0, 0.0, -2.0),
            &cube(0.0, 0.0, 0.0), Vector3::zero(),
            10.0).expect("boxes should collide");
        assert_eq!(contact.time_of_impact, 4.0);
        assert_eq!(contact.normal, -Vector3::unit_z());
    }

    #[test]
    fn resting_overlap_reports_time_zero() {
        let contact = test_oriented_boxes(
            &cube(0.0, 0.0, 0.0), Vector3::zero(),
            &cube(1.5, 0.0, 0.0), Vector3::zero(),
            1.0).expect("boxes overlap");
        assert_eq!(contact.time_of_impact, 0.0);
        assert_eq!(contact.normal, Vector3::unit_x());
        assert!((contact.penetration_depth - 0.5).abs() < 1e-12);
        assert!((contact.point.x - 0.75).abs() < 1e-12);
    }

    #[test]
    fn separating_boxes_never_touch() {
        assert!(test_oriented_boxes(
            &cube(0.0, 0.0, 0.0), Vector3::zero(),
            &cube(5.0, 0.0, 0.0), Vector3::new(1.0, 0.0, 0.0),
            10.0).is_none());
    }

    #[test]
    fn too_slow_to_arrive() {
        assert!(test_oriented_boxes(
            &cube(0.0, 0.0, 0.0), Vector3::zero(),
            &cube(0.0, 0.0, 10.0), Vector3::new(0.0, 0.0, -2.0),
            3.0).is_none());
    }

    #[test]
    fn passing_beside_misses() {
        // crosses the x range while fully offset in y
        assert!(test_oriented_boxes(
            &cube(0.0, 0.0, 0.0), Vector3::zero(),
            &cube(-10.0, 3.0, 0.0), Vector3::new(4.0, 0.0, 0.0),
            10.0).is_none());
    }

    #[test]
    fn rotated_box_uses_edge_axis() {
        // a cube turned 45 degrees about z reaches 1 + sqrt(2) along x
        let rotation = Matrix3::from_angle_z(Deg(45.0));
        let turned = OrientedBox::new(
            Point3::new(10.0, 0.0, 0.0),
            [rotation.x, rotation.y, rotation.z],
            Vector3::new(1.0, 1.0, 1.0));
        let contact = test_oriented_boxes(
            &cube(0.0, 0.0, 0.0), Vector3::zero(),
            &turned, Vector3::new(-1.0, 0.0, 0.0),
            20.0).expect("boxes should collide");

        let expected = 10.0 - 1.0 - 2f64.sqrt();
        assert!((contact.time_of_impact - expected).abs() < 1e-9);
        assert!((contact.normal - Vector3::unit_x()).magnitude() < 1e-9);
    }
}
