use super::geom::OrientedBox;
use super::sat;
use super::traits::ObjectID;

use cgmath::{BaseFloat, Point3, Vector3};

use std::ops::DerefMut;

#[cfg(feature="parallel")]
use rayon::prelude::*;

#[cfg(feature="parallel")]
use std::cell::RefCell;

#[cfg(feature="parallel")]
use thread_local::ThreadLocal;

/// Where and when two shapes first touch
#[cfg_attr(feature="serde", derive(Deserialize, Serialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Contact<S> {
    /// world-space contact point at the time of impact
    pub point: Point3<S>,
    /// unit normal pointing from the first shape to the second
    pub normal: Vector3<S>,
    pub penetration_depth: S,
    pub time_of_impact: S,
    /// `point` in the frame of the first shape at the time of impact
    pub local_point1: Point3<S>,
    /// `point` in the frame of the second shape at the time of impact
    pub local_point2: Point3<S>
}

/// Narrow-phase representation of a placed shape
#[cfg_attr(feature="serde", derive(Deserialize, Serialize))]
#[derive(Copy, Clone, Debug, PartialEq)]
pub enum BoundingVolume<S> {
    OrientedBox(OrientedBox<S>)
}

/// A bounding volume and its linear velocity over the step
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Motion<S> {
    pub volume: BoundingVolume<S>,
    pub velocity: Vector3<S>
}

/// Selects the test for a pair of volume kinds and runs it
///
/// Returns the earliest contact within `[0, time_max]`, if any.
pub fn test_collision<S>(motion1: &Motion<S>, motion2: &Motion<S>, time_max: S) -> Option<Contact<S>>
where
    S: BaseFloat
{
    match (&motion1.volume, &motion2.volume) {
        (BoundingVolume::OrientedBox(box1), BoundingVolume::OrientedBox(box2)) =>
            sat::test_oriented_boxes(box1, motion1.velocity, box2, motion2.velocity, time_max)
    }
}

/// A contact along with the pair of shapes that produced it
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct ShapeContact<S, ID> {
    pub shape1: ID,
    pub shape2: ID,
    pub contact: Contact<S>
}

/// Resolves candidate pairs into contacts
///
/// Tests are independent of each other, so [`par_test_pairs`] may spread them over
/// threads.  Results are ordered by shape pair either way.
///
/// [`par_test_pairs`]: struct.NarrowPhase.html#method.par_test_pairs
pub struct NarrowPhase<S, ID>
where
    S: BaseFloat + Send + Sync,
    ID: ObjectID
{
    contacts: Vec<ShapeContact<S, ID>>,

    #[cfg(feature="parallel")]
    contacts_tls: ThreadLocal<RefCell<Vec<ShapeContact<S, ID>>>>,
}

impl<S, ID> NarrowPhase<S, ID>
where
    S: BaseFloat + Send + Sync,
    ID: ObjectID
{
    pub fn new() -> Self {
        Self{
            contacts: Vec::new(),
            #[cfg(feature="parallel")]
            contacts_tls: ThreadLocal::new()
        }
    }

    /// Contacts found by the last call to a `test_pairs` method
    pub fn contacts(&self) -> &[ShapeContact<S, ID>] {
        &self.contacts
    }

    pub fn clear(&mut self) {
        self.contacts.clear();
    }

    /// Test every pair, looking up each shape's motion through `motion`
    pub fn test_pairs<F>(&mut self, pairs: &[(ID, ID)], time_max: S, motion: F)
        -> &Vec<ShapeContact<S, ID>>
    where
        F: Fn(ID) -> Motion<S>
    {
        self.contacts.clear();
        Self::test_impl(pairs, time_max, &mut self.contacts, &motion);
        self.contacts.sort_unstable_by_key(|found| (found.shape1, found.shape2));
        debug!("narrow phase: {} contacts from {} pairs", self.contacts.len(), pairs.len());
        &self.contacts
    }

    /// Parallel version of [`test_pairs`]
    ///
    /// [`test_pairs`]: struct.NarrowPhase.html#method.test_pairs
    #[cfg(feature="parallel")]
    pub fn par_test_pairs<F>(&mut self, pairs: &[(ID, ID)], time_max: S, motion: F)
        -> &Vec<ShapeContact<S, ID>>
    where
        F: Fn(ID) -> Motion<S> + Sync
    {
        for set in self.contacts_tls.iter_mut() {
            set.borrow_mut().clear();
        }

        self.par_test_impl(rayon::current_num_threads(), pairs, time_max, &motion);

        self.contacts.clear();
        for set in self.contacts_tls.iter_mut() {
            self.contacts.extend(set.borrow().iter());
        }

        self.contacts.par_sort_unstable_by_key(|found| (found.shape1, found.shape2));
        debug!("narrow phase: {} contacts from {} pairs", self.contacts.len(), pairs.len());
        &self.contacts
    }

    #[cfg(feature="parallel")]
    fn par_test_impl<F>(&self, threads: usize, pairs: &[(ID, ID)], time_max: S, motion: &F)
    where
        F: Fn(ID) -> Motion<S> + Sync
    {
        const SPLIT_THRESHOLD: usize = 64;
        if threads <= 1 || pairs.len() <= SPLIT_THRESHOLD {
            let contacts = self.contacts_tls.get_or(|| RefCell::new(Vec::new()));
            Self::test_impl(pairs, time_max, contacts.borrow_mut(), motion);
        } else {
            let (head, tail) = pairs.split_at(pairs.len() / 2);
            rayon::join(
                || self.par_test_impl(threads >> 1, head, time_max, motion),
                || self.par_test_impl(threads >> 1, tail, time_max, motion));
        }
    }

    fn test_impl<C, F>(pairs: &[(ID, ID)], time_max: S, mut contacts: C, motion: &F)
    where
        C: DerefMut<Target = Vec<ShapeContact<S, ID>>>,
        F: Fn(ID) -> Motion<S>
    {
        for &(shape1, shape2) in pairs {
            if let Some(contact) = test_collision(&motion(shape1), &motion(shape2), time_max) {
                contacts.push(ShapeContact{shape1, shape2, contact});
            }
        }
    }
}

impl<S, ID> Default for NarrowPhase<S, ID>
where
    S: BaseFloat + Send + Sync,
    ID: ObjectID
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cgmath::Zero;

    fn cube_at(x: f32) -> BoundingVolume<f32> {
        BoundingVolume::OrientedBox(OrientedBox::axis_aligned(
            Point3::new(x, 0.0, 0.0),
            Vector3::new(0.5, 0.5, 0.5)))
    }

    fn motion(id: u32) -> Motion<f32> {
        // even shapes sit still on a line, odd shapes slide towards -x
        let velocity = if id % 2 == 0 { Vector3::zero() } else { Vector3::new(-1.0, 0.0, 0.0) };
        Motion{volume: cube_at(3.0 * id as f32), velocity}
    }

    #[test]
    fn dispatches_box_pairs() {
        let contact = test_collision(&motion(0), &motion(1), 3.0).expect("should touch");
        assert_eq!(contact.time_of_impact, 2.0);
        assert!(test_collision(&motion(0), &motion(1), 1.0).is_none());
    }

    #[test]
    fn batch_keeps_hits_in_pair_order() {
        let pairs = vec![(2, 3), (0, 1), (0, 2), (4, 5)];
        // scalar first, then shape key, as in `BroadPhase`
        let mut narrow_phase: NarrowPhase<f32, u32> = NarrowPhase::new();
        let found: Vec<(u32, u32)> = narrow_phase.test_pairs(&pairs, 3.0, motion)
            .iter()
            .map(|found| (found.shape1, found.shape2))
            .collect();
        assert_eq!(found, vec![(0, 1), (2, 3), (4, 5)]);
    }

    #[cfg(feature="parallel")]
    #[test]
    fn parallel_matches_sequential() {
        let pairs: Vec<(u32, u32)> = (0..500u32)
            .flat_map(|i| vec![(2 * i, 2 * i + 1), (2 * i, 2 * i + 2)])
            .collect();

        let mut narrow_phase = NarrowPhase::new();
        let sequential = narrow_phase.test_pairs(&pairs, 3.0, motion).clone();
        let parallel = narrow_phase.par_test_pairs(&pairs, 3.0, motion).clone();

        assert_eq!(sequential.len(), 500);
        assert_eq!(sequential, parallel);
    }
}
