use std::fmt::Debug;
use std::hash::Hash;

/// Keys identifying proxy shapes (the payload stored in tree leaves)
#[cfg(not(feature="parallel"))]
pub trait ObjectID: Copy + Clone + Hash + Ord + Debug {}

#[cfg(not(feature="parallel"))]
impl<T: Copy + Clone + Hash + Ord + Debug> ObjectID for T {}

#[cfg(feature="parallel")]
pub trait ObjectID: Copy + Clone + Hash + Ord + Send + Sync + Debug {}

#[cfg(feature="parallel")]
impl<T: Copy + Clone + Hash + Ord + Send + Sync + Debug> ObjectID for T {}

/// Inclusive containment: a volume touching the boundary is still inside
pub trait Containment<RHS = Self> {
    fn contains(&self, other: &RHS) -> bool;
}
