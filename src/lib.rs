//! Collision detection core for rigid-body simulation
//!
//! The [`BroadPhase`] keeps proxy shapes in a [`DynamicTree`] of fattened AABBs and
//! reports candidate pairs for shapes whose bounds changed.  The [`NarrowPhase`] resolves
//! candidate pairs with a continuous separating-axis test, yielding a [`Contact`] with
//! the time of impact.
//!
//! Bodies and shape storage belong to the caller and are passed in through the
//! [`Bodies`] and [`ProxyShapes`] traits.
//!
//! [`BroadPhase`]: struct.BroadPhase.html
//! [`DynamicTree`]: struct.DynamicTree.html
//! [`NarrowPhase`]: struct.NarrowPhase.html
//! [`Contact`]: struct.Contact.html
//! [`Bodies`]: trait.Bodies.html
//! [`ProxyShapes`]: trait.ProxyShapes.html

extern crate cgmath;
extern crate num_traits;
extern crate rustc_hash;
extern crate smallvec;

#[macro_use]
extern crate log;

#[cfg(feature="parallel")]
extern crate rayon;

#[cfg(feature="parallel")]
extern crate thread_local;

#[cfg(feature="serde")]
#[macro_use]
extern crate serde;

mod broad_phase;
mod geom;
mod narrow_phase;
mod proxy;
mod shape;
mod traits;
mod tree;

pub mod sat;

pub use broad_phase::*;
pub use geom::{identity_pose, translation_pose, Bounds, OrientedBox, Pose, Ray};
pub use narrow_phase::*;
pub use proxy::*;
pub use shape::*;
pub use traits::*;
pub use tree::*;
