//! Model heads
//!
//! The ensemble is two linear heads over the same feature vector: a logistic
//! classifier for P(home wins) and a regressor for the home margin.

pub mod linear;

pub use linear::{sigmoid, HeadWeights, LinearHead};
