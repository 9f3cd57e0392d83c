//! Shared types used across the window server

pub mod geometry;

pub use geometry::{Geometry, Insets, Point};
