//! Geometry primitives
//!
//! Points, rectangles and insets in integer screen coordinates.

use serde::{Deserialize, Serialize};
use std::ops::{Add, Sub};

/// A location in integer coordinates
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Point {
    pub x: i32,
    pub y: i32,
}

impl Point {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

// Saturating: platform locations may sit anywhere in the i32 range.
impl Add for Point {
    type Output = Point;

    fn add(self, rhs: Point) -> Point {
        Point::new(self.x.saturating_add(rhs.x), self.y.saturating_add(rhs.y))
    }
}

impl Sub for Point {
    type Output = Point;

    fn sub(self, rhs: Point) -> Point {
        Point::new(self.x.saturating_sub(rhs.x), self.y.saturating_sub(rhs.y))
    }
}

/// Window geometry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Geometry {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Geometry {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Top-left corner
    pub fn origin(&self) -> Point {
        Point::new(self.x, self.y)
    }

    /// Returns true if `point` (in the same coordinate space as the geometry) lies inside.
    /// The right and bottom edges are exclusive.
    pub fn contains(&self, point: Point) -> bool {
        let right = self.x as i64 + self.width as i64;
        let bottom = self.y as i64 + self.height as i64;
        point.x >= self.x
            && point.y >= self.y
            && (point.x as i64) < right
            && (point.y as i64) < bottom
    }

    /// Shrink the rectangle by `insets`, clamping at zero size
    pub fn inset(&self, insets: Insets) -> Geometry {
        let horizontal = insets.left.max(0) as u32 + insets.right.max(0) as u32;
        let vertical = insets.top.max(0) as u32 + insets.bottom.max(0) as u32;
        Geometry {
            x: self.x.saturating_add(insets.left.max(0)),
            y: self.y.saturating_add(insets.top.max(0)),
            width: self.width.saturating_sub(horizontal),
            height: self.height.saturating_sub(vertical),
        }
    }
}

/// Edge insets, used to describe the client area inside a window's bounds
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Insets {
    pub top: i32,
    pub left: i32,
    pub bottom: i32,
    pub right: i32,
}

impl Insets {
    pub fn new(top: i32, left: i32, bottom: i32, right: i32) -> Self {
        Self { top, left, bottom, right }
    }
}
