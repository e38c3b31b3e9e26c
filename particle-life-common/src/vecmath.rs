use serde::{Deserialize, Serialize};
use std::ops::{Add, AddAssign, Div, Mul, Sub};

/// A simple 2D vector struct.
#[derive(Debug, Copy, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Vec2 {
    pub x: f32,
    pub y: f32,
}

impl Vec2 {
    /// Creates a new Vec2.
    #[inline(always)]
    pub fn new(x: f32, y: f32) -> Self {
        Vec2 { x, y }
    }

    /// Creates a zero vector.
    #[inline(always)]
    pub fn zero() -> Self {
        Vec2 { x: 0.0, y: 0.0 }
    }

    /// Calculates the squared length (magnitude) of the vector.
    #[inline(always)]
    pub fn length_squared(&self) -> f32 {
        self.x * self.x + self.y * self.y
    }

    /// Calculates the length (magnitude) of the vector.
    #[inline(always)]
    pub fn length(&self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Returns true if both components are finite.
    pub fn is_finite(&self) -> bool {
        self.x.is_finite() && self.y.is_finite()
    }
}

impl Add for Vec2 {
    type Output = Self;
    fn add(self, other: Self) -> Self {
        Self { x: self.x + other.x, y: self.y + other.y }
    }
}

impl AddAssign for Vec2 {
    fn add_assign(&mut self, other: Self) {
        self.x += other.x;
        self.y += other.y;
    }
}

impl Sub for Vec2 {
    type Output = Self;
    fn sub(self, other: Self) -> Self {
        Self { x: self.x - other.x, y: self.y - other.y }
    }
}

impl Mul<f32> for Vec2 {
    type Output = Self;
    fn mul(self, scalar: f32) -> Self {
        Self { x: self.x * scalar, y: self.y * scalar }
    }
}

impl Div<f32> for Vec2 {
    type Output = Self;
    fn div(self, scalar: f32) -> Self {
        Self { x: self.x / scalar, y: self.y / scalar }
    }
}

/// Clamps a value between a minimum and maximum.
#[inline(always)]
pub fn clamp(value: f32, min: f32, max: f32) -> f32 {
    value.max(min).min(max)
}

/// Linear interpolation, `a` at `t = 0` and `b` at `t = 1`.
#[inline(always)]
pub fn lerp(a: f32, b: f32, t: f32) -> f32 {
    a + (b - a) * t
}

/// Wraps a coordinate onto `[0, size)` for a periodic axis of length `size`.
///
/// Works for any finite `v`, including values several periods away from the domain.
#[inline(always)]
pub fn wrap_coord(v: f32, size: f32) -> f32 {
    let shifted = v + size;
    let wrapped = shifted - size * (shifted / size).floor();
    // f32 rounding can land exactly on `size` for tiny negative inputs.
    if wrapped >= size || wrapped < 0.0 {
        0.0
    } else {
        wrapped
    }
}

/// Shortest signed displacement along a periodic axis of length `size`.
#[inline(always)]
pub fn min_image(d: f32, size: f32) -> f32 {
    d - (d / size + 0.5).floor() * size
}

/// Shortest displacement from `from` to `to` on a `width` x `height` torus.
#[inline(always)]
pub fn toroidal_delta(from: Vec2, to: Vec2, width: f32, height: f32) -> Vec2 {
    let d = to - from;
    Vec2::new(min_image(d.x, width), min_image(d.y, height))
}
