//! Scene geometry: points, object transforms, and the affine math that ties
//! them together.
//!
//! Every object carries a `Geometry` whose `left`/`top` locate the unrotated,
//! scaled bounding box and whose `angle` rotates that box clockwise about its
//! center. `Geometry::matrix` maps object-local coordinates (origin at the
//! center, unscaled units) into scene coordinates; composition and
//! decomposition through `Matrix` is how container-relative geometry becomes
//! scene-absolute.

#[cfg(test)]
#[path = "geometry_test.rs"]
mod geometry_test;

use serde::{Deserialize, Serialize};

/// Tolerance used for degenerate-transform checks.
const DEGENERATE_EPSILON: f64 = 1e-12;

/// A point in scene space.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    #[must_use]
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    /// Euclidean distance to another point.
    #[must_use]
    pub fn distance_to(self, other: Point) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }

    /// This point shifted by `(dx, dy)`.
    #[must_use]
    pub fn translated(self, dx: f64, dy: f64) -> Self {
        Self { x: self.x + dx, y: self.y + dy }
    }
}

/// 2D affine transform in canvas convention:
///
/// ```text
/// | a c e |
/// | b d f |
/// | 0 0 1 |
/// ```
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Matrix {
    pub a: f64,
    pub b: f64,
    pub c: f64,
    pub d: f64,
    pub e: f64,
    pub f: f64,
}

impl Matrix {
    pub const IDENTITY: Matrix = Matrix { a: 1.0, b: 0.0, c: 0.0, d: 1.0, e: 0.0, f: 0.0 };

    #[must_use]
    pub fn translation(dx: f64, dy: f64) -> Self {
        Self { e: dx, f: dy, ..Self::IDENTITY }
    }

    /// Clockwise rotation by `degrees` (scene y axis points down).
    #[must_use]
    pub fn rotation(degrees: f64) -> Self {
        let (sin, cos) = degrees.to_radians().sin_cos();
        Self { a: cos, b: sin, c: -sin, d: cos, e: 0.0, f: 0.0 }
    }

    #[must_use]
    pub fn scale(sx: f64, sy: f64) -> Self {
        Self { a: sx, d: sy, ..Self::IDENTITY }
    }

    /// `self * other`: applies `other` first, then `self`.
    #[must_use]
    pub fn multiply(&self, other: &Matrix) -> Matrix {
        Matrix {
            a: self.a * other.a + self.c * other.b,
            b: self.b * other.a + self.d * other.b,
            c: self.a * other.c + self.c * other.d,
            d: self.b * other.c + self.d * other.d,
            e: self.a * other.e + self.c * other.f + self.e,
            f: self.b * other.e + self.d * other.f + self.f,
        }
    }

    #[must_use]
    pub fn determinant(&self) -> f64 {
        self.a * self.d - self.b * self.c
    }

    /// Inverse transform, or `None` when the matrix is singular.
    #[must_use]
    pub fn invert(&self) -> Option<Matrix> {
        let det = self.determinant();
        if det.abs() < DEGENERATE_EPSILON {
            return None;
        }
        Some(Matrix {
            a: self.d / det,
            b: -self.b / det,
            c: -self.c / det,
            d: self.a / det,
            e: (self.c * self.f - self.d * self.e) / det,
            f: (self.b * self.e - self.a * self.f) / det,
        })
    }

    #[must_use]
    pub fn apply(&self, p: Point) -> Point {
        Point { x: self.a * p.x + self.c * p.y + self.e, y: self.b * p.x + self.d * p.y + self.f }
    }
}

/// Position, size, rotation and scale of a canvas object.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Geometry {
    /// Left edge of the unrotated, scaled bounding box.
    pub left: f64,
    /// Top edge of the unrotated, scaled bounding box.
    pub top: f64,
    /// Unscaled width.
    pub width: f64,
    /// Unscaled height.
    pub height: f64,
    /// Clockwise rotation in degrees about the bounding-box center.
    #[serde(default)]
    pub angle: f64,
    #[serde(default = "unit_scale")]
    pub scale_x: f64,
    #[serde(default = "unit_scale")]
    pub scale_y: f64,
}

fn unit_scale() -> f64 {
    1.0
}

impl Default for Geometry {
    fn default() -> Self {
        Self { left: 0.0, top: 0.0, width: 0.0, height: 0.0, angle: 0.0, scale_x: 1.0, scale_y: 1.0 }
    }
}

impl Geometry {
    /// Axis-aligned, unrotated, unscaled geometry.
    #[must_use]
    pub fn rect(left: f64, top: f64, width: f64, height: f64) -> Self {
        Self { left, top, width, height, ..Self::default() }
    }

    /// Rendered width after scaling.
    #[must_use]
    pub fn scaled_width(&self) -> f64 {
        self.width * self.scale_x
    }

    /// Rendered height after scaling.
    #[must_use]
    pub fn scaled_height(&self) -> f64 {
        self.height * self.scale_y
    }

    /// Center of the bounding box; the rotation pivot.
    #[must_use]
    pub fn center(&self) -> Point {
        Point::new(self.left + self.scaled_width() / 2.0, self.top + self.scaled_height() / 2.0)
    }

    /// Object-local (center origin, unscaled) to scene transform.
    #[must_use]
    pub fn matrix(&self) -> Matrix {
        let center = self.center();
        Matrix::translation(center.x, center.y)
            .multiply(&Matrix::rotation(self.angle))
            .multiply(&Matrix::scale(self.scale_x, self.scale_y))
    }

    /// Rebuild a geometry of the given unscaled size from a scene transform.
    ///
    /// Skew is discarded; rotation and scale are recovered by QR-style
    /// decomposition of the linear part.
    #[must_use]
    pub fn from_matrix(m: &Matrix, width: f64, height: f64) -> Self {
        let scale_x = m.a.hypot(m.b);
        let (angle, scale_y) = if scale_x < DEGENERATE_EPSILON {
            (0.0, m.c.hypot(m.d))
        } else {
            (m.b.atan2(m.a).to_degrees(), m.determinant() / scale_x)
        };
        Self {
            left: m.e - width * scale_x / 2.0,
            top: m.f - height * scale_y / 2.0,
            width,
            height,
            angle,
            scale_x,
            scale_y,
        }
    }

    /// Express `child` (relative to this geometry's local space) in scene space.
    #[must_use]
    pub fn compose(&self, child: &Geometry) -> Geometry {
        let m = self.matrix().multiply(&child.matrix());
        Geometry::from_matrix(&m, child.width, child.height)
    }

    /// Inverse of [`Geometry::compose`]: express a scene geometry relative to this one.
    #[must_use]
    pub fn relativize(&self, scene: &Geometry) -> Option<Geometry> {
        let inv = self.matrix().invert()?;
        let m = inv.multiply(&scene.matrix());
        Some(Geometry::from_matrix(&m, scene.width, scene.height))
    }

    /// Map a scene point into this object's local space.
    #[must_use]
    pub fn to_local(&self, p: Point) -> Option<Point> {
        Some(self.matrix().invert()?.apply(p))
    }

    /// Whether a scene point lies inside the (rotated, scaled) bounds.
    #[must_use]
    pub fn contains(&self, p: Point) -> bool {
        let Some(local) = self.to_local(p) else {
            return false;
        };
        local.x.abs() <= self.width / 2.0 && local.y.abs() <= self.height / 2.0
    }

    /// Scene position of a point given in local (center origin, unscaled) units.
    #[must_use]
    pub fn local_to_scene(&self, local: Point) -> Point {
        self.matrix().apply(local)
    }

    pub fn translate(&mut self, dx: f64, dy: f64) {
        self.left += dx;
        self.top += dy;
    }

    /// Axis-aligned bounding box of the rotated, scaled object as
    /// `(min_x, min_y, max_x, max_y)`.
    #[must_use]
    pub fn bounding_box(&self) -> (f64, f64, f64, f64) {
        let hw = self.width / 2.0;
        let hh = self.height / 2.0;
        let corners = [Point::new(-hw, -hh), Point::new(hw, -hh), Point::new(hw, hh), Point::new(-hw, hh)];
        let m = self.matrix();
        corners.iter().map(|c| m.apply(*c)).fold(
            (f64::INFINITY, f64::INFINITY, f64::NEG_INFINITY, f64::NEG_INFINITY),
            |(x0, y0, x1, y1), p| (x0.min(p.x), y0.min(p.y), x1.max(p.x), y1.max(p.y)),
        )
    }
}
