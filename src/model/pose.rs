use serde::{Deserialize, Serialize};

use super::Quaternion;

/// A point in 3D space.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point {
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Point { x, y, z }
    }

    pub fn add(&self, other: &Point) -> Point {
        Point::new(self.x + other.x, self.y + other.y, self.z + other.z)
    }

    pub fn sub(&self, other: &Point) -> Point {
        Point::new(self.x - other.x, self.y - other.y, self.z - other.z)
    }

    pub fn scale(&self, s: f64) -> Point {
        Point::new(self.x * s, self.y * s, self.z * s)
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z).sqrt()
    }

    pub fn as_tuple(&self) -> (f64, f64, f64) {
        (self.x, self.y, self.z)
    }
}

impl From<(f64, f64, f64)> for Point {
    fn from(t: (f64, f64, f64)) -> Self {
        Point::new(t.0, t.1, t.2)
    }
}

/// Position plus orientation. Identity orientation is [`Quaternion::IDENTITY`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct Pose {
    pub position: Point,
    pub orientation: Quaternion,
}

impl Pose {
    pub fn new(position: Point, orientation: Quaternion) -> Self {
        Pose {
            position,
            orientation,
        }
    }

    pub fn identity() -> Self {
        Pose::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn point_arithmetic() {
        let a = Point::new(1.0, 2.0, 3.0);
        let b = Point::new(0.5, -1.0, 1.0);
        assert_eq!(a.add(&b), Point::new(1.5, 1.0, 4.0));
        assert_eq!(a.sub(&b), Point::new(0.5, 3.0, 2.0));
        assert_eq!(a.scale(2.0), Point::new(2.0, 4.0, 6.0));
    }

    #[test]
    fn pose_default_is_identity() {
        let pose = Pose::identity();
        assert_eq!(pose.orientation, Quaternion::IDENTITY);
        assert_eq!(pose.position, Point::default());
    }
}
