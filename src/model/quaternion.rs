use serde::{Deserialize, Serialize};

/// A unit-ish quaternion in (x, y, z, w) order. The identity rotation is
/// `(0, 0, 0, 1)`.
///
/// Operations here assume the inputs are unit quaternions (callers that
/// accumulate error over many compositions should renormalize; [`slerp`]
/// does this for its own inputs since misbehaved callers are common there).
///
/// [`slerp`]: Quaternion::slerp
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quaternion {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub w: f64,
}

impl Default for Quaternion {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quaternion {
    pub const IDENTITY: Quaternion = Quaternion {
        x: 0.0,
        y: 0.0,
        z: 0.0,
        w: 1.0,
    };

    pub fn new(x: f64, y: f64, z: f64, w: f64) -> Self {
        Quaternion { x, y, z, w }
    }

    pub fn norm(&self) -> f64 {
        (self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w).sqrt()
    }

    /// Returns `self` scaled to unit length. Returns the identity quaternion
    /// if `self` is (numerically) the zero quaternion.
    pub fn normalized(&self) -> Quaternion {
        let n = self.norm();
        if n < 1e-12 {
            return Quaternion::IDENTITY;
        }
        Quaternion::new(self.x / n, self.y / n, self.z / n, self.w / n)
    }

    /// Hamilton product `self * other`.
    pub fn mul(&self, other: &Quaternion) -> Quaternion {
        Quaternion {
            x: self.w * other.x + self.x * other.w + self.y * other.z - self.z * other.y,
            y: self.w * other.y - self.x * other.z + self.y * other.w + self.z * other.x,
            z: self.w * other.z + self.x * other.y - self.y * other.x + self.z * other.w,
            w: self.w * other.w - self.x * other.x - self.y * other.y - self.z * other.z,
        }
    }

    pub fn conjugate(&self) -> Quaternion {
        Quaternion::new(-self.x, -self.y, -self.z, self.w)
    }

    /// Rotates `v` by this quaternion: `q . v . q*`, treating `v` as a pure
    /// quaternion `(v, 0)`.
    pub fn rotate_vector(&self, v: (f64, f64, f64)) -> (f64, f64, f64) {
        let vq = Quaternion::new(v.0, v.1, v.2, 0.0);
        let r = self.mul(&vq).mul(&self.conjugate());
        (r.x, r.y, r.z)
    }

    /// Spherical linear interpolation between two quaternions at `t in [0, 1]`.
    /// Both inputs are renormalized first. Falls back to linear interpolation
    /// (then renormalizes) when the quaternions are nearly parallel, to avoid
    /// dividing by a near-zero `sin(omega)`.
    pub fn slerp(&self, other: &Quaternion, t: f64) -> Quaternion {
        let q1 = self.normalized();
        let mut q2 = other.normalized();

        let mut dot = q1.x * q2.x + q1.y * q2.y + q1.z * q2.z + q1.w * q2.w;
        // Take the shorter arc.
        if dot < 0.0 {
            q2 = Quaternion::new(-q2.x, -q2.y, -q2.z, -q2.w);
            dot = -dot;
        }

        if dot > 0.9995 {
            let lerp = Quaternion::new(
                q1.x + t * (q2.x - q1.x),
                q1.y + t * (q2.y - q1.y),
                q1.z + t * (q2.z - q1.z),
                q1.w + t * (q2.w - q1.w),
            );
            return lerp.normalized();
        }

        let omega = dot.acos();
        let sin_omega = omega.sin();
        let s1 = ((1.0 - t) * omega).sin() / sin_omega;
        let s2 = (t * omega).sin() / sin_omega;
        Quaternion::new(
            s1 * q1.x + s2 * q2.x,
            s1 * q1.y + s2 * q2.y,
            s1 * q1.z + s2 * q2.z,
            s1 * q1.w + s2 * q2.w,
        )
    }

    /// Builds a quaternion from intrinsic XYZ Euler angles, in radians.
    /// Provided for convenience; the pipeline itself only ever passes
    /// quaternions around.
    pub fn from_euler_xyz(roll: f64, pitch: f64, yaw: f64) -> Quaternion {
        let (sr, cr) = (roll * 0.5).sin_cos();
        let (sp, cp) = (pitch * 0.5).sin_cos();
        let (sy, cy) = (yaw * 0.5).sin_cos();
        Quaternion {
            x: sr * cp * cy - cr * sp * sy,
            y: cr * sp * cy + sr * cp * sy,
            z: cr * cp * sy - sr * sp * cy,
            w: cr * cp * cy + sr * sp * sy,
        }
    }

    /// Inverse of [`from_euler_xyz`](Quaternion::from_euler_xyz): returns
    /// `(roll, pitch, yaw)` in radians.
    pub fn to_euler_xyz(&self) -> (f64, f64, f64) {
        let q = self.normalized();

        let sinr_cosp = 2.0 * (q.w * q.x + q.y * q.z);
        let cosr_cosp = 1.0 - 2.0 * (q.x * q.x + q.y * q.y);
        let roll = sinr_cosp.atan2(cosr_cosp);

        let sinp = 2.0 * (q.w * q.y - q.z * q.x);
        let pitch = if sinp.abs() >= 1.0 {
            std::f64::consts::FRAC_PI_2.copysign(sinp)
        } else {
            sinp.asin()
        };

        let siny_cosp = 2.0 * (q.w * q.z + q.x * q.y);
        let cosy_cosp = 1.0 - 2.0 * (q.y * q.y + q.z * q.z);
        let yaw = siny_cosp.atan2(cosy_cosp);

        (roll, pitch, yaw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn approx_eq(a: (f64, f64, f64), b: (f64, f64, f64), eps: f64) {
        assert!((a.0 - b.0).abs() < eps, "{:?} vs {:?}", a, b);
        assert!((a.1 - b.1).abs() < eps, "{:?} vs {:?}", a, b);
        assert!((a.2 - b.2).abs() < eps, "{:?} vs {:?}", a, b);
    }

    #[test]
    fn identity_rotates_nothing() {
        let v = (1.0, 2.0, 3.0);
        approx_eq(Quaternion::IDENTITY.rotate_vector(v), v, 1e-9);
    }

    #[test]
    fn composition_matches_sequential_rotation() {
        // invariant: rotate(q2, rotate(q1, v)) == rotate(q2 . q1, v)
        let q1 = Quaternion::from_euler_xyz(0.3, -0.2, 0.7).normalized();
        let q2 = Quaternion::from_euler_xyz(-0.9, 0.4, 0.1).normalized();
        let v = (0.5, -1.25, 2.0);

        let sequential = q2.rotate_vector(q1.rotate_vector(v));
        let composed = q2.mul(&q1).rotate_vector(v);

        approx_eq(sequential, composed, 1e-9);
    }

    #[test]
    fn slerp_endpoints_recover_inputs() {
        let q1 = Quaternion::from_euler_xyz(0.1, 0.2, 0.3);
        let q2 = Quaternion::from_euler_xyz(0.8, -0.3, 1.1);

        let at0 = q1.slerp(&q2, 0.0);
        let at1 = q1.slerp(&q2, 1.0);

        let v = (1.0, 0.0, 0.0);
        approx_eq(at0.rotate_vector(v), q1.normalized().rotate_vector(v), 1e-6);
        approx_eq(at1.rotate_vector(v), q2.normalized().rotate_vector(v), 1e-6);
    }

    #[test]
    fn euler_roundtrip() {
        let q = Quaternion::from_euler_xyz(0.4, 0.25, -0.6);
        let (r, p, y) = q.to_euler_xyz();
        let back = Quaternion::from_euler_xyz(r, p, y);
        let v = (1.0, 1.0, 1.0);
        approx_eq(q.rotate_vector(v), back.rotate_vector(v), 1e-9);
    }
}
