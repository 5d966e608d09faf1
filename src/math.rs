//! Scalar vector, quaternion, and matrix helpers for agent pose tracking.
//!
//! Quaternions use [w, x, y, z] component order. Rotation matrices are
//! row-major `[f32; 9]`; the view matrix is column-major `[f32; 16]` as the
//! renderer consumes it.

use std::ops::{Add, Mul, Neg, Sub};

// ============================================================================
// Vec3
// ============================================================================

/// A 3-component vector.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Vec3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vec3 {
    pub const ZERO: Self = Self { x: 0.0, y: 0.0, z: 0.0 };

    #[inline(always)]
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    #[inline(always)]
    pub const fn from_array(a: [f32; 3]) -> Self {
        Self::new(a[0], a[1], a[2])
    }

    #[inline(always)]
    pub const fn as_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }

    #[inline(always)]
    pub fn scale(self, s: f32) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }

    #[inline(always)]
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    #[inline(always)]
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    #[inline(always)]
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Straight-line distance between two points.
    #[inline(always)]
    pub fn distance(self, other: Self) -> f32 {
        (self - other).length()
    }
}

impl Add for Vec3 {
    type Output = Self;

    #[inline(always)]
    fn add(self, rhs: Self) -> Self {
        Self::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z)
    }
}

impl Sub for Vec3 {
    type Output = Self;

    #[inline(always)]
    fn sub(self, rhs: Self) -> Self {
        Self::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z)
    }
}

impl Neg for Vec3 {
    type Output = Self;

    #[inline(always)]
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

// ============================================================================
// Quat
// ============================================================================

/// A rotation quaternion, [w, x, y, z] order.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Quat {
    pub w: f32,
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Quat {
    pub const IDENTITY: Self = Self { w: 1.0, x: 0.0, y: 0.0, z: 0.0 };

    #[inline(always)]
    pub const fn new(w: f32, x: f32, y: f32, z: f32) -> Self {
        Self { w, x, y, z }
    }

    #[inline(always)]
    pub const fn from_array(a: [f32; 4]) -> Self {
        Self::new(a[0], a[1], a[2], a[3])
    }

    /// Rotation of `angle` radians about `axis` (assumed unit length).
    #[inline(always)]
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let half = angle * 0.5;
        let s = half.sin();
        Self::new(half.cos(), axis.x * s, axis.y * s, axis.z * s)
    }

    #[inline(always)]
    pub fn normalize(self) -> Self {
        let norm =
            (self.w * self.w + self.x * self.x + self.y * self.y + self.z * self.z).sqrt();
        if norm < 1e-10 {
            return Self::IDENTITY;
        }
        let inv = 1.0 / norm;
        Self::new(self.w * inv, self.x * inv, self.y * inv, self.z * inv)
    }

    /// Rotate a vector by this quaternion: v' = q v q*.
    #[inline(always)]
    pub fn rotate(self, v: Vec3) -> Vec3 {
        let u = Vec3::new(self.x, self.y, self.z);
        let t = u.cross(v).scale(2.0);
        v + t.scale(self.w) + u.cross(t)
    }

    /// Row-major 3x3 rotation matrix (world from body).
    #[inline(always)]
    pub fn to_rotation_matrix(self) -> [f32; 9] {
        let (w, x, y, z) = (self.w, self.x, self.y, self.z);

        let xx = x * x;
        let yy = y * y;
        let zz = z * z;
        let xy = x * y;
        let xz = x * z;
        let yz = y * z;
        let wx = w * x;
        let wy = w * y;
        let wz = w * z;

        [
            1.0 - 2.0 * (yy + zz),
            2.0 * (xy - wz),
            2.0 * (xz + wy),
            2.0 * (xy + wz),
            1.0 - 2.0 * (xx + zz),
            2.0 * (yz - wx),
            2.0 * (xz - wy),
            2.0 * (yz + wx),
            1.0 - 2.0 * (xx + yy),
        ]
    }
}

impl Mul for Quat {
    type Output = Self;

    /// Hamilton product: the right-hand rotation is applied first.
    #[inline(always)]
    fn mul(self, rhs: Self) -> Self {
        let (w1, x1, y1, z1) = (self.w, self.x, self.y, self.z);
        let (w2, x2, y2, z2) = (rhs.w, rhs.x, rhs.y, rhs.z);

        Self::new(
            w1 * w2 - x1 * x2 - y1 * y2 - z1 * z2,
            w1 * x2 + x1 * w2 + y1 * z2 - z1 * y2,
            w1 * y2 - x1 * z2 + y1 * w2 + z1 * x2,
            w1 * z2 + x1 * y2 - y1 * x2 + z1 * w2,
        )
    }
}

// ============================================================================
// Mat4 (view matrix)
// ============================================================================

/// Column-major 4x4 matrix in the layout the renderer consumes.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mat4(pub [f32; 16]);

impl Mat4 {
    pub const IDENTITY: Self = Self([
        1.0, 0.0, 0.0, 0.0, //
        0.0, 1.0, 0.0, 0.0, //
        0.0, 0.0, 1.0, 0.0, //
        0.0, 0.0, 0.0, 1.0,
    ]);

    /// World-to-camera view matrix for an eye at `eye` oriented by
    /// `rotation`: rotation block = transpose(R), translation column =
    /// -transpose(R) * eye.
    pub fn view(rotation: Quat, eye: Vec3) -> Self {
        let r = rotation.to_rotation_matrix();
        let mut m = [0.0f32; 16];

        // Columns of transpose(R) are rows of R.
        for col in 0..3 {
            for row in 0..3 {
                m[col * 4 + row] = r[col * 3 + row];
            }
        }

        // Translation column: rows of transpose(R) are columns of R.
        for row in 0..3 {
            m[12 + row] = -(r[row] * eye.x + r[3 + row] * eye.y + r[6 + row] * eye.z);
        }
        m[15] = 1.0;

        Self(m)
    }
}

// ============================================================================
// Polar goal projection
// ============================================================================

/// Transform a world-space vector into the camera frame of `rotation`.
#[inline(always)]
pub fn world_to_camera(rotation: Quat, v: Vec3) -> Vec3 {
    let r = rotation.to_rotation_matrix();
    // transpose(R) * v
    Vec3::new(
        r[0] * v.x + r[3] * v.y + r[6] * v.z,
        r[1] * v.x + r[4] * v.y + r[7] * v.z,
        r[2] * v.x + r[5] * v.y + r[8] * v.z,
    )
}

/// 2D polar form (rho, -phi) of the goal direction in the agent's camera
/// frame, using the (-z, x) camera-plane axes.
#[inline(always)]
pub fn polar_goal(rotation: Quat, position: Vec3, goal: Vec3) -> [f32; 2] {
    let to_goal = world_to_camera(rotation, goal - position);
    let x = -to_goal.z;
    let y = to_goal.x;
    let rho = (x * x + y * y).sqrt();
    let phi = y.atan2(x);
    [rho, -phi]
}
