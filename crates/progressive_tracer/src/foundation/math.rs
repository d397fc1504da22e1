//! Math utilities and types
//!
//! Small, self-contained linear algebra kernel backing every camera and light
//! transform. Matrices are 4x4, column-major, stored as 16 contiguous `f32`
//! so they can be copied verbatim into constant blocks read by the integrator.
//!
//! Conversions to and from `nalgebra` are provided for interop; the kernel
//! itself does not depend on it.

use std::ops::{Add, AddAssign, Index, IndexMut, Mul, Neg, Sub, SubAssign};

use approx::{AbsDiffEq, RelativeEq};
use serde::{Deserialize, Serialize};

/// Threshold used by [`Mat4::inverse`] to decide when a 2x2 block is too
/// close to singular to divide by.
pub const INVERSE_EPSILON: f32 = 0.0001;

/// 2D vector type
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    bytemuck::Pod,
    bytemuck::Zeroable,
)]
pub struct Vec2 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
}

/// 3D vector type
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    bytemuck::Pod,
    bytemuck::Zeroable,
)]
pub struct Vec3 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
}

/// 4D vector type
#[repr(C)]
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Default,
    Serialize,
    Deserialize,
    bytemuck::Pod,
    bytemuck::Zeroable,
)]
pub struct Vec4 {
    /// X component
    pub x: f32,
    /// Y component
    pub y: f32,
    /// Z component
    pub z: f32,
    /// W component
    pub w: f32,
}

impl Vec2 {
    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0);

    /// Create a new vector
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y }
    }

    /// Dot product
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y
    }

    /// Euclidean length
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit-length copy; a zero vector is returned unchanged
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len > 0.0 {
            self * (1.0 / len)
        } else {
            self
        }
    }

    /// Components as an array
    pub const fn to_array(self) -> [f32; 2] {
        [self.x, self.y]
    }
}

impl Vec3 {
    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0);
    /// World up axis
    pub const Y: Self = Self::new(0.0, 1.0, 0.0);

    /// Create a new vector
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }

    /// Vector with every component set to `v`
    pub const fn splat(v: f32) -> Self {
        Self::new(v, v, v)
    }

    /// Dot product
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z
    }

    /// Cross product
    pub fn cross(self, other: Self) -> Self {
        Self::new(
            self.y * other.z - self.z * other.y,
            self.z * other.x - self.x * other.z,
            self.x * other.y - self.y * other.x,
        )
    }

    /// Squared length
    pub fn length_squared(self) -> f32 {
        self.dot(self)
    }

    /// Euclidean length
    pub fn length(self) -> f32 {
        self.length_squared().sqrt()
    }

    /// Unit-length copy; a zero vector is returned unchanged
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len > 0.0 {
            self * (1.0 / len)
        } else {
            self
        }
    }

    /// True when every component is exactly zero
    pub fn is_zero(self) -> bool {
        self.x == 0.0 && self.y == 0.0 && self.z == 0.0
    }

    /// Extend to a homogeneous vector
    pub const fn extend(self, w: f32) -> Vec4 {
        Vec4::new(self.x, self.y, self.z, w)
    }

    /// Components as an array
    pub const fn to_array(self) -> [f32; 3] {
        [self.x, self.y, self.z]
    }
}

impl Vec4 {
    /// Zero vector
    pub const ZERO: Self = Self::new(0.0, 0.0, 0.0, 0.0);

    /// Create a new vector
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Self { x, y, z, w }
    }

    /// Dot product
    pub fn dot(self, other: Self) -> f32 {
        self.x * other.x + self.y * other.y + self.z * other.z + self.w * other.w
    }

    /// Euclidean length
    pub fn length(self) -> f32 {
        self.dot(self).sqrt()
    }

    /// Unit-length copy; a zero vector is returned unchanged
    pub fn normalize(self) -> Self {
        let len = self.length();
        if len > 0.0 {
            self * (1.0 / len)
        } else {
            self
        }
    }

    /// Drop the W component
    pub const fn truncate(self) -> Vec3 {
        Vec3::new(self.x, self.y, self.z)
    }

    /// Components as an array
    pub const fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }
}

macro_rules! impl_vector_ops {
    ($ty:ident { $($field:ident),+ }) => {
        impl Add for $ty {
            type Output = Self;
            fn add(self, rhs: Self) -> Self {
                Self { $($field: self.$field + rhs.$field),+ }
            }
        }

        impl Sub for $ty {
            type Output = Self;
            fn sub(self, rhs: Self) -> Self {
                Self { $($field: self.$field - rhs.$field),+ }
            }
        }

        impl Mul<f32> for $ty {
            type Output = Self;
            fn mul(self, rhs: f32) -> Self {
                Self { $($field: self.$field * rhs),+ }
            }
        }

        impl Neg for $ty {
            type Output = Self;
            fn neg(self) -> Self {
                Self { $($field: -self.$field),+ }
            }
        }

        impl AddAssign for $ty {
            fn add_assign(&mut self, rhs: Self) {
                $(self.$field += rhs.$field;)+
            }
        }

        impl SubAssign for $ty {
            fn sub_assign(&mut self, rhs: Self) {
                $(self.$field -= rhs.$field;)+
            }
        }

        impl AbsDiffEq for $ty {
            type Epsilon = f32;

            fn default_epsilon() -> f32 {
                f32::EPSILON
            }

            fn abs_diff_eq(&self, other: &Self, epsilon: f32) -> bool {
                $(self.$field.abs_diff_eq(&other.$field, epsilon))&&+
            }
        }

        impl RelativeEq for $ty {
            fn default_max_relative() -> f32 {
                f32::EPSILON
            }

            fn relative_eq(&self, other: &Self, epsilon: f32, max_relative: f32) -> bool {
                $(self.$field.relative_eq(&other.$field, epsilon, max_relative))&&+
            }
        }
    };
}

impl_vector_ops!(Vec2 { x, y });
impl_vector_ops!(Vec3 { x, y, z });
impl_vector_ops!(Vec4 { x, y, z, w });

/// Rotation quaternion, `w` is the scalar part
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quat {
    /// X component of the vector part
    pub x: f32,
    /// Y component of the vector part
    pub y: f32,
    /// Z component of the vector part
    pub z: f32,
    /// Scalar part
    pub w: f32,
}

impl Default for Quat {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Quat {
    /// No rotation
    pub const IDENTITY: Self = Self { x: 0.0, y: 0.0, z: 0.0, w: 1.0 };

    /// Rotation of `angle` radians about `axis`. The axis is normalized here.
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        let axis = axis.normalize();
        let (sin, cos) = (angle * 0.5).sin_cos();
        Self {
            x: axis.x * sin,
            y: axis.y * sin,
            z: axis.z * sin,
            w: cos,
        }
    }

    /// Squared norm
    pub fn norm_squared(self) -> f32 {
        self.x * self.x + self.y * self.y + self.z * self.z + self.w * self.w
    }
}

/// 4x4 column-major matrix
///
/// Element `i` of the backing array is row `i % 4`, column `i / 4`; the
/// translation lives in elements 12, 13 and 14.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Mat4 {
    /// Column-major elements
    pub m: [f32; 16],
}

impl Default for Mat4 {
    fn default() -> Self {
        Self::IDENTITY
    }
}

impl Index<usize> for Mat4 {
    type Output = f32;

    fn index(&self, index: usize) -> &f32 {
        &self.m[index]
    }
}

impl IndexMut<usize> for Mat4 {
    fn index_mut(&mut self, index: usize) -> &mut f32 {
        &mut self.m[index]
    }
}

impl Mat4 {
    /// Identity matrix
    pub const IDENTITY: Self = Self {
        m: [
            1.0, 0.0, 0.0, 0.0, //
            0.0, 1.0, 0.0, 0.0, //
            0.0, 0.0, 1.0, 0.0, //
            0.0, 0.0, 0.0, 1.0,
        ],
    };

    /// All-zero matrix
    pub const ZERO: Self = Self { m: [0.0; 16] };

    /// Build from 16 column-major elements
    pub const fn from_cols_array(m: [f32; 16]) -> Self {
        Self { m }
    }

    /// Build from rows, as the matrix would be written on paper
    pub fn from_rows(rows: [[f32; 4]; 4]) -> Self {
        let mut out = Self::ZERO;
        for (row, values) in rows.iter().enumerate() {
            for (col, value) in values.iter().enumerate() {
                out.m[col * 4 + row] = *value;
            }
        }
        out
    }

    /// Element at `row`, `col`
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.m[col * 4 + row]
    }

    /// Column-major elements
    pub const fn to_cols_array(&self) -> [f32; 16] {
        self.m
    }

    /// Overwrite the translation column, leaving the rest untouched
    pub fn set_translation(&mut self, t: Vec3) {
        self.m[12] = t.x;
        self.m[13] = t.y;
        self.m[14] = t.z;
    }

    /// Translation column
    pub fn translation(&self) -> Vec3 {
        Vec3::new(self.m[12], self.m[13], self.m[14])
    }

    /// Pure translation matrix
    pub fn from_translation(t: Vec3) -> Self {
        let mut out = Self::IDENTITY;
        out.set_translation(t);
        out
    }

    /// Rotation of `angle` radians about the X axis
    pub fn rotation_x(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let mut out = Self::IDENTITY;
        out.m[5] = c;
        out.m[6] = s;
        out.m[9] = -s;
        out.m[10] = c;
        out
    }

    /// Rotation of `angle` radians about the Y axis
    pub fn rotation_y(angle: f32) -> Self {
        let (s, c) = angle.sin_cos();
        let mut out = Self::IDENTITY;
        out.m[0] = c;
        out.m[2] = -s;
        out.m[8] = s;
        out.m[10] = c;
        out
    }

    /// Rotation matrix equivalent to `q`. The quaternion need not be unit length.
    pub fn from_quat(q: Quat) -> Self {
        let norm2 = q.norm_squared();
        let s = if norm2 > 0.0 { 2.0 / norm2 } else { 0.0 };

        let (xs, ys, zs) = (q.x * s, q.y * s, q.z * s);
        let (wx, wy, wz) = (q.w * xs, q.w * ys, q.w * zs);
        let (xx, xy, xz) = (q.x * xs, q.x * ys, q.x * zs);
        let (yy, yz, zz) = (q.y * ys, q.y * zs, q.z * zs);

        Self {
            m: [
                1.0 - (yy + zz),
                xy + wz,
                xz - wy,
                0.0,
                xy - wz,
                1.0 - (xx + zz),
                yz + wx,
                0.0,
                xz + wy,
                yz - wx,
                1.0 - (xx + yy),
                0.0,
                0.0,
                0.0,
                0.0,
                1.0,
            ],
        }
    }

    /// Rotation of `angle` radians about an arbitrary axis
    pub fn from_axis_angle(axis: Vec3, angle: f32) -> Self {
        Self::from_quat(Quat::from_axis_angle(axis, angle))
    }

    /// Right-handed view matrix looking from `eye` towards `target`.
    ///
    /// The camera looks down its local -Z axis. `eye` and `target` must
    /// differ and the view direction must not be parallel to `up`.
    pub fn look_at(eye: Vec3, target: Vec3, up: Vec3) -> Self {
        let dir = (target - eye).normalize();
        let right = dir.cross(up).normalize();
        let up = right.cross(dir).normalize();

        Self {
            m: [
                right.x,
                up.x,
                -dir.x,
                0.0,
                right.y,
                up.y,
                -dir.y,
                0.0,
                right.z,
                up.z,
                -dir.z,
                0.0,
                -right.dot(eye),
                -up.dot(eye),
                dir.dot(eye),
                1.0,
            ],
        }
    }

    /// Perspective projection with a vertical field of view in radians,
    /// mapping view depth `[near, far]` to clip depth `[-1, 1]`.
    pub fn perspective(fov_y: f32, aspect: f32, near: f32, far: f32) -> Self {
        let focal = 1.0 / (fov_y * 0.5).tan();
        let range_inv = 1.0 / (near - far);

        let mut out = Self::ZERO;
        out.m[0] = focal / aspect;
        out.m[5] = focal;
        out.m[10] = (far + near) * range_inv;
        out.m[11] = -1.0;
        out.m[14] = 2.0 * far * near * range_inv;
        out
    }

    /// Transpose
    pub fn transpose(&self) -> Self {
        let mut out = Self::ZERO;
        for row in 0..4 {
            for col in 0..4 {
                out.m[row * 4 + col] = self.m[col * 4 + row];
            }
        }
        out
    }

    /// Transform a point (w = 1) and drop the W component
    pub fn transform_point(&self, p: Vec3) -> Vec3 {
        (*self * p.extend(1.0)).truncate()
    }

    /// Transform a direction (w = 0)
    pub fn transform_vector(&self, v: Vec3) -> Vec3 {
        (*self * v.extend(0.0)).truncate()
    }

    /// Full determinant by cofactor expansion
    pub fn determinant(&self) -> f32 {
        let adj = self.adjugate();
        let m = &self.m;
        m[0] * adj[0] + m[1] * adj[4] + m[2] * adj[8] + m[3] * adj[12]
    }

    /// Inverse using 2x2 block partitioning.
    ///
    /// Falls back to [`Mat4::inverse_general`] when the top-left block is
    /// near-singular, and returns [`Mat4::IDENTITY`] when the Schur
    /// complement is near-singular. Never produces NaN for finite input.
    pub fn inverse(&self) -> Self {
        let f = &self.m;
        let p = [f[0], f[1], f[4], f[5]];
        let q = [f[8], f[9], f[12], f[13]];
        let r = [f[2], f[3], f[6], f[7]];
        let s = [f[10], f[11], f[14], f[15]];

        let det_p = det2(p);
        if det_p.abs() < INVERSE_EPSILON {
            return self.inverse_general();
        }
        let p_inv = inv2(p, det_p);

        let r_p_inv = mul2(r, p_inv);
        let p_inv_q = mul2(p_inv, q);
        let schur = sub2(s, mul2(r_p_inv, q));

        let det_schur = det2(schur);
        if det_schur.abs() < INVERSE_EPSILON {
            return Self::IDENTITY;
        }

        let new_s = inv2(schur, det_schur);
        let new_r = neg2(mul2(new_s, r_p_inv));
        let new_q = neg2(mul2(p_inv_q, new_s));
        let new_p = sub2(p_inv, mul2(p_inv_q, new_r));

        Self {
            m: [
                new_p[0], new_p[1], new_r[0], new_r[1], //
                new_p[2], new_p[3], new_r[2], new_r[3], //
                new_q[0], new_q[1], new_s[0], new_s[1], //
                new_q[2], new_q[3], new_s[2], new_s[3],
            ],
        }
    }

    /// Inverse by full cofactor expansion. Returns [`Mat4::IDENTITY`] when the
    /// determinant is exactly zero.
    pub fn inverse_general(&self) -> Self {
        let adj = self.adjugate();
        let det = self.determinant();
        if det == 0.0 {
            return Self::IDENTITY;
        }

        let inv_det = 1.0 / det;
        let mut out = Self::ZERO;
        for (dst, src) in out.m.iter_mut().zip(adj.iter()) {
            *dst = src * inv_det;
        }
        out
    }

    /// Inverse, or `None` when [`Mat4::inverse`] would return its identity
    /// sentinel for a non-identity input.
    pub fn try_inverse(&self) -> Option<Self> {
        let inv = self.inverse();
        if inv == Self::IDENTITY && *self != Self::IDENTITY {
            None
        } else {
            Some(inv)
        }
    }

    // Column-major adjugate (transposed cofactor matrix).
    fn adjugate(&self) -> [f32; 16] {
        let m = &self.m;
        let mut inv = [0.0f32; 16];

        inv[0] = m[5] * m[10] * m[15] - m[5] * m[11] * m[14] - m[9] * m[6] * m[15]
            + m[9] * m[7] * m[14]
            + m[13] * m[6] * m[11]
            - m[13] * m[7] * m[10];
        inv[4] = -m[4] * m[10] * m[15] + m[4] * m[11] * m[14] + m[8] * m[6] * m[15]
            - m[8] * m[7] * m[14]
            - m[12] * m[6] * m[11]
            + m[12] * m[7] * m[10];
        inv[8] = m[4] * m[9] * m[15] - m[4] * m[11] * m[13] - m[8] * m[5] * m[15]
            + m[8] * m[7] * m[13]
            + m[12] * m[5] * m[11]
            - m[12] * m[7] * m[9];
        inv[12] = -m[4] * m[9] * m[14] + m[4] * m[10] * m[13] + m[8] * m[5] * m[14]
            - m[8] * m[6] * m[13]
            - m[12] * m[5] * m[10]
            + m[12] * m[6] * m[9];
        inv[1] = -m[1] * m[10] * m[15] + m[1] * m[11] * m[14] + m[9] * m[2] * m[15]
            - m[9] * m[3] * m[14]
            - m[13] * m[2] * m[11]
            + m[13] * m[3] * m[10];
        inv[5] = m[0] * m[10] * m[15] - m[0] * m[11] * m[14] - m[8] * m[2] * m[15]
            + m[8] * m[3] * m[14]
            + m[12] * m[2] * m[11]
            - m[12] * m[3] * m[10];
        inv[9] = -m[0] * m[9] * m[15] + m[0] * m[11] * m[13] + m[8] * m[1] * m[15]
            - m[8] * m[3] * m[13]
            - m[12] * m[1] * m[11]
            + m[12] * m[3] * m[9];
        inv[13] = m[0] * m[9] * m[14] - m[0] * m[10] * m[13] - m[8] * m[1] * m[14]
            + m[8] * m[2] * m[13]
            + m[12] * m[1] * m[10]
            - m[12] * m[2] * m[9];
        inv[2] = m[1] * m[6] * m[15] - m[1] * m[7] * m[14] - m[5] * m[2] * m[15]
            + m[5] * m[3] * m[14]
            + m[13] * m[2] * m[7]
            - m[13] * m[3] * m[6];
        inv[6] = -m[0] * m[6] * m[15] + m[0] * m[7] * m[14] + m[4] * m[2] * m[15]
            - m[4] * m[3] * m[14]
            - m[12] * m[2] * m[7]
            + m[12] * m[3] * m[6];
        inv[10] = m[0] * m[5] * m[15] - m[0] * m[7] * m[13] - m[4] * m[1] * m[15]
            + m[4] * m[3] * m[13]
            + m[12] * m[1] * m[7]
            - m[12] * m[3] * m[5];
        inv[14] = -m[0] * m[5] * m[14] + m[0] * m[6] * m[13] + m[4] * m[1] * m[14]
            - m[4] * m[2] * m[13]
            - m[12] * m[1] * m[6]
            + m[12] * m[2] * m[5];
        inv[3] = -m[1] * m[6] * m[11] + m[1] * m[7] * m[10] + m[5] * m[2] * m[11]
            - m[5] * m[3] * m[10]
            - m[9] * m[2] * m[7]
            + m[9] * m[3] * m[6];
        inv[7] = m[0] * m[6] * m[11] - m[0] * m[7] * m[10] - m[4] * m[2] * m[11]
            + m[4] * m[3] * m[10]
            + m[8] * m[2] * m[7]
            - m[8] * m[3] * m[6];
        inv[11] = -m[0] * m[5] * m[11] + m[0] * m[7] * m[9] + m[4] * m[1] * m[11]
            - m[4] * m[3] * m[9]
            - m[8] * m[1] * m[7]
            + m[8] * m[3] * m[5];
        inv[15] = m[0] * m[5] * m[10] - m[0] * m[6] * m[9] - m[4] * m[1] * m[10]
            + m[4] * m[2] * m[9]
            + m[8] * m[1] * m[6]
            - m[8] * m[2] * m[5];

        inv
    }
}

// 2x2 helpers, column-major: [m00, m10, m01, m11].

fn det2(a: [f32; 4]) -> f32 {
    a[0] * a[3] - a[1] * a[2]
}

fn inv2(a: [f32; 4], det: f32) -> [f32; 4] {
    let inv_det = 1.0 / det;
    [a[3] * inv_det, -a[1] * inv_det, -a[2] * inv_det, a[0] * inv_det]
}

fn mul2(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    [
        a[0] * b[0] + a[2] * b[1],
        a[1] * b[0] + a[3] * b[1],
        a[0] * b[2] + a[2] * b[3],
        a[1] * b[2] + a[3] * b[3],
    ]
}

fn sub2(a: [f32; 4], b: [f32; 4]) -> [f32; 4] {
    [a[0] - b[0], a[1] - b[1], a[2] - b[2], a[3] - b[3]]
}

fn neg2(a: [f32; 4]) -> [f32; 4] {
    [-a[0], -a[1], -a[2], -a[3]]
}

impl Mul for Mat4 {
    type Output = Self;

    fn mul(self, rhs: Self) -> Self {
        let mut out = Self::ZERO;
        for col in 0..4 {
            for row in 0..4 {
                let mut sum = 0.0;
                for k in 0..4 {
                    sum += self.m[k * 4 + row] * rhs.m[col * 4 + k];
                }
                out.m[col * 4 + row] = sum;
            }
        }
        out
    }
}

impl Mul<Vec4> for Mat4 {
    type Output = Vec4;

    fn mul(self, v: Vec4) -> Vec4 {
        let m = &self.m;
        Vec4::new(
            m[0] * v.x + m[4] * v.y + m[8] * v.z + m[12] * v.w,
            m[1] * v.x + m[5] * v.y + m[9] * v.z + m[13] * v.w,
            m[2] * v.x + m[6] * v.y + m[10] * v.z + m[14] * v.w,
            m[3] * v.x + m[7] * v.y + m[11] * v.z + m[15] * v.w,
        )
    }
}

impl AbsDiffEq for Mat4 {
    type Epsilon = f32;

    fn default_epsilon() -> f32 {
        f32::EPSILON
    }

    fn abs_diff_eq(&self, other: &Self, epsilon: f32) -> bool {
        self.m
            .iter()
            .zip(other.m.iter())
            .all(|(a, b)| a.abs_diff_eq(b, epsilon))
    }
}

impl RelativeEq for Mat4 {
    fn default_max_relative() -> f32 {
        f32::EPSILON
    }

    fn relative_eq(&self, other: &Self, epsilon: f32, max_relative: f32) -> bool {
        self.m
            .iter()
            .zip(other.m.iter())
            .all(|(a, b)| a.relative_eq(b, epsilon, max_relative))
    }
}

impl From<Mat4> for nalgebra::Matrix4<f32> {
    fn from(m: Mat4) -> Self {
        Self::from_column_slice(&m.m)
    }
}

impl From<nalgebra::Matrix4<f32>> for Mat4 {
    fn from(m: nalgebra::Matrix4<f32>) -> Self {
        let mut out = Self::ZERO;
        out.m.copy_from_slice(m.as_slice());
        out
    }
}

impl From<Vec3> for nalgebra::Vector3<f32> {
    fn from(v: Vec3) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<nalgebra::Vector3<f32>> for Vec3 {
    fn from(v: nalgebra::Vector3<f32>) -> Self {
        Self::new(v.x, v.y, v.z)
    }
}

impl From<Vec4> for nalgebra::Vector4<f32> {
    fn from(v: Vec4) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }
}

impl From<nalgebra::Vector4<f32>> for Vec4 {
    fn from(v: nalgebra::Vector4<f32>) -> Self {
        Self::new(v.x, v.y, v.z, v.w)
    }
}

/// Math constants
pub mod constants {
    /// Pi constant
    pub const PI: f32 = std::f32::consts::PI;

    /// Degrees to radians conversion factor
    pub const DEG_TO_RAD: f32 = PI / 180.0;
}

/// Math utility functions
pub mod utils {
    use super::constants;

    /// Convert degrees to radians
    pub fn deg_to_rad(degrees: f32) -> f32 {
        degrees * constants::DEG_TO_RAD
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    const EPSILON: f32 = 1e-4;

    fn random_well_conditioned(rng: &mut StdRng) -> Mat4 {
        let mut m = Mat4::ZERO;
        for v in &mut m.m {
            *v = rng.gen_range(-1.0..1.0);
        }
        // Diagonal dominance keeps the condition number small.
        for i in 0..4 {
            m.m[i * 4 + i] += if rng.gen_bool(0.5) { 5.0 } else { -5.0 };
        }
        m
    }

    #[test]
    fn test_vector_operations() {
        let a = Vec3::new(1.0, 2.0, 3.0);
        let b = Vec3::new(-2.0, 0.5, 4.0);

        assert_eq!(a + b, Vec3::new(-1.0, 2.5, 7.0));
        assert_eq!(a - b, Vec3::new(3.0, 1.5, -1.0));
        assert_eq!(a * 2.0, Vec3::new(2.0, 4.0, 6.0));
        assert_relative_eq!(a.dot(b), 11.0);
        assert_eq!(Vec3::new(1.0, 0.0, 0.0).cross(Vec3::Y), Vec3::new(0.0, 0.0, 1.0));
        assert_relative_eq!(Vec3::new(3.0, 0.0, 4.0).normalize().length(), 1.0, epsilon = EPSILON);
        assert_eq!(Vec3::ZERO.normalize(), Vec3::ZERO);
        assert_relative_eq!(Vec2::new(3.0, 4.0).length(), 5.0);
        assert_relative_eq!(
            Vec4::new(1.0, 1.0, 1.0, 1.0).normalize().length(),
            1.0,
            epsilon = EPSILON
        );
    }

    #[test]
    fn test_matrix_multiply_matches_nalgebra() {
        let mut rng = StdRng::seed_from_u64(7);
        let a = random_well_conditioned(&mut rng);
        let b = random_well_conditioned(&mut rng);

        let expected: Mat4 = (nalgebra::Matrix4::from(a) * nalgebra::Matrix4::from(b)).into();
        assert_relative_eq!(a * b, expected, epsilon = EPSILON);
    }

    #[test]
    fn test_block_inverse_round_trip() {
        let mut rng = StdRng::seed_from_u64(42);
        for _ in 0..64 {
            let m = random_well_conditioned(&mut rng);
            let p = [m[0], m[1], m[4], m[5]];
            assert!(det2(p).abs() >= INVERSE_EPSILON);

            let inv = m.inverse();
            assert_abs_diff_eq!(m * inv, Mat4::IDENTITY, epsilon = EPSILON);
            assert_abs_diff_eq!(inv * m, Mat4::IDENTITY, epsilon = EPSILON);
        }
    }

    #[test]
    fn test_general_fallback_round_trip() {
        // Zero top-left block forces the cofactor path.
        let mut rng = StdRng::seed_from_u64(3);
        for _ in 0..32 {
            let mut m = random_well_conditioned(&mut rng);
            for i in [0, 1, 4, 5] {
                m.m[i] = 0.0;
            }
            m.m[8] += 5.0;
            m.m[13] += 5.0;
            m.m[2] += 5.0;
            m.m[7] += 5.0;

            let inv = m.inverse();
            assert_abs_diff_eq!(m * inv, Mat4::IDENTITY, epsilon = EPSILON);
            assert_abs_diff_eq!(inv, m.inverse_general(), epsilon = EPSILON);
        }
    }

    #[test]
    fn test_inverse_matches_nalgebra() {
        let mut rng = StdRng::seed_from_u64(11);
        let m = random_well_conditioned(&mut rng);
        let expected: Mat4 = nalgebra::Matrix4::from(m)
            .try_inverse()
            .expect("well-conditioned matrix")
            .into();
        assert_abs_diff_eq!(m.inverse(), expected, epsilon = EPSILON);
    }

    #[test]
    fn test_singular_schur_complement_returns_identity() {
        // Rows 2 and 3 identical; the top-left block is well conditioned.
        let m = Mat4::from_rows([
            [2.0, 1.0, 0.5, 3.0],
            [0.0, 3.0, 1.0, -1.0],
            [1.0, 2.0, 4.0, 0.5],
            [1.0, 2.0, 4.0, 0.5],
        ]);
        let inv = m.inverse();
        assert_eq!(inv, Mat4::IDENTITY);
        assert!(inv.m.iter().all(|v| v.is_finite()));
        assert!(m.try_inverse().is_none());
    }

    #[test]
    fn test_singular_via_general_path_returns_identity() {
        // Rows 0 and 1 identical make det(P) exactly zero; integer entries
        // keep the full determinant exactly zero as well.
        let m = Mat4::from_rows([
            [1.0, 2.0, 3.0, 4.0],
            [1.0, 2.0, 3.0, 4.0],
            [0.0, 1.0, 0.0, 2.0],
            [3.0, 0.0, 1.0, 1.0],
        ]);
        assert_eq!(m.determinant(), 0.0);
        assert_eq!(m.inverse(), Mat4::IDENTITY);
        assert_eq!(Mat4::ZERO.inverse(), Mat4::IDENTITY);
    }

    #[test]
    fn test_determinant() {
        let m = Mat4::from_rows([
            [2.0, 0.0, 0.0, 1.0],
            [0.0, 3.0, 0.0, 0.0],
            [0.0, 0.0, 4.0, 0.0],
            [0.0, 0.0, 0.0, 5.0],
        ]);
        assert_relative_eq!(m.determinant(), 120.0);
    }

    #[test]
    fn test_rotations_match_axis_angle() {
        let angle = 0.7;
        assert_abs_diff_eq!(
            Mat4::rotation_x(angle),
            Mat4::from_axis_angle(Vec3::new(1.0, 0.0, 0.0), angle),
            epsilon = EPSILON
        );
        assert_abs_diff_eq!(
            Mat4::rotation_y(angle),
            Mat4::from_axis_angle(Vec3::Y, angle),
            epsilon = EPSILON
        );

        // +90 degrees about Y takes +Z to +X.
        let v = Mat4::rotation_y(constants::PI * 0.5).transform_vector(Vec3::new(0.0, 0.0, 1.0));
        assert_abs_diff_eq!(v, Vec3::new(1.0, 0.0, 0.0), epsilon = EPSILON);
    }

    #[test]
    fn test_quaternion_matches_nalgebra() {
        let axis = Vec3::new(0.3, -0.5, 0.8);
        let angle = 1.1;
        let ours = Mat4::from_axis_angle(axis, angle);
        let unit_axis = nalgebra::Unit::new_normalize(nalgebra::Vector3::from(axis));
        let theirs: Mat4 = nalgebra::Rotation3::from_axis_angle(&unit_axis, angle)
            .to_homogeneous()
            .into();
        assert_abs_diff_eq!(ours, theirs, epsilon = EPSILON);
    }

    #[test]
    fn test_look_at_maps_eye_and_target() {
        let eye = Vec3::new(0.278, 0.273, -0.8);
        let target = Vec3::new(0.278, 0.273, 0.0);
        let view = Mat4::look_at(eye, target, Vec3::Y);

        assert_abs_diff_eq!(view.transform_point(eye), Vec3::ZERO, epsilon = EPSILON);
        assert_abs_diff_eq!(
            view.transform_point(target),
            Vec3::new(0.0, 0.0, -0.8),
            epsilon = EPSILON
        );

        let expected: Mat4 = nalgebra::Matrix4::look_at_rh(
            &nalgebra::Point3::new(eye.x, eye.y, eye.z),
            &nalgebra::Point3::new(target.x, target.y, target.z),
            &nalgebra::Vector3::y(),
        )
        .into();
        assert_abs_diff_eq!(view, expected, epsilon = EPSILON);
    }

    #[test]
    fn test_perspective_matches_nalgebra() {
        let fov = utils::deg_to_rad(60.0);
        let ours = Mat4::perspective(fov, 1.5, 0.1, 1.0);
        let theirs: Mat4 = nalgebra::Matrix4::new_perspective(1.5, fov, 0.1, 1.0).into();
        assert_abs_diff_eq!(ours, theirs, epsilon = EPSILON);
    }

    #[test]
    fn test_view_projection_inverse_takes_block_path() {
        let eye = Vec3::new(0.278, 0.273, -0.8);
        let view = Mat4::look_at(eye, Vec3::new(0.278, 0.273, 0.0), Vec3::Y);
        let proj = Mat4::perspective(utils::deg_to_rad(60.0), 1.0, 0.1, 1.0);
        let view_proj = proj * view;

        let p = [view_proj[0], view_proj[1], view_proj[4], view_proj[5]];
        assert!(det2(p).abs() >= INVERSE_EPSILON);
        assert_abs_diff_eq!(view_proj * view_proj.inverse(), Mat4::IDENTITY, epsilon = EPSILON);
    }

    #[test]
    fn test_translation_mutation() {
        let mut m = Mat4::rotation_x(constants::PI);
        m.set_translation(Vec3::new(0.278, 0.549, 0.2795));
        assert_eq!(m.translation(), Vec3::new(0.278, 0.549, 0.2795));
        assert_abs_diff_eq!(
            m.transform_point(Vec3::ZERO),
            Vec3::new(0.278, 0.549, 0.2795),
            epsilon = EPSILON
        );
    }
}
