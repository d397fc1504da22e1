//! # Viewer Camera
//!
//! A look-at perspective camera plus the controller that turns input into
//! camera motion.
//!
//! ## Conventions
//!
//! - Right-handed, Y-up world; the camera looks down its local -Z axis.
//! - The field of view is vertical; the horizontal extent follows from the
//!   aspect ratio.
//! - Clip depth is OpenGL style `[-1, 1]`. The integrator only ever uses the
//!   inverse view-projection to turn pixel coordinates back into rays, so the
//!   depth convention never reaches a depth buffer.
//!
//! ## Motion
//!
//! Translation keys move position and target together, so the view direction
//! is preserved. Drags rotate the view direction about the camera position:
//! horizontally around world Y, vertically around the camera's right axis.
//! A vertical drag that would tip the view within [`MIN_PITCH_MARGIN_DEGREES`]
//! of straight up or down is refused, which keeps the right axis well defined.

use bitflags::bitflags;

use crate::core::config::CameraConfig;
use crate::foundation::math::{utils, Mat4, Vec3};

/// Closest the view direction may come to world up or down, in degrees
pub const MIN_PITCH_MARGIN_DEGREES: f32 = 2.5;

/// Perspective camera aimed at a target point
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Camera {
    /// Eye position in world space
    pub position: Vec3,
    /// Point the camera looks at; never equal to `position`
    pub target: Vec3,
    /// World up
    pub up: Vec3,
    /// Vertical field of view in radians
    pub fov_y: f32,
    /// Width over height
    pub aspect: f32,
    /// Near plane distance
    pub near: f32,
    /// Far plane distance
    pub far: f32,
}

impl Camera {
    /// Camera at the configured reset pose
    pub fn from_config(config: &CameraConfig, aspect: f32) -> Self {
        Self {
            position: config.position,
            target: config.look_at,
            up: Vec3::Y,
            fov_y: utils::deg_to_rad(config.fov_y_degrees),
            aspect,
            near: config.near,
            far: config.far,
        }
    }

    /// Unit view direction
    pub fn direction(&self) -> Vec3 {
        (self.target - self.position).normalize()
    }

    /// Unit right vector
    pub fn right(&self) -> Vec3 {
        self.direction().cross(self.up).normalize()
    }

    /// World-to-view transform
    pub fn view_matrix(&self) -> Mat4 {
        Mat4::look_at(self.position, self.target, self.up)
    }

    /// View-to-clip transform
    pub fn projection_matrix(&self) -> Mat4 {
        Mat4::perspective(self.fov_y, self.aspect, self.near, self.far)
    }

    /// Inverse of projection * view
    pub fn view_projection_inverse(&self) -> Mat4 {
        (self.projection_matrix() * self.view_matrix()).inverse()
    }
}

bitflags! {
    /// Movement keys currently held
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
    pub struct MoveKeys: u8 {
        /// Along the view direction
        const FORWARD = 1 << 0;
        /// Against the view direction
        const BACKWARD = 1 << 1;
        /// Against the right vector
        const LEFT = 1 << 2;
        /// Along the right vector
        const RIGHT = 1 << 3;
        /// Along world up
        const UP = 1 << 4;
        /// Against world up
        const DOWN = 1 << 5;
    }
}

/// One movement key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MoveDirection {
    /// W
    Forward,
    /// S
    Backward,
    /// A
    Left,
    /// D
    Right,
    /// Q
    Up,
    /// E
    Down,
}

impl From<MoveDirection> for MoveKeys {
    fn from(direction: MoveDirection) -> Self {
        match direction {
            MoveDirection::Forward => Self::FORWARD,
            MoveDirection::Backward => Self::BACKWARD,
            MoveDirection::Left => Self::LEFT,
            MoveDirection::Right => Self::RIGHT,
            MoveDirection::Up => Self::UP,
            MoveDirection::Down => Self::DOWN,
        }
    }
}

/// Input collected between ticks
///
/// Cursor positions arrive in screen coordinates and are made relative to
/// the window origin. Moving the window forgets the last cursor position, so
/// the window's own motion never reads as a drag.
#[derive(Debug, Clone, Default)]
pub struct InputState {
    keys: MoveKeys,
    mouse_down: bool,
    window_origin: (i32, i32),
    last_cursor: Option<(i32, i32)>,
    pending_drag: (f32, f32),
}

impl InputState {
    /// Press or release a movement key
    pub fn set_key(&mut self, direction: MoveDirection, is_down: bool) {
        self.keys.set(direction.into(), is_down);
    }

    /// Held movement keys
    pub fn keys(&self) -> MoveKeys {
        self.keys
    }

    /// Press or release the rotation button
    pub fn set_mouse_button(&mut self, is_down: bool) {
        self.mouse_down = is_down;
    }

    /// Whether the rotation button is held
    pub fn mouse_down(&self) -> bool {
        self.mouse_down
    }

    /// Cursor moved to a screen position
    pub fn cursor_moved(&mut self, x: i32, y: i32) {
        let local = (x - self.window_origin.0, y - self.window_origin.1);
        if let (Some(last), true) = (self.last_cursor, self.mouse_down) {
            self.pending_drag.0 += (local.0 - last.0) as f32;
            self.pending_drag.1 += (local.1 - last.1) as f32;
        }
        self.last_cursor = Some(local);
    }

    /// Window moved to a screen position
    pub fn window_moved(&mut self, x: i32, y: i32) {
        self.window_origin = (x, y);
        self.last_cursor = None;
    }

    /// Add a drag delta in pixels directly
    pub fn add_drag(&mut self, dx: f32, dy: f32) {
        self.pending_drag.0 += dx;
        self.pending_drag.1 += dy;
    }

    /// Drag accumulated since the last call
    pub fn take_drag(&mut self) -> (f32, f32) {
        std::mem::take(&mut self.pending_drag)
    }
}

/// Applies input to a [`Camera`] and caches its inverse view-projection
#[derive(Debug, Clone)]
pub struct CameraController {
    camera: Camera,
    reset_position: Vec3,
    reset_target: Vec3,
    move_speed: f32,
    rotate_speed: f32,
    cached: Option<(Camera, Mat4)>,
    recomputations: u64,
}

impl CameraController {
    /// Controller at the configured reset pose
    pub fn new(config: &CameraConfig, aspect: f32) -> Self {
        Self {
            camera: Camera::from_config(config, aspect),
            reset_position: config.position,
            reset_target: config.look_at,
            move_speed: config.move_speed,
            rotate_speed: config.rotate_speed,
            cached: None,
            recomputations: 0,
        }
    }

    /// Current camera
    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    /// Number of times the inverse view-projection was actually computed
    pub fn recomputations(&self) -> u64 {
        self.recomputations
    }

    /// Move for `dt` seconds with `keys` held. Returns whether the camera moved.
    pub fn translate(&mut self, keys: MoveKeys, dt: f32) -> bool {
        let step = self.move_speed * dt;
        let dir = self.camera.direction();
        let right = self.camera.right();

        let mut delta = Vec3::ZERO;
        for (key, axis) in [
            (MoveKeys::FORWARD, dir),
            (MoveKeys::BACKWARD, -dir),
            (MoveKeys::RIGHT, right),
            (MoveKeys::LEFT, -right),
            (MoveKeys::UP, Vec3::Y),
            (MoveKeys::DOWN, -Vec3::Y),
        ] {
            if keys.contains(key) {
                delta += axis * step;
            }
        }

        if delta.is_zero() {
            return false;
        }
        self.camera.position += delta;
        self.camera.target += delta;
        true
    }

    /// Rotate by a drag of `(dx, dy)` pixels. Returns whether the camera moved.
    pub fn rotate(&mut self, dx: f32, dy: f32) -> bool {
        let mut moved = false;

        if dx != 0.0 {
            let dir = self.camera.target - self.camera.position;
            let rotated = Mat4::rotation_y(dx * self.rotate_speed).transform_vector(dir);
            self.camera.target = self.camera.position + rotated;
            moved = true;
        }

        if dy != 0.0 {
            let dir = self.camera.target - self.camera.position;
            let right = dir.cross(Vec3::Y).normalize();
            let rotated =
                Mat4::from_axis_angle(right, dy * self.rotate_speed).transform_vector(dir);
            let limit = utils::deg_to_rad(90.0 - MIN_PITCH_MARGIN_DEGREES).sin();
            if rotated.normalize().y.abs() <= limit {
                self.camera.target = self.camera.position + rotated;
                moved = true;
            } else {
                log::trace!("Pitch refused near vertical");
            }
        }

        moved
    }

    /// Return to the configured pose
    pub fn reset(&mut self) {
        self.camera.position = self.reset_position;
        self.camera.target = self.reset_target;
    }

    /// Update the aspect ratio after a resize
    pub fn set_aspect(&mut self, aspect: f32) {
        self.camera.aspect = aspect;
    }

    /// Inverse view-projection, recomputed only when the camera changed
    pub fn view_projection_inverse(&mut self) -> Mat4 {
        if let Some((camera, matrix)) = &self.cached {
            if *camera == self.camera {
                return *matrix;
            }
        }
        let matrix = self.camera.view_projection_inverse();
        self.cached = Some((self.camera, matrix));
        self.recomputations += 1;
        matrix
    }
}
