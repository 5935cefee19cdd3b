//! Combines head-tracked eye poses with the game camera.
//!
//! Game space is the host's: y points down, 128 units per metre, and the
//! camera looks along `(sin yaw * cos pitch, sin pitch, cos yaw * cos pitch)`.
//! Eye space is right-handed, y up, metres, looking down -z.

use glam::{Mat3, Mat4, Vec3};

use crate::compositor::{EyeView, Fov, Pose};

pub const GAME_UNITS_PER_METRE: f32 = 128.0;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GameCamera {
    /// Radians about the vertical axis.
    pub yaw: f32,
    /// Radians; positive looks down.
    pub pitch: f32,
    /// Game units.
    pub position: Vec3,
}

impl Default for GameCamera {
    fn default() -> Self {
        Self {
            yaw: 0.0,
            pitch: 0.0,
            position: Vec3::ZERO,
        }
    }
}

impl GameCamera {
    /// Unit view direction in game space.
    pub fn forward(&self) -> Vec3 {
        let (sy, cy) = self.yaw.sin_cos();
        let (sp, cp) = self.pitch.sin_cos();
        Vec3::new(sy * cp, sp, cy * cp)
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct EyeTransforms {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_proj: Mat4,
}

/// Right-handed projection from an asymmetric field of view, depth in `[0, 1]`.
pub fn projection_from_fov(fov: &Fov, near: f32, far: f32) -> Mat4 {
    let tan_left = fov.angle_left.tan();
    let tan_right = fov.angle_right.tan();
    let tan_up = fov.angle_up.tan();
    let tan_down = fov.angle_down.tan();
    let width = tan_right - tan_left;
    let height = tan_up - tan_down;

    Mat4::from_cols_array(&[
        2.0 / width,
        0.0,
        0.0,
        0.0,
        0.0,
        2.0 / height,
        0.0,
        0.0,
        (tan_right + tan_left) / width,
        (tan_up + tan_down) / height,
        -far / (far - near),
        -1.0,
        0.0,
        0.0,
        -(far * near) / (far - near),
        0.0,
    ])
}

/// Game space to a y-up metre space centred on the game camera, looking down -z.
pub fn game_view(camera: &GameCamera) -> Mat4 {
    let flip = Mat4::from_mat3(Mat3::from_diagonal(Vec3::new(1.0, -1.0, -1.0)));
    let scale = Mat4::from_scale(Vec3::splat(1.0 / GAME_UNITS_PER_METRE));
    let pitch = Mat4::from_rotation_x(camera.pitch);
    let yaw = Mat4::from_rotation_y(-camera.yaw);
    let translate = Mat4::from_translation(-camera.position);
    flip * scale * pitch * yaw * translate
}

pub fn pose_matrix(pose: &Pose) -> Mat4 {
    Mat4::from_rotation_translation(pose.orientation, pose.position)
}

pub fn eye_transforms(eye: &EyeView, camera: &GameCamera, near: f32, far: f32) -> EyeTransforms {
    let view = pose_matrix(&eye.pose).inverse() * game_view(camera);
    let projection = projection_from_fov(&eye.fov, near, far);
    EyeTransforms {
        view,
        projection,
        view_proj: projection * view,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::{Quat, Vec4};

    fn close(a: f32, b: f32) -> bool {
        (a - b).abs() < 1e-4
    }

    #[test]
    fn projection_depth_range_is_zero_to_one() {
        let fov = Fov::symmetric(90f32.to_radians(), 90f32.to_radians());
        let p = projection_from_fov(&fov, 0.1, 100.0);

        let near = p * Vec4::new(0.0, 0.0, -0.1, 1.0);
        let far = p * Vec4::new(0.0, 0.0, -100.0, 1.0);
        assert!(close(near.z / near.w, 0.0));
        assert!(close(far.z / far.w, 1.0));

        // 45 degree half-angle: x == -z lands on the right edge.
        let edge = p * Vec4::new(2.0, 0.0, -2.0, 1.0);
        assert!(close(edge.x / edge.w, 1.0));
    }

    #[test]
    fn asymmetric_fov_shifts_centre() {
        let fov = Fov {
            angle_left: -0.9,
            angle_right: 0.6,
            angle_up: 0.7,
            angle_down: -0.8,
        };
        let p = projection_from_fov(&fov, 0.05, 50.0);
        let left_edge = p * Vec4::new((-0.9f32).tan(), 0.0, -1.0, 1.0);
        let right_edge = p * Vec4::new(0.6f32.tan(), 0.0, -1.0, 1.0);
        let top_edge = p * Vec4::new(0.0, 0.7f32.tan(), -1.0, 1.0);
        assert!(close(left_edge.x / left_edge.w, -1.0));
        assert!(close(right_edge.x / right_edge.w, 1.0));
        assert!(close(top_edge.y / top_edge.w, 1.0));
    }

    #[test]
    fn game_forward_maps_to_negative_z() {
        for (yaw, pitch) in [(0.0, 0.0), (1.2, 0.0), (-2.0, 0.4), (3.0, -0.3)] {
            let camera = GameCamera {
                yaw,
                pitch,
                position: Vec3::new(640.0, -300.0, 1280.0),
            };
            let ahead = camera.position + camera.forward() * 256.0;
            let v = game_view(&camera).transform_point3(ahead);
            assert!(close(v.x, 0.0) && close(v.y, 0.0), "{v:?}");
            assert!(close(v.z, -2.0), "{v:?}");
        }
    }

    #[test]
    fn game_down_is_eye_down() {
        let camera = GameCamera::default();
        let below = game_view(&camera).transform_point3(Vec3::new(0.0, 128.0, 0.0));
        assert!(close(below.y, -1.0));
    }

    #[test]
    fn eye_offset_shifts_view() {
        let eye = EyeView {
            pose: Pose {
                orientation: Quat::IDENTITY,
                position: Vec3::new(0.032, 0.0, 0.0),
            },
            fov: Fov::symmetric(1.5, 1.5),
        };
        let t = eye_transforms(&eye, &GameCamera::default(), 0.1, 100.0);
        let p = t.view.transform_point3(Vec3::ZERO);
        assert!(close(p.x, -0.032));
        assert_eq!(t.view_proj, t.projection * t.view);
    }
}
