//! Uniform buffer contents for the model shader.
//!
//! Must match `UniformBufferObject` in `shaders/shader.vert` (binding 0).

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec3};

/// Degrees the model turns about +Y per second.
pub const ROTATION_DEGREES_PER_SECOND: f32 = 90.0;

pub const EYE: Vec3 = Vec3::new(5.0, 5.0, 0.0);
/// Negative Y so the model appears upright in Vulkan's downward-Y clip space.
pub const UP: Vec3 = Vec3::new(0.0, -1.0, 0.0);

pub const FOV_Y_DEGREES: f32 = 90.0;
pub const Z_NEAR: f32 = 0.1;
pub const Z_FAR: f32 = 30.0;

/// Model, view and projection matrices, each 64 bytes, column-major.
///
/// # Memory Layout
///
/// - Offset 0: model
/// - Offset 64: view
/// - Offset 128: proj
/// - Total size: 192 bytes
#[repr(C)]
#[derive(Clone, Copy, Debug, Default, PartialEq, Pod, Zeroable)]
pub struct UniformBufferObject {
    /// Rotation about +Y.
    pub model: Mat4,
    /// Looks from [`EYE`] at the origin.
    pub view: Mat4,
    /// Perspective with Vulkan's 0..1 depth range.
    pub proj: Mat4,
}

impl UniformBufferObject {
    pub const SIZE: usize = std::mem::size_of::<Self>();

    /// Matrices for `elapsed_secs` after start, rendered at `width`x`height`.
    pub fn for_time(elapsed_secs: f32, width: u32, height: u32) -> Self {
        let angle = (elapsed_secs * ROTATION_DEGREES_PER_SECOND).to_radians();
        let aspect = width as f32 / height.max(1) as f32;

        Self {
            model: Mat4::from_axis_angle(Vec3::Y, angle),
            view: Mat4::look_at_rh(EYE, Vec3::ZERO, UP),
            proj: Mat4::perspective_rh(FOV_Y_DEGREES.to_radians(), aspect, Z_NEAR, Z_FAR),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    const EPS: f32 = 1e-5;

    #[test]
    fn test_ubo_size_and_alignment() {
        assert_eq!(UniformBufferObject::SIZE, 192);
        assert_eq!(std::mem::align_of::<UniformBufferObject>(), 16);
    }

    #[test]
    fn test_model_starts_at_identity() {
        let ubo = UniformBufferObject::for_time(0.0, 800, 600);
        assert!(ubo.model.abs_diff_eq(Mat4::IDENTITY, EPS));
    }

    #[test]
    fn test_model_turns_quarter_per_second() {
        let ubo = UniformBufferObject::for_time(1.0, 800, 600);
        // +X rotates onto -Z after 90 degrees about +Y.
        let x = ubo.model * Vec4::X;
        assert!(x.abs_diff_eq(Vec4::new(0.0, 0.0, -1.0, 0.0), EPS));

        let full_turn = UniformBufferObject::for_time(4.0, 800, 600);
        assert!(full_turn.model.abs_diff_eq(Mat4::IDENTITY, 1e-4));
    }

    #[test]
    fn test_view_maps_eye_to_origin_and_target_ahead() {
        let ubo = UniformBufferObject::for_time(0.0, 800, 600);

        let eye = ubo.view * EYE.extend(1.0);
        assert!(eye.truncate().abs_diff_eq(Vec3::ZERO, EPS));

        // Right-handed view space looks down -Z.
        let target = ubo.view * Vec4::new(0.0, 0.0, 0.0, 1.0);
        assert!((target.z + EYE.length()).abs() < EPS);
    }

    #[test]
    fn test_projection_depth_range() {
        let ubo = UniformBufferObject::for_time(0.0, 800, 600);

        let near = ubo.proj * Vec4::new(0.0, 0.0, -Z_NEAR, 1.0);
        let far = ubo.proj * Vec4::new(0.0, 0.0, -Z_FAR, 1.0);
        assert!((near.z / near.w).abs() < EPS);
        assert!((far.z / far.w - 1.0).abs() < EPS);
    }

    #[test]
    fn test_projection_uses_aspect_ratio() {
        let wide = UniformBufferObject::for_time(0.0, 1600, 800);
        // 90 degree fov: cot(45) = 1 vertically, halved horizontally at 2:1.
        assert!((wide.proj.y_axis.y - 1.0).abs() < EPS);
        assert!((wide.proj.x_axis.x - 0.5).abs() < EPS);
    }

    #[test]
    fn test_zero_height_does_not_divide_by_zero() {
        let ubo = UniformBufferObject::for_time(0.0, 800, 0);
        assert!(ubo.proj.is_finite());
    }
}
