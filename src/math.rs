//! Matrix and quaternion helpers
//!
//! Thin layer over glam. Everything here uses GL conventions: column vectors,
//! column-major storage, right-handed, -Z forward.

use glam::{Mat4, Quat, Vec3, Vec4};

/// Translation matrix for `offset`.
pub fn translation(offset: Vec3) -> Mat4 {
    Mat4::from_translation(offset)
}

/// Rotation matrix from an `[x, y, z, w]` quaternion as reported by trackers.
///
/// The quaternion is normalized first; a zero quaternion maps to identity.
pub fn quat_xyzw_to_matrix(xyzw: [f32; 4]) -> Mat4 {
    let q = Quat::from_array(xyzw);
    if q.length_squared() <= f32::EPSILON {
        return Mat4::IDENTITY;
    }
    Mat4::from_quat(q.normalize())
}

/// Head transform: translate by `position`, then rotate by `orientation`.
pub fn pose_matrix(position: [f32; 3], orientation: [f32; 4]) -> Mat4 {
    translation(Vec3::from_array(position)) * quat_xyzw_to_matrix(orientation)
}

/// Column-major 16-float array, the layout GL uniforms and JNI callers expect.
pub fn to_gl_array(m: &Mat4) -> [f32; 16] {
    m.to_cols_array()
}

pub fn from_gl_array(values: &[f32; 16]) -> Mat4 {
    Mat4::from_cols_array(values)
}

/// Off-axis perspective projection (glFrustum layout).
pub fn frustum(left: f32, right: f32, bottom: f32, top: f32, near: f32, far: f32) -> Mat4 {
    let x_scale = 2.0 * near / (right - left);
    let y_scale = 2.0 * near / (top - bottom);
    let x_offset = (right + left) / (right - left);
    let y_offset = (top + bottom) / (top - bottom);
    let z_scale = -(far + near) / (far - near);
    let z_offset = -2.0 * far * near / (far - near);

    Mat4::from_cols(
        Vec4::new(x_scale, 0.0, 0.0, 0.0),
        Vec4::new(0.0, y_scale, 0.0, 0.0),
        Vec4::new(x_offset, y_offset, z_scale, -1.0),
        Vec4::new(0.0, 0.0, z_offset, 0.0),
    )
}
