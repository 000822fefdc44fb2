//! Lens distortion capability
//!
//! Given viewer calibration and the screen size, a lens distortion object
//! answers three questions per eye: where the eye sits relative to the head,
//! what its projection is, and which mesh warps its texture onto the screen.
//! It owns the meshes; callers only borrow them.

use glam::{Mat4, Vec3};
use log::info;

use crate::calibration::{DeviceCalibration, ViewerProfile};
use crate::error::Result;
use crate::math;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Eye {
    Left = 0,
    Right = 1,
}

impl Eye {
    pub const BOTH: [Eye; 2] = [Eye::Left, Eye::Right];

    pub fn index(self) -> usize {
        self as usize
    }
}

/// Screen-space warp mesh for one eye.
///
/// `vertices` are NDC positions on the display, `uvs` are coordinates in the
/// eye's own texture region (0..1 on both axes). Triangle list.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DistortionMesh {
    pub vertices: Vec<[f32; 2]>,
    pub uvs: Vec<[f32; 2]>,
    pub indices: Vec<u32>,
}

pub trait LensDistortion {
    fn distortion_mesh(&self, eye: Eye) -> &DistortionMesh;
    fn eye_from_head_matrix(&self, eye: Eye) -> Mat4;
    fn projection_matrix(&self, eye: Eye, z_near: f32, z_far: f32) -> Mat4;
}

/// Builds lens distortion objects from raw calibration.
pub trait LensDistortionFactory {
    fn create(
        &mut self,
        calibration: &DeviceCalibration,
        screen_width: u32,
        screen_height: u32,
    ) -> Result<Box<dyn LensDistortion>>;
}

/// Grid vertices per side. Odd so the lens center lands on a vertex.
pub const MESH_RESOLUTION: usize = 21;

/// Radial polynomial distortion driven by a [`ViewerProfile`].
pub struct PolynomialLensDistortion {
    profile: ViewerProfile,
    meshes: [DistortionMesh; 2],
}

impl PolynomialLensDistortion {
    pub fn new(profile: ViewerProfile, screen_width: u32, screen_height: u32) -> Self {
        let eye_aspect = if screen_height == 0 {
            1.0
        } else {
            (screen_width as f32 / 2.0) / screen_height as f32
        };
        let meshes = [
            build_mesh(Eye::Left, eye_aspect, &profile.distortion_coefficients),
            build_mesh(Eye::Right, eye_aspect, &profile.distortion_coefficients),
        ];
        Self { profile, meshes }
    }

    /// Field of view half-angles for `eye` in degrees: left, right, bottom, top.
    fn fov(&self, eye: Eye) -> [f32; 4] {
        let [left, right, bottom, top] = self.profile.left_eye_field_of_view_angles;
        match eye {
            Eye::Left => [left, right, bottom, top],
            Eye::Right => [right, left, bottom, top],
        }
    }
}

impl LensDistortion for PolynomialLensDistortion {
    fn distortion_mesh(&self, eye: Eye) -> &DistortionMesh {
        &self.meshes[eye.index()]
    }

    fn eye_from_head_matrix(&self, eye: Eye) -> Mat4 {
        let half_ipd = self.profile.inter_lens_distance / 2.0;
        let x = match eye {
            Eye::Left => half_ipd,
            Eye::Right => -half_ipd,
        };
        math::translation(Vec3::new(x, 0.0, 0.0))
    }

    fn projection_matrix(&self, eye: Eye, z_near: f32, z_far: f32) -> Mat4 {
        let [left, right, bottom, top] = self.fov(eye).map(|deg| deg.to_radians().tan() * z_near);
        math::frustum(-left, right, -bottom, top, z_near, z_far)
    }
}

/// Default factory: calibration bytes hold a JSON [`ViewerProfile`].
#[derive(Debug, Default)]
pub struct ProfileLensFactory;

impl LensDistortionFactory for ProfileLensFactory {
    fn create(
        &mut self,
        calibration: &DeviceCalibration,
        screen_width: u32,
        screen_height: u32,
    ) -> Result<Box<dyn LensDistortion>> {
        let profile = ViewerProfile::decode(calibration)?;
        info!(
            "Lens distortion for {} {} at {}x{}",
            profile.vendor, profile.model, screen_width, screen_height
        );
        Ok(Box::new(PolynomialLensDistortion::new(
            profile,
            screen_width,
            screen_height,
        )))
    }
}

fn radial_scale(coefficients: &[f32], r2: f32) -> f32 {
    let mut scale = 1.0;
    let mut power = r2;
    for k in coefficients {
        scale += k * power;
        power *= r2;
    }
    scale
}

fn build_mesh(eye: Eye, eye_aspect: f32, coefficients: &[f32]) -> DistortionMesh {
    let n = MESH_RESOLUTION;
    let x_base = match eye {
        Eye::Left => -1.0,
        Eye::Right => 0.0,
    };

    // Normalize so the nearest eye edge samples exactly the texture edge.
    let edge = eye_aspect.min(1.0);
    let edge_r2 = edge * edge;
    let edge_factor = radial_scale(coefficients, edge_r2) * edge;

    let mut vertices = Vec::with_capacity(n * n);
    let mut uvs = Vec::with_capacity(n * n);
    for row in 0..n {
        let t = row as f32 / (n - 1) as f32;
        for col in 0..n {
            let s = col as f32 / (n - 1) as f32;
            vertices.push([x_base + s, t * 2.0 - 1.0]);

            // Lens-centered, height-normalized coordinates.
            let dx = (s - 0.5) * 2.0 * eye_aspect;
            let dy = (t - 0.5) * 2.0;
            let scale = radial_scale(coefficients, dx * dx + dy * dy) / edge_factor;
            let u = 0.5 + dx / eye_aspect * scale * edge * 0.5;
            let v = 0.5 + dy * scale * edge * 0.5;
            uvs.push([u.clamp(0.0, 1.0), v.clamp(0.0, 1.0)]);
        }
    }

    let mut indices = Vec::with_capacity((n - 1) * (n - 1) * 6);
    for row in 0..n - 1 {
        for col in 0..n - 1 {
            let i = (row * n + col) as u32;
            let above = i + n as u32;
            indices.extend_from_slice(&[i, i + 1, above, above, i + 1, above + 1]);
        }
    }

    DistortionMesh {
        vertices,
        uvs,
        indices,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use glam::Vec4;

    fn lens() -> PolynomialLensDistortion {
        PolynomialLensDistortion::new(ViewerProfile::cardboard_v2(), 1920, 1080)
    }

    #[test]
    fn eyes_sit_half_ipd_apart() {
        let lens = lens();
        let left = lens.eye_from_head_matrix(Eye::Left);
        let right = lens.eye_from_head_matrix(Eye::Right);
        assert!((left.w_axis.x - 0.032).abs() < 1e-6);
        assert!((right.w_axis.x + 0.032).abs() < 1e-6);
    }

    #[test]
    fn projection_maps_near_plane_to_minus_one() {
        let p = lens().projection_matrix(Eye::Left, 0.1, 100.0);
        let clip = p * Vec4::new(0.0, 0.0, -0.1, 1.0);
        assert!((clip.z / clip.w + 1.0).abs() < 1e-5);
    }

    #[test]
    fn right_projection_mirrors_left() {
        let mut profile = ViewerProfile::cardboard_v2();
        profile.left_eye_field_of_view_angles = [50.0, 40.0, 45.0, 45.0];
        let lens = PolynomialLensDistortion::new(profile, 1920, 1080);

        let left = lens.projection_matrix(Eye::Left, 0.1, 100.0);
        let right = lens.projection_matrix(Eye::Right, 0.1, 100.0);
        assert!((left.z_axis.x + right.z_axis.x).abs() < 1e-6);
        assert!(left.z_axis.x.abs() > 1e-3);
    }

    #[test]
    fn meshes_cover_their_half_of_the_screen() {
        let lens = lens();
        let n = MESH_RESOLUTION;
        for eye in Eye::BOTH {
            let mesh = lens.distortion_mesh(eye);
            assert_eq!(mesh.vertices.len(), n * n);
            assert_eq!(mesh.uvs.len(), n * n);
            assert_eq!(mesh.indices.len(), (n - 1) * (n - 1) * 6);
            assert!(mesh.indices.iter().all(|&i| (i as usize) < n * n));

            let (lo, hi) = match eye {
                Eye::Left => (-1.0, 0.0),
                Eye::Right => (0.0, 1.0),
            };
            assert!(mesh.vertices.iter().all(|v| v[0] >= lo && v[0] <= hi));
            assert!(mesh
                .uvs
                .iter()
                .all(|uv| (0.0..=1.0).contains(&uv[0]) && (0.0..=1.0).contains(&uv[1])));
        }
    }

    #[test]
    fn lens_center_samples_texture_center() {
        let lens = lens();
        let center = (MESH_RESOLUTION / 2) * MESH_RESOLUTION + MESH_RESOLUTION / 2;
        let uv = lens.distortion_mesh(Eye::Left).uvs[center];
        assert!((uv[0] - 0.5).abs() < 1e-6 && (uv[1] - 0.5).abs() < 1e-6);
    }

    #[test]
    fn no_coefficients_is_identity_warp() {
        let mut profile = ViewerProfile::cardboard_v2();
        profile.distortion_coefficients.clear();
        let lens = PolynomialLensDistortion::new(profile, 1000, 1000);
        let mesh = lens.distortion_mesh(Eye::Right);
        for (v, uv) in mesh.vertices.iter().zip(&mesh.uvs) {
            assert!((uv[0] - v[0]).abs() < 1e-5);
            assert!((uv[1] - (v[1] + 1.0) / 2.0).abs() < 1e-5);
        }
    }

    #[test]
    fn factory_rejects_garbage() {
        let result = ProfileLensFactory.create(&DeviceCalibration::new(vec![0xff; 8]), 1920, 1080);
        assert!(result.is_err());
    }
}
