//! Parsed scene data
//!
//! Plain CPU-side description of a scene as the loader consumes it: a node
//! hierarchy referencing meshes, meshes made of primitives with raw attribute
//! streams, and materials with texture URIs relative to the scene file.
//! [`gltf::parse_file`] fills these from a glTF document; tests and procedural
//! content can build them directly.

pub mod gltf;

use glam::{Mat4, Quat, Vec3};

use crate::backend::types::PrimitiveTopology;

/// A parsed scene: node roots plus the meshes and materials they reference
#[derive(Debug, Clone, Default)]
pub struct SceneAsset {
    pub roots: Vec<SceneNode>,
    pub meshes: Vec<MeshAsset>,
    pub materials: Vec<MaterialAsset>,
}

impl SceneAsset {
    /// Number of nodes in the whole hierarchy
    pub fn node_count(&self) -> usize {
        fn count(node: &SceneNode) -> usize {
            1 + node.children.iter().map(count).sum::<usize>()
        }
        self.roots.iter().map(count).sum()
    }
}

/// One node of the scene hierarchy
#[derive(Debug, Clone, Default)]
pub struct SceneNode {
    pub name: Option<String>,
    pub translation: Option<Vec3>,
    pub rotation: Option<Quat>,
    pub scale: Option<Vec3>,
    /// Index into [`SceneAsset::meshes`]
    pub mesh: Option<usize>,
    pub children: Vec<SceneNode>,
}

impl SceneNode {
    pub fn with_mesh(mesh: usize) -> Self {
        Self {
            mesh: Some(mesh),
            ..Default::default()
        }
    }

    /// `translate * rotate * scale`, absent components are identity
    pub fn local_transform(&self) -> Mat4 {
        let mut transform = Mat4::IDENTITY;
        if let Some(translation) = self.translation {
            transform *= Mat4::from_translation(translation);
        }
        if let Some(rotation) = self.rotation {
            transform *= Mat4::from_quat(rotation);
        }
        if let Some(scale) = self.scale {
            transform *= Mat4::from_scale(scale);
        }
        transform
    }
}

#[derive(Debug, Clone, Default)]
pub struct MeshAsset {
    pub name: Option<String>,
    pub primitives: Vec<PrimitiveAsset>,
}

/// Raw attribute streams of one primitive
#[derive(Debug, Clone, Default)]
pub struct PrimitiveAsset {
    pub topology: PrimitiveTopology,
    pub positions: Option<Vec<[f32; 3]>>,
    pub uvs: Option<Vec<[f32; 2]>>,
    pub normals: Option<Vec<[f32; 3]>>,
    /// `None` for non-indexed geometry
    pub indices: Option<Vec<u32>>,
    /// Index into [`SceneAsset::materials`]
    pub material: Option<usize>,
}

/// Material record with texture URIs relative to the scene file
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialAsset {
    pub name: Option<String>,
    pub base_color_texture: Option<String>,
    pub normal_texture: Option<String>,
    pub metallic_roughness_texture: Option<String>,
    pub base_color_factor: [f32; 4],
    pub metallic_factor: f32,
    pub roughness_factor: f32,
}

impl Default for MaterialAsset {
    fn default() -> Self {
        Self {
            name: None,
            base_color_texture: None,
            normal_texture: None,
            metallic_roughness_texture: None,
            base_color_factor: [1.0; 4],
            metallic_factor: 1.0,
            roughness_factor: 1.0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_local_transform_order() {
        let node = SceneNode {
            translation: Some(Vec3::new(10.0, 0.0, 0.0)),
            rotation: Some(Quat::from_rotation_z(std::f32::consts::FRAC_PI_2)),
            scale: Some(Vec3::splat(2.0)),
            ..Default::default()
        };
        let p = node.local_transform().transform_point3(Vec3::X);
        assert!(p.abs_diff_eq(Vec3::new(10.0, 2.0, 0.0), 1e-5));
    }

    #[test]
    fn test_absent_components_are_identity() {
        assert_eq!(SceneNode::default().local_transform(), Mat4::IDENTITY);
    }

    #[test]
    fn test_node_count() {
        let scene = SceneAsset {
            roots: vec![SceneNode {
                children: vec![SceneNode::default(), SceneNode::with_mesh(0)],
                ..Default::default()
            }],
            ..Default::default()
        };
        assert_eq!(scene.node_count(), 3);
    }
}
