//! glTF scene parsing

use std::path::Path;

use glam::{Quat, Vec3};
use gltf_dep::image::Source;
use gltf_dep::mesh::Mode;

use super::{MaterialAsset, MeshAsset, PrimitiveAsset, SceneAsset, SceneNode};
use crate::backend::types::PrimitiveTopology;
use crate::resources::{LoadError, LoadResult};

/// Parse a `.gltf`/`.glb` file and resolve its buffers.
///
/// Buffers referenced by relative URI are read from the file's directory.
/// Only the default scene (or the first one) is converted.
pub fn parse_file(path: &Path) -> LoadResult<SceneAsset> {
    let parse_error = |source| LoadError::Parse {
        path: path.to_path_buf(),
        source,
    };

    let gltf_dep::Gltf { document, blob } = gltf_dep::Gltf::open(path).map_err(parse_error)?;
    let buffers = gltf_dep::import_buffers(&document, path.parent(), blob).map_err(parse_error)?;

    let scene = convert_document(&document, &buffers);
    log::info!(
        "Parsed {}: {} nodes, {} meshes, {} materials",
        path.display(),
        scene.node_count(),
        scene.meshes.len(),
        scene.materials.len()
    );
    Ok(scene)
}

fn convert_document(document: &gltf_dep::Document, buffers: &[gltf_dep::buffer::Data]) -> SceneAsset {
    let meshes = document
        .meshes()
        .map(|mesh| MeshAsset {
            name: mesh.name().map(String::from),
            primitives: mesh
                .primitives()
                .map(|primitive| convert_primitive(&primitive, buffers))
                .collect(),
        })
        .collect();

    let materials = document.materials().map(|m| convert_material(&m)).collect();

    let roots = document
        .default_scene()
        .or_else(|| document.scenes().next())
        .map(|scene| scene.nodes().map(|node| convert_node(&node)).collect())
        .unwrap_or_default();

    SceneAsset {
        roots,
        meshes,
        materials,
    }
}

fn convert_node(node: &gltf_dep::Node<'_>) -> SceneNode {
    let (translation, rotation, scale) = node.transform().decomposed();

    SceneNode {
        name: node.name().map(String::from),
        translation: Some(Vec3::from_array(translation)),
        rotation: Some(Quat::from_array(rotation)),
        scale: Some(Vec3::from_array(scale)),
        mesh: node.mesh().map(|m| m.index()),
        children: node.children().map(|child| convert_node(&child)).collect(),
    }
}

fn convert_primitive(
    primitive: &gltf_dep::Primitive<'_>,
    buffers: &[gltf_dep::buffer::Data],
) -> PrimitiveAsset {
    let reader = primitive.reader(|buffer| buffers.get(buffer.index()).map(|data| data.0.as_slice()));

    PrimitiveAsset {
        topology: map_mode(primitive.mode()),
        positions: reader.read_positions().map(Iterator::collect),
        uvs: reader.read_tex_coords(0).map(|uvs| uvs.into_f32().collect()),
        normals: reader.read_normals().map(Iterator::collect),
        indices: reader.read_indices().map(|indices| indices.into_u32().collect()),
        material: primitive.material().index(),
    }
}

fn convert_material(material: &gltf_dep::Material<'_>) -> MaterialAsset {
    let pbr = material.pbr_metallic_roughness();

    MaterialAsset {
        name: material.name().map(String::from),
        base_color_texture: pbr.base_color_texture().and_then(|t| texture_uri(&t.texture())),
        normal_texture: material.normal_texture().and_then(|t| texture_uri(&t.texture())),
        metallic_roughness_texture: pbr
            .metallic_roughness_texture()
            .and_then(|t| texture_uri(&t.texture())),
        base_color_factor: pbr.base_color_factor(),
        metallic_factor: pbr.metallic_factor(),
        roughness_factor: pbr.roughness_factor(),
    }
}

/// Relative URI of an external texture image
fn texture_uri(texture: &gltf_dep::Texture<'_>) -> Option<String> {
    match texture.source().source() {
        Source::Uri { uri, .. } if !uri.starts_with("data:") => Some(uri.to_string()),
        _ => {
            log::warn!(
                "Texture {} is embedded in the asset, treating it as absent",
                texture.index()
            );
            None
        }
    }
}

fn map_mode(mode: Mode) -> PrimitiveTopology {
    match mode {
        Mode::Points => PrimitiveTopology::PointList,
        Mode::Lines => PrimitiveTopology::LineList,
        Mode::LineLoop | Mode::LineStrip => PrimitiveTopology::LineStrip,
        Mode::Triangles => PrimitiveTopology::TriangleList,
        Mode::TriangleStrip => PrimitiveTopology::TriangleStrip,
        Mode::TriangleFan => PrimitiveTopology::TriangleFan,
    }
}
