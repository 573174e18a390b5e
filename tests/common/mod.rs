//! Common utilities for renderer integration tests.
//!
//! Provides a dummy-device test context, procedural scenes and on-disk fixtures
//! (textures and small glTF files) written into temporary directories.

#![allow(dead_code)]

use std::path::{Path, PathBuf};

use meshlet_renderer::asset::{MaterialAsset, MeshAsset, PrimitiveAsset, SceneAsset, SceneNode};
use meshlet_renderer::backend::{DummyDevice, PrimitiveTopology};
use meshlet_renderer::{MeshLoader, RenderGraph, RendererConfig};

/// Route log output through the test harness
pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

// ============================================================================
// Test Context
// ============================================================================

/// A dummy device plus a graph and a loader sharing its heaps
pub struct TestContext {
    pub gpu: DummyDevice,
    pub graph: RenderGraph,
    pub loader: MeshLoader,
}

impl TestContext {
    pub fn new() -> Self {
        Self::with_config(RendererConfig::new(64, 64))
    }

    pub fn with_config(config: RendererConfig) -> Self {
        init_logging();
        let mut gpu = DummyDevice::new();
        let graph = config.create_graph(&mut gpu).unwrap();
        let loader = config.create_loader(&mut gpu, &graph).unwrap();
        Self { gpu, graph, loader }
    }

    /// Tear everything down and return the device for leak checks
    pub fn finish(self) -> DummyDevice {
        let Self {
            mut gpu,
            graph,
            loader,
        } = self;
        graph.free(&mut gpu).unwrap();
        loader.free(&mut gpu);
        gpu
    }
}

// ============================================================================
// Procedural Scenes
// ============================================================================

/// A single counter-clockwise triangle in the XY plane
pub fn triangle_primitive(material: Option<usize>) -> PrimitiveAsset {
    PrimitiveAsset {
        topology: PrimitiveTopology::TriangleList,
        positions: Some(vec![[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]]),
        uvs: Some(vec![[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]]),
        normals: Some(vec![[0.0, 0.0, 1.0]; 3]),
        indices: Some(vec![0, 1, 2]),
        material,
    }
}

/// A `cells` x `cells` grid of quads in the XY plane, two triangles per quad
pub fn grid_primitive(cells: u32) -> PrimitiveAsset {
    let side = cells + 1;
    let mut positions = Vec::new();
    let mut uvs = Vec::new();
    for y in 0..side {
        for x in 0..side {
            positions.push([x as f32, y as f32, 0.0]);
            uvs.push([x as f32 / cells as f32, y as f32 / cells as f32]);
        }
    }

    let mut indices = Vec::new();
    for y in 0..cells {
        for x in 0..cells {
            let i = y * side + x;
            indices.extend_from_slice(&[i, i + 1, i + side, i + 1, i + side + 1, i + side]);
        }
    }

    PrimitiveAsset {
        topology: PrimitiveTopology::TriangleList,
        normals: Some(vec![[0.0, 0.0, 1.0]; positions.len()]),
        positions: Some(positions),
        uvs: Some(uvs),
        indices: Some(indices),
        material: None,
    }
}

/// One root node carrying one mesh made of `primitives`
pub fn scene_of(primitives: Vec<PrimitiveAsset>, materials: Vec<MaterialAsset>) -> SceneAsset {
    SceneAsset {
        roots: vec![SceneNode::with_mesh(0)],
        meshes: vec![MeshAsset {
            name: Some("test".into()),
            primitives,
        }],
        materials,
    }
}

/// Material referencing textures by file name
pub fn textured_material(
    albedo: Option<&str>,
    normal: Option<&str>,
    metallic_roughness: Option<&str>,
) -> MaterialAsset {
    MaterialAsset {
        name: Some("textured".into()),
        base_color_texture: albedo.map(String::from),
        normal_texture: normal.map(String::from),
        metallic_roughness_texture: metallic_roughness.map(String::from),
        base_color_factor: [0.5, 0.25, 1.0, 0.75],
        metallic_factor: 0.2,
        roughness_factor: 0.8,
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// Write a `width` x `height` PNG with a simple gradient
pub fn write_png(dir: &Path, name: &str, width: u32, height: u32) -> PathBuf {
    let image = image::RgbaImage::from_fn(width, height, |x, y| {
        image::Rgba([(x * 255 / width.max(1)) as u8, (y * 255 / height.max(1)) as u8, 128, 255])
    });
    let path = dir.join(name);
    image.save(&path).unwrap();
    path
}

/// Write a one-triangle glTF file with an external buffer and an albedo texture.
///
/// The node is translated by `(1, 0, 0)` and the triangle uses u16 indices.
pub fn write_triangle_gltf(dir: &Path) -> PathBuf {
    let positions: [[f32; 3]; 3] = [[0.0, 0.0, 0.0], [1.0, 0.0, 0.0], [0.0, 1.0, 0.0]];
    let normals: [[f32; 3]; 3] = [[0.0, 0.0, 1.0]; 3];
    let uvs: [[f32; 2]; 3] = [[0.0, 0.0], [1.0, 0.0], [0.0, 1.0]];
    let indices: [u16; 3] = [0, 1, 2];

    let mut bin = Vec::new();
    bin.extend_from_slice(bytemuck::cast_slice(&positions));
    bin.extend_from_slice(bytemuck::cast_slice(&normals));
    bin.extend_from_slice(bytemuck::cast_slice(&uvs));
    bin.extend_from_slice(bytemuck::cast_slice(&indices));
    bin.resize(104, 0);
    std::fs::write(dir.join("triangle.bin"), &bin).unwrap();

    write_png(dir, "albedo.png", 8, 4);

    let json = r#"{
  "asset": { "version": "2.0" },
  "scene": 0,
  "scenes": [{ "nodes": [0] }],
  "nodes": [{ "name": "root", "mesh": 0, "translation": [1.0, 0.0, 0.0] }],
  "meshes": [{
    "name": "triangle",
    "primitives": [{
      "attributes": { "POSITION": 0, "NORMAL": 1, "TEXCOORD_0": 2 },
      "indices": 3,
      "material": 0,
      "mode": 4
    }]
  }],
  "materials": [{
    "name": "albedo only",
    "pbrMetallicRoughness": {
      "baseColorTexture": { "index": 0 },
      "baseColorFactor": [1.0, 0.5, 0.25, 1.0],
      "metallicFactor": 0.0,
      "roughnessFactor": 0.5
    }
  }],
  "textures": [{ "source": 0 }],
  "images": [{ "uri": "albedo.png" }],
  "buffers": [{ "uri": "triangle.bin", "byteLength": 104 }],
  "bufferViews": [
    { "buffer": 0, "byteOffset": 0, "byteLength": 36 },
    { "buffer": 0, "byteOffset": 36, "byteLength": 36 },
    { "buffer": 0, "byteOffset": 72, "byteLength": 24 },
    { "buffer": 0, "byteOffset": 96, "byteLength": 6 }
  ],
  "accessors": [
    { "bufferView": 0, "componentType": 5126, "count": 3, "type": "VEC3",
      "min": [0.0, 0.0, 0.0], "max": [1.0, 1.0, 0.0] },
    { "bufferView": 1, "componentType": 5126, "count": 3, "type": "VEC3" },
    { "bufferView": 2, "componentType": 5126, "count": 3, "type": "VEC2" },
    { "bufferView": 3, "componentType": 5123, "count": 3, "type": "SCALAR" }
  ]
}"#;

    let path = dir.join("triangle.gltf");
    std::fs::write(&path, json).unwrap();
    path
}
