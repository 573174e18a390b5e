//! GPU meshes built from parsed scenes
//!
//! [`MeshLoader`] walks a [`SceneAsset`] hierarchy and turns every primitive into
//! interleaved vertices, indices and meshlets uploaded to GPU buffers, plus a
//! geometry descriptor set. Materials referenced by primitives are decoded,
//! uploaded and registered in the bindless heaps of the frame context.

use std::f32::consts::PI;
use std::path::{Path, PathBuf};

use glam::{Mat4, Vec2, Vec3};

use crate::asset::{self, PrimitiveAsset, SceneAsset, SceneNode};
use crate::backend::{
    BufferHandle, BufferKind, DescriptorHeapHandle, DescriptorKind, DescriptorSetHandle,
    DescriptorSetLayoutDesc, DescriptorSetLayoutHandle, DescriptorWrite, GpuDevice, GpuResult,
    PrimitiveTopology, Vertex,
};
use crate::render_graph::FrameContext;
use crate::resources::error::{LoadError, LoadResult};
use crate::resources::material::{Material, MaterialBindings};
use crate::resources::meshlet::{Meshlet, MeshletBuilder};
use crate::LoaderConfig;

/// GPU objects owned by a primitive that has at least one triangle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimitiveBuffers {
    pub vertex_buffer: BufferHandle,
    pub index_buffer: BufferHandle,
    pub meshlet_buffer: BufferHandle,
    /// Vertex buffer at binding 0, meshlet buffer at binding 1
    pub geometry_set: DescriptorSetHandle,
}

/// One drawable unit of a mesh
#[derive(Debug, Clone)]
pub struct Primitive {
    pub transform: Mat4,
    pub vertex_count: u32,
    pub index_count: u32,
    pub triangle_count: u32,
    pub meshlet_count: u32,
    /// Index into [`Mesh::materials`]
    pub material: Option<usize>,
    /// CPU copy of the uploaded meshlets, used for culling
    pub meshlets: Vec<Meshlet>,
    /// `None` when the primitive has no triangles
    pub buffers: Option<PrimitiveBuffers>,
}

impl Primitive {
    /// Placeholder for a primitive that is not drawn
    fn empty(transform: Mat4) -> Self {
        Self {
            transform,
            vertex_count: 0,
            index_count: 0,
            triangle_count: 0,
            meshlet_count: 0,
            material: None,
            meshlets: Vec::new(),
            buffers: None,
        }
    }

    pub fn is_drawable(&self) -> bool {
        self.buffers.is_some() && self.meshlet_count > 0
    }

    pub fn free(self, gpu: &mut dyn GpuDevice) {
        if let Some(buffers) = self.buffers {
            gpu.free_buffer(buffers.meshlet_buffer);
            gpu.free_buffer(buffers.index_buffer);
            gpu.free_buffer(buffers.vertex_buffer);
            gpu.free_descriptor_set(buffers.geometry_set);
        }
    }
}

/// Every primitive and material loaded from one scene
#[derive(Debug, Default)]
pub struct Mesh {
    pub primitives: Vec<Primitive>,
    pub materials: Vec<Material>,
    /// Directory texture URIs are resolved against
    pub directory: PathBuf,
    pub total_vertex_count: u32,
    pub total_index_count: u32,
    pub total_triangle_count: u32,
}

impl Mesh {
    pub fn meshlet_count(&self) -> u32 {
        self.primitives.iter().map(|p| p.meshlet_count).sum()
    }

    /// Release every primitive and material
    pub fn free(self, gpu: &mut dyn GpuDevice) {
        for primitive in self.primitives {
            primitive.free(gpu);
        }
        for material in self.materials {
            material.free(gpu);
        }
    }

    fn push_primitive(&mut self, primitive: Primitive) {
        self.total_vertex_count += primitive.vertex_count;
        self.total_index_count += primitive.index_count;
        self.total_triangle_count += primitive.triangle_count;
        self.primitives.push(primitive);
    }
}

/// Loader context: shared descriptor layouts and the heaps materials register into
#[derive(Debug)]
pub struct MeshLoader {
    config: LoaderConfig,
    image_heap: DescriptorHeapHandle,
    sampler_heap: DescriptorHeapHandle,
    material_layout: DescriptorSetLayoutHandle,
    geometry_layout: DescriptorSetLayoutHandle,
    builder: MeshletBuilder,
}

impl MeshLoader {
    /// Create the shared layouts. The heaps stay owned by `frame`, which must outlive the loader.
    pub fn new(gpu: &mut dyn GpuDevice, frame: &FrameContext, config: LoaderConfig) -> GpuResult<Self> {
        let material_layout = gpu.create_descriptor_set_layout(&DescriptorSetLayoutDesc::new(
            config.material_set_binding,
            &[DescriptorKind::UniformBuffer],
        ))?;
        let geometry_layout = gpu.create_descriptor_set_layout(&DescriptorSetLayoutDesc::new(
            config.geometry_set_binding,
            &[DescriptorKind::StorageBuffer, DescriptorKind::StorageBuffer],
        ))?;

        Ok(Self {
            config,
            image_heap: frame.image_heap(),
            sampler_heap: frame.sampler_heap(),
            material_layout,
            geometry_layout,
            builder: MeshletBuilder::new(),
        })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    /// Layout of the per-material uniform set
    pub fn material_layout(&self) -> DescriptorSetLayoutHandle {
        self.material_layout
    }

    /// Layout of the per-primitive vertex + meshlet storage set
    pub fn geometry_layout(&self) -> DescriptorSetLayoutHandle {
        self.geometry_layout
    }

    /// Parse a glTF file and load every primitive of its default scene
    pub fn load(&mut self, gpu: &mut dyn GpuDevice, path: impl AsRef<Path>) -> LoadResult<Mesh> {
        let path = path.as_ref();
        let scene = asset::gltf::parse_file(path)?;
        let directory = path.parent().unwrap_or_else(|| Path::new(""));
        self.load_scene(gpu, &scene, directory)
    }

    /// Load every primitive reachable from the scene roots.
    ///
    /// Texture URIs are resolved against `directory`.
    pub fn load_scene(
        &mut self,
        gpu: &mut dyn GpuDevice,
        scene: &SceneAsset,
        directory: &Path,
    ) -> LoadResult<Mesh> {
        let mut mesh = Mesh {
            directory: directory.to_path_buf(),
            ..Default::default()
        };

        for root in &scene.roots {
            if let Err(err) = self.load_node(gpu, scene, root, &mut mesh) {
                mesh.free(gpu);
                return Err(err);
            }
        }

        log::info!(
            "Loaded mesh from {}: {} primitives, {} materials, {} triangles, {} meshlets",
            mesh.directory.display(),
            mesh.primitives.len(),
            mesh.materials.len(),
            mesh.total_triangle_count,
            mesh.meshlet_count()
        );
        Ok(mesh)
    }

    /// Destroy the shared layouts
    pub fn free(self, gpu: &mut dyn GpuDevice) {
        gpu.free_descriptor_set_layout(self.geometry_layout);
        gpu.free_descriptor_set_layout(self.material_layout);
    }

    fn load_node(
        &mut self,
        gpu: &mut dyn GpuDevice,
        scene: &SceneAsset,
        node: &SceneNode,
        mesh: &mut Mesh,
    ) -> LoadResult<()> {
        if let Some(mesh_index) = node.mesh {
            let transform = node.local_transform() * Mat4::from_rotation_y(PI);

            match scene.meshes.get(mesh_index) {
                Some(mesh_asset) => {
                    for primitive in &mesh_asset.primitives {
                        let index = mesh.primitives.len();
                        let loaded = self.load_primitive(gpu, scene, primitive, index, transform, mesh)?;
                        mesh.push_primitive(loaded);
                    }
                }
                None => log::warn!("Node references missing mesh {mesh_index}"),
            }
        }

        for child in &node.children {
            self.load_node(gpu, scene, child, mesh)?;
        }
        Ok(())
    }

    fn load_primitive(
        &mut self,
        gpu: &mut dyn GpuDevice,
        scene: &SceneAsset,
        asset: &PrimitiveAsset,
        index: usize,
        transform: Mat4,
        mesh: &mut Mesh,
    ) -> LoadResult<Primitive> {
        if asset.topology != PrimitiveTopology::TriangleList {
            log::warn!(
                "Skipping primitive {index}: {:?} topology is not supported",
                asset.topology
            );
            return Ok(Primitive::empty(transform));
        }

        let vertices = interleave(asset, index)?;
        let indices = match &asset.indices {
            Some(indices) => indices.clone(),
            None => (0..vertices.len() as u32).collect(),
        };

        let meshlets = self.builder.build(&vertices, &indices)?;
        let triangle_count = (indices.len() / 3) as u32;

        let material = match asset.material {
            Some(material_index) => match scene.materials.get(material_index) {
                Some(material_asset) => {
                    let bindings = MaterialBindings {
                        image_heap: self.image_heap,
                        sampler_heap: self.sampler_heap,
                        layout: self.material_layout,
                        parallel: self.config.parallel_texture_loading,
                    };
                    let material = Material::load(gpu, material_asset, &mesh.directory, &bindings)?;
                    mesh.materials.push(material);
                    Some(mesh.materials.len() - 1)
                }
                None => {
                    log::warn!("Primitive {index} references missing material {material_index}");
                    None
                }
            },
            None => None,
        };

        let buffers = if triangle_count > 0 {
            Some(upload_geometry(
                gpu,
                self.geometry_layout,
                &vertices,
                &indices,
                &meshlets,
            )?)
        } else {
            None
        };

        log::debug!(
            "Primitive {index}: {} vertices, {triangle_count} triangles, {} meshlets",
            vertices.len(),
            meshlets.len()
        );

        Ok(Primitive {
            transform,
            vertex_count: vertices.len() as u32,
            index_count: indices.len() as u32,
            triangle_count,
            meshlet_count: meshlets.len() as u32,
            material,
            meshlets,
            buffers,
        })
    }
}

/// Interleave position, uv and normal streams into one vertex array
fn interleave(asset: &PrimitiveAsset, primitive: usize) -> LoadResult<Vec<Vertex>> {
    let missing = |attribute| LoadError::MissingAttribute {
        primitive,
        attribute,
    };
    let positions = asset.positions.as_ref().ok_or_else(|| missing("POSITION"))?;
    let uvs = asset.uvs.as_ref().ok_or_else(|| missing("TEXCOORD_0"))?;
    let normals = asset.normals.as_ref().ok_or_else(|| missing("NORMAL"))?;

    for (attribute, found) in [("TEXCOORD_0", uvs.len()), ("NORMAL", normals.len())] {
        if found != positions.len() {
            return Err(LoadError::AttributeCountMismatch {
                primitive,
                attribute,
                expected: positions.len(),
                found,
            });
        }
    }

    Ok(positions
        .iter()
        .zip(uvs)
        .zip(normals)
        .map(|((&position, &uv), &normal)| {
            Vertex::new(
                Vec3::from_array(position),
                Vec2::from_array(uv),
                Vec3::from_array(normal),
            )
        })
        .collect())
}

fn upload_geometry(
    gpu: &mut dyn GpuDevice,
    layout: DescriptorSetLayoutHandle,
    vertices: &[Vertex],
    indices: &[u32],
    meshlets: &[Meshlet],
) -> GpuResult<PrimitiveBuffers> {
    let vertex_bytes: &[u8] = bytemuck::cast_slice(vertices);
    let index_bytes: &[u8] = bytemuck::cast_slice(indices);
    let meshlet_bytes: &[u8] = bytemuck::cast_slice(meshlets);

    let mut allocated = Vec::with_capacity(3);
    let uploads = [
        (vertex_bytes, BufferKind::Vertex),
        (index_bytes, BufferKind::Index),
        (meshlet_bytes, BufferKind::Storage),
    ];
    for (bytes, kind) in uploads {
        match gpu.allocate_buffer(bytes.len() as u64, kind) {
            Ok(buffer) => {
                gpu.upload_buffer(buffer, bytes);
                allocated.push(buffer);
            }
            Err(err) => {
                release_buffers(gpu, &allocated);
                return Err(err);
            }
        }
    }
    let [vertex_buffer, index_buffer, meshlet_buffer] = [allocated[0], allocated[1], allocated[2]];

    let geometry_set = match gpu.create_descriptor_set(layout) {
        Ok(set) => set,
        Err(err) => {
            release_buffers(gpu, &allocated);
            return Err(err);
        }
    };
    gpu.write_descriptor_set(
        geometry_set,
        0,
        DescriptorWrite::StorageBuffer {
            buffer: vertex_buffer,
            size: vertex_bytes.len() as u64,
        },
    );
    gpu.write_descriptor_set(
        geometry_set,
        1,
        DescriptorWrite::StorageBuffer {
            buffer: meshlet_buffer,
            size: meshlet_bytes.len() as u64,
        },
    );

    Ok(PrimitiveBuffers {
        vertex_buffer,
        index_buffer,
        meshlet_buffer,
        geometry_set,
    })
}

fn release_buffers(gpu: &mut dyn GpuDevice, buffers: &[BufferHandle]) {
    log::debug!("Releasing {} buffers of a failed geometry upload", buffers.len());
    for &buffer in buffers {
        gpu.free_buffer(buffer);
    }
}
