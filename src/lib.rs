//! Meshlet Renderer - render graph and mesh preparation core of a bindless renderer
//!
//! The crate is GPU-API agnostic: everything it asks of the GPU goes through the
//! [`GpuDevice`](backend::GpuDevice) trait. [`DummyDevice`](backend::DummyDevice)
//! implements it without hardware.
//!
//! # Features
//! - Render graph with explicit producer/consumer bindings, dependency-ordered baking and cycle detection
//! - Greedy streaming meshlet clustering with bounding spheres for culling
//! - glTF scene loading into interleaved vertices, indices and meshlet buffers
//! - Bindless materials with optional fork/join texture decoding
//! - A reference geometry pass for the mesh-shading and vertex draw paths

pub mod asset;
pub mod backend;
pub mod pipeline;
pub mod render_graph;
pub mod resources;
pub mod scene;

pub use render_graph::{FrameContext, RenderGraph};
pub use resources::{Mesh, MeshLoader};

/// Configuration for the render graph and its frame context
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GraphConfig {
    /// Slots in the bindless image heap
    pub image_heap_capacity: u32,
    /// Slots in the bindless sampler heap
    pub sampler_heap_capacity: u32,
    /// Set index of the camera uniform set
    pub camera_set_binding: u32,
}

impl Default for GraphConfig {
    fn default() -> Self {
        Self {
            image_heap_capacity: 1024,
            sampler_heap_capacity: 16,
            camera_set_binding: 2,
        }
    }
}

/// Configuration for the mesh loader
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoaderConfig {
    /// Decode the textures of a material on parallel scoped threads
    pub parallel_texture_loading: bool,
    /// Set index of the per-material uniform set
    pub material_set_binding: u32,
    /// Set index of the per-primitive geometry set
    pub geometry_set_binding: u32,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            parallel_texture_loading: true,
            material_set_binding: 3,
            geometry_set_binding: 4,
        }
    }
}

/// Configuration for the whole renderer core
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RendererConfig {
    /// Initial frame width
    pub width: u32,
    /// Initial frame height
    pub height: u32,
    pub graph: GraphConfig,
    pub loader: LoaderConfig,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            width: 1280,
            height: 720,
            graph: GraphConfig::default(),
            loader: LoaderConfig::default(),
        }
    }
}

impl RendererConfig {
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            ..Default::default()
        }
    }

    /// Create a graph sized to the configured extent
    pub fn create_graph(
        &self,
        gpu: &mut dyn backend::GpuDevice,
    ) -> backend::GpuResult<RenderGraph> {
        RenderGraph::new(gpu, &self.graph, self.width, self.height)
    }

    /// Create a loader registering into the heaps of `graph`
    pub fn create_loader(
        &self,
        gpu: &mut dyn backend::GpuDevice,
        graph: &RenderGraph,
    ) -> backend::GpuResult<MeshLoader> {
        MeshLoader::new(gpu, graph.frame(), self.loader.clone())
    }
}
