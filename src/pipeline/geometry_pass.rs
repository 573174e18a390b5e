//! Geometry pass drawing loaded meshes into colour and depth targets

use std::any::Any;

use glam::Mat4;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::render_graph::*;
use crate::resources::{Mesh, MeshLoader, Meshlet};
use crate::scene::Frustum;

/// Output port of the colour target
pub const COLOR_OUTPUT: u32 = 0;
/// Output port of the depth target
pub const DEPTH_OUTPUT: u32 = 1;

/// Set index of the bindless image heap
pub const IMAGE_HEAP_SET: u32 = 0;
/// Set index of the bindless sampler heap
pub const SAMPLER_HEAP_SET: u32 = 1;

/// Shader modules for one of the two draw paths
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShaderPaths {
    /// Indexed draws through the vertex stage
    Vertex { vertex: String, fragment: String },
    /// One task group per meshlet through the mesh stage
    Mesh {
        task: Option<String>,
        mesh: String,
        fragment: String,
    },
}

impl ShaderPaths {
    pub fn uses_mesh_shaders(&self) -> bool {
        matches!(self, ShaderPaths::Mesh { .. })
    }
}

/// Geometry pass configuration
#[derive(Debug, Clone)]
pub struct GeometryConfig {
    pub shaders: ShaderPaths,
    pub color_format: ImageFormat,
    pub depth_format: ImageFormat,
    pub clear_color: [f32; 4],
    /// Skip primitives whose meshlet spheres are all outside the view
    pub frustum_culling: bool,
}

impl Default for GeometryConfig {
    fn default() -> Self {
        Self {
            shaders: ShaderPaths::Mesh {
                task: None,
                mesh: "shaders/geometry.mesh.spv".into(),
                fragment: "shaders/geometry.frag.spv".into(),
            },
            color_format: ImageFormat::Rgba16Float,
            depth_format: ImageFormat::Depth32Float,
            clear_color: [0.0, 0.0, 0.0, 1.0],
            frustum_culling: true,
        }
    }
}

/// Everything needed to record the draw of one primitive
#[derive(Debug, Clone)]
struct DrawItem {
    transform: Mat4,
    vertex_buffer: BufferHandle,
    index_buffer: BufferHandle,
    geometry_set: DescriptorSetHandle,
    material_set: Option<DescriptorSetHandle>,
    index_count: u32,
    meshlets: Vec<Meshlet>,
}

impl DrawItem {
    fn is_visible(&self, frustum: &Frustum) -> bool {
        self.meshlets
            .iter()
            .any(|meshlet| meshlet.is_visible(frustum, &self.transform))
    }
}

/// Draws every drawable primitive of the meshes it is given.
///
/// Publishes a colour target on [`COLOR_OUTPUT`] and a depth target on
/// [`DEPTH_OUTPUT`], both sized to the frame extent.
pub struct GeometryNode {
    config: GeometryConfig,
    set_layouts: [DescriptorSetLayoutHandle; 2],
    material_binding: u32,
    geometry_binding: u32,
    draws: Vec<DrawItem>,
    shaders: Vec<ShaderHandle>,
    pipeline: Option<PipelineHandle>,
    visible_last_frame: usize,
}

impl GeometryNode {
    pub fn new(loader: &MeshLoader, config: GeometryConfig) -> Self {
        Self {
            config,
            set_layouts: [loader.material_layout(), loader.geometry_layout()],
            material_binding: loader.config().material_set_binding,
            geometry_binding: loader.config().geometry_set_binding,
            draws: Vec::new(),
            shaders: Vec::new(),
            pipeline: None,
            visible_last_frame: 0,
        }
    }

    /// Wrap in a graph node with colour and depth outputs and no inputs
    pub fn into_node(self) -> NodeRef {
        RenderGraphNode::new(self, &["color", "depth"], 0)
    }

    /// Queue the drawable primitives of `mesh`. The mesh must outlive its draws.
    pub fn add_mesh(&mut self, mesh: &Mesh) {
        for primitive in mesh.primitives.iter().filter(|p| p.is_drawable()) {
            let Some(buffers) = primitive.buffers else {
                continue;
            };
            self.draws.push(DrawItem {
                transform: primitive.transform,
                vertex_buffer: buffers.vertex_buffer,
                index_buffer: buffers.index_buffer,
                geometry_set: buffers.geometry_set,
                material_set: primitive
                    .material
                    .and_then(|index| mesh.materials.get(index))
                    .map(|material| material.descriptor_set),
                index_count: primitive.index_count,
                meshlets: primitive.meshlets.clone(),
            });
        }
        log::debug!("Geometry pass now draws {} primitives", self.draws.len());
    }

    pub fn draw_count(&self) -> usize {
        self.draws.len()
    }

    /// Primitives that survived culling in the last recorded frame
    pub fn visible_last_frame(&self) -> usize {
        self.visible_last_frame
    }

    fn allocate_targets(&self, io: &mut NodeIo, ctx: &mut PassContext<'_>) -> GraphResult<()> {
        let (width, height) = ctx.frame.extent();

        let color = ctx.gpu.allocate_image(&ImageDescriptor {
            label: Some("geometry color".into()),
            width,
            height,
            format: self.config.color_format,
            usage: ImageUsage::COLOR_ATTACHMENT | ImageUsage::SAMPLED,
        })?;
        let depth = ctx.gpu.allocate_image(&ImageDescriptor {
            label: Some("geometry depth".into()),
            width,
            height,
            format: self.config.depth_format,
            usage: ImageUsage::DEPTH_ATTACHMENT | ImageUsage::SAMPLED,
        })?;

        for (port, image) in [(COLOR_OUTPUT, color), (DEPTH_OUTPUT, depth)] {
            if let Some(previous) = io.set_output(port, image) {
                ctx.gpu.free_image(previous);
            }
        }
        Ok(())
    }

    fn release_targets(io: &mut NodeIo, gpu: &mut dyn GpuDevice) {
        for port in [COLOR_OUTPUT, DEPTH_OUTPUT] {
            if let Some(image) = io.take_output(port) {
                gpu.free_image(image);
            }
        }
    }

    fn create_pipeline(&mut self, ctx: &mut PassContext<'_>) -> GraphResult<PipelineHandle> {
        let paths = self.config.shaders.clone();
        let stages = match &paths {
            ShaderPaths::Vertex { vertex, fragment } => ShaderStages::Vertex {
                vertex: self.load_shader(ctx.gpu, vertex)?,
                fragment: self.load_shader(ctx.gpu, fragment)?,
            },
            ShaderPaths::Mesh {
                task,
                mesh,
                fragment,
            } => ShaderStages::Mesh {
                task: match task {
                    Some(task) => Some(self.load_shader(ctx.gpu, task)?),
                    None => None,
                },
                mesh: self.load_shader(ctx.gpu, mesh)?,
                fragment: self.load_shader(ctx.gpu, fragment)?,
            },
        };

        let pipeline = ctx.gpu.create_graphics_pipeline(&PipelineDescriptor {
            label: Some(self.name().to_string()),
            color_formats: vec![self.config.color_format],
            depth_format: Some(self.config.depth_format),
            depth_compare: CompareFunction::Less,
            cull_mode: CullMode::Back,
            front_face: FrontFace::CounterClockwise,
            polygon_mode: PolygonMode::Fill,
            topology: PrimitiveTopology::TriangleList,
            shaders: stages,
            set_layouts: vec![ctx.frame.camera_layout(), self.set_layouts[0], self.set_layouts[1]],
            push_constant_size: std::mem::size_of::<Mat4>() as u32,
        })?;
        Ok(pipeline)
    }

    fn load_shader(&mut self, gpu: &mut dyn GpuDevice, path: &str) -> GpuResult<ShaderHandle> {
        let shader = gpu.load_shader(path)?;
        self.shaders.push(shader);
        Ok(shader)
    }
}

impl RenderNode for GeometryNode {
    fn name(&self) -> &str {
        "Geometry Pass"
    }

    fn init(&mut self, io: &mut NodeIo, ctx: &mut PassContext<'_>) -> GraphResult<()> {
        let pipeline = self.create_pipeline(ctx)?;
        self.pipeline = Some(pipeline);
        self.allocate_targets(io, ctx)
    }

    fn update(&mut self, io: &mut NodeIo, ctx: &mut PassContext<'_>) -> GraphResult<()> {
        let not_ready = |output| GraphError::OutputNotReady {
            node: "Geometry Pass".to_string(),
            output,
        };
        let color = io.output(COLOR_OUTPUT).ok_or_else(|| not_ready(COLOR_OUTPUT))?;
        let depth = io.output(DEPTH_OUTPUT).ok_or_else(|| not_ready(DEPTH_OUTPUT))?;
        let Some(pipeline) = self.pipeline else {
            return Err(GpuError::InvalidHandle("geometry pipeline not created".into()).into());
        };

        let (width, height) = ctx.frame.extent();
        let frustum = self
            .config
            .frustum_culling
            .then(|| Frustum::from_view_projection(&ctx.frame.camera().view_projection));
        let gpu = &mut *ctx.gpu;

        gpu.transition_image(color, ImageLayout::Undefined, ImageLayout::ColorAttachment);
        gpu.transition_image(depth, ImageLayout::Undefined, ImageLayout::DepthAttachment);
        gpu.begin_rendering(&RenderingInfo {
            width,
            height,
            color_attachments: vec![(color, LoadOp::Clear(self.config.clear_color))],
            depth_attachment: Some((depth, 1.0)),
        });
        gpu.set_viewport(width, height);

        gpu.bind_pipeline(pipeline);
        gpu.bind_descriptor_heap(pipeline, ctx.frame.image_heap(), IMAGE_HEAP_SET);
        gpu.bind_descriptor_heap(pipeline, ctx.frame.sampler_heap(), SAMPLER_HEAP_SET);
        gpu.bind_descriptor_set(pipeline, ctx.frame.camera_set(), ctx.frame.camera_binding());

        let mesh_path = self.config.shaders.uses_mesh_shaders();
        let mut visible = 0;
        for draw in &self.draws {
            if let Some(frustum) = &frustum {
                if !draw.is_visible(frustum) {
                    continue;
                }
            }
            visible += 1;

            if let Some(material_set) = draw.material_set {
                gpu.bind_descriptor_set(pipeline, material_set, self.material_binding);
            }
            gpu.bind_descriptor_set(pipeline, draw.geometry_set, self.geometry_binding);
            gpu.push_constants(pipeline, bytemuck::bytes_of(&draw.transform));

            if mesh_path {
                gpu.draw_mesh_tasks(draw.meshlets.len() as u32);
            } else {
                gpu.bind_vertex_buffer(draw.vertex_buffer);
                gpu.bind_index_buffer(draw.index_buffer, IndexFormat::Uint32);
                gpu.draw_indexed(draw.index_count);
            }
        }

        gpu.end_rendering();
        gpu.transition_image(color, ImageLayout::ColorAttachment, ImageLayout::ShaderReadOnly);

        log::trace!("Geometry pass drew {visible} of {} primitives", self.draws.len());
        self.visible_last_frame = visible;
        Ok(())
    }

    fn resize(&mut self, io: &mut NodeIo, ctx: &mut PassContext<'_>) -> GraphResult<()> {
        self.allocate_targets(io, ctx)
    }

    fn free(&mut self, io: &mut NodeIo, ctx: &mut PassContext<'_>) -> GraphResult<()> {
        Self::release_targets(io, ctx.gpu);
        if let Some(pipeline) = self.pipeline.take() {
            ctx.gpu.free_pipeline(pipeline);
        }
        for shader in self.shaders.drain(..) {
            ctx.gpu.free_shader(shader);
        }
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }
}
