//! Common types shared between the GPU facade and its callers

use bytemuck::{Pod, Zeroable};
use glam::{Mat4, Vec2, Vec3};

/// Image format enumeration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ImageFormat {
    Rgba8Unorm,
    Rgba8UnormSrgb,
    Bgra8Unorm,
    Rgba16Float,
    Depth32Float,
}

impl ImageFormat {
    pub fn is_depth(&self) -> bool {
        matches!(self, ImageFormat::Depth32Float)
    }

    pub fn bytes_per_pixel(&self) -> u32 {
        match self {
            ImageFormat::Rgba8Unorm
            | ImageFormat::Rgba8UnormSrgb
            | ImageFormat::Bgra8Unorm
            | ImageFormat::Depth32Float => 4,
            ImageFormat::Rgba16Float => 8,
        }
    }
}

/// Image usage flags
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ImageUsage(u32);

impl ImageUsage {
    pub const TRANSFER_DST: Self = Self(1 << 0);
    pub const SAMPLED: Self = Self(1 << 1);
    pub const STORAGE: Self = Self(1 << 2);
    pub const COLOR_ATTACHMENT: Self = Self(1 << 3);
    pub const DEPTH_ATTACHMENT: Self = Self(1 << 4);

    pub fn contains(&self, other: Self) -> bool {
        (self.0 & other.0) == other.0
    }
}

impl std::ops::BitOr for ImageUsage {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self::Output {
        Self(self.0 | rhs.0)
    }
}

/// Image descriptor used for render targets allocated by graph nodes
#[derive(Debug, Clone)]
pub struct ImageDescriptor {
    pub label: Option<String>,
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub usage: ImageUsage,
}

/// What a buffer is bound as
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BufferKind {
    Vertex,
    Index,
    Uniform,
    Storage,
}

/// Filter mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterMode {
    Nearest,
    Linear,
}

/// Address mode for samplers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AddressMode {
    ClampToEdge,
    Repeat,
    MirrorRepeat,
}

/// Sampler descriptor
#[derive(Debug, Clone)]
pub struct SamplerDescriptor {
    pub filter: FilterMode,
    pub address_mode: AddressMode,
}

impl Default for SamplerDescriptor {
    fn default() -> Self {
        Self {
            filter: FilterMode::Linear,
            address_mode: AddressMode::Repeat,
        }
    }
}

/// Kind of a single descriptor inside a descriptor-set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorKind {
    UniformBuffer,
    StorageBuffer,
    SampledImage,
}

/// Descriptor-set layout: ordered descriptor kinds plus the set slot the layout binds to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DescriptorSetLayoutDesc {
    pub binding: u32,
    pub descriptors: Vec<DescriptorKind>,
}

impl DescriptorSetLayoutDesc {
    pub fn new(binding: u32, descriptors: &[DescriptorKind]) -> Self {
        Self {
            binding,
            descriptors: descriptors.to_vec(),
        }
    }
}

/// Typed write into one binding of a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DescriptorWrite {
    Buffer {
        buffer: super::BufferHandle,
        size: u64,
    },
    StorageBuffer {
        buffer: super::BufferHandle,
        size: u64,
    },
    Image(super::ImageHandle),
}

/// Resource kind held by a bindless descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HeapKind {
    Image,
    Sampler,
}

/// Primitive topology
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PrimitiveTopology {
    PointList,
    LineList,
    LineStrip,
    #[default]
    TriangleList,
    TriangleStrip,
    TriangleFan,
}

/// Front face winding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrontFace {
    CounterClockwise,
    Clockwise,
}

/// Cull mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CullMode {
    None,
    Front,
    Back,
}

/// Polygon rasterization mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolygonMode {
    Fill,
    Line,
}

/// Compare function for depth testing
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompareFunction {
    Never,
    Less,
    LessEqual,
    Greater,
    Always,
}

/// Shader stages feeding a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShaderStages {
    /// Classic vertex + fragment path
    Vertex {
        vertex: super::ShaderHandle,
        fragment: super::ShaderHandle,
    },
    /// Mesh-shading path, the task stage is optional
    Mesh {
        task: Option<super::ShaderHandle>,
        mesh: super::ShaderHandle,
        fragment: super::ShaderHandle,
    },
}

impl ShaderStages {
    pub fn uses_mesh_shaders(&self) -> bool {
        matches!(self, ShaderStages::Mesh { .. })
    }
}

/// Declarative graphics pipeline descriptor
#[derive(Debug, Clone)]
pub struct PipelineDescriptor {
    pub label: Option<String>,
    pub color_formats: Vec<ImageFormat>,
    pub depth_format: Option<ImageFormat>,
    pub depth_compare: CompareFunction,
    pub cull_mode: CullMode,
    pub front_face: FrontFace,
    pub polygon_mode: PolygonMode,
    pub topology: PrimitiveTopology,
    pub shaders: ShaderStages,
    pub set_layouts: Vec<super::DescriptorSetLayoutHandle>,
    pub push_constant_size: u32,
}

/// Image layout used by transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageLayout {
    Undefined,
    ColorAttachment,
    DepthAttachment,
    ShaderReadOnly,
    Present,
}

/// How an attachment is loaded at the start of rendering
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum LoadOp {
    Clear([f32; 4]),
    Load,
}

/// Attachments for a dynamic-rendering begin
#[derive(Debug, Clone)]
pub struct RenderingInfo {
    pub width: u32,
    pub height: u32,
    pub color_attachments: Vec<(super::ImageHandle, LoadOp)>,
    pub depth_attachment: Option<(super::ImageHandle, f32)>,
}

/// Index format
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IndexFormat {
    Uint16,
    Uint32,
}

/// Interleaved vertex consumed by both the vertex and the mesh-shading paths
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, Pod, Zeroable)]
pub struct Vertex {
    pub position: Vec3,
    pub uv: Vec2,
    pub normal: Vec3,
}

impl Vertex {
    pub fn new(position: Vec3, uv: Vec2, normal: Vec3) -> Self {
        Self {
            position,
            uv,
            normal,
        }
    }
}

/// Camera uniform data, uploaded once per frame
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Pod, Zeroable)]
pub struct CameraUniform {
    pub view: Mat4,
    pub projection: Mat4,
    pub view_projection: Mat4,
}

impl CameraUniform {
    pub fn new(view: Mat4, projection: Mat4) -> Self {
        Self {
            view,
            projection,
            view_projection: projection * view,
        }
    }
}

impl Default for CameraUniform {
    fn default() -> Self {
        Self::new(Mat4::IDENTITY, Mat4::IDENTITY)
    }
}
