//! Core GPU facade trait
//!
//! The renderer core never talks to a graphics API directly. Everything it needs
//! (buffers, images, samplers, descriptor sets, bindless heaps, pipelines and
//! command recording) goes through [`GpuDevice`].

use crate::backend::types::*;
use crate::resources::RawImage;
use thiserror::Error;

/// GPU facade error type
#[derive(Error, Debug)]
pub enum GpuError {
    #[error("Failed to allocate buffer: {0}")]
    BufferAllocationFailed(String),
    #[error("Failed to allocate image: {0}")]
    ImageAllocationFailed(String),
    #[error("Failed to create sampler: {0}")]
    SamplerCreationFailed(String),
    #[error("Failed to load shader {path}: {reason}")]
    ShaderLoadFailed { path: String, reason: String },
    #[error("Failed to create pipeline: {0}")]
    PipelineCreationFailed(String),
    #[error("Descriptor heap {0:?} has no free slot")]
    HeapFull(DescriptorHeapHandle),
    #[error("Invalid handle: {0}")]
    InvalidHandle(String),
    #[error("Out of memory")]
    OutOfMemory,
    #[error("Device lost")]
    DeviceLost,
}

pub type GpuResult<T> = Result<T, GpuError>;

/// Handle to a GPU buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BufferHandle(pub(crate) u64);

/// Handle to a GPU image
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ImageHandle(pub(crate) u64);

/// Handle to a sampler
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplerHandle(pub(crate) u64);

/// Handle to a descriptor-set layout
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetLayoutHandle(pub(crate) u64);

/// Handle to a descriptor set
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorSetHandle(pub(crate) u64);

/// Handle to a bindless descriptor heap
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DescriptorHeapHandle(pub(crate) u64);

/// Handle to a shader module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ShaderHandle(pub(crate) u64);

/// Handle to a graphics pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PipelineHandle(pub(crate) u64);

/// Main GPU facade trait.
///
/// Object safe, so graph nodes can receive `&mut dyn GpuDevice`. Command
/// recording methods append to the command buffer of the frame in flight.
pub trait GpuDevice {
    // Buffers

    /// Allocate a buffer of `size` bytes
    fn allocate_buffer(&mut self, size: u64, kind: BufferKind) -> GpuResult<BufferHandle>;

    /// Upload `data` to the start of a buffer
    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]);

    /// Free a buffer
    fn free_buffer(&mut self, buffer: BufferHandle);

    // Images and samplers

    /// Allocate an image without initial contents
    fn allocate_image(&mut self, desc: &ImageDescriptor) -> GpuResult<ImageHandle>;

    /// Create a sampled image from decoded pixels
    fn upload_image(&mut self, image: &RawImage, generate_mips: bool) -> GpuResult<ImageHandle>;

    /// Number of mip levels of an image
    fn image_mip_levels(&self, image: ImageHandle) -> u32;

    /// Free an image
    fn free_image(&mut self, image: ImageHandle);

    /// Create a sampler covering `mip_levels` levels
    fn create_sampler(
        &mut self,
        desc: &SamplerDescriptor,
        mip_levels: u32,
    ) -> GpuResult<SamplerHandle>;

    /// Free a sampler
    fn free_sampler(&mut self, sampler: SamplerHandle);

    // Descriptor sets

    /// Create a descriptor-set layout
    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDesc,
    ) -> GpuResult<DescriptorSetLayoutHandle>;

    /// Free a descriptor-set layout
    fn free_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle);

    /// Create a descriptor set bound to `layout`
    fn create_descriptor_set(
        &mut self,
        layout: DescriptorSetLayoutHandle,
    ) -> GpuResult<DescriptorSetHandle>;

    /// Write one binding of a descriptor set
    fn write_descriptor_set(&mut self, set: DescriptorSetHandle, binding: u32, write: DescriptorWrite);

    /// Free a descriptor set
    fn free_descriptor_set(&mut self, set: DescriptorSetHandle);

    // Bindless heaps

    /// Create a bindless descriptor heap with `capacity` slots
    fn create_descriptor_heap(
        &mut self,
        kind: HeapKind,
        capacity: u32,
    ) -> GpuResult<DescriptorHeapHandle>;

    /// Find a free slot in a heap
    fn find_available_descriptor(&mut self, heap: DescriptorHeapHandle) -> GpuResult<u32>;

    /// Store an image in a heap slot
    fn push_heap_image(&mut self, heap: DescriptorHeapHandle, image: ImageHandle, slot: u32);

    /// Store a sampler in a heap slot
    fn push_heap_sampler(&mut self, heap: DescriptorHeapHandle, sampler: SamplerHandle, slot: u32);

    /// Free a heap
    fn free_descriptor_heap(&mut self, heap: DescriptorHeapHandle);

    // Pipelines

    /// Load a compiled shader module
    fn load_shader(&mut self, path: &str) -> GpuResult<ShaderHandle>;

    /// Free a shader module
    fn free_shader(&mut self, shader: ShaderHandle);

    /// Create a graphics pipeline
    fn create_graphics_pipeline(&mut self, desc: &PipelineDescriptor)
        -> GpuResult<PipelineHandle>;

    /// Free a pipeline
    fn free_pipeline(&mut self, pipeline: PipelineHandle);

    // Command recording

    /// Transition an image between layouts
    fn transition_image(&mut self, image: ImageHandle, from: ImageLayout, to: ImageLayout);

    /// Begin dynamic rendering
    fn begin_rendering(&mut self, info: &RenderingInfo);

    /// End dynamic rendering
    fn end_rendering(&mut self);

    /// Set the viewport
    fn set_viewport(&mut self, width: u32, height: u32);

    /// Bind a graphics pipeline
    fn bind_pipeline(&mut self, pipeline: PipelineHandle);

    /// Bind a bindless heap at set index `set`
    fn bind_descriptor_heap(&mut self, pipeline: PipelineHandle, heap: DescriptorHeapHandle, set: u32);

    /// Bind a descriptor set at set index `set`
    fn bind_descriptor_set(
        &mut self,
        pipeline: PipelineHandle,
        descriptor_set: DescriptorSetHandle,
        set: u32,
    );

    /// Push constant data
    fn push_constants(&mut self, pipeline: PipelineHandle, data: &[u8]);

    /// Bind a vertex buffer
    fn bind_vertex_buffer(&mut self, buffer: BufferHandle);

    /// Bind an index buffer
    fn bind_index_buffer(&mut self, buffer: BufferHandle, format: IndexFormat);

    /// Draw indexed primitives
    fn draw_indexed(&mut self, index_count: u32);

    /// Dispatch mesh-shading task groups
    fn draw_mesh_tasks(&mut self, group_count: u32);
}
