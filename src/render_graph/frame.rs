//! Per-frame state shared by every node of a graph

use crate::backend::{
    BufferHandle, BufferKind, CameraUniform, DescriptorHeapHandle, DescriptorKind,
    DescriptorSetHandle, DescriptorSetLayoutDesc, DescriptorSetLayoutHandle, DescriptorWrite,
    GpuDevice, GpuResult, HeapKind,
};
use crate::scene::CameraSource;
use crate::GraphConfig;

/// Shared per-frame resources: camera uniform, bindless heaps and the current extent.
///
/// Owned by the [`RenderGraph`](super::RenderGraph); nodes read and write it
/// through their [`PassContext`](super::PassContext).
#[derive(Debug)]
pub struct FrameContext {
    width: u32,
    height: u32,
    frame_index: u64,
    camera: CameraUniform,
    camera_buffer: BufferHandle,
    camera_layout: DescriptorSetLayoutHandle,
    camera_set: DescriptorSetHandle,
    camera_binding: u32,
    image_heap: DescriptorHeapHandle,
    sampler_heap: DescriptorHeapHandle,
}

impl FrameContext {
    pub fn new(
        gpu: &mut dyn GpuDevice,
        config: &GraphConfig,
        width: u32,
        height: u32,
    ) -> GpuResult<Self> {
        let image_heap = gpu.create_descriptor_heap(HeapKind::Image, config.image_heap_capacity)?;
        let sampler_heap =
            gpu.create_descriptor_heap(HeapKind::Sampler, config.sampler_heap_capacity)?;

        let camera_layout = gpu.create_descriptor_set_layout(&DescriptorSetLayoutDesc::new(
            config.camera_set_binding,
            &[DescriptorKind::UniformBuffer],
        ))?;

        let size = std::mem::size_of::<CameraUniform>() as u64;
        let camera_buffer = gpu.allocate_buffer(size, BufferKind::Uniform)?;
        let camera_set = gpu.create_descriptor_set(camera_layout)?;
        gpu.write_descriptor_set(
            camera_set,
            0,
            DescriptorWrite::Buffer {
                buffer: camera_buffer,
                size,
            },
        );

        log::debug!(
            "Frame context created: {width}x{height}, {} image / {} sampler slots",
            config.image_heap_capacity,
            config.sampler_heap_capacity
        );

        Ok(Self {
            width,
            height,
            frame_index: 0,
            camera: CameraUniform::default(),
            camera_buffer,
            camera_layout,
            camera_set,
            camera_binding: config.camera_set_binding,
            image_heap,
            sampler_heap,
        })
    }

    /// Take the collaborator's matrices for the next uploaded frame
    pub fn set_camera(&mut self, camera: &dyn CameraSource) {
        self.camera = CameraUniform::new(camera.view_matrix(), camera.projection_matrix());
    }

    pub fn camera(&self) -> &CameraUniform {
        &self.camera
    }

    pub fn extent(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Number of frames uploaded so far
    pub fn frame_index(&self) -> u64 {
        self.frame_index
    }

    pub fn image_heap(&self) -> DescriptorHeapHandle {
        self.image_heap
    }

    pub fn sampler_heap(&self) -> DescriptorHeapHandle {
        self.sampler_heap
    }

    pub fn camera_buffer(&self) -> BufferHandle {
        self.camera_buffer
    }

    pub fn camera_layout(&self) -> DescriptorSetLayoutHandle {
        self.camera_layout
    }

    pub fn camera_set(&self) -> DescriptorSetHandle {
        self.camera_set
    }

    /// Set index the camera set is bound at
    pub fn camera_binding(&self) -> u32 {
        self.camera_binding
    }

    pub(crate) fn set_extent(&mut self, width: u32, height: u32) {
        self.width = width;
        self.height = height;
    }

    pub(crate) fn upload_camera(&mut self, gpu: &mut dyn GpuDevice) {
        gpu.upload_buffer(self.camera_buffer, bytemuck::bytes_of(&self.camera));
        self.frame_index += 1;
    }

    /// Release the camera objects and both heaps
    pub fn free(self, gpu: &mut dyn GpuDevice) {
        gpu.free_buffer(self.camera_buffer);
        gpu.free_descriptor_set(self.camera_set);
        gpu.free_descriptor_set_layout(self.camera_layout);
        gpu.free_descriptor_heap(self.sampler_heap);
        gpu.free_descriptor_heap(self.image_heap);
    }
}
