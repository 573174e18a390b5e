//! Dummy GPU device for testing and development.
//!
//! This device doesn't perform actual GPU operations but provides a valid
//! implementation of [`GpuDevice`] for exercising the render graph and the mesh
//! loader without GPU hardware. Every resource is tracked and every recorded
//! command is kept so tests can inspect what the renderer asked for.

use std::collections::HashMap;

use crate::backend::traits::*;
use crate::backend::types::*;
use crate::resources::RawImage;

/// Buffer tracked by the dummy device
#[derive(Debug, Clone)]
pub struct DummyBuffer {
    pub size: u64,
    pub kind: BufferKind,
    pub data: Vec<u8>,
}

/// Image tracked by the dummy device
#[derive(Debug, Clone)]
pub struct DummyImage {
    pub width: u32,
    pub height: u32,
    pub format: ImageFormat,
    pub mip_levels: u32,
}

/// Bindless heap tracked by the dummy device
#[derive(Debug, Clone)]
pub struct DummyHeap {
    pub kind: HeapKind,
    pub slots: Vec<Option<u64>>,
}

/// A recorded command
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    TransitionImage {
        image: ImageHandle,
        from: ImageLayout,
        to: ImageLayout,
    },
    BeginRendering {
        width: u32,
        height: u32,
        color_attachments: usize,
        depth: bool,
    },
    EndRendering,
    SetViewport {
        width: u32,
        height: u32,
    },
    BindPipeline(PipelineHandle),
    BindDescriptorHeap {
        heap: DescriptorHeapHandle,
        set: u32,
    },
    BindDescriptorSet {
        descriptor_set: DescriptorSetHandle,
        set: u32,
    },
    PushConstants(usize),
    BindVertexBuffer(BufferHandle),
    BindIndexBuffer(BufferHandle),
    DrawIndexed(u32),
    DrawMeshTasks(u32),
}

/// Dummy GPU device.
#[derive(Debug, Default)]
pub struct DummyDevice {
    next_handle: u64,
    buffers: HashMap<u64, DummyBuffer>,
    images: HashMap<u64, DummyImage>,
    samplers: HashMap<u64, (SamplerDescriptor, u32)>,
    layouts: HashMap<u64, DescriptorSetLayoutDesc>,
    sets: HashMap<u64, (DescriptorSetLayoutHandle, HashMap<u32, DescriptorWrite>)>,
    heaps: HashMap<u64, DummyHeap>,
    shaders: HashMap<u64, String>,
    pipelines: HashMap<u64, PipelineDescriptor>,
    commands: Vec<Command>,
    buffer_limit: Option<usize>,
}

impl DummyDevice {
    /// Create a new dummy device.
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&mut self) -> u64 {
        self.next_handle += 1;
        self.next_handle
    }

    pub fn buffer(&self, buffer: BufferHandle) -> Option<&DummyBuffer> {
        self.buffers.get(&buffer.0)
    }

    pub fn image(&self, image: ImageHandle) -> Option<&DummyImage> {
        self.images.get(&image.0)
    }

    pub fn heap(&self, heap: DescriptorHeapHandle) -> Option<&DummyHeap> {
        self.heaps.get(&heap.0)
    }

    pub fn layout(&self, layout: DescriptorSetLayoutHandle) -> Option<&DescriptorSetLayoutDesc> {
        self.layouts.get(&layout.0)
    }

    pub fn pipeline(&self, pipeline: PipelineHandle) -> Option<&PipelineDescriptor> {
        self.pipelines.get(&pipeline.0)
    }

    /// Layout a descriptor set was created from and its current writes
    pub fn descriptor_set(
        &self,
        set: DescriptorSetHandle,
    ) -> Option<(DescriptorSetLayoutHandle, &HashMap<u32, DescriptorWrite>)> {
        self.sets.get(&set.0).map(|(layout, writes)| (*layout, writes))
    }

    /// Fail buffer allocations with `OutOfMemory` once `max_live` buffers exist
    pub fn limit_buffers(&mut self, max_live: usize) {
        self.buffer_limit = Some(max_live);
    }

    pub fn live_buffer_count(&self) -> usize {
        self.buffers.len()
    }

    pub fn live_image_count(&self) -> usize {
        self.images.len()
    }

    pub fn live_sampler_count(&self) -> usize {
        self.samplers.len()
    }

    pub fn live_descriptor_set_count(&self) -> usize {
        self.sets.len()
    }

    pub fn live_layout_count(&self) -> usize {
        self.layouts.len()
    }

    pub fn live_heap_count(&self) -> usize {
        self.heaps.len()
    }

    /// Total number of live GPU objects of any kind
    pub fn live_object_count(&self) -> usize {
        self.buffers.len()
            + self.images.len()
            + self.samplers.len()
            + self.layouts.len()
            + self.sets.len()
            + self.heaps.len()
            + self.shaders.len()
            + self.pipelines.len()
    }

    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Drop recorded commands, as a real device would on frame submission
    pub fn clear_commands(&mut self) {
        self.commands.clear();
    }
}

impl GpuDevice for DummyDevice {
    fn allocate_buffer(&mut self, size: u64, kind: BufferKind) -> GpuResult<BufferHandle> {
        if self.buffer_limit.is_some_and(|limit| self.buffers.len() >= limit) {
            log::trace!("DummyDevice: buffer limit reached, refusing {} bytes", size);
            return Err(GpuError::OutOfMemory);
        }
        let id = self.next_id();
        log::trace!("DummyDevice: allocating {:?} buffer {} ({} bytes)", kind, id, size);
        self.buffers.insert(
            id,
            DummyBuffer {
                size,
                kind,
                data: Vec::new(),
            },
        );
        Ok(BufferHandle(id))
    }

    fn upload_buffer(&mut self, buffer: BufferHandle, data: &[u8]) {
        match self.buffers.get_mut(&buffer.0) {
            Some(target) => {
                debug_assert!(data.len() as u64 <= target.size, "upload overflows buffer");
                target.data = data.to_vec();
            }
            None => log::warn!("DummyDevice: upload to unknown buffer {:?}", buffer),
        }
    }

    fn free_buffer(&mut self, buffer: BufferHandle) {
        if self.buffers.remove(&buffer.0).is_none() {
            log::warn!("DummyDevice: double free of buffer {:?}", buffer);
        }
    }

    fn allocate_image(&mut self, desc: &ImageDescriptor) -> GpuResult<ImageHandle> {
        if desc.width == 0 || desc.height == 0 {
            return Err(GpuError::ImageAllocationFailed(format!(
                "zero-sized image {:?}",
                desc.label
            )));
        }
        let id = self.next_id();
        log::trace!(
            "DummyDevice: allocating image {:?} ({}x{})",
            desc.label,
            desc.width,
            desc.height
        );
        self.images.insert(
            id,
            DummyImage {
                width: desc.width,
                height: desc.height,
                format: desc.format,
                mip_levels: 1,
            },
        );
        Ok(ImageHandle(id))
    }

    fn upload_image(&mut self, image: &RawImage, generate_mips: bool) -> GpuResult<ImageHandle> {
        let mip_levels = if generate_mips {
            32 - image.width.max(image.height).max(1).leading_zeros()
        } else {
            1
        };
        let id = self.next_id();
        log::trace!(
            "DummyDevice: uploading image {} ({}x{}, {} mips)",
            image.name,
            image.width,
            image.height,
            mip_levels
        );
        self.images.insert(
            id,
            DummyImage {
                width: image.width,
                height: image.height,
                format: image.format,
                mip_levels,
            },
        );
        Ok(ImageHandle(id))
    }

    fn image_mip_levels(&self, image: ImageHandle) -> u32 {
        self.images.get(&image.0).map_or(1, |i| i.mip_levels)
    }

    fn free_image(&mut self, image: ImageHandle) {
        if self.images.remove(&image.0).is_none() {
            log::warn!("DummyDevice: double free of image {:?}", image);
        }
    }

    fn create_sampler(
        &mut self,
        desc: &SamplerDescriptor,
        mip_levels: u32,
    ) -> GpuResult<SamplerHandle> {
        let id = self.next_id();
        self.samplers.insert(id, (desc.clone(), mip_levels));
        Ok(SamplerHandle(id))
    }

    fn free_sampler(&mut self, sampler: SamplerHandle) {
        self.samplers.remove(&sampler.0);
    }

    fn create_descriptor_set_layout(
        &mut self,
        desc: &DescriptorSetLayoutDesc,
    ) -> GpuResult<DescriptorSetLayoutHandle> {
        let id = self.next_id();
        self.layouts.insert(id, desc.clone());
        Ok(DescriptorSetLayoutHandle(id))
    }

    fn free_descriptor_set_layout(&mut self, layout: DescriptorSetLayoutHandle) {
        self.layouts.remove(&layout.0);
    }

    fn create_descriptor_set(
        &mut self,
        layout: DescriptorSetLayoutHandle,
    ) -> GpuResult<DescriptorSetHandle> {
        if !self.layouts.contains_key(&layout.0) {
            return Err(GpuError::InvalidHandle(format!("{:?}", layout)));
        }
        let id = self.next_id();
        self.sets.insert(id, (layout, HashMap::new()));
        Ok(DescriptorSetHandle(id))
    }

    fn write_descriptor_set(&mut self, set: DescriptorSetHandle, binding: u32, write: DescriptorWrite) {
        if let Some((_, writes)) = self.sets.get_mut(&set.0) {
            writes.insert(binding, write);
        }
    }

    fn free_descriptor_set(&mut self, set: DescriptorSetHandle) {
        self.sets.remove(&set.0);
    }

    fn create_descriptor_heap(
        &mut self,
        kind: HeapKind,
        capacity: u32,
    ) -> GpuResult<DescriptorHeapHandle> {
        let id = self.next_id();
        self.heaps.insert(
            id,
            DummyHeap {
                kind,
                slots: vec![None; capacity as usize],
            },
        );
        Ok(DescriptorHeapHandle(id))
    }

    fn find_available_descriptor(&mut self, heap: DescriptorHeapHandle) -> GpuResult<u32> {
        let slots = &self
            .heaps
            .get(&heap.0)
            .ok_or_else(|| GpuError::InvalidHandle(format!("{:?}", heap)))?
            .slots;
        slots
            .iter()
            .position(Option::is_none)
            .map(|slot| slot as u32)
            .ok_or(GpuError::HeapFull(heap))
    }

    fn push_heap_image(&mut self, heap: DescriptorHeapHandle, image: ImageHandle, slot: u32) {
        if let Some(entry) = self
            .heaps
            .get_mut(&heap.0)
            .and_then(|h| h.slots.get_mut(slot as usize))
        {
            *entry = Some(image.0);
        }
    }

    fn push_heap_sampler(&mut self, heap: DescriptorHeapHandle, sampler: SamplerHandle, slot: u32) {
        if let Some(entry) = self
            .heaps
            .get_mut(&heap.0)
            .and_then(|h| h.slots.get_mut(slot as usize))
        {
            *entry = Some(sampler.0);
        }
    }

    fn free_descriptor_heap(&mut self, heap: DescriptorHeapHandle) {
        self.heaps.remove(&heap.0);
    }

    fn load_shader(&mut self, path: &str) -> GpuResult<ShaderHandle> {
        let id = self.next_id();
        self.shaders.insert(id, path.to_string());
        Ok(ShaderHandle(id))
    }

    fn free_shader(&mut self, shader: ShaderHandle) {
        self.shaders.remove(&shader.0);
    }

    fn create_graphics_pipeline(
        &mut self,
        desc: &PipelineDescriptor,
    ) -> GpuResult<PipelineHandle> {
        if desc.color_formats.is_empty() && desc.depth_format.is_none() {
            return Err(GpuError::PipelineCreationFailed(
                "pipeline has no attachments".into(),
            ));
        }
        let id = self.next_id();
        self.pipelines.insert(id, desc.clone());
        Ok(PipelineHandle(id))
    }

    fn free_pipeline(&mut self, pipeline: PipelineHandle) {
        self.pipelines.remove(&pipeline.0);
    }

    fn transition_image(&mut self, image: ImageHandle, from: ImageLayout, to: ImageLayout) {
        self.commands
            .push(Command::TransitionImage { image, from, to });
    }

    fn begin_rendering(&mut self, info: &RenderingInfo) {
        self.commands.push(Command::BeginRendering {
            width: info.width,
            height: info.height,
            color_attachments: info.color_attachments.len(),
            depth: info.depth_attachment.is_some(),
        });
    }

    fn end_rendering(&mut self) {
        self.commands.push(Command::EndRendering);
    }

    fn set_viewport(&mut self, width: u32, height: u32) {
        self.commands.push(Command::SetViewport { width, height });
    }

    fn bind_pipeline(&mut self, pipeline: PipelineHandle) {
        self.commands.push(Command::BindPipeline(pipeline));
    }

    fn bind_descriptor_heap(&mut self, _pipeline: PipelineHandle, heap: DescriptorHeapHandle, set: u32) {
        self.commands.push(Command::BindDescriptorHeap { heap, set });
    }

    fn bind_descriptor_set(
        &mut self,
        _pipeline: PipelineHandle,
        descriptor_set: DescriptorSetHandle,
        set: u32,
    ) {
        self.commands
            .push(Command::BindDescriptorSet { descriptor_set, set });
    }

    fn push_constants(&mut self, _pipeline: PipelineHandle, data: &[u8]) {
        self.commands.push(Command::PushConstants(data.len()));
    }

    fn bind_vertex_buffer(&mut self, buffer: BufferHandle) {
        self.commands.push(Command::BindVertexBuffer(buffer));
    }

    fn bind_index_buffer(&mut self, buffer: BufferHandle, _format: IndexFormat) {
        self.commands.push(Command::BindIndexBuffer(buffer));
    }

    fn draw_indexed(&mut self, index_count: u32) {
        self.commands.push(Command::DrawIndexed(index_count));
    }

    fn draw_mesh_tasks(&mut self, group_count: u32) {
        self.commands.push(Command::DrawMeshTasks(group_count));
    }
}
