//! Render graph nodes and their ports

use std::any::Any;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::traits::*;
use crate::render_graph::frame::FrameContext;
use crate::render_graph::{GraphError, GraphResult};

/// Shared handle to a node. The caller owns nodes; the graph and input ports only hold weak links.
pub type NodeRef = Arc<Mutex<RenderGraphNode>>;

/// Which side of a node a port sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PortDirection {
    Input,
    Output,
}

/// Identifies one port of a node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PortId {
    pub direction: PortDirection,
    pub index: u32,
}

impl PortId {
    pub const fn input(index: u32) -> Self {
        Self {
            direction: PortDirection::Input,
            index,
        }
    }

    pub const fn output(index: u32) -> Self {
        Self {
            direction: PortDirection::Output,
            index,
        }
    }

    pub fn is_input(&self) -> bool {
        self.direction == PortDirection::Input
    }

    pub fn is_output(&self) -> bool {
        self.direction == PortDirection::Output
    }
}

/// A named image a node produces. `image` is `None` until the node allocates it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeOutput {
    pub name: String,
    pub image: Option<ImageHandle>,
}

#[derive(Debug, Clone)]
struct InputBinding {
    owner: Weak<Mutex<RenderGraphNode>>,
    output: u32,
}

/// Declared outputs and input bindings of a node
#[derive(Debug)]
pub struct NodeIo {
    outputs: Vec<NodeOutput>,
    inputs: Vec<Option<InputBinding>>,
    bound_inputs: u32,
}

impl NodeIo {
    fn new(outputs: &[&str], input_count: u32) -> Self {
        Self {
            outputs: outputs
                .iter()
                .map(|name| NodeOutput {
                    name: name.to_string(),
                    image: None,
                })
                .collect(),
            inputs: vec![None; input_count as usize],
            bound_inputs: 0,
        }
    }

    pub fn outputs(&self) -> &[NodeOutput] {
        &self.outputs
    }

    pub fn output_count(&self) -> u32 {
        self.outputs.len() as u32
    }

    pub fn input_count(&self) -> u32 {
        self.inputs.len() as u32
    }

    pub fn bound_input_count(&self) -> u32 {
        self.bound_inputs
    }

    pub fn is_input_bound(&self, index: u32) -> bool {
        matches!(self.inputs.get(index as usize), Some(Some(_)))
    }

    /// Image currently published on an output port
    pub fn output(&self, index: u32) -> Option<ImageHandle> {
        self.outputs.get(index as usize).and_then(|o| o.image)
    }

    /// Publish an image on an output port, returning the previous one
    pub fn set_output(&mut self, index: u32, image: ImageHandle) -> Option<ImageHandle> {
        self.outputs
            .get_mut(index as usize)
            .and_then(|o| o.image.replace(image))
    }

    /// Withdraw the image published on an output port
    pub fn take_output(&mut self, index: u32) -> Option<ImageHandle> {
        self.outputs.get_mut(index as usize).and_then(|o| o.image.take())
    }

    /// Resource produced by the node bound to input `index`.
    ///
    /// Reads the owner's current output, so a consumer sees the producer's
    /// image after a resize without re-binding.
    pub fn input_resource(&self, index: u32) -> GraphResult<ImageHandle> {
        let binding = self
            .inputs
            .get(index as usize)
            .ok_or(GraphError::NoSuchInput {
                input: index,
                count: self.input_count(),
            })?
            .as_ref()
            .ok_or(GraphError::UnboundInput { input: index })?;

        let owner = binding
            .owner
            .upgrade()
            .ok_or(GraphError::OwnerReleased { input: index })?;
        let owner = owner.lock();
        let image = owner.io.output(binding.output).ok_or_else(|| GraphError::OutputNotReady {
            node: owner.name().to_string(),
            output: binding.output,
        });
        image
    }

    pub(crate) fn bind_input(&mut self, index: u32, owner: &NodeRef, output: u32) {
        let slot = &mut self.inputs[index as usize];
        if slot.is_none() {
            self.bound_inputs += 1;
        }
        *slot = Some(InputBinding {
            owner: Arc::downgrade(owner),
            output,
        });
    }

    /// Owners of every bound input, in port order
    pub(crate) fn input_owners(&self) -> GraphResult<Vec<NodeRef>> {
        self.inputs
            .iter()
            .enumerate()
            .filter_map(|(index, binding)| binding.as_ref().map(|b| (index, b)))
            .map(|(index, binding)| {
                binding.owner.upgrade().ok_or(GraphError::OwnerReleased {
                    input: index as u32,
                })
            })
            .collect()
    }
}

/// What a node sees while one of its capabilities runs
pub struct PassContext<'a> {
    pub gpu: &'a mut dyn GpuDevice,
    pub frame: &'a mut FrameContext,
}

/// A unit of per-frame GPU work.
///
/// `init` runs once when the node is first baked into a graph, after every node
/// it depends on has been initialised. `update` runs every frame, `resize` when
/// the frame extent changes and `free` when the graph is torn down.
pub trait RenderNode: Send {
    /// Get the node name for debugging
    fn name(&self) -> &str;

    fn init(&mut self, io: &mut NodeIo, ctx: &mut PassContext<'_>) -> GraphResult<()>;

    fn update(&mut self, io: &mut NodeIo, ctx: &mut PassContext<'_>) -> GraphResult<()>;

    fn resize(&mut self, io: &mut NodeIo, ctx: &mut PassContext<'_>) -> GraphResult<()>;

    fn free(&mut self, io: &mut NodeIo, ctx: &mut PassContext<'_>) -> GraphResult<()>;

    /// Allow downcasting
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
}

/// A node as stored in the graph: the work unit plus its ports
pub struct RenderGraphNode {
    pass: Box<dyn RenderNode>,
    pub(crate) io: NodeIo,
}

impl std::fmt::Debug for RenderGraphNode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderGraphNode")
            .field("name", &self.pass.name())
            .field("io", &self.io)
            .finish()
    }
}

impl RenderGraphNode {
    /// Wrap a work unit with named outputs and `input_count` unbound inputs
    pub fn new<N: RenderNode + 'static>(pass: N, outputs: &[&str], input_count: u32) -> NodeRef {
        Arc::new(Mutex::new(Self {
            pass: Box::new(pass),
            io: NodeIo::new(outputs, input_count),
        }))
    }

    pub fn name(&self) -> &str {
        self.pass.name()
    }

    pub fn io(&self) -> &NodeIo {
        &self.io
    }

    /// Get the work unit as its concrete type
    pub fn pass<N: RenderNode + 'static>(&self) -> Option<&N> {
        self.pass.as_any().downcast_ref::<N>()
    }

    pub fn pass_mut<N: RenderNode + 'static>(&mut self) -> Option<&mut N> {
        self.pass.as_any_mut().downcast_mut::<N>()
    }

    pub(crate) fn init(&mut self, ctx: &mut PassContext<'_>) -> GraphResult<()> {
        self.pass.init(&mut self.io, ctx)
    }

    pub(crate) fn update(&mut self, ctx: &mut PassContext<'_>) -> GraphResult<()> {
        self.pass.update(&mut self.io, ctx)
    }

    pub(crate) fn resize(&mut self, ctx: &mut PassContext<'_>) -> GraphResult<()> {
        self.pass.resize(&mut self.io, ctx)
    }

    pub(crate) fn free(&mut self, ctx: &mut PassContext<'_>) -> GraphResult<()> {
        self.pass.free(&mut self.io, ctx)
    }
}
