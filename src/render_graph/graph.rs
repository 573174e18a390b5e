//! Render graph baking and per-frame driving

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;

use crate::backend::{GpuDevice, GpuResult};
use crate::render_graph::frame::FrameContext;
use crate::render_graph::node::*;
use crate::render_graph::{GraphError, GraphResult};
use crate::GraphConfig;

/// Bind input port `dst_port` of `dst` to output port `src_port` of `src`.
///
/// Rebinding an already bound input replaces the previous binding.
///
/// # Panics
///
/// Panics when `src_port` is not an output, `dst_port` is not an input, either
/// index is out of range, or `src` and `dst` are the same node.
pub fn connect(src: &NodeRef, src_port: PortId, dst: &NodeRef, dst_port: PortId) {
    assert!(src_port.is_output(), "source port {src_port:?} is not an output");
    assert!(dst_port.is_input(), "destination port {dst_port:?} is not an input");
    assert!(!Arc::ptr_eq(src, dst), "a node cannot consume its own output");

    let src_name = {
        let src = src.lock();
        assert!(
            src_port.index < src.io().output_count(),
            "node {} has no output {}",
            src.name(),
            src_port.index
        );
        src.name().to_string()
    };

    let mut dst_node = dst.lock();
    assert!(
        dst_port.index < dst_node.io().input_count(),
        "node {} has no input {}",
        dst_node.name(),
        dst_port.index
    );
    log::trace!(
        "Connecting {}:{} -> {}:{}",
        src_name,
        src_port.index,
        dst_node.name(),
        dst_port.index
    );
    dst_node.io.bind_input(dst_port.index, src, src_port.index);
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Visit {
    InProgress,
    Done,
}

/// Dependencies-first order of every node reachable from `terminal`.
///
/// Iterative post-order walk along input bindings, expanding the last input
/// first. Each node lands at its last occurrence in the pre-order walk, so the
/// result equals that walk reversed with duplicates dropped. Reaching a node
/// that is still being expanded means the bindings form a cycle.
fn dependency_order(terminal: &NodeRef) -> GraphResult<Vec<NodeRef>> {
    let mut visits: HashMap<*const Mutex<RenderGraphNode>, Visit> = HashMap::new();
    let mut order = Vec::new();
    let mut stack = vec![(terminal.clone(), false)];

    while let Some((node, expanded)) = stack.pop() {
        let key = Arc::as_ptr(&node);

        if expanded {
            visits.insert(key, Visit::Done);
            order.push(node);
            continue;
        }

        match visits.get(&key) {
            Some(Visit::Done) => continue,
            Some(Visit::InProgress) => return Err(cycle_at(&node)),
            None => {}
        }

        visits.insert(key, Visit::InProgress);
        let owners = node.lock().io.input_owners()?;
        stack.push((node, true));

        // Pushed in port order so the last input is expanded first
        for owner in owners {
            match visits.get(&Arc::as_ptr(&owner)) {
                Some(Visit::Done) => {}
                Some(Visit::InProgress) => return Err(cycle_at(&owner)),
                None => stack.push((owner, false)),
            }
        }
    }

    Ok(order)
}

fn cycle_at(node: &NodeRef) -> GraphError {
    GraphError::Cycle {
        node: node.lock().name().to_string(),
    }
}

/// An ordered sequence of nodes plus the frame state they share.
///
/// The graph holds weak references: callers keep their [`NodeRef`]s alive for
/// as long as the graph runs.
pub struct RenderGraph {
    nodes: Vec<Weak<Mutex<RenderGraphNode>>>,
    frame: FrameContext,
}

impl RenderGraph {
    /// Create an empty graph and its frame context
    pub fn new(
        gpu: &mut dyn GpuDevice,
        config: &GraphConfig,
        width: u32,
        height: u32,
    ) -> GpuResult<Self> {
        Ok(Self {
            nodes: Vec::new(),
            frame: FrameContext::new(gpu, config, width, height)?,
        })
    }

    pub fn frame(&self) -> &FrameContext {
        &self.frame
    }

    pub fn frame_mut(&mut self) -> &mut FrameContext {
        &mut self.frame
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Whether `node` has been baked into this graph
    pub fn contains(&self, node: &NodeRef) -> bool {
        self.nodes
            .iter()
            .any(|baked| std::ptr::eq(baked.as_ptr(), Arc::as_ptr(node)))
    }

    /// Names of the baked nodes, in execution order
    pub fn node_names(&self) -> Vec<String> {
        self.nodes
            .iter()
            .filter_map(Weak::upgrade)
            .map(|node| node.lock().name().to_string())
            .collect()
    }

    /// Append every node `terminal` depends on, then `terminal` itself, and
    /// initialise the newly appended ones in that order.
    ///
    /// Nodes already baked by an earlier call keep their position and are not
    /// initialised again.
    pub fn bake(&mut self, gpu: &mut dyn GpuDevice, terminal: &NodeRef) -> GraphResult<()> {
        let order = dependency_order(terminal)?;
        let appended: Vec<_> = order.into_iter().filter(|node| !self.contains(node)).collect();

        let mut ctx = PassContext {
            gpu,
            frame: &mut self.frame,
        };
        for node in &appended {
            {
                let mut node = node.lock();
                log::debug!("Initialising node {}", node.name());
                node.init(&mut ctx)?;
            }
            // Only initialised nodes join the graph
            self.nodes.push(Arc::downgrade(node));
        }

        log::info!(
            "Baked render graph: {} new nodes, {} total",
            appended.len(),
            self.nodes.len()
        );
        Ok(())
    }

    /// Upload the camera, then update every node in baked order
    pub fn update(&mut self, gpu: &mut dyn GpuDevice) -> GraphResult<()> {
        self.frame.upload_camera(gpu);

        let nodes = self.live_nodes()?;
        let mut ctx = PassContext {
            gpu,
            frame: &mut self.frame,
        };
        for node in &nodes {
            node.lock().update(&mut ctx)?;
        }
        Ok(())
    }

    /// Record the new extent, then resize every node in baked order
    pub fn resize(&mut self, gpu: &mut dyn GpuDevice, width: u32, height: u32) -> GraphResult<()> {
        log::debug!("Resizing render graph to {width}x{height}");
        self.frame.set_extent(width, height);

        let nodes = self.live_nodes()?;
        let mut ctx = PassContext {
            gpu,
            frame: &mut self.frame,
        };
        for node in &nodes {
            node.lock().resize(&mut ctx)?;
        }
        Ok(())
    }

    /// Free every node in baked order, then the frame context.
    ///
    /// Teardown continues past failures; the first error is returned.
    pub fn free(mut self, gpu: &mut dyn GpuDevice) -> GraphResult<()> {
        let mut result = Ok(());

        {
            let mut ctx = PassContext {
                gpu: &mut *gpu,
                frame: &mut self.frame,
            };
            for (position, node) in self.nodes.iter().enumerate() {
                let outcome = match node.upgrade() {
                    Some(node) => node.lock().free(&mut ctx),
                    None => Err(GraphError::NodeReleased { position }),
                };
                if let Err(err) = outcome {
                    log::error!("Failed to free render graph node: {err}");
                    if result.is_ok() {
                        result = Err(err);
                    }
                }
            }
        }

        self.frame.free(gpu);
        result
    }

    fn live_nodes(&self) -> GraphResult<Vec<NodeRef>> {
        self.nodes
            .iter()
            .enumerate()
            .map(|(position, node)| node.upgrade().ok_or(GraphError::NodeReleased { position }))
            .collect()
    }
}
