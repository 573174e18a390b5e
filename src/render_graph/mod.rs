//! Render Graph System
//!
//! Nodes are units of per-frame GPU work that publish named output images and
//! bind their inputs to other nodes' outputs. [`RenderGraph::bake`] walks the
//! bindings from a terminal node and materialises a dependencies-first order;
//! `update`, `resize` and `free` then drive every node in that order.

pub mod frame;
pub mod graph;
pub mod node;

pub use frame::*;
pub use graph::*;
pub use node::*;

use thiserror::Error;

use crate::backend::GpuError;

/// Render graph error type
#[derive(Error, Debug)]
pub enum GraphError {
    #[error("Input bindings form a cycle through node {node}")]
    Cycle { node: String },
    #[error("Input {input} is not bound")]
    UnboundInput { input: u32 },
    #[error("Input {input} does not exist, the node has {count} inputs")]
    NoSuchInput { input: u32, count: u32 },
    #[error("The node bound to input {input} has been dropped")]
    OwnerReleased { input: u32 },
    #[error("Node {node} has not published output {output}")]
    OutputNotReady { node: String, output: u32 },
    #[error("Node at position {position} was dropped while still in the graph")]
    NodeReleased { position: usize },
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

pub type GraphResult<T> = Result<T, GraphError>;
