//! Render graph nodes shipped with the renderer

pub mod geometry_pass;

pub use geometry_pass::{GeometryConfig, GeometryNode, ShaderPaths};
