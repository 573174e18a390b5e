//! Resource management
//!
//! Turns parsed scenes into GPU-resident meshes: meshlet clustering, texture
//! decoding, material registration in the bindless heaps, and the loader that
//! ties them together.

mod error;
mod material;
mod mesh;
pub mod meshlet;
mod texture;

pub use error::*;
pub use material::*;
pub use mesh::*;
pub use meshlet::{Meshlet, MeshletBuilder, MeshletError, MAX_MESHLET_TRIANGLES, MAX_MESHLET_VERTICES};
pub use texture::*;
