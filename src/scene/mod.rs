//! Camera collaborator and view culling

mod camera;

pub use camera::*;
