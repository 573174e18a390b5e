//! Error types for mesh preparation.

use std::path::PathBuf;

use thiserror::Error;

use crate::backend::GpuError;
use crate::resources::meshlet::MeshletError;

/// Errors that can occur while loading a mesh.
#[derive(Error, Debug)]
pub enum LoadError {
    /// The scene asset could not be parsed.
    #[error("failed to parse scene asset {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: gltf_dep::Error,
    },
    /// A triangle primitive is missing one of its required vertex attributes.
    #[error("primitive {primitive} is missing the {attribute} attribute")]
    MissingAttribute {
        primitive: usize,
        attribute: &'static str,
    },
    /// Vertex attribute streams disagree on the vertex count.
    #[error("primitive {primitive}: attribute {attribute} has {found} elements, expected {expected}")]
    AttributeCountMismatch {
        primitive: usize,
        attribute: &'static str,
        expected: usize,
        found: usize,
    },
    /// A texture image could not be read or decoded.
    #[error("failed to load texture {path}: {source}")]
    Texture {
        path: PathBuf,
        #[source]
        source: image::ImageError,
    },
    /// A texture decode task panicked.
    #[error("texture task for {0} panicked")]
    TextureTaskPanicked(PathBuf),
    /// Meshlet construction failed.
    #[error(transparent)]
    Meshlet(#[from] MeshletError),
    /// The GPU facade rejected an allocation.
    #[error(transparent)]
    Gpu(#[from] GpuError),
}

pub type LoadResult<T> = Result<T, LoadError>;
