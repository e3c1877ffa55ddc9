//! Asset loading: the narrow interfaces through which geometry and textures
//! reach the renderer
//!
//! The mesh manager only sees [`LoadedMesh`]: flat vertex and index arrays plus
//! a [`MaterialRef`]. Any file format can feed it by implementing [`MeshSource`].

pub mod image_loader;
pub mod mtl_parser;
pub mod obj_loader;

pub use image_loader::ImageData;
pub use mtl_parser::{MtlData, MtlParser};
pub use obj_loader::ObjLoader;

use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::render::primitives::Vertex;

/// Asset loading errors
#[derive(Error, Debug)]
pub enum AssetError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Malformed content
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Well-formed but unusable content
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    /// Image decoding failed
    #[error("Image error: {0}")]
    Image(#[from] image::ImageError),
}

/// Material description attached to a mesh file
#[derive(Debug, Clone, PartialEq)]
pub struct MaterialRef {
    /// Material name; identity used for deduplication
    pub name: String,
    /// Linear RGBA base color
    pub base_color: [f32; 4],
    /// Diffuse texture, already resolved relative to the mesh file
    pub diffuse_map: Option<PathBuf>,
}

impl Default for MaterialRef {
    fn default() -> Self {
        Self {
            name: "default".to_string(),
            base_color: [1.0, 1.0, 1.0, 1.0],
            diffuse_map: None,
        }
    }
}

/// Geometry ready to be copied into the shared buffers
#[derive(Debug, Clone, Default)]
pub struct LoadedMesh {
    /// Vertex data
    pub vertices: Vec<Vertex>,
    /// Triangle list indices into `vertices`
    pub indices: Vec<u32>,
    /// Material the mesh was authored with
    pub material: MaterialRef,
}

/// Something that turns a path into mesh data
pub trait MeshSource {
    /// Parse the model at `path`
    fn load(&mut self, path: &Path) -> Result<LoadedMesh, AssetError>;
}
