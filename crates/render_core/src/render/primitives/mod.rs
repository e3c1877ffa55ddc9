//! Core primitive types for rendering

pub mod mesh;

pub use mesh::{DebugVertex, Vertex};
