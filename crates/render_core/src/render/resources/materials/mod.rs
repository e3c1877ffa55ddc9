//! Material system
//!
//! Material identities, the records the fragment stage reads, and the manager
//! that streams material textures into the bindless array.

pub mod material;
pub mod material_manager;
pub mod material_registry;

pub use material::{MaterialData, MaterialId, MaterialResolver, DEFAULT_TEXTURE_SLOT};
pub use material_manager::{MaterialBinder, MaterialManager};
pub use material_registry::MaterialRegistry;
