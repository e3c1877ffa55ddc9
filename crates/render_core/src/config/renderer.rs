//! Renderer configuration: capacities, shader locations, device preferences

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::{Config, ConfigError};

/// Default maximum number of distinct meshes
pub const DEFAULT_MAX_MESHES: u32 = 1024;
/// Default maximum number of instances submitted per frame
pub const DEFAULT_MAX_MESH_INSTANCES: u32 = 100_000;
/// Default maximum number of indirect draw commands per frame
pub const DEFAULT_MAX_DRAW_COMMANDS: u32 = 1024;
/// Default size of the shared vertex buffer, in vertices
pub const DEFAULT_MAX_VERTICES: u32 = 4_000_000;
/// Default size of the shared index buffer, in indices
pub const DEFAULT_MAX_INDICES: u32 = 12_000_000;
/// Default size of the bindless texture array
pub const DEFAULT_MAX_TEXTURES: u32 = 1024;
/// Default number of material records
pub const DEFAULT_MAX_MATERIALS: u32 = 1024;
/// Default number of frames recorded ahead of the GPU
pub const DEFAULT_MAX_FRAMES_IN_FLIGHT: u32 = 2;

/// Fixed capacities of every GPU-side store
///
/// Read once at construction. Nothing in the renderer grows past these.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CapacityConfig {
    /// Distinct meshes in the registry
    pub max_meshes: u32,
    /// Instances accumulated in one frame
    pub max_mesh_instances: u32,
    /// Indirect draw commands assembled in one frame
    pub max_draw_commands: u32,
    /// Vertices in the shared vertex buffer
    pub max_vertices: u32,
    /// Indices in the shared index buffer
    pub max_indices: u32,
    /// Slots in the bindless texture array
    pub max_textures: u32,
    /// Records in the material storage buffer
    pub max_materials: u32,
    /// Frames whose per-frame state is replicated
    pub max_frames_in_flight: u32,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        Self {
            max_meshes: DEFAULT_MAX_MESHES,
            max_mesh_instances: DEFAULT_MAX_MESH_INSTANCES,
            max_draw_commands: DEFAULT_MAX_DRAW_COMMANDS,
            max_vertices: DEFAULT_MAX_VERTICES,
            max_indices: DEFAULT_MAX_INDICES,
            max_textures: DEFAULT_MAX_TEXTURES,
            max_materials: DEFAULT_MAX_MATERIALS,
            max_frames_in_flight: DEFAULT_MAX_FRAMES_IN_FLIGHT,
        }
    }
}

impl CapacityConfig {
    /// Reject capacities the renderer cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        let fields = [
            ("max_meshes", self.max_meshes),
            ("max_mesh_instances", self.max_mesh_instances),
            ("max_draw_commands", self.max_draw_commands),
            ("max_vertices", self.max_vertices),
            ("max_indices", self.max_indices),
            ("max_textures", self.max_textures),
            ("max_materials", self.max_materials),
            ("max_frames_in_flight", self.max_frames_in_flight),
        ];
        if let Some((name, _)) = fields.iter().find(|(_, value)| *value == 0) {
            return Err(ConfigError::Invalid(format!("{name} must be greater than zero")));
        }
        Ok(())
    }
}

/// Locations of the compiled SPIR-V binaries
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShaderPaths {
    /// Main pipeline vertex stage
    pub main_vertex: PathBuf,
    /// Main pipeline fragment stage
    pub main_fragment: PathBuf,
    /// Debug wireframe vertex stage
    pub debug_vertex: PathBuf,
    /// Debug wireframe fragment stage
    pub debug_fragment: PathBuf,
}

impl Default for ShaderPaths {
    fn default() -> Self {
        Self::in_dir("target/shaders")
    }
}

impl ShaderPaths {
    /// Standard file names inside `dir`
    pub fn in_dir(dir: impl Into<PathBuf>) -> Self {
        let dir = dir.into();
        Self {
            main_vertex: dir.join("shader.vert.spv"),
            main_fragment: dir.join("shader.frag.spv"),
            debug_vertex: dir.join("debug_shader.vert.spv"),
            debug_fragment: dir.join("debug_shader.frag.spv"),
        }
    }
}

/// Top-level renderer configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RendererConfig {
    /// Application name for Vulkan instance creation
    pub application_name: String,
    /// Enable validation layers (only honoured in debug builds)
    pub enable_validation: bool,
    /// Upper bound on MSAA samples; the device may support fewer
    pub max_msaa_samples: u32,
    /// Fixed store sizes
    pub capacities: CapacityConfig,
    /// Shader binaries
    pub shaders: ShaderPaths,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            application_name: "render_core".to_string(),
            enable_validation: cfg!(debug_assertions),
            max_msaa_samples: 8,
            capacities: CapacityConfig::default(),
            shaders: ShaderPaths::default(),
        }
    }
}

impl RendererConfig {
    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.application_name.is_empty() {
            return Err(ConfigError::Invalid("application name cannot be empty".to_string()));
        }
        if !self.max_msaa_samples.is_power_of_two() || self.max_msaa_samples > 64 {
            return Err(ConfigError::Invalid(format!(
                "max_msaa_samples must be a power of two up to 64, got {}",
                self.max_msaa_samples
            )));
        }
        self.capacities.validate()
    }
}

impl Config for RendererConfig {}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::Path;

    #[test]
    fn test_default_config_is_valid() {
        let config = RendererConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.capacities.max_frames_in_flight, DEFAULT_MAX_FRAMES_IN_FLIGHT);
        assert_eq!(config.shaders.main_vertex, Path::new("target/shaders/shader.vert.spv"));
    }

    #[test]
    fn test_zero_capacity_rejected() {
        let mut config = RendererConfig::default();
        config.capacities.max_draw_commands = 0;
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("max_draw_commands"));
    }

    #[test]
    fn test_bad_sample_count_rejected() {
        let config = RendererConfig { max_msaa_samples: 3, ..RendererConfig::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_parse_partial_toml() {
        let text = r#"
application_name = "viewer"

[capacities]
max_textures = 64
max_frames_in_flight = 3
"#;
        let config = RendererConfig::parse(text, Path::new("renderer.toml")).unwrap();
        assert_eq!(config.application_name, "viewer");
        assert_eq!(config.capacities.max_textures, 64);
        assert_eq!(config.capacities.max_frames_in_flight, 3);
        assert_eq!(config.capacities.max_meshes, DEFAULT_MAX_MESHES);
    }

    #[test]
    fn test_parse_ron() {
        let text = r#"(application_name: "ron app", capacities: (max_meshes: 12))"#;
        let config = RendererConfig::parse(text, Path::new("renderer.ron")).unwrap();
        assert_eq!(config.application_name, "ron app");
        assert_eq!(config.capacities.max_meshes, 12);
    }

    #[test]
    fn test_unknown_extension() {
        let result = RendererConfig::parse("", Path::new("renderer.json"));
        assert!(matches!(result, Err(ConfigError::UnsupportedFormat(_))));
    }
}
