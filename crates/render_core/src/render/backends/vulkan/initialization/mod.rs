// Vulkan initialization components

pub mod device;
pub mod instance;
pub mod surface;

pub use device::{DeviceContext, DeviceLimits};
pub use instance::VulkanInstance;
pub use surface::{Surface, SurfaceSupport};
