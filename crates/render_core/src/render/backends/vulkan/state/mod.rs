//! Presentation state

pub mod swapchain;

pub use swapchain::SwapchainContext;
