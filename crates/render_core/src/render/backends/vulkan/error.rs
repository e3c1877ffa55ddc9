//! Vulkan backend error types
//!
//! Every fallible operation in the backend returns [`VulkanResult`]. Errors are
//! split into two classes through [`VulkanError::kind`]: fatal configuration
//! problems found while bringing the renderer up, and logic violations that
//! indicate a caller bug. Neither class is retried.

use ash::vk;
use std::path::PathBuf;
use thiserror::Error;

use crate::assets::AssetError;

/// Error class used by callers to decide between aborting and propagating
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Misconfiguration or environment failure (device limits, missing files,
    /// driver rejection). Aborts initialization.
    FatalConfiguration,
    /// Contract violation by the caller (unknown handle, illegal transition,
    /// capacity overrun). Never part of normal control flow.
    LogicViolation,
}

/// Vulkan-specific error types
#[derive(Error, Debug)]
pub enum VulkanError {
    /// General Vulkan API error with result code
    #[error("Vulkan API error: {0:?}")]
    Api(vk::Result),

    /// Vulkan context initialization failed
    #[error("Initialization failed: {0}")]
    InitializationFailed(String),

    /// No suitable memory type found for allocation
    #[error("No suitable memory type found")]
    NoSuitableMemoryType,

    /// A configured capacity exceeds what the device supports
    #[error("Device limit exceeded: {what} requires {requested}, device allows {limit}")]
    DeviceLimitExceeded {
        /// Which limit was violated
        what: &'static str,
        /// Requested amount
        requested: u64,
        /// Device maximum
        limit: u64,
    },

    /// Shader binary missing or unreadable
    #[error("Shader unavailable at {path:?}: {source}")]
    ShaderUnavailable {
        /// Path that was tried
        path: PathBuf,
        /// Underlying IO failure
        #[source]
        source: std::io::Error,
    },

    /// Format lacks a required device feature
    #[error("Format {format:?} unsupported: {reason}")]
    UnsupportedFormat {
        /// Offending format
        format: vk::Format,
        /// Missing capability
        reason: &'static str,
    },

    /// Mesh or texture source could not be loaded
    #[error("Asset error: {0}")]
    Asset(#[from] AssetError),

    /// Resource with specified ID could not be found
    #[error("Resource not found: {id}")]
    ResourceNotFound {
        /// The unique identifier of the resource
        id: u64,
    },

    /// Layout transition outside the supported rule table
    #[error("Unsupported layout transition: {from:?} -> {to:?}")]
    UnsupportedLayoutTransition {
        /// Current layout
        from: vk::ImageLayout,
        /// Requested layout
        to: vk::ImageLayout,
    },

    /// A fixed-capacity store would overflow
    #[error("Capacity exceeded for {resource}: requested {requested}, capacity {capacity}")]
    CapacityExceeded {
        /// Which store overflowed
        resource: &'static str,
        /// Total that would be required
        requested: usize,
        /// Configured maximum
        capacity: usize,
    },

    /// Invalid operation attempted
    #[error("Invalid operation: {reason}")]
    InvalidOperation {
        /// Description of why the operation is invalid
        reason: String,
    },
}

impl VulkanError {
    /// Classify this error
    pub const fn kind(&self) -> ErrorKind {
        match self {
            Self::Api(_)
            | Self::InitializationFailed(_)
            | Self::NoSuitableMemoryType
            | Self::DeviceLimitExceeded { .. }
            | Self::ShaderUnavailable { .. }
            | Self::UnsupportedFormat { .. }
            | Self::Asset(_) => ErrorKind::FatalConfiguration,
            Self::ResourceNotFound { .. }
            | Self::UnsupportedLayoutTransition { .. }
            | Self::CapacityExceeded { .. }
            | Self::InvalidOperation { .. } => ErrorKind::LogicViolation,
        }
    }

    /// Build a capacity violation and log it where it was detected
    pub(crate) fn capacity(resource: &'static str, requested: usize, capacity: usize) -> Self {
        log::error!("Capacity exceeded for {}: {} > {}", resource, requested, capacity);
        Self::CapacityExceeded { resource, requested, capacity }
    }
}

/// Result type for Vulkan operations
pub type VulkanResult<T> = Result<T, VulkanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(VulkanError::Api(vk::Result::ERROR_DEVICE_LOST).kind(), ErrorKind::FatalConfiguration);
        assert_eq!(
            VulkanError::DeviceLimitExceeded { what: "sampled images", requested: 10, limit: 5 }.kind(),
            ErrorKind::FatalConfiguration
        );
        assert_eq!(VulkanError::ResourceNotFound { id: 3 }.kind(), ErrorKind::LogicViolation);
        assert_eq!(VulkanError::capacity("vertices", 11, 10).kind(), ErrorKind::LogicViolation);
    }

    #[test]
    fn test_error_messages() {
        let err = VulkanError::UnsupportedLayoutTransition {
            from: vk::ImageLayout::SHADER_READ_ONLY_OPTIMAL,
            to: vk::ImageLayout::UNDEFINED,
        };
        assert!(err.to_string().starts_with("Unsupported layout transition"));

        let err = VulkanError::capacity("draw commands", 5, 4);
        assert_eq!(err.to_string(), "Capacity exceeded for draw commands: requested 5, capacity 4");
    }
}
