//! Registry error types

use crate::message::ChannelType;

/// Error type for registry operations
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RegistryError {
    /// Channel type is outside `[0, max)`
    ChannelTypeOutOfRange { channel_type: ChannelType, max: u32 },
}

impl std::fmt::Display for RegistryError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RegistryError::ChannelTypeOutOfRange { channel_type, max } => {
                write!(f, "Channel type {} out of range (max {})", channel_type, max)
            }
        }
    }
}

impl std::error::Error for RegistryError {}
