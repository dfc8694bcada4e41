use thiserror::Error;

/// Failure to remove or apply protection to a 1-RTT packet.
///
/// Only [`KeyError::Transport`] is fatal to the connection, every other variant
/// means the packet is discarded and the connection carries on.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum KeyError {
    #[error("Fail to decrypt packet")]
    DecryptionFailed,
    #[error("Keys for the previous key phase have been dropped")]
    KeysDropped,
    #[error("Sample of {0} bytes does not match the header protection sample length")]
    UnderSampling(usize),
    #[error("Fail to apply or remove header protection")]
    HeaderProtectionFailure,
    #[error(transparent)]
    Transport(#[from] crate::error::Error),
}

impl KeyError {
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
