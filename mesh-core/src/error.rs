//! Error type shared by the instance core and the collaborators it drives.

/// Failure reported by an instance operation or by a hosted subsystem.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum Error {
    /// No free slot or buffer left.
    #[error("no buffers available")]
    NoBufs,
    /// Operation not allowed in the current state (e.g. erase while attached).
    #[error("invalid state")]
    InvalidState,
    /// Caller-supplied instance storage is smaller than an instance.
    #[error("buffer too small: {required} bytes required")]
    InsufficientBuffer { required: usize },
    /// Missing or unusable argument (null buffer, misaligned storage).
    #[error("invalid arguments")]
    InvalidArgs,
    /// Requested item does not exist.
    #[error("not found")]
    NotFound,
    /// Subsystem is busy with another operation.
    #[error("busy")]
    Busy,
    /// Generic subsystem failure.
    #[error("operation failed")]
    Failed,
}
