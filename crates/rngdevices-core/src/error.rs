//! Error taxonomy shared by every device.
//!
//! Four kinds matter to callers: malformed requests, missing hardware,
//! device I/O failures and cancellation. [`RngError::kind`] collapses the
//! wrapper variants (`Io`, `Config`) onto that taxonomy.

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, RngError>;

/// Errors returned by device operations.
#[derive(Debug, thiserror::Error)]
pub enum RngError {
    /// Malformed request (non-positive count, unaligned exact-bit count,
    /// empty integer range). Rejected before any device interaction.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The source reports no usable hardware.
    #[error("device unavailable: {0}")]
    DeviceUnavailable(String),

    /// A `raw_read`/`shutdown` failed, returned a short read, or the
    /// sampling retry budget ran out.
    #[error("device error: {0}")]
    DeviceError(String),

    /// The caller cancelled the request. The device has been closed.
    #[error("request cancelled")]
    Cancelled,

    /// Underlying OS I/O failure while talking to a device.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration file could not be read or parsed.
    #[error("config error: {0}")]
    Config(String),
}

/// Coarse error classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    DeviceUnavailable,
    DeviceError,
    Cancelled,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InvalidArgument => write!(f, "invalid_argument"),
            Self::DeviceUnavailable => write!(f, "device_unavailable"),
            Self::DeviceError => write!(f, "device_error"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

impl RngError {
    pub(crate) fn invalid(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    pub(crate) fn device(msg: impl Into<String>) -> Self {
        Self::DeviceError(msg.into())
    }

    /// Map this error onto the four-way taxonomy.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidArgument(_) | Self::Config(_) => ErrorKind::InvalidArgument,
            Self::DeviceUnavailable(_) => ErrorKind::DeviceUnavailable,
            Self::DeviceError(_) | Self::Io(_) => ErrorKind::DeviceError,
            Self::Cancelled => ErrorKind::Cancelled,
        }
    }

    /// Whether this error should invalidate the cached device handle.
    pub fn invalidates_handle(&self) -> bool {
        matches!(self.kind(), ErrorKind::DeviceError | ErrorKind::DeviceUnavailable)
    }

    /// True for [`RngError::Cancelled`].
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}
