use core::fmt;

/// Errors returned by the wire codec and the three engines.
///
/// Per the propagation policy in the specification, malformed or
/// unexpected *network input* is never surfaced as an `Error` to a caller —
/// it is dropped silently inside `on_receive`/`process_*` and only ever
/// logged. `Error` is reserved for the synchronous, local failure modes:
/// bad caller-supplied parameters, resource exhaustion, and short buffers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A NULL/empty/invalid parameter was passed to `init`/`start`/`stop`/`getState`.
    InvalidParameter,
    /// A mutex, UDP callback slot, or other OS-level resource could not be allocated.
    OutOfResources,
    /// An outgoing buffer was too small to hold the message being emitted.
    Exhausted,
    /// An incoming buffer was too short, or a length field in it was inconsistent.
    Truncated,
}

pub type Result<T> = core::result::Result<T, Error>;

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::InvalidParameter => write!(f, "invalid parameter"),
            Error::OutOfResources => write!(f, "out of resources"),
            Error::Exhausted => write!(f, "buffer exhausted"),
            Error::Truncated => write!(f, "truncated packet"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}
