use std::io;

use thiserror::Error;

/// Result alias used across the nd crates.
pub type NdResult<T> = std::result::Result<T, NdError>;

/// The closed error vocabulary of the provider framework.
///
/// Every public operation reports failure through one of these variants;
/// collaborator failures that have no dedicated variant are folded into
/// [`NdError::Unsuccessful`].
#[derive(Debug, Error)]
pub enum NdError {
    /// The framework has not been started, or a provider module could not
    /// produce the interface needed to serve the request.
    #[error("device not ready")]
    NotReady,

    /// A provider module reported an allocation failure.
    #[error("out of memory")]
    NoMemory,

    /// A caller-supplied buffer or argument is malformed.
    #[error("invalid parameter: {0}")]
    InvalidParameter(&'static str),

    /// The address is not serviced by any provider. Also covers provider-side
    /// resolve/open failures, which are deliberately indistinguishable from a
    /// missing provider at this surface.
    #[error("invalid address")]
    InvalidAddress,

    /// The supplied buffer is too small; retry with at least `required` bytes.
    #[error("buffer too small, {required} bytes required")]
    BufferOverflow { required: usize },

    /// The routing layer reports the destination as unreachable.
    #[error("network unreachable")]
    NetworkUnreachable,

    /// Catch-all for OS and collaborator failures.
    #[error("unsuccessful: {0}")]
    Unsuccessful(#[from] io::Error),
}

impl NdError {
    /// Builds the catch-all variant from a plain message.
    pub fn unsuccessful(msg: impl Into<String>) -> NdError {
        NdError::Unsuccessful(io::Error::new(io::ErrorKind::Other, msg.into()))
    }

    /// The required size carried by a [`NdError::BufferOverflow`], if any.
    pub fn required_size(&self) -> Option<usize> {
        match self {
            NdError::BufferOverflow { required } => Some(*required),
            _ => None,
        }
    }

    /// Projects the error onto an errno value for C-flavored embedders.
    pub fn to_errno(&self) -> i32 {
        match self {
            NdError::NotReady => libc::ENODEV,
            NdError::NoMemory => libc::ENOMEM,
            NdError::InvalidParameter(_) => libc::EINVAL,
            NdError::InvalidAddress => libc::EADDRNOTAVAIL,
            NdError::BufferOverflow { .. } => libc::EOVERFLOW,
            NdError::NetworkUnreachable => libc::ENETUNREACH,
            NdError::Unsuccessful(err) => err.raw_os_error().unwrap_or(libc::EIO),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_messages() {
        assert_eq!(NdError::NotReady.to_string(), "device not ready");
        assert_eq!(
            NdError::BufferOverflow { required: 28 }.to_string(),
            "buffer too small, 28 bytes required"
        );
        assert_eq!(
            NdError::InvalidParameter("bad length").to_string(),
            "invalid parameter: bad length"
        );
    }

    #[test]
    fn test_required_size() {
        assert_eq!(NdError::BufferOverflow { required: 44 }.required_size(), Some(44));
        assert_eq!(NdError::InvalidAddress.required_size(), None);
    }

    #[test]
    fn test_errno_projection() {
        assert_eq!(NdError::NoMemory.to_errno(), libc::ENOMEM);
        assert_eq!(NdError::NetworkUnreachable.to_errno(), libc::ENETUNREACH);
        assert_eq!(NdError::BufferOverflow { required: 1 }.to_errno(), libc::EOVERFLOW);

        let os = NdError::Unsuccessful(io::Error::from_raw_os_error(libc::EPERM));
        assert_eq!(os.to_errno(), libc::EPERM);

        let plain = NdError::unsuccessful("no details");
        assert_eq!(plain.to_errno(), libc::EIO);
    }

    #[test]
    fn test_from_io_error() {
        fn fails() -> NdResult<()> {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "locked"))?;
            Ok(())
        }
        assert!(matches!(fails(), Err(NdError::Unsuccessful(_))));
    }
}
