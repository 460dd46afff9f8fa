use std::{error, fmt, result};

use futures::channel::oneshot::Canceled;

use crate::codec::{DecodeError, EncodeError};

/// Why an RPC did not produce a reply.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// The target server has no such service or method.
    Unimplemented(String),
    Encode(EncodeError),
    Decode(DecodeError),
    /// The reply channel was dropped before a reply was sent.
    Recv(Canceled),
    /// The request or the reply was lost on the way.
    Timeout,
    /// The target server was deleted, or the network is gone.
    Stopped,
    Other(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Encode(e) => Some(e),
            Error::Decode(e) => Some(e),
            Error::Recv(e) => Some(e),
            _ => None,
        }
    }
}

pub type Result<T> = result::Result<T, Error>;
