use std::{error, fmt, result};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Error {
    /// A call to a peer or to the view service did not come back.
    Rpc(pbrpc::Error),
    /// The view names a server this node has no endpoint for.
    UnknownPeer(String),
    /// The view service knows no primary.
    NoPrimary,
    /// A clerk gave up retrying.
    Timeout,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

impl error::Error for Error {
    fn source(&self) -> Option<&(dyn error::Error + 'static)> {
        match self {
            Error::Rpc(e) => Some(e),
            _ => None,
        }
    }
}

impl From<pbrpc::Error> for Error {
    fn from(e: pbrpc::Error) -> Error {
        Error::Rpc(e)
    }
}

pub type Result<T> = result::Result<T, Error>;
