use std::io;
use std::result;

/// Failure to parse a challenge or to compute a response for it
#[derive(Debug, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("Unsupported auth scheme: {0}")]
    UnsupportedScheme(String),
    #[error("Unknown algorithm: {0}")]
    UnknownAlgorithm(String),
    #[error("Bad Qop option: {0}")]
    BadQop(String),
    #[error("Missing \"{0}\" in header: {1}")]
    MissingRequired(&'static str, String),
    #[error("Invalid header syntax: {0}")]
    InvalidHeaderSyntax(String),
    #[error("Illegal Qop in prompt: {0}")]
    BadQopOptions(String),
}

pub type Result<T> = result::Result<T, Error>;

/// Failure of a request sent through [`DigestTransport`](crate::DigestTransport).
///
/// `E` is the error type of the wrapped transport; it is passed through untouched.
#[derive(Debug, thiserror::Error)]
pub enum SendError<E> {
    /// The underlying transport failed
    #[error("transport error: {0}")]
    Transport(#[source] E),
    /// The server answered 401 without a usable `WWW-Authenticate: Digest` header
    #[error("401 received without a Digest WWW-Authenticate header, please check your server configuration")]
    ChallengeMissing,
    /// The challenge could not be parsed or answered
    #[error(transparent)]
    Digest(#[from] Error),
    /// The request body could not be read for hashing or replay
    #[error("failed to read request body: {0}")]
    Body(#[source] io::Error),
}

impl<E> SendError<E> {
    /// The transport error, if that is what this is
    pub fn into_transport(self) -> Option<E> {
        match self {
            SendError::Transport(e) => Some(e),
            _ => None,
        }
    }
}
