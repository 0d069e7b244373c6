//! Request bodies that may have to be sent twice.
//!
//! A request answered with 401 is sent again with credentials, so its body has to be available
//! for the second attempt. Byte bodies are simply cloned, replayable bodies are asked for a fresh
//! copy, and single-read streams are captured while the transport reads them the first time.

use bytes::Bytes;
use parking_lot::Mutex;
use std::fmt;
use std::io::{self, Cursor, Read};
use std::mem;
use std::sync::Arc;

type FreshFn = Arc<dyn Fn() -> io::Result<Body> + Send + Sync>;

/// Body of a request sent through a [`Transport`](crate::Transport)
#[derive(Default)]
pub struct Body {
    inner: Inner,
}

#[derive(Default)]
enum Inner {
    #[default]
    Empty,
    Full(Bytes),
    Stream(Box<dyn Read + Send>),
    Replayable {
        current: Option<Box<Body>>,
        fresh: FreshFn,
    },
}

impl Body {
    /// A body with no content
    pub fn empty() -> Self {
        Self::default()
    }

    /// A body that can be read only once, e.g. a file or a socket
    pub fn from_reader<R>(reader: R) -> Self
    where
        R: Read + Send + 'static,
    {
        Body {
            inner: Inner::Stream(Box::new(reader)),
        }
    }

    /// A body that knows how to produce a fresh copy of itself.
    ///
    /// `fresh` is called whenever the body is about to be sent (again), so nothing needs to be
    /// buffered in memory for the retry.
    pub fn replayable<F>(fresh: F) -> Self
    where
        F: Fn() -> io::Result<Body> + Send + Sync + 'static,
    {
        Body {
            inner: Inner::Replayable {
                current: None,
                fresh: Arc::new(fresh),
            },
        }
    }

    /// The content, if it is held in memory
    pub fn as_bytes(&self) -> Option<&[u8]> {
        match &self.inner {
            Inner::Empty => Some(&[][..]),
            Inner::Full(bytes) => Some(bytes.as_ref()),
            Inner::Stream(_) => None,
            Inner::Replayable { current, .. } => current.as_deref().and_then(Body::as_bytes),
        }
    }

    /// Read the whole body into memory
    pub fn into_bytes(self) -> io::Result<Bytes> {
        match self.inner {
            Inner::Empty => Ok(Bytes::new()),
            Inner::Full(bytes) => Ok(bytes),
            Inner::Stream(mut reader) => {
                let mut buf = Vec::new();
                reader.read_to_end(&mut buf)?;
                Ok(buf.into())
            }
            Inner::Replayable { current, fresh } => match current {
                Some(body) => body.into_bytes(),
                None => fresh()?.into_bytes(),
            },
        }
    }

    /// Split into the body to send now and a way to get the same content again afterwards
    pub(crate) fn into_replayable(self) -> (Body, Replay) {
        match self.inner {
            Inner::Empty => (Body::empty(), Replay::Full(Bytes::new())),
            Inner::Full(bytes) => (Body::from(bytes.clone()), Replay::Full(bytes)),
            Inner::Replayable { current, fresh } => (
                Body {
                    inner: Inner::Replayable {
                        current,
                        fresh: fresh.clone(),
                    },
                },
                Replay::Fresh(fresh),
            ),
            Inner::Stream(source) => {
                let state = Arc::new(Mutex::new(TeeState {
                    source,
                    captured: Vec::new(),
                }));
                (
                    Body::from_reader(Tee(state.clone())),
                    Replay::Captured(state),
                )
            }
        }
    }
}

/// Second copy of a body that has been handed to the transport
pub(crate) enum Replay {
    Full(Bytes),
    Fresh(FreshFn),
    Captured(Arc<Mutex<TeeState>>),
}

impl Replay {
    /// The same content as the body this was split from, as read or not read by the transport
    pub(crate) fn replay(self) -> Body {
        match self {
            Replay::Full(bytes) => Body::from(bytes),
            Replay::Fresh(fresh) => Body {
                inner: Inner::Replayable {
                    current: None,
                    fresh,
                },
            },
            Replay::Captured(state) => {
                let mut state = state.lock();
                let captured = mem::take(&mut state.captured);
                let rest = mem::replace(&mut state.source, Box::new(io::empty()));
                Body::from_reader(Cursor::new(captured).chain(rest))
            }
        }
    }
}

pub(crate) struct TeeState {
    source: Box<dyn Read + Send>,
    captured: Vec<u8>,
}

/// Reader that keeps a copy of everything read through it
struct Tee(Arc<Mutex<TeeState>>);

impl Read for Tee {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.0.lock();
        let n = state.source.read(buf)?;
        state.captured.extend_from_slice(&buf[..n]);
        Ok(n)
    }
}

impl Read for Body {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match &mut self.inner {
            Inner::Empty => Ok(0),
            Inner::Full(bytes) => {
                let n = buf.len().min(bytes.len());
                buf[..n].copy_from_slice(&bytes.split_to(n));
                Ok(n)
            }
            Inner::Stream(reader) => reader.read(buf),
            Inner::Replayable { current, fresh } => {
                if current.is_none() {
                    *current = Some(Box::new((**fresh)()?));
                }
                match current {
                    Some(body) => body.read(buf),
                    None => Ok(0),
                }
            }
        }
    }
}

impl From<Bytes> for Body {
    fn from(bytes: Bytes) -> Self {
        Body {
            inner: Inner::Full(bytes),
        }
    }
}

impl From<Vec<u8>> for Body {
    fn from(vec: Vec<u8>) -> Self {
        Bytes::from(vec).into()
    }
}

impl From<String> for Body {
    fn from(s: String) -> Self {
        Bytes::from(s).into()
    }
}

impl From<&'static str> for Body {
    fn from(s: &'static str) -> Self {
        Bytes::from_static(s.as_bytes()).into()
    }
}

impl From<&'static [u8]> for Body {
    fn from(s: &'static [u8]) -> Self {
        Bytes::from_static(s).into()
    }
}

impl fmt::Debug for Body {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.inner {
            Inner::Empty => f.write_str("Body::Empty"),
            Inner::Full(bytes) => f.debug_tuple("Body::Full").field(&bytes.len()).finish(),
            Inner::Stream(_) => f.write_str("Body::Stream"),
            Inner::Replayable { .. } => f.write_str("Body::Replayable"),
        }
    }
}
