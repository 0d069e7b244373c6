//! Transparent Digest authentication around an HTTP transport.

use crate::body::Body;
use crate::utils::digest_uri;
use crate::{AuthContext, Challenge, Credential, Error, HttpMethod, Qop, SendError};
use http::header::{HeaderValue, AUTHORIZATION};
use http::request::Parts;
use http::{Request, Response, StatusCode};
use parking_lot::{Mutex, RwLock};
use std::fmt;
use std::mem;
use std::sync::Arc;
use tracing::{debug, trace};

/// Something that sends a request and returns the response: the HTTP client proper.
///
/// The request body is a [`Body`], which the transport reads once (it implements `std::io::Read`).
pub trait Transport {
    /// Body of the responses
    type ResponseBody;
    /// Error of a failed round-trip
    type Error;

    fn send(&self, request: Request<Body>) -> Result<Response<Self::ResponseBody>, Self::Error>;
}

impl<T: Transport + ?Sized> Transport for &T {
    type ResponseBody = T::ResponseBody;
    type Error = T::Error;

    fn send(&self, request: Request<Body>) -> Result<Response<Self::ResponseBody>, Self::Error> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for Arc<T> {
    type ResponseBody = T::ResponseBody;
    type Error = T::Error;

    fn send(&self, request: Request<Body>) -> Result<Response<Self::ResponseBody>, Self::Error> {
        (**self).send(request)
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    type ResponseBody = T::ResponseBody;
    type Error = T::Error;

    fn send(&self, request: Request<Body>) -> Result<Response<Self::ResponseBody>, Self::Error> {
        (**self).send(request)
    }
}

/// [`Transport`] backed by a closure, see [`transport_fn()`]
#[derive(Clone)]
pub struct FnTransport<F> {
    f: F,
}

/// Use a closure as a [`Transport`]
pub fn transport_fn<F, B, E>(f: F) -> FnTransport<F>
where
    F: Fn(Request<Body>) -> Result<Response<B>, E>,
{
    FnTransport { f }
}

impl<F, B, E> Transport for FnTransport<F>
where
    F: Fn(Request<Body>) -> Result<Response<B>, E>,
{
    type ResponseBody = B;
    type Error = E;

    fn send(&self, request: Request<Body>) -> Result<Response<B>, E> {
        (self.f)(request)
    }
}

impl<F> fmt::Debug for FnTransport<F> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FnTransport").finish_non_exhaustive()
    }
}

/// Wraps a [`Transport`] and answers its Digest challenges.
///
/// The first request goes out without credentials. When the server answers 401 with a Digest
/// challenge, the request is sent once more with an `Authorization` header, and the negotiated
/// challenge is kept: later requests carry credentials right away, with the nonce count
/// advanced. If the server then reports the nonce as stale, the request is renegotiated once
/// with the new challenge. Any other 401 is handed back to the caller and the cached
/// credential is dropped.
///
/// The transport can be shared between threads; every request gets its own nonce count.
pub struct DigestTransport<T> {
    username: String,
    password: String,
    transport: T,
    // Writers lock `challenge` before `credential`; both are set or both are empty
    challenge: RwLock<Option<Challenge>>,
    credential: Mutex<Option<Credential>>,
}

type SendResult<T> =
    Result<Response<<T as Transport>::ResponseBody>, SendError<<T as Transport>::Error>>;

impl<T: Transport> DigestTransport<T> {
    /// Wrap `transport`, authenticating as `username` with `password`
    pub fn new(username: impl Into<String>, password: impl Into<String>, transport: T) -> Self {
        DigestTransport {
            username: username.into(),
            password: password.into(),
            transport,
            challenge: RwLock::new(None),
            credential: Mutex::new(None),
        }
    }

    /// The wrapped transport
    pub fn inner(&self) -> &T {
        &self.transport
    }

    /// The challenge currently used for preemptive authorization, if any
    pub fn challenge(&self) -> Option<Challenge> {
        self.challenge.read().clone()
    }

    /// True once a challenge was answered and credentials are sent with every request
    pub fn is_authenticated(&self) -> bool {
        self.credential.lock().is_some()
    }

    /// Forget the negotiated challenge; the next request goes out without credentials
    pub fn reset(&self) {
        let mut challenge = self.challenge.write();
        let mut credential = self.credential.lock();
        *challenge = None;
        *credential = None;
    }

    fn context<'a>(&'a self, parts: &'a Parts, body: Option<&'a [u8]>) -> AuthContext<'a> {
        AuthContext::new_with_method(
            &self.username,
            &self.password,
            digest_uri(&parts.uri),
            body,
            HttpMethod::from(&parts.method),
        )
    }

    /// Request without a cached credential: probe, and answer the challenge if there is one
    fn send_unauthorized(&self, parts: Parts, body: Body) -> SendResult<T> {
        let (body, replay) = body.into_replayable();

        let response = self
            .transport
            .send(rebuild(&parts, body))
            .map_err(SendError::Transport)?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        let challenge = match Challenge::from_headers(response.headers()) {
            Some(parsed) => parsed?,
            None => return Err(SendError::ChallengeMissing),
        };
        debug!(realm = %challenge.realm, "got digest challenge, retrying with credentials");

        self.negotiate(parts, replay.replay(), challenge)
    }

    /// Answer a fresh challenge: send the request once with a new credential and cache it
    fn negotiate(&self, parts: Parts, body: Body, challenge: Challenge) -> SendResult<T> {
        let body = if wants_body(&challenge) {
            Body::from(body.into_bytes().map_err(SendError::Body)?)
        } else {
            body
        };

        let credential = Credential::build(&challenge, &self.context(&parts, body.as_bytes()))?;
        let authorization = header_value(&credential)?;

        let response = self
            .transport
            .send(authorized(&parts, body, authorization))
            .map_err(SendError::Transport)?;

        if response.status() == StatusCode::UNAUTHORIZED {
            debug!(realm = %challenge.realm, "credentials rejected");
        } else {
            self.store(challenge, credential);
        }

        Ok(response)
    }

    /// Request with a cached credential: authorize up front, renegotiate once if the nonce went stale
    fn send_authorized(&self, parts: Parts, mut body: Body) -> SendResult<T> {
        let (authorization, nonce) = loop {
            let needs_body = self.credential.lock().as_ref().map(Credential::needs_body);
            let needs_body = match needs_body {
                Some(needs_body) => needs_body,
                None => return self.send_unauthorized(parts, body),
            };

            if needs_body && body.as_bytes().is_none() {
                let bytes = mem::take(&mut body).into_bytes().map_err(SendError::Body)?;
                body = Body::from(bytes);
            }

            let context = self.context(&parts, body.as_bytes());
            let mut guard = self.credential.lock();
            // replaced or dropped by another request in the meantime
            let Some(credential) = guard.as_mut() else {
                continue;
            };
            if credential.needs_body() && context.body.is_none() {
                continue;
            }
            if credential.is_exhausted() {
                debug!(nonce = %credential.nonce, "nonce count used up, renegotiating");
                let nonce = credential.nonce.clone();
                drop(guard);
                self.invalidate(&nonce);
                return self.send_unauthorized(parts, body);
            }

            credential.refresh(&context);
            trace!(nc = credential.nc, uri = context.uri, "reusing digest credential");
            break (header_value(credential)?, credential.nonce.clone());
        };

        let (body, replay) = body.into_replayable();

        let response = self
            .transport
            .send(authorized(&parts, body, authorization))
            .map_err(SendError::Transport)?;

        if response.status() != StatusCode::UNAUTHORIZED {
            return Ok(response);
        }

        match Challenge::from_headers(response.headers()) {
            Some(Ok(challenge)) if challenge.stale => {
                debug!(realm = %challenge.realm, "nonce is stale, renegotiating");
                // the stale nonce stays cached only until a new one is stored
                let result = self.negotiate(parts, replay.replay(), challenge);
                if !matches!(&result, Ok(r) if r.status() != StatusCode::UNAUTHORIZED) {
                    self.invalidate(&nonce);
                }
                result
            }
            Some(Ok(_)) => {
                debug!("cached credentials rejected, dropping them");
                self.invalidate(&nonce);
                Ok(response)
            }
            Some(Err(e)) => {
                self.invalidate(&nonce);
                Err(e.into())
            }
            None => {
                self.invalidate(&nonce);
                Err(SendError::ChallengeMissing)
            }
        }
    }

    fn store(&self, challenge: Challenge, credential: Credential) {
        let mut cached_challenge = self.challenge.write();
        let mut cached_credential = self.credential.lock();
        *cached_challenge = Some(challenge);
        *cached_credential = Some(credential);
    }

    /// Drop the cached state, unless another request has replaced it already
    fn invalidate(&self, nonce: &str) {
        let mut cached_challenge = self.challenge.write();
        let mut cached_credential = self.credential.lock();
        if cached_credential.as_ref().map(|c| c.nonce.as_str()) == Some(nonce) {
            *cached_challenge = None;
            *cached_credential = None;
        }
    }
}

impl<T: Transport> Transport for DigestTransport<T> {
    type ResponseBody = T::ResponseBody;
    type Error = SendError<T::Error>;

    fn send(&self, request: Request<Body>) -> SendResult<T> {
        let (parts, body) = request.into_parts();
        if self.is_authenticated() {
            self.send_authorized(parts, body)
        } else {
            self.send_unauthorized(parts, body)
        }
    }
}

impl<T: fmt::Debug> fmt::Debug for DigestTransport<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DigestTransport")
            .field("username", &self.username)
            .field("transport", &self.transport)
            .field("challenge", &*self.challenge.read())
            .finish_non_exhaustive()
    }
}

/// True if the only qop we can answer with hashes the body
fn wants_body(challenge: &Challenge) -> bool {
    matches!(&challenge.qop, Some(list) if !list.contains(&Qop::AUTH) && list.contains(&Qop::AUTH_INT))
}

fn header_value(credential: &Credential) -> Result<HeaderValue, Error> {
    HeaderValue::from_str(&credential.to_header_string()).map_err(|_| {
        Error::InvalidHeaderSyntax(format!(
            "Authorization for user {:?} is not a valid header value",
            credential.username
        ))
    })
}

fn rebuild(parts: &Parts, body: Body) -> Request<Body> {
    let mut request = Request::new(body);
    *request.method_mut() = parts.method.clone();
    *request.uri_mut() = parts.uri.clone();
    *request.version_mut() = parts.version;
    *request.headers_mut() = parts.headers.clone();
    *request.extensions_mut() = parts.extensions.clone();
    request
}

fn authorized(parts: &Parts, body: Body, authorization: HeaderValue) -> Request<Body> {
    let mut request = rebuild(parts, body);
    request.headers_mut().insert(AUTHORIZATION, authorization);
    request
}
