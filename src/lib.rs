//! This crate implements Digest Auth as specified by IETF RFCs 2069, 2617, and 7616, on the
//! client side of HTTP.
//!
//! [`DigestTransport`] wraps whatever actually sends your requests (anything implementing
//! [`Transport`]) and takes care of the whole exchange: it answers `401 Unauthorized`
//! challenges, remembers the negotiated nonce, and signs later requests up front.
//!
//! The building blocks are public too: [`Challenge`] parses the `WWW-Authenticate` header,
//! [`Credential`] computes the `Authorization` header for it.
//!
//! # Examples
//!
//! Using the building blocks directly:
//!
//! ```
//! use digest_transport::{AuthContext, Credential};
//!
//! // Value from the WWW-Authenticate HTTP header (usually in a HTTP 401 response)
//! let www_authenticate = r#"Digest realm="http-auth@example.org", qop="auth, auth-int", algorithm=MD5, nonce="7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v", opaque="FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS""#;
//!
//! // Prepare an authorization context. Note that this is a GET request. There are different
//! // constructors available for POST or other request types.
//! let mut context = AuthContext::new("Mufasa", "Circle of Life", "/dir/index.html");
//! // For this test, we inject a custom cnonce. It's generated for you otherwise
//! // - you don't need `mut` in that case and needn't worry about this at all.
//! context.set_custom_cnonce("f2/wE4q74E6zIJEtWaHKaf5wv/H5QzzpXusqGemxURZJ");
//!
//! // Parse the prompt header. You can inspect the parsed object, its fields are public.
//! let prompt = digest_transport::parse(www_authenticate).unwrap();
//!
//! // Compute a value for the Authorization header that we'll send back to the server
//! let mut credential = Credential::build(&prompt, &context).unwrap();
//! assert_eq!(credential.to_string(), r#"Digest username="Mufasa", realm="http-auth@example.org", nonce="7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v", uri="/dir/index.html", qop=auth, nc=00000001, cnonce="f2/wE4q74E6zIJEtWaHKaf5wv/H5QzzpXusqGemxURZJ", response="8ca523f5e9506fed4657c9700eebdbec", opaque="FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS""#);
//!
//! // The credential can be re-used for subsequent requests, assuming the server allows nonce
//! // re-use. Some poorly implemented servers will reject it and give you 401 again, in which
//! // case you should parse the new "WWW-Authenticate" header and use that instead.
//! credential.refresh(&context);
//!
//! // notice how the 'response' field changed - the 'nc' counter is included in the hash
//! assert_eq!(credential.to_string(), r#"Digest username="Mufasa", realm="http-auth@example.org", nonce="7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v", uri="/dir/index.html", qop=auth, nc=00000002, cnonce="f2/wE4q74E6zIJEtWaHKaf5wv/H5QzzpXusqGemxURZJ", response="4b5d595ecf2db9df612ea5b45cd97101", opaque="FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS""#);
//! ```
//!
//! Letting the transport do it:
//!
//! ```
//! use digest_transport::{transport_fn, Body, DigestTransport, Transport};
//! use http::{header, Request, Response, StatusCode};
//!
//! // Stand-in for a real HTTP client
//! let client = transport_fn(|request: Request<Body>| {
//!     let response = if request.headers().contains_key(header::AUTHORIZATION) {
//!         Response::new("secret stuff")
//!     } else {
//!         Response::builder()
//!             .status(StatusCode::UNAUTHORIZED)
//!             .header(header::WWW_AUTHENTICATE, r#"Digest realm="cam", qop="auth", nonce="abc""#)
//!             .body("")
//!             .unwrap()
//!     };
//!     Ok::<_, std::io::Error>(response)
//! });
//!
//! let transport = DigestTransport::new("admin", "1234", client);
//! let response = transport.send(Request::new(Body::empty())).unwrap();
//! assert_eq!(response.status(), StatusCode::OK);
//! assert!(transport.is_authenticated());
//! ```

mod body;
mod challenge;
mod credential;
mod enums;
mod error;
mod transport;
mod utils;

pub use error::{Error, Result, SendError};

pub use crate::body::Body;
pub use crate::challenge::{parse_header_map, Challenge};
pub use crate::credential::{AuthContext, Credential};
pub use crate::transport::{transport_fn, DigestTransport, FnTransport, Transport};

pub use crate::enums::*;

/// Parse the WWW-Authenticate header value.
/// It's just a convenience method to call [`Challenge::parse()`](struct.Challenge.html#method.parse).
pub fn parse(www_authenticate: &str) -> Result<Challenge> {
    Challenge::parse(www_authenticate)
}

#[test]
fn test_parse_respond() {
    let src = r#"
    Digest
       realm="http-auth@example.org",
       qop="auth, auth-int",
       algorithm=MD5,
       nonce="7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v",
       opaque="FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS"
    "#;

    let mut context = AuthContext::new("Mufasa", "Circle of Life", "/dir/index.html");
    context.set_custom_cnonce("f2/wE4q74E6zIJEtWaHKaf5wv/H5QzzpXusqGemxURZJ");

    let prompt = crate::parse(src).unwrap();
    let answer = prompt.respond(&context).unwrap();

    let str = answer.to_string().replace(", ", ",\n  ");

    assert_eq!(
        str,
        r#"
Digest username="Mufasa",
  realm="http-auth@example.org",
  nonce="7ypf/xlj9XXwfDPEoM4URrv/xwf94BcCAzFZH4GiTo0v",
  uri="/dir/index.html",
  qop=auth,
  nc=00000001,
  cnonce="f2/wE4q74E6zIJEtWaHKaf5wv/H5QzzpXusqGemxURZJ",
  response="8ca523f5e9506fed4657c9700eebdbec",
  opaque="FQhe/qaU925kfnzjCev0ciny7QMkPqMAFRtzCUYo5tdS"
"#
        .trim()
    );
}
