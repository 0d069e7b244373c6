use digest_transport::{
    parse_header_map, transport_fn, Algorithm, Body, DigestTransport, Error, SendError, Transport,
};
use http::header::{AUTHORIZATION, WWW_AUTHENTICATE};
use http::{Method, Request, Response, StatusCode};
use std::collections::{HashMap, HashSet};
use std::io::{self, Cursor, Read};
use std::str::FromStr;
use std::sync::Mutex;
use std::thread;
use tracing_test::traced_test;

const USER: &str = "test";
const PASSWORD: &str = "test123";
const REALM: &str = "test";

/// What the server saw of one request
#[derive(Debug, Clone)]
struct Seen {
    method: Method,
    uri: String,
    authorization: Option<HashMap<String, String>>,
    body: Vec<u8>,
}

struct ServerState {
    nonce: String,
    expired: Vec<String>,
    used: HashSet<(String, String, String)>,
    seen: Vec<Seen>,
}

/// In-memory server checking digests the way a real one would
struct MockServer {
    qop: &'static str,
    algorithm: Algorithm,
    password: &'static str,
    /// Bytes of the body read before answering an unauthenticated request
    probe_read: Option<usize>,
    state: Mutex<ServerState>,
}

impl MockServer {
    fn new(qop: &'static str, algorithm: &str) -> Self {
        MockServer {
            qop,
            algorithm: Algorithm::from_str(algorithm).unwrap(),
            password: PASSWORD,
            probe_read: None,
            state: Mutex::new(ServerState {
                nonce: "abc123".into(),
                expired: vec![],
                used: HashSet::new(),
                seen: vec![],
            }),
        }
    }

    fn expire_nonce(&self, new_nonce: &str) {
        let mut state = self.state.lock().unwrap();
        let old = std::mem::replace(&mut state.nonce, new_nonce.into());
        state.expired.push(old);
    }

    fn seen(&self) -> Vec<Seen> {
        self.state.lock().unwrap().seen.clone()
    }

    fn challenge(&self, nonce: &str, stale: bool) -> Response<String> {
        let header = format!(
            r#"Digest realm="{}", qop="{}", nonce="{}", opaque="5ccc069c", algorithm={}{}"#,
            REALM,
            self.qop,
            nonce,
            self.algorithm,
            if stale { ", stale=true" } else { "" }
        );
        Response::builder()
            .status(StatusCode::UNAUTHORIZED)
            .header(WWW_AUTHENTICATE, header)
            .body(String::new())
            .unwrap()
    }

    fn expected_response(&self, seen: &Seen, auth: &HashMap<String, String>) -> String {
        let h = self.algorithm;
        let mut ha1 = h.hash_str(&format!("{}:{}:{}", USER, REALM, self.password));
        if h.sess {
            ha1 = h.hash_str(&format!("{}:{}:{}", ha1, auth["nonce"], auth["cnonce"]));
        }
        let ha2 = if auth["qop"] == "auth-int" {
            h.hash_str(&format!("{}:{}:{}", seen.method, seen.uri, h.hash(&seen.body)))
        } else {
            h.hash_str(&format!("{}:{}", seen.method, seen.uri))
        };
        h.hash_str(&format!(
            "{}:{}:{}:{}:{}:{}",
            ha1, auth["nonce"], auth["nc"], auth["cnonce"], auth["qop"], ha2
        ))
    }
}

impl Transport for MockServer {
    type ResponseBody = String;
    type Error = io::Error;

    fn send(&self, request: Request<Body>) -> Result<Response<String>, io::Error> {
        let authorization = request.headers().get(AUTHORIZATION).map(|value| {
            let value = value.to_str().unwrap();
            parse_header_map(value.strip_prefix("Digest ").unwrap()).unwrap()
        });

        let (parts, mut body) = request.into_parts();
        let mut bytes = vec![];
        match (self.probe_read, &authorization) {
            (Some(n), None) => {
                bytes.resize(n, 0);
                body.read_exact(&mut bytes)?;
            }
            _ => {
                body.read_to_end(&mut bytes)?;
            }
        }

        let seen = Seen {
            method: parts.method,
            uri: parts
                .uri
                .path_and_query()
                .map_or("/", |pq| pq.as_str())
                .to_string(),
            authorization: authorization.clone(),
            body: bytes,
        };

        let mut state = self.state.lock().unwrap();
        state.seen.push(seen.clone());
        let nonce = state.nonce.clone();

        let auth = match authorization {
            None => return Ok(self.challenge(&nonce, false)),
            Some(auth) => auth,
        };

        assert_eq!(auth["username"], USER);
        assert_eq!(auth["realm"], REALM);
        assert_eq!(auth["opaque"], "5ccc069c");
        assert_eq!(auth["uri"], seen.uri);

        if state.expired.contains(&auth["nonce"]) {
            return Ok(self.challenge(&nonce, true));
        }
        if auth["nonce"] != nonce || auth["response"] != self.expected_response(&seen, &auth) {
            return Ok(self.challenge(&nonce, false));
        }
        let key = (
            auth["nonce"].clone(),
            auth["nc"].clone(),
            auth["cnonce"].clone(),
        );
        if !state.used.insert(key) {
            return Ok(self.challenge(&nonce, false));
        }

        Ok(Response::new(format!("hello {}", auth["nc"])))
    }
}

fn get(uri: &str) -> Request<Body> {
    Request::get(uri).body(Body::empty()).unwrap()
}

fn nc_of(seen: &Seen) -> &str {
    &seen.authorization.as_ref().unwrap()["nc"]
}

#[test]
fn test_negotiates_then_reuses() {
    let transport = DigestTransport::new(USER, PASSWORD, MockServer::new("auth", "MD5"));

    let response = transport.send(get("http://camera.local/resource")).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "hello 00000001");
    assert!(transport.is_authenticated());
    assert_eq!(transport.challenge().unwrap().nonce, "abc123");

    let seen = transport.inner().seen();
    assert_eq!(seen.len(), 2);
    assert!(seen[0].authorization.is_none());
    assert_eq!(nc_of(&seen[1]), "00000001");
    assert_eq!(seen[1].authorization.as_ref().unwrap()["uri"], "/resource");

    // preemptive: a single round-trip with the next nonce count
    let response = transport.send(get("http://camera.local/other?x=1")).unwrap();
    assert_eq!(response.body(), "hello 00000002");

    let seen = transport.inner().seen();
    assert_eq!(seen.len(), 3);
    assert_eq!(nc_of(&seen[2]), "00000002");
    assert_eq!(seen[2].authorization.as_ref().unwrap()["uri"], "/other?x=1");
}

#[test]
fn test_no_credentials_without_challenge() {
    let transport = DigestTransport::new(
        USER,
        PASSWORD,
        transport_fn(|request: Request<Body>| {
            assert!(!request.headers().contains_key(AUTHORIZATION));
            Ok::<_, io::Error>(Response::new("public"))
        }),
    );

    for _ in 0..3 {
        let response = transport.send(get("/")).unwrap();
        assert_eq!(*response.body(), "public");
    }
    assert!(!transport.is_authenticated());
    assert!(transport.challenge().is_none());
}

#[test]
#[traced_test]
fn test_stale_nonce_renegotiates() {
    let transport = DigestTransport::new(USER, PASSWORD, MockServer::new("auth", "MD5"));

    transport.send(get("/a")).unwrap();
    transport.send(get("/a")).unwrap();
    transport.inner().expire_nonce("def456");

    let response = transport.send(get("/b")).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.body(), "hello 00000001");
    assert!(logs_contain("nonce is stale"));

    let seen = transport.inner().seen();
    assert_eq!(seen.len(), 5);
    assert_eq!(seen[3].authorization.as_ref().unwrap()["nonce"], "abc123");
    assert_eq!(nc_of(&seen[3]), "00000003");
    assert_eq!(seen[4].authorization.as_ref().unwrap()["nonce"], "def456");
    assert_eq!(nc_of(&seen[4]), "00000001");
    assert_eq!(transport.challenge().unwrap().nonce, "def456");

    transport.send(get("/c")).unwrap();
    let seen = transport.inner().seen();
    assert_eq!(seen.len(), 6);
    assert_eq!(nc_of(&seen[5]), "00000002");
}

#[test]
fn test_missing_challenge_header() {
    let transport = DigestTransport::new(
        USER,
        PASSWORD,
        transport_fn(|_: Request<Body>| {
            Ok::<_, io::Error>(
                Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .body(())
                    .unwrap(),
            )
        }),
    );

    match transport.send(get("/")) {
        Err(SendError::ChallengeMissing) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(!transport.is_authenticated());
}

#[test]
fn test_malformed_challenge() {
    let transport = DigestTransport::new(
        USER,
        PASSWORD,
        transport_fn(|_: Request<Body>| {
            Ok::<_, io::Error>(
                Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .header(WWW_AUTHENTICATE, r#"Digest realm="r", qop="auth""#)
                    .body(())
                    .unwrap(),
            )
        }),
    );

    match transport.send(get("/")) {
        Err(SendError::Digest(Error::MissingRequired("nonce", _))) => {}
        other => panic!("unexpected {:?}", other),
    }
}

#[test]
fn test_transport_error_passed_through() {
    let transport = DigestTransport::new(
        USER,
        PASSWORD,
        transport_fn(|_: Request<Body>| {
            Err::<Response<()>, _>(io::Error::new(io::ErrorKind::ConnectionRefused, "nope"))
        }),
    );

    let err = transport.send(get("/")).unwrap_err();
    let err = err.into_transport().unwrap();
    assert_eq!(err.kind(), io::ErrorKind::ConnectionRefused);
}

#[test]
fn test_wrong_password_not_retried_twice() {
    let mut server = MockServer::new("auth", "MD5");
    server.password = "something else";
    let transport = DigestTransport::new(USER, PASSWORD, server);

    let response = transport.send(get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(transport.inner().seen().len(), 2);
    assert!(!transport.is_authenticated());
}

#[test]
fn test_rejected_cached_credential_is_dropped() {
    let transport = DigestTransport::new(USER, PASSWORD, MockServer::new("auth", "MD5"));
    transport.send(get("/")).unwrap();
    assert!(transport.is_authenticated());

    // the server forgets the nonce without calling it stale
    transport.inner().state.lock().unwrap().nonce = "other".into();

    let response = transport.send(get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(transport.inner().seen().len(), 3);
    assert!(!transport.is_authenticated());
    assert!(transport.challenge().is_none());

    // and the next request starts over
    let response = transport.send(get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let seen = transport.inner().seen();
    assert_eq!(seen.len(), 5);
    assert!(seen[3].authorization.is_none());
    assert_eq!(nc_of(&seen[4]), "00000001");
}

#[test]
fn test_stream_body_replayed() {
    let mut server = MockServer::new("auth", "SHA-256");
    server.probe_read = Some(4);
    let transport = DigestTransport::new(USER, PASSWORD, server);

    let payload = b"{\"pan\": 10, \"tilt\": -5}".to_vec();
    let request = Request::post("/ptz")
        .body(Body::from_reader(Cursor::new(payload.clone())))
        .unwrap();

    let response = transport.send(request).unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let seen = transport.inner().seen();
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].body, &payload[..4]);
    assert_eq!(seen[1].body, payload);
    assert_eq!(seen[1].method, Method::POST);
}

#[test]
fn test_fresh_copy_body() {
    let transport = DigestTransport::new(USER, PASSWORD, MockServer::new("auth", "MD5"));

    let request = Request::put("/config")
        .body(Body::replayable(|| Ok(Body::from("mode=night"))))
        .unwrap();
    transport.send(request).unwrap();

    let seen = transport.inner().seen();
    assert_eq!(seen[0].body, b"mode=night");
    assert_eq!(seen[1].body, b"mode=night");
}

#[test]
fn test_auth_int() {
    let transport = DigestTransport::new(USER, PASSWORD, MockServer::new("auth-int", "MD5-sess"));

    for body in &["first", "second"] {
        let request = Request::post("/upload")
            .body(Body::from_reader(Cursor::new(body.as_bytes().to_vec())))
            .unwrap();
        let response = transport.send(request).unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    let seen = transport.inner().seen();
    assert_eq!(seen.len(), 3);
    assert_eq!(seen[1].authorization.as_ref().unwrap()["qop"], "auth-int");
    assert_eq!(seen[1].body, b"first");
    assert_eq!(seen[2].body, b"second");
    // -sess keeps the client nonce
    assert_eq!(
        seen[1].authorization.as_ref().unwrap()["cnonce"],
        seen[2].authorization.as_ref().unwrap()["cnonce"]
    );
}

#[test]
fn test_concurrent_requests_never_share_nc() {
    let transport = DigestTransport::new(USER, PASSWORD, MockServer::new("auth", "SHA-512-256"));
    transport.send(get("/")).unwrap();

    thread::scope(|scope| {
        for t in 0..8 {
            let transport = &transport;
            scope.spawn(move || {
                for i in 0..25 {
                    let response = transport.send(get(&format!("/t{}/{}", t, i))).unwrap();
                    assert_eq!(response.status(), StatusCode::OK);
                }
            });
        }
    });

    let seen = transport.inner().seen();
    assert_eq!(seen.len(), 2 + 8 * 25);

    let mut counts: Vec<u32> = seen[1..]
        .iter()
        .map(|s| u32::from_str_radix(nc_of(s), 16).unwrap())
        .collect();
    counts.sort_unstable();
    assert_eq!(counts, (1..=201).collect::<Vec<u32>>());
}

#[test]
fn test_reset() {
    let transport = DigestTransport::new(USER, PASSWORD, MockServer::new("auth", "MD5"));
    transport.send(get("/")).unwrap();
    transport.reset();
    assert!(!transport.is_authenticated());

    transport.send(get("/")).unwrap();
    let seen = transport.inner().seen();
    assert_eq!(seen.len(), 4);
    assert!(seen[2].authorization.is_none());
}

fn unauthorized(nonce: &str, stale: bool) -> Response<&'static str> {
    let header = format!(
        r#"Digest realm="{}", qop="auth", nonce="{}"{}"#,
        REALM,
        nonce,
        if stale { ", stale=true" } else { "" }
    );
    Response::builder()
        .status(StatusCode::UNAUTHORIZED)
        .header(WWW_AUTHENTICATE, header)
        .body("")
        .unwrap()
}

fn nonce_of(request: &Request<Body>) -> Option<String> {
    request.headers().get(AUTHORIZATION).map(|value| {
        let value = value.to_str().unwrap().strip_prefix("Digest ").unwrap();
        parse_header_map(value).unwrap()["nonce"].clone()
    })
}

#[test]
fn test_rejected_renegotiation_drops_credential() {
    let nonces = Mutex::new(Vec::<Option<String>>::new());
    let transport = DigestTransport::new(
        USER,
        PASSWORD,
        transport_fn(|request: Request<Body>| {
            let nonce = nonce_of(&request);
            let mut nonces = nonces.lock().unwrap();
            let n1_used = nonces.iter().any(|n| n.as_deref() == Some("n1"));
            let first = nonces.is_empty();
            nonces.push(nonce.clone());

            Ok::<_, io::Error>(match nonce.as_deref() {
                None if first => unauthorized("n1", false),
                None => unauthorized("n3", false),
                Some("n1") if !n1_used => Response::new("ok"),
                Some("n1") => unauthorized("n2", true),
                Some("n3") => Response::new("ok"),
                _ => unauthorized("n3", false),
            })
        }),
    );

    assert_eq!(transport.send(get("/")).unwrap().status(), StatusCode::OK);
    assert!(transport.is_authenticated());

    // stale, and then the fresh nonce is refused too
    let response = transport.send(get("/")).unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    assert!(!transport.is_authenticated());
    assert!(transport.challenge().is_none());

    // the next request starts over with a single probe
    assert_eq!(transport.send(get("/")).unwrap().status(), StatusCode::OK);
    assert_eq!(transport.challenge().unwrap().nonce, "n3");

    let expected = [None, Some("n1"), Some("n1"), Some("n2"), None, Some("n3")];
    let nonces = nonces.lock().unwrap();
    assert_eq!(
        nonces.iter().map(Option::as_deref).collect::<Vec<_>>(),
        expected
    );
}

#[test]
fn test_missing_challenge_after_authentication() {
    let calls = Mutex::new(0);
    let transport = DigestTransport::new(
        USER,
        PASSWORD,
        transport_fn(|request: Request<Body>| {
            let mut calls = calls.lock().unwrap();
            *calls += 1;
            Ok::<_, io::Error>(match (*calls, nonce_of(&request)) {
                (_, None) => unauthorized("n1", false),
                (2, Some(_)) => Response::new("ok"),
                _ => Response::builder()
                    .status(StatusCode::UNAUTHORIZED)
                    .body("")
                    .unwrap(),
            })
        }),
    );

    assert_eq!(transport.send(get("/")).unwrap().status(), StatusCode::OK);
    assert!(transport.is_authenticated());

    match transport.send(get("/")) {
        Err(SendError::ChallengeMissing) => {}
        other => panic!("unexpected {:?}", other),
    }
    assert!(!transport.is_authenticated());
    assert_eq!(*calls.lock().unwrap(), 3);
}
