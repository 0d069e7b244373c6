use crate::utils::QuoteForDigest;
use crate::{Algorithm, Challenge, Error::*, HttpMethod, Qop, Result};
use rand::Rng;
use std::fmt::{self, Display, Formatter};

/// Login attempt context
///
/// All fields are borrowed to reduce runtime overhead; this struct should not be stored anywhere,
/// it is normally meaningful only for the one request.
#[derive(Debug, Clone)]
pub struct AuthContext<'a> {
    /// Login username
    pub username: &'a str,
    /// Login password (plain)
    pub password: &'a str,
    /// Requested URI (not a domain! should start with a slash)
    pub uri: &'a str,
    /// Request payload body - used for auth-int (auth with integrity check)
    /// May be left out if not using auth-int
    pub body: Option<&'a [u8]>,
    /// HTTP method used (defaults to GET)
    pub method: HttpMethod<'a>,
    /// Spoofed client nonce (use only for tests; a random nonce is generated automatically)
    pub cnonce: Option<&'a str>,
}

impl<'a> AuthContext<'a> {
    /// Construct a new context with the GET verb and no payload body.
    /// See the other constructors if this does not fit your situation.
    pub fn new(username: &'a str, password: &'a str, uri: &'a str) -> Self {
        Self::new_with_method(username, password, uri, None, HttpMethod::GET)
    }

    /// Construct a new context with the POST verb and a payload body (may be None).
    /// See the other constructors if this does not fit your situation.
    pub fn new_post(
        username: &'a str,
        password: &'a str,
        uri: &'a str,
        body: Option<&'a [u8]>,
    ) -> Self {
        Self::new_with_method(username, password, uri, body, HttpMethod::POST)
    }

    /// Construct a new context with arbitrary verb and, optionally, a payload body
    pub fn new_with_method(
        username: &'a str,
        password: &'a str,
        uri: &'a str,
        body: Option<&'a [u8]>,
        method: HttpMethod<'a>,
    ) -> Self {
        Self {
            username,
            password,
            uri,
            body,
            method,
            cnonce: None,
        }
    }

    pub fn set_custom_cnonce(&mut self, cnonce: &'a str) {
        self.cnonce = Some(cnonce);
    }

    fn cnonce_or_random(&self) -> String {
        match self.cnonce {
            Some(cnonce) => cnonce.to_owned(),
            None => {
                let nonce_bytes: [u8; 16] = rand::thread_rng().gen();
                hex::encode(nonce_bytes)
            }
        }
    }
}

/// Negotiated authorization for one challenge, advanced for every request sent under it.
///
/// Obtained with [`Credential::build()`] (or [`Challenge::respond()`]), then moved on to the next
/// request with [`Credential::refresh()`]. The `Display` impl renders the `Authorization` header value.
#[derive(Clone)]
pub struct Credential {
    /// Username or hash (owned because of the computed hash)
    pub username: String,
    pub realm: String,
    pub nonce: String,
    pub opaque: Option<String>,
    pub algorithm: Algorithm,
    pub userhash: bool,
    /// Requested URI of the request this credential was last computed for
    pub uri: String,
    /// QOP chosen from the list offered by server, if any
    /// None in legacy compat mode (RFC 2069)
    pub qop: Option<Qop>,
    /// Client nonce
    /// None in legacy compat mode (RFC 2069), unless a -sess algorithm needs it
    pub cnonce: Option<String>,
    /// How many requests have been signed with this server nonce, starting at 1
    pub nc: u32,
    /// Computed digest
    pub response: String,
    /// H(A1), already in session form for -sess algorithms
    ha1: String,
}

impl Credential {
    /// Construct using a parsed challenge and an auth context, selecting suitable algorithm
    /// options. The result is ready to be sent as the first authorized request (nc=1).
    ///
    /// # Errors
    ///
    /// Fails if the challenge offers qop options, but none we can use
    pub fn build(challenge: &Challenge, context: &AuthContext<'_>) -> Result<Credential> {
        // "auth" is preferred; "auth-int" makes us hash the whole body
        let qop = match &challenge.qop {
            None => None,
            Some(list) if list.contains(&Qop::AUTH) => Some(Qop::AUTH),
            Some(list) if list.contains(&Qop::AUTH_INT) => Some(Qop::AUTH_INT),
            Some(list) => return Err(BadQopOptions(format!("{:?}", list))),
        };

        let h = challenge.algorithm;

        let cnonce = if qop.is_some() || h.sess {
            Some(context.cnonce_or_random())
        } else {
            None
        };

        let ha1 = {
            let a1 = h.hash_str(&format!(
                "{name}:{realm}:{pw}",
                name = context.username,
                realm = challenge.realm,
                pw = context.password
            ));

            match (&cnonce, h.sess) {
                (Some(cnonce), true) => h.hash_str(&format!(
                    "{hash}:{nonce}:{cnonce}",
                    hash = a1,
                    nonce = challenge.nonce,
                    cnonce = cnonce
                )),
                _ => a1,
            }
        };

        // hashed or unhashed username - always hash if server wants it
        let username = if challenge.userhash {
            h.hash_str(&format!(
                "{username}:{realm}",
                username = context.username,
                realm = challenge.realm
            ))
        } else {
            context.username.to_owned()
        };

        let mut credential = Credential {
            username,
            realm: challenge.realm.clone(),
            nonce: challenge.nonce.clone(),
            opaque: challenge.opaque.clone(),
            algorithm: h,
            userhash: challenge.userhash,
            uri: String::new(),
            qop,
            cnonce,
            nc: 1,
            response: String::new(),
            ha1,
        };
        credential.compute(context);
        Ok(credential)
    }

    /// Advance to the next request under the same nonce: nc is incremented and the response is
    /// recomputed for the method, URI and body in `context`.
    ///
    /// The cnonce is rotated for plain algorithms; -sess algorithms keep it, because the
    /// session H(A1) was derived from it. Username and password in `context` are not used,
    /// they were bound by [`Credential::build()`].
    ///
    /// The counter stops at `u32::MAX`, see [`Credential::is_exhausted()`].
    pub fn refresh(&mut self, context: &AuthContext<'_>) {
        self.nc = self.nc.saturating_add(1);
        if self.qop.is_some() && !self.algorithm.sess {
            self.cnonce = Some(context.cnonce_or_random());
        }
        self.compute(context);
    }

    /// True once nc reached its last value; the next request needs a new nonce
    pub fn is_exhausted(&self) -> bool {
        self.nc == u32::MAX
    }

    /// True if the chosen qop is auth-int, i.e. the request body takes part in the hash
    pub fn needs_body(&self) -> bool {
        self.qop == Some(Qop::AUTH_INT)
    }

    /// Produce a header string (also accessible through the Display trait)
    pub fn to_header_string(&self) -> String {
        self.to_string()
    }

    fn compute(&mut self, context: &AuthContext<'_>) {
        let h = self.algorithm;

        let a2 = match self.qop {
            Some(Qop::AUTH_INT) => format!(
                "{method}:{uri}:{bodyhash}",
                method = context.method,
                uri = context.uri,
                bodyhash = h.hash(context.body.unwrap_or_default())
            ),
            _ => format!("{method}:{uri}", method = context.method, uri = context.uri),
        };
        let ha2 = h.hash_str(&a2);

        self.response = match (&self.qop, &self.cnonce) {
            (Some(q), Some(cnonce)) => h.hash_str(&format!(
                "{ha1}:{nonce}:{nc:08x}:{cnonce}:{qop}:{ha2}",
                ha1 = self.ha1,
                nonce = self.nonce,
                nc = self.nc,
                cnonce = cnonce,
                qop = q,
                ha2 = ha2
            )),
            _ => h.hash_str(&format!(
                "{ha1}:{nonce}:{ha2}",
                ha1 = self.ha1,
                nonce = self.nonce,
                ha2 = ha2
            )),
        };
        self.uri = context.uri.to_owned();
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("username", &self.username)
            .field("realm", &self.realm)
            .field("nonce", &self.nonce)
            .field("algorithm", &self.algorithm)
            .field("qop", &self.qop)
            .field("uri", &self.uri)
            .field("nc", &self.nc)
            .finish_non_exhaustive()
    }
}

impl Display for Credential {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str("Digest ")?;

        write!(f, "username=\"{}\"", self.username.quote_for_digest())?;
        write!(f, ", realm=\"{}\"", self.realm.quote_for_digest())?;
        write!(f, ", nonce=\"{}\"", self.nonce.quote_for_digest())?;
        write!(f, ", uri=\"{}\"", self.uri.quote_for_digest())?;

        if let (Some(qop), Some(cnonce)) = (&self.qop, &self.cnonce) {
            write!(
                f,
                ", qop={qop}, nc={nc:08x}, cnonce=\"{cnonce}\"",
                qop = qop,
                cnonce = cnonce.quote_for_digest(),
                nc = self.nc
            )?;
        }

        write!(f, ", response=\"{}\"", self.response)?;

        if let Some(opaque) = &self.opaque {
            write!(f, ", opaque=\"{}\"", opaque.quote_for_digest())?;
        }

        // algorithm can be omitted if it is the default value
        if self.algorithm != Algorithm::default() {
            write!(f, ", algorithm={}", self.algorithm)?;
        }

        if self.userhash {
            f.write_str(", userhash=true")?;
        }

        Ok(())
    }
}
