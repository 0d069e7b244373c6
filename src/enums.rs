use crate::{Error, Error::*, Result};
use std::fmt;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

use digest::{Digest, DynDigest};
use md5::Md5;
use sha2::{Sha256, Sha512_256};

/// Algorithm type
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[allow(non_camel_case_types)]
pub enum AlgorithmType {
    MD5,
    SHA2_256,
    SHA2_512_256,
}

impl AlgorithmType {
    fn hasher(self) -> Box<dyn DynDigest> {
        match self {
            AlgorithmType::MD5 => Box::new(Md5::new()),
            AlgorithmType::SHA2_256 => Box::new(Sha256::new()),
            AlgorithmType::SHA2_512_256 => Box::new(Sha512_256::new()),
        }
    }
}

/// Algorithm and the -sess flag pair
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub struct Algorithm {
    pub algo: AlgorithmType,
    pub sess: bool,
}

/// Every algorithm token a server may announce, with what it maps to
const ALGORITHMS: [(&str, AlgorithmType, bool); 6] = [
    ("MD5", AlgorithmType::MD5, false),
    ("MD5-sess", AlgorithmType::MD5, true),
    ("SHA-256", AlgorithmType::SHA2_256, false),
    ("SHA-256-sess", AlgorithmType::SHA2_256, true),
    ("SHA-512-256", AlgorithmType::SHA2_512_256, false),
    ("SHA-512-256-sess", AlgorithmType::SHA2_512_256, true),
];

impl Algorithm {
    /// Compose from algorithm type and the -sess flag
    pub fn new(algo: AlgorithmType, sess: bool) -> Algorithm {
        Algorithm { algo, sess }
    }

    /// Calculate a hash of bytes using the selected algorithm
    pub fn hash(self, bytes: &[u8]) -> String {
        let mut hash = self.algo.hasher();
        hash.update(bytes);
        hex::encode(hash.finalize())
    }

    /// Calculate a hash of string's bytes using the selected algorithm
    pub fn hash_str(self, bytes: &str) -> String {
        self.hash(bytes.as_bytes())
    }

    /// The token used for this algorithm in HTTP headers
    pub fn as_str(self) -> &'static str {
        ALGORITHMS
            .iter()
            .find(|(_, algo, sess)| *algo == self.algo && *sess == self.sess)
            .map(|(name, _, _)| *name)
            .unwrap_or("MD5")
    }
}

impl FromStr for Algorithm {
    type Err = Error;

    /// Parse from the format used in WWW-Authorization (case-insensitive)
    fn from_str(s: &str) -> Result<Self> {
        ALGORITHMS
            .iter()
            .find(|(name, _, _)| name.eq_ignore_ascii_case(s))
            .map(|&(_, algo, sess)| Algorithm::new(algo, sess))
            .ok_or_else(|| UnknownAlgorithm(s.into()))
    }
}

impl Default for Algorithm {
    /// Get a MD5 instance
    fn default() -> Self {
        Algorithm::new(AlgorithmType::MD5, false)
    }
}

impl Display for Algorithm {
    /// Format to the form used in HTTP headers
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// QOP field values
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
#[allow(non_camel_case_types)]
pub enum Qop {
    AUTH,
    AUTH_INT,
}

impl FromStr for Qop {
    type Err = Error;

    /// Parse from "auth" or "auth-int" as used in HTTP headers
    fn from_str(s: &str) -> Result<Self> {
        if s.eq_ignore_ascii_case("auth") {
            Ok(Qop::AUTH)
        } else if s.eq_ignore_ascii_case("auth-int") {
            Ok(Qop::AUTH_INT)
        } else {
            Err(BadQop(s.into()))
        }
    }
}

impl Display for Qop {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Qop::AUTH => "auth",
            Qop::AUTH_INT => "auth-int",
        })
    }
}

/// Charset field value as specified by the server
#[derive(Debug, PartialEq, Eq, Clone, Copy, Default)]
pub enum Charset {
    #[default]
    ASCII,
    UTF8,
}

impl From<&str> for Charset {
    /// Only UTF-8 is defined for the charset directive; anything else is treated as the default
    fn from(s: &str) -> Self {
        if s.eq_ignore_ascii_case("UTF-8") {
            Charset::UTF8
        } else {
            Charset::ASCII
        }
    }
}

impl Display for Charset {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Charset::ASCII => "ASCII",
            Charset::UTF8 => "UTF-8",
        })
    }
}

/// HTTP method (used when generating the response hash for some Qop options)
#[derive(Debug, Clone, Copy, Default)]
pub enum HttpMethod<'a> {
    #[default]
    GET,
    POST,
    HEAD,
    OTHER(&'a str),
}

impl<'a> From<&'a http::Method> for HttpMethod<'a> {
    fn from(method: &'a http::Method) -> Self {
        HttpMethod::from(method.as_str())
    }
}

impl<'a> From<&'a str> for HttpMethod<'a> {
    fn from(method: &'a str) -> Self {
        match method {
            "GET" => HttpMethod::GET,
            "POST" => HttpMethod::POST,
            "HEAD" => HttpMethod::HEAD,
            other => HttpMethod::OTHER(other),
        }
    }
}

impl<'a> Display for HttpMethod<'a> {
    /// Convert to uppercase string
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HttpMethod::GET => "GET",
            HttpMethod::POST => "POST",
            HttpMethod::HEAD => "HEAD",
            HttpMethod::OTHER(s) => s,
        })
    }
}
