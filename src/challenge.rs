use crate::credential::{AuthContext, Credential};
use crate::{Algorithm, Charset, Error, Error::*, Qop, Result};
use http::header::{HeaderMap, WWW_AUTHENTICATE};
use std::collections::HashMap;
use std::str::FromStr;

/// The only auth scheme this crate answers
const SCHEME: &str = "Digest";

/// Digest challenge parsed from a `WWW-Authenticate` header value
#[derive(Debug, PartialEq, Eq, Clone)]
pub struct Challenge {
    /// Domain is a list of URIs that will accept the same digest. None if not given (i.e applies to all)
    pub domain: Option<Vec<String>>,
    /// Authorization realm (i.e. hostname, serial number...)
    pub realm: String,
    /// Server nonce
    pub nonce: String,
    /// Server opaque string
    pub opaque: Option<String>,
    /// True if the server nonce expired.
    /// This is sent in response to an auth attempt with an older digest.
    pub stale: bool,
    /// Hashing algo
    pub algorithm: Algorithm,
    /// Digest algorithm variant; None in legacy compat mode (RFC 2069).
    /// Tokens we don't understand are left out, so this may be an empty list.
    pub qop: Option<Vec<Qop>>,
    /// Flag that the server supports user-hashes
    pub userhash: bool,
    /// Server-supported charset
    pub charset: Charset,
}

impl Challenge {
    /// Compute the first [`Credential`] answering this challenge (nc=1).
    pub fn respond(&self, context: &AuthContext<'_>) -> Result<Credential> {
        Credential::build(self, context)
    }

    /// Construct from the `WWW-Authenticate` header string
    ///
    /// # Errors
    /// If the scheme is not Digest, or the header is malformed (e.g. missing 'realm',
    /// missing a closing quote, unknown algorithm etc.)
    pub fn parse(input: &str) -> Result<Self> {
        let input = input.trim();
        let (scheme, rest) = match input.find(|c: char| c.is_ascii_whitespace()) {
            Some(pos) => input.split_at(pos),
            None => (input, ""),
        };

        if !scheme.eq_ignore_ascii_case(SCHEME) {
            return Err(UnsupportedScheme(scheme.to_string()));
        }

        let mut kv = parse_header_map(rest)?;

        let algorithm = match kv.get("algorithm") {
            Some(a) => Algorithm::from_str(a)?,
            _ => Algorithm::default(),
        };

        Ok(Self {
            domain: kv.get("domain").map(|domains| {
                domains
                    .split_ascii_whitespace()
                    .map(ToString::to_string)
                    .collect()
            }),
            realm: match kv.remove("realm") {
                Some(v) if !v.is_empty() => v,
                _ => return Err(MissingRequired("realm", input.into())),
            },
            nonce: match kv.remove("nonce") {
                Some(v) if !v.is_empty() => v,
                _ => return Err(MissingRequired("nonce", input.into())),
            },
            opaque: kv.remove("opaque"),
            stale: is_true(kv.get("stale")),
            charset: kv
                .get("charset")
                .map(|v| Charset::from(v.as_str()))
                .unwrap_or_default(),
            algorithm,
            qop: kv.get("qop").map(|list| parse_qop_list(list)),
            userhash: is_true(kv.get("userhash")),
        })
    }

    /// Find and parse the Digest challenge among the `WWW-Authenticate` headers of a response.
    ///
    /// Returns `None` if there is no `WWW-Authenticate` header at all. When there are several
    /// (one per offered scheme), the first Digest one wins; if none is Digest, the error for
    /// the first header is returned. Headers that are not valid UTF-8 are skipped the same way.
    pub fn from_headers(headers: &HeaderMap) -> Option<Result<Self>> {
        let mut first = None;
        for value in headers.get_all(WWW_AUTHENTICATE) {
            let parsed = match value.to_str() {
                Ok(value) => Self::parse(value),
                Err(_) => {
                    let lossy = String::from_utf8_lossy(value.as_bytes()).into_owned();
                    first.get_or_insert(Err(InvalidHeaderSyntax(lossy)));
                    continue;
                }
            };

            match parsed {
                Err(UnsupportedScheme(_)) => {
                    first.get_or_insert(parsed);
                }
                _ => return Some(parsed),
            }
        }
        first
    }
}

impl FromStr for Challenge {
    type Err = Error;

    /// Parse HTTP header
    fn from_str(input: &str) -> Result<Self> {
        Self::parse(input)
    }
}

fn is_true(value: Option<&String>) -> bool {
    value.map_or(false, |v| v.eq_ignore_ascii_case("true"))
}

/// Split the qop list on commas and/or whitespace, skipping tokens we don't implement
fn parse_qop_list(list: &str) -> Vec<Qop> {
    let mut qops = vec![];
    for token in list
        .split(|c: char| c == ',' || c.is_ascii_whitespace())
        .filter(|t| !t.is_empty())
    {
        match Qop::from_str(token) {
            Ok(q) if !qops.contains(&q) => qops.push(q),
            Ok(_) => {}
            Err(_) => tracing::trace!(token, "ignoring unknown qop option"),
        }
    }
    qops
}

/// Helper func that parses the key-value string received from server.
/// Keys are lowercased, quoted values are unescaped.
pub fn parse_header_map(input: &str) -> Result<HashMap<String, String>> {
    #[derive(Debug)]
    #[allow(non_camel_case_types)]
    enum ParserState {
        P_WHITE,
        P_NAME(usize),
        P_NAME_END,
        P_VALUE_BEGIN,
        P_VALUE_QUOTED,
        P_VALUE_QUOTED_NEXTLITERAL,
        P_VALUE_PLAIN,
    }

    let mut state = ParserState::P_WHITE;

    let mut parsed = HashMap::<String, String>::new();
    let mut current_token = String::new();
    let mut current_value = String::new();

    let syntax_error = |pos: usize| InvalidHeaderSyntax(format!("{} (at byte {})", input, pos));

    for (pos, c) in input.char_indices() {
        match state {
            ParserState::P_WHITE => {
                if c.is_alphanumeric() || c == '-' || c == '_' {
                    state = ParserState::P_NAME(pos);
                } else if c != ',' && !c.is_whitespace() {
                    return Err(syntax_error(pos));
                }
            }
            ParserState::P_NAME(name_start) => {
                if c == '=' || c.is_whitespace() {
                    current_token = input[name_start..pos].to_ascii_lowercase();
                    state = if c == '=' {
                        ParserState::P_VALUE_BEGIN
                    } else {
                        ParserState::P_NAME_END
                    };
                } else if c == ',' || c == '"' {
                    return Err(syntax_error(pos));
                }
            }
            ParserState::P_NAME_END => {
                if c == '=' {
                    state = ParserState::P_VALUE_BEGIN;
                } else if !c.is_whitespace() {
                    return Err(syntax_error(pos));
                }
            }
            ParserState::P_VALUE_BEGIN => {
                current_value.clear();
                match c {
                    '"' => state = ParserState::P_VALUE_QUOTED,
                    ',' => return Err(syntax_error(pos)),
                    _ if c.is_whitespace() => {}
                    _ => {
                        current_value.push(c);
                        state = ParserState::P_VALUE_PLAIN;
                    }
                }
            }
            ParserState::P_VALUE_QUOTED => match c {
                '"' => {
                    parsed.insert(
                        std::mem::take(&mut current_token),
                        std::mem::take(&mut current_value),
                    );
                    state = ParserState::P_WHITE;
                }
                '\\' => {
                    state = ParserState::P_VALUE_QUOTED_NEXTLITERAL;
                }
                _ => {
                    current_value.push(c);
                }
            },
            ParserState::P_VALUE_PLAIN => {
                if c == ',' || c.is_whitespace() {
                    parsed.insert(
                        std::mem::take(&mut current_token),
                        std::mem::take(&mut current_value),
                    );
                    state = ParserState::P_WHITE;
                } else {
                    current_value.push(c);
                }
            }
            ParserState::P_VALUE_QUOTED_NEXTLITERAL => {
                current_value.push(c);
                state = ParserState::P_VALUE_QUOTED
            }
        }
    }

    match state {
        ParserState::P_VALUE_PLAIN => {
            parsed.insert(current_token, current_value); // consume the value here
        }
        ParserState::P_WHITE => {}
        _ => {
            return Err(InvalidHeaderSyntax(format!(
                "{} (unexpected end in state {:?})",
                input, state
            )))
        }
    }

    Ok(parsed)
}
