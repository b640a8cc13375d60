use crate::http::form::{FormData, form_data};

/// HTTP request methods.
///
/// Only GET and POST are routed; the others are recognised so they can be
/// answered with 405 instead of 501.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    /// GET - Retrieve a resource
    GET,
    /// POST - Create or submit data
    POST,
    /// PUT - Replace a resource
    PUT,
    /// DELETE - Delete a resource
    DELETE,
    /// HEAD - Like GET but without the response body
    HEAD,
    /// OPTIONS - Describe communication options
    OPTIONS,
    /// PATCH - Partial modification of a resource
    PATCH,
}

impl Method {
    /// Parses an HTTP method token (case-sensitive).
    ///
    /// # Example
    ///
    /// ```
    /// # use edgeserve::http::request::Method;
    /// assert_eq!(Method::from_str("GET"), Some(Method::GET));
    /// assert_eq!(Method::from_str("get"), None);
    /// ```
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "GET" => Some(Method::GET),
            "POST" => Some(Method::POST),
            "PUT" => Some(Method::PUT),
            "DELETE" => Some(Method::DELETE),
            "HEAD" => Some(Method::HEAD),
            "OPTIONS" => Some(Method::OPTIONS),
            "PATCH" => Some(Method::PATCH),
            _ => None,
        }
    }
}

/// Header fields in arrival order.
///
/// Names match exactly (case-sensitive) and may repeat; every name and value
/// is a slice of the buffer the request was read into.
#[derive(Debug, Clone, Default)]
pub struct Headers<'a> {
    entries: Vec<(&'a str, &'a str)>,
}

impl<'a> Headers<'a> {
    pub fn new() -> Self {
        Self { entries: Vec::new() }
    }

    pub fn push(&mut self, name: &'a str, value: &'a str) {
        self.entries.push((name, value));
    }

    /// First value for `name`.
    pub fn get(&self, name: &str) -> Option<&'a str> {
        self.get_all(name).next()
    }

    /// All values for `name`, in arrival order.
    pub fn get_all<'s>(&'s self, name: &'s str) -> impl Iterator<Item = &'a str> + 's {
        self.entries
            .iter()
            .filter(move |(k, _)| *k == name)
            .map(|(_, v)| *v)
    }

    pub fn count(&self, name: &str) -> usize {
        self.get_all(name).count()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.entries.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Represents a parsed HTTP request.
///
/// Borrowed from the buffer the head was read into (and, for bodies that did
/// not fit, from the allocation holding the body), so it cannot outlive the
/// dispatch that read it.
#[derive(Debug, Clone)]
pub struct Request<'a> {
    /// Method token exactly as sent
    pub method: &'a str,
    /// The request target including any query string
    pub path: &'a str,
    /// Protocol token, typically "HTTP/1.1"
    pub version: &'a str,
    pub headers: Headers<'a>,
    pub body: &'a [u8],
}

impl<'a> Request<'a> {
    /// The method, if it is one the server knows about.
    pub fn method_kind(&self) -> Option<Method> {
        Method::from_str(self.method)
    }

    /// Retrieves the first value of a header (exact, case-sensitive name).
    pub fn header(&self, key: &str) -> Option<&'a str> {
        self.headers.get(key)
    }

    /// Splits the target into path and query parameters.
    pub fn query(&self) -> FormData<'a> {
        form_data(self.path, true)
    }

    /// Value of cookie `name` from any `Cookie` header.
    pub fn cookie(&self, name: &str) -> Option<&'a str> {
        self.headers
            .get_all("Cookie")
            .flat_map(|v| v.split(';'))
            .filter_map(|pair| pair.trim_start().split_once('='))
            .find(|(k, _)| *k == name)
            .map(|(_, v)| v)
    }

    /// Quality value the client assigns to `candidate` in header `field`.
    ///
    /// Scans comma-separated items of every `field` header; an item matches
    /// when its token (the part before the first `;`) equals `candidate`
    /// exactly. The weight comes from the item's `q` parameter, wherever it
    /// sits among the parameters, and is 1 without one. Returns 0 when
    /// nothing matches.
    ///
    /// ```ignore
    /// // Accept-Encoding: br;q=0.9, gzip;level=1;q=0.5
    /// assert_eq!(req.qvalue("Accept-Encoding", "gzip"), 0.5);
    /// ```
    pub fn qvalue(&self, field: &str, candidate: &str) -> f32 {
        for value in self.headers.get_all(field) {
            for item in value.split(',') {
                let mut parts = item.split(';');
                let token = parts.next().unwrap_or_default().trim_matches([' ', '\t']);
                if token.is_empty() || token != candidate {
                    continue;
                }
                return parts.find_map(parse_q).unwrap_or(1.0);
            }
        }
        0.0
    }
}

/// Weight from one `;`-separated parameter, if it is `q=<number>`. An empty
/// value counts as 1; a malformed number reads as 0.
fn parse_q(param: &str) -> Option<f32> {
    let (name, value) = param.split_once('=')?;
    if name.trim_matches([' ', '\t']) != "q" {
        return None;
    }
    let value = value.trim_matches([' ', '\t']);
    if value.is_empty() {
        return Some(1.0);
    }
    let end = value
        .find(|c: char| !(c.is_ascii_digit() || c == '.'))
        .unwrap_or(value.len());
    Some(value[..end].parse().unwrap_or(0.0))
}
