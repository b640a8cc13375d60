//! URL-encoded form data, as found in a query string or a POST body.

use std::borrow::Cow;

use url::form_urlencoded;

use crate::error::ProtocolError;

/// Key/value pairs sliced out of a query string or form body.
///
/// Values are kept raw (still percent-encoded); [`FormData::decoded`]
/// applies `application/x-www-form-urlencoded` decoding on demand.
#[derive(Debug, Clone)]
pub struct FormData<'a> {
    path: &'a str,
    query: &'a str,
    params: Vec<(&'a str, &'a str)>,
}

/// Splits `input` into parameters.
///
/// With `has_query_prefix`, everything up to the first `?` is the path and
/// only the rest is parsed; without a `?` there are no parameters. Input ends
/// at the first NUL. Pairs are separated by `&`, a key ends at its first
/// `=`, and a key with no `=` maps to an empty value. Empty segments are
/// skipped.
pub fn form_data(input: &str, has_query_prefix: bool) -> FormData<'_> {
    let input = match input.find('\0') {
        Some(end) => &input[..end],
        None => input,
    };

    let (path, query) = if has_query_prefix {
        match input.split_once('?') {
            Some((path, query)) => (path, query),
            None => (input, ""),
        }
    } else {
        ("", input)
    };

    let params = query
        .split('&')
        .filter(|segment| !segment.is_empty())
        .map(|segment| segment.split_once('=').unwrap_or((segment, "")))
        .collect();

    FormData {
        path,
        query,
        params,
    }
}

impl<'a> FormData<'a> {
    /// The part before `?` (empty for form bodies).
    pub fn path(&self) -> &'a str {
        self.path
    }

    /// Raw value of `key`; the last occurrence wins.
    pub fn get(&self, key: &str) -> Option<&'a str> {
        self.params
            .iter()
            .rev()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| *v)
    }

    /// Percent- and `+`-decoded value of `key`; the last occurrence wins.
    pub fn decoded(&self, key: &str) -> Option<Cow<'a, str>> {
        form_urlencoded::parse(self.query.as_bytes())
            .filter(|(k, _)| k == key)
            .last()
            .map(|(_, v)| v)
    }

    /// Like [`decoded`](Self::decoded) but a missing key is a 400.
    pub fn require(&self, key: &str) -> Result<Cow<'a, str>, ProtocolError> {
        self.decoded(key)
            .ok_or_else(|| ProtocolError::bad_request(format!("form data missing key \"{key}\"")))
    }

    pub fn iter(&self) -> impl Iterator<Item = (&'a str, &'a str)> + '_ {
        self.params.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.params.len()
    }

    pub fn is_empty(&self) -> bool {
        self.params.is_empty()
    }
}
