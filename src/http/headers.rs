//! Header lists for requests, responses and trailers.
//!
//! Pseudo-headers (`:method`, `:status`, ...) live in the same ordered list
//! as regular headers and are dropped when converting to an `http::HeaderMap`.

use crate::base::neterror::NetError;
use http::header::{HeaderName, HeaderValue};
use http::HeaderMap;

/// Pseudo-headers every outgoing request must carry.
pub const REQUIRED_REQUEST_PSEUDO_HEADERS: [&str; 4] = [":method", ":scheme", ":authority", ":path"];

const KNOWN_PSEUDO_HEADERS: [&str; 6] = [
    ":method",
    ":scheme",
    ":authority",
    ":path",
    ":status",
    ":protocol",
];

/// Ordered, case-preserving header list used for requests, responses and trailers.
///
/// Lookups are case-insensitive, but names keep the casing they were added
/// with so HTTP/1 transports can reproduce them on the wire. Repeated names
/// are kept as separate entries in insertion order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HeaderList {
    headers: Vec<(String, String)>,
}

impl HeaderList {
    pub fn new() -> Self {
        Self {
            headers: Vec::new(),
        }
    }

    /// Request headers with the four required pseudo-headers filled in.
    pub fn request(method: &str, scheme: &str, authority: &str, path: &str) -> Self {
        let mut headers = Self::new();
        headers.push_unchecked(":method", method);
        headers.push_unchecked(":scheme", scheme);
        headers.push_unchecked(":authority", authority);
        headers.push_unchecked(":path", path);
        headers
    }

    /// Response headers carrying only `:status`.
    pub fn response(status: u16) -> Self {
        let mut headers = Self::new();
        headers.push_unchecked(":status", &status.to_string());
        headers
    }

    /// Append a header, keeping any existing entries with the same name.
    pub fn add(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        validate_entry(name, value)?;
        self.push_unchecked(name, value);
        Ok(())
    }

    /// Replace every entry named `name` with a single one, or append it.
    pub fn set(&mut self, name: &str, value: &str) -> Result<(), NetError> {
        validate_entry(name, value)?;
        match self
            .headers
            .iter()
            .position(|(n, _)| n.eq_ignore_ascii_case(name))
        {
            Some(first) => {
                self.headers[first].1 = value.to_string();
                let mut index = 0;
                self.headers.retain(|(n, _)| {
                    let keep = index <= first || !n.eq_ignore_ascii_case(name);
                    index += 1;
                    keep
                });
            }
            None => self.push_unchecked(name, value),
        }
        Ok(())
    }

    /// Builder-style [`add`](Self::add).
    pub fn with(mut self, name: &str, value: &str) -> Result<Self, NetError> {
        self.add(name, value)?;
        Ok(self)
    }

    pub fn remove(&mut self, name: &str) {
        self.headers.retain(|(n, _)| !n.eq_ignore_ascii_case(name));
    }

    /// First value for `name` (case-insensitive).
    pub fn get(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    /// All values for `name` in insertion order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.headers
            .iter()
            .filter(move |(n, _)| n.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.get(name).is_some()
    }

    /// Entries with their original casing.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.headers.iter().map(|(n, v)| (n.as_str(), v.as_str()))
    }

    /// Entries that are not pseudo-headers.
    pub fn regular(&self) -> impl Iterator<Item = (&str, &str)> {
        self.iter().filter(|(n, _)| !n.starts_with(':'))
    }

    pub fn len(&self) -> usize {
        self.headers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.headers.is_empty()
    }

    /// The numeric `:status`, if present and well formed.
    pub fn http_status(&self) -> Option<u16> {
        self.get(":status")?.trim().parse().ok()
    }

    /// Check that this list is a sendable request header block.
    pub fn validate_request(&self) -> Result<(), NetError> {
        for name in REQUIRED_REQUEST_PSEUDO_HEADERS {
            match self.get(name) {
                Some(value) if !value.is_empty() => {}
                _ => return Err(NetError::MissingPseudoHeader { name }),
            }
        }
        for (name, value) in self.iter() {
            validate_entry(name, value)?;
        }
        Ok(())
    }

    /// Regular headers as an `http::HeaderMap`; pseudo-headers are dropped.
    pub fn to_header_map(&self) -> Result<HeaderMap, NetError> {
        let mut map = HeaderMap::with_capacity(self.headers.len());
        for (name, value) in self.regular() {
            let name = HeaderName::from_bytes(name.as_bytes()).map_err(|_| NetError::InvalidHeader)?;
            let value = HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)?;
            map.append(name, value);
        }
        Ok(map)
    }

    /// Response headers from a status and an `http::HeaderMap`.
    ///
    /// Values that are not visible ASCII are skipped.
    pub fn from_response_parts(status: u16, map: &HeaderMap) -> Self {
        let mut headers = Self::response(status);
        headers.extend_from_map(map);
        headers
    }

    /// Trailers from an `http::HeaderMap`.
    pub fn from_header_map(map: &HeaderMap) -> Self {
        let mut headers = Self::new();
        headers.extend_from_map(map);
        headers
    }

    fn extend_from_map(&mut self, map: &HeaderMap) {
        for (name, value) in map {
            if let Ok(value) = value.to_str() {
                self.push_unchecked(name.as_str(), value);
            }
        }
    }

    fn push_unchecked(&mut self, name: &str, value: &str) {
        self.headers.push((name.to_string(), value.to_string()));
    }
}

fn validate_entry(name: &str, value: &str) -> Result<(), NetError> {
    if name.starts_with(':') {
        if !KNOWN_PSEUDO_HEADERS.contains(&name) {
            return Err(NetError::InvalidHeader);
        }
    } else {
        HeaderName::from_bytes(name.as_bytes()).map_err(|_| NetError::InvalidHeader)?;
    }
    HeaderValue::from_str(value).map_err(|_| NetError::InvalidHeader)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_case_preserved_lookup_insensitive() {
        let mut headers = HeaderList::new();
        headers.add("FoO", "bar").unwrap();
        assert_eq!(headers.get("foo"), Some("bar"));
        assert_eq!(headers.iter().next(), Some(("FoO", "bar")));
    }

    #[test]
    fn test_lookup_outlives_query_name() {
        let headers = HeaderList::response(204).with("Retry-After", "5").unwrap();
        let value = {
            let name = String::from("retry-after");
            headers.get(&name)
        };
        assert_eq!(value, Some("5"));
        assert!(headers.contains(":status"));
    }

    #[test]
    fn test_add_keeps_repeated_names() {
        let mut headers = HeaderList::new();
        headers.add("Set-Cookie", "a=1").unwrap();
        headers.add("set-cookie", "b=2").unwrap();
        let values: Vec<_> = headers.get_all("SET-COOKIE").collect();
        assert_eq!(values, vec!["a=1", "b=2"]);
    }

    #[test]
    fn test_set_collapses_entries_in_place() {
        let mut headers = HeaderList::new();
        headers.add("A", "1").unwrap();
        headers.add("B", "2").unwrap();
        headers.add("b", "3").unwrap();
        headers.add("C", "4").unwrap();
        headers.set("B", "22").unwrap();

        let names: Vec<_> = headers.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["A", "B", "C"]);
        assert_eq!(headers.get("b"), Some("22"));
    }

    #[test]
    fn test_request_validation() {
        let headers = HeaderList::request("GET", "https", "example.com", "/");
        assert!(headers.validate_request().is_ok());

        let mut missing = headers.clone();
        missing.remove(":authority");
        assert_eq!(
            missing.validate_request(),
            Err(NetError::MissingPseudoHeader { name: ":authority" })
        );
    }

    #[test]
    fn test_empty_pseudo_header_is_missing() {
        let headers = HeaderList::request("GET", "https", "example.com", "");
        assert_eq!(
            headers.validate_request(),
            Err(NetError::MissingPseudoHeader { name: ":path" })
        );
    }

    #[test]
    fn test_invalid_entries_rejected() {
        let mut headers = HeaderList::new();
        assert_eq!(headers.add("Invalid Header", "v"), Err(NetError::InvalidHeader));
        assert_eq!(headers.add("Valid", "bad\nvalue"), Err(NetError::InvalidHeader));
        assert_eq!(headers.add(":bogus", "x"), Err(NetError::InvalidHeader));
        assert!(headers.is_empty());
    }

    #[test]
    fn test_http_status() {
        assert_eq!(HeaderList::response(503).http_status(), Some(503));
        assert_eq!(HeaderList::new().http_status(), None);
    }

    #[test]
    fn test_header_map_conversion_skips_pseudo() {
        let headers = HeaderList::request("POST", "http", "example.com", "/upload")
            .with("Content-Type", "text/plain")
            .unwrap();
        let map = headers.to_header_map().unwrap();
        assert_eq!(map.len(), 1);
        assert_eq!(map.get("content-type").unwrap(), "text/plain");
    }

    #[test]
    fn test_from_response_parts() {
        let mut map = HeaderMap::new();
        map.insert("x-test", HeaderValue::from_static("yes"));
        let headers = HeaderList::from_response_parts(200, &map);
        assert_eq!(headers.http_status(), Some(200));
        assert_eq!(headers.get("X-Test"), Some("yes"));
    }
}
