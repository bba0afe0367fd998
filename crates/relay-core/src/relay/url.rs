//! Upstream URL parsing for the three supported schemes (§6).
//!
//! No URL re-encoding is performed anywhere in this module — the selector
//! built from a parsed [`RelayUrl`] must be bit-exact with what was written
//! in the configuration file (§4.6).

use crate::error::RelayError;

/// Upstream scheme (§6 "Supported URL schemes").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scheme {
    Http,
    Udp,
    Multicast,
}

/// A parsed upstream source URL.
#[derive(Debug, Clone)]
pub struct RelayUrl {
    pub scheme: Scheme,
    pub host: String,
    pub port: u16,
    pub path: String,
    pub params: Option<String>,
    pub query: Option<String>,
}

impl RelayUrl {
    /// Parses one of `http://`, `udp://host:port`, `multicast://group:port`.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let (scheme, rest) = if let Some(rest) = raw.strip_prefix("http://") {
            (Scheme::Http, rest)
        } else if let Some(rest) = raw.strip_prefix("udp://") {
            (Scheme::Udp, rest)
        } else if let Some(rest) = raw.strip_prefix("multicast://") {
            (Scheme::Multicast, rest)
        } else {
            return Err(RelayError::Configuration(format!(
                "unsupported URL scheme: {raw:?}"
            )));
        };

        match scheme {
            Scheme::Http => Self::parse_http(rest),
            Scheme::Udp | Scheme::Multicast => Self::parse_host_port(scheme, rest),
        }
    }

    fn parse_host_port(scheme: Scheme, rest: &str) -> Result<Self, RelayError> {
        let (hostport, _) = rest.split_once('/').unwrap_or((rest, ""));
        let (host, port) = hostport.rsplit_once(':').ok_or_else(|| {
            RelayError::Configuration(format!("missing port in {scheme:?} URL: {rest:?}"))
        })?;
        let port: u16 = port
            .parse()
            .map_err(|_| RelayError::Configuration(format!("invalid port: {port:?}")))?;
        Ok(Self {
            scheme,
            host: host.to_string(),
            port,
            path: String::new(),
            params: None,
            query: None,
        })
    }

    fn parse_http(rest: &str) -> Result<Self, RelayError> {
        let (authority, tail) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) => (
                h,
                p.parse()
                    .map_err(|_| RelayError::Configuration(format!("invalid port: {p:?}")))?,
            ),
            None => (authority, 80),
        };

        // Split tail into path ; params ? query, without re-encoding any part.
        let (path_and_params, query) = match tail.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (tail, None),
        };
        let (path, params) = match path_and_params.split_once(';') {
            Some((p, pr)) => (p, Some(pr.to_string())),
            None => (path_and_params, None),
        };

        Ok(Self {
            scheme: Scheme::Http,
            host: host.to_string(),
            port,
            path: if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            },
            params,
            query,
        })
    }

    /// Builds the request selector: `path` (or `/`), with `;params` and
    /// `?query` appended if present, bit-exact (§4.6).
    #[must_use]
    pub fn selector(&self) -> String {
        let mut s = self.path.clone();
        if let Some(params) = &self.params {
            s.push(';');
            s.push_str(params);
        }
        if let Some(query) = &self.query {
            s.push('?');
            s.push_str(query);
        }
        s
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_plain_http_url() {
        let u = RelayUrl::parse("http://origin.example/stream.ts").unwrap();
        assert_eq!(u.host, "origin.example");
        assert_eq!(u.port, 80);
        assert_eq!(u.selector(), "/stream.ts");
    }

    #[test]
    fn parses_http_url_with_port_params_and_query() {
        let u = RelayUrl::parse("http://origin.example:8000/stream.ts;foo=1?bar=2").unwrap();
        assert_eq!(u.port, 8000);
        assert_eq!(u.selector(), "/stream.ts;foo=1?bar=2");
    }

    #[test]
    fn http_url_with_no_path_selects_root() {
        let u = RelayUrl::parse("http://origin.example").unwrap();
        assert_eq!(u.selector(), "/");
    }

    #[test]
    fn parses_udp_url() {
        let u = RelayUrl::parse("udp://0.0.0.0:5000").unwrap();
        assert_eq!(u.scheme, Scheme::Udp);
        assert_eq!(u.host, "0.0.0.0");
        assert_eq!(u.port, 5000);
    }

    #[test]
    fn parses_multicast_url() {
        let u = RelayUrl::parse("multicast://239.0.0.1:5000").unwrap();
        assert_eq!(u.scheme, Scheme::Multicast);
        assert_eq!(u.host, "239.0.0.1");
    }

    #[test]
    fn rejects_unknown_scheme() {
        assert!(RelayUrl::parse("ftp://example.com").is_err());
    }

    #[test]
    fn udp_url_without_port_is_an_error() {
        assert!(RelayUrl::parse("udp://0.0.0.0").is_err());
    }
}
