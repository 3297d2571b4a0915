//! The Upstream URL data type and the base-path composition rule used by
//! both the engine and the health checker.

use std::fmt;

/// Which pre-built client a request to this upstream goes through: client
/// selection is by the upstream URL's scheme.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Scheme {
    Plain,
    Tls,
}

impl fmt::Display for Scheme {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Scheme::Plain => "http",
            Scheme::Tls => "https",
        })
    }
}

/// An upstream origin server: absolute URL with scheme, host, optional port,
/// and optional non-empty base path. Immutable once constructed — a
/// [`crate::instance::FailoverInstance`] never mutates its upstream list
/// after provisioning.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Upstream {
    pub scheme: Scheme,
    pub host: String,
    pub port: Option<u16>,
    /// Base path with any trailing `/` already stripped, or empty.
    base_path: String,
    /// The original (post-replacer) URL string, kept around for display and
    /// for the registry's `upstreams_seen` identity.
    raw: String,
}

impl Upstream {
    /// Parse an absolute upstream URL. Scheme must be `http` or `https`.
    pub fn parse(raw: &str) -> Result<Self, String> {
        let url = url_lite::Parsed::parse(raw)?;
        let scheme = match url.scheme {
            "http" => Scheme::Plain,
            "https" => Scheme::Tls,
            other => return Err(format!("unsupported scheme {other:?}, want http or https")),
        };
        if url.host.is_empty() {
            return Err("missing host".to_string());
        }
        let base_path = url.path.trim_end_matches('/').to_string();
        Ok(Self {
            scheme,
            host: url.host.to_string(),
            port: url.port,
            base_path,
            raw: raw.to_string(),
        })
    }

    /// Scheme + authority, e.g. `https://host:port`, with no path. Used by
    /// the health checker to build probe URLs and by the engine to build the
    /// outbound request target.
    pub fn authority(&self) -> String {
        match self.port {
            Some(p) => format!("{}://{}:{}", self.scheme, self.host, p),
            None => format!("{}://{}", self.scheme, self.host),
        }
    }

    /// Compose the outbound request path for an inbound request path,
    /// preserving the upstream's base path. Empty / `/` / `/prefix` /
    /// `/prefix/` base paths must all produce the same composed path for a
    /// given inbound path.
    pub fn compose_path(&self, inbound_path: &str) -> String {
        if self.base_path.is_empty() {
            inbound_path.to_string()
        } else {
            format!("{}{}", self.base_path, inbound_path)
        }
    }

    /// The original configured URL string (post variable-expansion), used as
    /// the registry's display identity and as the FailureCache/HealthState
    /// map key's seed — callers key by `&Upstream` directly via `Eq`/`Hash`.
    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// A tiny, dependency-free URL parser covering exactly what upstream URLs
/// need: `scheme://host[:port][/path][?query]`. Avoids pulling in a full
/// URL crate for a parse this narrow; query strings are not needed here
/// since callers carry the inbound query verbatim.
mod url_lite {
    pub struct Parsed<'a> {
        pub scheme: &'a str,
        pub host: &'a str,
        pub port: Option<u16>,
        pub path: &'a str,
    }

    impl<'a> Parsed<'a> {
        pub fn parse(raw: &'a str) -> Result<Self, String> {
            let (scheme, rest) = raw
                .split_once("://")
                .ok_or_else(|| "missing scheme (expected scheme://host...)".to_string())?;
            let (authority, path) = match rest.find('/') {
                Some(idx) => (&rest[..idx], &rest[idx..]),
                None => (rest, ""),
            };
            if authority.is_empty() {
                return Err("missing host".to_string());
            }
            let (host, port) = match authority.rsplit_once(':') {
                Some((h, p)) => {
                    let port = p
                        .parse::<u16>()
                        .map_err(|_| format!("invalid port {p:?}"))?;
                    (h, Some(port))
                }
                None => (authority, None),
            };
            Ok(Self {
                scheme,
                host,
                port,
                path,
            })
        }
    }
}
