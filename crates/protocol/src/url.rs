/// Query parameters stripped during cache-lookup normalization. Agent
/// navigation frequently appends these; cached pages never include them.
pub const TRACKING_PARAMS: [&str; 5] = ["utm_source", "utm_medium", "utm_campaign", "ref", "source"];

/// Minimal parsed view of an absolute URL.
///
/// Only the pieces the cache layer needs: scheme, host (lowercased, port
/// kept separate), path and raw query. Fragments are dropped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedUrl {
    pub scheme: String,
    pub host: String,
    pub port: Option<u16>,
    pub path: String,
    pub query: Option<String>,
}

impl ParsedUrl {
    /// Parse an absolute URL. Returns `None` for anything without a
    /// `scheme://host` prefix (`about:blank`, `data:` URIs, relative paths).
    pub fn parse(url: &str) -> Option<Self> {
        let (scheme, rest) = url.split_once("://")?;
        if scheme.is_empty() {
            return None;
        }
        let rest = rest.split_once('#').map_or(rest, |(r, _)| r);
        let (authority, path_and_query) = match rest.find('/') {
            Some(idx) => (&rest[..idx], &rest[idx..]),
            None => (rest, ""),
        };
        if authority.is_empty() {
            return None;
        }
        let (path, query) = match path_and_query.split_once('?') {
            Some((p, q)) => (p, Some(q.to_string())),
            None => (path_and_query, None),
        };
        let (host, port) = match authority.rsplit_once(':') {
            Some((h, p)) if p.chars().all(|c| c.is_ascii_digit()) && !p.is_empty() => {
                (h, p.parse().ok())
            }
            _ => (authority, None),
        };
        Some(Self {
            scheme: scheme.to_ascii_lowercase(),
            host: host.to_ascii_lowercase(),
            port,
            path: if path.is_empty() {
                "/".to_string()
            } else {
                path.to_string()
            },
            query,
        })
    }

    /// Host with any leading `www.` removed.
    pub fn host_without_www(&self) -> &str {
        self.host.strip_prefix("www.").unwrap_or(&self.host)
    }

    /// Iterate `key=value` pairs of the query string, in order.
    pub fn query_pairs(&self) -> Vec<(&str, &str)> {
        let Some(query) = self.query.as_deref() else {
            return Vec::new();
        };
        query
            .split('&')
            .filter(|part| !part.is_empty())
            .map(|part| part.split_once('=').unwrap_or((part, "")))
            .collect()
    }

    /// Whether the query string carries a `key=` entry.
    pub fn has_query_param(&self, key: &str) -> bool {
        self.query_pairs().iter().any(|(k, _)| *k == key)
    }

    /// Value of the first `key=` entry, if any.
    pub fn query_param(&self, key: &str) -> Option<&str> {
        self.query_pairs()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }

    /// Rebuild the URL with a `www.`-prefixed host. Returns `None` when the
    /// host already carries the prefix.
    pub fn with_www(&self) -> Option<String> {
        if self.host.starts_with("www.") {
            return None;
        }
        let mut out = format!("{}://www.{}{}", self.scheme, self.host, self.path);
        if let Some(query) = &self.query {
            out.push('?');
            out.push_str(query);
        }
        Some(out)
    }
}

/// Decode percent-escapes and `+` into spaces, lossy on malformed escapes.
pub fn percent_decode(input: &str) -> String {
    let bytes = input.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            // Decode from the byte slice, not the str: a `%` followed by
            // an unencoded multibyte character is not a char boundary.
            b'%' if i + 2 < bytes.len() => {
                let escaped = std::str::from_utf8(&bytes[i + 1..i + 3])
                    .ok()
                    .and_then(|hex| u8::from_str_radix(hex, 16).ok());
                if let Some(byte) = escaped {
                    out.push(byte);
                    i += 3;
                    continue;
                }
                out.push(b'%');
                i += 1;
            }
            b'+' => {
                out.push(b' ');
                i += 1;
            }
            b => {
                out.push(b);
                i += 1;
            }
        }
    }
    String::from_utf8_lossy(&out).into_owned()
}

/// Canonical form used for cache lookups: lowercase host minus `www.`,
/// tracking params removed, remaining query params sorted.
///
/// Meaningful query keys survive (e.g. `stooq.com/q/?s=aapl.us` keeps `s`),
/// so two URLs that differ only by tracking noise collapse to one key while
/// genuinely distinct queries stay distinct.
pub fn normalize_for_lookup(url: &str) -> Option<String> {
    let parsed = ParsedUrl::parse(url)?;

    let mut params: Vec<&str> = Vec::new();
    if let Some(query) = parsed.query.as_deref() {
        for part in query.split('&').filter(|p| !p.is_empty()) {
            let key = part.split_once('=').map_or(part, |(k, _)| k);
            if !TRACKING_PARAMS.contains(&key.to_ascii_lowercase().as_str()) {
                params.push(part);
            }
        }
        params.sort_unstable();
    }

    let mut out = format!(
        "{}://{}{}",
        parsed.scheme,
        parsed.host_without_www(),
        parsed.path
    );
    if !params.is_empty() {
        out.push('?');
        out.push_str(&params.join("&"));
    }
    Some(out)
}
