//! Guest argument vector and environment derived from an HTTP request.
//!
//! The guest sees a request the way a CGI program would:
//! - `argv[0]` is the request path, followed by every `&`-separated piece
//!   of the raw query string
//! - every request header becomes an environment variable named
//!   `HTTP_<NAME>`, with the name upper-cased and `-` replaced by `_`

use std::collections::BTreeMap;

/// Prefix for environment variables derived from request headers.
pub const HEADER_ENV_PREFIX: &str = "HTTP_";

/// Arguments and environment for one guest run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionEnvironment {
    args: Vec<String>,
    env: BTreeMap<String, String>,
}

impl ExecutionEnvironment {
    /// Build the guest environment for a request.
    ///
    /// `raw_query` is the query string exactly as received, without the
    /// leading `?` and without percent-decoding. Header values that repeat
    /// a name are joined with `:` in the order given; non-UTF-8 bytes are
    /// replaced. When two distinct header names map to the same variable,
    /// the one that sorts last (lower-cased) wins.
    pub fn from_request<I, N, V>(path: &str, raw_query: Option<&str>, headers: I) -> Self
    where
        I: IntoIterator<Item = (N, V)>,
        N: AsRef<str>,
        V: AsRef<[u8]>,
    {
        let mut args = Vec::with_capacity(1);
        args.push(path.to_string());
        args.extend(split_query(raw_query.unwrap_or_default()));

        // Group by lower-cased header name so the collision order is fixed
        let mut grouped: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for (name, value) in headers {
            grouped
                .entry(name.as_ref().to_ascii_lowercase())
                .or_default()
                .push(String::from_utf8_lossy(value.as_ref()).into_owned());
        }

        let env = grouped
            .into_iter()
            .map(|(name, values)| (env_var_name(&name), values.join(":")))
            .collect();

        Self { args, env }
    }

    /// The argument vector, starting with the request path.
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// All environment variables, ordered by name.
    pub fn env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Look up one environment variable.
    pub fn env_var(&self, name: &str) -> Option<&str> {
        self.env.get(name).map(String::as_str)
    }

    /// Environment variables as borrowed pairs, in the shape WASI builders take.
    pub fn env_pairs(&self) -> Vec<(&str, &str)> {
        self.env
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
            .collect()
    }
}

/// Split a raw query string on `&`.
///
/// Empty pieces are kept, so an empty query yields one empty argument.
pub fn split_query(raw_query: &str) -> impl Iterator<Item = String> + '_ {
    raw_query.split('&').map(str::to_string)
}

/// Environment variable name for a header name.
pub fn env_var_name(header: &str) -> String {
    let mut name = String::with_capacity(HEADER_ENV_PREFIX.len() + header.len());
    name.push_str(HEADER_ENV_PREFIX);
    name.extend(header.chars().map(|c| match c {
        '-' => '_',
        c => c.to_ascii_uppercase(),
    }));
    name
}
