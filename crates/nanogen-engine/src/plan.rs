use indexmap::IndexMap;
use reqwest::header::{ACCEPT, AUTHORIZATION, CONTENT_TYPE, USER_AGENT};
use reqwest::Url;

use nanogen_contracts::error::{GenerateError, Result};

pub const MODEL_ID: &str = "gemini-3-pro-image-preview";
pub const MODELS_SUFFIX: &str = "/v1beta/models";
pub const CLIENT_USER_AGENT: &str = "Mozilla/5.0 (compatible; nanogen/0.1)";

const GOOG_API_KEY_HEADER: &str = "x-goog-api-key";
const KEY_QUERY_PARAM: &str = "key";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    Bearer,
    GoogApiKeyHeader,
    KeyQueryParam,
}

impl AuthScheme {
    /// Most common gateway scheme first, native query-param key last.
    pub const ORDER: [Self; 3] = [Self::Bearer, Self::GoogApiKeyHeader, Self::KeyQueryParam];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Bearer => "bearer",
            Self::GoogApiKeyHeader => "x-goog-api-key",
            Self::KeyQueryParam => "query-key",
        }
    }
}

/// One concrete request shape to try against the gateway.
#[derive(Clone, PartialEq, Eq)]
pub struct AttemptSpec {
    pub url: String,
    pub headers: IndexMap<String, String>,
    pub auth: AuthScheme,
}

impl AttemptSpec {
    /// URL with the `key` query value masked, for logs and events.
    pub fn redacted_url(&self) -> String {
        let Ok(mut url) = Url::parse(&self.url) else {
            return self.url.clone();
        };
        let pairs = url
            .query_pairs()
            .map(|(name, value)| {
                let value = if name == KEY_QUERY_PARAM {
                    "***".to_string()
                } else {
                    value.into_owned()
                };
                (name.into_owned(), value)
            })
            .collect::<Vec<_>>();
        if pairs.is_empty() {
            return self.url.clone();
        }
        url.query_pairs_mut().clear().extend_pairs(pairs);
        url.to_string()
    }
}

impl std::fmt::Debug for AttemptSpec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AttemptSpec")
            .field("url", &self.redacted_url())
            .field("auth", &self.auth)
            .field("headers", &self.headers.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// Candidate API roots, suffixed form first.
pub fn candidate_bases(api_base: &str) -> Vec<String> {
    let normalized = api_base.trim().trim_end_matches('/');
    if normalized.ends_with(MODELS_SUFFIX) {
        return vec![normalized.to_string()];
    }
    vec![format!("{normalized}{MODELS_SUFFIX}"), normalized.to_string()]
}

fn baseline_headers() -> IndexMap<String, String> {
    [
        (CONTENT_TYPE.as_str(), "application/json"),
        (ACCEPT.as_str(), "application/json"),
        (USER_AGENT.as_str(), CLIENT_USER_AGENT),
    ]
    .into_iter()
    .map(|(name, value)| (name.to_string(), value.to_string()))
    .collect()
}

/// Expands a key and base into every (base path, auth scheme) combination.
///
/// All three auth schemes for one base are listed before the next base.
pub fn build_attempts(api_key: &str, api_base: &str) -> Result<Vec<AttemptSpec>> {
    let api_key = api_key.trim();
    if api_key.is_empty() {
        return Err(GenerateError::Configuration("api key is empty".to_string()));
    }

    let mut attempts = Vec::new();
    for base in candidate_bases(api_base) {
        let endpoint = format!("{base}/{MODEL_ID}:generateContent");
        let endpoint_url = parse_absolute(&endpoint)?;

        for auth in AuthScheme::ORDER {
            let mut headers = baseline_headers();
            let url = match auth {
                AuthScheme::Bearer => {
                    headers.insert(AUTHORIZATION.as_str().to_string(), format!("Bearer {api_key}"));
                    endpoint_url.to_string()
                }
                AuthScheme::GoogApiKeyHeader => {
                    headers.insert(GOOG_API_KEY_HEADER.to_string(), api_key.to_string());
                    endpoint_url.to_string()
                }
                AuthScheme::KeyQueryParam => {
                    let mut with_key = endpoint_url.clone();
                    with_key
                        .query_pairs_mut()
                        .append_pair(KEY_QUERY_PARAM, api_key);
                    with_key.to_string()
                }
            };
            attempts.push(AttemptSpec { url, headers, auth });
        }
    }
    Ok(attempts)
}

fn parse_absolute(endpoint: &str) -> Result<Url> {
    let url = Url::parse(endpoint).map_err(|err| {
        GenerateError::Configuration(format!("invalid base url ({endpoint}): {err}"))
    })?;
    if !matches!(url.scheme(), "http" | "https") || url.host_str().is_none() {
        return Err(GenerateError::Configuration(format!(
            "base url must be an absolute http(s) url: {endpoint}"
        )));
    }
    Ok(url)
}
