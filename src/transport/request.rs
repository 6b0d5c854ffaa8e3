use http::{HeaderMap, HeaderName, HeaderValue};

use crate::error::GatewayError;

/// Resolve the upstream URL for `endpoint` against a channel's `base_url`.
///
/// An absolute `http(s)://` endpoint is used as-is. Otherwise the two are
/// joined with exactly one `/`, and runs of `/` in the resulting path are
/// collapsed. A query string on the endpoint is kept.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidArgument`] when the result is not a valid
/// URL.
pub fn join_endpoint(base_url: &str, endpoint: &str) -> Result<url::Url, GatewayError> {
    let joined = if is_absolute(endpoint) {
        endpoint.to_owned()
    } else {
        let base = base_url.trim_end_matches('/');
        let path = endpoint.trim_start_matches('/');
        let mut joined = String::with_capacity(base.len() + path.len() + 1);
        joined.push_str(base);
        joined.push('/');
        joined.push_str(path);
        joined
    };

    let mut url = url::Url::parse(&joined).map_err(|err| {
        GatewayError::invalid_argument(format!("invalid upstream URL: {err}"))
            .with_context("url", joined.clone())
    })?;
    if url.path().contains("//") {
        let collapsed = collapse_slashes(url.path());
        url.set_path(&collapsed);
    }
    Ok(url)
}

fn is_absolute(endpoint: &str) -> bool {
    let lower = endpoint.get(..8).unwrap_or(endpoint).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

fn collapse_slashes(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut previous_slash = false;
    for ch in path.chars() {
        if ch == '/' {
            if previous_slash {
                continue;
            }
            previous_slash = true;
        } else {
            previous_slash = false;
        }
        out.push(ch);
    }
    out
}

/// Merge header layers, later layers winning per header name.
///
/// Names compare case-insensitively. A name present in a later layer
/// replaces every value from earlier ones.
#[must_use]
pub fn merge_headers<'a, I>(layers: I) -> HeaderMap
where
    I: IntoIterator<Item = &'a HeaderMap>,
{
    let mut merged = HeaderMap::new();
    for layer in layers {
        for name in layer.keys() {
            merged.remove(name);
            for value in layer.get_all(name) {
                merged.append(name.clone(), value.clone());
            }
        }
    }
    merged
}

/// Build a header map from configured string pairs.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidArgument`] for an invalid name or value.
pub fn header_map_from_pairs<'a, I>(pairs: I) -> Result<HeaderMap, GatewayError>
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut headers = HeaderMap::new();
    for (name, value) in pairs {
        let header_name = HeaderName::from_bytes(name.trim().as_bytes()).map_err(|err| {
            GatewayError::invalid_argument(format!("invalid header name: {err}"))
                .with_context("header", name.to_owned())
        })?;
        let header_value = HeaderValue::from_str(value.trim()).map_err(|err| {
            GatewayError::invalid_argument(format!("invalid header value: {err}"))
                .with_context("header", name.to_owned())
        })?;
        headers.insert(header_name, header_value);
    }
    Ok(headers)
}
