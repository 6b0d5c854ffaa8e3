use std::sync::Arc;

use http::{header, HeaderMap, HeaderValue};

use crate::error::GatewayError;
use crate::protocol::{Converter, GeminiConverter, GEMINI};

use super::{header_value, Provider};

pub const DEFAULT_API_VERSION: &str = "v1beta";

/// Google Gemini generateContent.
#[derive(Debug, Clone)]
pub struct GeminiProvider {
    api_version: String,
    converter: Arc<GeminiConverter>,
}

impl GeminiProvider {
    #[must_use]
    pub fn new(api_version: Option<&str>) -> Self {
        let api_version = api_version
            .map(|version| version.trim().trim_matches('/'))
            .filter(|version| !version.is_empty())
            .unwrap_or(DEFAULT_API_VERSION);
        Self {
            api_version: api_version.to_owned(),
            converter: Arc::new(GeminiConverter),
        }
    }

    #[must_use]
    pub fn api_version(&self) -> &str {
        &self.api_version
    }
}

impl Default for GeminiProvider {
    fn default() -> Self {
        Self::new(None)
    }
}

impl Provider for GeminiProvider {
    fn name(&self) -> &'static str {
        GEMINI
    }

    fn api_endpoint(&self, model: &str, streaming: bool) -> String {
        let model = model.strip_prefix("models/").unwrap_or(model);
        if streaming {
            format!(
                "/{}/models/{model}:streamGenerateContent?alt=sse",
                self.api_version
            )
        } else {
            format!("/{}/models/{model}:generateContent", self.api_version)
        }
    }

    fn headers(&self, credential: &str) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert("x-goog-api-key", header_value(credential)?);
        Ok(headers)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn converter(&self) -> Arc<dyn Converter> {
        self.converter.clone()
    }
}
