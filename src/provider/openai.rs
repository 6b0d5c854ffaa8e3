use std::sync::Arc;

use http::{header, HeaderMap, HeaderValue};

use crate::error::GatewayError;
use crate::protocol::{Converter, OpenAiChatConverter, OPENAI};

use super::{header_value, Provider};

const CHAT_COMPLETIONS_PATH: &str = "/chat/completions";

/// `OpenAI` Chat Completions and compatible endpoints.
#[derive(Debug, Clone, Default)]
pub struct OpenAiProvider {
    converter: Arc<OpenAiChatConverter>,
}

impl OpenAiProvider {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Provider for OpenAiProvider {
    fn name(&self) -> &'static str {
        OPENAI
    }

    fn api_endpoint(&self, _model: &str, _streaming: bool) -> String {
        CHAT_COMPLETIONS_PATH.to_owned()
    }

    fn headers(&self, credential: &str) -> Result<HeaderMap, GatewayError> {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::CONTENT_TYPE,
            HeaderValue::from_static("application/json"),
        );
        headers.insert(
            header::AUTHORIZATION,
            header_value(&format!("Bearer {credential}"))?,
        );
        Ok(headers)
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    fn converter(&self) -> Arc<dyn Converter> {
        self.converter.clone()
    }
}
