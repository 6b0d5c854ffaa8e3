use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::{CanonicalChoice, CanonicalResponse, VendorExtras};
use crate::protocol::mapping::{finish_reason_to_openai, openai_finish_reason_to_canonical};
use crate::protocol::{decode_wire, encode_wire, ensure_source, OPENAI};

use super::request::{decode_message, encode_message};
use super::{OpenAiChatResponse, OpenAiChoice, OpenAiUsage};

/// Decode a non-streaming `OpenAI` Chat Completions response.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] when the body is not a chat completion.
pub fn decode_response(body: &[u8]) -> Result<CanonicalResponse, GatewayError> {
    let wire: OpenAiChatResponse = decode_wire(body, "openai chat response", GatewayError::internal)?;

    let choices = wire
        .choices
        .iter()
        .map(|choice| {
            Ok(CanonicalChoice {
                index: choice.index,
                message: decode_message(&choice.message)?,
                finish_reason: choice
                    .finish_reason
                    .as_deref()
                    .map(openai_finish_reason_to_canonical),
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()
        .map_err(|err| GatewayError::internal(err.to_string()).with_payload(body))?;

    Ok(CanonicalResponse {
        id: wire.id,
        model: wire.model,
        source: OPENAI.to_owned(),
        created: wire.created,
        choices,
        usage: wire.usage.as_ref().map(OpenAiUsage::to_canonical),
        vendor_extras: VendorExtras::from_fields(OPENAI, wire.extra),
    })
}

/// Encode a canonical response as an `OpenAI` chat completion.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidArgument`] when the response came from
/// another vendor.
pub fn encode_response(response: &CanonicalResponse) -> Result<Value, GatewayError> {
    ensure_source(OPENAI, &response.source)?;

    let wire = OpenAiChatResponse {
        id: response.id.clone(),
        object: "chat.completion".to_owned(),
        created: response.created,
        model: response.model.clone(),
        choices: response
            .choices
            .iter()
            .map(|choice| OpenAiChoice {
                index: choice.index,
                message: encode_message(&choice.message, true),
                finish_reason: choice
                    .finish_reason
                    .map(|reason| finish_reason_to_openai(reason).to_owned()),
            })
            .collect(),
        usage: response.usage.as_ref().map(OpenAiUsage::from_canonical),
        extra: VendorExtras::fields_for(response.vendor_extras.as_ref(), OPENAI)
            .cloned()
            .unwrap_or_default(),
    };
    encode_wire(&wire, "openai chat response")
}
