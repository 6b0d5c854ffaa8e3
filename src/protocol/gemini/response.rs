use std::sync::atomic::AtomicU64;

use serde_json::Value;

use crate::error::GatewayError;
use crate::protocol::canonical::{
    CanonicalChoice, CanonicalMessage, CanonicalResponse, CanonicalRole, VendorExtras,
};
use crate::protocol::mapping::{
    canonical_role_to_gemini, finish_reason_to_gemini, gemini_finish_reason_to_canonical,
    gemini_role_to_canonical,
};
use crate::protocol::{decode_wire, encode_wire, ensure_source, GEMINI};
use crate::util::next_generated_id;

use super::{decode_parts, encode_parts, GeminiCandidate, GeminiContent, GeminiResponse, GeminiUsageMetadata};

static RESPONSE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Decode a non-streaming generateContent response.
///
/// # Errors
///
/// Returns [`GatewayError::Internal`] when the body is not a Gemini response.
pub fn decode_response(body: &[u8]) -> Result<CanonicalResponse, GatewayError> {
    let wire: GeminiResponse = decode_wire(body, "gemini response", GatewayError::internal)?;

    let choices = wire
        .candidates
        .iter()
        .enumerate()
        .map(|(position, candidate)| {
            let decoded = candidate
                .content
                .as_ref()
                .map(|content| decode_parts(&content.parts))
                .unwrap_or_default();
            let role = candidate
                .content
                .as_ref()
                .and_then(|content| content.role.as_deref())
                .map_or(CanonicalRole::Assistant, gemini_role_to_canonical);
            CanonicalChoice {
                index: candidate
                    .index
                    .unwrap_or_else(|| u32::try_from(position).unwrap_or(u32::MAX)),
                message: CanonicalMessage {
                    role,
                    parts: decoded.parts,
                    tool_calls: decoded.tool_calls,
                    tool_call_id: None,
                    name: None,
                },
                finish_reason: candidate
                    .finish_reason
                    .as_deref()
                    .map(gemini_finish_reason_to_canonical),
            }
        })
        .collect();

    Ok(CanonicalResponse {
        id: wire
            .response_id
            .unwrap_or_else(|| next_generated_id(GEMINI, &RESPONSE_ID_COUNTER)),
        model: wire.model_version.unwrap_or_default(),
        source: GEMINI.to_owned(),
        created: None,
        choices,
        usage: wire
            .usage_metadata
            .as_ref()
            .map(GeminiUsageMetadata::to_canonical),
        vendor_extras: VendorExtras::from_fields(GEMINI, wire.extra),
    })
}

/// Encode a canonical response as a generateContent response.
///
/// # Errors
///
/// Returns [`GatewayError::InvalidArgument`] when the response came from
/// another vendor or carries non-JSON tool-call arguments.
pub fn encode_response(response: &CanonicalResponse) -> Result<Value, GatewayError> {
    ensure_source(GEMINI, &response.source)?;

    let candidates = response
        .choices
        .iter()
        .map(|choice| {
            Ok(GeminiCandidate {
                content: Some(GeminiContent {
                    role: Some(canonical_role_to_gemini(choice.message.role).to_owned()),
                    parts: encode_parts(&choice.message.parts, &choice.message.tool_calls)?,
                }),
                finish_reason: choice
                    .finish_reason
                    .map(|reason| finish_reason_to_gemini(reason).to_owned()),
                index: Some(choice.index),
                extra: serde_json::Map::new(),
            })
        })
        .collect::<Result<Vec<_>, GatewayError>>()?;

    let wire = GeminiResponse {
        candidates,
        usage_metadata: response
            .usage
            .as_ref()
            .map(GeminiUsageMetadata::from_canonical),
        model_version: (!response.model.is_empty()).then(|| response.model.clone()),
        response_id: Some(response.id.clone()),
        extra: VendorExtras::fields_for(response.vendor_extras.as_ref(), GEMINI)
            .cloned()
            .unwrap_or_default(),
    };
    encode_wire(&wire, "gemini response")
}
