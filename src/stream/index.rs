//! Per-stream index allocation.
//!
//! Vendors split one logical response into chunks however they like. The
//! [`StreamIndexContext`] turns whatever positional hints a chunk carries
//! into identifiers an observer can rely on:
//!
//! - `sequence_number` strictly increases across the whole stream,
//! - `output_index` is fixed per candidate key, in first-seen order,
//! - `item_id` is fixed per item key,
//! - `content_index` never decreases for a given `item_id`.
//!
//! One context belongs to one stream and is only touched by that stream's
//! decode task, so it carries no synchronization.

use std::sync::atomic::AtomicU64;

use rustc_hash::FxHashMap;

use crate::protocol::canonical::CanonicalStreamEvent;
use crate::util::next_generated_id;

static SYNTHETIC_RESPONSE_ID_COUNTER: AtomicU64 = AtomicU64::new(1);

/// Key of the output slot for `candidate` within `response_id`.
///
/// Candidate 0 maps to the bare response id so that chunks without any
/// candidate data land in the same slot as the first candidate.
#[must_use]
pub fn output_key(response_id: &str, candidate: u32) -> String {
    if candidate == 0 {
        response_id.to_owned()
    } else {
        format!("{response_id}#{candidate}")
    }
}

/// Identity of one continuous content item.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ItemKey {
    pub response_id: String,
    pub output_index: i64,
    /// Tool-call discriminator when the item is a tool call.
    pub discriminator: Option<String>,
}

impl ItemKey {
    pub fn new(response_id: &str, output_index: i64, discriminator: Option<&str>) -> Self {
        Self {
            response_id: response_id.to_owned(),
            output_index,
            discriminator: discriminator.map(str::to_owned),
        }
    }

    fn synthesize_id(&self) -> String {
        match &self.discriminator {
            Some(discriminator) => format!(
                "{}:{}:{}",
                self.response_id, self.output_index, discriminator
            ),
            None => format!("{}:{}", self.response_id, self.output_index),
        }
    }
}

/// Stateful index allocator for one logical stream.
#[derive(Debug, Default)]
pub struct StreamIndexContext {
    next_sequence: i64,
    output_indices: FxHashMap<String, i64>,
    item_ids: FxHashMap<ItemKey, String>,
    content_indices: FxHashMap<String, i64>,
    response_id: Option<String>,
}

impl StreamIndexContext {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Next sequence number. Starts at 0 and is global to the context.
    pub fn next_sequence(&mut self) -> i64 {
        let value = self.next_sequence;
        self.next_sequence += 1;
        value
    }

    /// Number of sequence numbers handed out so far.
    #[must_use]
    pub fn sequences_issued(&self) -> i64 {
        self.next_sequence
    }

    /// Output slot for `key`, allocating the next one on first sight.
    pub fn ensure_output_index(&mut self, key: &str) -> i64 {
        if let Some(&index) = self.output_indices.get(key) {
            return index;
        }
        let index = i64::try_from(self.output_indices.len()).unwrap_or(i64::MAX);
        self.output_indices.insert(key.to_owned(), index);
        index
    }

    /// Item id for `key`; the first call synthesizes it from the key.
    pub fn ensure_item_id(&mut self, key: &ItemKey) -> String {
        if let Some(id) = self.item_ids.get(key) {
            return id.clone();
        }
        let id = key.synthesize_id();
        self.item_ids.insert(key.clone(), id.clone());
        id
    }

    /// Content index for `item_id`, never lower than any earlier result.
    ///
    /// A negative `proposed` means "no positional data" and returns the cached
    /// value (0 when the item is new).
    pub fn ensure_content_index(&mut self, item_id: &str, proposed: i64) -> i64 {
        if let Some(cached) = self.content_indices.get_mut(item_id) {
            if proposed > *cached {
                *cached = proposed;
            }
            return *cached;
        }
        let initial = proposed.max(0);
        self.content_indices.insert(item_id.to_owned(), initial);
        initial
    }

    /// Response id of the stream: the first one seen wins.
    pub fn ensure_response_id(&mut self, candidate: Option<&str>) -> String {
        if let Some(pinned) = &self.response_id {
            if let Some(candidate) = candidate.filter(|c| !c.is_empty() && *c != pinned) {
                tracing::debug!(
                    pinned = %pinned,
                    observed = %candidate,
                    "ignoring response id change mid-stream"
                );
            }
            return pinned.clone();
        }
        let id = match candidate.filter(|c| !c.is_empty()) {
            Some(id) => id.to_owned(),
            None => next_generated_id("resp", &SYNTHETIC_RESPONSE_ID_COUNTER),
        };
        self.response_id = Some(id.clone());
        id
    }

    #[must_use]
    pub fn response_id(&self) -> Option<&str> {
        self.response_id.as_deref()
    }

    /// Fill every unset index field of `event`.
    ///
    /// `discriminator` distinguishes tool-call items sharing an output slot.
    pub fn stamp(&mut self, event: &mut CanonicalStreamEvent, discriminator: Option<&str>) {
        if event.response_id.is_empty() {
            event.response_id = self.ensure_response_id(None);
        }
        if event.sequence_number < 0 {
            event.sequence_number = self.next_sequence();
        }
        if event.output_index < 0 {
            event.output_index = self.ensure_output_index(&output_key(&event.response_id, 0));
        }
        if event.item_id.is_empty() {
            let key = ItemKey::new(&event.response_id, event.output_index, discriminator);
            event.item_id = self.ensure_item_id(&key);
        }
        event.content_index = self.ensure_content_index(&event.item_id, event.content_index);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::canonical::{StreamEventType, UNSET_INDEX};

    #[test]
    fn test_sequence_is_strictly_increasing_from_zero() {
        let mut ctx = StreamIndexContext::new();
        let values: Vec<i64> = (0..64).map(|_| ctx.next_sequence()).collect();
        assert_eq!(values[0], 0);
        assert!(values.windows(2).all(|w| w[0] < w[1]));
        assert_eq!(ctx.sequences_issued(), 64);
    }

    #[test]
    fn test_output_index_first_seen_order() {
        let mut ctx = StreamIndexContext::new();
        assert_eq!(ctx.ensure_output_index("a"), 0);
        assert_eq!(ctx.ensure_output_index("b"), 1);
        assert_eq!(ctx.ensure_output_index("a"), 0);
        assert_eq!(ctx.ensure_output_index("b"), 1);
    }

    #[test]
    fn test_output_key_shares_slot_for_first_candidate() {
        assert_eq!(output_key("r1", 0), "r1");
        assert_eq!(output_key("r1", 2), "r1#2");
    }

    #[test]
    fn test_item_id_is_stable_and_deterministic() {
        let mut ctx = StreamIndexContext::new();
        let text = ItemKey::new("r1", 0, None);
        let call = ItemKey::new("r1", 0, Some("call_9"));
        let first = ctx.ensure_item_id(&text);
        assert_eq!(first, "r1:0");
        assert_eq!(ctx.ensure_item_id(&text), first);
        assert_eq!(ctx.ensure_item_id(&call), "r1:0:call_9");

        let mut other = StreamIndexContext::new();
        assert_eq!(other.ensure_item_id(&call), "r1:0:call_9");
    }

    #[test]
    fn test_content_index_never_regresses() {
        let mut ctx = StreamIndexContext::new();
        assert_eq!(ctx.ensure_content_index("item", 1), 1);
        assert_eq!(ctx.ensure_content_index("item", 0), 1);
        assert_eq!(ctx.ensure_content_index("item", UNSET_INDEX), 1);
        assert_eq!(ctx.ensure_content_index("item", 3), 3);
        assert_eq!(ctx.ensure_content_index("item", 2), 3);
    }

    #[test]
    fn test_content_index_without_position_starts_at_zero() {
        let mut ctx = StreamIndexContext::new();
        assert_eq!(ctx.ensure_content_index("fresh", UNSET_INDEX), 0);
        assert_eq!(ctx.ensure_content_index("fresh", UNSET_INDEX), 0);
        assert_eq!(ctx.ensure_content_index("fresh", 2), 2);
    }

    #[test]
    fn test_response_id_is_pinned() {
        let mut ctx = StreamIndexContext::new();
        assert_eq!(ctx.ensure_response_id(Some("r1")), "r1");
        assert_eq!(ctx.ensure_response_id(Some("r2")), "r1");
        assert_eq!(ctx.ensure_response_id(None), "r1");
    }

    #[test]
    fn test_response_id_synthesized_when_absent() {
        let mut ctx = StreamIndexContext::new();
        let id = ctx.ensure_response_id(Some(""));
        assert!(id.starts_with("resp-"));
        assert_eq!(ctx.ensure_response_id(Some("late")), id);
    }

    #[test]
    fn test_stamp_fills_unset_fields_only() {
        let mut ctx = StreamIndexContext::new();
        let mut first = CanonicalStreamEvent::new(StreamEventType::MessageDelta, "openai", "r1");
        ctx.stamp(&mut first, None);
        assert_eq!(first.sequence_number, 0);
        assert_eq!(first.output_index, 0);
        assert_eq!(first.item_id, "r1:0");
        assert_eq!(first.content_index, 0);

        let mut second = CanonicalStreamEvent::new(StreamEventType::MessageDelta, "openai", "r1");
        second.output_index = ctx.ensure_output_index(&output_key("r1", 1));
        second.content_index = 4;
        ctx.stamp(&mut second, Some("call#0"));
        assert_eq!(second.sequence_number, 1);
        assert_eq!(second.output_index, 1);
        assert_eq!(second.item_id, "r1:1:call#0");
        assert_eq!(second.content_index, 4);

        let mut third = CanonicalStreamEvent::new(StreamEventType::MessageDelta, "openai", "r1");
        third.output_index = 1;
        third.content_index = 1;
        ctx.stamp(&mut third, Some("call#0"));
        assert_eq!(third.content_index, 4);
    }

    #[test]
    fn test_stamp_keeps_preassigned_sequence() {
        let mut ctx = StreamIndexContext::new();
        let mut event = CanonicalStreamEvent::new(StreamEventType::MessageStop, "gemini", "r");
        event.sequence_number = 41;
        ctx.stamp(&mut event, None);
        assert_eq!(event.sequence_number, 41);
        assert_eq!(ctx.sequences_issued(), 0);
    }
}
