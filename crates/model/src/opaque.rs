use std::any::Any;
use std::fmt::{self, Debug, Formatter};
use std::hash::{Hash, Hasher};
use std::sync::Arc;

/// A provider-specific assistant turn carried through the conversation.
///
/// Provider-neutral types can lose details that a provider needs when the
/// history is sent back, e.g. the exact tool call ids or reasoning content.
/// A provider wraps its own message structure in an `OpaqueMessage`, and
/// unwraps it again when it serializes the next request.
pub struct OpaqueMessage(Arc<dyn OpaqueMessageObject>);

impl OpaqueMessage {
    /// Creates a new `OpaqueMessage`.
    ///
    /// The `id` should be unique across the conversation. Two opaque
    /// messages are equal when their ids are equal.
    #[inline]
    pub fn new<ID: Into<String>, T: Send + Sync + 'static>(
        id: ID,
        value: T,
    ) -> Self {
        let id = id.into();
        Self(Arc::new(OpaqueMessageInner { id, value }))
    }

    /// Returns the id of this message.
    #[inline]
    pub fn id(&self) -> &str {
        self.0.id()
    }

    /// Borrows the wrapped value if it has type `T`.
    #[inline]
    pub fn to_raw<T: 'static>(&self) -> Option<&T> {
        self.0.as_any().downcast_ref()
    }
}

impl Clone for OpaqueMessage {
    #[inline]
    fn clone(&self) -> Self {
        Self(Arc::clone(&self.0))
    }
}

impl Debug for OpaqueMessage {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        f.debug_tuple("OpaqueMessage").field(&self.id()).finish()
    }
}

impl PartialEq for OpaqueMessage {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for OpaqueMessage {}

impl Hash for OpaqueMessage {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id().hash(state);
    }
}

trait OpaqueMessageObject: Send + Sync {
    fn id(&self) -> &str;
    fn as_any(&self) -> &dyn Any;
}

struct OpaqueMessageInner<T> {
    id: String,
    value: T,
}

impl<T: Send + Sync + 'static> OpaqueMessageObject for OpaqueMessageInner<T> {
    fn id(&self) -> &str {
        &self.id
    }

    fn as_any(&self) -> &dyn Any {
        &self.value
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct ProviderTurn {
        tool_call_ids: Vec<&'static str>,
    }

    #[test]
    fn test_unwrap_provider_turn() {
        let opaque = OpaqueMessage::new(
            "chatcmpl-1",
            ProviderTurn {
                tool_call_ids: vec!["call_a", "call_b"],
            },
        );
        assert_eq!(opaque.id(), "chatcmpl-1");
        let turn = opaque.to_raw::<ProviderTurn>().unwrap();
        assert_eq!(turn.tool_call_ids, ["call_a", "call_b"]);
        assert!(opaque.to_raw::<String>().is_none());
    }

    #[test]
    fn test_equality_follows_id() {
        let first = OpaqueMessage::new("turn:0", "a".to_owned());
        let same_id = OpaqueMessage::new("turn:0", 42_u32);
        let other = OpaqueMessage::new("turn:1", "a".to_owned());
        assert_eq!(first, same_id);
        assert_ne!(first, other);
        assert_eq!(first.clone(), first);
    }
}
