use serde::de::{self, SeqAccess, Visitor};
use serde::ser::SerializeSeq;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::ids::MessageId;

/// Wire message: `[correlation_id, topic, body, expects_response?]`.
///
/// Serialized as a 3-element JSON array when no response is expected and a
/// 4-element array when one is; deserialization accepts both forms.
#[derive(Clone, Debug, PartialEq)]
pub struct Envelope {
    pub id: MessageId,
    pub topic: String,
    pub body: Option<serde_json::Value>,
    pub expects_response: bool,
}

impl Envelope {
    pub fn new(topic: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            body,
            expects_response: false,
        }
    }

    pub fn request(topic: impl Into<String>, body: Option<serde_json::Value>) -> Self {
        Self {
            id: MessageId::new(),
            topic: topic.into(),
            body,
            expects_response: true,
        }
    }
}

impl Serialize for Envelope {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let len = if self.expects_response { 4 } else { 3 };
        let mut seq = serializer.serialize_seq(Some(len))?;
        seq.serialize_element(&self.id)?;
        seq.serialize_element(&self.topic)?;
        seq.serialize_element(&self.body)?;
        if self.expects_response {
            seq.serialize_element(&true)?;
        }
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Envelope {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct EnvelopeVisitor;

        impl<'de> Visitor<'de> for EnvelopeVisitor {
            type Value = Envelope;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a 3- or 4-element message array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Envelope, A::Error> {
                let id: MessageId = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let topic: String = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let body: Option<serde_json::Value> = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let expects_response: bool = seq.next_element()?.unwrap_or(false);
                // Null body on the wire means "no body".
                let body = body.filter(|b| !b.is_null());
                Ok(Envelope {
                    id,
                    topic,
                    body,
                    expects_response,
                })
            }
        }

        deserializer.deserialize_seq(EnvelopeVisitor)
    }
}

/// How a transport encodes envelopes on the wire.
///
/// `Json` is the default text encoding; `Structured` posts the structured
/// value without stringification (used by bridges whose channel already
/// carries structured clones).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum WireEncoding {
    #[default]
    Json,
    Structured,
}

/// A wire payload in the transport's chosen encoding.
#[derive(Clone, Debug, PartialEq)]
pub enum WirePayload {
    Text(String),
    Structured(serde_json::Value),
}

impl WireEncoding {
    pub fn encode(&self, envelope: &Envelope) -> Result<WirePayload, serde_json::Error> {
        match self {
            Self::Json => Ok(WirePayload::Text(serde_json::to_string(envelope)?)),
            Self::Structured => Ok(WirePayload::Structured(serde_json::to_value(envelope)?)),
        }
    }

    pub fn decode(&self, payload: &WirePayload) -> Result<Envelope, serde_json::Error> {
        match payload {
            WirePayload::Text(text) => serde_json::from_str(text),
            WirePayload::Structured(value) => serde_json::from_value(value.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fire_and_forget_serializes_to_three_elements() {
        let env = Envelope::new("ar.focus.state", Some(serde_json::json!({"focused": true})));
        let json = serde_json::to_value(&env).unwrap();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 3);
        assert_eq!(arr[1], "ar.focus.state");
    }

    #[test]
    fn request_serializes_to_four_elements() {
        let env = Envelope::request("ar.reality.request", None);
        let json = serde_json::to_value(&env).unwrap();
        let arr = json.as_array().unwrap();
        assert_eq!(arr.len(), 4);
        assert_eq!(arr[3], true);
    }

    #[test]
    fn deserializes_three_element_array() {
        let env: Envelope =
            serde_json::from_str(r#"["msg_1","echo",{"n":1}]"#).unwrap();
        assert_eq!(env.topic, "echo");
        assert!(!env.expects_response);
        assert_eq!(env.body, Some(serde_json::json!({"n":1})));
    }

    #[test]
    fn deserializes_four_element_array() {
        let env: Envelope =
            serde_json::from_str(r#"["msg_1","echo",null,true]"#).unwrap();
        assert!(env.expects_response);
        assert_eq!(env.body, None);
    }

    #[test]
    fn rejects_malformed_arrays() {
        assert!(serde_json::from_str::<Envelope>(r#"["msg_1"]"#).is_err());
        assert!(serde_json::from_str::<Envelope>(r#"{"topic":"echo"}"#).is_err());
    }

    #[test]
    fn roundtrip_preserves_envelope() {
        let env = Envelope::request("ar.entity.subscribe", Some(serde_json::json!({"id": "e1"})));
        let json = serde_json::to_string(&env).unwrap();
        let parsed: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, env);
    }

    #[test]
    fn correlation_ids_are_fresh_per_envelope() {
        let a = Envelope::new("t", None);
        let b = Envelope::new("t", None);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn json_encoding_roundtrip() {
        let env = Envelope::new("echo", Some(serde_json::json!({"n": 1})));
        let payload = WireEncoding::Json.encode(&env).unwrap();
        assert!(matches!(payload, WirePayload::Text(_)));
        let decoded = WireEncoding::Json.decode(&payload).unwrap();
        assert_eq!(decoded, env);
    }

    #[test]
    fn structured_encoding_bypasses_stringification() {
        let env = Envelope::new("echo", Some(serde_json::json!({"n": 1})));
        let payload = WireEncoding::Structured.encode(&env).unwrap();
        assert!(matches!(payload, WirePayload::Structured(_)));
        let decoded = WireEncoding::Structured.decode(&payload).unwrap();
        assert_eq!(decoded, env);
    }
}
