//! Text encoding of envelopes.
//!
//! The engine never touches JSON text directly; it goes through a [`Codec`].
//! [`JsonCodec`] is the `serde_json` implementation and can carry
//! [`ObjectHook`]s that rewrite objects on the way in and out, which is how
//! values JSON has no native form for (see [`temporal`]) travel on the wire.

pub mod temporal;

use serde_json::{Map, Value};
use std::{fmt, sync::Arc};
use thiserror::Error;

pub use temporal::{Temporal, TemporalHook};

#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// An object hook refused a value.
    #[error("{0}")]
    Hook(String),
}

/// Turns values into text and back.
pub trait Codec: Send + Sync {
    fn encode(&self, value: &Value) -> Result<String, CodecError>;

    fn decode(&self, text: &str) -> Result<Value, CodecError>;
}

/// Rewrites individual JSON objects during encoding or decoding.
///
/// Hooks run bottom-up: an object's members have already been rewritten when
/// the object itself reaches the hook. Both directions default to passing the
/// object through unchanged.
pub trait ObjectHook: Send + Sync {
    fn decode_object(&self, object: Map<String, Value>) -> Result<Value, CodecError> {
        Ok(Value::Object(object))
    }

    fn encode_object(&self, object: Map<String, Value>) -> Result<Value, CodecError> {
        Ok(Value::Object(object))
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Encode,
    Decode,
}

/// `serde_json` codec with an ordered list of object hooks.
#[derive(Clone, Default)]
pub struct JsonCodec {
    hooks: Vec<Arc<dyn ObjectHook>>,
}

impl JsonCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a hook. Hooks run in the order they were added.
    pub fn with_hook(mut self, hook: impl ObjectHook + 'static) -> Self {
        self.hooks.push(Arc::new(hook));
        self
    }

    fn rewrite(&self, value: Value, direction: Direction) -> Result<Value, CodecError> {
        match value {
            Value::Array(items) => items
                .into_iter()
                .map(|item| self.rewrite(item, direction))
                .collect::<Result<Vec<_>, _>>()
                .map(Value::Array),
            Value::Object(object) => {
                let mut rewritten = Map::with_capacity(object.len());
                for (key, member) in object {
                    rewritten.insert(key, self.rewrite(member, direction)?);
                }

                let mut value = Value::Object(rewritten);
                for hook in &self.hooks {
                    // Once a hook turns the object into something else the
                    // remaining hooks have nothing to look at.
                    let Value::Object(object) = value else {
                        break;
                    };
                    value = match direction {
                        Direction::Encode => hook.encode_object(object)?,
                        Direction::Decode => hook.decode_object(object)?,
                    };
                }
                Ok(value)
            }
            scalar => Ok(scalar),
        }
    }
}

impl Codec for JsonCodec {
    fn encode(&self, value: &Value) -> Result<String, CodecError> {
        if self.hooks.is_empty() {
            return Ok(serde_json::to_string(value)?);
        }
        let value = self.rewrite(value.clone(), Direction::Encode)?;
        Ok(serde_json::to_string(&value)?)
    }

    fn decode(&self, text: &str) -> Result<Value, CodecError> {
        let value: Value = serde_json::from_str(text)?;
        if self.hooks.is_empty() {
            return Ok(value);
        }
        self.rewrite(value, Direction::Decode)
    }
}

impl fmt::Debug for JsonCodec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonCodec")
            .field("hooks", &self.hooks.len())
            .finish()
    }
}
