use serde::{
    de::{self, Visitor},
    ser::SerializeStruct,
    Deserialize, Serialize,
};
use serde_json::{Map, Value};
use std::fmt;

use crate::{
    batch::BatchResponse,
    error::ErrorObject,
    request::{Request, RequestId},
    JSONRPC_VERSION,
};

/// A single response: either a result or an error, bound to a request id.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    id: Option<RequestId>,
    payload: Payload,
}

/// The two exclusive shapes a response can take.
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Result(Value),
    Error(ErrorObject),
}

impl Response {
    /// A successful response to `request`, carrying its id.
    ///
    /// Notifications are never answered, so this is `None` for a request
    /// without an id or one flagged as a notification.
    pub fn success(result: Value, request: &Request) -> Option<Self> {
        if request.is_notification() {
            return None;
        }
        Some(Self {
            id: Some(request.id()?.clone()),
            payload: Payload::Result(result),
        })
    }

    /// An error response. `id` is `None` when the request could not be read
    /// far enough to find one.
    pub fn from_error(error: ErrorObject, id: Option<RequestId>) -> Self {
        Self {
            id,
            payload: Payload::Error(error),
        }
    }

    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    pub fn payload(&self) -> &Payload {
        &self.payload
    }

    pub fn result(&self) -> Option<&Value> {
        match &self.payload {
            Payload::Result(result) => Some(result),
            Payload::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&ErrorObject> {
        match &self.payload {
            Payload::Error(error) => Some(error),
            Payload::Result(_) => None,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.payload, Payload::Error(_))
    }

    /// The response as a JSON value, ready for the codec.
    pub fn container(&self) -> Value {
        let mut data = Map::new();
        data.insert("jsonrpc".into(), JSONRPC_VERSION.into());
        match &self.payload {
            Payload::Result(result) => {
                data.insert("result".into(), result.clone());
            }
            Payload::Error(error) => {
                let mut object = Map::new();
                object.insert("code".into(), error.code().code().into());
                object.insert("message".into(), error.message().into());
                if let Some(value) = error.data() {
                    object.insert("data".into(), value.clone());
                }
                data.insert("error".into(), Value::Object(object));
            }
        }
        data.insert(
            "id".into(),
            self.id.as_ref().map_or(Value::Null, RequestId::to_value),
        );
        Value::Object(data)
    }
}

impl Serialize for Response {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state = serializer.serialize_struct("Response", 3)?;
        // Every envelope carries "jsonrpc": "2.0".
        state.serialize_field("jsonrpc", JSONRPC_VERSION)?;
        match &self.payload {
            Payload::Result(result) => state.serialize_field("result", result)?,
            Payload::Error(err) => state.serialize_field("error", err)?,
        }
        state.serialize_field("id", &self.id)?;
        state.end()
    }
}

impl<'de> Deserialize<'de> for Response {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ResponseVisitor;

        impl<'de> Visitor<'de> for ResponseVisitor {
            type Value = Response;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a JSON-RPC 2.0 response object")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Self::Value, V::Error>
            where
                V: de::MapAccess<'de>,
            {
                let mut version = None;
                let mut id: Option<Option<RequestId>> = None;
                let mut payload = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "jsonrpc" if version.is_some() => {
                            return Err(de::Error::duplicate_field("jsonrpc"))
                        }
                        "jsonrpc" => {
                            let value: String = map.next_value()?;
                            if value != JSONRPC_VERSION {
                                return Err(de::Error::custom(format!(
                                    "invalid JSON-RPC version: {value}"
                                )));
                            }
                            version = Some(value);
                        }
                        "id" if id.is_some() => return Err(de::Error::duplicate_field("id")),
                        "id" => id = Some(map.next_value()?),
                        "result" | "error" if payload.is_some() => {
                            return Err(de::Error::custom(
                                "a response has exactly one of result and error",
                            ))
                        }
                        "result" => payload = Some(Payload::Result(map.next_value()?)),
                        "error" => payload = Some(Payload::Error(map.next_value()?)),
                        _ => {
                            return Err(de::Error::unknown_field(
                                &key,
                                &["jsonrpc", "result", "error", "id"],
                            ))
                        }
                    }
                }

                version.ok_or_else(|| de::Error::missing_field("jsonrpc"))?;
                let id = id.ok_or_else(|| de::Error::missing_field("id"))?;
                let payload = payload
                    .ok_or_else(|| de::Error::custom("missing both result and error fields"))?;
                if matches!(payload, Payload::Result(_)) && id.is_none() {
                    return Err(de::Error::custom("a successful response needs an id"));
                }

                Ok(Response { id, payload })
            }
        }

        deserializer.deserialize_map(ResponseVisitor)
    }
}

/// Everything the engine can answer with for one input payload.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Single(Response),
    Batch(BatchResponse),
}

impl Reply {
    pub fn container(&self) -> Value {
        match self {
            Reply::Single(response) => response.container(),
            Reply::Batch(batch) => batch.container(),
        }
    }

    /// The single response, if this is not a batch reply.
    pub fn as_single(&self) -> Option<&Response> {
        match self {
            Reply::Single(response) => Some(response),
            Reply::Batch(_) => None,
        }
    }

    pub fn as_batch(&self) -> Option<&BatchResponse> {
        match self {
            Reply::Batch(batch) => Some(batch),
            Reply::Single(_) => None,
        }
    }
}

impl From<Response> for Reply {
    fn from(response: Response) -> Self {
        Reply::Single(response)
    }
}

impl From<BatchResponse> for Reply {
    fn from(batch: BatchResponse) -> Self {
        Reply::Batch(batch)
    }
}

impl Serialize for Reply {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            Reply::Single(response) => response.serialize(serializer),
            Reply::Batch(batch) => batch.serialize(serializer),
        }
    }
}
