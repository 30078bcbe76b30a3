use serde::{
    de::{self, Visitor},
    ser::SerializeStruct,
    Deserialize, Serialize,
};
use serde_json::Value;
use std::fmt;
use thiserror::Error;

use crate::response::Response;

/// Lowest code of the range reserved for pre-defined protocol errors.
pub const RESERVED_MIN: i64 = -32768;
/// Highest code of the range reserved for pre-defined protocol errors.
pub const RESERVED_MAX: i64 = -32000;

/// JSON-RPC 2.0 error codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    /// Invalid JSON was received by the server.
    /// An error occurred on the server while parsing the JSON text.
    ParseError,
    /// The JSON sent is not a valid Request object.
    InvalidRequest,
    /// The method does not exist / is not available.
    MethodNotFound,
    /// Invalid method parameter(s).
    InvalidParams,
    /// Internal JSON-RPC error.
    InternalError,
    /// An implementation-defined server error, -32099 to -32000.
    ServerError(i64),
    /// A code in the reserved range that the protocol leaves undefined.
    Reserved(i64),
    /// Custom error code defined by the application, outside the reserved range.
    ApplicationError(i64),
}

impl ErrorCode {
    /// The generic server error used when a method fails.
    pub const SERVER_ERROR: ErrorCode = ErrorCode::ServerError(-32000);

    pub fn code(&self) -> i64 {
        i64::from(*self)
    }

    /// The message the protocol pairs with this code.
    pub fn message(&self) -> &'static str {
        match self {
            ErrorCode::ParseError => "Parse error",
            ErrorCode::InvalidRequest => "Invalid Request",
            ErrorCode::MethodNotFound => "Method not found",
            ErrorCode::InvalidParams => "Invalid params",
            ErrorCode::InternalError => "Internal error",
            ErrorCode::ServerError(_) => "Server error",
            ErrorCode::Reserved(_) => "Reserved error",
            ErrorCode::ApplicationError(_) => "Application error",
        }
    }

    /// Whether the code falls in the range the protocol reserves for itself.
    pub fn is_reserved(&self) -> bool {
        (RESERVED_MIN..=RESERVED_MAX).contains(&self.code())
    }
}

impl From<ErrorCode> for i64 {
    fn from(code: ErrorCode) -> i64 {
        match code {
            ErrorCode::ParseError => -32700,
            ErrorCode::InvalidRequest => -32600,
            ErrorCode::MethodNotFound => -32601,
            ErrorCode::InvalidParams => -32602,
            ErrorCode::InternalError => -32603,
            ErrorCode::ServerError(code) => code,
            ErrorCode::Reserved(code) => code,
            ErrorCode::ApplicationError(code) => code,
        }
    }
}

impl From<i64> for ErrorCode {
    fn from(code: i64) -> ErrorCode {
        match code {
            -32700 => ErrorCode::ParseError,
            -32600 => ErrorCode::InvalidRequest,
            -32601 => ErrorCode::MethodNotFound,
            -32602 => ErrorCode::InvalidParams,
            -32603 => ErrorCode::InternalError,
            code if (-32099..=-32000).contains(&code) => ErrorCode::ServerError(code),
            code if (RESERVED_MIN..=RESERVED_MAX).contains(&code) => ErrorCode::Reserved(code),
            code => ErrorCode::ApplicationError(code),
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.code())
    }
}

impl Serialize for ErrorCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.code().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for ErrorCode {
    fn deserialize<D>(deserializer: D) -> Result<ErrorCode, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let code = i64::deserialize(deserializer)?;
        Ok(ErrorCode::from(code))
    }
}

/// The `error` member of an error response: `{code, message, data?}`.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorObject {
    code: ErrorCode,
    message: String,
    data: Option<Value>,
}

impl ErrorObject {
    pub fn new(code: ErrorCode, message: impl Into<String>, data: Option<Value>) -> Self {
        Self {
            code,
            message: message.into(),
            data,
        }
    }

    pub fn parse_error() -> Self {
        Self::from(ErrorCode::ParseError)
    }

    pub fn invalid_request() -> Self {
        Self::from(ErrorCode::InvalidRequest)
    }

    pub fn method_not_found() -> Self {
        Self::from(ErrorCode::MethodNotFound)
    }

    pub fn invalid_params() -> Self {
        Self::from(ErrorCode::InvalidParams)
    }

    pub fn internal_error() -> Self {
        Self::from(ErrorCode::InternalError)
    }

    pub fn server_error() -> Self {
        Self::from(ErrorCode::SERVER_ERROR)
    }

    /// Attaches caller-supplied `data`, replacing any already present.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    pub fn code(&self) -> ErrorCode {
        self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn data(&self) -> Option<&Value> {
        self.data.as_ref()
    }

    /// Wraps the error in a standalone response with a `null` id.
    pub fn as_response(self) -> Response {
        Response::from_error(self, None)
    }
}

impl From<ErrorCode> for ErrorObject {
    fn from(code: ErrorCode) -> Self {
        Self::new(code, code.message(), None)
    }
}

impl fmt::Display for ErrorObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl Serialize for ErrorObject {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut state =
            serializer.serialize_struct("ErrorObject", if self.data.is_some() { 3 } else { 2 })?;
        state.serialize_field("code", &self.code)?;
        state.serialize_field("message", &self.message)?;
        if let Some(data) = &self.data {
            state.serialize_field("data", data)?;
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for ErrorObject {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct ErrorObjectVisitor;

        impl<'de> Visitor<'de> for ErrorObjectVisitor {
            type Value = ErrorObject;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a JSON-RPC 2.0 error object")
            }

            fn visit_map<V>(self, mut map: V) -> Result<Self::Value, V::Error>
            where
                V: de::MapAccess<'de>,
            {
                let mut code = None;
                let mut message = None;
                let mut data: Option<Value> = None;

                while let Some(key) = map.next_key::<String>()? {
                    match key.as_str() {
                        "code" if code.is_some() => return Err(de::Error::duplicate_field("code")),
                        "code" => code = Some(map.next_value()?),
                        "message" if message.is_some() => {
                            return Err(de::Error::duplicate_field("message"))
                        }
                        "message" => message = Some(map.next_value()?),
                        "data" if data.is_some() => return Err(de::Error::duplicate_field("data")),
                        "data" => data = Some(map.next_value()?),
                        _ => {
                            return Err(de::Error::unknown_field(
                                &key,
                                &["code", "message", "data"],
                            ))
                        }
                    }
                }

                let code = code.ok_or_else(|| de::Error::missing_field("code"))?;
                let message = message.ok_or_else(|| de::Error::missing_field("message"))?;
                // An explicit `"data": null` is the same as no data at all.
                let data = data.filter(|data| !data.is_null());

                Ok(ErrorObject {
                    code,
                    message,
                    data,
                })
            }
        }

        deserializer.deserialize_map(ErrorObjectVisitor)
    }
}

/// Failures raised while building envelopes directly, before any method runs.
///
/// The response manager converts every variant into an error response; callers
/// that construct requests themselves see them as plain `Err` values.
#[derive(Debug, Error)]
pub enum Error {
    /// The input text could not be decoded.
    #[error("parse error: {0}")]
    Parse(String),

    /// A non-empty array was handed to the single-request constructor.
    #[error("found multiple requests, use a batch instead")]
    MultipleRequests,

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The method carries no declared name and none was supplied.
    #[error("cannot register a method without a name")]
    UnnamedMethod,
}

impl Error {
    pub(crate) fn invalid(reason: impl Into<String>) -> Self {
        Error::InvalidRequest(reason.into())
    }

    /// The taxonomy entry this failure is reported as on the wire.
    pub fn to_error_object(&self) -> ErrorObject {
        match self {
            Error::Parse(_) => ErrorObject::parse_error(),
            Error::MultipleRequests | Error::InvalidRequest(_) => ErrorObject::invalid_request(),
            Error::UnnamedMethod => ErrorObject::internal_error(),
        }
    }
}
