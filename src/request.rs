use serde::{
    de::{self, Visitor},
    ser::SerializeStruct,
    Deserialize, Serialize,
};
use serde_json::{Map, Number, Value};
use std::{
    collections::BTreeSet,
    fmt,
    panic::{self, AssertUnwindSafe},
    str::FromStr,
};

use crate::{
    codec::{Codec, JsonCodec},
    config::Config,
    error::{Error, ErrorObject},
    method::{Arguments, MethodError},
    registry::Dispatch,
    response::Response,
    JSONRPC_VERSION,
};

const REQUIRED_FIELDS: [&str; 2] = ["jsonrpc", "method"];
const POSSIBLE_FIELDS: [&str; 4] = ["jsonrpc", "method", "params", "id"];

/// Method names with this prefix belong to the protocol itself.
pub const RESERVED_METHOD_PREFIX: &str = "rpc.";

/// Represents a JSON-RPC 2.0 request ID: a string or an integer.
///
/// Whether a request carries an id at all is what separates calls from
/// notifications, so there is no `null` variant here; responses that cannot be
/// tied to a request use `Option<RequestId>` instead.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum RequestId {
    Number(Number),
    String(String),
}

impl RequestId {
    /// Reads an id out of a decoded value, accepting only strings and integers.
    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::String(s) => Some(RequestId::String(s.clone())),
            Value::Number(n) if n.is_i64() || n.is_u64() => Some(RequestId::Number(n.clone())),
            _ => None,
        }
    }

    pub fn to_value(&self) -> Value {
        match self {
            RequestId::Number(n) => Value::Number(n.clone()),
            RequestId::String(s) => Value::String(s.clone()),
        }
    }
}

impl From<i32> for RequestId {
    fn from(id: i32) -> Self {
        RequestId::Number(id.into())
    }
}

impl From<i64> for RequestId {
    fn from(id: i64) -> Self {
        RequestId::Number(id.into())
    }
}

impl From<u64> for RequestId {
    fn from(id: u64) -> Self {
        RequestId::Number(id.into())
    }
}

impl From<&str> for RequestId {
    fn from(id: &str) -> Self {
        RequestId::String(id.to_owned())
    }
}

impl From<String> for RequestId {
    fn from(id: String) -> Self {
        RequestId::String(id)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestId::Number(n) => write!(f, "{n}"),
            RequestId::String(s) => write!(f, "{s:?}"),
        }
    }
}

impl Serialize for RequestId {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        match self {
            RequestId::Number(n) => n.serialize(serializer),
            RequestId::String(s) => serializer.serialize_str(s),
        }
    }
}

impl<'de> Deserialize<'de> for RequestId {
    fn deserialize<D>(deserializer: D) -> Result<RequestId, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct RequestIdVisitor;

        impl Visitor<'_> for RequestIdVisitor {
            type Value = RequestId;

            fn expecting(&self, formatter: &mut fmt::Formatter) -> fmt::Result {
                formatter.write_str("a string or an integer")
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(RequestId::String(value.to_owned()))
            }

            fn visit_string<E>(self, value: String) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(RequestId::String(value))
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(RequestId::Number(value.into()))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                Ok(RequestId::Number(value.into()))
            }
        }

        deserializer.deserialize_any(RequestIdVisitor)
    }
}

/// Request parameters: positional or keyed, never both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Params {
    Positional(Vec<Value>),
    Named(Map<String, Value>),
}

impl Params {
    pub fn len(&self) -> usize {
        match self {
            Params::Positional(values) => values.len(),
            Params::Named(map) => map.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn to_value(&self) -> Value {
        match self {
            Params::Positional(values) => Value::Array(values.clone()),
            Params::Named(map) => Value::Object(map.clone()),
        }
    }
}

impl From<Vec<Value>> for Params {
    fn from(values: Vec<Value>) -> Self {
        Params::Positional(values)
    }
}

impl From<Map<String, Value>> for Params {
    fn from(map: Map<String, Value>) -> Self {
        Params::Named(map)
    }
}

/// A validated single request or notification.
///
/// Instances only exist in a valid state: every constructor runs the full set
/// of field checks and fails with [`Error`] otherwise.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: String,
    params: Option<Params>,
    id: Option<RequestId>,
    notification: bool,
}

impl Request {
    /// A call that expects a response.
    pub fn new(
        method: impl Into<String>,
        params: Option<Params>,
        id: impl Into<RequestId>,
    ) -> Result<Self, Error> {
        let method = method.into();
        check_method(&method)?;
        Ok(Self {
            method,
            params,
            id: Some(id.into()),
            notification: false,
        })
    }

    /// A call that is never answered.
    pub fn notification(method: impl Into<String>, params: Option<Params>) -> Result<Self, Error> {
        let method = method.into();
        check_method(&method)?;
        Ok(Self {
            method,
            params,
            id: None,
            notification: true,
        })
    }

    /// Decodes `text` with `codec` and validates the result.
    pub fn parse<C: Codec + ?Sized>(text: &str, codec: &C) -> Result<Self, Error> {
        let value = codec
            .decode(text)
            .map_err(|err| Error::Parse(err.to_string()))?;
        Self::from_value(value)
    }

    /// Validates an already decoded value.
    ///
    /// A non-empty array is rejected with [`Error::MultipleRequests`]: batches
    /// go through [`BatchRequest`](crate::batch::BatchRequest).
    pub fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Object(map) => Self::from_map(map),
            Value::Array(items) if !items.is_empty() => Err(Error::MultipleRequests),
            Value::Array(_) => Err(Error::invalid("empty data")),
            other => Err(Error::invalid(format!(
                "request must be an object, not {}",
                value_kind(&other)
            ))),
        }
    }

    /// Validates a decoded request object. Checks run in a fixed order and the
    /// first failure is reported.
    pub fn from_map(mut map: Map<String, Value>) -> Result<Self, Error> {
        if map.is_empty() {
            return Err(Error::invalid("empty data"));
        }

        let keys: BTreeSet<&str> = map.keys().map(String::as_str).collect();
        let extra: Vec<&str> = keys
            .iter()
            .copied()
            .filter(|key| !POSSIBLE_FIELDS.contains(key))
            .collect();
        let missing: Vec<&str> = REQUIRED_FIELDS
            .into_iter()
            .filter(|key| !keys.contains(key))
            .collect();
        if !extra.is_empty() || !missing.is_empty() {
            return Err(Error::invalid(format!(
                "extra fields: {extra:?}, missing fields: {missing:?}"
            )));
        }

        if map.get("jsonrpc").and_then(Value::as_str) != Some(JSONRPC_VERSION) {
            return Err(Error::invalid(r#""jsonrpc" field must be set to "2.0""#));
        }

        let method = match map.remove("method") {
            Some(Value::String(method)) => method,
            Some(other) => {
                return Err(Error::invalid(format!(
                    r#""method" must be a string, not {}"#,
                    value_kind(&other)
                )))
            }
            None => return Err(Error::invalid("missing method")),
        };
        check_method(&method)?;

        let id = match map.remove("id") {
            Some(value) => Some(RequestId::from_value(&value).ok_or_else(|| {
                Error::invalid(format!(
                    r#""id" must be a string or an integer, not {}"#,
                    value_kind(&value)
                ))
            })?),
            None => None,
        };

        let params = match map.remove("params") {
            Some(Value::Array(values)) => Some(Params::Positional(values)),
            Some(Value::Object(object)) => Some(Params::Named(object)),
            Some(other) => {
                return Err(Error::invalid(format!(
                    r#""params" must be an array or an object, not {}"#,
                    value_kind(&other)
                )))
            }
            None => None,
        };

        Ok(Self {
            method,
            params,
            notification: id.is_none(),
            id,
        })
    }

    pub fn method(&self) -> &str {
        &self.method
    }

    pub fn params(&self) -> Option<&Params> {
        self.params.as_ref()
    }

    /// The stored id. It is kept even while the request is flagged as a
    /// notification, so clearing the flag brings it back.
    pub fn id(&self) -> Option<&RequestId> {
        self.id.as_ref()
    }

    /// Positional parameters; empty unless `params` is an array.
    pub fn args(&self) -> &[Value] {
        match &self.params {
            Some(Params::Positional(values)) => values,
            _ => &[],
        }
    }

    /// Keyed parameters; `None` unless `params` is an object.
    pub fn kwargs(&self) -> Option<&Map<String, Value>> {
        match &self.params {
            Some(Params::Named(map)) => Some(map),
            _ => None,
        }
    }

    pub fn arguments(&self) -> Arguments {
        Arguments::new(self.params.clone())
    }

    /// A request without an id is always a notification; one with an id is a
    /// notification only while flagged as such.
    pub fn is_notification(&self) -> bool {
        self.id.is_none() || self.notification
    }

    pub fn set_notification(&mut self, notification: bool) {
        self.notification = notification;
    }

    /// The request as it goes on the wire. The id is left out while the
    /// request is a notification.
    pub fn data(&self) -> Value {
        let mut data = Map::new();
        data.insert("jsonrpc".into(), JSONRPC_VERSION.into());
        data.insert("method".into(), self.method.clone().into());
        if let Some(params) = &self.params {
            data.insert("params".into(), params.to_value());
        }
        if let Some(id) = self.visible_id() {
            data.insert("id".into(), id.to_value());
        }
        Value::Object(data)
    }

    fn visible_id(&self) -> Option<&RequestId> {
        self.id.as_ref().filter(|_| !self.is_notification())
    }

    /// Looks the method up in `dispatcher` and runs it with default settings.
    pub fn process<D: Dispatch + ?Sized>(&self, dispatcher: &D) -> Option<Response> {
        self.process_with(dispatcher, &Config::default())
    }

    /// Looks the method up in `dispatcher` and runs it.
    ///
    /// Every failure becomes an error response. The method runs for
    /// notifications too, but their response is dropped and `None` returned.
    pub fn process_with<D: Dispatch + ?Sized>(
        &self,
        dispatcher: &D,
        config: &Config,
    ) -> Option<Response> {
        tracing::debug!(
            method = %self.method,
            notification = self.is_notification(),
            "dispatching request"
        );

        let output = match dispatcher.resolve(&self.method) {
            Err(err) => {
                tracing::debug!(error = %err, "no such method");
                Err(ErrorObject::method_not_found())
            }
            Ok(method) => {
                let arguments = self.arguments();
                panic::catch_unwind(AssertUnwindSafe(|| method.call(arguments)))
                    .unwrap_or_else(|payload| Err(MethodError::from_panic(payload)))
                    .map_err(|err| {
                        tracing::warn!(method = %self.method, error = %err, "method failed");
                        err.into_error_object(config.expose_error_details)
                    })
            }
        };

        match output {
            Ok(result) => Response::success(result, self),
            Err(error) => {
                let id = self.visible_id()?;
                Some(Response::from_error(error, Some(id.clone())))
            }
        }
    }
}

fn check_method(method: &str) -> Result<(), Error> {
    if method.is_empty() {
        return Err(Error::invalid(r#""method" must not be empty"#));
    }
    if method.starts_with(RESERVED_METHOD_PREFIX) {
        return Err(Error::invalid(
            "method names that begin with \"rpc.\" are reserved for rpc-internal methods and extensions",
        ));
    }
    Ok(())
}

/// A short name for the JSON type of `value`, for error reasons.
pub(crate) fn value_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(n) if n.is_f64() => "float",
        Value::Number(_) => "integer",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

impl FromStr for Request {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, &JsonCodec::new())
    }
}

impl Serialize for Request {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let id = self.visible_id();
        let len = 2 + usize::from(self.params.is_some()) + usize::from(id.is_some());
        let mut state = serializer.serialize_struct("Request", len)?;
        state.serialize_field("jsonrpc", JSONRPC_VERSION)?;
        state.serialize_field("method", &self.method)?;
        if let Some(params) = &self.params {
            state.serialize_field("params", params)?;
        }
        if let Some(id) = id {
            state.serialize_field("id", id)?;
        }
        state.end()
    }
}

impl<'de> Deserialize<'de> for Request {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let value = Value::deserialize(deserializer)?;
        Request::from_value(value).map_err(de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{method::from_fn, registry::MethodRegistry};
    use rstest::rstest;
    use serde_json::{from_value, json};

    fn registry() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry.insert(
            "echo",
            from_fn(|args: Arguments| Ok(args.get(0).cloned().unwrap_or(Value::Null))),
        );
        registry.insert(
            "fail",
            from_fn(|_| Err(MethodError::failed("ValueError", "error_explanation"))),
        );
        registry
    }

    fn expect_invalid(value: Value) -> String {
        match Request::from_value(value) {
            Err(Error::InvalidRequest(reason)) => reason,
            other => panic!("expected InvalidRequest, got {other:?}"),
        }
    }

    #[test]
    fn serialize_number_id() {
        assert_eq!(json!(42), serde_json::to_value(RequestId::from(42)).unwrap());
    }

    #[test]
    fn serialize_string_id() {
        assert_eq!(
            json!("abc"),
            serde_json::to_value(RequestId::from("abc")).unwrap()
        );
    }

    #[test]
    fn deserialize_number_id() {
        assert_eq!(RequestId::from(42), from_value::<RequestId>(json!(42)).unwrap());
    }

    #[test]
    fn deserialize_string_id() {
        assert_eq!(
            RequestId::String("abc".to_string()),
            from_value::<RequestId>(json!("abc")).unwrap()
        );
    }

    #[rstest]
    #[case::float(json!(42.5))]
    #[case::null(json!(null))]
    #[case::array(json!([1, 2, 3]))]
    #[case::object(json!({"id": 1}))]
    #[case::boolean(json!(true))]
    fn reject_id(#[case] value: Value) {
        assert!(from_value::<RequestId>(value.clone()).is_err());
        assert_eq!(RequestId::from_value(&value), None);
    }

    #[test]
    fn deserialize_valid_request() {
        let request: Request = from_value(json!({
            "jsonrpc": "2.0",
            "method": "subtract",
            "params": [42, 23],
            "id": 1
        }))
        .unwrap();
        assert_eq!(request.method(), "subtract");
        assert_eq!(request.args(), &[json!(42), json!(23)]);
        assert_eq!(request.kwargs(), None);
        assert_eq!(request.id(), Some(&RequestId::from(1)));
        assert!(!request.is_notification());
    }

    #[test]
    fn request_without_id_is_notification() {
        let request: Request = "{\"jsonrpc\": \"2.0\", \"method\": \"update\"}".parse().unwrap();
        assert!(request.is_notification());
        assert_eq!(request.id(), None);
        assert!(request.args().is_empty());
        assert_eq!(request.kwargs(), None);
    }

    #[test]
    fn named_params_project_to_kwargs() {
        let request = Request::from_value(json!({
            "jsonrpc": "2.0",
            "method": "greet",
            "params": {"name": "ada"},
            "id": "x"
        }))
        .unwrap();
        assert!(request.args().is_empty());
        assert_eq!(request.kwargs().unwrap().get("name"), Some(&json!("ada")));
    }

    #[test]
    fn parse_failure_is_distinct_from_validation() {
        assert!(matches!(
            "{\"jsonrpc\": \"2.0\", \"method\": ".parse::<Request>(),
            Err(Error::Parse(_))
        ));
    }

    #[test]
    fn array_is_multiple_requests() {
        let batch = json!([{"jsonrpc": "2.0", "method": "a", "id": 1}]);
        assert!(matches!(
            Request::from_value(batch),
            Err(Error::MultipleRequests)
        ));
        assert!(matches!(
            "[{\"jsonrpc\": \"2.0\", \"method\": \"a\"}]".parse::<Request>(),
            Err(Error::MultipleRequests)
        ));
    }

    #[rstest]
    #[case::empty_array(json!([]))]
    #[case::empty_object(json!({}))]
    #[case::number(json!(1))]
    #[case::string(json!("request"))]
    #[case::null(json!(null))]
    fn reject_non_request_values(#[case] value: Value) {
        expect_invalid(value);
    }

    #[test]
    fn reject_extra_and_missing_fields() {
        let reason = expect_invalid(json!({"jsonrpc": "2.0", "params": [], "extra": 1}));
        assert!(reason.contains("extra"), "{reason}");
        assert!(reason.contains("method"), "{reason}");
    }

    #[rstest]
    #[case::old_version(json!("1.0"))]
    #[case::numeric_version(json!(2.0))]
    #[case::null_version(json!(null))]
    fn reject_wrong_version(#[case] version: Value) {
        let reason = expect_invalid(json!({"jsonrpc": version, "method": "m", "id": 1}));
        assert!(reason.contains("2.0"), "{reason}");
    }

    #[test]
    fn reject_non_string_method() {
        expect_invalid(json!({"jsonrpc": "2.0", "method": 1, "params": "bar"}));
    }

    #[rstest]
    #[case::reserved("rpc.discover", false)]
    #[case::bare_prefix("rpc.", false)]
    #[case::empty("", false)]
    #[case::rpc_alone("rpc", true)]
    #[case::rpc_glued("rpccorrect", true)]
    #[case::dotted("math.add", true)]
    fn method_name_rules(#[case] method: &str, #[case] valid: bool) {
        let result = Request::from_value(json!({"jsonrpc": "2.0", "method": method, "id": 1}));
        assert_eq!(result.is_ok(), valid, "{method}: {result:?}");
        assert_eq!(Request::notification(method, None).is_ok(), valid);
    }

    #[rstest]
    #[case::null(json!(null))]
    #[case::float(json!(1.5))]
    #[case::array(json!([1]))]
    #[case::object(json!({"n": 1}))]
    #[case::boolean(json!(false))]
    fn reject_bad_ids(#[case] id: Value) {
        expect_invalid(json!({"jsonrpc": "2.0", "method": "m", "id": id}));
    }

    #[rstest]
    #[case::null(json!(null))]
    #[case::string(json!("bar"))]
    #[case::number(json!(3))]
    #[case::boolean(json!(true))]
    fn reject_bad_params(#[case] params: Value) {
        expect_invalid(json!({"jsonrpc": "2.0", "method": "m", "params": params, "id": 1}));
    }

    #[test]
    fn field_checks_run_in_order() {
        // Both the version and the params are wrong; the version is reported.
        let reason = expect_invalid(json!({"jsonrpc": "1.0", "method": "m", "params": 3}));
        assert!(reason.contains("jsonrpc"), "{reason}");
    }

    #[test]
    fn notification_flag_round_trips() {
        let original = Request::new("echo", Some(Params::from(vec![json!(1)])), 7).unwrap();
        let mut request = original.clone();

        request.set_notification(true);
        assert!(request.is_notification());
        assert_eq!(
            request.data(),
            json!({"jsonrpc": "2.0", "method": "echo", "params": [1]})
        );
        assert_eq!(request.id(), Some(&RequestId::from(7)));

        request.set_notification(false);
        assert!(!request.is_notification());
        assert_eq!(request, original);
        assert_eq!(
            request.data(),
            json!({"jsonrpc": "2.0", "method": "echo", "params": [1], "id": 7})
        );
    }

    #[test]
    fn clearing_flag_without_id_keeps_notification() {
        let mut request = Request::notification("ping", None).unwrap();
        request.set_notification(false);
        assert!(request.is_notification());
    }

    #[test]
    fn serialize_matches_data() {
        let request = Request::new("subtract", Some(Params::from(vec![json!(42), json!(23)])), 1)
            .unwrap();
        assert_eq!(
            json!({"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": 1}),
            serde_json::to_value(&request).unwrap()
        );
        assert_eq!(serde_json::to_value(&request).unwrap(), request.data());
    }

    #[test]
    fn serialize_request_without_params() {
        let request = Request::new("ping", None, "a").unwrap();
        assert_eq!(
            json!({"jsonrpc": "2.0", "method": "ping", "id": "a"}),
            serde_json::to_value(request).unwrap()
        );
    }

    #[test]
    fn process_returns_success() {
        let request = Request::new("echo", Some(Params::from(vec![json!("foo")])), 1).unwrap();
        let response = request.process(&registry()).unwrap();
        assert_eq!(response.result(), Some(&json!("foo")));
        assert_eq!(response.id(), Some(&RequestId::from(1)));
    }

    #[test]
    fn process_reports_missing_method() {
        let request = Request::new("nope", None, 1).unwrap();
        let response = request.process(&registry()).unwrap();
        assert_eq!(response.error(), Some(&ErrorObject::method_not_found()));
        assert_eq!(response.id(), Some(&RequestId::from(1)));
    }

    #[test]
    fn process_reports_method_failure() {
        let request = Request::new("fail", None, 1).unwrap();
        let response = request.process(&registry()).unwrap();
        assert_eq!(
            response.error(),
            Some(&ErrorObject::server_error().with_data(json!({
                "type": "ValueError",
                "message": "error_explanation"
            })))
        );
    }

    #[test]
    fn process_hides_details_when_configured() {
        let config = Config {
            expose_error_details: false,
            ..Config::default()
        };
        let request = Request::new("fail", None, 1).unwrap();
        let response = request.process_with(&registry(), &config).unwrap();
        assert_eq!(response.error(), Some(&ErrorObject::server_error()));
    }

    #[test]
    fn process_silences_notifications() {
        let registry = registry();
        for method in ["echo", "fail", "nope"] {
            let request = Request::notification(method, None).unwrap();
            assert_eq!(request.process(&registry), None, "{method}");
        }
    }

    #[test]
    fn process_silences_flagged_notifications() {
        let registry = registry();
        for method in ["echo", "fail", "nope"] {
            let mut request = Request::new(method, None, 4).unwrap();
            request.set_notification(true);
            assert_eq!(request.process(&registry), None, "{method}");
            request.set_notification(false);
            assert_eq!(
                request.process(&registry).unwrap().id(),
                Some(&RequestId::from(4))
            );
        }
    }

    #[test]
    fn process_catches_panics() {
        let mut registry = registry();
        registry.insert("explode", from_fn(|_| panic!("kaboom")));
        let response = Request::new("explode", None, 3)
            .unwrap()
            .process(&registry)
            .unwrap();
        let error = response.error().unwrap();
        assert_eq!(error.code(), crate::error::ErrorCode::SERVER_ERROR);
        assert_eq!(error.data(), Some(&json!({"type": "panic", "message": "kaboom"})));
    }
}
