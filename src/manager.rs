//! Raw text in, raw text out.
//!
//! [`ResponseManager`] is the one place that sees undecoded payloads. It
//! decodes them, routes objects to [`Request`] and arrays to [`BatchRequest`],
//! and turns every construction failure into the matching error response, so
//! callers only ever get a reply or nothing.

use serde_json::Value;

use crate::{
    batch::BatchRequest,
    codec::{Codec, JsonCodec},
    config::Config,
    error::{Error, ErrorObject},
    registry::Dispatch,
    request::{value_kind, Request},
    response::{Reply, Response},
};

#[derive(Debug, Clone, Default)]
pub struct ResponseManager<C = JsonCodec> {
    codec: C,
    config: Config,
}

impl ResponseManager {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Codec> ResponseManager<C> {
    pub fn with_codec(codec: C) -> Self {
        Self {
            codec,
            config: Config::default(),
        }
    }

    pub fn with_config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn codec(&self) -> &C {
        &self.codec
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Handles one raw payload.
    ///
    /// Returns `None` when there is nothing to send back: a single
    /// notification, or a batch made only of notifications.
    pub fn handle<D: Dispatch + ?Sized>(&self, raw: &str, dispatcher: &D) -> Option<Reply> {
        let value = match self.codec.decode(raw) {
            Ok(value) => value,
            Err(err) => {
                tracing::debug!(error = %err, "cannot decode request");
                return Some(ErrorObject::parse_error().as_response().into());
            }
        };
        self.handle_value(value, dispatcher)
    }

    /// Handles an already decoded payload.
    pub fn handle_value<D: Dispatch + ?Sized>(
        &self,
        value: Value,
        dispatcher: &D,
    ) -> Option<Reply> {
        match value {
            Value::Array(items) if !self.config.accepts_batch(items.len()) => {
                tracing::debug!(len = items.len(), "batch too large");
                Some(ErrorObject::invalid_request().as_response().into())
            }
            Value::Array(items) => match BatchRequest::from_values(items) {
                Ok(batch) => batch
                    .process_with(dispatcher, &self.config)
                    .map(Reply::from),
                Err(err) => Some(rejected(err).into()),
            },
            Value::Object(map) => match Request::from_map(map) {
                Ok(request) => request
                    .process_with(dispatcher, &self.config)
                    .map(Reply::from),
                Err(err) => Some(rejected(err).into()),
            },
            other => {
                tracing::debug!(kind = value_kind(&other), "request is not an object or array");
                Some(ErrorObject::invalid_request().as_response().into())
            }
        }
    }

    /// Handles one raw payload and encodes the reply.
    pub fn handle_to_string<D: Dispatch + ?Sized>(
        &self,
        raw: &str,
        dispatcher: &D,
    ) -> Option<String> {
        self.handle(raw, dispatcher)
            .map(|reply| self.render(&reply))
    }

    /// Encodes a reply. A result the codec cannot encode is replaced by an
    /// "Internal error" response.
    pub fn render(&self, reply: &Reply) -> String {
        match self.codec.encode(&reply.container()) {
            Ok(text) => text,
            Err(err) => {
                tracing::warn!(error = %err, "cannot encode response");
                ErrorObject::internal_error()
                    .as_response()
                    .container()
                    .to_string()
            }
        }
    }
}

fn rejected(err: Error) -> Response {
    tracing::debug!(error = %err, "rejected request");
    err.to_error_object().as_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        codec::{CodecError, ObjectHook},
        method::{from_fn, typed, Arguments, Method, MethodError},
        registry::MethodRegistry,
    };
    use rstest::rstest;
    use serde_json::{json, Map};
    use std::{
        collections::HashMap,
        convert::Infallible,
        sync::{
            atomic::{AtomicUsize, Ordering},
            Arc,
        },
    };

    fn add(numbers: Vec<i64>) -> Result<i64, Infallible> {
        Ok(numbers.into_iter().sum())
    }

    fn registry() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry.insert("add", typed(add));
        registry.insert(
            "positional",
            from_fn(|args: Arguments| Ok(json!(args.positional_only()?.len()))),
        );
        registry.insert(
            "fail",
            from_fn(|_| Err(MethodError::failed("ValueError", "error_explanation"))),
        );
        registry
    }

    fn handle(raw: &str) -> Option<Value> {
        ResponseManager::new()
            .handle(raw, &registry())
            .map(|reply| reply.container())
    }

    fn error_code(value: &Value) -> i64 {
        value["error"]["code"].as_i64().unwrap()
    }

    #[test]
    fn add_returns_sum() {
        assert_eq!(
            handle(r#"{"jsonrpc": "2.0", "method": "add", "params": [1, 2], "id": 1}"#),
            Some(json!({"jsonrpc": "2.0", "result": 3, "id": 1}))
        );
    }

    #[test]
    fn malformed_text_is_parse_error() {
        let reply =
            handle(r#"{"jsonrpc": "2.0", "method": "foobar, "params": "bar", "baz]"#).unwrap();
        assert_eq!(
            reply,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32700, "message": "Parse error"},
                "id": null
            })
        );
    }

    #[test]
    fn keyed_params_for_positional_method() {
        let reply = handle(
            r#"{"jsonrpc": "2.0", "method": "positional", "params": {"a": 1}, "id": 2}"#,
        )
        .unwrap();
        assert_eq!(
            reply,
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32602, "message": "Invalid params"},
                "id": 2
            })
        );
    }

    #[test]
    fn method_failure_is_server_error() {
        let reply = handle(r#"{"jsonrpc": "2.0", "method": "fail", "id": 3}"#).unwrap();
        assert_eq!(
            reply["error"],
            json!({
                "code": -32000,
                "message": "Server error",
                "data": {"type": "ValueError", "message": "error_explanation"}
            })
        );
        assert_eq!(reply["id"], json!(3));
    }

    #[test]
    fn missing_method() {
        let reply = handle(r#"{"jsonrpc": "2.0", "method": "nope", "id": "q"}"#).unwrap();
        assert_eq!(error_code(&reply), -32601);
        assert_eq!(reply["id"], json!("q"));
        assert_eq!(handle(r#"{"jsonrpc": "2.0", "method": "nope"}"#), None);
    }

    #[rstest]
    #[case::number("1")]
    #[case::string(r#""request""#)]
    #[case::null("null")]
    #[case::boolean("true")]
    #[case::empty_array("[]")]
    #[case::empty_object("{}")]
    #[case::wrong_version(r#"{"jsonrpc": "1.0", "method": "add", "id": 1}"#)]
    #[case::reserved_method(r#"{"jsonrpc": "2.0", "method": "rpc.add", "id": 1}"#)]
    fn invalid_payloads(#[case] raw: &str) {
        let reply = handle(raw).unwrap();
        assert_eq!(error_code(&reply), -32600, "{raw}");
        assert_eq!(reply["id"], Value::Null);
    }

    #[test]
    fn notifications_yield_nothing() {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = registry();
        let counter = calls.clone();
        registry.insert(
            "tick",
            from_fn(move |_| Ok(json!(counter.fetch_add(1, Ordering::SeqCst)))),
        );

        let manager = ResponseManager::new();
        assert!(manager
            .handle(r#"{"jsonrpc": "2.0", "method": "tick"}"#, &registry)
            .is_none());
        assert!(manager
            .handle(
                r#"[{"jsonrpc": "2.0", "method": "tick"}, {"jsonrpc": "2.0", "method": "tick"}]"#,
                &registry
            )
            .is_none());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn mixed_batch() {
        let reply = handle(
            r#"[
                {"jsonrpc": "2.0", "method": "add", "params": [1, 2, 4], "id": "1"},
                {"jsonrpc": "2.0", "method": "add", "params": [7]},
                {"jsonrpc": "2.0", "method": "subtract", "params": [42, 23], "id": "2"},
                {"foo": "boo"},
                {"jsonrpc": "2.0", "method": "fail", "id": "5"},
                1
            ]"#,
        )
        .unwrap();
        assert_eq!(
            reply,
            json!([
                {"jsonrpc": "2.0", "result": 7, "id": "1"},
                {"jsonrpc": "2.0", "error": {"code": -32601, "message": "Method not found"}, "id": "2"},
                {"jsonrpc": "2.0", "error": {"code": -32600, "message": "Invalid Request"}, "id": null},
                {
                    "jsonrpc": "2.0",
                    "error": {
                        "code": -32000,
                        "message": "Server error",
                        "data": {"type": "ValueError", "message": "error_explanation"}
                    },
                    "id": "5"
                },
                {"jsonrpc": "2.0", "error": {"code": -32600, "message": "Invalid Request"}, "id": null}
            ])
        );
    }

    #[test]
    fn one_call_one_notification() {
        let reply = handle(
            r#"[
                {"jsonrpc": "2.0", "method": "add", "params": [1]},
                {"jsonrpc": "2.0", "method": "add", "params": [2], "id": 9}
            ]"#,
        )
        .unwrap();
        assert_eq!(reply, json!([{"jsonrpc": "2.0", "result": 2, "id": 9}]));
    }

    #[test]
    fn oversized_batch_is_rejected_whole() {
        let manager = ResponseManager::new().with_config(Config {
            max_batch_len: Some(1),
            ..Config::default()
        });
        let raw = r#"[
            {"jsonrpc": "2.0", "method": "add", "params": [1], "id": 1},
            {"jsonrpc": "2.0", "method": "add", "params": [2], "id": 2}
        ]"#;
        let reply = manager.handle(raw, &registry()).unwrap();
        assert_eq!(reply, Reply::from(ErrorObject::invalid_request().as_response()));
    }

    #[test]
    fn details_hidden_when_configured() {
        let manager = ResponseManager::new().with_config(Config {
            expose_error_details: false,
            ..Config::default()
        });
        let reply = manager
            .handle(r#"{"jsonrpc": "2.0", "method": "fail", "id": 3}"#, &registry())
            .unwrap();
        assert_eq!(
            reply.container()["error"],
            json!({"code": -32000, "message": "Server error"})
        );
    }

    #[test]
    fn handle_to_string_encodes_reply() {
        let text = ResponseManager::new()
            .handle_to_string(
                r#"{"jsonrpc": "2.0", "method": "add", "params": [40, 2], "id": 1}"#,
                &registry(),
            )
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&text).unwrap(),
            json!({"jsonrpc": "2.0", "result": 42, "id": 1})
        );
    }

    /// Refuses to encode any object carrying a `result`.
    struct NoResults;

    impl ObjectHook for NoResults {
        fn encode_object(&self, object: Map<String, Value>) -> Result<Value, CodecError> {
            if object.contains_key("result") {
                return Err(CodecError::Hook("results are not allowed".into()));
            }
            Ok(Value::Object(object))
        }
    }

    #[test]
    fn encode_failure_becomes_internal_error() {
        let manager = ResponseManager::with_codec(JsonCodec::new().with_hook(NoResults));
        let text = manager
            .handle_to_string(
                r#"{"jsonrpc": "2.0", "method": "add", "params": [1], "id": 1}"#,
                &registry(),
            )
            .unwrap();
        assert_eq!(
            serde_json::from_str::<Value>(&text).unwrap(),
            json!({
                "jsonrpc": "2.0",
                "error": {"code": -32603, "message": "Internal error"},
                "id": null
            })
        );
    }

    #[test]
    fn plain_mapping_dispatches() {
        let mut mapping: HashMap<String, Arc<dyn Method>> = HashMap::new();
        mapping.insert("add".into(), Arc::new(typed(add)));
        let reply = ResponseManager::new()
            .handle(
                r#"{"jsonrpc": "2.0", "method": "add", "params": [5, 6], "id": 1}"#,
                &mapping,
            )
            .unwrap();
        assert_eq!(reply.as_single().unwrap().result(), Some(&json!(11)));
    }
}
