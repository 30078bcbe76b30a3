use serde::{ser::SerializeSeq, Deserialize, Serialize};
use serde_json::Value;
use std::{slice, str::FromStr, vec};

use crate::{
    codec::{Codec, JsonCodec},
    config::Config,
    error::Error,
    registry::Dispatch,
    request::{value_kind, Request},
    response::Response,
};

/// One slot of a batch: a valid request, or the reason the element was
/// rejected. Rejected slots are answered with "Invalid Request" while the rest
/// of the batch runs normally.
#[derive(Debug)]
pub enum BatchItem {
    Request(Request),
    Invalid(Error),
}

impl From<Request> for BatchItem {
    fn from(request: Request) -> Self {
        BatchItem::Request(request)
    }
}

impl From<Value> for BatchItem {
    fn from(value: Value) -> Self {
        BatchItem::from_value(value)
    }
}

impl BatchItem {
    fn from_value(value: Value) -> Self {
        let result = match value {
            Value::Object(map) => Request::from_map(map),
            other => Err(Error::invalid(format!(
                "batch element must be an object, not {}",
                value_kind(&other)
            ))),
        };
        match result {
            Ok(request) => BatchItem::Request(request),
            Err(err) => BatchItem::Invalid(err),
        }
    }

    fn process_with<D: Dispatch + ?Sized>(
        &self,
        dispatcher: &D,
        config: &Config,
    ) -> Option<Response> {
        match self {
            BatchItem::Request(request) => request.process_with(dispatcher, config),
            BatchItem::Invalid(err) => {
                tracing::debug!(error = %err, "rejected batch element");
                Some(err.to_error_object().as_response())
            }
        }
    }
}

/// An ordered, non-empty sequence of requests processed together.
#[derive(Debug)]
pub struct BatchRequest {
    items: Vec<BatchItem>,
}

impl BatchRequest {
    /// A batch of already validated requests.
    pub fn new(requests: Vec<Request>) -> Result<Self, Error> {
        Self::from_items(requests)
    }

    /// A batch of decoded array elements. Elements that are not valid
    /// requests are kept as [`BatchItem::Invalid`] slots.
    pub fn from_values(values: Vec<Value>) -> Result<Self, Error> {
        Self::from_items(values)
    }

    /// A batch of built requests and decoded values, in any mix.
    pub fn from_items<I>(items: I) -> Result<Self, Error>
    where
        I: IntoIterator,
        I::Item: Into<BatchItem>,
    {
        let items: Vec<BatchItem> = items.into_iter().map(Into::into).collect();
        if items.is_empty() {
            return Err(Error::invalid("empty batch"));
        }
        Ok(Self { items })
    }

    pub fn from_value(value: Value) -> Result<Self, Error> {
        match value {
            Value::Array(values) => Self::from_values(values),
            other => Err(Error::invalid(format!(
                "batch must be an array, not {}",
                value_kind(&other)
            ))),
        }
    }

    pub fn parse<C: Codec + ?Sized>(text: &str, codec: &C) -> Result<Self, Error> {
        let value = codec
            .decode(text)
            .map_err(|err| Error::Parse(err.to_string()))?;
        Self::from_value(value)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Always false: an empty batch cannot be built.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn items(&self) -> slice::Iter<'_, BatchItem> {
        self.items.iter()
    }

    /// The valid requests, in order.
    pub fn requests(&self) -> impl Iterator<Item = &Request> {
        self.items.iter().filter_map(|item| match item {
            BatchItem::Request(request) => Some(request),
            BatchItem::Invalid(_) => None,
        })
    }

    pub fn process<D: Dispatch + ?Sized>(&self, dispatcher: &D) -> Option<BatchResponse> {
        self.process_with(dispatcher, &Config::default())
    }

    /// Processes every slot independently and keeps the responses that were
    /// produced, in request order. Returns `None` when every slot was a
    /// notification.
    pub fn process_with<D: Dispatch + ?Sized>(
        &self,
        dispatcher: &D,
        config: &Config,
    ) -> Option<BatchResponse> {
        tracing::debug!(len = self.items.len(), "processing batch");
        let responses = self
            .items
            .iter()
            .filter_map(|item| item.process_with(dispatcher, config))
            .collect();
        BatchResponse::new(responses)
    }
}

impl FromStr for BatchRequest {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s, &JsonCodec::new())
    }
}

/// Fails on a batch holding rejected slots: they have no wire form.
impl Serialize for BatchRequest {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        let mut seq = serializer.serialize_seq(Some(self.items.len()))?;
        for item in &self.items {
            match item {
                BatchItem::Request(request) => seq.serialize_element(request)?,
                BatchItem::Invalid(err) => {
                    return Err(serde::ser::Error::custom(format!(
                        "cannot serialize a rejected batch element: {err}"
                    )))
                }
            }
        }
        seq.end()
    }
}

/// The responses to a batch, in the order of the requests that produced them.
#[derive(Debug, Clone, PartialEq)]
pub struct BatchResponse {
    responses: Vec<Response>,
}

impl BatchResponse {
    /// `None` for an empty list: a batch reply always has at least one member.
    pub fn new(responses: Vec<Response>) -> Option<Self> {
        if responses.is_empty() {
            None
        } else {
            Some(Self { responses })
        }
    }

    pub fn len(&self) -> usize {
        self.responses.len()
    }

    /// Always false: an empty batch response cannot be built.
    pub fn is_empty(&self) -> bool {
        self.responses.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<&Response> {
        self.responses.get(index)
    }

    pub fn iter(&self) -> slice::Iter<'_, Response> {
        self.responses.iter()
    }

    pub fn container(&self) -> Value {
        Value::Array(self.responses.iter().map(Response::container).collect())
    }
}

impl IntoIterator for BatchResponse {
    type Item = Response;
    type IntoIter = vec::IntoIter<Response>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.into_iter()
    }
}

impl<'a> IntoIterator for &'a BatchResponse {
    type Item = &'a Response;
    type IntoIter = slice::Iter<'a, Response>;

    fn into_iter(self) -> Self::IntoIter {
        self.responses.iter()
    }
}

impl Serialize for BatchResponse {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        self.responses.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for BatchResponse {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let responses = Vec::<Response>::deserialize(deserializer)?;
        BatchResponse::new(responses)
            .ok_or_else(|| serde::de::Error::custom("empty batch response"))
    }
}
