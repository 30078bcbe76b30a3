use serde::{de::DeserializeOwned, Serialize};
use serde_json::{json, Map, Value};
use std::{any::Any, marker::PhantomData};
use thiserror::Error;

use crate::{
    error::{ErrorCode, ErrorObject},
    request::Params,
};

/// Something a request can be dispatched to.
///
/// Methods receive the request parameters as [`Arguments`] and either return a
/// result value or fail. A failure is reported to the caller as an error
/// response; see [`MethodError`] for how each kind maps onto the wire.
pub trait Method: Send + Sync {
    fn call(&self, args: Arguments) -> Result<Value, MethodError>;

    /// The name the method registers under when no name is given explicitly.
    fn name(&self) -> Option<&str> {
        None
    }
}

/// Ways a method call can fail.
#[derive(Debug, Error)]
pub enum MethodError {
    /// The parameters do not fit the method's signature.
    #[error("invalid params: {0}")]
    InvalidParams(String),

    /// The method ran and failed. Reported as a server error carrying the kind
    /// and message as `data`.
    #[error("{kind}: {message}")]
    Failed { kind: String, message: String },

    /// An error the method chose itself, passed through unchanged.
    #[error("{0}")]
    Rpc(ErrorObject),
}

impl MethodError {
    pub fn invalid_params(reason: impl Into<String>) -> Self {
        MethodError::InvalidParams(reason.into())
    }

    pub fn failed(kind: impl Into<String>, message: impl Into<String>) -> Self {
        MethodError::Failed {
            kind: kind.into(),
            message: message.into(),
        }
    }

    /// Describes `err` by its type's short name and its display text.
    pub fn from_error<E: std::error::Error>(err: &E) -> Self {
        Self::failed(short_type_name::<E>(), err.to_string())
    }

    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let message = if let Some(message) = payload.downcast_ref::<&str>() {
            (*message).to_owned()
        } else if let Some(message) = payload.downcast_ref::<String>() {
            message.clone()
        } else {
            "method panicked".to_owned()
        };
        Self::failed("panic", message)
    }

    /// The error object sent for this failure. With `expose_details` off,
    /// failed methods report a bare server error.
    pub fn into_error_object(self, expose_details: bool) -> ErrorObject {
        match self {
            MethodError::InvalidParams(_) => ErrorObject::invalid_params(),
            MethodError::Failed { kind, message } if expose_details => {
                ErrorObject::server_error().with_data(json!({"type": kind, "message": message}))
            }
            MethodError::Failed { .. } => ErrorObject::server_error(),
            MethodError::Rpc(error) => error,
        }
    }
}

impl From<ErrorObject> for MethodError {
    fn from(error: ErrorObject) -> Self {
        MethodError::Rpc(error)
    }
}

impl From<ErrorCode> for MethodError {
    fn from(code: ErrorCode) -> Self {
        MethodError::Rpc(code.into())
    }
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let name = std::any::type_name::<T>();
    let name = name.split('<').next().unwrap_or(name);
    name.rsplit("::").next().unwrap_or(name)
}

/// The parameters handed to a [`Method`].
///
/// Positional parameters and keyed parameters are mutually exclusive; a call
/// without `params` has neither.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Arguments {
    params: Option<Params>,
}

impl Arguments {
    pub fn new(params: Option<Params>) -> Self {
        Self { params }
    }

    /// Positional parameters; empty for keyed or absent params.
    pub fn positional(&self) -> &[Value] {
        match &self.params {
            Some(Params::Positional(values)) => values,
            _ => &[],
        }
    }

    /// Keyed parameters, if the call used them.
    pub fn named(&self) -> Option<&Map<String, Value>> {
        match &self.params {
            Some(Params::Named(map)) => Some(map),
            _ => None,
        }
    }

    pub fn get(&self, index: usize) -> Option<&Value> {
        self.positional().get(index)
    }

    pub fn get_named(&self, key: &str) -> Option<&Value> {
        self.named()?.get(key)
    }

    pub fn len(&self) -> usize {
        self.params.as_ref().map_or(0, Params::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Fails with [`MethodError::InvalidParams`] if the call used keyed params.
    pub fn positional_only(&self) -> Result<&[Value], MethodError> {
        match &self.params {
            Some(Params::Named(_)) => Err(MethodError::invalid_params(
                "expected positional params, got named params",
            )),
            _ => Ok(self.positional()),
        }
    }

    /// Fails with [`MethodError::InvalidParams`] if the call used positional params.
    pub fn named_only(&self) -> Result<Option<&Map<String, Value>>, MethodError> {
        match &self.params {
            Some(Params::Positional(_)) => Err(MethodError::invalid_params(
                "expected named params, got positional params",
            )),
            _ => Ok(self.named()),
        }
    }

    /// Deserializes the parameters into `T`.
    ///
    /// Positional params deserialize as a sequence (a tuple or `Vec`), keyed
    /// params as a map (a struct), absent params as an empty sequence. The
    /// error names the offending path, e.g. `[1]` or `name`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, MethodError> {
        let value = match &self.params {
            Some(params) => params.to_value(),
            None => Value::Array(Vec::new()),
        };
        serde_path_to_error::deserialize(value)
            .map_err(|err| MethodError::invalid_params(err.to_string()))
    }
}

/// Adapts a closure into a [`Method`].
pub fn from_fn<F>(f: F) -> FnMethod<F>
where
    F: Fn(Arguments) -> Result<Value, MethodError> + Send + Sync,
{
    FnMethod { f }
}

pub struct FnMethod<F> {
    f: F,
}

impl<F> Method for FnMethod<F>
where
    F: Fn(Arguments) -> Result<Value, MethodError> + Send + Sync,
{
    fn call(&self, args: Arguments) -> Result<Value, MethodError> {
        (self.f)(args)
    }
}

/// Gives `method` a declared name, so it can be registered without one.
pub fn named<M: Method>(name: impl Into<String>, method: M) -> Named<M> {
    Named {
        name: name.into(),
        method,
    }
}

pub struct Named<M> {
    name: String,
    method: M,
}

impl<M: Method> Method for Named<M> {
    fn call(&self, args: Arguments) -> Result<Value, MethodError> {
        self.method.call(args)
    }

    fn name(&self) -> Option<&str> {
        Some(&self.name)
    }
}

/// Adapts a function over typed parameters into a [`Method`].
///
/// The parameters are read with [`Arguments::parse`], so a shape mismatch is
/// reported as invalid params. Errors returned by `f` are reported as failed
/// calls named after the error type.
pub fn typed<F, T, R, E>(f: F) -> Typed<F, T, R, E>
where
    F: Fn(T) -> Result<R, E> + Send + Sync,
    T: DeserializeOwned,
    R: Serialize,
    E: std::error::Error,
{
    Typed {
        f,
        _marker: PhantomData,
    }
}

pub struct Typed<F, T, R, E> {
    f: F,
    _marker: PhantomData<fn(T) -> Result<R, E>>,
}

impl<F, T, R, E> Method for Typed<F, T, R, E>
where
    F: Fn(T) -> Result<R, E> + Send + Sync,
    T: DeserializeOwned,
    R: Serialize,
    E: std::error::Error,
{
    fn call(&self, args: Arguments) -> Result<Value, MethodError> {
        let input = args.parse::<T>()?;
        let output = (self.f)(input).map_err(|err| MethodError::from_error(&err))?;
        serde_json::to_value(output).map_err(|err| {
            MethodError::Rpc(ErrorObject::internal_error().with_data(json!(err.to_string())))
        })
    }
}
