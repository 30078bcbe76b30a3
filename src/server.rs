use std::{
    convert::Infallible,
    future::{ready, Ready},
    sync::Arc,
    task::{Context, Poll},
};

use crate::{
    codec::{Codec, JsonCodec},
    config::Config,
    manager::ResponseManager,
    method::Method,
    registry::{MethodRegistry, MethodSet},
};

/// Collects methods and settings for a [`Server`].
pub struct ServerBuilder<C = JsonCodec> {
    registry: MethodRegistry,
    codec: C,
    config: Config,
}

impl ServerBuilder {
    pub fn new() -> Self {
        Self {
            registry: MethodRegistry::new(),
            codec: JsonCodec::new(),
            config: Config::default(),
        }
    }
}

impl Default for ServerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl<C: Codec> ServerBuilder<C> {
    pub fn method(mut self, name: impl Into<String>, method: impl Method + 'static) -> Self {
        self.registry.insert(name, method);
        self
    }

    /// Adds every method `set` exports.
    pub fn methods(mut self, set: &(impl MethodSet + ?Sized)) -> Self {
        self.registry.import(set);
        self
    }

    /// Replaces the codec used to read requests and write replies.
    pub fn codec<C2: Codec>(self, codec: C2) -> ServerBuilder<C2> {
        ServerBuilder {
            registry: self.registry,
            codec,
            config: self.config,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn build(self) -> Server<C> {
        Server {
            inner: Arc::new(Inner {
                registry: self.registry,
                manager: ResponseManager::with_codec(self.codec).with_config(self.config),
            }),
        }
    }
}

struct Inner<C> {
    registry: MethodRegistry,
    manager: ResponseManager<C>,
}

/// A fixed set of methods behind a codec, answering raw payloads.
///
/// Cloning is cheap; clones share the same methods. As a
/// [`tower::Service`] it takes request text and yields the reply text, or
/// `None` when the payload held only notifications.
pub struct Server<C = JsonCodec> {
    inner: Arc<Inner<C>>,
}

impl<C> Clone for Server<C> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl Server {
    pub fn builder() -> ServerBuilder {
        ServerBuilder::new()
    }
}

impl<C: Codec> Server<C> {
    pub fn handle(&self, raw: &str) -> Option<String> {
        self.inner
            .manager
            .handle_to_string(raw, &self.inner.registry)
    }

    pub fn registry(&self) -> &MethodRegistry {
        &self.inner.registry
    }

    pub fn config(&self) -> &Config {
        self.inner.manager.config()
    }
}

impl<C: Codec> tower::Service<String> for Server<C> {
    type Response = Option<String>;
    type Error = Infallible;
    type Future = Ready<Result<Self::Response, Self::Error>>;

    fn poll_ready(&mut self, _cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        Poll::Ready(Ok(()))
    }

    fn call(&mut self, request: String) -> Self::Future {
        ready(Ok(self.handle(&request)))
    }
}
