//! Event handler interface.
//!
//! Every subscriber implements [`EventHandler`]. Plain closures are adapted
//! once at registration time with [`handler_fn`] (synchronous) or
//! [`async_handler_fn`] (returning a future).

use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::types::Event;

/// Typed failure returned by a handler invocation
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{0}")]
pub struct HandlerError(pub String);

impl HandlerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

impl From<crate::error::AuditError> for HandlerError {
    fn from(err: crate::error::AuditError) -> Self {
        Self(err.to_string())
    }
}

pub type HandlerResult = Result<(), HandlerError>;

#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;

    async fn handle(&self, event: &Event) -> HandlerResult;
}

pub struct FnHandler<F> {
    name: String,
    callback: F,
}

#[async_trait]
impl<F> EventHandler for FnHandler<F>
where
    F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> HandlerResult {
        (self.callback)(event)
    }
}

/// Adapt a synchronous callback
pub fn handler_fn<F>(name: impl Into<String>, callback: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Event) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(FnHandler {
        name: name.into(),
        callback,
    })
}

pub struct AsyncFnHandler<F, Fut> {
    name: String,
    callback: F,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> EventHandler for AsyncFnHandler<F, Fut>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, event: &Event) -> HandlerResult {
        (self.callback)(event.clone()).await
    }
}

/// Adapt an async callback; it receives its own copy of the event
pub fn async_handler_fn<F, Fut>(name: impl Into<String>, callback: F) -> Arc<dyn EventHandler>
where
    F: Fn(Event) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    Arc::new(AsyncFnHandler {
        name: name.into(),
        callback,
        _future: PhantomData,
    })
}
