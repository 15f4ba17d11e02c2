//! The Actor dispatcher: a method registry plus the `feed` algorithm that
//! turns an inbound message into at most one response.

use std::any::Any;
use std::collections::HashMap;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::context::{ConnectionContext, RpcRequest};
use crate::error::{DispatchError, HandlerError, RegistrationError, RpcError};
use crate::message::Message;
use crate::schema::SchemaValidator;
use crate::typed::{HandlerShape, TypedAdapter, TypedHandler};

/// What a handler produced for a request
#[derive(Debug, Clone)]
pub enum Reply {
    /// Plain value, wrapped into a Result correlated to the request
    Value(Value),
    /// Complete message, sent as is
    Message(Message),
}

impl From<Value> for Reply {
    fn from(value: Value) -> Self {
        Reply::Value(value)
    }
}

impl From<Message> for Reply {
    fn from(msg: Message) -> Self {
        Reply::Message(msg)
    }
}

/// Trait for handling a dispatched method
#[async_trait]
pub trait RpcHandler: Send + Sync {
    /// `params` is the positional view of the message params
    async fn call(&self, req: RpcRequest, params: Vec<Value>) -> Result<Reply, HandlerError>;
}

/// A simple function-based handler
pub struct FnHandler<F> {
    handler_fn: F,
}

impl<F> FnHandler<F> {
    pub fn new(handler_fn: F) -> Self {
        Self { handler_fn }
    }
}

#[async_trait]
impl<F, Fut, R, E> RpcHandler for FnHandler<F>
where
    F: Fn(RpcRequest, Vec<Value>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<R, E>> + Send,
    R: Into<Reply>,
    E: Into<HandlerError>,
{
    async fn call(&self, req: RpcRequest, params: Vec<Value>) -> Result<Reply, HandlerError> {
        (self.handler_fn)(req, params)
            .await
            .map(Into::into)
            .map_err(Into::into)
    }
}

/// Handler for messages no registered method claims
pub type MissingCallback = Arc<dyn RpcHandler>;

/// Invoked when a session is torn down
pub type CloseCallback = Arc<dyn Fn(&ConnectionContext) + Send + Sync>;

/// Per-method registration options
#[derive(Debug, Clone, Default)]
pub struct HandlerOptions {
    schema: Option<Value>,
}

impl HandlerOptions {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a schema checked before the handler runs
    pub fn schema(mut self, schema: Value) -> Self {
        self.schema = Some(schema);
        self
    }
}

struct HandlerEntry {
    handler: Arc<dyn RpcHandler>,
    schema: Option<Value>,
    shape: Option<HandlerShape>,
}

/// JSON-RPC method dispatcher.
///
/// Handlers are registered at startup through `&mut self`; afterwards the
/// actor is shared read-only behind an `Arc`.
pub struct Actor {
    handlers: HashMap<String, HandlerEntry>,
    missing: Option<MissingCallback>,
    on_close: Option<CloseCallback>,
    validator: Option<Arc<dyn SchemaValidator>>,
    verify_schema: bool,
}

impl Actor {
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            missing: None,
            on_close: None,
            validator: None,
            verify_schema: true,
        }
    }

    pub fn with_validator(mut self, validator: impl SchemaValidator + 'static) -> Self {
        self.validator = Some(Arc::new(validator));
        self
    }

    pub fn set_validator(&mut self, validator: Arc<dyn SchemaValidator>) {
        self.validator = Some(validator);
    }

    /// Turn schema checks on or off; on by default
    pub fn set_verify_schema(&mut self, verify: bool) {
        self.verify_schema = verify;
    }

    fn insert(
        &mut self,
        method: String,
        handler: Arc<dyn RpcHandler>,
        options: HandlerOptions,
        shape: Option<HandlerShape>,
    ) -> Result<(), RegistrationError> {
        if self.handlers.contains_key(&method) {
            return Err(RegistrationError::DuplicateHandler(method));
        }
        debug!(method = %method, "registered handler");
        self.handlers.insert(
            method,
            HandlerEntry {
                handler,
                schema: options.schema,
                shape,
            },
        );
        Ok(())
    }

    pub fn register<H>(
        &mut self,
        method: impl Into<String>,
        handler: H,
        options: HandlerOptions,
    ) -> Result<(), RegistrationError>
    where
        H: RpcHandler + 'static,
    {
        self.insert(method.into(), Arc::new(handler), options, None)
    }

    /// Register a closure receiving the request and its positional params
    pub fn register_fn<F, Fut, R, E>(
        &mut self,
        method: impl Into<String>,
        handler_fn: F,
        options: HandlerOptions,
    ) -> Result<(), RegistrationError>
    where
        F: Fn(RpcRequest, Vec<Value>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<R, E>> + Send + 'static,
        R: Into<Reply> + 'static,
        E: Into<HandlerError> + 'static,
    {
        self.register(method, FnHandler::new(handler_fn), options)
    }

    /// Register a strongly-typed handler; params are decoded per argument
    pub fn register_typed<H, Args>(
        &mut self,
        method: impl Into<String>,
        handler: H,
        options: HandlerOptions,
    ) -> Result<(), RegistrationError>
    where
        H: TypedHandler<Args>,
        Args: 'static,
    {
        let shape = H::shape();
        self.insert(
            method.into(),
            Arc::new(TypedAdapter::new(handler)),
            options,
            Some(shape),
        )
    }

    pub fn register_missing<H>(&mut self, handler: H) -> Result<(), RegistrationError>
    where
        H: RpcHandler + 'static,
    {
        if self.missing.is_some() {
            return Err(RegistrationError::AlreadyRegistered("missing"));
        }
        self.missing = Some(Arc::new(handler));
        Ok(())
    }

    pub fn register_close<F>(&mut self, callback: F) -> Result<(), RegistrationError>
    where
        F: Fn(&ConnectionContext) + Send + Sync + 'static,
    {
        if self.on_close.is_some() {
            return Err(RegistrationError::AlreadyRegistered("close"));
        }
        self.on_close = Some(Arc::new(callback));
        Ok(())
    }

    pub fn has_handler(&self, method: &str) -> bool {
        self.handlers.contains_key(method)
    }

    /// Registered method names, sorted
    pub fn methods(&self) -> Vec<String> {
        let mut methods: Vec<String> = self.handlers.keys().cloned().collect();
        methods.sort();
        methods
    }

    /// Shape captured for a typed handler
    pub fn handler_shape(&self, method: &str) -> Option<&HandlerShape> {
        self.handlers.get(method).and_then(|entry| entry.shape.as_ref())
    }

    /// Run the close callback for a session being torn down
    pub fn handle_close(&self, conn: &ConnectionContext) {
        if let Some(on_close) = &self.on_close {
            on_close(conn);
        }
    }

    /// Dispatch one message.
    ///
    /// Returns the response for a Request (always exactly one) and `None`
    /// for anything else. Failures of non-request messages are never
    /// answered; they come back as `Err` for the session to record.
    pub async fn feed(&self, req: RpcRequest) -> Result<Option<Message>, DispatchError> {
        if !req.msg.is_request_or_notify() {
            if let Some(missing) = &self.missing {
                return self.invoke(missing.as_ref(), req).await;
            }
            debug!(
                stream_id = %req.conn.stream_id,
                kind = req.msg.kind(),
                "no handler for inbound message, ignored"
            );
            return Ok(None);
        }

        let Some(entry) = req.msg.method().and_then(|m| self.handlers.get(m)) else {
            if let Some(missing) = &self.missing {
                return self.invoke(missing.as_ref(), req).await;
            }
            return match &req.msg {
                Message::Request(r) => {
                    debug!(method = %r.method, "method not found");
                    Ok(Some(RpcError::method_not_found().to_message(r)))
                }
                other => {
                    debug!(method = ?other.method(), "notify for unknown method dropped");
                    Ok(None)
                }
            };
        };

        if self.verify_schema {
            if let (Some(schema), Some(validator)) = (&entry.schema, &self.validator) {
                if let Some(position) = validator.validate(schema, &req.msg) {
                    return match &req.msg {
                        Message::Request(r) => Ok(Some(position.to_message(r))),
                        other => {
                            let method = other.must_method().to_string();
                            warn!(method = %method, error = %position, "notify failed schema validation");
                            Err(DispatchError::NotifySchema {
                                method,
                                message: position.to_string(),
                            })
                        }
                    };
                }
            }
        }

        self.invoke(entry.handler.as_ref(), req).await
    }

    /// Convenience for dispatching a message on an unbound context
    pub async fn feed_message(&self, msg: Message) -> Result<Option<Message>, DispatchError> {
        self.feed(RpcRequest::detached(msg)).await
    }

    async fn invoke(
        &self,
        handler: &dyn RpcHandler,
        req: RpcRequest,
    ) -> Result<Option<Message>, DispatchError> {
        let msg = req.msg.clone();
        let params = req.params();
        let outcome = AssertUnwindSafe(handler.call(req, params))
            .catch_unwind()
            .await;
        wrap_outcome(&msg, outcome)
    }
}

impl Default for Actor {
    fn default() -> Self {
        Self::new()
    }
}

fn wrap_outcome(
    msg: &Message,
    outcome: Result<Result<Reply, HandlerError>, Box<dyn Any + Send>>,
) -> Result<Option<Message>, DispatchError> {
    let method = msg.method().unwrap_or(msg.kind()).to_string();

    let Message::Request(request) = msg else {
        return match outcome {
            Ok(Ok(_)) => Ok(None),
            Ok(Err(err)) => {
                warn!(method = %method, error = %err, "notify handler failed");
                Err(DispatchError::Notify {
                    method,
                    message: err.to_string(),
                })
            }
            Err(_) => {
                error!(method = %method, "notify handler panicked");
                Err(DispatchError::Panicked { method })
            }
        };
    };

    let response = match outcome {
        Ok(Ok(Reply::Message(reply))) => reply,
        Ok(Ok(Reply::Value(value))) => Message::result_for(request, value),
        Ok(Err(err)) => match err.as_rpc_error() {
            Some(rpc_error) => rpc_error.to_message(request),
            None => {
                warn!(method = %method, error = %err, "handler failed");
                RpcError::internal_error().to_message(request)
            }
        },
        Err(_) => {
            error!(method = %method, "handler panicked");
            RpcError::internal_error().to_message(request)
        }
    };
    Ok(Some(response))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::TransportKind;
    use crate::message::RequestMessage;
    use crate::schema::ErrorPosition;
    use crate::types::{Params, RequestId};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    async fn add(_req: RpcRequest, a: i64, b: i64) -> Result<i64, RpcError> {
        Ok(a + b)
    }

    fn echo_actor() -> Actor {
        let mut actor = Actor::new();
        actor
            .register_fn(
                "echo",
                |_req: RpcRequest, params: Vec<Value>| async move {
                    Ok::<_, RpcError>(Value::Array(params))
                },
                HandlerOptions::new(),
            )
            .unwrap();
        actor
    }

    fn integers_validator(_schema: &Value, msg: &Message) -> Option<ErrorPosition> {
        let params = msg.must_params().to_list();
        params
            .iter()
            .position(|p| p.as_i64().is_none())
            .map(|i| ErrorPosition::new(format!(".params[{}]", i), "data is not integer"))
    }

    #[tokio::test]
    async fn test_request_gets_result_with_same_id() {
        let actor = echo_actor();
        let req = Message::request("abc", "echo", vec![json!(1), json!("x")]).with_trace_id("t9");
        let res = actor.feed_message(req).await.unwrap().unwrap();

        assert_eq!(res.must_id(), &RequestId::from("abc"));
        assert_eq!(res.must_result(), &json!([1, "x"]));
        assert_eq!(res.trace_id(), "t9");
    }

    #[tokio::test]
    async fn test_notify_yields_nothing() {
        let actor = echo_actor();
        let res = actor
            .feed_message(Message::notify("echo", vec![json!(1)]))
            .await
            .unwrap();
        assert!(res.is_none());
    }

    #[tokio::test]
    async fn test_method_not_found() {
        let actor = echo_actor();
        let res = actor
            .feed_message(Message::request(1i64, "nope", Params::default()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.must_error().code, -32601);

        let dropped = actor
            .feed_message(Message::notify("nope", Params::default()))
            .await
            .unwrap();
        assert!(dropped.is_none());
    }

    #[test]
    fn test_duplicate_registration() {
        let mut actor = echo_actor();
        let err = actor
            .register_typed("echo", add, HandlerOptions::new())
            .unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateHandler("echo".to_string()));

        actor.register_close(|_conn: &ConnectionContext| {}).unwrap();
        assert_eq!(
            actor.register_close(|_conn: &ConnectionContext| {}),
            Err(RegistrationError::AlreadyRegistered("close"))
        );
    }

    #[tokio::test]
    async fn test_typed_add_dispatch() {
        let mut actor = Actor::new();
        actor.register_typed("add", add, HandlerOptions::new()).unwrap();
        assert_eq!(actor.handler_shape("add").unwrap().arity, 2);

        let ok = actor
            .feed_message(Message::request(1i64, "add", vec![json!(6), json!(3)]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ok.must_result(), &json!(9));

        let bad_type = actor
            .feed_message(Message::request(2i64, "add", vec![json!("6"), json!(4)]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bad_type.must_error().code, -32602);
        assert!(bad_type.must_error().message.contains("unconvertible type"));

        let bad_arity = actor
            .feed_message(Message::request(3i64, "add", vec![json!("6")]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(bad_arity.must_error().message, "different params size");
    }

    #[tokio::test]
    async fn test_schema_gating() {
        let mut actor = Actor::new().with_validator(integers_validator);
        actor
            .register_typed(
                "add",
                add,
                HandlerOptions::new().schema(json!({"type": "method", "params": ["integer", "integer"]})),
            )
            .unwrap();

        let ok = actor
            .feed_message(Message::request(1i64, "add", vec![json!(5), json!(8)]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(ok.must_result(), &json!(13));

        let rejected = actor
            .feed_message(Message::request(2i64, "add", vec![json!("12"), json!("a str")]))
            .await
            .unwrap()
            .unwrap();
        let err = rejected.must_error();
        assert_eq!(err.code, -32633);
        assert!(err.message.contains(".params[0]"));

        let notify = actor
            .feed_message(Message::notify("add", vec![json!("12")]))
            .await;
        assert!(matches!(notify, Err(DispatchError::NotifySchema { .. })));

        actor.set_verify_schema(false);
        let unchecked = actor
            .feed_message(Message::request(3i64, "add", vec![json!("12"), json!(1)]))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(unchecked.must_error().code, -32602);
    }

    #[tokio::test]
    async fn test_error_wrapping() {
        let mut actor = Actor::new();
        actor
            .register_fn(
                "custom",
                |_req: RpcRequest, _params: Vec<Value>| async move {
                    Err::<Value, _>(RpcError::new(1000, "custom failure", Some(json!("d"))))
                },
                HandlerOptions::new(),
            )
            .unwrap();
        actor
            .register_fn(
                "leaky",
                |_req: RpcRequest, _params: Vec<Value>| async move {
                    Err::<Value, _>(std::io::Error::other("secret path /etc/shadow"))
                },
                HandlerOptions::new(),
            )
            .unwrap();

        let custom = actor
            .feed_message(Message::request(1i64, "custom", Params::default()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            custom.must_error(),
            &RpcError::new(1000, "custom failure", Some(json!("d")))
        );

        let leaky = actor
            .feed_message(Message::request(2i64, "leaky", Params::default()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(leaky.must_error().code, -32603);
        assert!(!leaky.must_error().message.contains("shadow"));

        let notify = actor
            .feed_message(Message::notify("leaky", Params::default()))
            .await;
        assert!(matches!(notify, Err(DispatchError::Notify { .. })));
    }

    #[tokio::test]
    async fn test_full_message_passes_through() {
        let mut actor = Actor::new();
        actor
            .register_fn(
                "raw",
                |req: RpcRequest, _params: Vec<Value>| async move {
                    let id = req.msg.must_id().clone();
                    Ok::<_, RpcError>(Message::result(id, json!("verbatim")).with_trace_id("own"))
                },
                HandlerOptions::new(),
            )
            .unwrap();

        let res = actor
            .feed_message(Message::request(4i64, "raw", Params::default()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.must_result(), &json!("verbatim"));
        assert_eq!(res.trace_id(), "own");
    }

    #[tokio::test]
    async fn test_panicking_handler_is_contained() {
        let mut actor = Actor::new();
        actor
            .register_fn(
                "boom",
                |_req: RpcRequest, _params: Vec<Value>| async move {
                    if true {
                        panic!("handler bug");
                    }
                    Ok::<Value, RpcError>(Value::Null)
                },
                HandlerOptions::new(),
            )
            .unwrap();

        let res = actor
            .feed_message(Message::request(1i64, "boom", Params::default()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.must_error().code, -32603);

        let notify = actor
            .feed_message(Message::notify("boom", Params::default()))
            .await;
        assert!(matches!(notify, Err(DispatchError::Panicked { .. })));
    }

    #[tokio::test]
    async fn test_missing_handler_takes_unknown_methods() {
        let seen = Arc::new(AtomicUsize::new(0));
        let counter = seen.clone();

        let mut actor = Actor::new();
        actor
            .register_missing(FnHandler::new(move |req: RpcRequest, _params: Vec<Value>| {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, RpcError>(json!(req.msg.kind()))
                }
            }))
            .unwrap();

        let res = actor
            .feed_message(Message::request(1i64, "anything", Params::default()))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(res.must_result(), &json!("request"));

        let from_result = actor
            .feed_message(Message::result(9i64, json!(1)))
            .await
            .unwrap();
        assert!(from_result.is_none());
        assert_eq!(seen.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_close_handler_receives_context() {
        let closed = Arc::new(AtomicUsize::new(0));
        let counter = closed.clone();
        let mut actor = Actor::new();
        actor
            .register_close(move |conn: &ConnectionContext| {
                assert_eq!(conn.transport, TransportKind::WebSocket);
                counter.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();

        actor.handle_close(&ConnectionContext::new(TransportKind::WebSocket));
        assert_eq!(closed.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_null_id_request_is_answered() {
        let actor = echo_actor();
        let req = RequestMessage::new(RequestId::Null, "echo", Params::default());
        let res = actor.feed_message(req.into()).await.unwrap().unwrap();
        assert_eq!(res.must_id(), &RequestId::Null);
    }
}
