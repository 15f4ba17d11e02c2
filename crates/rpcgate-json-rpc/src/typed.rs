//! Adaptation of strongly-typed handler functions.
//!
//! Any async function or closure taking an [`RpcRequest`] followed by up to
//! eight deserializable arguments and returning `Result<R, E>` (with `R:
//! Serialize` and `E: Into<HandlerError>`) implements [`TypedHandler`].
//! Functions of any other shape simply do not satisfy the trait, so a bad
//! registration is rejected when it is compiled.

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;
use futures::future::BoxFuture;
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::actor::{Reply, RpcHandler};
use crate::context::RpcRequest;
use crate::error::{HandlerError, RpcError};

/// Parameter shape of a typed handler, captured at registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerShape {
    pub arity: usize,
    pub param_types: Vec<&'static str>,
    pub result_type: &'static str,
}

pub trait TypedHandler<Args>: Clone + Send + Sync + 'static {
    fn shape() -> HandlerShape;

    /// Decode `params` into the argument types and run the handler
    fn call(&self, req: RpcRequest, params: Vec<Value>) -> BoxFuture<'static, Result<Value, HandlerError>>;
}

macro_rules! count {
    () => (0usize);
    ($head:ident $($tail:ident)*) => (1usize + count!($($tail)*));
}

macro_rules! impl_typed_handler {
    ($($ty:ident $arg:ident),*) => {
        impl<F, Fut, R, E, $($ty,)*> TypedHandler<($($ty,)*)> for F
        where
            F: Fn(RpcRequest, $($ty,)*) -> Fut + Clone + Send + Sync + 'static,
            Fut: Future<Output = Result<R, E>> + Send + 'static,
            R: Serialize + Send + 'static,
            E: Into<HandlerError> + 'static,
            $($ty: DeserializeOwned + Send + 'static,)*
        {
            fn shape() -> HandlerShape {
                HandlerShape {
                    arity: count!($($ty)*),
                    param_types: vec![$(std::any::type_name::<$ty>(),)*],
                    result_type: std::any::type_name::<R>(),
                }
            }

            #[allow(unused_mut, unused_variables)]
            fn call(&self, req: RpcRequest, params: Vec<Value>) -> BoxFuture<'static, Result<Value, HandlerError>> {
                if params.len() != count!($($ty)*) {
                    return Box::pin(futures::future::ready(Err(
                        RpcError::params_error("different params size").into(),
                    )));
                }

                let mut params = params.into_iter();
                let mut position = 0usize;
                $(
                    position += 1;
                    let $arg: $ty = match serde_json::from_value(params.next().unwrap_or_default()) {
                        Ok(value) => value,
                        Err(e) => {
                            let err = RpcError::params_error(format!(
                                "params {} got unconvertible type: {}",
                                position, e
                            ));
                            return Box::pin(futures::future::ready(Err(err.into())));
                        }
                    };
                )*

                let fut = (self)(req, $($arg,)*);
                Box::pin(async move {
                    let result = fut.await.map_err(Into::<HandlerError>::into)?;
                    let value = serde_json::to_value(result)?;
                    Ok::<_, HandlerError>(value)
                })
            }
        }
    };
}

impl_typed_handler!();
impl_typed_handler!(A1 a1);
impl_typed_handler!(A1 a1, A2 a2);
impl_typed_handler!(A1 a1, A2 a2, A3 a3);
impl_typed_handler!(A1 a1, A2 a2, A3 a3, A4 a4);
impl_typed_handler!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5);
impl_typed_handler!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6);
impl_typed_handler!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7);
impl_typed_handler!(A1 a1, A2 a2, A3 a3, A4 a4, A5 a5, A6 a6, A7 a7, A8 a8);

/// Erases a [`TypedHandler`] into an [`RpcHandler`]
pub(crate) struct TypedAdapter<H, Args> {
    handler: H,
    _args: PhantomData<fn() -> Args>,
}

impl<H, Args> TypedAdapter<H, Args>
where
    H: TypedHandler<Args>,
{
    pub(crate) fn new(handler: H) -> Self {
        Self {
            handler,
            _args: PhantomData,
        }
    }
}

#[async_trait]
impl<H, Args> RpcHandler for TypedAdapter<H, Args>
where
    H: TypedHandler<Args>,
    Args: 'static,
{
    async fn call(&self, req: RpcRequest, params: Vec<Value>) -> Result<Reply, HandlerError> {
        self.handler.call(req, params).await.map(Reply::Value)
    }
}
