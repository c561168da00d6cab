//! The handler abstraction every layer of the chain implements.

use std::future::Future;
use std::sync::Arc;

use axum::extract::Request;
use futures_util::future::BoxFuture;

use crate::http::recorder::ResponseWriter;
use crate::routing::context::RequestContext;

/// A request handler that writes its response through a [`ResponseWriter`].
///
/// Implemented for async closures taking `(Request, RequestContext,
/// ResponseWriter)` as well as for each middleware layer.
pub trait Handler: Send + Sync + 'static {
    fn call(
        &self,
        request: Request,
        cx: RequestContext,
        writer: ResponseWriter,
    ) -> BoxFuture<'static, ()>;
}

/// Shared, type-erased handler.
pub type BoxHandler = Arc<dyn Handler>;

impl<F, Fut> Handler for F
where
    F: Fn(Request, RequestContext, ResponseWriter) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn call(
        &self,
        request: Request,
        cx: RequestContext,
        writer: ResponseWriter,
    ) -> BoxFuture<'static, ()> {
        Box::pin(self(request, cx, writer))
    }
}
