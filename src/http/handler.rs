use std::future::Future;
use std::sync::Arc;

use futures_util::future::BoxFuture;

use crate::http::request::Request;
use crate::http::response::ResponseWriter;

/// Application code that answers requests.
///
/// One handler instance is shared by every connection of a server, so it
/// must be `Send + Sync`. The handler may read the request body and form
/// data, and writes the response through `w`; the connection worker
/// finishes the response once `serve` returns.
pub trait Handler: Send + Sync + 'static {
    fn serve(&self, w: &mut ResponseWriter<'_>, r: &mut Request<'_>) -> impl Future<Output = ()> + Send;
}

/// Object-safe form of [`Handler`], used to store handlers of different
/// types side by side.
pub trait DynHandler: Send + Sync + 'static {
    fn serve_boxed<'a>(&'a self, w: &'a mut ResponseWriter<'_>, r: &'a mut Request<'_>) -> BoxFuture<'a, ()>;
}

impl<H: Handler> DynHandler for H {
    fn serve_boxed<'a>(&'a self, w: &'a mut ResponseWriter<'_>, r: &'a mut Request<'_>) -> BoxFuture<'a, ()> {
        Box::pin(self.serve(w, r))
    }
}

pub type BoxedHandler = Arc<dyn DynHandler>;

/// A handler backed by a closure returning a boxed future.
pub struct HandlerFn<F>(F);

/// Wraps a closure as a [`Handler`].
///
/// ```
/// use httpd::http::handler::handler_fn;
///
/// let hello = handler_fn(|w, _r| {
///     Box::pin(async move {
///         let _ = w.write(b"hello").await;
///     })
/// });
/// # let _ = hello;
/// ```
pub fn handler_fn<F>(f: F) -> HandlerFn<F>
where
    F: for<'a, 'w, 'r> Fn(&'a mut ResponseWriter<'w>, &'a mut Request<'r>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    HandlerFn(f)
}

impl<F> Handler for HandlerFn<F>
where
    F: for<'a, 'w, 'r> Fn(&'a mut ResponseWriter<'w>, &'a mut Request<'r>) -> BoxFuture<'a, ()>
        + Send
        + Sync
        + 'static,
{
    fn serve(&self, w: &mut ResponseWriter<'_>, r: &mut Request<'_>) -> impl Future<Output = ()> + Send {
        async move { (self.0)(w, r).await }
    }
}
