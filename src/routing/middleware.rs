use crate::http::request::Request;
use crate::http::response::Response;
use crate::http::types::StatusCode;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

/// The future type handlers and middleware return.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A request handler: consumes the request, produces the response.
///
/// Implemented automatically for `async fn(Request) -> Response` and
/// closures of the same shape, so route registration stays plain:
///
/// ```
/// use relay_web::{Request, Response, Server};
///
/// let mut server = Server::new();
/// server.get("/hello", |_req: Request| async { Response::text("world") });
/// ```
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: Request) -> BoxFuture<'static, Response>;
}

impl<F, Fut> Handler for F
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    #[inline]
    fn call(&self, request: Request) -> BoxFuture<'static, Response> {
        Box::pin(self(request))
    }
}

pub(crate) type DynHandler = dyn Handler;

#[inline]
pub(crate) fn handler_fn<F, Fut>(f: F) -> Arc<DynHandler>
where
    F: Fn(Request) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Response> + Send + 'static,
{
    Arc::new(f)
}

/// A middleware layer wrapping the rest of the pipeline.
///
/// Receives the request and a [`Next`] continuation. It may mutate the
/// request (typically to [attach](crate::Request::attach) context), await
/// `next` at most once, and transform the resulting response — or
/// short-circuit by returning without calling `next` at all.
///
/// Registration order is invocation order: the first registered
/// middleware is the outermost.
///
/// ```
/// use relay_web::{Middleware, Next, Request, Response, BoxFuture};
///
/// struct RequestTag;
///
/// impl Middleware for RequestTag {
///     fn handle<'a>(&'a self, mut req: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
///         Box::pin(async move {
///             req.attach("tag", 7u64);
///             let resp = next.run(req).await;
///             resp.with_header("x-tagged", "1")
///         })
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    fn handle<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response>;
}

impl<F> Middleware for F
where
    F: for<'a> Fn(Request, Next<'a>) -> BoxFuture<'a, Response> + Send + Sync + 'static,
{
    #[inline]
    fn handle<'a>(&'a self, request: Request, next: Next<'a>) -> BoxFuture<'a, Response> {
        self(request, next)
    }
}

/// The continuation a middleware invokes to run the remainder of the
/// pipeline: the layers registered after it, then the terminal handler.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    terminal: &'a Arc<DynHandler>,
}

impl Next<'_> {
    /// Runs the rest of the pipeline to completion.
    pub async fn run(self, request: Request) -> Response {
        match self.chain.split_first() {
            Some((middleware, rest)) => {
                let next = Next {
                    chain: rest,
                    terminal: self.terminal,
                };
                middleware.handle(request, next).await
            }
            None => self.terminal.call(request).await,
        }
    }
}

/// The frozen middleware pipeline.
///
/// Built once before the server starts accepting and shared immutably by
/// every worker. Dispatch runs the composed layers around the terminal
/// handler inside a spawned task so a panicking handler takes down only
/// its own request.
#[derive(Clone)]
pub(crate) struct Chain {
    middlewares: Arc<[Arc<dyn Middleware>]>,
}

impl Chain {
    pub(crate) fn new(middlewares: Vec<Arc<dyn Middleware>>) -> Self {
        Self {
            middlewares: middlewares.into(),
        }
    }

    /// Runs the pipeline for one request.
    ///
    /// A panic anywhere in the pipeline is converted into a `500` whose
    /// body carries the panic message.
    pub(crate) async fn dispatch(&self, request: Request, terminal: Arc<DynHandler>) -> Response {
        let middlewares = self.middlewares.clone();

        let task = tokio::spawn(async move {
            let next = Next {
                chain: &middlewares,
                terminal: &terminal,
            };
            next.run(request).await
        });

        match task.await {
            Ok(response) => response,
            Err(join_err) if join_err.is_panic() => {
                let panic = join_err.into_panic();
                let message = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "handler panicked".to_string());

                tracing::warn!(%message, "handler panicked");
                Response::new(StatusCode::InternalServerError)
                    .with_header("content-type", "text/plain")
                    .with_body(message)
            }
            Err(_) => Response::new(StatusCode::InternalServerError)
                .with_header("content-type", "text/plain")
                .with_body("request aborted"),
        }
    }
}

/// The terminal used when no route matches.
pub(crate) fn not_found_handler() -> Arc<DynHandler> {
    handler_fn(|_req: Request| async {
        Response::new(StatusCode::NotFound)
            .with_header("content-type", "text/plain")
            .with_body("not found")
    })
}
