//! Ordered handler chain with skip / transform / abort semantics.
//!
//! Every handler receives `(payload, next, end)` and must hand back exactly
//! one continuation:
//!
//! - `next.call()` — pass the payload through unchanged.
//! - `end.ok(result)` — replace the payload with `result` for every later
//!   handler.
//! - `end.fail(err)` — abort the chain; no later handler runs.
//!
//! A [`Step`] can only be built by consuming `Next` or `End`, so a handler
//! cannot continue twice or forget to continue. Returning `Err` or
//! panicking aborts the chain the same way `end.fail` does.

use std::any::Any;
use std::future::Future;
use std::marker::PhantomData;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use async_trait::async_trait;
use futures::FutureExt;

use crate::error::RouterError;

// ─── Continuations ────────────────────────────────────────────────────────────

/// Outcome of one handler invocation.
pub struct Step<P>(StepKind<P>);

enum StepKind<P> {
    Pass,
    Replace(P),
    Abort(String),
}

/// Pass-through continuation.
pub struct Next<P> {
    _payload: PhantomData<fn() -> P>,
}

impl<P> Next<P> {
    fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }

    /// Continue with the next handler, leaving the payload untouched.
    pub fn call(self) -> Step<P> {
        Step(StepKind::Pass)
    }
}

/// Transform-or-abort continuation.
pub struct End<P> {
    _payload: PhantomData<fn() -> P>,
}

impl<P> End<P> {
    fn new() -> Self {
        Self {
            _payload: PhantomData,
        }
    }

    /// Replace the payload with `result` and continue.
    pub fn ok(self, result: P) -> Step<P> {
        Step(StepKind::Replace(result))
    }

    /// Abort the chain with `err`.
    pub fn fail(self, err: impl std::fmt::Display) -> Step<P> {
        Step(StepKind::Abort(err.to_string()))
    }

    /// `ok` on `Ok`, `fail` on `Err`.
    pub fn with<E: std::fmt::Display>(self, result: Result<P, E>) -> Step<P> {
        match result {
            Ok(r) => self.ok(r),
            Err(e) => self.fail(e),
        }
    }
}

// ─── Handler ──────────────────────────────────────────────────────────────────

/// A middleware stage in the routing pipeline.
#[async_trait]
pub trait Handler<P>: Send + Sync {
    async fn handle(
        &self,
        payload: Arc<P>,
        next: Next<P>,
        end: End<P>,
    ) -> Result<Step<P>, RouterError>;
}

#[async_trait]
impl<P, F, Fut> Handler<P> for F
where
    P: Send + Sync + 'static,
    F: Fn(Arc<P>, Next<P>, End<P>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<Step<P>, RouterError>> + Send + 'static,
{
    async fn handle(
        &self,
        payload: Arc<P>,
        next: Next<P>,
        end: End<P>,
    ) -> Result<Step<P>, RouterError> {
        (self)(payload, next, end).await
    }
}

/// Box an async closure as a shareable handler.
///
/// ```rust
/// use chainrouter_core::pipeline::handler_fn;
/// use chainrouter_core::types::Batch;
///
/// let h = handler_fn(|txns: std::sync::Arc<Batch>, next, _end| async move {
///     println!("{} records", txns.len());
///     Ok(next.call())
/// });
/// # let _ = h;
/// ```
pub fn handler_fn<P, F, Fut>(f: F) -> Arc<dyn Handler<P>>
where
    P: Send + Sync + 'static,
    F: Fn(Arc<P>, Next<P>, End<P>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Step<P>, RouterError>> + Send + 'static,
{
    Arc::new(f)
}

/// A read-only view of the registry taken when a pipeline is created.
pub type HandlerChain<P> = Arc<[Arc<dyn Handler<P>>]>;

// ─── HandlerRegistry ──────────────────────────────────────────────────────────

/// Insertion-ordered list of handlers.
pub struct HandlerRegistry<P> {
    handlers: Vec<Arc<dyn Handler<P>>>,
}

impl<P> HandlerRegistry<P> {
    pub fn new() -> Self {
        Self { handlers: vec![] }
    }

    /// Append a handler. `None` is ignored.
    pub fn register(&mut self, handler: impl Into<Option<Arc<dyn Handler<P>>>>) {
        if let Some(h) = handler.into() {
            self.handlers.push(h);
        }
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Snapshot the current chain for one pipeline run.
    pub fn snapshot(&self) -> HandlerChain<P> {
        self.handlers.iter().cloned().collect()
    }
}

impl<P> Default for HandlerRegistry<P> {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Pipeline ─────────────────────────────────────────────────────────────────

/// One run of a payload through a handler chain.
///
/// `run` resolves `Ok(())` once the payload has passed the last handler and
/// `Err` on the first abort; either happens exactly once per pipeline.
pub struct Pipeline<P> {
    handlers: HandlerChain<P>,
    offset: usize,
    payload: Arc<P>,
}

impl<P: Send + Sync + 'static> Pipeline<P> {
    pub fn new(handlers: HandlerChain<P>, payload: P) -> Self {
        Self {
            handlers,
            offset: 0,
            payload: Arc::new(payload),
        }
    }

    /// Position of the handler that runs next.
    pub fn offset(&self) -> usize {
        self.offset
    }

    pub async fn run(mut self) -> Result<(), RouterError> {
        let handlers = Arc::clone(&self.handlers);

        while let Some(handler) = handlers.get(self.offset) {
            tracing::debug!(offset = self.offset, "Calling handler");

            let call = handler.handle(Arc::clone(&self.payload), Next::new(), End::new());
            let step = match AssertUnwindSafe(call).catch_unwind().await {
                Ok(Ok(step)) => step,
                Ok(Err(e)) => return Err(self.abort(e)),
                Err(panic) => {
                    let reason = format!("handler panicked: {}", panic_message(&*panic));
                    return Err(self.abort(RouterError::handler(self.offset, reason)));
                }
            };

            match step.0 {
                StepKind::Pass => self.offset += 1,
                StepKind::Replace(result) => {
                    tracing::debug!(offset = self.offset, "Handler replaced pipeline payload");
                    self.offset += 1;
                    self.payload = Arc::new(result);
                }
                StepKind::Abort(reason) => {
                    return Err(self.abort(RouterError::handler(self.offset, reason)));
                }
            }
        }

        tracing::debug!(handlers = handlers.len(), "Finished routing through handlers");
        Ok(())
    }

    fn abort(&self, err: RouterError) -> RouterError {
        let err = match err {
            e @ RouterError::Handler { .. } => e,
            other => RouterError::handler(self.offset, other.to_string()),
        };
        tracing::error!(offset = self.offset, error = %err, "Problem with handler");
        err
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.as_str()
    } else {
        "unknown panic"
    }
}

// ─── Tests ────────────────────────────────────────────────────────────────────
