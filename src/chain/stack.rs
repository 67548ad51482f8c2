use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use super::middleware::{Endpoint, Middleware, Next};
use super::RpcError;

/// An ordered middleware chain with named insertion markers.
///
/// A chain is assembled once at startup (`layer`, `mark`) and then compiled
/// into [`Composed`] callables. Markers record a position in the chain so
/// call-scoped middleware can later be inserted there instead of at the
/// tail; see [`Chain::compose_at`] and [`Flow`].
///
/// # Example
/// ```
/// use shallot::chain::Chain;
///
/// let chain: Chain<u32> = Chain::new().mark("with");
/// assert!(chain.has_marker("with"));
/// ```
pub struct Chain<C> {
    layers: Vec<Arc<dyn Middleware<C>>>,
    markers: HashMap<String, usize>,
}

impl<C: Send + 'static> Chain<C> {
    /// Create a new empty chain
    pub fn new() -> Self {
        Self {
            layers: Vec::new(),
            markers: HashMap::new(),
        }
    }

    /// Append a middleware to the chain
    pub fn layer(mut self, middleware: Arc<dyn Middleware<C>>) -> Self {
        self.layers.push(middleware);
        self
    }

    /// Append a middleware to the chain (mutable version)
    pub fn push(&mut self, middleware: Arc<dyn Middleware<C>>) {
        self.layers.push(middleware);
    }

    /// Record a named marker at the current tail of the chain.
    ///
    /// Middleware inserted later through this marker run after everything
    /// layered before the `mark` call and before everything layered after
    /// it.
    ///
    /// # Panics
    /// Panics if `name` was already declared on this chain. Marker names
    /// are startup configuration; redeclaring one is a programming error.
    /// Use [`Chain::try_mark`] to handle the collision instead.
    pub fn mark(mut self, name: impl Into<String>) -> Self {
        let name = name.into();
        if let Err(err) = self.try_mark(name) {
            panic!("{}", err);
        }
        self
    }

    /// Record a named marker, reporting a duplicate instead of panicking
    pub fn try_mark(&mut self, name: impl Into<String>) -> Result<(), RpcError> {
        let name = name.into();
        if self.markers.contains_key(&name) {
            return Err(RpcError::duplicate_marker(name));
        }
        self.markers.insert(name, self.layers.len());
        Ok(())
    }

    /// Check if a marker has been declared
    pub fn has_marker(&self, name: &str) -> bool {
        self.markers.contains_key(name)
    }

    /// Number of middleware in the chain
    pub fn len(&self) -> usize {
        self.layers.len()
    }

    /// Check if the chain has no middleware
    pub fn is_empty(&self) -> bool {
        self.layers.is_empty()
    }

    /// Compile the chain into a callable.
    ///
    /// The callable captures a snapshot of the current layers; middleware
    /// added to the chain afterwards do not affect it. Compose again to
    /// pick up later additions.
    pub fn compose(&self) -> Composed<C> {
        Composed {
            stack: self.layers.clone().into(),
            endpoint: None,
        }
    }

    /// Compile the chain with `staged` middleware inserted at `marker`.
    ///
    /// The effective order is `layers[..marker] + staged + layers[marker..]`,
    /// materialized as a fresh list; the chain itself is never modified.
    pub fn compose_at(
        &self,
        marker: &str,
        staged: Vec<Arc<dyn Middleware<C>>>,
    ) -> Result<Composed<C>, RpcError> {
        let at = *self
            .markers
            .get(marker)
            .ok_or_else(|| RpcError::marker_not_found(marker))?;
        Ok(self.compose_spliced(at, staged))
    }

    fn compose_spliced(&self, at: usize, staged: Vec<Arc<dyn Middleware<C>>>) -> Composed<C> {
        let mut stack = Vec::with_capacity(self.layers.len() + staged.len());
        stack.extend(self.layers[..at].iter().cloned());
        stack.extend(staged);
        stack.extend(self.layers[at..].iter().cloned());
        Composed {
            stack: stack.into(),
            endpoint: None,
        }
    }
}

impl<C: Send + 'static> Default for Chain<C> {
    fn default() -> Self {
        Self::new()
    }
}

impl<C> Clone for Chain<C> {
    fn clone(&self) -> Self {
        Self {
            layers: self.layers.clone(),
            markers: self.markers.clone(),
        }
    }
}

/// A compiled chain: a snapshot of middleware plus an optional endpoint.
///
/// Running a composed chain enters the middleware outer-to-inner, reaches
/// the endpoint (if any), and unwinds inner-to-outer. Independent `run`
/// calls do not share state beyond what the middleware themselves capture.
pub struct Composed<C> {
    stack: Arc<[Arc<dyn Middleware<C>>]>,
    endpoint: Option<Arc<dyn Endpoint<C>>>,
}

impl<C: Send + 'static> Composed<C> {
    /// Attach a terminal endpoint, replacing any previous one
    pub fn with_endpoint(mut self, endpoint: Arc<dyn Endpoint<C>>) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    /// Run the full chain on a context
    pub async fn run(&self, ctx: C) -> Result<C, RpcError> {
        Next::new(&self.stack, self.endpoint.as_ref()).run(ctx).await
    }

    /// Number of middleware in the snapshot
    pub fn len(&self) -> usize {
        self.stack.len()
    }

    /// Check if the snapshot has no middleware
    pub fn is_empty(&self) -> bool {
        self.stack.is_empty()
    }
}

impl<C> Clone for Composed<C> {
    fn clone(&self) -> Self {
        Self {
            stack: self.stack.clone(),
            endpoint: self.endpoint.clone(),
        }
    }
}

impl<C> std::fmt::Debug for Composed<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Composed")
            .field("stack", &self.stack.len())
            .field("endpoint", &self.endpoint.is_some())
            .finish()
    }
}

/// A chain with a buffer of call-scoped middleware.
///
/// Staged middleware are spliced in at the flow's marker by the next
/// `compose` call and cleared afterwards, so each staged unit serves
/// exactly one composition.
pub struct Flow<C> {
    chain: Chain<C>,
    at: usize,
    staged: Mutex<Vec<Arc<dyn Middleware<C>>>>,
}

impl<C: Send + 'static> Flow<C> {
    /// Wrap a finished chain, staging future insertions at `marker`
    pub fn new(chain: Chain<C>, marker: &str) -> Result<Self, RpcError> {
        let at = *chain
            .markers
            .get(marker)
            .ok_or_else(|| RpcError::marker_not_found(marker))?;
        Ok(Self {
            chain,
            at,
            staged: Mutex::new(Vec::new()),
        })
    }

    /// Buffer a middleware for the next composition only
    pub fn stage(&self, middleware: Arc<dyn Middleware<C>>) {
        self.staged.lock().unwrap().push(middleware);
    }

    /// Compile the chain, consuming anything staged since the last call
    pub fn compose(&self) -> Composed<C> {
        let staged = std::mem::take(&mut *self.staged.lock().unwrap());
        if staged.is_empty() {
            self.chain.compose()
        } else {
            self.chain.compose_spliced(self.at, staged)
        }
    }
}

impl<C> std::fmt::Debug for Flow<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Flow").field("at", &self.at).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::middleware::BoxFuture;

    #[derive(Debug, Default)]
    struct TraceCtx {
        log: Vec<String>,
    }

    /// Middleware that records its entry and exit around the rest of the chain
    struct Tag(&'static str);

    impl Middleware<TraceCtx> for Tag {
        fn handle<'a>(
            &'a self,
            mut ctx: TraceCtx,
            next: Next<'a, TraceCtx>,
        ) -> BoxFuture<'a, Result<TraceCtx, RpcError>> {
            Box::pin(async move {
                ctx.log.push(format!("{}:enter", self.0));
                let mut ctx = next.run(ctx).await?;
                ctx.log.push(format!("{}:exit", self.0));
                Ok(ctx)
            })
        }
    }

    /// Middleware that never calls next
    struct Stop;

    impl Middleware<TraceCtx> for Stop {
        fn handle<'a>(
            &'a self,
            mut ctx: TraceCtx,
            _next: Next<'a, TraceCtx>,
        ) -> BoxFuture<'a, Result<TraceCtx, RpcError>> {
            Box::pin(async move {
                ctx.log.push("stop".to_string());
                Ok(ctx)
            })
        }
    }

    /// Middleware that fails before calling next
    struct Fail;

    impl Middleware<TraceCtx> for Fail {
        fn handle<'a>(
            &'a self,
            _ctx: TraceCtx,
            _next: Next<'a, TraceCtx>,
        ) -> BoxFuture<'a, Result<TraceCtx, RpcError>> {
            Box::pin(async move { Err(RpcError::custom("boom")) })
        }
    }

    #[tokio::test]
    async fn test_entry_and_unwind_order() {
        let chain = Chain::new()
            .layer(Arc::new(Tag("a")))
            .layer(Arc::new(Tag("b")));

        let ctx = chain.compose().run(TraceCtx::default()).await.unwrap();
        assert_eq!(
            ctx.log,
            vec!["a:enter", "b:enter", "b:exit", "a:exit"]
        );
    }

    #[tokio::test]
    async fn test_marker_insertion_order() {
        // [a] mark [b] with staged [t] must run a, t, b in and b, t, a out
        let chain = Chain::new()
            .layer(Arc::new(Tag("a")))
            .mark("with")
            .layer(Arc::new(Tag("b")));

        let composed = chain
            .compose_at("with", vec![Arc::new(Tag("t"))])
            .unwrap();
        let ctx = composed.run(TraceCtx::default()).await.unwrap();
        assert_eq!(
            ctx.log,
            vec![
                "a:enter", "t:enter", "b:enter", "b:exit", "t:exit", "a:exit"
            ]
        );
    }

    #[tokio::test]
    async fn test_marker_insertion_leaves_chain_untouched() {
        let chain = Chain::new()
            .layer(Arc::new(Tag("a")))
            .mark("with")
            .layer(Arc::new(Tag("b")));

        let _ = chain
            .compose_at("with", vec![Arc::new(Tag("t1")), Arc::new(Tag("t2"))])
            .unwrap();

        // a second plain composition must not contain the staged layers
        let ctx = chain.compose().run(TraceCtx::default()).await.unwrap();
        assert_eq!(ctx.log, vec!["a:enter", "b:enter", "b:exit", "a:exit"]);
    }

    #[tokio::test]
    async fn test_short_circuit_skips_downstream() {
        let chain = Chain::new()
            .layer(Arc::new(Tag("a")))
            .layer(Arc::new(Stop))
            .layer(Arc::new(Tag("b")));

        let ctx = chain.compose().run(TraceCtx::default()).await.unwrap();
        assert_eq!(ctx.log, vec!["a:enter", "stop", "a:exit"]);
    }

    #[tokio::test]
    async fn test_error_rejects_run_without_unwind() {
        let chain = Chain::new()
            .layer(Arc::new(Tag("a")))
            .layer(Arc::new(Fail))
            .layer(Arc::new(Tag("b")));

        let err = chain.compose().run(TraceCtx::default()).await.unwrap_err();
        assert_eq!(err, RpcError::custom("boom"));
    }

    #[tokio::test]
    async fn test_composed_snapshot_is_immutable() {
        let mut chain = Chain::new().layer(Arc::new(Tag("a")));
        let composed = chain.compose();

        chain.push(Arc::new(Tag("late")));

        let ctx = composed.run(TraceCtx::default()).await.unwrap();
        assert_eq!(ctx.log, vec!["a:enter", "a:exit"]);

        // recomposing reflects the current chain
        let ctx = chain.compose().run(TraceCtx::default()).await.unwrap();
        assert_eq!(
            ctx.log,
            vec!["a:enter", "late:enter", "late:exit", "a:exit"]
        );
    }

    #[test]
    #[should_panic(expected = "Marker declared twice: with")]
    fn test_mark_panics_on_redeclaration() {
        let _: Chain<TraceCtx> = Chain::new().mark("with").mark("with");
    }

    #[test]
    fn test_try_mark_reports_duplicate() {
        let mut chain: Chain<TraceCtx> = Chain::new().mark("with");
        assert_eq!(
            chain.try_mark("with"),
            Err(RpcError::duplicate_marker("with"))
        );
    }

    #[test]
    fn test_compose_at_unknown_marker() {
        let chain: Chain<TraceCtx> = Chain::new();
        let err = chain.compose_at("missing", Vec::new()).unwrap_err();
        assert_eq!(err, RpcError::marker_not_found("missing"));
    }

    #[tokio::test]
    async fn test_flow_staged_is_single_use() {
        let chain = Chain::new()
            .layer(Arc::new(Tag("a")))
            .mark("with")
            .layer(Arc::new(Tag("b")));
        let flow = Flow::new(chain, "with").unwrap();

        flow.stage(Arc::new(Tag("t1")));
        flow.stage(Arc::new(Tag("t2")));

        let ctx = flow.compose().run(TraceCtx::default()).await.unwrap();
        assert_eq!(
            ctx.log,
            vec![
                "a:enter", "t1:enter", "t2:enter", "b:enter", "b:exit",
                "t2:exit", "t1:exit", "a:exit"
            ]
        );

        // staged middleware were consumed by the first composition
        let ctx = flow.compose().run(TraceCtx::default()).await.unwrap();
        assert_eq!(ctx.log, vec!["a:enter", "b:enter", "b:exit", "a:exit"]);
    }

    #[test]
    fn test_flow_requires_marker() {
        let chain: Chain<TraceCtx> = Chain::new();
        let err = Flow::new(chain, "with").unwrap_err();
        assert_eq!(err, RpcError::marker_not_found("with"));
    }

    #[tokio::test]
    async fn test_empty_chain_returns_context() {
        let chain: Chain<TraceCtx> = Chain::new();
        let ctx = chain.compose().run(TraceCtx::default()).await.unwrap();
        assert!(ctx.log.is_empty());
    }
}
