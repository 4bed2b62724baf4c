//! Plugin chain execution.
//!
//! Plugins run in ascending `order`. Each plugin receives a [`Next`]
//! continuation; calling it runs the rest of the chain, not calling it
//! short-circuits. Running past the last plugin completes the chain.

use std::any::Any;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use futures_util::FutureExt;
use tollgate_model::PluginRole;
use tollgate_telemetry::log_chain_failure;

use crate::error::PluginError;
use crate::exchange::{Exchange, Response, Trace};

/// A request-processing step.
#[async_trait]
pub trait Plugin: Send + Sync {
    fn name(&self) -> &str;

    /// Global execution priority; lower runs first.
    fn order(&self) -> i32;

    fn role(&self) -> PluginRole {
        PluginRole::Function
    }

    /// Skipped plugins are not invoked and the chain moves on.
    fn skip(&self, _exchange: &Exchange) -> bool {
        false
    }

    /// Process the exchange. Either call `next.run(exchange)` or write a
    /// response and return without calling it; never both.
    async fn execute(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), PluginError>;
}

/// Receives per-step timings and failures.
pub trait ChainObserver: Send + Sync {
    /// `elapsed` excludes time spent in later plugins.
    fn plugin_finished(&self, _plugin: &str, _elapsed: Duration, _short_circuit: bool) {}

    fn plugin_failed(&self, _plugin: &str, _error: &PluginError) {}
}

/// Observer that records nothing.
pub struct NoopObserver;

impl ChainObserver for NoopObserver {}

/// How a chain run ended.
#[derive(Debug)]
pub enum ChainOutcome {
    /// Every plugin continued.
    Completed,
    /// `plugin` ended the chain without continuing.
    ShortCircuited { plugin: String },
    /// `plugin` failed; an error envelope has been written.
    Failed { plugin: String, error: PluginError },
    /// The caller went away before the chain finished.
    Cancelled,
}

impl ChainOutcome {
    pub fn is_completed(&self) -> bool {
        matches!(self, ChainOutcome::Completed)
    }
}

/// Continuation into the remaining plugins.
pub struct Next<'a> {
    remaining: &'a [Arc<dyn Plugin>],
    observer: &'a dyn ChainObserver,
}

impl<'a> Next<'a> {
    /// Run the rest of the chain.
    pub async fn run(self, exchange: &mut Exchange) -> Result<(), PluginError> {
        let mut remaining = self.remaining;
        loop {
            let Some((plugin, rest)) = remaining.split_first() else {
                exchange.trace.completed = true;
                return Ok(());
            };
            if plugin.skip(exchange) {
                tracing::trace!(
                    plugin = plugin.name(),
                    request_id = %exchange.request_id(),
                    "plugin skipped"
                );
                remaining = rest;
                continue;
            }
            let next = Next {
                remaining: rest,
                observer: self.observer,
            };
            return step(plugin.as_ref(), exchange, next, self.observer).await;
        }
    }

    /// Plugins not yet run, skipped ones included.
    pub fn remaining(&self) -> usize {
        self.remaining.len()
    }
}

async fn step(
    plugin: &dyn Plugin,
    exchange: &mut Exchange,
    next: Next<'_>,
    observer: &dyn ChainObserver,
) -> Result<(), PluginError> {
    let start = Instant::now();
    exchange.trace.downstream = Duration::ZERO;

    let result = match AssertUnwindSafe(plugin.execute(exchange, next))
        .catch_unwind()
        .await
    {
        Ok(result) => result,
        Err(payload) => Err(PluginError::Internal(format!(
            "plugin panicked: {}",
            panic_message(payload.as_ref())
        ))),
    };

    let total = start.elapsed();
    let own = total.saturating_sub(exchange.trace.downstream);
    exchange.trace.downstream = total;

    let short_circuit = result.is_ok()
        && !exchange.trace.completed
        && exchange.trace.short_circuited_by.is_none();
    if short_circuit {
        exchange.trace.short_circuited_by = Some(plugin.name().to_string());
    }
    if let Err(error) = &result {
        if exchange.trace.failed_at.is_none() {
            exchange.trace.failed_at = Some(plugin.name().to_string());
            observer.plugin_failed(plugin.name(), error);
        }
    }
    observer.plugin_finished(plugin.name(), own, short_circuit);
    result
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s
    } else {
        "non-string panic payload"
    }
}

/// The ordered set of plugins every request runs through.
pub struct PluginChain {
    plugins: Vec<Arc<dyn Plugin>>,
    observer: Arc<dyn ChainObserver>,
}

impl PluginChain {
    /// Build a chain. Plugins are stable-sorted by order.
    pub fn new(mut plugins: Vec<Arc<dyn Plugin>>) -> Self {
        plugins.sort_by_key(|p| p.order());
        Self {
            plugins,
            observer: Arc::new(NoopObserver),
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ChainObserver>) -> Self {
        self.observer = observer;
        self
    }

    /// Plugin names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.plugins.iter().map(|p| p.name()).collect()
    }

    pub fn len(&self) -> usize {
        self.plugins.len()
    }

    pub fn is_empty(&self) -> bool {
        self.plugins.is_empty()
    }

    /// Run every plugin against `exchange`.
    ///
    /// A failure never escapes: the error envelope replaces any response
    /// written so far and the outcome reports the failing plugin.
    pub async fn execute(&self, exchange: &mut Exchange) -> ChainOutcome {
        exchange.trace = Trace::default();
        let next = Next {
            remaining: &self.plugins,
            observer: self.observer.as_ref(),
        };

        match next.run(exchange).await {
            Ok(()) => match exchange.trace.short_circuited_by.take() {
                Some(plugin) if !exchange.trace.completed => {
                    ChainOutcome::ShortCircuited { plugin }
                }
                _ => ChainOutcome::Completed,
            },
            Err(error) => {
                let plugin = exchange.trace.failed_at.take().unwrap_or_default();
                log_chain_failure!(
                    plugin = %plugin,
                    request_id = %exchange.request_id(),
                    module = %exchange.request().module,
                    method = %exchange.request().method,
                    error = %error,
                    "plugin chain failed"
                );
                exchange.force_response(Response::envelope(error.status(), &error.envelope()));
                ChainOutcome::Failed { plugin, error }
            }
        }
    }

    /// Like [`execute`](Self::execute), but stops as soon as `cancel`
    /// resolves. Suspended work in the interrupted plugin is dropped.
    pub async fn execute_until<C>(&self, exchange: &mut Exchange, cancel: C) -> ChainOutcome
    where
        C: Future<Output = ()>,
    {
        let request_id = exchange.request_id();
        tokio::select! {
            biased;
            _ = cancel => {
                tracing::debug!(request_id = %request_id, "chain cancelled");
                ChainOutcome::Cancelled
            }
            outcome = self.execute(exchange) => outcome,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use tollgate_model::{RequestDescriptor, RpcType};

    type Log = Arc<Mutex<Vec<String>>>;

    enum Action {
        Continue,
        Deny(u16),
        Fail,
        Panic,
        Sleep(Duration),
    }

    struct Step {
        name: &'static str,
        order: i32,
        action: Action,
        skip_rpc: Option<RpcType>,
        log: Log,
    }

    impl Step {
        fn new(name: &'static str, order: i32, action: Action, log: &Log) -> Arc<dyn Plugin> {
            Arc::new(Self {
                name,
                order,
                action,
                skip_rpc: None,
                log: Arc::clone(log),
            })
        }
    }

    #[async_trait]
    impl Plugin for Step {
        fn name(&self) -> &str {
            self.name
        }

        fn order(&self) -> i32 {
            self.order
        }

        fn skip(&self, exchange: &Exchange) -> bool {
            self.skip_rpc == Some(exchange.request().rpc_type)
        }

        async fn execute(&self, exchange: &mut Exchange, next: Next<'_>) -> Result<(), PluginError> {
            self.log.lock().push(self.name.to_string());
            match self.action {
                Action::Continue => next.run(exchange).await,
                Action::Deny(status) => exchange.respond(self.name, Response::error(status, "rejected")),
                Action::Fail => Err(PluginError::Internal("boom".into())),
                Action::Panic => panic!("plugin exploded"),
                Action::Sleep(d) => {
                    tokio::time::sleep(d).await;
                    next.run(exchange).await
                }
            }
        }
    }

    fn exchange(rpc: RpcType) -> Exchange {
        Exchange::new(RequestDescriptor::new("orders", "list", rpc))
    }

    fn ran(log: &Log) -> Vec<String> {
        log.lock().clone()
    }

    #[tokio::test]
    async fn runs_in_ascending_order() {
        let log = Log::default();
        let chain = PluginChain::new(vec![
            Step::new("c", 30, Action::Continue, &log),
            Step::new("a", 10, Action::Continue, &log),
            Step::new("b", 20, Action::Continue, &log),
        ]);
        let mut ex = exchange(RpcType::Http);
        let outcome = chain.execute(&mut ex).await;
        assert!(outcome.is_completed());
        assert_eq!(ran(&log), vec!["a", "b", "c"]);
        assert_eq!(chain.names(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn deny_stops_later_plugins() {
        let log = Log::default();
        let chain = PluginChain::new(vec![
            Step::new("waf", 10, Action::Deny(403), &log),
            Step::new("proxy", 50, Action::Continue, &log),
        ]);
        let mut ex = exchange(RpcType::Http);
        let outcome = chain.execute(&mut ex).await;
        assert!(matches!(outcome, ChainOutcome::ShortCircuited { ref plugin } if plugin == "waf"));
        assert_eq!(ran(&log), vec!["waf"]);
        assert_eq!(ex.response().unwrap().status, 403);
    }

    #[tokio::test]
    async fn skipped_plugin_is_not_invoked() {
        let log = Log::default();
        let skipper: Arc<dyn Plugin> = Arc::new(Step {
            name: "dubbo",
            order: 20,
            action: Action::Deny(500),
            skip_rpc: Some(RpcType::Http),
            log: Arc::clone(&log),
        });
        let chain = PluginChain::new(vec![
            Step::new("first", 10, Action::Continue, &log),
            skipper,
            Step::new("last", 30, Action::Continue, &log),
        ]);
        let mut ex = exchange(RpcType::Http);
        assert!(chain.execute(&mut ex).await.is_completed());
        assert_eq!(ran(&log), vec!["first", "last"]);
        assert!(!ex.has_response());
    }

    #[tokio::test]
    async fn failure_becomes_error_envelope() {
        let log = Log::default();
        let chain = PluginChain::new(vec![
            Step::new("outer", 10, Action::Continue, &log),
            Step::new("broken", 20, Action::Fail, &log),
            Step::new("never", 30, Action::Continue, &log),
        ]);
        let mut ex = exchange(RpcType::Http);
        let outcome = chain.execute(&mut ex).await;
        match outcome {
            ChainOutcome::Failed { plugin, .. } => assert_eq!(plugin, "broken"),
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ran(&log), vec!["outer", "broken"]);
        let response = ex.response().unwrap();
        assert_eq!(response.status, 500);
        let body: serde_json::Value = serde_json::from_slice(&response.body).unwrap();
        assert_eq!(body["message"], "internal gateway error");
    }

    #[tokio::test]
    async fn panic_is_contained() {
        let log = Log::default();
        let chain = PluginChain::new(vec![Step::new("wild", 10, Action::Panic, &log)]);
        let mut ex = exchange(RpcType::Http);
        let outcome = chain.execute(&mut ex).await;
        match outcome {
            ChainOutcome::Failed { plugin, error } => {
                assert_eq!(plugin, "wild");
                assert!(error.to_string().contains("plugin exploded"));
            }
            other => panic!("unexpected outcome {other:?}"),
        }
        assert_eq!(ex.response().unwrap().status, 500);
    }

    #[tokio::test]
    async fn empty_chain_completes() {
        let chain = PluginChain::new(Vec::new());
        let mut ex = exchange(RpcType::Http);
        assert!(chain.execute(&mut ex).await.is_completed());
    }

    #[tokio::test]
    async fn cancellation_drops_suspended_step() {
        let log = Log::default();
        let chain = PluginChain::new(vec![
            Step::new("slow", 10, Action::Sleep(Duration::from_secs(5)), &log),
            Step::new("after", 20, Action::Continue, &log),
        ]);
        let mut ex = exchange(RpcType::Http);
        let outcome = chain
            .execute_until(&mut ex, tokio::time::sleep(Duration::from_millis(20)))
            .await;
        assert!(matches!(outcome, ChainOutcome::Cancelled));
        assert_eq!(ran(&log), vec!["slow"]);
    }

    #[derive(Default)]
    struct Recording {
        finished: Mutex<Vec<(String, bool)>>,
        failed: Mutex<Vec<String>>,
    }

    impl ChainObserver for Recording {
        fn plugin_finished(&self, plugin: &str, _elapsed: Duration, short_circuit: bool) {
            self.finished.lock().push((plugin.to_string(), short_circuit));
        }

        fn plugin_failed(&self, plugin: &str, _error: &PluginError) {
            self.failed.lock().push(plugin.to_string());
        }
    }

    #[tokio::test]
    async fn observer_sees_each_step_once() {
        let log = Log::default();
        let observer = Arc::new(Recording::default());
        let chain = PluginChain::new(vec![
            Step::new("a", 10, Action::Continue, &log),
            Step::new("b", 20, Action::Deny(429), &log),
        ])
        .with_observer(observer.clone());
        let mut ex = exchange(RpcType::Http);
        chain.execute(&mut ex).await;

        let finished = observer.finished.lock().clone();
        assert_eq!(
            finished,
            vec![("b".to_string(), true), ("a".to_string(), false)]
        );
        assert!(observer.failed.lock().is_empty());
    }
}
