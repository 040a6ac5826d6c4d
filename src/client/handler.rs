/// Event handlers
///
/// Handlers are registered explicitly with subscribe() and invoked by
/// dispatch; there is no annotation magic. A handler returning Ok is
/// acked automatically; Failed leaves the event unacked so the broker's
/// retry and dead-letter machinery applies.
///
/// Handlers may publish from inside handle(); the SDK stamps such
/// publishes with an incremented depth so the broker's recursion guard
/// can reject unbounded publish cycles.
use crate::broker::Event;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;

/// Outcome of handling one delivered event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HandlerOutcome {
    /// Processed; the SDK acks the event
    Ok,
    /// Not processed; no ack, the broker will retry
    Failed(String),
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: &Event) -> HandlerOutcome;
}

/// Adapter so plain async closures can be handlers
pub struct FnHandler<F> {
    f: F,
}

impl<F, Fut> FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    pub fn new(f: F) -> Arc<Self> {
        Arc::new(Self { f })
    }
}

#[async_trait]
impl<F, Fut> EventHandler for FnHandler<F>
where
    F: Fn(Event) -> Fut + Send + Sync,
    Fut: Future<Output = HandlerOutcome> + Send + 'static,
{
    async fn handle(&self, event: &Event) -> HandlerOutcome {
        (self.f)(event.clone()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::Priority;
    use serde_json::json;

    #[tokio::test]
    async fn test_fn_handler_adapts_closures() {
        let handler = FnHandler::new(|event: Event| async move {
            if event.topic == "task.created" {
                HandlerOutcome::Ok
            } else {
                HandlerOutcome::Failed("wrong topic".to_string())
            }
        });

        let good = Event::accept("task.created".to_string(), json!({}), Priority::NORMAL, None, None);
        let bad = Event::accept("agent.lost".to_string(), json!({}), Priority::NORMAL, None, None);

        assert_eq!(handler.handle(&good).await, HandlerOutcome::Ok);
        assert!(matches!(handler.handle(&bad).await, HandlerOutcome::Failed(_)));
    }
}
