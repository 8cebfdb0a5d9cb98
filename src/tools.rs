//! # Tool Dispatch
//!
//! Serves tool-invocation requests issued by the remote service.
//!
//! ## Declared Tools:
//! - **search_news**: `topic` (required) and `date` (optional: `YYYY-MM-DD`,
//!   `today` or `yesterday`), answered by the `NewsSearch` collaborator
//!
//! ## Execution Model:
//! Every call runs as its own Tokio task, so a slow search never holds up the
//! inbound stream or other calls. When the task finishes it sends exactly one
//! `ToolResponse` with the call's id. Calls may complete in any order.
//!
//! Calls that cannot be served (unknown tool, missing topic, search failure)
//! are answered with a configurable fallback text instead of failing the
//! session. Cancelled calls are aborted and never answered.

use crate::channel::{OutboundHandle, ToolCall, ToolDeclaration, ToolResponse};
use crate::error::SessionError;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::task::AbortHandle;
use tracing::{debug, info, warn};

/// Name of the single declared tool.
pub const SEARCH_NEWS_TOOL: &str = "search_news";

/// External news search capability.
#[async_trait]
pub trait NewsSearch: Send + Sync {
    /// Search for articles about `topic`, optionally restricted to `date`.
    async fn search(&self, topic: &str, date: Option<&str>) -> anyhow::Result<String>;
}

/// Declaration advertised to the service in the setup frame.
pub fn search_news_declaration() -> ToolDeclaration {
    ToolDeclaration {
        name: SEARCH_NEWS_TOOL.to_string(),
        description: "Search for news articles based on a topic and optional date. \
                      Use this when the user asks for news, past events, or specific topics."
            .to_string(),
        parameters: json!({
            "type": "OBJECT",
            "properties": {
                "topic": {
                    "type": "STRING",
                    "description": "The news topic or keywords to search for."
                },
                "date": {
                    "type": "STRING",
                    "description": "The specific date for the news in YYYY-MM-DD format, or \"today\" / \"yesterday\"."
                }
            },
            "required": ["topic"]
        }),
    }
}

struct PendingCall {
    token: u64,
    name: String,
    abort: AbortHandle,
}

/// Runs tool calls and correlates their responses by id.
pub struct ToolDispatcher {
    search: Arc<dyn NewsSearch>,
    outbound: OutboundHandle,
    fallback: Arc<str>,
    pending: Arc<Mutex<HashMap<String, PendingCall>>>,
    next_token: AtomicU64,
}

impl ToolDispatcher {
    pub fn new(search: Arc<dyn NewsSearch>, outbound: OutboundHandle, fallback: &str) -> Self {
        Self {
            search,
            outbound,
            fallback: Arc::from(fallback),
            pending: Arc::new(Mutex::new(HashMap::new())),
            next_token: AtomicU64::new(0),
        }
    }

    /// Start serving `call` in the background. Never waits for the result.
    ///
    /// A call reusing the id of a pending call replaces it; the older call is
    /// aborted so the id is still answered exactly once.
    pub fn dispatch(&self, call: ToolCall) {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        let id = call.id.clone();
        let name = call.name.clone();

        info!(call_id = %id, tool = %name, "Dispatching tool call");

        // The entry is inserted while the lock is held so the task cannot
        // finish before it is registered.
        let mut pending = self.pending.lock();
        let task = tokio::spawn(run_call(
            call,
            token,
            self.search.clone(),
            self.outbound.clone(),
            self.fallback.clone(),
            self.pending.clone(),
        ));

        let replaced = pending.insert(
            id.clone(),
            PendingCall {
                token,
                name,
                abort: task.abort_handle(),
            },
        );
        if let Some(previous) = replaced {
            warn!(call_id = %id, "Duplicate tool call id, replacing pending call");
            previous.abort.abort();
        }
    }

    /// Abort the given calls; they will not be answered.
    pub fn cancel(&self, ids: &[String]) {
        let mut pending = self.pending.lock();
        for id in ids {
            match pending.remove(id) {
                Some(call) => {
                    call.abort.abort();
                    info!(call_id = %id, tool = %call.name, "Tool call cancelled");
                }
                None => debug!(call_id = %id, "Cancellation for unknown or finished tool call"),
            }
        }
    }

    /// Abort every pending call. Used at teardown; never waits.
    pub fn cancel_all(&self) {
        let drained: Vec<_> = self.pending.lock().drain().collect();
        if !drained.is_empty() {
            info!(count = drained.len(), "Aborting pending tool calls");
        }
        for (_, call) in drained {
            call.abort.abort();
        }
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn is_pending(&self, id: &str) -> bool {
        self.pending.lock().contains_key(id)
    }
}

impl Drop for ToolDispatcher {
    fn drop(&mut self) {
        self.cancel_all();
    }
}

/// Body of one tool-call task.
async fn run_call(
    call: ToolCall,
    token: u64,
    search: Arc<dyn NewsSearch>,
    outbound: OutboundHandle,
    fallback: Arc<str>,
    pending: Arc<Mutex<HashMap<String, PendingCall>>>,
) {
    let result = resolve(&call, search.as_ref(), &fallback).await;

    // Only the call currently registered under this id may answer
    let still_pending = {
        let mut pending = pending.lock();
        match pending.get(&call.id) {
            Some(entry) if entry.token == token => {
                pending.remove(&call.id);
                true
            }
            _ => false,
        }
    };
    if !still_pending {
        debug!(call_id = %call.id, "Tool result discarded, call no longer pending");
        return;
    }

    let response = ToolResponse {
        id: call.id,
        name: call.name,
        result,
    };
    let call_id = response.id.clone();
    if outbound.send_tool_response(response) {
        info!(call_id = %call_id, "Tool response sent");
    } else {
        debug!(call_id = %call_id, "Tool result discarded, session closed");
    }
}

/// Compute the result text for a call, falling back on any failure.
async fn resolve(call: &ToolCall, search: &dyn NewsSearch, fallback: &str) -> String {
    if call.name != SEARCH_NEWS_TOOL {
        warn!(call_id = %call.id, tool = %call.name, "Unknown tool requested");
        return fallback.to_string();
    }

    let Some(topic) = call.arg_str("topic") else {
        warn!(call_id = %call.id, "search_news called without a topic");
        return fallback.to_string();
    };
    let date = call.arg_str("date");

    debug!(call_id = %call.id, topic, date, "Searching news");
    match search.search(topic, date).await {
        Ok(result) => result,
        Err(e) => {
            let err = SessionError::ToolExecutionFailure(e.to_string());
            warn!(call_id = %call.id, kind = err.kind(), "{}", err);
            fallback.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channel::OutboundMessage;
    use crate::session::testing::ControlledSearch;
    use serde_json::{Map, Value};
    use std::time::Duration;
    use tokio::sync::mpsc;

    const FALLBACK: &str = "fallback";

    fn call(id: &str, name: &str, topic: Option<&str>) -> ToolCall {
        let mut args = Map::new();
        if let Some(topic) = topic {
            args.insert("topic".to_string(), Value::String(topic.to_string()));
        }
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            args,
        }
    }

    async fn next_response(rx: &mut mpsc::UnboundedReceiver<OutboundMessage>) -> ToolResponse {
        let message = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("timed out waiting for tool response")
            .expect("outbound stream closed");
        match message {
            OutboundMessage::ToolResponse(response) => response,
            other => panic!("unexpected outbound message: {:?}", other),
        }
    }

    #[test]
    fn test_declaration_requires_topic() {
        let declaration = search_news_declaration();
        assert_eq!(declaration.name, "search_news");
        assert_eq!(declaration.parameters["required"][0], "topic");
        assert!(declaration.parameters["properties"]["date"].is_object());
    }

    #[test]
    fn test_declaration_wording() {
        let declaration = search_news_declaration();
        assert_eq!(
            declaration.description,
            "Search for news articles based on a topic and optional date. Use this when the user \
             asks for news, past events, or specific topics."
        );
        assert_eq!(
            declaration.parameters["properties"]["date"]["description"],
            "The specific date for the news in YYYY-MM-DD format, or \"today\" / \"yesterday\"."
        );
        assert_eq!(
            declaration.parameters["properties"]["topic"]["description"],
            "The news topic or keywords to search for."
        );
    }

    #[tokio::test]
    async fn test_out_of_order_completion() {
        let search = ControlledSearch::new();
        let release_a = search.hold("A");
        let release_b = search.hold("B");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = ToolDispatcher::new(search.clone(), OutboundHandle::new(tx), FALLBACK);

        dispatcher.dispatch(call("call-a", SEARCH_NEWS_TOOL, Some("A")));
        dispatcher.dispatch(call("call-b", SEARCH_NEWS_TOOL, Some("B")));
        assert_eq!(dispatcher.pending_count(), 2);

        release_b.send(Ok("result B".to_string())).unwrap();
        let first = next_response(&mut rx).await;
        assert_eq!(first.id, "call-b");
        assert_eq!(first.result, "result B");

        release_a.send(Ok("result A".to_string())).unwrap();
        let second = next_response(&mut rx).await;
        assert_eq!(second.id, "call-a");
        assert_eq!(second.result, "result A");

        assert_eq!(dispatcher.pending_count(), 0);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_failures_resolve_to_fallback() {
        let search = ControlledSearch::new();
        let release = search.hold("broken");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = ToolDispatcher::new(search.clone(), OutboundHandle::new(tx), FALLBACK);

        dispatcher.dispatch(call("c1", SEARCH_NEWS_TOOL, Some("broken")));
        release.send(Err(anyhow::anyhow!("upstream 503"))).unwrap();
        let response = next_response(&mut rx).await;
        assert_eq!((response.id.as_str(), response.result.as_str()), ("c1", FALLBACK));

        dispatcher.dispatch(call("c2", SEARCH_NEWS_TOOL, None));
        let response = next_response(&mut rx).await;
        assert_eq!((response.id.as_str(), response.result.as_str()), ("c2", FALLBACK));

        dispatcher.dispatch(call("c3", "get_weather", Some("rain")));
        let response = next_response(&mut rx).await;
        assert_eq!(response.id, "c3");
        assert_eq!(response.name, "get_weather");
        assert_eq!(response.result, FALLBACK);

        // Only the first call reached the collaborator
        assert_eq!(search.calls().len(), 1);
    }

    #[tokio::test]
    async fn test_date_argument_is_forwarded() {
        let search = ControlledSearch::new();
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = ToolDispatcher::new(search.clone(), OutboundHandle::new(tx), FALLBACK);

        let mut request = call("c1", SEARCH_NEWS_TOOL, Some("markets"));
        request
            .args
            .insert("date".to_string(), Value::String("yesterday".to_string()));
        dispatcher.dispatch(request);

        next_response(&mut rx).await;
        assert_eq!(
            search.calls(),
            vec![("markets".to_string(), Some("yesterday".to_string()))]
        );
    }

    #[tokio::test]
    async fn test_cancelled_call_is_not_answered() {
        let search = ControlledSearch::new();
        let _held = search.hold("slow");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = ToolDispatcher::new(search.clone(), OutboundHandle::new(tx), FALLBACK);

        dispatcher.dispatch(call("slow-1", SEARCH_NEWS_TOOL, Some("slow")));
        dispatcher.dispatch(call("fast-1", SEARCH_NEWS_TOOL, Some("fast")));
        dispatcher.cancel(&["slow-1".to_string(), "unknown".to_string()]);

        let response = next_response(&mut rx).await;
        assert_eq!(response.id, "fast-1");
        assert!(!dispatcher.is_pending("slow-1"));

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_result_after_teardown_is_discarded() {
        let search = ControlledSearch::new();
        let release = search.hold("late");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = ToolDispatcher::new(search.clone(), OutboundHandle::new(tx), FALLBACK);

        dispatcher.dispatch(call("late-1", SEARCH_NEWS_TOOL, Some("late")));
        dispatcher.cancel_all();
        assert_eq!(dispatcher.pending_count(), 0);

        let _ = release.send(Ok("too late".to_string()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_duplicate_id_answered_once() {
        let search = ControlledSearch::new();
        let first = search.hold("first");
        let second = search.hold("second");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let dispatcher = ToolDispatcher::new(search.clone(), OutboundHandle::new(tx), FALLBACK);

        dispatcher.dispatch(call("dup", SEARCH_NEWS_TOOL, Some("first")));
        dispatcher.dispatch(call("dup", SEARCH_NEWS_TOOL, Some("second")));
        assert_eq!(dispatcher.pending_count(), 1);

        let _ = first.send(Ok("stale".to_string()));
        second.send(Ok("fresh".to_string())).unwrap();

        let response = next_response(&mut rx).await;
        assert_eq!(response.result, "fresh");
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(rx.try_recv().is_err());
    }
}
