//! Request tracking
//!
//! Correlates dispatched requests with their eventual outcome by
//! identifier. Entries leave the tracker on completion, on failure, or when
//! they outlive the configured maximum age, so the map only ever holds
//! in-flight requests plus a short grace window.
//!
//! Expired entries are evicted every time a new request is tracked.
//! `spawn_sweeper` additionally clears a tracker that has gone quiet.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard, Weak};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::core::{CommunicationMode, RequestMethod, ResponseHandler};
use crate::error::{Result, WorkflowError};
use crate::mapping::RawReply;

/// Default age after which an unresolved entry is swept
pub const DEFAULT_MAX_AGE: Duration = Duration::from_secs(15 * 60);

/// Lifecycle of a tracked request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestStatus {
    Pending,
    Completed,
    Failed,
}

/// A dispatched request
#[derive(Debug, Clone)]
pub struct Request {
    /// Unique identifier, never reused
    pub identifier: String,

    /// Target workflow
    pub workflow_id: String,

    /// Serialized payload as sent
    pub payload: Map<String, Value>,

    /// Communication mode of the dispatch
    pub mode: CommunicationMode,

    /// Creation time
    pub created_at: DateTime<Utc>,

    /// Transport method
    pub method: RequestMethod,

    status: RequestStatus,
}

impl Request {
    /// Create a pending request
    pub fn new(
        identifier: impl Into<String>,
        workflow_id: impl Into<String>,
        payload: Map<String, Value>,
        mode: CommunicationMode,
        method: RequestMethod,
    ) -> Self {
        Self {
            identifier: identifier.into(),
            workflow_id: workflow_id.into(),
            payload,
            mode,
            created_at: Utc::now(),
            method,
            status: RequestStatus::Pending,
        }
    }

    /// Current status
    pub fn status(&self) -> RequestStatus {
        self.status
    }

    fn age(&self) -> Duration {
        (Utc::now() - self.created_at).to_std().unwrap_or_default()
    }
}

/// A completed request together with its callback, if one was registered
pub struct TrackedRequest {
    pub request: Request,
    pub handler: Option<Arc<dyn ResponseHandler>>,
}

impl fmt::Debug for TrackedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackedRequest")
            .field("request", &self.request)
            .field("has_handler", &self.handler.is_some())
            .finish()
    }
}

struct Entry {
    request: Request,
    handler: Option<Arc<dyn ResponseHandler>>,
}

/// Concurrent map of in-flight requests
pub struct RequestTracker {
    entries: RwLock<HashMap<String, Entry>>,
    max_age: Duration,
}

impl fmt::Debug for RequestTracker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestTracker")
            .field("entries", &self.len())
            .field("max_age", &self.max_age)
            .finish()
    }
}

impl Default for RequestTracker {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_AGE)
    }
}

impl RequestTracker {
    /// Create a tracker that sweeps entries older than `max_age`
    pub fn new(max_age: Duration) -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            max_age,
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, HashMap<String, Entry>> {
        self.entries.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, HashMap<String, Entry>> {
        self.entries.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Start tracking a pending request
    pub fn track(&self, request: Request, handler: Option<Arc<dyn ResponseHandler>>) -> Result<()> {
        if request.status != RequestStatus::Pending {
            return Err(WorkflowError::validation(format!(
                "Request {} is not pending",
                request.identifier
            )));
        }

        let mut entries = self.write();
        evict_expired(&mut entries, self.max_age);
        if entries.contains_key(&request.identifier) {
            return Err(WorkflowError::validation(format!(
                "Request {} is already tracked",
                request.identifier
            )));
        }

        debug!(request_id = %request.identifier, workflow_id = %request.workflow_id, mode = %request.mode, "Tracking request");
        entries.insert(request.identifier.clone(), Entry { request, handler });
        Ok(())
    }

    /// Mark a request completed and stop tracking it
    pub fn complete(&self, identifier: &str, raw_reply: &RawReply) -> Option<TrackedRequest> {
        let Entry { mut request, handler } = self.write().remove(identifier)?;
        request.status = RequestStatus::Completed;

        debug!(request_id = %identifier, reply_keys = raw_reply.len(), "Request completed");
        Some(TrackedRequest { request, handler })
    }

    /// Mark a request failed and stop tracking it
    pub fn fail(&self, identifier: &str, error: &WorkflowError) -> Option<Request> {
        let Entry { mut request, .. } = self.write().remove(identifier)?;
        request.status = RequestStatus::Failed;

        debug!(request_id = %identifier, error = %error, "Request failed");
        Some(request)
    }

    /// Look up a tracked request
    pub fn find(&self, identifier: &str) -> Option<Request> {
        self.read().get(identifier).map(|entry| entry.request.clone())
    }

    /// Whether the identifier is tracked
    pub fn contains(&self, identifier: &str) -> bool {
        self.read().contains_key(identifier)
    }

    /// Number of tracked requests
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Whether nothing is tracked
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Configured maximum age
    pub fn max_age(&self) -> Duration {
        self.max_age
    }

    /// Remove entries older than the configured maximum age
    pub fn sweep(&self) -> usize {
        self.sweep_older_than(self.max_age)
    }

    /// Remove entries older than `max_age`, returning how many were removed
    pub fn sweep_older_than(&self, max_age: Duration) -> usize {
        evict_expired(&mut self.write(), max_age)
    }

    /// Sweep periodically until the tracker is dropped
    pub fn spawn_sweeper(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let tracker: Weak<Self> = Arc::downgrade(self);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately
            ticker.tick().await;

            loop {
                ticker.tick().await;
                match tracker.upgrade() {
                    Some(tracker) => {
                        tracker.sweep();
                    }
                    None => break,
                }
            }
        })
    }

    /// Guard an already tracked request so it is released on every exit path
    pub fn guard(&self, identifier: impl Into<String>) -> TrackedGuard<'_> {
        TrackedGuard {
            tracker: self,
            identifier: identifier.into(),
            resolved: false,
        }
    }
}

fn evict_expired(entries: &mut HashMap<String, Entry>, max_age: Duration) -> usize {
    let before = entries.len();

    entries.retain(|identifier, entry| {
        let keep = entry.request.age() < max_age;
        if !keep && entry.handler.is_some() {
            warn!(
                request_id = %identifier,
                workflow_id = %entry.request.workflow_id,
                "Callback never arrived, dropping expired request"
            );
        }
        keep
    });

    let removed = before - entries.len();
    if removed > 0 {
        debug!(removed, remaining = entries.len(), "Swept expired requests");
    }
    removed
}

/// Releases a tracked request when the dispatch path ends.
///
/// Dropping an unresolved guard (an early return or a cancelled future)
/// fails the request.
#[must_use = "an unresolved guard fails the request when dropped"]
pub struct TrackedGuard<'a> {
    tracker: &'a RequestTracker,
    identifier: String,
    resolved: bool,
}

impl TrackedGuard<'_> {
    /// Identifier of the guarded request
    pub fn identifier(&self) -> &str {
        &self.identifier
    }

    /// Complete the request with its reply
    pub fn complete(mut self, raw_reply: &RawReply) -> Option<TrackedRequest> {
        self.resolved = true;
        self.tracker.complete(&self.identifier, raw_reply)
    }

    /// Fail the request
    pub fn fail(mut self, error: &WorkflowError) -> Option<Request> {
        self.resolved = true;
        self.tracker.fail(&self.identifier, error)
    }

    /// Leave the request tracked for the webhook delivery path
    pub fn hand_over(mut self) -> String {
        self.resolved = true;
        std::mem::take(&mut self.identifier)
    }
}

impl Drop for TrackedGuard<'_> {
    fn drop(&mut self) {
        if !self.resolved {
            let error = WorkflowError::internal("dispatch abandoned before an outcome");
            self.tracker.fail(&self.identifier, &error);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn request(id: &str) -> Request {
        Request::new(
            id,
            "order-review",
            Map::new(),
            CommunicationMode::Async,
            RequestMethod::PostJson,
        )
    }

    fn reply() -> RawReply {
        match json!({"status": "ok"}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_track_and_find() {
        let tracker = RequestTracker::default();
        tracker.track(request("req-1"), None).unwrap();

        let found = tracker.find("req-1").unwrap();
        assert_eq!(found.workflow_id, "order-review");
        assert_eq!(found.status(), RequestStatus::Pending);
        assert!(tracker.find("req-2").is_none());
    }

    #[test]
    fn test_duplicate_identifier_rejected() {
        let tracker = RequestTracker::default();
        tracker.track(request("req-1"), None).unwrap();

        assert!(tracker.track(request("req-1"), None).is_err());
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn test_complete_removes_entry() {
        let tracker = RequestTracker::default();
        tracker.track(request("req-1"), None).unwrap();

        let completed = tracker.complete("req-1", &reply()).unwrap();
        assert_eq!(completed.request.status(), RequestStatus::Completed);
        assert!(tracker.is_empty());

        // terminal states never reverse
        assert!(tracker.complete("req-1", &reply()).is_none());
        assert!(tracker.fail("req-1", &WorkflowError::network("late")).is_none());
    }

    #[test]
    fn test_fail_removes_entry() {
        let tracker = RequestTracker::default();
        tracker.track(request("req-1"), None).unwrap();

        let failed = tracker.fail("req-1", &WorkflowError::network("down")).unwrap();
        assert_eq!(failed.status(), RequestStatus::Failed);
        assert!(!tracker.contains("req-1"));
    }

    #[test]
    fn test_sweep_removes_expired_entries() {
        let tracker = RequestTracker::new(Duration::from_millis(20));
        tracker.track(request("old"), None).unwrap();
        tracker.track(request("new"), None).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        assert_eq!(tracker.sweep_older_than(Duration::from_secs(60)), 0);
        assert_eq!(tracker.sweep(), 2);
        assert!(tracker.is_empty());
    }

    #[test]
    fn test_tracking_evicts_expired_entries() {
        let tracker = RequestTracker::new(Duration::from_millis(20));
        tracker.track(request("stale-1"), None).unwrap();
        tracker.track(request("stale-2"), None).unwrap();
        std::thread::sleep(Duration::from_millis(40));

        tracker.track(request("fresh"), None).unwrap();

        assert_eq!(tracker.len(), 1);
        assert!(tracker.contains("fresh"));
    }

    #[test]
    fn test_dropped_guard_fails_request() {
        let tracker = RequestTracker::default();
        tracker.track(request("req-1"), None).unwrap();

        {
            let _guard = tracker.guard("req-1");
        }

        assert!(tracker.is_empty());
    }

    #[test]
    fn test_hand_over_keeps_request() {
        let tracker = RequestTracker::default();
        tracker.track(request("req-1"), None).unwrap();

        let id = tracker.guard("req-1").hand_over();

        assert_eq!(id, "req-1");
        assert!(tracker.contains("req-1"));
    }

    #[test]
    fn test_completion_returns_handler() {
        let tracker = RequestTracker::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&calls);
        let handler: Arc<dyn ResponseHandler> = Arc::new(move |_: &RawReply, _: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        tracker.track(request("req-1"), Some(handler)).unwrap();
        let tracked = tracker.complete("req-1", &reply()).unwrap();
        tracked.handler.unwrap().on_response(&reply(), "req-1");

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_sweeper_runs_in_background() {
        let tracker = Arc::new(RequestTracker::new(Duration::from_millis(10)));
        tracker.track(request("req-1"), None).unwrap();

        let handle = tracker.spawn_sweeper(Duration::from_millis(20));
        tokio::time::sleep(Duration::from_millis(80)).await;

        assert!(tracker.is_empty());
        handle.abort();
    }
}
