//! Tests for the in-memory workflow client
//!
//! These tests verify that `MockWorkflowClient` honours the dispatch
//! contract and that its assertions report useful failures.

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use serde::Deserialize;
    use serde_json::{json, Map, Value};
    use tokio_test::{assert_err, assert_ok};

    use crate::core::{
        serialize_body, CommunicationMode, JsonPayload, Payload, RequestMethod, ResponseHandler, WorkflowClient,
    };
    use crate::error::{ErrorKind, Result, WorkflowError};
    use crate::mapping::{RawReply, ResponseTarget};
    use crate::testing::{AssertionFailure, MockWorkflowClient};

    #[derive(Debug, Deserialize, PartialEq)]
    struct Approval {
        approved: bool,
        reviewer: String,
    }

    struct ApprovalRequest;

    impl Payload for ApprovalRequest {
        type Output = Approval;

        fn to_body(&self) -> Result<Map<String, Value>> {
            serialize_body(&json!({"document": "contract.pdf"}))
        }

        fn request_method(&self) -> RequestMethod {
            RequestMethod::Put
        }

        fn response_target(&self) -> Option<ResponseTarget<Approval>> {
            Some(ResponseTarget::deserialize())
        }
    }

    fn raw(value: Value) -> RawReply {
        match value {
            Value::Object(map) => map,
            _ => panic!("expected a JSON object"),
        }
    }

    fn payload() -> JsonPayload<Value> {
        JsonPayload::new(json!({"order": {"id": 7, "total": 120}, "priority": "high"}))
    }

    #[tokio::test]
    async fn test_identifiers_are_sequential() {
        let client = MockWorkflowClient::new();

        for expected in 1..=3 {
            let response = assert_ok!(client.send(&payload(), "order-review").await);
            assert_eq!(response.identifier(), format!("mock-id-{}", expected));
        }

        let calls = client.calls();
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[2].identifier, "mock-id-3");
    }

    #[tokio::test]
    async fn test_default_reply() {
        let client = MockWorkflowClient::new();
        let response = assert_ok!(client.send(&payload(), "order-review").await);

        assert_eq!(response.raw_reply(), &raw(json!({"status": "ok", "message": "Mock response"})));
        assert_eq!(response.status_code(), 200);
        assert!(response.is_success());
    }

    #[tokio::test]
    async fn test_queued_replies_are_consumed_in_order() {
        let client = MockWorkflowClient::new();
        client.queue_replies(vec![raw(json!({"n": 1})), raw(json!({"n": 2}))]);
        client.queue_reply(raw(json!({"n": 3})));

        for expected in 1..=3 {
            let response = assert_ok!(client.send(&payload(), "order-review").await);
            assert_eq!(response.get("n"), Some(&json!(expected)));
            assert_eq!(response.status_code(), 200);
            assert!(response.is_success());
        }

        // queue drained
        let response = assert_ok!(client.send(&payload(), "order-review").await);
        assert_eq!(response.get("message"), Some(&json!("Mock response")));
    }

    #[tokio::test]
    async fn test_reply_is_mapped_through_payload_target() {
        let client = MockWorkflowClient::new();
        client.queue_reply(raw(json!({"approved": true, "reviewer": "legal"})));

        let response = assert_ok!(
            client
                .send_sync(&ApprovalRequest, "contract-approval", Duration::from_secs(1))
                .await
        );

        assert_eq!(
            response.into_mapped(),
            Some(Approval {
                approved: true,
                reviewer: "legal".to_string(),
            })
        );

        let call = client.last_call().unwrap();
        assert_eq!(call.mode, CommunicationMode::Sync);
        assert_eq!(call.method, RequestMethod::Put);
        assert_eq!(call.payload.get("document"), Some(&json!("contract.pdf")));
    }

    #[tokio::test]
    async fn test_injected_failure_is_consumed_once() {
        let client = MockWorkflowClient::new();
        client.fail_next(WorkflowError::communication("engine unavailable"));

        let err = assert_err!(client.send(&payload(), "order-review").await);
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert_eq!(err.request_id(), Some("mock-id-1"));

        assert_ok!(client.send(&payload(), "order-review").await);
        // the failed call is still recorded
        assert_eq!(client.call_count(), 2);
    }

    #[tokio::test]
    async fn test_failure_does_not_consume_queued_reply() {
        let client = MockWorkflowClient::new();
        client.queue_reply(raw(json!({"n": 1})));
        client.fail_next(WorkflowError::timeout("too slow"));

        assert_err!(client.send(&payload(), "order-review").await);
        let response = assert_ok!(client.send(&payload(), "order-review").await);

        assert_eq!(response.get("n"), Some(&json!(1)));
    }

    #[tokio::test]
    async fn test_invalid_workflow_id_is_rejected_and_not_recorded() {
        let client = MockWorkflowClient::new();

        let err = assert_err!(client.send(&payload(), "").await);

        assert_eq!(err.kind(), ErrorKind::Validation);
        assert_eq!(client.call_count(), 0);
    }

    #[tokio::test]
    async fn test_invalid_call_leaves_injected_failure_pending() {
        let client = MockWorkflowClient::new();
        client.fail_next(WorkflowError::communication("engine unavailable"));

        let err = assert_err!(client.send(&payload(), "bad id").await);
        assert_eq!(err.kind(), ErrorKind::Validation);

        let err = assert_err!(client.send(&payload(), "order-review").await);
        assert_eq!(err.kind(), ErrorKind::Communication);
        assert_eq!(err.request_id(), Some("mock-id-1"));

        assert_ok!(client.send(&payload(), "order-review").await);
    }

    #[tokio::test]
    async fn test_callback_is_invoked_once_with_reply_and_identifier() {
        let client = MockWorkflowClient::new();
        client.queue_reply(raw(json!({"approved": false})));

        let invocations = Arc::new(AtomicUsize::new(0));
        let seen: Arc<Mutex<Option<(String, RawReply)>>> = Arc::new(Mutex::new(None));

        let counter = Arc::clone(&invocations);
        let sink = Arc::clone(&seen);
        let handler: Arc<dyn ResponseHandler> = Arc::new(move |reply: &RawReply, identifier: &str| {
            counter.fetch_add(1, Ordering::SeqCst);
            *sink.lock().unwrap() = Some((identifier.to_string(), reply.clone()));
        });

        let identifier = assert_ok!(client.send_with_callback(&payload(), "order-review", handler).await);

        assert_eq!(invocations.load(Ordering::SeqCst), 1);
        assert_eq!(
            *seen.lock().unwrap(),
            Some((identifier.clone(), raw(json!({"approved": false}))))
        );
        assert_eq!(client.last_call().unwrap().mode, CommunicationMode::Async);
        assert_eq!(identifier, "mock-id-1");
    }

    #[tokio::test]
    async fn test_reset_restores_initial_state() {
        let client = MockWorkflowClient::new();
        client.queue_reply(raw(json!({"n": 1})));
        client.fail_next(WorkflowError::network("down"));
        assert_err!(client.send(&payload(), "order-review").await);

        client.reset();

        assert_eq!(client.call_count(), 0);
        let response = assert_ok!(client.send(&payload(), "order-review").await);
        assert_eq!(response.identifier(), "mock-id-1");
        assert_eq!(response.get("message"), Some(&json!("Mock response")));
    }

    #[tokio::test]
    async fn test_sent_assertions() {
        let client = MockWorkflowClient::new();
        client.send(&payload(), "order-review").await.unwrap();
        client
            .send_with_mode(&payload(), "order-review", CommunicationMode::Sync)
            .await
            .unwrap();

        assert_ok!(client.assert_sent("order-review"));
        assert_ok!(client.assert_not_sent("refund"));
        assert_ok!(client.assert_sent_times("order-review", 2));
        assert_ok!(client.assert_sent_where(|call| call.mode == CommunicationMode::Sync));
        assert_ok!(client.assert_not_sent_where(|call| call.mode == CommunicationMode::Async));

        assert_eq!(
            client.assert_sent("refund"),
            Err(AssertionFailure::NotSent {
                workflow_id: "refund".to_string()
            })
        );
        assert_eq!(
            client.assert_not_sent("order-review"),
            Err(AssertionFailure::UnexpectedCall {
                workflow_id: "order-review".to_string(),
                actual: 2
            })
        );
        assert!(client
            .assert_sent_where(|call| call.workflow_id == "refund")
            .is_err());
        assert!(client
            .assert_not_sent_where(|call| call.mode == CommunicationMode::FireAndForget)
            .is_err());
    }

    #[tokio::test]
    async fn test_count_mismatch_reports_expected_and_actual() {
        let client = MockWorkflowClient::new();
        client.send(&payload(), "order-review").await.unwrap();

        let failure = client.assert_sent_times("order-review", 3).unwrap_err();

        assert_eq!(
            failure.to_string(),
            "Expected 3 calls to workflow order-review, but 1 were made"
        );
    }

    #[tokio::test]
    async fn test_payload_contains_matches_partially() {
        let client = MockWorkflowClient::new();
        client.send(&payload(), "order-review").await.unwrap();

        assert_ok!(client.assert_payload_contains("order-review", &json!({"priority": "high"})));
        assert_ok!(client.assert_payload_contains("order-review", &json!({"order": {"id": 7}})));

        assert!(client
            .assert_payload_contains("order-review", &json!({"order": {"id": 8}}))
            .is_err());
        assert!(client
            .assert_payload_contains("refund", &json!({"priority": "high"}))
            .is_err());
    }
}
