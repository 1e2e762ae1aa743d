//! Workflow Dispatch Demo
//!
//! This example dispatches an order review to a workflow engine in each
//! communication mode and then simulates the engine's webhook callback.
//!
//! Configuration comes from `WORKFLOW_*` environment variables, e.g.
//! `WORKFLOW_BASE_URL=http://localhost:5678/webhook`. Without a running
//! engine the dispatches fail and the circuit breaker eventually opens,
//! which the demo reports as well.

use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use tracing_subscriber::EnvFilter;

use workflow_sdk::core::serialize_body;
use workflow_sdk::{
    DispatcherBuilder, Payload, RawReply, ResponseHandler, ResponseTarget, WebhookDelivery, WorkflowClient,
    WorkflowConfig,
};

#[derive(Debug, Serialize)]
struct OrderReview {
    order_id: u64,
    amount: f64,
    customer: String,
}

#[derive(Debug, Deserialize)]
struct ReviewDecision {
    status: String,
    #[serde(default)]
    message: String,
}

impl Payload for OrderReview {
    type Output = ReviewDecision;

    fn to_body(&self) -> workflow_sdk::Result<Map<String, Value>> {
        serialize_body(self)
    }

    fn response_target(&self) -> Option<ResponseTarget<ReviewDecision>> {
        Some(ResponseTarget::deserialize())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    println!("Workflow Dispatch Demo");
    println!("======================\n");

    let config = WorkflowConfig::from_env()?;
    println!("Engine: {}", config.base_url);

    let dispatcher = DispatcherBuilder::from_config(config)
        .timeout(Duration::from_secs(5))
        .callback_url("http://localhost:8080/hooks/workflow")
        .build()?;
    let _sweeper = dispatcher.tracker().spawn_sweeper(Duration::from_secs(60));

    let review = OrderReview {
        order_id: 1042,
        amount: 249.90,
        customer: "ACME Corp".to_string(),
    };

    println!("\nFIRE-AND-FORGET");
    match dispatcher.send(&review, "order-review").await {
        Ok(response) => println!("Accepted as {} (HTTP {})", response.identifier(), response.status_code()),
        Err(e) => println!("Dispatch failed: {}", e),
    }

    println!("\nSYNC");
    match dispatcher.send_sync(&review, "order-review", Duration::from_secs(3)).await {
        Ok(response) => match response.mapped() {
            Some(decision) => println!("Decision: {} {}", decision.status, decision.message),
            None => println!("Unmapped reply: {:?}", response.raw_reply()),
        },
        Err(e) => println!("Sync dispatch failed: {}", e),
    }

    println!("\nASYNC WITH CALLBACK");
    let handler: Arc<dyn ResponseHandler> = Arc::new(|reply: &RawReply, identifier: &str| {
        println!("Callback for {}: {}", identifier, Value::Object(reply.clone()));
    });

    match dispatcher.send_with_callback(&review, "order-review", handler).await {
        Ok(identifier) => {
            println!("Pending as {}", identifier);

            // the engine would POST this to the callback URL
            let body = json!({"request_id": identifier, "data": {"status": "approved"}});
            let outcome = dispatcher.webhook_receiver().deliver_json(&body.to_string());
            println!("Webhook outcome: {:?}", outcome);

            let unknown = dispatcher
                .webhook_receiver()
                .deliver(WebhookDelivery::new(identifier, RawReply::new()));
            println!("Repeated webhook outcome: {:?}", unknown);
        }
        Err(e) => println!("Async dispatch failed: {}", e),
    }

    println!("\nMETRICS");
    let mut metrics: Vec<_> = dispatcher.metrics().into_iter().collect();
    metrics.sort();
    for (key, value) in metrics {
        println!("  {:<18} {}", key, value);
    }

    Ok(())
}
