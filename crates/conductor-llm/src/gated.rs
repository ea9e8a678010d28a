use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::info;

use conductor_core::error::Result;
use conductor_core::event::EventBus;
use conductor_core::traits::LlmClient;
use conductor_core::types::*;

use crate::rate_gate::RateGate;
use crate::tokens::estimate_request_tokens;

/// An LLM client that admits every request through a [`RateGate`] first.
///
/// Requests are keyed by model id. Once the backend reports usage, the
/// admitted estimate is replaced with the real token count.
pub struct GatedClient {
    inner: Box<dyn LlmClient>,
    gate: Arc<RateGate>,
    event_bus: Option<Arc<EventBus>>,
}

impl GatedClient {
    pub fn new(inner: Box<dyn LlmClient>, gate: Arc<RateGate>) -> Self {
        Self {
            inner,
            gate,
            event_bus: None,
        }
    }

    /// Publish `RateLimited` events whenever a request had to wait.
    pub fn with_event_bus(mut self, event_bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn gate(&self) -> &Arc<RateGate> {
        &self.gate
    }
}

impl LlmClient for GatedClient {
    fn chat(&self, request: LlmRequest) -> BoxFuture<'_, Result<LlmResponse>> {
        Box::pin(async move {
            let key = request.model.clone();
            let admission = self.gate.acquire(&key, estimate_request_tokens(&request)).await;

            if !admission.waited.is_zero() {
                let wait_ms = admission.waited.as_millis() as u64;
                info!(
                    key = %key,
                    wait_ms,
                    checks = admission.checks,
                    "LLM request admitted after rate gate wait"
                );
                if let Some(ref bus) = self.event_bus {
                    bus.publish(AgentEvent::RateLimited { key, wait_ms });
                }
            }

            let response = self.inner.chat(request).await?;
            if let Some(usage) = response.usage {
                self.gate.record_usage(&admission, usage.total());
            }
            Ok(response)
        })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::scripted::ScriptedClient;
    use conductor_core::config::RateGateConfig;
    use conductor_core::error::ConductorError;

    fn request(model: &str) -> LlmRequest {
        LlmRequest {
            model: model.into(),
            messages: vec![ChatMessage::user("hello")],
            ..Default::default()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn records_reported_usage() {
        let gate = Arc::new(RateGate::new(RateGateConfig::default()));
        let mut reply = LlmResponse::text("hi");
        reply.usage = Some(Usage {
            input_tokens: 40,
            output_tokens: 2,
        });
        let client = GatedClient::new(Box::new(ScriptedClient::new(vec![reply])), gate.clone());

        let response = client.chat(request("m")).await.unwrap();
        assert_eq!(response.content, "hi");
        assert_eq!(gate.queue_state("m").tokens_in_window, 42);
    }

    #[tokio::test(start_paused = true)]
    async fn publishes_rate_limited_after_wait() {
        let gate = Arc::new(RateGate::new(RateGateConfig {
            requests_per_minute: 1,
            ..Default::default()
        }));
        let bus = Arc::new(EventBus::default());
        let mut rx = bus.subscribe();
        let client = GatedClient::new(
            Box::new(ScriptedClient::new(vec![
                LlmResponse::text("one"),
                LlmResponse::text("two"),
            ])),
            gate,
        )
        .with_event_bus(bus);

        client.chat(request("m")).await.unwrap();
        let second = client.chat(request("m")).await.unwrap();
        assert_eq!(second.content, "two");

        match rx.try_recv() {
            Ok(AgentEvent::RateLimited { key, wait_ms }) => {
                assert_eq!(key, "m");
                assert!(wait_ms >= Duration::from_secs(60).as_millis() as u64);
            }
            other => panic!("expected RateLimited, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn inner_errors_propagate_unmodified() {
        let gate = Arc::new(RateGate::new(RateGateConfig::default()));
        let client = GatedClient::new(Box::new(ScriptedClient::new(vec![])), gate);
        let err = client.chat(request("m")).await.unwrap_err();
        assert!(matches!(err, ConductorError::LlmRequest(_)));
    }
}
