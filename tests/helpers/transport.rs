use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tether::commands::CommandEnvelope;
use tether::transport::{DeliveryReceipt, NotificationTransport, TransportError};

#[derive(Debug, Clone)]
pub enum Step {
    Accept,
    Fail(String),
    /// Accept, but only after a while
    Slow(Duration),
    /// Never answer; the dispatcher's own timeout has to cut it off
    Hang,
}

/// Fake push service that plays back a script, then accepts everything.
#[derive(Default)]
pub struct ScriptedTransport {
    script: Mutex<VecDeque<Step>>,
    deliveries: Mutex<Vec<(String, CommandEnvelope)>>,
}

impl ScriptedTransport {
    pub fn new(steps: impl IntoIterator<Item = Step>) -> Self {
        Self {
            script: Mutex::new(steps.into_iter().collect()),
            deliveries: Mutex::new(Vec::new()),
        }
    }

    pub fn accepting() -> Self {
        Self::default()
    }

    /// Every call, including failed ones, in order.
    pub fn deliveries(&self) -> Vec<(String, CommandEnvelope)> {
        self.deliveries.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationTransport for ScriptedTransport {
    async fn deliver(
        &self,
        push_address: &str,
        envelope: &CommandEnvelope,
    ) -> Result<DeliveryReceipt, TransportError> {
        self.deliveries
            .lock()
            .unwrap()
            .push((push_address.to_string(), envelope.clone()));

        let step = self.script.lock().unwrap().pop_front().unwrap_or(Step::Accept);
        match step {
            Step::Accept => Ok(DeliveryReceipt {
                message_id: Some(format!("msg-{}", envelope.command_id)),
            }),
            Step::Fail(reason) => Err(TransportError::Unavailable(reason)),
            Step::Slow(delay) => {
                tokio::time::sleep(delay).await;
                Ok(DeliveryReceipt {
                    message_id: Some(format!("msg-{}", envelope.command_id)),
                })
            }
            Step::Hang => {
                tokio::time::sleep(Duration::from_secs(3600)).await;
                Ok(DeliveryReceipt::default())
            }
        }
    }
}
