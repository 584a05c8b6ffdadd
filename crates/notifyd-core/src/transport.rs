use anyhow::Result;
use async_trait::async_trait;
use nostr_sdk::{Client, Event, Filter, RelayPoolNotification, RelayUrl, SubscriptionId};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::mpsc;
use tracing::{info, warn};

/// An event as delivered by the relay pool.
#[derive(Debug)]
pub struct Incoming {
    pub relay_url: RelayUrl,
    pub subscription_id: SubscriptionId,
    pub event: Box<Event>,
}

/// The slice of the pub/sub transport the pipeline needs: open and close
/// subscriptions keyed by correlation id. Answers do not come back through
/// this trait; they arrive on the shared event stream like everything else.
#[async_trait(?Send)]
pub trait Subscriber {
    async fn subscribe(&self, id: &str, filter: Filter) -> Result<()>;
    async fn unsubscribe(&self, id: &str);
}

/// Production transport backed by the `nostr-sdk` relay pool client.
pub struct RelayTransport {
    client: Client,
}

impl RelayTransport {
    pub fn new(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait(?Send)]
impl Subscriber for RelayTransport {
    async fn subscribe(&self, id: &str, filter: Filter) -> Result<()> {
        self.client
            .subscribe_with_id(SubscriptionId::new(id), filter, None)
            .await?;
        Ok(())
    }

    async fn unsubscribe(&self, id: &str) {
        let _ = self.client.unsubscribe(&SubscriptionId::new(id)).await;
    }
}

/// Forward relay pool events into the dispatcher's queue. Returns when the
/// pool shuts down or the dispatcher goes away.
pub async fn pump_events(client: Client, queue: mpsc::Sender<Incoming>) {
    let mut notifications = client.notifications();
    loop {
        match notifications.recv().await {
            Ok(RelayPoolNotification::Event {
                relay_url,
                subscription_id,
                event,
            }) => {
                let incoming = Incoming {
                    relay_url,
                    subscription_id,
                    event,
                };
                if queue.send(incoming).await.is_err() {
                    break;
                }
            }
            Ok(RelayPoolNotification::Shutdown) => {
                info!("relay pool shut down");
                break;
            }
            Ok(_) => {}
            Err(RecvError::Closed) => break,
            Err(RecvError::Lagged(missed)) => {
                warn!(missed, "notification stream lagged");
            }
        }
    }
}
