use std::cell::RefCell;
use std::collections::HashSet;
use std::rc::Rc;

use nostr_sdk::{Event, EventId, Keys, Kind, PublicKey};
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

use crate::avatar::AvatarCache;
use crate::correlate::Waiters;
use crate::format::format_message;
use crate::notify::NotificationSink;
use crate::profile::{ProfileResolver, ProfileStore, PROFILE_SUB_PREFIX};
use crate::transport::Incoming;

/// Subscription id of the operator's own notification stream.
pub const NOTIFICATIONS_SUB_ID: &str = "notifs";

struct Inner {
    seen: RefCell<HashSet<EventId>>,
    /// Actors that already triggered a follower notification. Kept apart
    /// from `seen` so follow dedup cannot interfere with id dedup.
    follow_actors: RefCell<HashSet<PublicKey>>,
    profiles: Rc<RefCell<ProfileStore>>,
    waiters: Rc<Waiters>,
    resolver: ProfileResolver,
    avatars: Rc<AvatarCache>,
    sink: Rc<dyn NotificationSink>,
    keys: Option<Keys>,
}

/// Top-level event handler: deduplicates transport deliveries and routes
/// them to the notification path or the profile-answer path. All state is
/// single-threaded; clones share one context.
#[derive(Clone)]
pub struct Dispatcher {
    inner: Rc<Inner>,
}

impl Dispatcher {
    pub fn new(
        profiles: Rc<RefCell<ProfileStore>>,
        waiters: Rc<Waiters>,
        resolver: ProfileResolver,
        avatars: Rc<AvatarCache>,
        sink: Rc<dyn NotificationSink>,
        keys: Option<Keys>,
    ) -> Self {
        Self {
            inner: Rc::new(Inner {
                seen: RefCell::new(HashSet::new()),
                follow_actors: RefCell::new(HashSet::new()),
                profiles,
                waiters,
                resolver,
                avatars,
                sink,
                keys,
            }),
        }
    }

    /// Consume transport deliveries until the channel closes. Must run
    /// inside a `LocalSet`; the notification path is spawned locally so a
    /// profile wait suspends only its own flow.
    pub async fn run(&self, mut events: mpsc::Receiver<Incoming>) {
        while let Some(incoming) = events.recv().await {
            self.dispatch(incoming);
        }
    }

    /// Process a single delivery.
    pub fn dispatch(&self, incoming: Incoming) {
        let Incoming {
            relay_url,
            subscription_id,
            event,
        } = incoming;

        if self.inner.seen.borrow().contains(&event.id) {
            trace!(id = %event.id, "duplicate event dropped");
            return;
        }
        if event.kind == Kind::ContactList
            && !self.inner.follow_actors.borrow_mut().insert(event.pubkey)
        {
            debug!(actor = %event.pubkey, "repeat follow dropped");
            return;
        }
        self.inner.seen.borrow_mut().insert(event.id);

        let subid = subscription_id.to_string();
        if subid == NOTIFICATIONS_SUB_ID {
            debug!(id = %event.id, kind = %event.kind, relay = %relay_url, "notification event");
            let dispatcher = self.clone();
            tokio::task::spawn_local(async move {
                dispatcher.notify_for_event(*event).await;
            });
        } else if subid.starts_with(PROFILE_SUB_PREFIX) {
            self.accept_profile_answer(&subid, *event);
        } else {
            debug!(subscription = %subid, id = %event.id, "event on unhandled subscription");
        }
    }

    /// A profile-request answer: fold it into the store, then wake the
    /// waiter with the newest metadata known for that author.
    fn accept_profile_answer(&self, subid: &str, event: Event) {
        let newest = {
            let mut profiles = self.inner.profiles.borrow_mut();
            profiles.record(event).event.clone()
        };
        self.inner.waiters.deliver(subid, newest);
    }

    async fn notify_for_event(&self, event: Event) {
        let profile = self.inner.resolver.resolve(event.pubkey).await;
        let message = format_message(&event, profile.as_ref(), self.inner.keys.as_ref());
        let icon = self.inner.avatars.lookup(&event.pubkey);
        if let Err(err) = self.inner.sink.notify(&message, icon.as_deref()).await {
            warn!(error = %err, "failed to emit notification");
        }
    }
}
