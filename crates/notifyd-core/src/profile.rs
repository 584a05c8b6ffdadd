use std::cell::RefCell;
use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::rc::Rc;

use nostr_sdk::{Event, Filter, Kind, PublicKey};
use serde::Deserialize;
use tracing::{info, warn};

use crate::avatar::AvatarCache;
use crate::correlate::{WaitOutcome, Waiters};
use crate::transport::Subscriber;

/// Correlation-id namespace for profile requests.
pub const PROFILE_SUB_PREFIX: &str = "profile-";

/// Correlation id for a profile request: `profile-<hex-pubkey>`.
pub fn profile_sub_id(author: &PublicKey) -> String {
    format!("{PROFILE_SUB_PREFIX}{}", author.to_hex())
}

/// Profile metadata payload carried in the content of a kind:0 event.
/// Everything is optional; unknown fields are ignored.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Profile {
    pub display_name: Option<String>,
    pub name: Option<String>,
    pub picture: Option<String>,
}

pub struct StoredProfile {
    pub event: Event,
    pub profile: Profile,
}

impl StoredProfile {
    fn parse(event: Event) -> Self {
        let profile = serde_json::from_str(&event.content).unwrap_or_else(|err| {
            info!(author = %event.pubkey, error = %err, "unparseable profile content");
            Profile::default()
        });
        Self { event, profile }
    }
}

/// Newest-wins cache of profile metadata events, keyed by author. Grows for
/// the process lifetime; there is no eviction.
#[derive(Default)]
pub struct ProfileStore {
    entries: HashMap<PublicKey, StoredProfile>,
}

impl ProfileStore {
    pub fn get(&self, author: &PublicKey) -> Option<&StoredProfile> {
        self.entries.get(author)
    }

    /// Record a metadata event, keeping only the newest per author.
    /// Returns the entry now cached for the event's author.
    pub fn record(&mut self, event: Event) -> &StoredProfile {
        match self.entries.entry(event.pubkey) {
            Entry::Occupied(mut slot) => {
                if event.created_at > slot.get().event.created_at {
                    slot.insert(StoredProfile::parse(event));
                }
                slot.into_mut()
            }
            Entry::Vacant(slot) => slot.insert(StoredProfile::parse(event)),
        }
    }
}

/// Turns an identity key into a profile, asking the relays when the cache
/// has no answer and populating the avatar cache as a side effect.
pub struct ProfileResolver {
    store: Rc<RefCell<ProfileStore>>,
    waiters: Rc<Waiters>,
    transport: Rc<dyn Subscriber>,
    avatars: Rc<AvatarCache>,
}

impl ProfileResolver {
    pub fn new(
        store: Rc<RefCell<ProfileStore>>,
        waiters: Rc<Waiters>,
        transport: Rc<dyn Subscriber>,
        avatars: Rc<AvatarCache>,
    ) -> Self {
        Self {
            store,
            waiters,
            transport,
            avatars,
        }
    }

    /// Resolve the profile for `author`. Returns `None` when nothing is
    /// cached and nothing arrived before the deadline; an unparseable
    /// payload resolves to the empty profile shell.
    pub async fn resolve(&self, author: PublicKey) -> Option<Profile> {
        if let Some(entry) = self.store.borrow().get(&author) {
            return Some(entry.profile.clone());
        }

        let subid = profile_sub_id(&author);
        let filter = Filter::new().kind(Kind::Metadata).author(author).limit(1);
        if let Err(err) = self.transport.subscribe(&subid, filter).await {
            warn!(author = %author, error = %err, "profile subscription failed");
            return None;
        }

        let outcome = self.waiters.await_answer(&subid).await;
        // Release the relay-side subscription whether or not an answer came.
        self.transport.unsubscribe(&subid).await;

        let event = match outcome {
            WaitOutcome::Answered(event) => event,
            WaitOutcome::TimedOut => {
                info!(author = %author, "timed out resolving profile");
                return None;
            }
        };

        let profile = {
            let mut store = self.store.borrow_mut();
            store.record(event).profile.clone()
        };

        if let Some(url) = &profile.picture {
            if let Err(err) = self.avatars.resolve(&author, url).await {
                warn!(author = %author, "could not cache avatar: {err:#}");
            }
        }

        Some(profile)
    }
}

#[cfg(test)]
mod tests {
    use nostr_sdk::{EventBuilder, Keys, Timestamp};
    use tempfile::TempDir;

    use super::*;
    use crate::transport::testing::FakeTransport;

    fn metadata_event(keys: &Keys, created_at: u64, content: &str) -> Event {
        EventBuilder::new(Kind::Metadata, content)
            .custom_created_at(Timestamp::from(created_at))
            .sign_with_keys(keys)
            .unwrap()
    }

    #[test]
    fn newest_profile_wins_regardless_of_arrival_order() {
        let keys = Keys::generate();
        let older = metadata_event(&keys, 10, r#"{"name":"old"}"#);
        let newer = metadata_event(&keys, 20, r#"{"name":"new"}"#);

        let mut store = ProfileStore::default();
        store.record(newer.clone());
        store.record(older.clone());
        let entry = store.get(&keys.public_key()).unwrap();
        assert_eq!(entry.profile.name.as_deref(), Some("new"));

        let mut store = ProfileStore::default();
        store.record(older);
        store.record(newer);
        let entry = store.get(&keys.public_key()).unwrap();
        assert_eq!(entry.profile.name.as_deref(), Some("new"));
    }

    #[test]
    fn unparseable_content_becomes_the_empty_shell() {
        let keys = Keys::generate();
        let mut store = ProfileStore::default();
        let entry = store.record(metadata_event(&keys, 10, "definitely not json"));
        assert_eq!(entry.profile, Profile::default());
    }

    #[tokio::test]
    async fn cache_hit_skips_the_network() {
        let keys = Keys::generate();
        let tmp = TempDir::new().unwrap();
        let store = Rc::new(RefCell::new(ProfileStore::default()));
        store
            .borrow_mut()
            .record(metadata_event(&keys, 10, r#"{"name":"alice"}"#));

        let transport = Rc::new(FakeTransport::default());
        let resolver = ProfileResolver::new(
            store,
            Rc::new(Waiters::new(std::time::Duration::from_millis(1000))),
            transport.clone(),
            Rc::new(AvatarCache::new(tmp.path().to_path_buf())),
        );

        let profile = resolver.resolve(keys.public_key()).await.unwrap();
        assert_eq!(profile.name.as_deref(), Some("alice"));
        assert!(transport.subscribed.borrow().is_empty());
    }
}
