use nostr_sdk::nips::nip04;
use nostr_sdk::{Event, Keys, Kind, PublicKey};
use tracing::debug;

use crate::profile::Profile;

/// A rendered desktop notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub summary: String,
    pub body: String,
}

/// Shown instead of a DM body whenever decryption is unavailable or fails.
/// Raw ciphertext is never surfaced.
const DM_PLACEHOLDER: &str = "*encrypted*";

fn kind_label(kind: Kind) -> String {
    let label = match kind {
        Kind::TextNote => "text",
        Kind::ChannelMessage => "chat",
        Kind::ContactList => "follow",
        Kind::EncryptedDirectMessage => "dm",
        Kind::Repost => "share",
        Kind::Reaction => "reaction",
        other => return other.as_u16().to_string(),
    };
    label.to_string()
}

/// `first8:last8` of the hex key, for authors with no usable profile.
fn format_pubkey(pubkey: &PublicKey) -> String {
    let hex = pubkey.to_hex();
    format!("{}:{}", &hex[..8], &hex[56..])
}

fn format_name(pubkey: &PublicKey, profile: Option<&Profile>) -> String {
    let Some(profile) = profile else {
        return format_pubkey(pubkey);
    };
    match (&profile.display_name, &profile.name) {
        (Some(display_name), Some(name)) => format!("{display_name} @{name}"),
        (Some(display_name), None) => display_name.clone(),
        (None, Some(name)) => format!("@{name}"),
        (None, None) => format_pubkey(pubkey),
    }
}

fn format_dm_content(event: &Event, keys: Option<&Keys>) -> String {
    let Some(keys) = keys else {
        return DM_PLACEHOLDER.to_string();
    };
    match nip04::decrypt(keys.secret_key(), &event.pubkey, &event.content) {
        Ok(plaintext) => plaintext,
        Err(err) => {
            debug!(id = %event.id, error = %err, "could not decrypt dm");
            DM_PLACEHOLDER.to_string()
        }
    }
}

/// Render `event` into notification content. Pure aside from the injected
/// decryption capability.
pub fn format_message(
    event: &Event,
    profile: Option<&Profile>,
    keys: Option<&Keys>,
) -> Notification {
    let name = format_name(&event.pubkey, profile);

    if event.kind == Kind::ContactList {
        return Notification {
            summary: "New Follower".to_string(),
            body: format!("{name} followed you on nostr"),
        };
    }

    let body = if event.kind == Kind::EncryptedDirectMessage {
        format_dm_content(event, keys)
    } else {
        event.content.clone()
    };

    Notification {
        summary: format!("nostr {} from {}", kind_label(event.kind), name),
        body,
    }
}

#[cfg(test)]
mod tests {
    use nostr_sdk::EventBuilder;

    use super::*;

    fn profile(display_name: Option<&str>, name: Option<&str>) -> Profile {
        Profile {
            display_name: display_name.map(str::to_string),
            name: name.map(str::to_string),
            picture: None,
        }
    }

    fn text_note(keys: &Keys, content: &str) -> Event {
        EventBuilder::text_note(content).sign_with_keys(keys).unwrap()
    }

    #[test]
    fn display_name_prefers_both_fields() {
        let pubkey = Keys::generate().public_key();
        assert_eq!(
            format_name(&pubkey, Some(&profile(Some("Alice"), Some("alice")))),
            "Alice @alice"
        );
        assert_eq!(
            format_name(&pubkey, Some(&profile(Some("Alice"), None))),
            "Alice"
        );
        assert_eq!(
            format_name(&pubkey, Some(&profile(None, Some("alice")))),
            "@alice"
        );
    }

    #[test]
    fn missing_profile_renders_the_truncated_key() {
        let pubkey = Keys::generate().public_key();
        let hex = pubkey.to_hex();
        let expected = format!("{}:{}", &hex[..8], &hex[56..]);
        assert_eq!(format_name(&pubkey, None), expected);
        // The empty shell left by an unparseable payload renders the same.
        assert_eq!(format_name(&pubkey, Some(&Profile::default())), expected);
    }

    #[test]
    fn text_notes_carry_content_verbatim() {
        let keys = Keys::generate();
        let event = text_note(&keys, "gm <b>world</b>");
        let message = format_message(&event, Some(&profile(Some("Alice"), Some("alice"))), None);
        assert_eq!(message.summary, "nostr text from Alice @alice");
        assert_eq!(message.body, "gm <b>world</b>");
    }

    #[test]
    fn follows_get_the_fixed_message() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::ContactList, "ignored")
            .sign_with_keys(&keys)
            .unwrap();
        let message = format_message(&event, Some(&profile(None, Some("bob"))), None);
        assert_eq!(message.summary, "New Follower");
        assert_eq!(message.body, "@bob followed you on nostr");
    }

    #[test]
    fn unmapped_kinds_render_the_number() {
        let keys = Keys::generate();
        let event = EventBuilder::new(Kind::Custom(30023), "long form")
            .sign_with_keys(&keys)
            .unwrap();
        let message = format_message(&event, None, None);
        assert!(message.summary.starts_with("nostr 30023 from "));
    }

    #[test]
    fn dm_decrypts_with_the_right_keys() {
        let sender = Keys::generate();
        let receiver = Keys::generate();
        let ciphertext =
            nip04::encrypt(sender.secret_key(), &receiver.public_key(), "the secret").unwrap();
        let event = EventBuilder::new(Kind::EncryptedDirectMessage, ciphertext)
            .sign_with_keys(&sender)
            .unwrap();

        let message = format_message(&event, None, Some(&receiver));
        assert_eq!(message.body, "the secret");
        assert!(message.summary.starts_with("nostr dm from "));
    }

    #[test]
    fn dm_without_keys_never_leaks_ciphertext() {
        let sender = Keys::generate();
        let receiver = Keys::generate();
        let ciphertext =
            nip04::encrypt(sender.secret_key(), &receiver.public_key(), "the secret").unwrap();
        let event = EventBuilder::new(Kind::EncryptedDirectMessage, ciphertext)
            .sign_with_keys(&sender)
            .unwrap();

        let message = format_message(&event, None, None);
        assert_eq!(message.body, "*encrypted*");
    }
}
