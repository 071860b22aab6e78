//! Room identity for a collaboration session.
//!
//! A session either adopts the token carried in a shared link fragment
//! (`#?collaboration=<token>`) or generates a fresh one that has to be handed
//! to collaborators out-of-band.

use uuid::Uuid;

/// Marker looked up in the link fragment.
pub const FRAGMENT_MARKER: &str = "collaboration=";

/// Length of generated room tokens.
pub const TOKEN_LEN: usize = 6;

/// Immutable room identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Session {
    token: String,
}

impl Session {
    /// Resolve the room token from a URL fragment, generating one when the
    /// fragment is absent or carries no token.
    pub fn from_fragment(fragment: Option<&str>) -> Self {
        match fragment.and_then(token_from_fragment) {
            Some(token) => {
                log::debug!("Joining existing room {token}");
                Self {
                    token: token.to_string(),
                }
            }
            None => Self::generate(),
        }
    }

    /// Start a fresh room with a random token.
    pub fn generate() -> Self {
        Self {
            token: random_token(),
        }
    }

    /// Use `token` verbatim.
    pub fn with_token(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
        }
    }

    pub fn token(&self) -> &str {
        &self.token
    }

    /// Transport-level room name.
    pub fn room_name(&self, prefix: &str) -> String {
        format!("{prefix}{}", self.token)
    }

    /// Link a collaborator can open to join this room.
    pub fn share_link(&self, base_url: &str) -> String {
        format!("{base_url}#?{FRAGMENT_MARKER}{}", self.token)
    }
}

/// Extract the token from a fragment such as `#?collaboration=abc&x=1`.
pub fn token_from_fragment(fragment: &str) -> Option<&str> {
    let fragment = fragment.trim_start_matches('#');
    let start = fragment.find(FRAGMENT_MARKER)? + FRAGMENT_MARKER.len();
    let token = fragment[start..].split('&').next().unwrap_or_default();
    (!token.is_empty()).then_some(token)
}

fn random_token() -> String {
    let mut bits = Uuid::new_v4().as_u128();
    (0..TOKEN_LEN)
        .map(|_| {
            let digit = (bits % 36) as u32;
            bits /= 36;
            char::from_digit(digit, 36).unwrap_or('0')
        })
        .collect()
}
