use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use log::debug;
use time::{Duration, OffsetDateTime};

use crate::{
    model::{Identity, UserId},
    util,
};

struct Entry {
    identity: Identity,
    expires_at: OffsetDateTime,
}

/// Token to identity bindings with a fixed lifetime from creation.
pub struct SessionAuthority {
    ttl: Duration,
    sessions: Mutex<HashMap<String, Entry>>,
}

impl SessionAuthority {
    pub fn new(ttl: Duration) -> Self {
        SessionAuthority {
            ttl,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn create(&self, user_id: UserId, username: &str) -> String {
        self.create_at(user_id, username, OffsetDateTime::now_utc())
    }

    fn create_at(&self, user_id: UserId, username: &str, now: OffsetDateTime) -> String {
        let token = util::generate_token();
        let mut sessions = self.lock();

        let before = sessions.len();
        sessions.retain(|_, x| x.expires_at > now);
        if sessions.len() != before {
            debug!("pruned {} expired sessions", before - sessions.len());
        }

        sessions.insert(
            token.clone(),
            Entry {
                identity: Identity {
                    user_id,
                    username: username.to_owned(),
                },
                expires_at: now + self.ttl,
            },
        );

        token
    }

    pub fn validate(&self, token: &str) -> Option<Identity> {
        self.validate_at(token, OffsetDateTime::now_utc())
    }

    fn validate_at(&self, token: &str, now: OffsetDateTime) -> Option<Identity> {
        let mut sessions = self.lock();

        match sessions.get(token) {
            Some(x) if x.expires_at > now => return Some(x.identity.clone()),
            Some(_) => {}
            None => return None,
        }

        sessions.remove(token);
        None
    }

    /// Removing an unknown token is a no-op.
    pub fn destroy(&self, token: &str) {
        self.lock().remove(token);
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Entry>> {
        // entries stay consistent even if a holder panicked
        self.sessions.lock().unwrap_or_else(|x| x.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn alice() -> Identity {
        Identity {
            user_id: 1,
            username: "alice".into(),
        }
    }

    #[test]
    fn token_validates_until_destroyed() {
        let sessions = SessionAuthority::new(Duration::hours(24));

        let token = sessions.create(1, "alice");

        assert_eq!(sessions.validate(&token), Some(alice()));
        assert_eq!(sessions.validate(&token), Some(alice()));

        sessions.destroy(&token);

        assert_eq!(sessions.validate(&token), None);
    }

    #[test]
    fn destroy_is_idempotent() {
        let sessions = SessionAuthority::new(Duration::hours(24));

        sessions.destroy("never-issued");

        let token = sessions.create(1, "alice");
        sessions.destroy(&token);
        sessions.destroy(&token);

        assert_eq!(sessions.validate(&token), None);
    }

    #[test]
    fn token_expires_after_ttl() {
        let sessions = SessionAuthority::new(Duration::hours(24));
        let start = OffsetDateTime::now_utc();

        let token = sessions.create_at(1, "alice", start);

        assert_eq!(
            sessions.validate_at(&token, start + Duration::hours(23)),
            Some(alice())
        );
        assert_eq!(sessions.validate_at(&token, start + Duration::hours(24)), None);
        // expired entry was dropped
        assert_eq!(sessions.len(), 0);
    }

    #[test]
    fn unknown_token_is_not_authenticated() {
        let sessions = SessionAuthority::new(Duration::hours(24));

        sessions.create(1, "alice");

        assert_eq!(sessions.validate(""), None);
        assert_eq!(sessions.validate("forged"), None);
    }

    #[test]
    fn create_prunes_expired_sessions() {
        let sessions = SessionAuthority::new(Duration::minutes(5));
        let start = OffsetDateTime::now_utc();

        sessions.create_at(1, "alice", start);
        sessions.create_at(2, "bob", start);
        assert_eq!(sessions.len(), 2);

        let fresh = sessions.create_at(3, "carol", start + Duration::minutes(10));

        assert_eq!(sessions.len(), 1);
        assert_eq!(
            sessions
                .validate_at(&fresh, start + Duration::minutes(11))
                .map(|x| x.username),
            Some("carol".into())
        );
    }

    #[test]
    fn each_login_gets_its_own_token() {
        let sessions = SessionAuthority::new(Duration::hours(1));

        let first = sessions.create(1, "alice");
        let second = sessions.create(1, "alice");

        assert_ne!(first, second);

        sessions.destroy(&first);

        assert_eq!(sessions.validate(&second), Some(alice()));
    }
}
