use chrono::{DateTime, Utc};
use rusqlite::{OptionalExtension, Row, params};
use serde::Serialize;

use super::{Store, StoreError};

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    pub id: i64,
    pub username: String,
    pub display_name: String,
    pub inquiry_number: String,
    pub is_admin: bool,
    pub login_count: i64,
    pub last_login: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

pub struct NewUser<'a> {
    pub username: &'a str,
    pub display_name: &'a str,
    pub inquiry_number: &'a str,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeKind {
    Registration,
    Authentication,
}

impl ChallengeKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ChallengeKind::Registration => "registration",
            ChallengeKind::Authentication => "authentication",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredChallenge {
    pub id: i64,
    pub user_id: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredCredential {
    pub id: i64,
    pub user_id: i64,
    pub credential_id: String,
    pub use_count: i64,
}

const USER_COLUMNS: &str = "id, username, display_name, inquiry_number, is_admin, login_count, last_login, created_at";

fn user_from_row(row: &Row<'_>) -> rusqlite::Result<User> {
    Ok(User {
        id: row.get(0)?,
        username: row.get(1)?,
        display_name: row.get(2)?,
        inquiry_number: row.get(3)?,
        is_admin: row.get(4)?,
        login_count: row.get(5)?,
        last_login: row.get(6)?,
        created_at: row.get(7)?,
    })
}

impl Store {
    pub fn create_user(&self, new: &NewUser<'_>, now: DateTime<Utc>) -> Result<User, StoreError> {
        let conn = self.conn()?;
        let taken: Option<i64> = conn
            .query_row(
                "SELECT id FROM users WHERE username = ?1 OR display_name = ?2 OR inquiry_number = ?3",
                params![new.username, new.display_name, new.inquiry_number],
                |row| row.get(0),
            )
            .optional()?;
        if taken.is_some() {
            return Err(StoreError::Conflict(
                "user id, display name or inquiry number is already registered".to_string(),
            ));
        }
        conn.execute(
            "INSERT INTO users (username, display_name, inquiry_number, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![new.username, new.display_name, new.inquiry_number, now],
        )?;
        let id = conn.last_insert_rowid();
        Ok(User {
            id,
            username: new.username.to_string(),
            display_name: new.display_name.to_string(),
            inquiry_number: new.inquiry_number.to_string(),
            is_admin: false,
            login_count: 0,
            last_login: None,
            created_at: now,
        })
    }

    pub fn user_by_id(&self, id: i64) -> Result<Option<User>, StoreError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!("SELECT {USER_COLUMNS} FROM users WHERE id = ?1"),
                params![id],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    /// Looks a user up by numeric id first, then by username or display name.
    pub fn find_user_by_login(&self, login: &str) -> Result<Option<User>, StoreError> {
        if let Ok(id) = login.parse::<i64>()
            && let Some(user) = self.user_by_id(id)?
        {
            return Ok(Some(user));
        }
        let conn = self.conn()?;
        let user = conn
            .query_row(
                &format!(
                    "SELECT {USER_COLUMNS} FROM users WHERE username = ?1 OR display_name = ?1 ORDER BY id LIMIT 1"
                ),
                params![login],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn set_admin(&self, user_id: i64, is_admin: bool) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let changed = conn.execute(
            "UPDATE users SET is_admin = ?2 WHERE id = ?1",
            params![user_id, is_admin],
        )?;
        Ok(changed > 0)
    }

    pub fn touch_login(&self, user_id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE users SET login_count = login_count + 1, last_login = ?2 WHERE id = ?1",
            params![user_id, now],
        )?;
        Ok(())
    }

    pub fn create_session(
        &self,
        user_id: i64,
        token_hash: &str,
        expires_at: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO user_sessions (user_id, token_hash, expires_at, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, token_hash, expires_at, now],
        )?;
        Ok(())
    }

    /// The owner of an unexpired session.
    pub fn session_user(
        &self,
        token_hash: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<User>, StoreError> {
        let conn = self.conn()?;
        let user = conn
            .query_row(
                "SELECT u.id, u.username, u.display_name, u.inquiry_number, u.is_admin, u.login_count, u.last_login, u.created_at
                 FROM user_sessions s JOIN users u ON u.id = s.user_id
                 WHERE s.token_hash = ?1 AND s.expires_at > ?2",
                params![token_hash, now],
                user_from_row,
            )
            .optional()?;
        Ok(user)
    }

    pub fn delete_session(&self, token_hash: &str) -> Result<bool, StoreError> {
        let conn = self.conn()?;
        let removed = conn.execute(
            "DELETE FROM user_sessions WHERE token_hash = ?1",
            params![token_hash],
        )?;
        Ok(removed > 0)
    }

    pub fn purge_expired(&self, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn()?;
        let sessions = conn.execute(
            "DELETE FROM user_sessions WHERE expires_at <= ?1",
            params![now],
        )?;
        let challenges = conn.execute(
            "DELETE FROM webauthn_challenges WHERE expires_at <= ?1 OR used = 1",
            params![now],
        )?;
        Ok(sessions + challenges)
    }

    pub fn insert_challenge(
        &self,
        challenge: &str,
        user_id: Option<i64>,
        kind: ChallengeKind,
        expires_at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO webauthn_challenges (challenge, user_id, operation, expires_at) VALUES (?1, ?2, ?3, ?4)",
            params![challenge, user_id, kind.as_str(), expires_at],
        )?;
        Ok(())
    }

    /// Marks a live challenge as used. With `user_id` set the challenge must
    /// have been issued to that user.
    pub fn consume_challenge(
        &self,
        challenge: &str,
        kind: ChallengeKind,
        user_id: Option<i64>,
        now: DateTime<Utc>,
    ) -> Result<Option<StoredChallenge>, StoreError> {
        let conn = self.conn()?;
        let found = conn
            .query_row(
                "SELECT id, user_id FROM webauthn_challenges
                 WHERE challenge = ?1 AND operation = ?2 AND used = 0 AND expires_at > ?3",
                params![challenge, kind.as_str(), now],
                |row| {
                    Ok(StoredChallenge {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                    })
                },
            )
            .optional()?;
        let Some(found) = found else {
            return Ok(None);
        };
        if user_id.is_some() && found.user_id != user_id {
            return Ok(None);
        }
        conn.execute(
            "UPDATE webauthn_challenges SET used = 1 WHERE id = ?1",
            params![found.id],
        )?;
        Ok(Some(found))
    }

    pub fn insert_credential(
        &self,
        user_id: i64,
        credential_id: &str,
        public_key: &str,
        now: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO webauthn_credentials (user_id, credential_id, public_key, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![user_id, credential_id, public_key, now],
        )?;
        Ok(())
    }

    pub fn credential_ids_for_user(&self, user_id: i64) -> Result<Vec<String>, StoreError> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT credential_id FROM webauthn_credentials WHERE user_id = ?1 ORDER BY id",
        )?;
        let ids = stmt
            .query_map(params![user_id], |row| row.get(0))?
            .collect::<Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    pub fn credential_by_id(
        &self,
        credential_id: &str,
    ) -> Result<Option<StoredCredential>, StoreError> {
        let conn = self.conn()?;
        let credential = conn
            .query_row(
                "SELECT id, user_id, credential_id, use_count FROM webauthn_credentials WHERE credential_id = ?1",
                params![credential_id],
                |row| {
                    Ok(StoredCredential {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        credential_id: row.get(2)?,
                        use_count: row.get(3)?,
                    })
                },
            )
            .optional()?;
        Ok(credential)
    }

    pub fn touch_credential(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let conn = self.conn()?;
        conn.execute(
            "UPDATE webauthn_credentials SET use_count = use_count + 1, last_used = ?2 WHERE id = ?1",
            params![id, now],
        )?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::tests::store_with_user;
    use chrono::Duration;

    #[test]
    fn duplicate_registration_conflicts() {
        let (store, _) = store_with_user();
        let err = store
            .create_user(
                &NewUser {
                    username: "other",
                    display_name: "Other",
                    inquiry_number: "123456",
                },
                Utc::now(),
            )
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
    }

    #[test]
    fn login_lookup_accepts_id_username_and_display_name() {
        let (store, user) = store_with_user();
        for login in [user.id.to_string(), "learner_1".into(), "Learner".into()] {
            let found = store.find_user_by_login(&login).unwrap().expect("found");
            assert_eq!(found.id, user.id);
        }
        assert!(store.find_user_by_login("nobody").unwrap().is_none());
    }

    #[test]
    fn sessions_expire() {
        let (store, user) = store_with_user();
        let now = Utc::now();
        store
            .create_session(user.id, "hash-a", now + Duration::hours(1), now)
            .unwrap();
        assert_eq!(
            store.session_user("hash-a", now).unwrap().map(|u| u.id),
            Some(user.id)
        );
        assert!(
            store
                .session_user("hash-a", now + Duration::hours(2))
                .unwrap()
                .is_none()
        );
        assert!(store.delete_session("hash-a").unwrap());
        assert!(!store.delete_session("hash-a").unwrap());
    }

    #[test]
    fn challenges_are_single_use_and_user_bound() {
        let (store, user) = store_with_user();
        let now = Utc::now();
        let expires = now + Duration::minutes(5);
        store
            .insert_challenge("c1", Some(user.id), ChallengeKind::Registration, expires)
            .unwrap();
        assert!(
            store
                .consume_challenge("c1", ChallengeKind::Registration, Some(user.id + 1), now)
                .unwrap()
                .is_none()
        );
        assert!(
            store
                .consume_challenge("c1", ChallengeKind::Authentication, None, now)
                .unwrap()
                .is_none()
        );
        let used = store
            .consume_challenge("c1", ChallengeKind::Registration, Some(user.id), now)
            .unwrap()
            .expect("challenge");
        assert_eq!(used.user_id, Some(user.id));
        assert!(
            store
                .consume_challenge("c1", ChallengeKind::Registration, Some(user.id), now)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn credential_use_is_counted() {
        let (store, user) = store_with_user();
        let now = Utc::now();
        store.insert_credential(user.id, "cred-1", "pk", now).unwrap();
        assert_eq!(store.credential_ids_for_user(user.id).unwrap(), vec!["cred-1"]);
        let cred = store.credential_by_id("cred-1").unwrap().expect("cred");
        store.touch_credential(cred.id, now).unwrap();
        assert_eq!(store.credential_by_id("cred-1").unwrap().unwrap().use_count, 1);
        assert!(matches!(
            store.insert_credential(user.id, "cred-1", "pk", now),
            Err(StoreError::Conflict(_))
        ));
    }
}
