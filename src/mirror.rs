//! Local mirror of server-owned state.
//!
//! The default sled tree holds JSON blobs under string keys, mirroring the
//! movie list, the user record, and the auth token. Reads never fail: an
//! absent or unparseable value degrades to empty/`None`. Writes are single
//! synchronous inserts whose failures are swallowed so the in-memory view
//! stays usable for the current session.

use crate::bus::{Bus, Change};
use crate::model::{Movie, UserRecord};

pub(crate) const MOVIES: &[u8] = b"movies";
pub(crate) const USER: &[u8] = b"user";
pub(crate) const USER_DETAILS: &[u8] = b"userDetails";
pub(crate) const USER_DATA: &[u8] = b"userData";
pub(crate) const TOKEN: &[u8] = b"token";
pub(crate) const USER_ID: &[u8] = b"userId";

/// Read order for the user record. `user` is canonical; the other two are
/// legacy key names older writers used.
const USER_KEYS: [&[u8]; 3] = [USER, USER_DETAILS, USER_DATA];

#[derive(Clone)]
pub struct Mirror {
    db: sled::Db,
    bus: Bus,
}

impl Mirror {
    pub fn new(db: sled::Db, bus: Bus) -> Self {
        Self { db, bus }
    }

    pub fn load_movies(&self) -> Vec<Movie> {
        let raw = match self.db.get(MOVIES) {
            Ok(Some(raw)) => raw,
            Ok(None) => return Vec::new(),
            Err(err) => {
                log::debug!("movie mirror read failed: {}", err);
                return Vec::new();
            }
        };
        serde_json::from_slice(&raw).unwrap_or_else(|err| {
            log::debug!("movie mirror not parseable: {}", err);
            Vec::new()
        })
    }

    /// No-op when the stored bytes already match, so re-saving an unchanged
    /// list neither touches the database nor signals listeners. Without this,
    /// a page reloading on its own notification would loop forever.
    pub fn save_movies(&self, list: &[Movie]) {
        let raw = match serde_json::to_vec(list) {
            Ok(raw) => raw,
            Err(err) => {
                log::debug!("movie mirror serialize failed: {}", err);
                return;
            }
        };
        if self.unchanged(MOVIES, &raw) {
            return;
        }
        if let Err(err) = self.db.insert(MOVIES, raw) {
            log::debug!("movie mirror write failed: {}", err);
        }
        self.bus.notify(Change::Movies);
    }

    fn unchanged(&self, key: &[u8], raw: &[u8]) -> bool {
        self.db.get(key).ok().flatten().as_deref() == Some(raw)
    }

    /// A non-empty remote list fully replaces the mirror. An empty one keeps
    /// the existing mirror, so a transient empty response never wipes a good
    /// local cache.
    pub fn reconcile_from_remote(&self, remote: Vec<Movie>) -> Vec<Movie> {
        if remote.is_empty() {
            self.load_movies()
        } else {
            self.save_movies(&remote);
            remote
        }
    }

    /// Replace in place by identifier (same position), or insert at the front
    /// for a newly created record.
    pub fn upsert(&self, movie: Movie) -> Vec<Movie> {
        let mut list = self.load_movies();
        let position = movie
            .id
            .as_deref()
            .and_then(|id| list.iter().position(|m| m.matches_id(id)));
        match position {
            Some(index) => list[index] = movie,
            None => list.insert(0, movie),
        }
        self.save_movies(&list);
        list
    }

    pub fn remove(&self, id: &str) -> Vec<Movie> {
        let mut list = self.load_movies();
        list.retain(|m| !m.matches_id(id));
        self.save_movies(&list);
        list
    }

    /// First present key wins; one level of `userDetails` envelope is
    /// unwrapped; any failure yields `None`, never an error.
    pub fn read_user(&self) -> Option<UserRecord> {
        let raw = USER_KEYS
            .iter()
            .find_map(|key| self.db.get(key).ok().flatten())?;
        let value: serde_json::Value = serde_json::from_slice(&raw).ok()?;
        let value = match value.get("userDetails") {
            Some(inner) if inner.is_object() => inner.clone(),
            _ => value,
        };
        serde_json::from_value(value).ok()
    }

    /// Persists the server-returned user object under the canonical key and
    /// mirrors it to the legacy key so older readers keep working. Unchanged
    /// bytes are skipped, same as `save_movies`.
    pub fn write_user(&self, user: &serde_json::Value) {
        let raw = match serde_json::to_vec(user) {
            Ok(raw) => raw,
            Err(err) => {
                log::debug!("user mirror serialize failed: {}", err);
                return;
            }
        };
        if self.unchanged(USER, &raw) && self.unchanged(USER_DETAILS, &raw) {
            return;
        }
        for key in [USER, USER_DETAILS] {
            if let Err(err) = self.db.insert(key, raw.clone()) {
                log::debug!("user mirror write failed: {}", err);
            }
        }
        self.bus.notify(Change::User);
    }

    pub fn token(&self) -> Option<String> {
        let raw = self.db.get(TOKEN).ok().flatten()?;
        String::from_utf8(raw.to_vec()).ok()
    }

    pub fn set_token(&self, token: &str) {
        if self.unchanged(TOKEN, token.as_bytes()) {
            return;
        }
        if let Err(err) = self.db.insert(TOKEN, token.as_bytes()) {
            log::debug!("token write failed: {}", err);
        }
        self.bus.notify(Change::Token);
    }

    pub fn set_user_id(&self, id: &str) {
        if self.unchanged(USER_ID, id.as_bytes()) {
            return;
        }
        if let Err(err) = self.db.insert(USER_ID, id.as_bytes()) {
            log::debug!("user id write failed: {}", err);
        }
    }

    /// Clearing the token also drops the cached user identifier.
    pub fn clear_token(&self) {
        let mut removed = false;
        for key in [TOKEN, USER_ID] {
            match self.db.remove(key) {
                Ok(previous) => removed |= previous.is_some(),
                Err(err) => log::debug!("token clear failed: {}", err),
            }
        }
        if removed {
            self.bus.notify(Change::Token);
        }
    }

    /// Full reset: token, user record under every key, movie list, anything
    /// else session-scoped. Avoids leaking a stale mirror into the next login
    /// on a shared machine.
    pub fn logout(&self) {
        if self.db.is_empty() {
            return;
        }
        if let Err(err) = self.db.clear() {
            log::debug!("mirror clear failed: {}", err);
        }
        self.bus.notify(Change::Token);
        self.bus.notify(Change::User);
        self.bus.notify(Change::Movies);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn mirror() -> Mirror {
        let db = sled::Config::new().temporary(true).open().unwrap();
        Mirror::new(db, Bus::new())
    }

    fn movie(id: &str, title: &str) -> Movie {
        serde_json::from_value(json!({ "_id": id, "title": title, "posterUrl": "p" })).unwrap()
    }

    #[test]
    fn load_degrades_to_empty_on_malformed_value() {
        let m = mirror();
        assert!(m.load_movies().is_empty());
        m.db.insert(MOVIES, &b"{not json"[..]).unwrap();
        assert!(m.load_movies().is_empty());
    }

    #[test]
    fn save_and_load_round_trip() {
        let m = mirror();
        let list = vec![movie("a", "A"), movie("b", "B")];
        m.save_movies(&list);
        assert_eq!(m.load_movies(), list);
    }

    #[test]
    fn reconcile_empty_preserves_existing_mirror() {
        let m = mirror();
        let list = vec![movie("a", "A")];
        m.save_movies(&list);
        assert_eq!(m.reconcile_from_remote(Vec::new()), list);
        assert_eq!(m.load_movies(), list);
    }

    #[test]
    fn reconcile_non_empty_fully_replaces() {
        let m = mirror();
        m.save_movies(&[movie("a", "A")]);
        let fresh = vec![movie("x", "X"), movie("y", "Y")];
        assert_eq!(m.reconcile_from_remote(fresh.clone()), fresh);
        assert_eq!(m.load_movies(), fresh);
    }

    #[test]
    fn upsert_replaces_in_place_keeping_position() {
        let m = mirror();
        m.save_movies(&[movie("a", "A"), movie("b", "B"), movie("c", "C")]);
        let list = m.upsert(movie("b", "new"));
        assert_eq!(list.len(), 3);
        assert_eq!(list[1].id.as_deref(), Some("b"));
        assert_eq!(list[1].title, "new");
        assert_eq!(m.load_movies(), list);
    }

    #[test]
    fn upsert_unknown_id_inserts_at_front() {
        let m = mirror();
        m.save_movies(&[movie("a", "A")]);
        let list = m.upsert(movie("z", "Z"));
        assert_eq!(list[0].id.as_deref(), Some("z"));
        assert_eq!(list.len(), 2);
    }

    #[test]
    fn remove_drops_by_id() {
        let m = mirror();
        m.save_movies(&[movie("a", "A"), movie("b", "B")]);
        let list = m.remove("a");
        assert_eq!(list, vec![movie("b", "B")]);
        assert_eq!(m.load_movies(), list);
    }

    #[test]
    fn read_user_checks_legacy_keys_in_priority_order() {
        let m = mirror();
        assert!(m.read_user().is_none());

        m.db.insert(USER_DATA, json!({ "name": "Old" }).to_string().as_bytes())
            .unwrap();
        assert_eq!(m.read_user().unwrap().name.as_deref(), Some("Old"));

        m.db.insert(
            USER_DETAILS,
            json!({ "name": "Newer" }).to_string().as_bytes(),
        )
        .unwrap();
        assert_eq!(m.read_user().unwrap().name.as_deref(), Some("Newer"));

        m.db.insert(USER, json!({ "name": "Canonical" }).to_string().as_bytes())
            .unwrap();
        assert_eq!(m.read_user().unwrap().name.as_deref(), Some("Canonical"));
    }

    #[test]
    fn read_user_unwraps_one_envelope_level() {
        let m = mirror();
        m.db.insert(
            USER,
            json!({ "userDetails": { "name": "Jane" } }).to_string().as_bytes(),
        )
        .unwrap();
        assert_eq!(m.read_user().unwrap().name.as_deref(), Some("Jane"));
    }

    #[test]
    fn read_user_returns_none_on_malformed_value() {
        let m = mirror();
        m.db.insert(USER, &b"{broken"[..]).unwrap();
        assert!(m.read_user().is_none());
    }

    #[test]
    fn write_user_keeps_legacy_key_consistent() {
        let m = mirror();
        m.write_user(&json!({ "name": "Jane" }));
        let canonical = m.db.get(USER).unwrap().unwrap();
        let legacy = m.db.get(USER_DETAILS).unwrap().unwrap();
        assert_eq!(canonical, legacy);
    }

    #[test]
    fn token_round_trip_and_clear() {
        let m = mirror();
        assert!(m.token().is_none());
        m.set_token("t1");
        m.set_user_id("u1");
        assert_eq!(m.token().as_deref(), Some("t1"));
        m.clear_token();
        assert!(m.token().is_none());
        assert!(m.db.get(USER_ID).unwrap().is_none());
    }

    #[test]
    fn writes_notify_exactly_once_per_mutation() {
        let m = mirror();
        let mut rx = m.bus.subscribe();

        m.save_movies(&[movie("a", "A")]);
        assert_eq!(rx.try_recv().unwrap(), Change::Movies);
        assert!(rx.try_recv().is_err());

        m.write_user(&json!({ "name": "Jane" }));
        assert_eq!(rx.try_recv().unwrap(), Change::User);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn unchanged_rewrites_do_not_renotify() {
        let m = mirror();
        let list = vec![movie("a", "A")];
        m.save_movies(&list);
        m.set_token("t1");
        m.write_user(&json!({ "name": "Jane" }));

        let mut rx = m.bus.subscribe();
        m.save_movies(&list);
        m.set_token("t1");
        m.write_user(&json!({ "name": "Jane" }));
        m.clear_token();
        m.clear_token();

        // only the first clear actually removed something
        assert_eq!(rx.try_recv().unwrap(), Change::Token);
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn logout_clears_everything_and_notifies() {
        let m = mirror();
        m.set_token("t1");
        m.write_user(&json!({ "name": "Jane" }));
        m.save_movies(&[movie("a", "A")]);

        let mut rx = m.bus.subscribe();
        m.logout();

        assert!(m.token().is_none());
        assert!(m.read_user().is_none());
        assert!(m.load_movies().is_empty());

        let mut seen = Vec::new();
        while let Ok(change) = rx.try_recv() {
            seen.push(change);
        }
        assert!(seen.contains(&Change::Token));
        assert!(seen.contains(&Change::User));
        assert!(seen.contains(&Change::Movies));
    }
}
