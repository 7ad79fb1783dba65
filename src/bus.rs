//! Change notification bus.
//!
//! Two signal classes feed the same channel: explicit `notify` calls made by
//! the surface that performed a mutation, and storage-originated events
//! forwarded from the sled subscriber, which carry the changed key. Listeners
//! re-read the relevant mirror on any signal, so the two classes are
//! interchangeable and duplicate delivery is harmless.

use std::future::Future;

use tokio::sync::broadcast;

use crate::mirror;

/// Which mirrored record changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Change {
    Token,
    User,
    Movies,
}

impl Change {
    pub fn kind(&self) -> &'static str {
        match self {
            Change::Token => "token",
            Change::User => "user",
            Change::Movies => "movies",
        }
    }

    /// Map a storage key to its change class; unknown keys are ignored.
    pub fn for_key(key: &[u8]) -> Option<Change> {
        if key == mirror::TOKEN || key == mirror::USER_ID {
            Some(Change::Token)
        } else if key == mirror::USER || key == mirror::USER_DETAILS || key == mirror::USER_DATA {
            Some(Change::User)
        } else if key == mirror::MOVIES {
            Some(Change::Movies)
        } else {
            None
        }
    }
}

#[derive(Clone)]
pub struct Bus {
    sender: broadcast::Sender<Change>,
}

impl Bus {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(64);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Change> {
        self.sender.subscribe()
    }

    /// Best effort: delivery to zero subscribers is not an error.
    pub fn notify(&self, change: Change) {
        let _ = self.sender.send(change);
    }
}

impl Default for Bus {
    fn default() -> Self {
        Self::new()
    }
}

/// Drain the database's event stream and forward changes to known keys onto
/// the bus. The subscriber is registered before this returns, so events from
/// writes made after the call are never missed.
pub fn forward_storage_events(db: &sled::Db, bus: Bus) -> impl Future<Output = ()> {
    let mut subscriber = db.watch_prefix(vec![]);
    async move {
        while let Some(event) = (&mut subscriber).await {
            let key = match &event {
                sled::Event::Insert { key, .. } => key,
                sled::Event::Remove { key } => key,
            };
            if let Some(change) = Change::for_key(key) {
                log::debug!("storage event for {}", change.kind());
                bus.notify(change);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn keys_map_to_change_classes() {
        assert_eq!(Change::for_key(b"token"), Some(Change::Token));
        assert_eq!(Change::for_key(b"userId"), Some(Change::Token));
        assert_eq!(Change::for_key(b"user"), Some(Change::User));
        assert_eq!(Change::for_key(b"userDetails"), Some(Change::User));
        assert_eq!(Change::for_key(b"userData"), Some(Change::User));
        assert_eq!(Change::for_key(b"movies"), Some(Change::Movies));
        assert_eq!(Change::for_key(b"unrelated"), None);
    }

    #[actix_rt::test]
    async fn watcher_forwards_storage_writes() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let bus = Bus::new();
        let mut rx = bus.subscribe();
        let watcher = forward_storage_events(&db, bus.clone());
        actix_rt::spawn(watcher);

        db.insert(b"something-else", b"ignored").unwrap();
        db.insert(b"token", b"t1").unwrap();

        let change = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("no signal received")
            .unwrap();
        assert_eq!(change, Change::Token);
    }

    #[actix_rt::test]
    async fn explicit_notify_reaches_subscribers() {
        let bus = Bus::new();
        let mut rx = bus.subscribe();
        bus.notify(Change::User);
        assert_eq!(rx.recv().await.unwrap(), Change::User);
    }

    #[actix_rt::test]
    async fn dropped_receiver_detaches_cleanly() {
        let bus = Bus::new();
        let rx = bus.subscribe();
        drop(rx);
        // no subscribers left; notify must not error or panic
        bus.notify(Change::Movies);
    }
}
