use std::collections::HashSet;
use std::sync::{Arc, RwLock};

use chrono::{DateTime, Utc};

use crate::traits::ResourceNotifier;

/// A per-client bag of subscribed resource identifiers.
///
/// The session map that owns these is guarded by the resource manager's
/// single readers-writer lock; each `Session` additionally guards its own
/// subscription set with its own lock so that a subscribe/unsubscribe never
/// needs to hold the outer lock for longer than a map lookup.
pub struct Session {
    pub id: String,
    subscriptions: RwLock<HashSet<String>>,
    last_update: RwLock<DateTime<Utc>>,
    notifier: RwLock<Option<Arc<dyn ResourceNotifier>>>,
}

impl Session {
    pub fn new(id: String) -> Self {
        Self {
            id,
            subscriptions: RwLock::new(HashSet::new()),
            last_update: RwLock::new(Utc::now()),
            notifier: RwLock::new(None),
        }
    }

    /// Stores (or replaces) the peer handle used to deliver real
    /// `ResourceUpdated` pushes to this session. Set at subscribe time, once
    /// the protocol surface has a live peer for the connection.
    pub fn set_notifier(&self, notifier: Arc<dyn ResourceNotifier>) {
        *self.notifier.write().expect("session notifier lock poisoned") = Some(notifier);
    }

    pub fn notifier(&self) -> Option<Arc<dyn ResourceNotifier>> {
        self.notifier.read().expect("session notifier lock poisoned").clone()
    }

    /// Adds `uri` to the subscription set. Idempotent: subscribing twice
    /// leaves exactly one entry and returns `false` on the second call.
    pub fn subscribe(&self, uri: String) -> bool {
        self.touch();
        self.subscriptions
            .write()
            .expect("session subscription lock poisoned")
            .insert(uri)
    }

    /// Removes `uri` from the subscription set. Returns `false` if it
    /// wasn't present.
    pub fn unsubscribe(&self, uri: &str) -> bool {
        self.touch();
        self.subscriptions
            .write()
            .expect("session subscription lock poisoned")
            .remove(uri)
    }

    pub fn is_subscribed(&self, uri: &str) -> bool {
        self.subscriptions
            .read()
            .expect("session subscription lock poisoned")
            .contains(uri)
    }

    pub fn subscriptions(&self) -> Vec<String> {
        self.subscriptions
            .read()
            .expect("session subscription lock poisoned")
            .iter()
            .cloned()
            .collect()
    }

    pub fn last_update(&self) -> DateTime<Utc> {
        *self.last_update.read().expect("session timestamp lock poisoned")
    }

    fn touch(&self) {
        *self.last_update.write().expect("session timestamp lock poisoned") = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn subscribe_is_idempotent() {
        let session = Session::new("s1".into());
        assert!(session.subscribe("feeds://all".into()));
        assert!(!session.subscribe("feeds://all".into()));
        assert_eq!(session.subscriptions().len(), 1);
    }

    #[test]
    fn unsubscribe_removes_entry() {
        let session = Session::new("s1".into());
        session.subscribe("feeds://all".into());
        assert!(session.unsubscribe("feeds://all"));
        assert!(!session.is_subscribed("feeds://all"));
        assert!(!session.unsubscribe("feeds://all"));
    }

    struct RecordingNotifier {
        seen: std::sync::Mutex<Vec<String>>,
    }

    #[async_trait::async_trait]
    impl crate::traits::ResourceNotifier for RecordingNotifier {
        async fn notify_resource_updated(&self, uri: &str) -> crate::error::Result<()> {
            self.seen.lock().unwrap().push(uri.to_string());
            Ok(())
        }
    }

    #[test]
    fn has_no_notifier_until_one_is_set() {
        let session = Session::new("s1".into());
        assert!(session.notifier().is_none());
    }

    #[tokio::test]
    async fn set_notifier_is_retrievable_and_callable() {
        let session = Session::new("s1".into());
        let notifier = std::sync::Arc::new(RecordingNotifier { seen: std::sync::Mutex::new(Vec::new()) });
        session.set_notifier(notifier.clone());

        let stored = session.notifier().expect("notifier was set");
        stored.notify_resource_updated("feeds://all").await.unwrap();
        assert_eq!(notifier.seen.lock().unwrap().as_slice(), ["feeds://all"]);
    }
}
