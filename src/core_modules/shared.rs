// THEORY:
// `Shared<T>` is the publication point for versioned state (viewport contexts,
// histogram snapshots, finished frames). A value is built completely on the
// producer side, wrapped in an `Arc` and swapped in as a whole; readers clone the
// `Arc` and keep a consistent view for as long as they hold it, without locking.
//
// It sits on a tokio `watch` channel, so async consumers can also wait for the next
// publication instead of polling.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::watch;

struct Inner<T> {
    tx: watch::Sender<Arc<T>>,
    version: AtomicU64,
}

pub struct Shared<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Shared<T> {
    fn clone(&self) -> Self {
        Self { inner: Arc::clone(&self.inner) }
    }
}

impl<T> Shared<T> {
    pub fn new(initial: T) -> Self {
        let (tx, _) = watch::channel(Arc::new(initial));
        Self {
            inner: Arc::new(Inner { tx, version: AtomicU64::new(0) }),
        }
    }

    /// Replaces the current value. Returns the new version number.
    pub fn publish(&self, value: T) -> u64 {
        self.publish_arc(Arc::new(value))
    }

    pub fn publish_arc(&self, value: Arc<T>) -> u64 {
        self.inner.tx.send_replace(value);
        self.inner.version.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// The latest published value.
    pub fn current(&self) -> Arc<T> {
        Arc::clone(&self.inner.tx.borrow())
    }

    /// How many values have been published after the initial one.
    pub fn version(&self) -> u64 {
        self.inner.version.load(Ordering::Acquire)
    }

    pub fn subscribe(&self) -> watch::Receiver<Arc<T>> {
        self.inner.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn readers_keep_their_snapshot() {
        let shared = Shared::new(vec![1, 2, 3]);
        let before = shared.current();
        assert_eq!(shared.publish(vec![4]), 1);
        assert_eq!(*before, vec![1, 2, 3]);
        assert_eq!(*shared.current(), vec![4]);
        assert_eq!(shared.version(), 1);
    }

    #[test]
    fn clones_share_the_slot() {
        let a = Shared::new(0u32);
        let b = a.clone();
        b.publish(7);
        assert_eq!(*a.current(), 7);
    }

    #[tokio::test]
    async fn subscribers_are_woken() {
        let shared = Shared::new(String::from("old"));
        let mut rx = shared.subscribe();
        let publisher = shared.clone();
        tokio::spawn(async move {
            publisher.publish(String::from("new"));
        });
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow().as_str(), "new");
    }
}
