// Event Bus - broadcast of supervisor signals
// The supervisor task is the only publisher. Publishing never blocks; slow
// receivers see RecvError::Lagged and skip the oldest items. Events sent with
// no subscriber are lost, so current state and metrics also live in watch channels.

use tokio::sync::broadcast;

/// Broadcast channel for runtime events.
#[derive(Clone, Debug)]
pub struct Bus<E: Clone> {
    tx: broadcast::Sender<E>,
}

impl<E: Clone> Bus<E> {
    /// Creates a new bus with the given channel capacity (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (tx, _rx) = broadcast::channel::<E>(capacity);
        Self { tx }
    }

    /// Publishes an event to all active subscribers.
    ///
    /// If there are no receivers, the event is dropped.
    pub fn publish(&self, ev: E) {
        let _ = self.tx.send(ev);
    }

    /// Creates a new receiver that will observe subsequent events.
    pub fn subscribe(&self) -> broadcast::Receiver<E> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_every_subscriber_receives_event() {
        let bus: Bus<u32> = Bus::new(8);
        let mut a = bus.subscribe();
        let mut b = bus.subscribe();

        bus.publish(7);
        assert_eq!(a.recv().await.unwrap(), 7);
        assert_eq!(b.recv().await.unwrap(), 7);
    }

    #[test]
    fn test_publish_without_subscribers_is_noop() {
        let bus: Bus<&'static str> = Bus::new(0);
        bus.publish("dropped");

        // A later subscriber does not see it
        let mut late = bus.subscribe();
        assert!(late.try_recv().is_err());
    }
}
