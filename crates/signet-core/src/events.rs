//! Chain event bus.
//!
//! A bounded broadcast channel fans committed-chain events out to
//! subscribers. Publishing never blocks: a subscriber that falls behind
//! loses its oldest events and keeps receiving from wherever the channel
//! now starts, while commit latency stays unaffected.

use signet_crypto::{Address, Hash};
use tokio::sync::broadcast;
use tracing::warn;

use crate::transaction::ExecStatus;
use crate::types::{Height, TimestampMs};

/// Something that happened to the committed chain
#[derive(Debug, Clone)]
pub enum ChainEvent {
    BlockCommitted {
        height: Height,
        hash: Hash,
        tx_count: usize,
        timestamp: TimestampMs,
    },
    TransactionConfirmed {
        tx_hash: Hash,
        block_hash: Hash,
        height: Height,
        status: ExecStatus,
    },
    /// A log emitted by a contract in a committed block
    ContractEvent {
        address: Address,
        topics: Vec<Hash>,
        data: Vec<u8>,
        tx_hash: Hash,
        height: Height,
    },
    /// A deployment transaction entered the pool
    ContractDeployStarted { address: Address, tx_hash: Hash },
    /// A deployment transaction was committed
    ContractDeployed {
        address: Address,
        tx_hash: Hash,
        success: bool,
    },
    /// A contract's source was verified against its on-chain code
    ContractVerified { address: Address },
}

impl ChainEvent {
    /// The contract this event concerns, if any
    pub fn contract_address(&self) -> Option<Address> {
        match self {
            ChainEvent::ContractEvent { address, .. }
            | ChainEvent::ContractDeployStarted { address, .. }
            | ChainEvent::ContractDeployed { address, .. }
            | ChainEvent::ContractVerified { address } => Some(*address),
            _ => None,
        }
    }
}

/// What a subscriber wants to see
#[derive(Debug, Clone, Default)]
pub enum EventFilter {
    /// Every event
    #[default]
    All,
    /// Only block commits
    Blocks,
    /// Only transaction confirmations
    Transactions,
    /// Contract lifecycle and log events; `address` narrows to one
    /// contract, `topics` (if non-empty) requires a topic match
    Contracts {
        address: Option<Address>,
        topics: Vec<Hash>,
    },
}

impl EventFilter {
    pub fn contract(address: Address) -> Self {
        EventFilter::Contracts {
            address: Some(address),
            topics: Vec::new(),
        }
    }

    pub fn matches(&self, event: &ChainEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::Blocks => matches!(event, ChainEvent::BlockCommitted { .. }),
            EventFilter::Transactions => {
                matches!(event, ChainEvent::TransactionConfirmed { .. })
            }
            EventFilter::Contracts { address, topics } => {
                let subject = match event.contract_address() {
                    Some(subject) => subject,
                    None => return false,
                };
                if let Some(wanted) = address {
                    if subject != *wanted {
                        return false;
                    }
                }
                if topics.is_empty() {
                    return true;
                }
                match event {
                    ChainEvent::ContractEvent { topics: emitted, .. } => {
                        topics.iter().any(|t| emitted.contains(t))
                    }
                    // lifecycle events carry no topics and pass any topic filter
                    _ => true,
                }
            }
        }
    }
}

/// Handle for publishing and subscribing to chain events
#[derive(Debug, Clone)]
pub struct EventBus {
    sender: broadcast::Sender<ChainEvent>,
}

impl EventBus {
    /// `capacity` bounds each subscriber's backlog
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        EventBus { sender }
    }

    /// Publishes an event to all current subscribers. A send with no
    /// subscribers is not an error.
    pub fn publish(&self, event: ChainEvent) {
        let _ = self.sender.send(event);
    }

    /// Opens a filtered subscription. Dropping the stream unsubscribes.
    pub fn subscribe(&self, filter: EventFilter) -> EventStream {
        EventStream {
            receiver: self.sender.subscribe(),
            filter,
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        EventBus::new(256)
    }
}

/// A filtered event subscription
pub struct EventStream {
    receiver: broadcast::Receiver<ChainEvent>,
    filter: EventFilter,
}

impl EventStream {
    /// Waits for the next matching event. Returns `None` once the bus is
    /// gone. A lagged subscriber skips the dropped events and continues.
    pub async fn next(&mut self) -> Option<ChainEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged, oldest events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Non-blocking variant for polling contexts
    pub fn try_next(&mut self) -> Option<ChainEvent> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Some(event);
                    }
                }
                Err(broadcast::error::TryRecvError::Lagged(missed)) => {
                    warn!(missed, "event subscriber lagged, oldest events dropped");
                }
                Err(_) => return None,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(tag: u8) -> Address {
        Address::new([tag; 20])
    }

    fn block_event(height: Height) -> ChainEvent {
        ChainEvent::BlockCommitted {
            height,
            hash: Hash::zero(),
            tx_count: 0,
            timestamp: 0,
        }
    }

    #[tokio::test]
    async fn test_subscriber_receives_published_events() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe(EventFilter::All);

        bus.publish(block_event(1));
        match stream.next().await {
            Some(ChainEvent::BlockCommitted { height, .. }) => assert_eq!(height, 1),
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_filter_narrows_to_contract() {
        let bus = EventBus::new(16);
        let mut stream = bus.subscribe(EventFilter::contract(addr(1)));

        bus.publish(block_event(1));
        bus.publish(ChainEvent::ContractEvent {
            address: addr(2),
            topics: vec![],
            data: vec![],
            tx_hash: Hash::zero(),
            height: 1,
        });
        bus.publish(ChainEvent::ContractEvent {
            address: addr(1),
            topics: vec![],
            data: vec![1, 2, 3],
            tx_hash: Hash::zero(),
            height: 1,
        });

        match stream.next().await {
            Some(ChainEvent::ContractEvent { address, data, .. }) => {
                assert_eq!(address, addr(1));
                assert_eq!(data, vec![1, 2, 3]);
            }
            other => panic!("unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_does_not_block() {
        let bus = EventBus::new(2);
        for i in 0..100 {
            bus.publish(block_event(i));
        }
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_slow_subscriber_drops_oldest_and_recovers() {
        let bus = EventBus::new(4);
        let mut stream = bus.subscribe(EventFilter::All);

        // overflow the bounded backlog
        for i in 0..20 {
            bus.publish(block_event(i));
        }

        // the subscriber lost the oldest events but still gets the newest
        let mut seen = Vec::new();
        while let Some(event) = stream.try_next() {
            if let ChainEvent::BlockCommitted { height, .. } = event {
                seen.push(height);
            }
        }
        assert!(!seen.is_empty());
        assert_eq!(*seen.last().unwrap(), 19);
        assert!(seen[0] >= 16);
    }

    #[tokio::test]
    async fn test_topic_filter() {
        let bus = EventBus::new(16);
        let wanted = b"Transfer".as_slice();
        let topic = signet_crypto::Hashable::hash(wanted);
        let mut stream = bus.subscribe(EventFilter::Contracts {
            address: Some(addr(1)),
            topics: vec![topic],
        });

        bus.publish(ChainEvent::ContractEvent {
            address: addr(1),
            topics: vec![Hash::zero()],
            data: vec![],
            tx_hash: Hash::zero(),
            height: 1,
        });
        bus.publish(ChainEvent::ContractEvent {
            address: addr(1),
            topics: vec![topic],
            data: vec![7],
            tx_hash: Hash::zero(),
            height: 1,
        });

        match stream.next().await {
            Some(ChainEvent::ContractEvent { data, .. }) => assert_eq!(data, vec![7]),
            other => panic!("unexpected event: {:?}", other),
        }
    }
}
