//! Vault event types
//!
//! Events are emitted once per completed call, after every state change of
//! that call has landed. Aborted calls emit nothing.

use crate::types::PoolId;

use alloy_primitives::{Address, U256};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Default capacity of the event broadcast channel
pub const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Events emitted by the vault orchestrator
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VaultEvent {
    /// Wrapped tokens deposited and shares minted
    Deposited {
        user: Address,
        pool_id: PoolId,
        amount: U256,
        shares_minted: U256,
        lp_added: u64,
        call_id: Uuid,
        timestamp: DateTime<Utc>,
    },

    /// Shares burned and wrapped tokens returned
    Withdrawn {
        user: Address,
        pool_id: PoolId,
        shares: U256,
        amount_returned: U256,
        lp_removed: u64,
        call_id: Uuid,
        timestamp: DateTime<Utc>,
    },
}

impl VaultEvent {
    pub fn name(&self) -> &'static str {
        match self {
            VaultEvent::Deposited { .. } => "deposited",
            VaultEvent::Withdrawn { .. } => "withdrawn",
        }
    }

    pub fn pool_id(&self) -> PoolId {
        match self {
            VaultEvent::Deposited { pool_id, .. } | VaultEvent::Withdrawn { pool_id, .. } => {
                *pool_id
            }
        }
    }

    pub fn user(&self) -> Address {
        match self {
            VaultEvent::Deposited { user, .. } | VaultEvent::Withdrawn { user, .. } => *user,
        }
    }

    pub fn call_id(&self) -> Uuid {
        match self {
            VaultEvent::Deposited { call_id, .. } | VaultEvent::Withdrawn { call_id, .. } => {
                *call_id
            }
        }
    }
}

/// Fan-out of vault events to any number of subscribers
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<VaultEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<VaultEvent> {
        self.tx.subscribe()
    }

    /// Publish an event; returns the number of subscribers reached
    pub fn publish(&self, event: VaultEvent) -> usize {
        // No subscribers is not an error
        self.tx.send(event).unwrap_or(0)
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(EVENT_CHANNEL_CAPACITY)
    }
}
