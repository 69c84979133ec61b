// SPDX-License-Identifier: MPL-2.0

//! Topic alias bookkeeping for both directions of a connection.
//!
//! Alias bindings only live as long as the network connection, so both caches are reset with
//! the limits negotiated for every new connection.

use std::collections::{hash_map, HashMap};
use std::sync::Arc;

use lru_slab::LruSlab;
use tracing::trace;

use super::error::MqttClientError;
use super::opts::OutboundTopicAliasBehavior;
use super::results::InboundPublish;

/// How an outbound publish uses topic aliasing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundAlias {
    /// Send the full topic without an alias.
    None,
    /// Send the topic together with the alias, establishing the binding.
    Bind(u16),
    /// The alias is already bound to this topic; the topic may be omitted on the wire.
    Reuse(u16),
}

impl OutboundAlias {
    pub fn alias(&self) -> Option<u16> {
        match self {
            Self::None => None,
            Self::Bind(alias) | Self::Reuse(alias) => Some(*alias),
        }
    }
}

/// Cache entry within the LRU slab
#[derive(Debug)]
struct AliasEntry {
    topic: Arc<str>,
    alias: u16,
}

/// Assigns or validates aliases for publishes sent to the broker.
#[derive(Debug)]
pub struct OutboundTopicAliasCache {
    behavior: OutboundTopicAliasBehavior,
    configured_size: u16,
    /// Effective size for the current connection.
    size: u16,
    // map from topic to slot in lru
    lookup: HashMap<Arc<str>, u32>,
    lru: LruSlab<AliasEntry>,
    // alias -> last topic bound to it, manual mode only
    manual_bindings: HashMap<u16, String>,
}

impl OutboundTopicAliasCache {
    pub fn new(behavior: OutboundTopicAliasBehavior, configured_size: u16) -> Self {
        Self {
            behavior,
            configured_size,
            size: 0,
            lookup: HashMap::new(),
            lru: LruSlab::default(),
            manual_bindings: HashMap::new(),
        }
    }

    /// Drop all bindings and apply the limit the broker advertised for the new connection.
    /// A broker maximum of 0 disables outbound aliasing until the next reset.
    pub fn reset(&mut self, broker_maximum: u16) {
        self.lookup.clear();
        self.lru = LruSlab::default();
        self.manual_bindings.clear();
        self.size = match self.behavior {
            OutboundTopicAliasBehavior::Disabled => 0,
            _ => self.configured_size.min(broker_maximum),
        };
        trace!(size = self.size, "outbound topic alias cache reset");
    }

    /// Number of aliases usable on the current connection.
    pub fn size(&self) -> u16 {
        self.size
    }

    pub fn len(&self) -> usize {
        match self.behavior {
            OutboundTopicAliasBehavior::Manual => self.manual_bindings.len(),
            _ => self.lru.len() as usize,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Decide the aliasing for a publish about to be submitted on the current connection.
    pub fn resolve(&mut self, topic: &str, requested: Option<u16>) -> OutboundAlias {
        if self.size == 0 {
            return OutboundAlias::None;
        }
        match self.behavior {
            OutboundTopicAliasBehavior::Disabled => OutboundAlias::None,
            OutboundTopicAliasBehavior::Manual => self.resolve_manual(topic, requested),
            OutboundTopicAliasBehavior::Lru => self.resolve_lru(topic),
        }
    }

    fn resolve_manual(&mut self, topic: &str, requested: Option<u16>) -> OutboundAlias {
        let Some(alias) = requested else {
            return OutboundAlias::None;
        };
        if alias == 0 || alias > self.size {
            trace!(alias, size = self.size, "requested topic alias out of range, ignoring");
            return OutboundAlias::None;
        }
        match self.manual_bindings.get(&alias) {
            Some(bound) if bound == topic => OutboundAlias::Reuse(alias),
            _ => {
                self.manual_bindings.insert(alias, topic.to_string());
                OutboundAlias::Bind(alias)
            }
        }
    }

    fn resolve_lru(&mut self, topic: &str) -> OutboundAlias {
        if let Some(&slot) = self.lookup.get(topic) {
            // get_mut freshens the entry
            return OutboundAlias::Reuse(self.lru.get_mut(slot).alias);
        }

        let topic = Arc::<str>::from(topic);
        let alias = if self.lru.len() >= u32::from(self.size) {
            let Some(oldest) = self.lru.lru() else {
                return OutboundAlias::None;
            };
            let evicted = self.lru.remove(oldest);
            self.lookup.remove(&evicted.topic);
            trace!(topic = %evicted.topic, alias = evicted.alias, "evicting topic alias");
            evicted.alias
        } else {
            // aliases are handed out densely and only ever recycled by eviction
            self.lru.len() as u16 + 1
        };

        match self.lookup.entry(topic.clone()) {
            hash_map::Entry::Vacant(entry) => {
                entry.insert(self.lru.insert(AliasEntry { topic, alias }));
            }
            hash_map::Entry::Occupied(_) => return OutboundAlias::None,
        }
        OutboundAlias::Bind(alias)
    }
}

/// Resolves aliases the broker uses on publishes sent to the client.
#[derive(Debug, Default)]
pub struct InboundTopicAliasCache {
    maximum: u16,
    // index alias - 1
    topics: Vec<Option<String>>,
}

impl InboundTopicAliasCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Clear bindings and accept aliases `1..=maximum` on the new connection (0 rejects all).
    pub fn reset(&mut self, maximum: u16) {
        self.maximum = maximum;
        self.topics = vec![None; maximum as usize];
    }

    /// Record or apply the alias carried by an inbound publish, filling in its topic.
    pub fn resolve(&mut self, publish: &mut InboundPublish) -> Result<(), MqttClientError> {
        let Some(alias) = publish.topic_alias else {
            if publish.topic_name.is_empty() {
                return Err(MqttClientError::protocol(
                    "inbound publish has neither a topic nor a topic alias",
                ));
            }
            return Ok(());
        };

        if self.maximum == 0 {
            return Err(MqttClientError::protocol(format!(
                "broker used topic alias {} but inbound aliasing is disabled",
                alias
            )));
        }
        if alias == 0 || alias > self.maximum {
            return Err(MqttClientError::protocol(format!(
                "inbound topic alias {} outside of 1..={}",
                alias, self.maximum
            )));
        }

        let slot = &mut self.topics[usize::from(alias - 1)];
        if publish.topic_name.is_empty() {
            match slot {
                Some(topic) => {
                    publish.topic_name = topic.clone();
                    Ok(())
                }
                None => Err(MqttClientError::protocol(format!(
                    "inbound topic alias {} is not bound to a topic",
                    alias
                ))),
            }
        } else {
            *slot = Some(publish.topic_name.clone());
            Ok(())
        }
    }
}
