// SPDX-License-Identifier: MPL-2.0

use std::fmt;

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::opts::UserProperty;

/// MQTT delivery guarantee.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize,
)]
#[serde(try_from = "u8", into = "u8")]
pub enum QoS {
    #[default]
    AtMostOnce = 0,
    AtLeastOnce = 1,
    ExactlyOnce = 2,
}

impl TryFrom<u8> for QoS {
    type Error = String;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(QoS::AtMostOnce),
            1 => Ok(QoS::AtLeastOnce),
            2 => Ok(QoS::ExactlyOnce),
            other => Err(format!("invalid QoS level {}", other)),
        }
    }
}

impl From<QoS> for u8 {
    fn from(qos: QoS) -> Self {
        qos as u8
    }
}

/// The three operation kinds tracked by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OperationKind {
    Publish,
    Subscribe,
    Unsubscribe,
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Publish => f.write_str("publish"),
            Self::Subscribe => f.write_str("subscribe"),
            Self::Unsubscribe => f.write_str("unsubscribe"),
        }
    }
}

/// Optional MQTT5 properties of a PUBLISH.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublishProperties {
    pub payload_format_utf8: Option<bool>,
    pub message_expiry_interval_seconds: Option<u32>,
    pub content_type: Option<String>,
    pub response_topic: Option<String>,
    pub correlation_data: Option<Bytes>,
    pub user_properties: Vec<UserProperty>,
}

/// Fully customizable publish command for MQTT v5
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishCommand {
    pub topic_name: String,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    /// Set by the client when a previously sent publish is resubmitted on a resumed session.
    pub dup: bool,
    /// Requested alias; only honored with manual outbound aliasing.
    pub topic_alias: Option<u16>,
    pub properties: PublishProperties,
}

impl PublishCommand {
    pub fn simple(
        topic: impl Into<String>,
        payload: impl Into<Bytes>,
        qos: QoS,
        retain: bool,
    ) -> Self {
        Self {
            topic_name: topic.into(),
            payload: payload.into(),
            qos,
            retain,
            dup: false,
            topic_alias: None,
            properties: PublishProperties::default(),
        }
    }

    /// Create a new builder for constructing a PublishCommand
    ///
    /// # Example
    /// ```
    /// use mqtt5_lifecycle::mqtt_client::{PublishCommand, QoS};
    ///
    /// let cmd = PublishCommand::builder()
    ///     .topic("sensors/temp")
    ///     .payload(&b"23.5"[..])
    ///     .qos(QoS::AtLeastOnce)
    ///     .build()
    ///     .unwrap();
    /// assert_eq!(cmd.topic_name, "sensors/temp");
    /// ```
    pub fn builder() -> PublishCommandBuilder {
        PublishCommandBuilder::new()
    }

    /// Estimated size of the encoded PUBLISH carrying the full topic.
    pub(crate) fn encoded_len(&self) -> usize {
        let props = &self.properties;
        let mut properties_len = 0;
        if props.payload_format_utf8.is_some() {
            properties_len += 2;
        }
        if props.message_expiry_interval_seconds.is_some() {
            properties_len += 5;
        }
        if self.topic_alias.is_some() {
            properties_len += 3;
        }
        properties_len += optional_string_property_len(props.content_type.as_deref());
        properties_len += optional_string_property_len(props.response_topic.as_deref());
        if let Some(data) = &props.correlation_data {
            properties_len += 1 + 2 + data.len();
        }
        properties_len += user_properties_len(&props.user_properties);

        let mut remaining = 2 + self.topic_name.len();
        if self.qos != QoS::AtMostOnce {
            remaining += 2;
        }
        remaining += variable_int_len(properties_len) + properties_len;
        remaining += self.payload.len();
        packet_len(remaining)
    }
}

/// Builder for creating MQTT v5 publish commands
#[derive(Debug, Clone, Default)]
pub struct PublishCommandBuilder {
    topic_name: Option<String>,
    payload: Bytes,
    qos: QoS,
    retain: bool,
    topic_alias: Option<u16>,
    properties: PublishProperties,
}

/// Error type for publish builder validation
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PublishBuilderError {
    /// Topic name was not provided
    #[error("Topic name not provided. Call topic() to set the topic.")]
    NoTopic,
}

impl PublishCommandBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn topic(mut self, topic: impl Into<String>) -> Self {
        self.topic_name = Some(topic.into());
        self
    }

    pub fn payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.payload = payload.into();
        self
    }

    pub fn qos(mut self, qos: QoS) -> Self {
        self.qos = qos;
        self
    }

    pub fn retain(mut self, retain: bool) -> Self {
        self.retain = retain;
        self
    }

    pub fn with_topic_alias(mut self, alias: u16) -> Self {
        self.topic_alias = Some(alias);
        self
    }

    pub fn with_payload_format_utf8(mut self, utf8: bool) -> Self {
        self.properties.payload_format_utf8 = Some(utf8);
        self
    }

    pub fn with_message_expiry_interval(mut self, seconds: u32) -> Self {
        self.properties.message_expiry_interval_seconds = Some(seconds);
        self
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.properties.content_type = Some(content_type.into());
        self
    }

    pub fn with_response_topic(mut self, topic: impl Into<String>) -> Self {
        self.properties.response_topic = Some(topic.into());
        self
    }

    pub fn with_correlation_data(mut self, data: impl Into<Bytes>) -> Self {
        self.properties.correlation_data = Some(data.into());
        self
    }

    pub fn with_user_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties
            .user_properties
            .push(UserProperty::new(key, value));
        self
    }

    pub fn build(self) -> Result<PublishCommand, PublishBuilderError> {
        let topic_name = self.topic_name.ok_or(PublishBuilderError::NoTopic)?;

        Ok(PublishCommand {
            topic_name,
            payload: self.payload,
            qos: self.qos,
            retain: self.retain,
            dup: false,
            topic_alias: self.topic_alias,
            properties: self.properties,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RetainHandling {
    #[default]
    SendOnSubscribe = 0,
    SendOnSubscribeIfNew = 1,
    DoNotSend = 2,
}

/// One topic filter of a SUBSCRIBE with its options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSubscription {
    pub topic_filter: String,
    pub qos: QoS,
    pub no_local: bool,
    pub retain_as_published: bool,
    pub retain_handling: RetainHandling,
}

impl TopicSubscription {
    pub fn new_simple(topic_filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            topic_filter: topic_filter.into(),
            qos,
            no_local: false,
            retain_as_published: false,
            retain_handling: RetainHandling::default(),
        }
    }
}

/// Fully customizable subscribe command for MQTT v5
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubscribeCommand {
    pub subscriptions: Vec<TopicSubscription>,
    pub subscription_identifier: Option<u32>,
    pub user_properties: Vec<UserProperty>,
}

impl SubscribeCommand {
    pub fn single(topic_filter: impl Into<String>, qos: QoS) -> Self {
        Self {
            subscriptions: vec![TopicSubscription::new_simple(topic_filter, qos)],
            ..Default::default()
        }
    }

    pub fn builder() -> SubscribeCommandBuilder {
        SubscribeCommandBuilder::default()
    }

    pub(crate) fn encoded_len(&self) -> usize {
        let mut properties_len = user_properties_len(&self.user_properties);
        if let Some(id) = self.subscription_identifier {
            properties_len += 1 + variable_int_len(id as usize);
        }
        let filters: usize = self
            .subscriptions
            .iter()
            .map(|s| 2 + s.topic_filter.len() + 1)
            .sum();
        packet_len(2 + variable_int_len(properties_len) + properties_len + filters)
    }
}

#[derive(Debug, Clone, Default)]
pub struct SubscribeCommandBuilder {
    topics: Vec<TopicSubscription>,
    subscription_identifier: Option<u32>,
    user_properties: Vec<UserProperty>,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscribeBuilderError {
    #[error("No topics added to subscription. Call add_topic() at least once.")]
    NoTopics,
}

impl SubscribeCommandBuilder {
    pub fn add_topic(mut self, topic: impl Into<String>, qos: QoS) -> Self {
        self.topics.push(TopicSubscription::new_simple(topic, qos));
        self
    }

    pub fn add_topic_with_options(
        mut self,
        topic: impl Into<String>,
        qos: QoS,
        no_local: bool,
        retain_as_published: bool,
        retain_handling: RetainHandling,
    ) -> Self {
        self.topics.push(TopicSubscription {
            topic_filter: topic.into(),
            qos,
            no_local,
            retain_as_published,
            retain_handling,
        });
        self
    }

    pub fn with_subscription_id(mut self, id: u32) -> Self {
        self.subscription_identifier = Some(id);
        self
    }

    pub fn with_user_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.user_properties.push(UserProperty::new(key, value));
        self
    }

    pub fn build(self) -> Result<SubscribeCommand, SubscribeBuilderError> {
        if self.topics.is_empty() {
            return Err(SubscribeBuilderError::NoTopics);
        }

        Ok(SubscribeCommand {
            subscriptions: self.topics,
            subscription_identifier: self.subscription_identifier,
            user_properties: self.user_properties,
        })
    }
}

/// Fully customizable unsubscribe command for MQTT v5
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnsubscribeCommand {
    pub topic_filters: Vec<String>,
    pub user_properties: Vec<UserProperty>,
}

impl UnsubscribeCommand {
    pub fn from_topics<I, S>(topics: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            topic_filters: topics.into_iter().map(Into::into).collect(),
            user_properties: Vec::new(),
        }
    }

    pub(crate) fn encoded_len(&self) -> usize {
        let properties_len = user_properties_len(&self.user_properties);
        let filters: usize = self.topic_filters.iter().map(|f| 2 + f.len()).sum();
        packet_len(2 + variable_int_len(properties_len) + properties_len + filters)
    }
}

/// DISCONNECT contents, sent by the client on stop or received from the broker.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct DisconnectPacket {
    /// 0x00 is a normal disconnection.
    pub reason_code: u8,
    pub session_expiry_interval_seconds: Option<u32>,
    pub reason_string: Option<String>,
    pub server_reference: Option<String>,
    pub user_properties: Vec<UserProperty>,
}

impl DisconnectPacket {
    pub fn with_reason(reason_code: u8) -> Self {
        Self {
            reason_code,
            ..Default::default()
        }
    }
}

fn optional_string_property_len(value: Option<&str>) -> usize {
    value.map_or(0, |s| 1 + 2 + s.len())
}

fn user_properties_len(properties: &[UserProperty]) -> usize {
    properties
        .iter()
        .map(|p| 1 + 2 + p.name.len() + 2 + p.value.len())
        .sum()
}

fn variable_int_len(value: usize) -> usize {
    match value {
        0..=127 => 1,
        128..=16_383 => 2,
        16_384..=2_097_151 => 3,
        _ => 4,
    }
}

fn packet_len(remaining: usize) -> usize {
    1 + variable_int_len(remaining) + remaining
}
