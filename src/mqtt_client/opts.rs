// SPDX-License-Identifier: MPL-2.0

//! Client configuration.
//!
//! `MqttClientOptions` is a plain record: build it with a struct literal over
//! `..Default::default()` or deserialize it from JSON, then hand it to the client.
//! The engine validates it once at construction and owns its copy afterwards.

use serde::{Deserialize, Serialize};

use super::commands::QoS;
use super::error::{MqttClientError, MqttClientResult};
use super::validation;

pub const DEFAULT_KEEP_ALIVE_SECONDS: u16 = 1200;
pub const DEFAULT_MIN_RECONNECT_DELAY_MS: u64 = 1_000;
pub const DEFAULT_MAX_RECONNECT_DELAY_MS: u64 = 120_000;
pub const DEFAULT_MIN_CONNECTED_TIME_TO_RESET_MS: u64 = 30_000;
pub const DEFAULT_PING_TIMEOUT_MS: u64 = 30_000;
pub const DEFAULT_CONNACK_TIMEOUT_MS: u64 = 20_000;
pub const DEFAULT_ACK_TIMEOUT_SECONDS: u64 = 60;
pub const DEFAULT_TOPIC_ALIAS_CACHE_SIZE: u16 = 25;

/// Maps an integer option code onto an enum, rejecting unknown codes as configuration errors.
macro_rules! option_codes {
    ($ty:ident, $field:literal, { $($code:literal => $variant:expr),+ $(,)? }) => {
        impl TryFrom<u32> for $ty {
            type Error = MqttClientError;

            fn try_from(code: u32) -> Result<Self, Self::Error> {
                match code {
                    $($code => Ok($variant),)+
                    other => Err(MqttClientError::invalid_config(
                        $field,
                        format!("unknown option code {}", other),
                    )),
                }
            }
        }
    };
}

/// Controls how the client treats session state across connections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientSessionBehavior {
    /// Every connection starts a clean session.
    #[default]
    Clean,
    /// The first connection starts clean; every reconnection after a success asks to resume.
    RejoinPostSuccess,
}

option_codes!(ClientSessionBehavior, "session_behavior", {
    0 => ClientSessionBehavior::Clean,
    1 => ClientSessionBehavior::Clean,
    2 => ClientSessionBehavior::RejoinPostSuccess,
});

/// Additional client-side validation on top of the protocol rules.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtendedValidation {
    #[default]
    None,
    /// Enforce AWS IoT Core service limits (topic length and depth, subscriptions per request,
    /// client id length).
    AwsIotCoreDefaults,
}

option_codes!(ExtendedValidation, "extended_validation", {
    0 => ExtendedValidation::None,
    1 => ExtendedValidation::AwsIotCoreDefaults,
});

/// What happens to incomplete operations on disconnect, and to new operations while offline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflineQueuePolicy {
    /// Only QoS 1 and QoS 2 publishes are retained.
    FailNonQos1PublishOnDisconnect,
    /// QoS 0 publishes fail; everything else is retained.
    #[default]
    FailQos0PublishOnDisconnect,
    /// Nothing is retained.
    FailAllOnDisconnect,
}

option_codes!(OfflineQueuePolicy, "offline_queue_behavior", {
    0 => OfflineQueuePolicy::FailQos0PublishOnDisconnect,
    1 => OfflineQueuePolicy::FailNonQos1PublishOnDisconnect,
    2 => OfflineQueuePolicy::FailQos0PublishOnDisconnect,
    3 => OfflineQueuePolicy::FailAllOnDisconnect,
});

/// Randomization applied to the reconnect backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JitterMode {
    /// Uniform in `[0, delay]`.
    #[default]
    Full,
    /// The computed backoff is used as-is.
    None,
}

impl TryFrom<u32> for JitterMode {
    type Error = MqttClientError;

    fn try_from(code: u32) -> Result<Self, Self::Error> {
        match code {
            0 | 2 => Ok(JitterMode::Full),
            1 => Ok(JitterMode::None),
            3 => Err(MqttClientError::invalid_config(
                "retry_jitter_mode",
                "decorrelated jitter is not supported",
            )),
            other => Err(MqttClientError::invalid_config(
                "retry_jitter_mode",
                format!("unknown option code {}", other),
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutboundTopicAliasBehavior {
    #[default]
    Disabled,
    /// Aliases requested on the publish are used when they fit the negotiated limit.
    Manual,
    /// The client assigns aliases from a least-recently-used cache.
    Lru,
}

option_codes!(OutboundTopicAliasBehavior, "topic_aliasing.outbound_behavior", {
    0 => OutboundTopicAliasBehavior::Disabled,
    1 => OutboundTopicAliasBehavior::Manual,
    2 => OutboundTopicAliasBehavior::Lru,
    3 => OutboundTopicAliasBehavior::Disabled,
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InboundTopicAliasBehavior {
    #[default]
    Disabled,
    Enabled,
}

option_codes!(InboundTopicAliasBehavior, "topic_aliasing.inbound_behavior", {
    0 => InboundTopicAliasBehavior::Disabled,
    1 => InboundTopicAliasBehavior::Enabled,
    2 => InboundTopicAliasBehavior::Disabled,
});

/// Topic aliasing configuration for both directions.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TopicAliasingOptions {
    pub outbound_behavior: OutboundTopicAliasBehavior,
    /// Upper bound for the outbound cache; 0 means the default of 25. The broker's
    /// topic alias maximum caps it further.
    pub outbound_cache_max_size: u16,
    pub inbound_behavior: InboundTopicAliasBehavior,
    /// Number of aliases the broker may use towards the client; 0 means the default of 25.
    pub inbound_cache_max_size: u16,
}

impl TopicAliasingOptions {
    pub fn outbound_cache_size(&self) -> u16 {
        or_default_alias_size(self.outbound_cache_max_size)
    }

    /// Topic alias maximum advertised in CONNECT, or `None` when inbound aliasing is off.
    pub fn inbound_alias_maximum(&self) -> Option<u16> {
        match self.inbound_behavior {
            InboundTopicAliasBehavior::Enabled => {
                Some(or_default_alias_size(self.inbound_cache_max_size))
            }
            InboundTopicAliasBehavior::Disabled => None,
        }
    }
}

fn or_default_alias_size(size: u16) -> u16 {
    if size == 0 {
        DEFAULT_TOPIC_ALIAS_CACHE_SIZE
    } else {
        size
    }
}

/// A name/value pair carried in MQTT5 property lists.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserProperty {
    pub name: String,
    pub value: String,
}

impl UserProperty {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// Will message published by the broker when the connection drops uncleanly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WillMessage {
    pub topic: String,
    #[serde(default)]
    pub payload: Vec<u8>,
    #[serde(default)]
    pub qos: QoS,
    #[serde(default)]
    pub retain: bool,
}

/// Parameters carried in every CONNECT the client sends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectOptions {
    /// 0 disables keep-alive.
    pub keep_alive_interval_seconds: u16,
    /// When unset the broker assigns one, and the client reuses that id on reconnects.
    pub client_id: Option<String>,
    pub username: Option<String>,
    pub password: Option<Vec<u8>>,
    pub session_expiry_interval_seconds: Option<u32>,
    pub request_response_information: Option<bool>,
    pub request_problem_information: Option<bool>,
    pub receive_maximum: Option<u16>,
    pub maximum_packet_size_bytes: Option<u32>,
    pub will_delay_interval_seconds: Option<u32>,
    pub will: Option<WillMessage>,
    pub user_properties: Vec<UserProperty>,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            keep_alive_interval_seconds: DEFAULT_KEEP_ALIVE_SECONDS,
            client_id: None,
            username: None,
            password: None,
            session_expiry_interval_seconds: None,
            request_response_information: None,
            request_problem_information: None,
            receive_maximum: None,
            maximum_packet_size_bytes: None,
            will_delay_interval_seconds: None,
            will: None,
            user_properties: Vec::new(),
        }
    }
}

/// Socket, TLS, proxy and websocket settings. The lifecycle layer never interprets these; they
/// are handed to the transport engine with every connect request.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct TransportOptions {
    pub tls: bool,
    pub websocket: bool,
    pub http_proxy: Option<String>,
    /// Anything else the transport engine understands.
    pub extra: serde_json::Map<String, serde_json::Value>,
}

/// Complete client configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttClientOptions {
    pub host: String,
    pub port: u16,
    pub transport: TransportOptions,
    pub connect: ConnectOptions,
    pub session_behavior: ClientSessionBehavior,
    pub extended_validation: ExtendedValidation,
    pub offline_queue_behavior: OfflineQueuePolicy,
    pub retry_jitter_mode: JitterMode,
    pub min_reconnect_delay_ms: u64,
    pub max_reconnect_delay_ms: u64,
    /// A connection that stays up at least this long resets the reconnect backoff.
    pub min_connected_time_to_reset_reconnect_delay_ms: u64,
    pub ping_timeout_ms: u64,
    pub connack_timeout_ms: u64,
    /// 0 disables operation ack timeouts.
    pub ack_timeout_seconds: u64,
    pub topic_aliasing: TopicAliasingOptions,
}

impl Default for MqttClientOptions {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            transport: TransportOptions::default(),
            connect: ConnectOptions::default(),
            session_behavior: ClientSessionBehavior::default(),
            extended_validation: ExtendedValidation::default(),
            offline_queue_behavior: OfflineQueuePolicy::default(),
            retry_jitter_mode: JitterMode::default(),
            min_reconnect_delay_ms: DEFAULT_MIN_RECONNECT_DELAY_MS,
            max_reconnect_delay_ms: DEFAULT_MAX_RECONNECT_DELAY_MS,
            min_connected_time_to_reset_reconnect_delay_ms: DEFAULT_MIN_CONNECTED_TIME_TO_RESET_MS,
            ping_timeout_ms: DEFAULT_PING_TIMEOUT_MS,
            connack_timeout_ms: DEFAULT_CONNACK_TIMEOUT_MS,
            ack_timeout_seconds: DEFAULT_ACK_TIMEOUT_SECONDS,
            topic_aliasing: TopicAliasingOptions::default(),
        }
    }
}

impl MqttClientOptions {
    /// Parse options from JSON. Missing fields take their defaults; the result is validated.
    pub fn from_json_str(json: &str) -> MqttClientResult<Self> {
        let options: Self = serde_json::from_str(json)
            .map_err(|e| MqttClientError::invalid_config("json", e.to_string()))?;
        options.validate()?;
        Ok(options)
    }

    /// Check the configuration for values the client can never run with.
    pub fn validate(&self) -> MqttClientResult<()> {
        if self.host.is_empty() {
            return Err(MqttClientError::invalid_config("host", "must not be empty"));
        }
        if self.port == 0 {
            return Err(MqttClientError::invalid_config("port", "must not be 0"));
        }
        if self.max_reconnect_delay_ms == 0 {
            return Err(MqttClientError::invalid_config(
                "max_reconnect_delay_ms",
                "must not be 0",
            ));
        }
        if self.min_reconnect_delay_ms > self.max_reconnect_delay_ms {
            return Err(MqttClientError::invalid_config(
                "min_reconnect_delay_ms",
                format!(
                    "{} exceeds max_reconnect_delay_ms {}",
                    self.min_reconnect_delay_ms, self.max_reconnect_delay_ms
                ),
            ));
        }
        if self.ping_timeout_ms == 0 {
            return Err(MqttClientError::invalid_config(
                "ping_timeout_ms",
                "must not be 0",
            ));
        }
        if self.connack_timeout_ms == 0 {
            return Err(MqttClientError::invalid_config(
                "connack_timeout_ms",
                "must not be 0",
            ));
        }

        let keep_alive_ms = u64::from(self.connect.keep_alive_interval_seconds) * 1000;
        if keep_alive_ms != 0 && self.ping_timeout_ms >= keep_alive_ms {
            return Err(MqttClientError::invalid_config(
                "ping_timeout_ms",
                format!(
                    "{} must be shorter than the keep-alive interval ({} ms)",
                    self.ping_timeout_ms, keep_alive_ms
                ),
            ));
        }
        if self.connect.receive_maximum == Some(0) {
            return Err(MqttClientError::invalid_config(
                "connect.receive_maximum",
                "must not be 0",
            ));
        }
        if self.connect.maximum_packet_size_bytes == Some(0) {
            return Err(MqttClientError::invalid_config(
                "connect.maximum_packet_size_bytes",
                "must not be 0",
            ));
        }
        if let Some(will) = &self.connect.will {
            validation::validate_topic_name(&will.topic, self.extended_validation)
                .map_err(|reason| MqttClientError::invalid_config("connect.will.topic", reason))?;
        }
        if let Some(client_id) = &self.connect.client_id {
            validation::validate_client_id(client_id, self.extended_validation)
                .map_err(|reason| MqttClientError::invalid_config("connect.client_id", reason))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let opts = MqttClientOptions::default();
        assert_eq!(opts.connect.keep_alive_interval_seconds, 1200);
        assert_eq!(opts.session_behavior, ClientSessionBehavior::Clean);
        assert_eq!(
            opts.offline_queue_behavior,
            OfflineQueuePolicy::FailQos0PublishOnDisconnect
        );
        assert_eq!(opts.retry_jitter_mode, JitterMode::Full);
        assert_eq!(opts.min_reconnect_delay_ms, 1000);
        assert_eq!(opts.max_reconnect_delay_ms, 120_000);
        assert_eq!(opts.min_connected_time_to_reset_reconnect_delay_ms, 30_000);
        assert_eq!(opts.ack_timeout_seconds, 60);
        assert_eq!(
            opts.topic_aliasing.outbound_behavior,
            OutboundTopicAliasBehavior::Disabled
        );
        assert_eq!(opts.topic_aliasing.outbound_cache_size(), 25);
        assert_eq!(opts.topic_aliasing.inbound_alias_maximum(), None);
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_option_codes() {
        assert_eq!(
            OfflineQueuePolicy::try_from(0).unwrap(),
            OfflineQueuePolicy::FailQos0PublishOnDisconnect
        );
        assert_eq!(
            OfflineQueuePolicy::try_from(3).unwrap(),
            OfflineQueuePolicy::FailAllOnDisconnect
        );
        assert_eq!(
            OutboundTopicAliasBehavior::try_from(2).unwrap(),
            OutboundTopicAliasBehavior::Lru
        );
        assert_eq!(
            ClientSessionBehavior::try_from(2).unwrap(),
            ClientSessionBehavior::RejoinPostSuccess
        );
        assert_eq!(JitterMode::try_from(1).unwrap(), JitterMode::None);

        let err = OfflineQueuePolicy::try_from(9).unwrap_err();
        assert!(err.is_fatal());
        assert!(matches!(
            JitterMode::try_from(3),
            Err(MqttClientError::InvalidConfiguration { .. })
        ));
    }

    #[test]
    fn test_from_json_partial() {
        let json = r#"{
            "host": "broker.example.com",
            "port": 8883,
            "offline_queue_behavior": "fail_all_on_disconnect",
            "retry_jitter_mode": "none",
            "connect": { "client_id": "sensor-7", "keep_alive_interval_seconds": 60 },
            "topic_aliasing": { "outbound_behavior": "lru", "outbound_cache_max_size": 4 }
        }"#;
        let opts = MqttClientOptions::from_json_str(json).unwrap();
        assert_eq!(opts.host, "broker.example.com");
        assert_eq!(opts.port, 8883);
        assert_eq!(
            opts.offline_queue_behavior,
            OfflineQueuePolicy::FailAllOnDisconnect
        );
        assert_eq!(opts.retry_jitter_mode, JitterMode::None);
        assert_eq!(opts.connect.client_id.as_deref(), Some("sensor-7"));
        assert_eq!(opts.connect.keep_alive_interval_seconds, 60);
        assert_eq!(opts.topic_aliasing.outbound_cache_size(), 4);
        // untouched fields keep their defaults
        assert_eq!(opts.connack_timeout_ms, DEFAULT_CONNACK_TIMEOUT_MS);
    }

    #[test]
    fn test_from_json_rejects_unknown_variant() {
        let err = MqttClientOptions::from_json_str(r#"{"retry_jitter_mode": "decorrelated"}"#)
            .unwrap_err();
        assert!(matches!(err, MqttClientError::InvalidConfiguration { .. }));
    }

    #[test]
    fn test_validate_reconnect_bounds() {
        let opts = MqttClientOptions {
            min_reconnect_delay_ms: 5000,
            max_reconnect_delay_ms: 1000,
            ..Default::default()
        };
        assert!(opts.validate().is_err());

        // a zero ceiling would retry in a tight loop
        let opts = MqttClientOptions {
            min_reconnect_delay_ms: 0,
            max_reconnect_delay_ms: 0,
            ..Default::default()
        };
        assert!(matches!(
            opts.validate(),
            Err(MqttClientError::InvalidConfiguration { ref field, .. }) if field == "max_reconnect_delay_ms"
        ));

        let opts = MqttClientOptions {
            min_reconnect_delay_ms: 0,
            max_reconnect_delay_ms: 1,
            ..Default::default()
        };
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_ping_timeout_against_keep_alive() {
        let mut opts = MqttClientOptions::default();
        opts.connect.keep_alive_interval_seconds = 10;
        opts.ping_timeout_ms = 10_000;
        assert!(opts.validate().is_err());

        opts.ping_timeout_ms = 5_000;
        assert!(opts.validate().is_ok());

        // keep-alive disabled
        opts.connect.keep_alive_interval_seconds = 0;
        opts.ping_timeout_ms = 60_000;
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_validate_client_id_for_iot_core() {
        let mut opts = MqttClientOptions {
            extended_validation: ExtendedValidation::AwsIotCoreDefaults,
            ..Default::default()
        };
        opts.connect.client_id = Some("x".repeat(129));
        assert!(opts.validate().is_err());

        opts.connect.client_id = Some("x".repeat(128));
        assert!(opts.validate().is_ok());
    }

    #[test]
    fn test_inbound_alias_maximum() {
        let aliasing = TopicAliasingOptions {
            inbound_behavior: InboundTopicAliasBehavior::Enabled,
            inbound_cache_max_size: 0,
            ..Default::default()
        };
        assert_eq!(aliasing.inbound_alias_maximum(), Some(25));
    }
}
