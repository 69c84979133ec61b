// SPDX-License-Identifier: MPL-2.0

use std::fmt;

use super::commands::QoS;
use super::opts::ConnectOptions;
use super::results::ConnAckPacket;

pub const DEFAULT_RECEIVE_MAXIMUM: u16 = 65_535;
/// Largest value a variable byte integer can hold, plus the fixed header.
pub const DEFAULT_MAXIMUM_PACKET_SIZE: u32 = 268_435_460;

/// Protocol parameters in force for one connection, merged from the broker's CONNACK, the
/// client's CONNECT and protocol defaults.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedSettings {
    pub maximum_qos: QoS,
    pub session_expiry_interval: u32,
    pub receive_maximum_from_server: u16,
    pub maximum_packet_size_to_server: u32,
    /// Highest alias the broker accepts from the client; 0 disables outbound aliasing.
    pub topic_alias_maximum_to_server: u16,
    /// Highest alias the client accepts from the broker; 0 when inbound aliasing is off.
    pub topic_alias_maximum_to_client: u16,
    pub server_keep_alive: u16,
    pub retain_available: bool,
    pub wildcard_subscriptions_available: bool,
    pub subscription_identifiers_available: bool,
    pub shared_subscriptions_available: bool,
    pub rejoined_session: bool,
    pub client_id: String,
}

impl NegotiatedSettings {
    /// Resolve settings for a new connection.
    ///
    /// Each field takes the CONNACK value when present, then the value requested in CONNECT
    /// where CONNECT carries one, then the protocol default. Limits the broker imposes on the
    /// client (receive maximum, maximum packet size) never fall back to CONNECT, which only
    /// carries the client's own limits. `previous_client_id` covers the case where neither
    /// side names a client id on a reconnect.
    pub fn resolve(
        connect: &ConnectOptions,
        topic_alias_maximum_to_client: Option<u16>,
        connack: &ConnAckPacket,
        previous_client_id: Option<&str>,
    ) -> Self {
        let client_id = connack
            .assigned_client_identifier
            .as_deref()
            .or(connect.client_id.as_deref())
            .or(previous_client_id)
            .unwrap_or_default()
            .to_string();

        NegotiatedSettings {
            maximum_qos: connack.maximum_qos.unwrap_or(QoS::ExactlyOnce),
            session_expiry_interval: connack
                .session_expiry_interval
                .or(connect.session_expiry_interval_seconds)
                .unwrap_or(0),
            receive_maximum_from_server: connack
                .receive_maximum
                .unwrap_or(DEFAULT_RECEIVE_MAXIMUM),
            maximum_packet_size_to_server: connack
                .maximum_packet_size
                .unwrap_or(DEFAULT_MAXIMUM_PACKET_SIZE),
            topic_alias_maximum_to_server: connack.topic_alias_maximum.unwrap_or(0),
            topic_alias_maximum_to_client: topic_alias_maximum_to_client.unwrap_or(0),
            server_keep_alive: connack
                .server_keep_alive
                .unwrap_or(connect.keep_alive_interval_seconds),
            retain_available: connack.retain_available.unwrap_or(true),
            wildcard_subscriptions_available: connack
                .wildcard_subscriptions_available
                .unwrap_or(true),
            subscription_identifiers_available: connack
                .subscription_identifiers_available
                .unwrap_or(true),
            shared_subscriptions_available: connack.shared_subscriptions_available.unwrap_or(true),
            rejoined_session: connack.session_present,
            client_id,
        }
    }
}

impl fmt::Display for NegotiatedSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "NegotiatedSettings {{")?;
        write!(f, " maximum_qos:{}", self.maximum_qos as u8)?;
        write!(f, " session_expiry_interval:{}", self.session_expiry_interval)?;
        write!(f, " receive_maximum_from_server:{}", self.receive_maximum_from_server)?;
        write!(f, " maximum_packet_size_to_server:{}", self.maximum_packet_size_to_server)?;
        write!(f, " topic_alias_maximum_to_server:{}", self.topic_alias_maximum_to_server)?;
        write!(f, " topic_alias_maximum_to_client:{}", self.topic_alias_maximum_to_client)?;
        write!(f, " server_keep_alive:{}", self.server_keep_alive)?;
        write!(f, " retain_available:{}", self.retain_available)?;
        write!(f, " wildcard_subscriptions_available:{}", self.wildcard_subscriptions_available)?;
        write!(f, " subscription_identifiers_available:{}", self.subscription_identifiers_available)?;
        write!(f, " shared_subscriptions_available:{}", self.shared_subscriptions_available)?;
        write!(f, " rejoined_session:{}", self.rejoined_session)?;
        write!(f, " client_id:{}", self.client_id)?;
        write!(f, " }}")
    }
}
