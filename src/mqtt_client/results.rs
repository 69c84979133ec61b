// SPDX-License-Identifier: MPL-2.0

//! Packets received from the broker, as decoded by the transport engine, and the results
//! operations complete with.

use bytes::Bytes;

use super::commands::{PublishProperties, QoS};
use super::opts::UserProperty;

/// CONNACK contents. Every property is optional; absent values fall back to what the client
/// requested or to the protocol defaults when settings are resolved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ConnAckPacket {
    pub session_present: bool,
    pub reason_code: u8,
    pub session_expiry_interval: Option<u32>,
    pub receive_maximum: Option<u16>,
    pub maximum_qos: Option<QoS>,
    pub retain_available: Option<bool>,
    pub maximum_packet_size: Option<u32>,
    pub assigned_client_identifier: Option<String>,
    pub topic_alias_maximum: Option<u16>,
    pub reason_string: Option<String>,
    pub wildcard_subscriptions_available: Option<bool>,
    pub subscription_identifiers_available: Option<bool>,
    pub shared_subscriptions_available: Option<bool>,
    pub server_keep_alive: Option<u16>,
    pub response_information: Option<String>,
    pub server_reference: Option<String>,
    pub user_properties: Vec<UserProperty>,
}

impl ConnAckPacket {
    /// Reason codes below 0x80 indicate success.
    pub fn is_success(&self) -> bool {
        self.reason_code < 0x80
    }

    pub fn reason_description(&self) -> &'static str {
        connect_reason_description(self.reason_code)
    }
}

pub fn connect_reason_description(reason_code: u8) -> &'static str {
    match reason_code {
        0x00 => "Success",
        0x80 => "Unspecified error",
        0x81 => "Malformed packet",
        0x82 => "Protocol error",
        0x83 => "Implementation specific error",
        0x84 => "Unsupported protocol version",
        0x85 => "Client identifier not valid",
        0x86 => "Bad user name or password",
        0x87 => "Not authorized",
        0x88 => "Server unavailable",
        0x89 => "Server busy",
        0x8A => "Banned",
        0x8C => "Bad authentication method",
        0x90 => "Topic name invalid",
        0x95 => "Packet too large",
        0x97 => "Quota exceeded",
        0x99 => "Payload format invalid",
        0x9A => "Retain not supported",
        0x9B => "QoS not supported",
        0x9C => "Use another server",
        0x9D => "Server moved",
        0x9F => "Connection rate exceeded",
        _ => "Unknown reason code",
    }
}

/// PUBACK, or the PUBCOMP closing a QoS 2 exchange.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PublishAckPacket {
    pub reason_code: u8,
    pub reason_string: Option<String>,
    pub user_properties: Vec<UserProperty>,
}

impl PublishAckPacket {
    pub fn is_success(&self) -> bool {
        self.reason_code < 0x80
    }
}

/// Outcome of a completed publish. A negative broker reason code still completes the
/// operation; callers inspect the packet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublishResult {
    /// The publish was written to the connection.
    Qos0,
    Qos1(PublishAckPacket),
    Qos2(PublishAckPacket),
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SubAckPacket {
    /// One reason code per requested subscription.
    pub reason_codes: Vec<u8>,
    pub reason_string: Option<String>,
    pub user_properties: Vec<UserProperty>,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnsubAckPacket {
    pub reason_codes: Vec<u8>,
    pub reason_string: Option<String>,
    pub user_properties: Vec<UserProperty>,
}

/// Acknowledgment payloads the transport reports for a submitted operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperationAck {
    /// A QoS 0 publish was fully written to the socket.
    Qos0Written,
    PubAck(PublishAckPacket),
    PubComp(PublishAckPacket),
    SubAck(SubAckPacket),
    UnsubAck(UnsubAckPacket),
}

/// A PUBLISH received from the broker.
///
/// As delivered by the transport the topic may be empty when the broker used an alias; the
/// client resolves it before handing the packet to the application.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct InboundPublish {
    pub topic_name: String,
    pub topic_alias: Option<u16>,
    pub payload: Bytes,
    pub qos: QoS,
    pub retain: bool,
    pub dup: bool,
    pub subscription_identifiers: Vec<u32>,
    pub properties: PublishProperties,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connack_success() {
        let connack = ConnAckPacket::default();
        assert!(connack.is_success());
        assert_eq!(connack.reason_description(), "Success");

        let refused = ConnAckPacket {
            reason_code: 0x87,
            ..Default::default()
        };
        assert!(!refused.is_success());
        assert_eq!(refused.reason_description(), "Not authorized");
    }

    #[test]
    fn test_puback_reason() {
        assert!(PublishAckPacket::default().is_success());
        // 0x10: no matching subscribers is still a success
        assert!(PublishAckPacket {
            reason_code: 0x10,
            ..Default::default()
        }
        .is_success());
        assert!(!PublishAckPacket {
            reason_code: 0x97,
            ..Default::default()
        }
        .is_success());
    }
}
