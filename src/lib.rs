// SPDX-License-Identifier: MPL-2.0

//! Connection lifecycle layer of an MQTT5 client.
//!
//! [`mqtt_client::MqttEngine`] is a sans-I/O state machine covering connection state,
//! reconnect backoff, offline queueing, topic aliasing, negotiated settings and pending
//! operations. [`mqtt_client::TokioAsyncMqttClient`] runs it on a tokio task against any
//! [`mqtt_client::TransportEngine`].

pub mod mqtt_client;
