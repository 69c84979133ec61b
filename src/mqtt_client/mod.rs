// SPDX-License-Identifier: MPL-2.0

pub mod commands;
pub mod engine;
pub mod error;
pub mod events;
pub mod inflight;
pub mod offline_queue;
pub mod operation;
pub mod opts;
pub mod reconnect;
pub mod results;
pub mod settings;
pub mod statistics;
pub mod tokio_async_client;
pub mod topic_alias;
pub mod transport;
pub mod validation;

pub use commands::{
    DisconnectPacket, OperationKind, PublishCommand, QoS, SubscribeCommand, TopicSubscription,
    UnsubscribeCommand,
};
pub use engine::{ClientState, MqttEngine};
pub use error::{MqttClientError, MqttClientResult};
pub use events::{
    ChannelEventHandler, ClientEvent, ConnectionFailureEvent, ConnectionSuccessEvent,
    DisconnectionEvent, EventDispatcher, ListenerId, MqttEventHandler, MqttEventListener,
    NoopEventHandler,
};
pub use operation::{OperationHandle, OperationId};
pub use opts::{
    ClientSessionBehavior, ExtendedValidation, InboundTopicAliasBehavior, JitterMode,
    MqttClientOptions, OfflineQueuePolicy, OutboundTopicAliasBehavior, TopicAliasingOptions,
};
pub use results::{
    ConnAckPacket, InboundPublish, OperationAck, PublishAckPacket, PublishResult, SubAckPacket,
    UnsubAckPacket,
};
pub use settings::NegotiatedSettings;
pub use statistics::OperationStatistics;
pub use tokio_async_client::{TokioAsyncClientConfig, TokioAsyncMqttClient};
pub use transport::{
    ChannelTransport, ConnectRequest, ConnectionId, TransportEngine, TransportEvent,
    TransportEventSender, TransportRequest,
};
