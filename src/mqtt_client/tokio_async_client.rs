// SPDX-License-Identifier: MPL-2.0

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;
use tracing::{debug, trace};

use super::commands::{DisconnectPacket, PublishCommand, SubscribeCommand, UnsubscribeCommand};
use super::engine::MqttEngine;
use super::error::{MqttClientError, MqttClientResult};
use super::events::{EventDispatcher, ListenerId, MqttEventHandler, MqttEventListener};
use super::operation::{CompletionSender, OperationHandle};
use super::opts::MqttClientOptions;
use super::results::{PublishResult, SubAckPacket, UnsubAckPacket};
use super::statistics::{OperationStatistics, SharedOperationStatistics};
use super::transport::{TransportEngine, TransportEvent, TransportEventSender};

/// Requests from the client handle to its worker task.
enum TokioClientCommand {
    Start,
    Stop(Option<DisconnectPacket>),
    Publish(PublishCommand, CompletionSender<PublishResult>),
    Subscribe(SubscribeCommand, CompletionSender<SubAckPacket>),
    Unsubscribe(UnsubscribeCommand, CompletionSender<UnsubAckPacket>),
    AddListener(ListenerId, Box<dyn MqttEventListener>),
    RemoveListener(ListenerId),
    /// Stop the client and exit the worker
    Shutdown,
}

/// Configuration for the tokio async client
#[derive(Debug, Clone)]
pub struct TokioAsyncClientConfig {
    /// Queue size for pending commands
    pub command_queue_size: usize,
    /// Fixed seed for reconnect jitter, mostly useful in tests
    pub reconnect_seed: Option<u64>,
}

impl Default for TokioAsyncClientConfig {
    fn default() -> Self {
        TokioAsyncClientConfig {
            command_queue_size: 1000,
            reconnect_seed: None,
        }
    }
}

/// MQTT5 client running its lifecycle engine on a tokio task.
///
/// Every method only enqueues a command; all state lives on the worker task, which is the
/// single processing context for commands, transport events and timers. Event handler and
/// listener callbacks run on that task too.
pub struct TokioAsyncMqttClient {
    command_tx: mpsc::Sender<TokioClientCommand>,
    statistics: Arc<SharedOperationStatistics>,
    connected: Arc<AtomicBool>,
    next_listener_id: AtomicU64,
}

impl TokioAsyncMqttClient {
    /// Create a client and spawn its worker.
    ///
    /// `make_transport` receives the sender the transport engine reports its events through.
    /// Must be called within a tokio runtime.
    pub fn new<T, F>(
        options: MqttClientOptions,
        make_transport: F,
        event_handler: Box<dyn MqttEventHandler>,
        config: TokioAsyncClientConfig,
    ) -> MqttClientResult<Self>
    where
        T: TransportEngine + 'static,
        F: FnOnce(TransportEventSender) -> T,
    {
        let engine = match config.reconnect_seed {
            Some(seed) => MqttEngine::with_seed(options, seed)?,
            None => MqttEngine::new(options)?,
        };

        let (command_tx, command_rx) = mpsc::channel(config.command_queue_size);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let transport = make_transport(TransportEventSender::new(event_tx));

        let statistics = Arc::new(SharedOperationStatistics::default());
        let connected = Arc::new(AtomicBool::new(false));

        let worker = TokioClientWorker {
            engine,
            transport: Box::new(transport),
            dispatcher: EventDispatcher::new(event_handler),
            command_rx,
            event_rx,
            transport_open: true,
            statistics: statistics.clone(),
            connected: connected.clone(),
        };
        tokio::spawn(async move {
            worker.run().await;
        });

        Ok(TokioAsyncMqttClient {
            command_tx,
            statistics,
            connected,
            next_listener_id: AtomicU64::new(1),
        })
    }

    /// Create a client with the default worker configuration.
    pub fn with_default_config<T, F>(
        options: MqttClientOptions,
        make_transport: F,
        event_handler: Box<dyn MqttEventHandler>,
    ) -> MqttClientResult<Self>
    where
        T: TransportEngine + 'static,
        F: FnOnce(TransportEventSender) -> T,
    {
        Self::new(
            options,
            make_transport,
            event_handler,
            TokioAsyncClientConfig::default(),
        )
    }

    /// Start connecting; reconnects automatically until `stop()`.
    pub async fn start(&self) -> MqttClientResult<()> {
        self.send_command(TokioClientCommand::Start).await
    }

    /// Stop the client, sending `disconnect` first if a connection is up.
    pub async fn stop(&self, disconnect: Option<DisconnectPacket>) -> MqttClientResult<()> {
        self.send_command(TokioClientCommand::Stop(disconnect)).await
    }

    /// Submit a publish. The handle resolves when the operation completes or fails.
    pub async fn publish(
        &self,
        command: PublishCommand,
    ) -> MqttClientResult<OperationHandle<PublishResult>> {
        let (tx, handle) = OperationHandle::channel();
        self.send_command(TokioClientCommand::Publish(command, tx))
            .await?;
        Ok(handle)
    }

    pub async fn subscribe(
        &self,
        command: SubscribeCommand,
    ) -> MqttClientResult<OperationHandle<SubAckPacket>> {
        let (tx, handle) = OperationHandle::channel();
        self.send_command(TokioClientCommand::Subscribe(command, tx))
            .await?;
        Ok(handle)
    }

    pub async fn unsubscribe(
        &self,
        command: UnsubscribeCommand,
    ) -> MqttClientResult<OperationHandle<UnsubAckPacket>> {
        let (tx, handle) = OperationHandle::channel();
        self.send_command(TokioClientCommand::Unsubscribe(command, tx))
            .await?;
        Ok(handle)
    }

    /// Attach a listener. It observes events processed after this command, ahead of the
    /// client's handler; see [`MqttEventListener`] for publish consumption.
    pub async fn add_listener(
        &self,
        listener: Box<dyn MqttEventListener>,
    ) -> MqttClientResult<ListenerId> {
        let id = self.next_listener_id.fetch_add(1, Ordering::Relaxed);
        self.send_command(TokioClientCommand::AddListener(id, listener))
            .await?;
        Ok(id)
    }

    /// Detach a listener. Unknown ids are ignored.
    pub async fn remove_listener(&self, id: ListenerId) -> MqttClientResult<()> {
        self.send_command(TokioClientCommand::RemoveListener(id))
            .await
    }

    /// Snapshot of the operation counters as of the last processed input.
    pub fn get_operation_statistics(&self) -> OperationStatistics {
        self.statistics.load()
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    /// Stop the client and end the worker task.
    pub async fn shutdown(self) -> MqttClientResult<()> {
        self.send_command(TokioClientCommand::Shutdown).await
    }

    async fn send_command(&self, command: TokioClientCommand) -> MqttClientResult<()> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| MqttClientError::ChannelClosed {
                channel: "client commands".to_string(),
            })
    }
}

/// Worker task that owns the engine and the transport.
struct TokioClientWorker {
    engine: MqttEngine,
    transport: Box<dyn TransportEngine>,
    dispatcher: EventDispatcher,
    command_rx: mpsc::Receiver<TokioClientCommand>,
    event_rx: mpsc::UnboundedReceiver<TransportEvent>,
    transport_open: bool,
    statistics: Arc<SharedOperationStatistics>,
    connected: Arc<AtomicBool>,
}

fn now() -> Instant {
    tokio::time::Instant::now().into_std()
}

impl TokioClientWorker {
    /// Main loop: commands, transport events and engine timers.
    async fn run(mut self) {
        loop {
            let next_tick = self.engine.next_tick_at();

            tokio::select! {
                cmd = self.command_rx.recv() => {
                    match cmd {
                        Some(command) => {
                            if !self.handle_command(command) {
                                break;
                            }
                        }
                        None => {
                            // every client handle is gone
                            self.engine.stop(None, now());
                            self.flush();
                            break;
                        }
                    }
                }

                event = self.event_rx.recv(), if self.transport_open => {
                    match event {
                        Some(event) => self.engine.handle_transport_event(event, now()),
                        None => {
                            debug!("transport dropped its event sender");
                            self.transport_open = false;
                        }
                    }
                }

                _ = async {
                    match next_tick {
                        Some(at) => tokio::time::sleep_until(tokio::time::Instant::from_std(at)).await,
                        None => std::future::pending::<()>().await,
                    }
                } => {
                    trace!("engine tick");
                    self.engine.handle_tick(now());
                }
            }

            self.flush();
        }
        debug!("client worker exited");
    }

    /// Returns false when the worker should exit.
    fn handle_command(&mut self, command: TokioClientCommand) -> bool {
        let now = now();
        match command {
            TokioClientCommand::Start => self.engine.start(now),
            TokioClientCommand::Stop(disconnect) => self.engine.stop(disconnect, now),
            TokioClientCommand::Publish(command, tx) => {
                self.engine.publish_with_completion(command, tx, now)
            }
            TokioClientCommand::Subscribe(command, tx) => {
                self.engine.subscribe_with_completion(command, tx, now)
            }
            TokioClientCommand::Unsubscribe(command, tx) => {
                self.engine.unsubscribe_with_completion(command, tx, now)
            }
            TokioClientCommand::AddListener(id, listener) => {
                debug!(listener = id, "listener attached");
                self.dispatcher.add_listener(id, listener);
            }
            TokioClientCommand::RemoveListener(id) => {
                if self.dispatcher.remove_listener(id) {
                    debug!(listener = id, "listener removed");
                } else {
                    debug!(listener = id, "remove ignored, no such listener");
                }
            }
            TokioClientCommand::Shutdown => {
                self.engine.stop(None, now);
                self.flush();
                return false;
            }
        }
        true
    }

    /// Hand the engine's output to the transport, the listeners and the event handler.
    fn flush(&mut self) {
        self.statistics.store(&self.engine.operation_statistics());
        self.connected
            .store(self.engine.is_connected(), Ordering::Release);
        for request in self.engine.take_requests() {
            request.dispatch(self.transport.as_mut());
        }
        for event in self.engine.take_events() {
            self.dispatcher.dispatch(&event);
        }
    }
}
