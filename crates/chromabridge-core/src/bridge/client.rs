//! Connection manager for the persistent companion channel
//!
//! Owns the single channel instance and all mutable connection state:
//! resolved endpoint, readiness, and the outbound queue. Everything runs on
//! one logical task, so single-writer access needs no locking. Channel
//! failures are never surfaced to the caller; the client degrades to "not
//! yet connected, will keep trying" with a fixed retry delay and no cap.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info, warn};

use super::dispatch::{Dispatcher, NotificationSurface};
use super::protocol::{LogLevel, LogRecord};
use super::queue::OutboundQueue;
use super::transport::{BridgeChannel, ChannelTransport};
use crate::config::AppConfig;
use crate::discovery::{Endpoint, PortResolver};
use crate::Result;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    Disconnected,
    Connecting,
    Open,
    Closing,
}

pub struct BridgeClient {
    transport: Arc<dyn ChannelTransport>,
    dispatcher: Dispatcher,
    resolver: PortResolver,
    endpoint: Option<Endpoint>,
    channel: Option<Box<dyn BridgeChannel>>,
    state: ChannelState,
    queue: OutboundQueue,
    retry_delay: Duration,
    default_port: u16,
}

impl BridgeClient {
    pub fn new(
        config: &AppConfig,
        transport: Arc<dyn ChannelTransport>,
        surface: Arc<dyn NotificationSurface>,
    ) -> Result<Self> {
        Ok(Self {
            transport,
            dispatcher: Dispatcher::new(surface),
            resolver: PortResolver::new(config)?,
            endpoint: None,
            channel: None,
            state: ChannelState::Disconnected,
            queue: OutboundQueue::new(),
            retry_delay: Duration::from_millis(config.bridge.retry_delay_ms),
            default_port: config.discovery.default_port,
        })
    }

    /// Pin the endpoint up front, skipping discovery in `init`
    pub fn with_endpoint(mut self, endpoint: Endpoint) -> Self {
        self.endpoint = Some(endpoint);
        self
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn endpoint(&self) -> Option<&Endpoint> {
        self.endpoint.as_ref()
    }

    pub fn queued_messages(&self) -> usize {
        self.queue.len()
    }

    /// Host lifecycle hook; invoked once when the host environment is ready.
    ///
    /// Resolves the companion endpoint. Discovery failure is degraded mode:
    /// the configured default port is used and the retry loop keeps trying.
    pub async fn init(&mut self) {
        self.log(LogLevel::Info, "Initializing bridge client", None).await;

        if self.endpoint.is_none() {
            match self.resolver.resolve().await {
                Ok(endpoint) => {
                    info!(port = endpoint.port, "resolved bridge endpoint");
                    self.endpoint = Some(endpoint);
                }
                Err(e) => {
                    warn!(
                        default_port = self.default_port,
                        "bridge discovery failed, using default port: {e}"
                    );
                    self.log(
                        LogLevel::Warn,
                        "Failed to load bridge port, using default",
                        Some(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await;
                    self.endpoint = Some(Endpoint::loopback(self.default_port));
                }
            }
        }

        self.log(LogLevel::Info, "Bridge client initialized", None).await;
    }

    /// Open the channel if no live one exists. Idempotent: a `Connecting`
    /// or `Open` channel means no further construction happens.
    pub async fn ensure_connected(&mut self) {
        if matches!(self.state, ChannelState::Connecting | ChannelState::Open) {
            return;
        }
        let Some(endpoint) = self.endpoint.clone() else {
            warn!("ensure_connected called before init resolved an endpoint");
            return;
        };

        self.state = ChannelState::Connecting;
        match self.transport.connect(&endpoint).await {
            Ok(channel) => {
                info!(port = endpoint.port, "bridge channel connected");
                self.channel = Some(channel);
                // Queue the connect notice before flipping readiness so it
                // flushes in order with anything buffered during the outage.
                self.push_log(LogLevel::Info, "WebSocket bridge connected", None);
                self.state = ChannelState::Open;
                self.flush_queue().await;
            }
            Err(e) => {
                error!(port = endpoint.port, "failed to open bridge channel: {e}");
                self.push_log(
                    LogLevel::Error,
                    "Failed to setup WebSocket bridge",
                    Some(serde_json::json!({ "error": e.to_string() })),
                );
                self.channel = None;
                self.state = ChannelState::Disconnected;
            }
        }
    }

    /// Read inbound frames until the channel closes.
    ///
    /// Per-message decode failures are logged and dropped; the channel stays
    /// open. Transport errors are logged as warnings, matching the close
    /// handler's recovery path.
    pub async fn pump(&mut self) {
        loop {
            let message = match self.channel.as_mut() {
                Some(channel) => channel.recv().await,
                None => break,
            };

            match message {
                Some(Ok(text)) => self.handle_message(&text).await,
                Some(Err(e)) => {
                    self.log(
                        LogLevel::Warn,
                        "WebSocket bridge error",
                        Some(serde_json::json!({ "error": e.to_string() })),
                    )
                    .await;
                }
                None => {
                    info!("bridge channel closed, scheduling reconnect");
                    self.channel = None;
                    self.state = ChannelState::Disconnected;
                    self.push_log(LogLevel::Info, "WebSocket bridge closed, reconnecting...", None);
                    break;
                }
            }
        }
    }

    /// Drive connect, pump, and fixed-delay retry until shutdown
    pub async fn run(&mut self, mut shutdown: watch::Receiver<bool>) {
        loop {
            self.ensure_connected().await;

            if self.state == ChannelState::Open {
                tokio::select! {
                    () = self.pump() => {}
                    changed = shutdown.changed() => {
                        // a dropped sender counts as shutdown
                        if changed.is_err() || *shutdown.borrow() {
                            self.shutdown().await;
                            return;
                        }
                    }
                }
            }

            tokio::select! {
                () = tokio::time::sleep(self.retry_delay) => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.shutdown().await;
                        return;
                    }
                }
            }
        }
    }

    /// Gracefully close the channel
    pub async fn shutdown(&mut self) {
        self.state = ChannelState::Closing;
        if let Some(mut channel) = self.channel.take() {
            channel.close().await;
        }
        self.state = ChannelState::Disconnected;
        info!("bridge client shut down");
    }

    /// Bridge log sink: send immediately when the channel is open, queue
    /// otherwise. Never blocks the caller and never raises; each record is
    /// also mirrored to the local diagnostic log.
    pub async fn log(
        &mut self,
        level: LogLevel,
        message: &str,
        data: Option<serde_json::Value>,
    ) {
        Self::mirror(level, message);

        let mut record = LogRecord::new(level, message);
        if let Some(data) = data {
            record = record.with_data(data);
        }
        self.deliver(record).await;
    }

    /// Echo a record to the local diagnostic log
    fn mirror(level: LogLevel, message: &str) {
        match level {
            LogLevel::Info => info!("{message}"),
            LogLevel::Warn => warn!("{message}"),
            LogLevel::Error => error!("{message}"),
        }
    }

    /// Serialize and enqueue a record without attempting a send
    fn push_log(&mut self, level: LogLevel, message: &str, data: Option<serde_json::Value>) {
        let mut record = LogRecord::new(level, message);
        if let Some(data) = data {
            record = record.with_data(data);
        }
        match record.to_json() {
            Ok(serialized) => self.queue.push(serialized),
            Err(e) => warn!("failed to serialize bridge log record: {e}"),
        }
    }

    async fn deliver(&mut self, record: LogRecord) {
        let serialized = match record.to_json() {
            Ok(serialized) => serialized,
            Err(e) => {
                warn!("failed to serialize bridge log record: {e}");
                return;
            }
        };

        if self.state == ChannelState::Open {
            if let Some(channel) = self.channel.as_mut() {
                match channel.send(&serialized).await {
                    Ok(()) => return,
                    Err(e) => warn!("bridge send failed, queueing record: {e}"),
                }
            }
        }
        self.queue.push(serialized);
    }

    /// Drain the queue head-first; an entry leaves the queue only after its
    /// send succeeds, so a mid-flush failure keeps the remainder for the
    /// next flush.
    async fn flush_queue(&mut self) {
        if self.state != ChannelState::Open || self.queue.is_empty() {
            return;
        }
        let Some(channel) = self.channel.as_mut() else {
            return;
        };

        while let Some(message) = self.queue.front() {
            match channel.send(message).await {
                Ok(()) => {
                    self.queue.pop_front();
                }
                Err(e) => {
                    warn!("bridge flush interrupted: {e}");
                    break;
                }
            }
        }
    }

    async fn handle_message(&mut self, raw: &str) {
        match self.dispatcher.dispatch(raw) {
            Ok(record) => {
                Self::mirror(record.level, &record.message);
                self.deliver(record).await;
            }
            Err(e) => {
                self.log(
                    LogLevel::Error,
                    "Failed to parse bridge message",
                    Some(serde_json::json!({ "error": e.to_string() })),
                )
                .await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use async_trait::async_trait;

    use crate::Error;

    #[derive(Default)]
    struct RecordingSurface {
        shown: Mutex<Vec<String>>,
    }

    impl NotificationSurface for RecordingSurface {
        fn show(&self, text: &str) {
            self.shown.lock().unwrap().push(text.to_string());
        }
    }

    /// What a scripted channel does after its inbound messages run out
    #[derive(Clone, Copy)]
    enum AfterInbound {
        Close,
        StayOpen,
    }

    struct MockChannel {
        sent: Arc<Mutex<Vec<String>>>,
        inbound: VecDeque<String>,
        after: AfterInbound,
    }

    #[async_trait]
    impl BridgeChannel for MockChannel {
        async fn send(&mut self, message: &str) -> crate::Result<()> {
            self.sent.lock().unwrap().push(message.to_string());
            Ok(())
        }

        async fn recv(&mut self) -> Option<crate::Result<String>> {
            if let Some(message) = self.inbound.pop_front() {
                return Some(Ok(message));
            }
            match self.after {
                AfterInbound::Close => None,
                AfterInbound::StayOpen => std::future::pending().await,
            }
        }

        async fn close(&mut self) {}
    }

    struct MockTransport {
        connects: AtomicUsize,
        fail_first: usize,
        sent: Arc<Mutex<Vec<String>>>,
        inbound: Mutex<VecDeque<String>>,
        after: AfterInbound,
    }

    impl MockTransport {
        fn new(after: AfterInbound) -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                fail_first: 0,
                sent: Arc::new(Mutex::new(Vec::new())),
                inbound: Mutex::new(VecDeque::new()),
                after,
            })
        }

        fn failing_first(after: AfterInbound, failures: usize) -> Arc<Self> {
            Arc::new(Self {
                connects: AtomicUsize::new(0),
                fail_first: failures,
                sent: Arc::new(Mutex::new(Vec::new())),
                inbound: Mutex::new(VecDeque::new()),
                after,
            })
        }

        fn push_inbound(&self, message: &str) {
            self.inbound.lock().unwrap().push_back(message.to_string());
        }

        fn connect_count(&self) -> usize {
            self.connects.load(Ordering::SeqCst)
        }

        fn sent_messages(&self) -> Vec<String> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChannelTransport for MockTransport {
        async fn connect(&self, _endpoint: &Endpoint) -> crate::Result<Box<dyn BridgeChannel>> {
            let attempt = self.connects.fetch_add(1, Ordering::SeqCst);
            if attempt < self.fail_first {
                return Err(Error::Channel("connection refused".to_string()));
            }
            Ok(Box::new(MockChannel {
                sent: self.sent.clone(),
                inbound: std::mem::take(&mut *self.inbound.lock().unwrap()),
                after: self.after,
            }))
        }
    }

    fn test_config(retry_delay_ms: u64) -> AppConfig {
        let mut config = AppConfig::default();
        config.general.data_dir =
            std::env::temp_dir().join(format!("chromabridge-client-{}", std::process::id()));
        config.bridge.retry_delay_ms = retry_delay_ms;
        config
    }

    fn client_with(
        transport: Arc<MockTransport>,
        surface: Arc<RecordingSurface>,
    ) -> BridgeClient {
        BridgeClient::new(&test_config(10), transport, surface)
            .unwrap()
            .with_endpoint(Endpoint::loopback(50004))
    }

    #[tokio::test]
    async fn test_ensure_connected_is_idempotent() {
        let transport = MockTransport::new(AfterInbound::StayOpen);
        let mut client = client_with(transport.clone(), Arc::new(RecordingSurface::default()));

        client.ensure_connected().await;
        assert_eq!(client.state(), ChannelState::Open);
        assert_eq!(transport.connect_count(), 1);

        client.ensure_connected().await;
        client.ensure_connected().await;
        assert_eq!(transport.connect_count(), 1);
    }

    #[tokio::test]
    async fn test_queue_flushes_fifo_on_connect() {
        let transport = MockTransport::new(AfterInbound::StayOpen);
        let mut client = client_with(transport.clone(), Arc::new(RecordingSurface::default()));

        client.log(LogLevel::Info, "first", None).await;
        client.log(LogLevel::Info, "second", None).await;
        assert_eq!(client.queued_messages(), 2);

        client.ensure_connected().await;
        assert_eq!(client.queued_messages(), 0);

        let sent = transport.sent_messages();
        assert_eq!(sent.len(), 3);
        assert!(sent[0].contains("\"message\":\"first\""));
        assert!(sent[1].contains("\"message\":\"second\""));
        assert!(sent[2].contains("\"message\":\"WebSocket bridge connected\""));
    }

    #[tokio::test]
    async fn test_open_channel_sends_directly() {
        let transport = MockTransport::new(AfterInbound::StayOpen);
        let mut client = client_with(transport.clone(), Arc::new(RecordingSurface::default()));

        client.ensure_connected().await;
        client.log(LogLevel::Warn, "live message", None).await;

        assert_eq!(client.queued_messages(), 0);
        let sent = transport.sent_messages();
        assert!(sent.last().unwrap().contains("\"message\":\"live message\""));
        assert!(sent.last().unwrap().contains("\"level\":\"warn\""));
    }

    #[tokio::test]
    async fn test_inbound_event_reaches_surface_and_log() {
        let transport = MockTransport::new(AfterInbound::Close);
        transport.push_inbound(r#"{"type":"historic-state","historicSkinName":"SomeSkin"}"#);
        let surface = Arc::new(RecordingSurface::default());
        let mut client = client_with(transport.clone(), surface.clone());

        client.ensure_connected().await;
        client.pump().await;

        assert_eq!(*surface.shown.lock().unwrap(), vec!["SomeSkin"]);
        // exactly one event log record went out for the dispatched event
        let event_logs: Vec<_> = transport
            .sent_messages()
            .into_iter()
            .filter(|m| m.contains("bridge event received"))
            .collect();
        assert_eq!(event_logs.len(), 1);
        assert!(event_logs[0].contains("SomeSkin"));
    }

    /// Collects subscriber output so a test can assert on mirrored records
    struct CaptureWriter(Arc<Mutex<Vec<u8>>>);

    impl std::io::Write for CaptureWriter {
        fn write(&mut self, data: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(data);
            Ok(data.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_inbound_event_is_mirrored_to_local_log() {
        use tracing::instrument::WithSubscriber;

        let buf: Arc<Mutex<Vec<u8>>> = Arc::new(Mutex::new(Vec::new()));
        let writer_buf = buf.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_ansi(false)
            .with_writer(move || CaptureWriter(writer_buf.clone()))
            .finish();

        let transport = MockTransport::new(AfterInbound::Close);
        transport.push_inbound(r#"{"type":"historic-state","historicSkinName":"SomeSkin"}"#);
        let surface = Arc::new(RecordingSurface::default());

        async {
            let mut client = client_with(transport, surface);
            client.ensure_connected().await;
            client.pump().await;
        }
        .with_subscriber(subscriber)
        .await;

        let output = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        assert!(output.contains("bridge event received"));
    }

    #[tokio::test]
    async fn test_malformed_inbound_keeps_channel_open() {
        let transport = MockTransport::new(AfterInbound::StayOpen);
        transport.push_inbound("garbage");
        transport.push_inbound(r#"{"type":"historic-state","historicSkinName":"None"}"#);
        let surface = Arc::new(RecordingSurface::default());
        let mut client = client_with(transport.clone(), surface.clone());

        client.ensure_connected().await;
        let pump = client.pump();
        // the channel stays open after the bad frame, so pump never returns
        let timed_out = tokio::time::timeout(Duration::from_millis(50), pump).await.is_err();
        assert!(timed_out);

        // the bad frame was logged and the following frame still dispatched
        assert_eq!(*surface.shown.lock().unwrap(), vec!["unknown"]);
        assert!(transport
            .sent_messages()
            .iter()
            .any(|m| m.contains("Failed to parse bridge message")));
    }

    #[tokio::test]
    async fn test_close_disconnects_and_queues_notice() {
        let transport = MockTransport::new(AfterInbound::Close);
        let mut client = client_with(transport.clone(), Arc::new(RecordingSurface::default()));

        client.ensure_connected().await;
        client.pump().await;

        assert_eq!(client.state(), ChannelState::Disconnected);
        // the close notice waits in the queue for the next flush
        assert_eq!(client.queued_messages(), 1);
    }

    #[tokio::test]
    async fn test_retry_until_success_then_stop() {
        let failures = 3;
        let transport = MockTransport::failing_first(AfterInbound::StayOpen, failures);
        let client_transport = transport.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut client = client_with(client_transport, Arc::new(RecordingSurface::default()));
            client.run(shutdown_rx).await;
        });

        // each failed attempt schedules exactly one retry; wait until the
        // successful attempt lands
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while transport.connect_count() < failures + 1 {
            assert!(tokio::time::Instant::now() < deadline, "retries never succeeded");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        // no further construction once the channel is open
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(transport.connect_count(), failures + 1);
        assert!(transport
            .sent_messages()
            .iter()
            .any(|m| m.contains("WebSocket bridge connected")));

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_run_reconnects_after_close() {
        // every connect yields a channel that closes immediately
        let transport = MockTransport::new(AfterInbound::Close);
        let client_transport = transport.clone();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut client = client_with(client_transport, Arc::new(RecordingSurface::default()));
            client.run(shutdown_rx).await;
        });

        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        while transport.connect_count() < 3 {
            assert!(tokio::time::Instant::now() < deadline, "no reconnect after close");
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_init_falls_back_to_default_port_when_discovery_exhausts() {
        // default config scans 50000-50010; nothing is listening there in
        // the test environment, and refused connections fail fast
        let transport = MockTransport::new(AfterInbound::StayOpen);
        let mut config = test_config(10);
        config.discovery.start_port = 1;
        config.discovery.end_port = 1;
        config.discovery.default_port = 50000;
        let mut client = BridgeClient::new(
            &config,
            transport,
            Arc::new(RecordingSurface::default()),
        )
        .unwrap();

        client.init().await;

        assert_eq!(client.endpoint(), Some(&Endpoint::loopback(50000)));
        // the warning about degraded mode is queued for delivery
        assert!(client.queued_messages() >= 1);
    }
}
