//! Connection lifecycle controller
//!
//! The controller is the state machine at the heart of the viewer. All
//! inputs — configuration changes, negotiation outcomes, transport state
//! callbacks, retry timers, manual reconnects — arrive as [`ViewerEvent`]s
//! on a single queue consumed by one task, so no two transitions execute
//! concurrently. Session-scoped events carry the attempt generation that
//! produced them; events from a superseded or torn-down attempt are
//! discarded instead of resurrecting a closed session.

use crate::config::{ViewerConfig, ViewerOptions};
use crate::latency::LatencyMonitor;
use crate::reconnect::RetryScheduler;
use crate::session::Session;
use crate::signaling::{Negotiator, SignalingClient};
use crate::sink::RenderSink;
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use webrtc::track::track_remote::TrackRemote;

/// Displayed connection status
///
/// Exactly one value is active at a time; transitions are driven solely by
/// the controller. Raw transport state labels are published separately via
/// [`ViewerController::transport_label`].
#[derive(Debug, Clone, PartialEq)]
pub enum ViewerStatus {
    /// Controller has shut down
    Disconnected,
    /// Configuration is missing the server url or stream name
    WaitingForConfig,
    /// Connection attempt in progress
    Connecting,
    /// Media session negotiated
    Connected,
    /// Attempt failed, retry timer armed
    Retrying {
        /// Seconds until the retry fires
        delay_secs: u64,
    },
    /// Attempt failed with the given message
    Error(String),
}

impl std::fmt::Display for ViewerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewerStatus::Disconnected => write!(f, "disconnected"),
            ViewerStatus::WaitingForConfig => write!(f, "waiting for configuration"),
            ViewerStatus::Connecting => write!(f, "connecting"),
            ViewerStatus::Connected => write!(f, "connected"),
            ViewerStatus::Retrying { delay_secs } => write!(f, "retrying in {}s", delay_secs),
            ViewerStatus::Error(message) => write!(f, "error: {}", message),
        }
    }
}

/// Events driving the controller state machine
pub enum ViewerEvent {
    /// The host changed the server url or stream name
    ConfigChanged(ViewerConfig),
    /// The user forced a reconnect without a failure
    ManualReconnect,
    /// The spawned negotiation flow for an attempt finished
    NegotiationFinished {
        /// Attempt that ran the negotiation
        generation: u64,
        /// Outcome of offer/exchange/answer
        result: crate::Result<()>,
    },
    /// A remote media track arrived
    TrackArrived {
        /// Attempt whose session produced the track
        generation: u64,
        /// The incoming track
        track: Arc<TrackRemote>,
    },
    /// Connection or ICE state changed on the session
    TransportState {
        /// Attempt whose session reported the change
        generation: u64,
        /// Raw state label for display
        label: String,
        /// Whether the state is a terminal failure
        failed: bool,
    },
    /// The armed retry timer fired
    RetryElapsed {
        /// Attempt that armed the timer
        generation: u64,
    },
    /// Tear everything down and stop the controller task
    Shutdown,
}

impl std::fmt::Debug for ViewerEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewerEvent::ConfigChanged(config) => {
                write!(f, "ConfigChanged({}/{})", config.url, config.stream)
            }
            ViewerEvent::ManualReconnect => write!(f, "ManualReconnect"),
            ViewerEvent::NegotiationFinished { generation, result } => {
                write!(f, "NegotiationFinished(gen {}, ok={})", generation, result.is_ok())
            }
            ViewerEvent::TrackArrived { generation, .. } => {
                write!(f, "TrackArrived(gen {})", generation)
            }
            ViewerEvent::TransportState {
                generation,
                label,
                failed,
            } => write!(f, "TransportState(gen {}, {}, failed={})", generation, label, failed),
            ViewerEvent::RetryElapsed { generation } => {
                write!(f, "RetryElapsed(gen {})", generation)
            }
            ViewerEvent::Shutdown => write!(f, "Shutdown"),
        }
    }
}

/// Handle to a running viewer controller
///
/// Spawns the controller task and exposes the narrow operations the host
/// panel needs: push configuration, force a reconnect, observe status.
pub struct ViewerController {
    events: mpsc::UnboundedSender<ViewerEvent>,
    status: watch::Receiver<ViewerStatus>,
    transport: watch::Receiver<String>,
    drift: watch::Receiver<f64>,
    handle: JoinHandle<()>,
}

impl ViewerController {
    /// Spawn a controller using HTTP signaling and default timings
    pub fn new(sink: Arc<dyn RenderSink>) -> Self {
        Self::spawn(sink, Arc::new(SignalingClient::new()), ViewerOptions::default())
    }

    /// Spawn a controller with an explicit negotiator and timings
    pub fn spawn(
        sink: Arc<dyn RenderSink>,
        negotiator: Arc<dyn Negotiator>,
        options: ViewerOptions,
    ) -> Self {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ViewerStatus::WaitingForConfig);
        let (transport_tx, transport_rx) = watch::channel(String::new());
        let (drift_tx, drift_rx) = watch::channel(0.0);

        let task = ControllerTask {
            retry: RetryScheduler::new(options.retry_delay, events_tx.clone()),
            options,
            config: ViewerConfig::default(),
            negotiator,
            sink,
            session: None,
            monitor: None,
            track_attached: false,
            generation: 0,
            events: events_tx.clone(),
            status: status_tx,
            transport: transport_tx,
            drift: Arc::new(drift_tx),
        };

        let handle = tokio::spawn(task.run(events_rx));

        Self {
            events: events_tx,
            status: status_rx,
            transport: transport_rx,
            drift: drift_rx,
            handle,
        }
    }

    /// Push a configuration change
    ///
    /// Tears down any existing session; an incomplete configuration parks
    /// the controller in [`ViewerStatus::WaitingForConfig`].
    pub fn set_config(&self, config: ViewerConfig) {
        let _ = self.events.send(ViewerEvent::ConfigChanged(config));
    }

    /// Force a full reconnect even if no failure occurred
    pub fn reconnect(&self) {
        let _ = self.events.send(ViewerEvent::ManualReconnect);
    }

    /// Observe the displayed connection status
    pub fn status(&self) -> watch::Receiver<ViewerStatus> {
        self.status.clone()
    }

    /// Observe raw connection/ICE state labels as the transport reports them
    pub fn transport_label(&self) -> watch::Receiver<String> {
        self.transport.clone()
    }

    /// Observe the latest playback drift sample, in seconds
    pub fn drift(&self) -> watch::Receiver<f64> {
        self.drift.clone()
    }

    /// Tear down the session and stop the controller task
    pub async fn shutdown(self) {
        let _ = self.events.send(ViewerEvent::Shutdown);
        let _ = self.handle.await;
    }
}

/// Controller task state: exclusively owns the session handle, the retry
/// scheduler and the latency monitor
struct ControllerTask {
    options: ViewerOptions,
    config: ViewerConfig,
    negotiator: Arc<dyn Negotiator>,
    sink: Arc<dyn RenderSink>,
    session: Option<Session>,
    monitor: Option<LatencyMonitor>,
    track_attached: bool,
    /// Attempt counter; bumped on every entry into Connecting
    generation: u64,
    retry: RetryScheduler,
    events: mpsc::UnboundedSender<ViewerEvent>,
    status: watch::Sender<ViewerStatus>,
    transport: watch::Sender<String>,
    drift: Arc<watch::Sender<f64>>,
}

impl ControllerTask {
    async fn run(mut self, mut events: mpsc::UnboundedReceiver<ViewerEvent>) {
        while let Some(event) = events.recv().await {
            if !self.on_event(event).await {
                break;
            }
        }

        self.teardown().await;
        self.set_status(ViewerStatus::Disconnected);
    }

    /// Single transition function; returns `false` to stop the task
    async fn on_event(&mut self, event: ViewerEvent) -> bool {
        debug!(?event, "handling event");

        match event {
            ViewerEvent::ConfigChanged(config) => {
                if config == self.config {
                    debug!("configuration unchanged, ignoring");
                    return true;
                }
                self.config = config;
                self.restart().await;
            }

            ViewerEvent::ManualReconnect => {
                self.restart().await;
            }

            ViewerEvent::RetryElapsed { generation } => {
                // A retry that fired before teardown could cancel it is
                // recognized by the cleared armed flag and must not start
                // an attempt; the generation check alone cannot catch it
                // because teardown does not advance the counter.
                if generation != self.generation || !self.retry.is_armed() {
                    debug!(generation, "stale retry, discarding");
                    return true;
                }
                self.retry.disarm();
                self.begin_attempt().await;
            }

            ViewerEvent::NegotiationFinished { generation, result } => {
                if self.is_stale(generation) {
                    debug!(generation, "stale negotiation result, discarding");
                    return true;
                }
                match result {
                    Ok(()) => {
                        info!(generation, "media session negotiated");
                        self.set_status(ViewerStatus::Connected);
                    }
                    Err(e) => self.fail_attempt(e),
                }
            }

            ViewerEvent::TrackArrived { generation, track } => {
                if self.is_stale(generation) {
                    return true;
                }
                if self.track_attached {
                    debug!(generation, "additional track ignored, sink already fed");
                    return true;
                }
                info!(generation, "attaching incoming media to render sink");
                self.sink.attach(track);
                self.track_attached = true;
                self.monitor = Some(LatencyMonitor::start(
                    self.sink.clone(),
                    self.options.sample_interval,
                    self.options.max_drift_secs,
                    self.drift.clone(),
                ));
            }

            ViewerEvent::TransportState {
                generation,
                label,
                failed,
            } => {
                if self.is_stale(generation) {
                    return true;
                }
                self.transport.send_replace(label.clone());
                if failed {
                    self.fail_attempt(transport_error(&label));
                }
            }

            ViewerEvent::Shutdown => return false,
        }

        true
    }

    /// Whether a session-scoped event belongs to a superseded or torn-down
    /// attempt
    ///
    /// The generation comparison catches events from earlier attempts; the
    /// comparison being against the live session catches events arriving
    /// after teardown but before any new attempt started.
    fn is_stale(&self, generation: u64) -> bool {
        self.session.as_ref().map(Session::generation) != Some(generation)
    }

    /// Tear down and re-enter the state machine from the configuration gate
    async fn restart(&mut self) {
        self.teardown().await;

        if !self.config.is_complete() {
            self.set_status(ViewerStatus::WaitingForConfig);
            return;
        }

        self.begin_attempt().await;
    }

    /// Enter Connecting: fresh session, offer committed, negotiation spawned
    async fn begin_attempt(&mut self) {
        self.teardown().await;

        self.generation += 1;
        let generation = self.generation;

        info!(
            generation,
            url = %self.config.url,
            stream = %self.config.stream,
            "starting connection attempt"
        );
        self.set_status(ViewerStatus::Connecting);

        let session = match Session::new(generation, self.events.clone()).await {
            Ok(session) => session,
            Err(e) => {
                self.fail_attempt(e);
                return;
            }
        };
        self.session = Some(session.clone());

        // The offer/exchange/answer sequence suspends on the network; it
        // runs as its own task so the event queue stays responsive. Its
        // outcome re-enters the queue tagged with this attempt's generation
        // and is discarded there if the attempt was superseded meanwhile.
        let negotiator = Arc::clone(&self.negotiator);
        let base_url = self.config.normalized_url().to_string();
        let stream = self.config.stream.clone();
        let events = self.events.clone();
        tokio::spawn(async move {
            let result = negotiate(&session, negotiator.as_ref(), &base_url, &stream).await;
            let _ = events.send(ViewerEvent::NegotiationFinished { generation, result });
        });
    }

    /// Record a failed attempt and arm the retry timer
    ///
    /// Duplicate failure reports for the same outage (connection state and
    /// ICE state both firing) collapse into the one already-armed retry.
    fn fail_attempt(&mut self, error: crate::Error) {
        if self.retry.is_armed() {
            debug!(%error, "attempt already failed, retry pending");
            return;
        }

        warn!(%error, "connection attempt failed");
        self.set_status(ViewerStatus::Error(error.to_string()));

        self.retry.schedule(self.generation);
        self.set_status(ViewerStatus::Retrying {
            delay_secs: self.retry.delay().as_secs(),
        });
    }

    /// Tear down the current attempt; runs on every exit path and is
    /// idempotent
    async fn teardown(&mut self) {
        self.retry.cancel();

        if let Some(monitor) = self.monitor.take() {
            monitor.stop();
        }
        self.track_attached = false;

        if let Some(session) = self.session.take() {
            if let Err(e) = session.close().await {
                warn!(error = %e, "error closing session during teardown");
            }
        }
    }

    fn set_status(&self, status: ViewerStatus) {
        self.status.send_if_modified(|current| {
            if *current == status {
                return false;
            }
            debug!(from = %current, to = %status, "status transition");
            *current = status;
            true
        });
    }
}

/// Classify a terminal transport state as a connectivity failure
fn transport_error(label: &str) -> crate::Error {
    crate::Error::Connectivity(format!("transport reported {} state", label))
}

/// One negotiation flow: local offer, signaling exchange, remote answer
async fn negotiate(
    session: &Session,
    negotiator: &dyn Negotiator,
    base_url: &str,
    stream: &str,
) -> crate::Result<()> {
    let offer = session.create_offer().await?;
    let answer = negotiator.negotiate(base_url, stream, &offer).await?;
    session.apply_answer(answer).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Error;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::time::Duration;
    use webrtc::api::interceptor_registry::register_default_interceptors;
    use webrtc::api::media_engine::MediaEngine;
    use webrtc::api::setting_engine::SettingEngine;
    use webrtc::api::APIBuilder;
    use webrtc::peer_connection::configuration::RTCConfiguration;
    use webrtc::rtp_transceiver::rtp_codec::{RTCRtpCodecCapability, RTPCodecType};
    use webrtc::rtp_transceiver::rtp_transceiver_direction::RTCRtpTransceiverDirection;
    use webrtc::rtp_transceiver::RTCRtpTransceiverInit;
    use webrtc::track::track_local::track_local_static_sample::TrackLocalStaticSample;
    use webrtc::track::track_local::TrackLocal;

    struct TestSink {
        attaches: AtomicU32,
    }

    impl TestSink {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                attaches: AtomicU32::new(0),
            })
        }
    }

    impl RenderSink for TestSink {
        fn attach(&self, _track: Arc<TrackRemote>) {
            self.attaches.fetch_add(1, Ordering::SeqCst);
        }
        fn buffered_end(&self) -> Option<f64> {
            None
        }
        fn position(&self) -> f64 {
            0.0
        }
        fn is_paused(&self) -> bool {
            true
        }
        fn has_enough_data(&self) -> bool {
            false
        }
        fn seek_to(&self, _position: f64) {}
    }

    /// Negotiator that never resolves; keeps an attempt parked in Connecting
    struct PendingNegotiator {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Negotiator for PendingNegotiator {
        async fn negotiate(&self, _base: &str, _stream: &str, _offer: &str) -> crate::Result<String> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending().await
        }
    }

    struct Fixture {
        task: ControllerTask,
        events: mpsc::UnboundedReceiver<ViewerEvent>,
        status: watch::Receiver<ViewerStatus>,
        sink: Arc<TestSink>,
        negotiator_calls: Arc<PendingNegotiator>,
    }

    fn fixture() -> Fixture {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ViewerStatus::WaitingForConfig);
        let (transport_tx, _) = watch::channel(String::new());
        let (drift_tx, _) = watch::channel(0.0);

        let sink = TestSink::new();
        let negotiator = Arc::new(PendingNegotiator {
            calls: AtomicU32::new(0),
        });

        let options = ViewerOptions {
            retry_delay: Duration::from_millis(100),
            ..Default::default()
        };

        let task = ControllerTask {
            retry: RetryScheduler::new(options.retry_delay, events_tx.clone()),
            options,
            config: ViewerConfig::default(),
            negotiator: negotiator.clone(),
            sink: sink.clone(),
            session: None,
            monitor: None,
            track_attached: false,
            generation: 0,
            events: events_tx,
            status: status_tx,
            transport: transport_tx,
            drift: Arc::new(drift_tx),
        };

        Fixture {
            task,
            events: events_rx,
            status: status_rx,
            sink,
            negotiator_calls: negotiator,
        }
    }

    async fn media_pc() -> webrtc::peer_connection::RTCPeerConnection {
        let mut media_engine = MediaEngine::default();
        media_engine.register_default_codecs().unwrap();
        let registry =
            register_default_interceptors(Default::default(), &mut media_engine).unwrap();
        // Loopback candidates let the pair connect with no routable
        // interface available.
        let mut setting_engine = SettingEngine::default();
        setting_engine.set_include_loopback_candidate(true);
        let api = APIBuilder::new()
            .with_media_engine(media_engine)
            .with_interceptor_registry(registry)
            .with_setting_engine(setting_engine)
            .build();
        api.new_peer_connection(RTCConfiguration::default())
            .await
            .unwrap()
    }

    /// Produce a real remote track handle: a receive-only peer negotiates
    /// against an in-process sending peer over loopback, with candidates
    /// gathered into the descriptions so the transports connect; the
    /// receiver's track materializes once its transports start. No media is
    /// sent.
    async fn arriving_track() -> Arc<TrackRemote> {
        let receiver_pc = media_pc().await;
        receiver_pc
            .add_transceiver_from_kind(
                RTPCodecType::Video,
                Some(RTCRtpTransceiverInit {
                    direction: RTCRtpTransceiverDirection::Recvonly,
                    send_encodings: vec![],
                }),
            )
            .await
            .unwrap();

        let sender_pc = media_pc().await;
        let video = Arc::new(TrackLocalStaticSample::new(
            RTCRtpCodecCapability {
                mime_type: "video/vp8".to_string(),
                clock_rate: 90000,
                channels: 0,
                sdp_fmtp_line: String::new(),
                rtcp_feedback: vec![],
            },
            "video".to_string(),
            "sender".to_string(),
        ));
        sender_pc
            .add_track(video as Arc<dyn TrackLocal + Send + Sync>)
            .await
            .unwrap();

        let offer = receiver_pc.create_offer(None).await.unwrap();
        let mut receiver_gathered = receiver_pc.gathering_complete_promise().await;
        receiver_pc.set_local_description(offer).await.unwrap();
        let _ = receiver_gathered.recv().await;
        let offer = receiver_pc.local_description().await.unwrap();

        sender_pc.set_remote_description(offer).await.unwrap();
        let answer = sender_pc.create_answer(None).await.unwrap();
        let mut sender_gathered = sender_pc.gathering_complete_promise().await;
        sender_pc.set_local_description(answer).await.unwrap();
        let _ = sender_gathered.recv().await;
        let answer = sender_pc.local_description().await.unwrap();
        receiver_pc.set_remote_description(answer).await.unwrap();

        for _ in 0..1000 {
            for transceiver in receiver_pc.get_transceivers().await {
                let tracks = transceiver.receiver().await.tracks().await;
                if let Some(track) = tracks.into_iter().next() {
                    return track;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("no remote track materialized");
    }

    #[tokio::test]
    async fn test_incomplete_config_waits_without_negotiating() {
        let mut fx = fixture();

        let config = ViewerConfig::new("http://localhost:1984", "");
        fx.task.on_event(ViewerEvent::ConfigChanged(config)).await;

        assert_eq!(*fx.status.borrow(), ViewerStatus::WaitingForConfig);
        assert!(fx.task.session.is_none());

        // Give any wrongly spawned negotiation a chance to run.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.negotiator_calls.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_complete_config_enters_connecting() {
        let mut fx = fixture();

        let config = ViewerConfig::new("http://localhost:1984", "cam1");
        fx.task.on_event(ViewerEvent::ConfigChanged(config)).await;

        assert_eq!(*fx.status.borrow(), ViewerStatus::Connecting);
        assert_eq!(fx.task.generation, 1);
        assert!(fx.task.session.is_some());
    }

    #[tokio::test]
    async fn test_unchanged_config_does_not_restart() {
        let mut fx = fixture();
        let config = ViewerConfig::new("http://localhost:1984", "cam1");

        fx.task
            .on_event(ViewerEvent::ConfigChanged(config.clone()))
            .await;
        fx.task.on_event(ViewerEvent::ConfigChanged(config)).await;

        assert_eq!(fx.task.generation, 1, "same config must not re-enter Connecting");
    }

    #[tokio::test]
    async fn test_negotiation_success_moves_to_connected() {
        let mut fx = fixture();
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;

        let generation = fx.task.generation;
        fx.task
            .on_event(ViewerEvent::NegotiationFinished {
                generation,
                result: Ok(()),
            })
            .await;

        assert_eq!(*fx.status.borrow(), ViewerStatus::Connected);
        assert!(!fx.task.retry.is_armed());
    }

    #[tokio::test]
    async fn test_negotiation_failure_schedules_retry() {
        let mut fx = fixture();
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;

        let generation = fx.task.generation;
        fx.task
            .on_event(ViewerEvent::NegotiationFinished {
                generation,
                result: Err(Error::Signaling("server returned 500".to_string())),
            })
            .await;

        assert!(fx.task.retry.is_armed());
        assert_eq!(
            *fx.status.borrow(),
            ViewerStatus::Retrying { delay_secs: 0 }
        );

        // The timer fires and the controller re-enters Connecting.
        let event = fx.events.recv().await.unwrap();
        assert!(matches!(event, ViewerEvent::RetryElapsed { .. }));
        fx.task.on_event(event).await;

        assert_eq!(*fx.status.borrow(), ViewerStatus::Connecting);
        assert_eq!(fx.task.generation, generation + 1);
    }

    #[tokio::test]
    async fn test_duplicate_failures_arm_one_timer() {
        let mut fx = fixture();
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;
        let generation = fx.task.generation;

        // Connection state and ICE state both report the same outage.
        for _ in 0..2 {
            fx.task
                .on_event(ViewerEvent::TransportState {
                    generation,
                    label: "failed".to_string(),
                    failed: true,
                })
                .await;
        }

        assert!(fx.task.retry.is_armed());

        // Exactly one RetryElapsed comes out of the queue.
        let event = fx.events.recv().await.unwrap();
        assert!(matches!(event, ViewerEvent::RetryElapsed { .. }));
        tokio::time::sleep(Duration::from_millis(250)).await;
        assert!(fx.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stale_events_are_discarded() {
        let mut fx = fixture();
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;

        // Result of an attempt that has since been superseded.
        fx.task
            .on_event(ViewerEvent::NegotiationFinished {
                generation: 0,
                result: Err(Error::Signaling("late failure".to_string())),
            })
            .await;

        assert_eq!(*fx.status.borrow(), ViewerStatus::Connecting);
        assert!(!fx.task.retry.is_armed());
    }

    #[tokio::test]
    async fn test_late_negotiation_after_teardown_is_discarded() {
        let mut fx = fixture();
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;
        let generation = fx.task.generation;

        // Config cleared mid-negotiation: teardown runs first, then the
        // in-flight negotiation completes successfully.
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::default()))
            .await;
        fx.task
            .on_event(ViewerEvent::NegotiationFinished {
                generation,
                result: Ok(()),
            })
            .await;

        // A late success must not resurrect the closed session.
        assert_eq!(*fx.status.borrow(), ViewerStatus::WaitingForConfig);
        assert!(fx.task.session.is_none());
    }

    #[tokio::test]
    async fn test_stale_retry_after_config_cleared_is_discarded() {
        let mut fx = fixture();
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;
        let generation = fx.task.generation;

        fx.task
            .on_event(ViewerEvent::TransportState {
                generation,
                label: "failed".to_string(),
                failed: true,
            })
            .await;
        assert!(fx.task.retry.is_armed());

        // The timer fires, but the config is cleared before the fired event
        // is handled.
        let fired = fx.events.recv().await.unwrap();
        assert!(matches!(fired, ViewerEvent::RetryElapsed { .. }));
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::default()))
            .await;
        assert_eq!(*fx.status.borrow(), ViewerStatus::WaitingForConfig);

        fx.task.on_event(fired).await;

        // The stale retry must not start an attempt with an empty config.
        assert_eq!(*fx.status.borrow(), ViewerStatus::WaitingForConfig);
        assert!(fx.task.session.is_none());
        assert_eq!(fx.task.generation, generation);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(fx.negotiator_calls.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_first_track_only_is_attached() {
        let mut fx = fixture();
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;
        let generation = fx.task.generation;

        // A track from a superseded attempt never reaches the sink.
        let stale = arriving_track().await;
        fx.task
            .on_event(ViewerEvent::TrackArrived {
                generation: generation - 1,
                track: stale,
            })
            .await;
        assert_eq!(fx.sink.attaches.load(Ordering::SeqCst), 0);

        let first = arriving_track().await;
        let second = arriving_track().await;
        fx.task
            .on_event(ViewerEvent::TrackArrived {
                generation,
                track: first,
            })
            .await;
        fx.task
            .on_event(ViewerEvent::TrackArrived {
                generation,
                track: second,
            })
            .await;

        assert_eq!(
            fx.sink.attaches.load(Ordering::SeqCst),
            1,
            "only the first track feeds the sink"
        );
        assert!(fx.task.monitor.is_some());

        // A fresh attempt accepts a track again.
        fx.task.on_event(ViewerEvent::ManualReconnect).await;
        let next = arriving_track().await;
        fx.task
            .on_event(ViewerEvent::TrackArrived {
                generation: fx.task.generation,
                track: next,
            })
            .await;
        assert_eq!(fx.sink.attaches.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_transport_failure_maps_to_connectivity_error() {
        let err = transport_error("failed");
        assert!(matches!(err, Error::Connectivity(_)));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_config_change_closes_previous_session() {
        let mut fx = fixture();
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;
        let old_session = fx.task.session.clone().unwrap();

        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam2",
            )))
            .await;

        assert_eq!(
            old_session.connection_state(),
            webrtc::peer_connection::peer_connection_state::RTCPeerConnectionState::Closed
        );
        assert_eq!(fx.task.generation, 2);
        assert_eq!(*fx.status.borrow(), ViewerStatus::Connecting);
    }

    #[tokio::test]
    async fn test_manual_reconnect_forces_new_attempt() {
        let mut fx = fixture();
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;
        let generation = fx.task.generation;
        fx.task
            .on_event(ViewerEvent::NegotiationFinished {
                generation,
                result: Ok(()),
            })
            .await;
        assert_eq!(*fx.status.borrow(), ViewerStatus::Connected);

        fx.task.on_event(ViewerEvent::ManualReconnect).await;

        assert_eq!(*fx.status.borrow(), ViewerStatus::Connecting);
        assert_eq!(fx.task.generation, generation + 1);
    }

    #[tokio::test]
    async fn test_teardown_is_idempotent() {
        let mut fx = fixture();

        // Never connected.
        fx.task.teardown().await;
        fx.task.teardown().await;
        assert!(!fx.task.retry.is_armed());

        // And after an attempt with an armed retry.
        fx.task
            .on_event(ViewerEvent::ConfigChanged(ViewerConfig::new(
                "http://localhost:1984",
                "cam1",
            )))
            .await;
        let generation = fx.task.generation;
        fx.task
            .on_event(ViewerEvent::TransportState {
                generation,
                label: "failed".to_string(),
                failed: true,
            })
            .await;
        assert!(fx.task.retry.is_armed());

        fx.task.teardown().await;
        fx.task.teardown().await;
        assert!(!fx.task.retry.is_armed());
        assert!(fx.task.session.is_none());
    }
}
