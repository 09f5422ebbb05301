//! Gateway side: bridge the radio channel onto the MQTT-style message bus.
//!
//! Two flows share one cooperative thread. The radio driver's
//! receive-complete interrupt calls [`FrameBuffer::frame_received`], which
//! classifies the driver status and pushes the raw UTF-8 frame onto a
//! bounded queue — O(1), allocation-free, never suspending. The consumer
//! task ([`RelayPipeline::run`]) pops frames, decodes them, republishes the
//! structured form per-source, and redraws a four-line status panel every
//! iteration.
//!
//! The consumer loop must survive anything a single frame can do to it:
//! decode failures and publish failures are dropped with a warning, never
//! propagated.

use core::cell::RefCell;
use core::fmt::Write;

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::blocking_mutex::Mutex;
use embassy_time::{Duration, Timer};
use heapless::Deque;
use log::{log, Level};

use crate::wire_message::WireMessage;
use crate::{FRAME_QUEUE_SIZE, MAX_LABEL_LEN, RADIO_FRAME_SIZE, RELAY_PAYLOAD_MAX, TOPIC_MAX};

/// Base topic used when the host does not configure one.
pub const DEFAULT_BASE_TOPIC: &str = "esp32/lora";

/// Retained availability payloads. The offline one doubles as the last-will
/// payload registered with the bus client before connecting.
pub const AVAILABILITY_ONLINE: &[u8] = b"online";
pub const AVAILABILITY_OFFLINE: &[u8] = b"offline";

/// One raw frame as received off the air.
pub type RawFrame = heapless::String<RADIO_FRAME_SIZE>;

type Topic = heapless::String<TOPIC_MAX>;

/// Delivery guarantee requested from the bus client.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QoS {
    AtMostOnce = 0,
    AtLeastOnce = 1,
}

/// Transport-level receive fault reported by the radio driver (or by UTF-8
/// validation of the frame body). Retained last-wins for the status panel;
/// there is no per-message attribution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxFault {
    CrcMismatch,
    Timeout,
    HeaderCorrupt,
    InvalidUtf8,
    Other,
}

impl RxFault {
    pub fn as_str(&self) -> &'static str {
        match self {
            RxFault::CrcMismatch => "CRC_MISMATCH",
            RxFault::Timeout => "RX_TIMEOUT",
            RxFault::HeaderCorrupt => "HEADER_ERR",
            RxFault::InvalidUtf8 => "BAD_UTF8",
            RxFault::Other => "RX_ERR",
        }
    }
}

/// Which end of the frame queue the consumer drains.
///
/// Deployed gateways process the newest frame first and work backwards
/// through any backlog; that stays the default. `OldestFirst` gives plain
/// FIFO for new installs (see DESIGN.md).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DrainOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Pub/sub client surface the pipeline needs. Connection management and
/// auto-reconnect live in the client; the pipeline only publishes and
/// subscribes, and re-runs [`RelayPipeline::handle_connect`] when the client
/// reports a (re)connect.
pub trait MessageBus {
    type Error: core::fmt::Debug;

    async fn publish(&mut self, topic: &str, payload: &[u8], retain: bool, qos: QoS) -> Result<(), Self::Error>;
    async fn subscribe(&mut self, topic: &str, qos: QoS) -> Result<(), Self::Error>;
}

/// Minimal status display surface (an SSD1306-class panel on the original
/// hardware).
pub trait StatusDisplay {
    fn clear(&mut self);
    fn draw_text(&mut self, text: &str, x: u8, y: u8);
    fn flush(&mut self);
}

/// Last-will registration the host hands to its bus client before
/// connecting, so ungraceful disconnects surface downstream without the
/// pipeline's involvement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LastWill {
    pub topic: Topic,
    pub payload: &'static [u8],
    pub retain: bool,
    pub qos: QoS,
}

/// The gateway's topic namespace under a configurable base.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicSet {
    base: Topic,
}

impl TopicSet {
    /// Fails when the base leaves no room for the longest suffix, so the
    /// builders below cannot truncate.
    pub fn new(base: &str) -> Result<Self, ()> {
        const LONGEST_SUFFIX: usize = "/relay/".len() + MAX_LABEL_LEN;
        if base.is_empty() || base.len() + LONGEST_SUFFIX > TOPIC_MAX {
            return Err(());
        }
        let mut topic = Topic::new();
        topic.push_str(base).map_err(|_| ())?;
        Ok(TopicSet { base: topic })
    }

    /// Inbound control topic, subscribed on every (re)connect.
    pub fn config(&self) -> Topic {
        self.suffixed("config")
    }

    /// Retained online/offline marker topic.
    pub fn availability(&self) -> Topic {
        self.suffixed("availability")
    }

    /// Outbound per-source publish topic.
    pub fn relay(&self, source: &str) -> Topic {
        let mut topic = Topic::new();
        let _ = write!(topic, "{}/relay/{}", self.base, source);
        topic
    }

    pub fn last_will(&self) -> LastWill {
        LastWill {
            topic: self.availability(),
            payload: AVAILABILITY_OFFLINE,
            retain: true,
            qos: QoS::AtMostOnce,
        }
    }

    fn suffixed(&self, suffix: &str) -> Topic {
        let mut topic = Topic::new();
        let _ = write!(topic, "{}/{}", self.base, suffix);
        topic
    }
}

/// Everything configurable about the gateway process.
pub struct GatewayConfiguration {
    pub topics: TopicSet,
    pub drain_order: DrainOrder,
    /// Consumer poll interval when the queue is empty.
    pub poll_interval: Duration,
}

impl GatewayConfiguration {
    pub fn new(base_topic: &str) -> Result<Self, ()> {
        Ok(GatewayConfiguration {
            topics: TopicSet::new(base_topic)?,
            drain_order: DrainOrder::default(),
            poll_interval: Duration::from_secs(1),
        })
    }
}

struct BufferState {
    frames: Deque<RawFrame, FRAME_QUEUE_SIZE>,
    last_fault: Option<RxFault>,
}

/// The single shared mutable resource between interrupt context and the
/// consumer task: a bounded frame queue plus the latest transport fault.
///
/// A critical-section blocking mutex keeps the producer side usable from an
/// interrupt callback; nothing inside the lock suspends.
pub struct FrameBuffer {
    state: Mutex<CriticalSectionRawMutex, RefCell<BufferState>>,
}

impl FrameBuffer {
    pub const fn new() -> Self {
        FrameBuffer {
            state: Mutex::new(RefCell::new(BufferState {
                frames: Deque::new(),
                last_fault: None,
            })),
        }
    }

    /// Receive-complete callback body: classify the driver result and
    /// enqueue the frame. Success clears the retained fault; failures
    /// replace it. No message-content decoding happens here.
    pub fn frame_received(&self, result: Result<&[u8], RxFault>) {
        match result {
            Ok(bytes) => match core::str::from_utf8(bytes) {
                Ok(text) => self.push_frame(text),
                Err(_) => self.record_fault(RxFault::InvalidUtf8),
            },
            Err(fault) => self.record_fault(fault),
        }
    }

    fn push_frame(&self, text: &str) {
        let Ok(frame) = RawFrame::try_from(text) else {
            log!(Level::Warn, "oversized frame ({} bytes), dropping", text.len());
            return;
        };
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            if state.frames.is_full() {
                // Backpressure: the newest frames are the ones worth
                // keeping, so overflow evicts the oldest.
                state.frames.pop_front();
                log!(Level::Warn, "frame queue full, dropping oldest frame");
            }
            let _ = state.frames.push_back(frame);
            state.last_fault = None;
        });
    }

    pub fn record_fault(&self, fault: RxFault) {
        log!(Level::Warn, "radio receive fault: {}", fault.as_str());
        self.state.lock(|cell| cell.borrow_mut().last_fault = Some(fault));
    }

    pub fn last_fault(&self) -> Option<RxFault> {
        self.state.lock(|cell| cell.borrow().last_fault)
    }

    /// Non-blocking pop from the configured end of the queue.
    pub fn pop(&self, order: DrainOrder) -> Option<RawFrame> {
        self.state.lock(|cell| {
            let mut state = cell.borrow_mut();
            match order {
                DrainOrder::NewestFirst => state.frames.pop_back(),
                DrainOrder::OldestFirst => state.frames.pop_front(),
            }
        })
    }

    pub fn len(&self) -> usize {
        self.state.lock(|cell| cell.borrow().frames.len())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Receive buffer for the embedded deployment, shared between the radio
/// interrupt callback and the consumer task.
#[cfg(feature = "embedded")]
pub static FRAME_BUFFER: FrameBuffer = FrameBuffer::new();

/// What one consumer iteration did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayStep {
    /// A frame was decoded and republished.
    Relayed,
    /// A frame was consumed but could not be relayed.
    Dropped,
    /// The queue was empty.
    Idle,
}

/// Last-known panel contents, redrawn every iteration.
struct PanelState {
    source: heapless::String<MAX_LABEL_LEN>,
    battery_level: f32,
    rssi: i16,
}

/// The consumer half of the gateway: owns the panel state and the
/// configuration, borrows the shared [`FrameBuffer`].
pub struct RelayPipeline<'a> {
    buffer: &'a FrameBuffer,
    config: GatewayConfiguration,
    panel: PanelState,
}

impl<'a> RelayPipeline<'a> {
    pub fn new(buffer: &'a FrameBuffer, config: GatewayConfiguration) -> Self {
        RelayPipeline {
            buffer,
            config,
            panel: PanelState {
                source: heapless::String::new(),
                battery_level: 0.0,
                rssi: 0,
            },
        }
    }

    /// (Re)connect sequence: subscribe the control topic, then publish the
    /// retained online marker. Idempotent; the host's on-connect callback
    /// re-runs it after every reconnect (a clean-session client must
    /// re-subscribe).
    pub async fn handle_connect<B: MessageBus>(&self, bus: &mut B) -> Result<(), B::Error> {
        bus.subscribe(self.config.topics.config().as_str(), QoS::AtMostOnce).await?;
        bus.publish(self.config.topics.availability().as_str(), AVAILABILITY_ONLINE, true, QoS::AtMostOnce)
            .await
    }

    /// Inbound control-topic payloads. Nothing is actionable yet; logged so
    /// the traffic is visible.
    pub fn handle_control_message(&mut self, topic: &str, payload: &[u8]) {
        log!(Level::Debug, "control message on {} ({} bytes)", topic, payload.len());
    }

    /// Consumer loop. Runs the connect sequence once on entry, then polls
    /// the frame queue forever. The host spawns this on its executor.
    pub async fn run<B, D>(&mut self, bus: &mut B, display: &mut D) -> !
    where
        B: MessageBus,
        D: StatusDisplay,
    {
        if let Err(error) = self.handle_connect(bus).await {
            log!(Level::Warn, "connect sequence failed: {:?}", error);
        }
        loop {
            if let RelayStep::Idle = self.step(bus, display).await {
                Timer::after(self.config.poll_interval).await;
            }
        }
    }

    /// One consumer iteration: clear the display, pop at most one frame,
    /// decode and republish it, redraw the panel. An empty queue is an
    /// expected outcome, not an error.
    pub async fn step<B, D>(&mut self, bus: &mut B, display: &mut D) -> RelayStep
    where
        B: MessageBus,
        D: StatusDisplay,
    {
        display.clear();

        let step = match self.buffer.pop(self.config.drain_order) {
            None => RelayStep::Idle,
            Some(frame) => self.relay_frame(bus, frame.as_str()).await,
        };

        self.redraw(display);
        display.flush();
        step
    }

    async fn relay_frame<B: MessageBus>(&mut self, bus: &mut B, frame: &str) -> RelayStep {
        let mut message = match WireMessage::decode(frame) {
            Ok(message) => message,
            Err(error) => {
                log!(Level::Warn, "dropping undecodable frame: {:?}", error);
                return RelayStep::Dropped;
            }
        };

        let source = message.take_source();
        let topic = self.config.topics.relay(source.as_str());
        let payload: heapless::String<RELAY_PAYLOAD_MAX> = match message.encode_structured() {
            Ok(payload) => payload,
            Err(error) => {
                log!(Level::Warn, "dropping unencodable frame: {:?}", error);
                return RelayStep::Dropped;
            }
        };

        match bus.publish(topic.as_str(), payload.as_bytes(), false, QoS::AtMostOnce).await {
            Ok(()) => {
                self.panel.source = source;
                if let Some(battery_level) = message.battery_level {
                    self.panel.battery_level = battery_level;
                }
                if let Some(rssi) = message.rssi {
                    self.panel.rssi = rssi;
                }
                RelayStep::Relayed
            }
            Err(error) => {
                log!(Level::Warn, "publish to {} failed: {:?}", topic, error);
                RelayStep::Dropped
            }
        }
    }

    fn redraw<D: StatusDisplay>(&self, display: &mut D) {
        let mut line: heapless::String<48> = heapless::String::new();

        let _ = write!(line, "From: {}", self.panel.source);
        display.draw_text(line.as_str(), 0, 0);

        line.clear();
        let fault = self.buffer.last_fault().map(|fault| fault.as_str()).unwrap_or("");
        let _ = write!(line, "Error: {}", fault);
        display.draw_text(line.as_str(), 0, 10);

        line.clear();
        let _ = write!(line, "Batt: {}V", self.panel.battery_level);
        display.draw_text(line.as_str(), 0, 20);

        line.clear();
        let _ = write!(line, "RSSI: {}", self.panel.rssi);
        display.draw_text(line.as_str(), 0, 30);
    }
}
