//! Wake-cycle state machine of the battery-powered sensor node.
//!
//! The node spends almost all of its life in deep sleep; every wake (pin
//! edge or reset) re-runs the firmware from its entry point with volatile
//! memory lost. The entire decision — did the door really move, is it stuck
//! open, what to transmit, how to sleep next — therefore executes as one
//! bounded synchronous pass over [`RetainedState`], with the settle delay as
//! the only suspension point.
//!
//! Every failure path degrades to "proceed with defaults and still sleep":
//! a node that fails to reach deep sleep drains its battery, which is the
//! one outcome this module must never allow.
//!
//! The host owns pin numbering, radio bring-up and the actual deep-sleep
//! syscall; it calls [`run_wake_cycle`] once per wake and then enters deep
//! sleep with the returned [`SleepMode`].

use embassy_time::{Duration, Instant, Timer};
use log::{log, Level};

use crate::retained_state::{DoorState, PersistenceError, RetainedState, StateStore};
use crate::wire_message::{CodecError, EncodingProfile, Label, WireMessage};

/// Consecutive open wakes tolerated before switching to the close-only wake
/// strategy.
pub const MAX_STUCK_BOOT_COUNT: u32 = 5;

/// How long a stuck-open node stays awake before re-checking the pin.
pub const DEFAULT_SETTLE_DELAY: Duration = Duration::from_secs(5);

/// Event label transmitted on a closed-to-open transition. Closing is never
/// transmitted; the gateway infers it.
const OPEN_EVENT: &str = "open";

/// Deep-sleep wake condition, chosen once per cycle right before sleeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SleepMode {
    /// Wake on either pin edge (normal operation).
    WakeOnAnyEdge,
    /// Wake only when the pin returns to the closed level; used after the
    /// stuck-open threshold fires, so a jammed door stops burning wakes.
    WakeOnCloseOnly,
}

/// Link quality reported by the radio driver after a transmission.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinkQuality {
    pub rssi: i16,
    pub snr: f32,
}

/// The wake pin, sampled at wake and re-sampled right before sleep.
pub trait DoorPin {
    fn read(&mut self) -> DoorState;
}

/// Battery voltage measurement, volts.
pub trait BatteryMonitor {
    fn read_volts(&mut self) -> f32;
}

/// Transmit-only view of the radio driver. Fire and forget: there is no
/// acknowledgement protocol and no within-cycle retry.
pub trait RadioTx {
    type Error: core::fmt::Debug;

    async fn send(&mut self, frame: &[u8]) -> Result<LinkQuality, Self::Error>;
}

/// Per-device sensor settings.
pub struct SensorConfig {
    /// Source label stamped into every transmission.
    pub source: Label,
    /// Wire form this sender emits.
    pub profile: EncodingProfile,
    /// Awake hold before re-checking a door that stayed open.
    pub settle_delay: Duration,
}

impl SensorConfig {
    pub fn new(source: &str) -> Result<Self, ()> {
        let mut label = Label::new();
        label.push_str(source).map_err(|_| ())?;
        Ok(SensorConfig {
            source: label,
            profile: EncodingProfile::Compact,
            settle_delay: DEFAULT_SETTLE_DELAY,
        })
    }
}

/// What a wake cycle decided; the host acts on `sleep_mode`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub sleep_mode: SleepMode,
    pub transmitted: bool,
}

/// Run one full wake cycle: load state, classify the wake, transmit if the
/// door just opened, update the stuck counter, and persist with the
/// pin value re-read at sleep time.
///
/// `wake_start` is the instant the host captured at boot; awake time
/// accumulates into the retained diagnostics counter.
pub async fn run_wake_cycle<S, P, B, R>(
    config: &SensorConfig,
    store: &mut S,
    pin: &mut P,
    battery: &mut B,
    radio: &mut R,
    wake_start: Instant,
) -> CycleOutcome
where
    S: StateStore,
    P: DoorPin,
    B: BatteryMonitor,
    R: RadioTx,
{
    let (mut state, load_outcome) = RetainedState::load_or_default(store);
    match load_outcome {
        Ok(()) => {}
        Err(PersistenceError::Missing) => {
            log!(Level::Info, "no retained state, initializing defaults");
            state.persist(store);
        }
        Err(PersistenceError::Corrupt) => {
            log!(Level::Warn, "retained state corrupt, reinitializing defaults");
            state.persist(store);
        }
    }

    let observed = pin.read();
    state.boot_count += 1;
    let changed = observed != state.last_door_state;
    log!(
        Level::Info,
        "wake {}: door {:?}, last {:?}",
        state.boot_count,
        observed,
        state.last_door_state
    );

    let mut transmitted = false;
    if changed && observed == DoorState::Open {
        log!(Level::Info, "door just opened");
        transmitted = transmit_open_event(config, &mut state, battery, radio).await;
    } else if changed {
        log!(Level::Info, "door just closed");
    }

    let sleep_mode = if observed == DoorState::Open {
        state.stuck_boot_count += 1;
        if state.stuck_boot_count > MAX_STUCK_BOOT_COUNT {
            log!(Level::Warn, "door stuck open too long, sleeping until it closes");
            state.stuck_boot_count = 0;
            SleepMode::WakeOnCloseOnly
        } else {
            log!(Level::Info, "door open, holding awake before sleeping");
            if config.settle_delay != Duration::from_ticks(0) {
                Timer::after(config.settle_delay).await;
            }
            SleepMode::WakeOnAnyEdge
        }
    } else {
        SleepMode::WakeOnAnyEdge
    };

    // Sleep-time bookkeeping. The pin is deliberately re-read here instead
    // of reusing `observed`: the door may have moved during the awake
    // window, and the next wake must diff against what was true at sleep
    // entry.
    state.time_awake_millis += wake_start.elapsed().as_millis();
    state.last_door_state = pin.read();
    state.persist(store);
    log!(Level::Info, "going to sleep: {:?}", sleep_mode);

    CycleOutcome { sleep_mode, transmitted }
}

/// Build, encode and send the open event. Returns whether the send
/// succeeded; failures are logged and dropped.
async fn transmit_open_event<B, R>(config: &SensorConfig, state: &mut RetainedState, battery: &mut B, radio: &mut R) -> bool
where
    B: BatteryMonitor,
    R: RadioTx,
{
    let battery_level = round_to_millivolts(battery.read_volts());
    state.source = config.source.clone();
    state.battery_level = battery_level;

    // The freshest link quality available at pack time is the one persisted
    // after the previous transmission.
    let message = match WireMessage::new_door_event(&config.source, OPEN_EVENT, state.rssi, state.snr, battery_level, state.boot_count) {
        Ok(message) => message,
        Err(error) => {
            log!(Level::Error, "failed to build wire message: {:?}", error);
            return false;
        }
    };
    state.message = message.message.clone();

    let frame: Result<heapless::String<{ crate::RADIO_FRAME_SIZE }>, CodecError> = match config.profile {
        EncodingProfile::Compact => message.encode_compact(),
        EncodingProfile::Structured => message.encode_structured(),
    };
    let frame = match frame {
        Ok(frame) => frame,
        Err(error) => {
            log!(Level::Error, "failed to encode wire message: {:?}", error);
            return false;
        }
    };

    match radio.send(frame.as_bytes()).await {
        Ok(link_quality) => {
            state.rssi = link_quality.rssi;
            state.snr = link_quality.snr;
            true
        }
        Err(error) => {
            log!(Level::Warn, "transmit failed, dropping event: {:?}", error);
            false
        }
    }
}

/// Round a voltage reading to three decimals, matching the resolution the
/// wire format and retained blob carry.
fn round_to_millivolts(volts: f32) -> f32 {
    ((volts * 1000.0 + 0.5) as u32) as f32 / 1000.0
}
