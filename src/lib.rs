#![cfg_attr(not(feature = "std"), no_std)]
#![allow(async_fn_in_trait)] // Collaborator traits are consumed generically, never boxed

//! Both halves of a battery-powered LoRa door/mailbox sensor link.
//!
//! [`sensor_node`] runs the deep-sleep wake cycle on the sensor,
//! [`relay_pipeline`] bridges received frames onto an MQTT-style bus on the
//! gateway, and [`wire_message`] is the codec both sides share. Hardware and
//! network collaborators (radio driver, bus client, display, non-volatile
//! store) are traits the host firmware implements.

pub mod relay_pipeline;
pub mod retained_state;
pub mod sensor_node;
pub mod wire_message;

//Constants that affect wire compatibility between node generations
pub const RADIO_FRAME_SIZE: usize = 200;
pub const MAX_LABEL_LEN: usize = 16;

//Constants that only affect local resource usage of a node
pub const FRAME_QUEUE_SIZE: usize = 16;
pub const RETAINED_STATE_MAX: usize = 320;
pub const RELAY_PAYLOAD_MAX: usize = 192;
pub const TOPIC_MAX: usize = 96;

pub use relay_pipeline::{
    DrainOrder, FrameBuffer, GatewayConfiguration, LastWill, MessageBus, QoS, RelayPipeline, RelayStep, RxFault, StatusDisplay, TopicSet,
    AVAILABILITY_OFFLINE, AVAILABILITY_ONLINE, DEFAULT_BASE_TOPIC,
};
pub use retained_state::{DoorState, PersistenceError, RetainedState, StateStore, DEFAULT_SOURCE};
pub use sensor_node::{
    run_wake_cycle, BatteryMonitor, CycleOutcome, DoorPin, LinkQuality, RadioTx, SensorConfig, SleepMode, DEFAULT_SETTLE_DELAY, MAX_STUCK_BOOT_COUNT,
};
pub use wire_message::{CodecError, EncodingProfile, Label, WireMessage};
