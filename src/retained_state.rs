//! State that survives deep sleep, persisted as a small JSON blob in
//! whatever non-volatile store the platform offers (RTC memory on the
//! original hardware).
//!
//! Load failures are never fatal: an absent or corrupt blob yields the
//! defined default state, but the failure is surfaced as a
//! [`PersistenceError`] so the caller defaults on it consciously and the
//! condition reaches the logs.

use log::{log, Level};
use serde::de::Deserializer;
use serde::ser::Serializer;
use serde::{Deserialize, Serialize};

use crate::wire_message::Label;
use crate::RETAINED_STATE_MAX;

/// Source label a freshly initialized node reports under.
pub const DEFAULT_SOURCE: &str = "mailbox";

/// Non-volatile key-value persistence across power loss.
///
/// `load` fills the caller's buffer and returns the blob length, or `None`
/// when nothing readable is stored. `store` replaces the blob; the original
/// RTC-memory backend cannot fail, so neither does the trait.
pub trait StateStore {
    fn load(&mut self, buf: &mut [u8]) -> Option<usize>;
    fn store(&mut self, bytes: &[u8]);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PersistenceError {
    /// Nothing stored yet (first boot, or the store was cleared).
    Missing,
    /// A blob exists but does not decode.
    Corrupt,
}

#[cfg(feature = "std")]
impl std::fmt::Display for PersistenceError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PersistenceError::Missing => write!(f, "no retained state stored"),
            PersistenceError::Corrupt => write!(f, "retained state blob is corrupt"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for PersistenceError {}

/// Physical door state as read from the wake pin (pull-up, high = open).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DoorState {
    Closed = 0,
    Open = 1,
}

impl DoorState {
    pub fn from_level(high: bool) -> Self {
        if high {
            DoorState::Open
        } else {
            DoorState::Closed
        }
    }
}

// Stored as the raw pin level so blobs written by earlier firmware decode
// unchanged.
impl Serialize for DoorState {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for DoorState {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let level = u8::deserialize(deserializer)?;
        Ok(DoorState::from_level(level != 0))
    }
}

/// Everything the sensor needs to remember across power-off.
///
/// Read once at wake, written at most twice per cycle (immediately after a
/// first-boot initialization, and right before sleeping).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetainedState {
    pub source: Label,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<Label>,
    pub battery_level: f32,
    pub boot_count: u32,
    pub stuck_boot_count: u32,
    pub last_door_state: DoorState,
    pub time_awake_millis: u64,
    #[serde(rename = "RSSI", default)]
    pub rssi: i16,
    #[serde(rename = "SNR", default)]
    pub snr: f32,
}

impl Default for RetainedState {
    fn default() -> Self {
        let mut source = Label::new();
        let _ = source.push_str(DEFAULT_SOURCE);
        RetainedState {
            source,
            message: None,
            battery_level: 0.0,
            boot_count: 0,
            stuck_boot_count: 0,
            last_door_state: DoorState::Closed,
            time_awake_millis: 0,
            rssi: 0,
            snr: 0.0,
        }
    }
}

impl RetainedState {
    pub fn decode(bytes: &[u8]) -> Result<Self, PersistenceError> {
        let text = core::str::from_utf8(bytes).map_err(|_| PersistenceError::Corrupt)?;
        let (state, _consumed) = serde_json_core::from_str::<RetainedState>(text).map_err(|_| PersistenceError::Corrupt)?;
        Ok(state)
    }

    pub fn encode(&self, buf: &mut [u8]) -> Result<usize, PersistenceError> {
        serde_json_core::to_slice(self, buf).map_err(|_| PersistenceError::Corrupt)
    }

    /// Load from the store, falling back to defaults.
    ///
    /// The second element tells the caller whether the default path was
    /// taken and why. It is advisory only; the state in the first element is
    /// always usable.
    pub fn load_or_default<S: StateStore>(store: &mut S) -> (Self, Result<(), PersistenceError>) {
        let mut buf = [0u8; RETAINED_STATE_MAX];
        match store.load(&mut buf) {
            None => (Self::default(), Err(PersistenceError::Missing)),
            Some(len) => match Self::decode(&buf[..len]) {
                Ok(state) => (state, Ok(())),
                Err(error) => (Self::default(), Err(error)),
            },
        }
    }

    /// Write the current state back to the store.
    pub fn persist<S: StateStore>(&self, store: &mut S) {
        let mut buf = [0u8; RETAINED_STATE_MAX];
        match self.encode(&mut buf) {
            Ok(len) => store.store(&buf[..len]),
            Err(error) => {
                // Keep the previous blob rather than storing garbage.
                log!(Level::Error, "failed to encode retained state: {:?}", error);
            }
        }
    }
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    struct MemStore {
        blob: Option<std::vec::Vec<u8>>,
    }

    impl MemStore {
        fn empty() -> Self {
            MemStore { blob: None }
        }

        fn with(bytes: &[u8]) -> Self {
            MemStore {
                blob: Some(bytes.to_vec()),
            }
        }
    }

    impl StateStore for MemStore {
        fn load(&mut self, buf: &mut [u8]) -> Option<usize> {
            let blob = self.blob.as_ref()?;
            if blob.len() > buf.len() {
                return None;
            }
            buf[..blob.len()].copy_from_slice(blob);
            Some(blob.len())
        }

        fn store(&mut self, bytes: &[u8]) {
            self.blob = Some(bytes.to_vec());
        }
    }

    #[test]
    fn store_load_round_trip() {
        let mut state = RetainedState::default();
        state.boot_count = 17;
        state.stuck_boot_count = 2;
        state.last_door_state = DoorState::Open;
        state.battery_level = 3.907;
        state.time_awake_millis = 12345;
        state.rssi = -88;
        state.snr = 7.5;

        let mut store = MemStore::empty();
        state.persist(&mut store);
        let (loaded, outcome) = RetainedState::load_or_default(&mut store);
        assert_eq!(outcome, Ok(()));
        assert_eq!(loaded, state);
    }

    #[test]
    fn empty_store_yields_default() {
        let mut store = MemStore::empty();
        let (state, outcome) = RetainedState::load_or_default(&mut store);
        assert_eq!(outcome, Err(PersistenceError::Missing));
        assert_eq!(state, RetainedState::default());
        assert_eq!(state.source.as_str(), DEFAULT_SOURCE);
        assert_eq!(state.last_door_state, DoorState::Closed);
    }

    #[test]
    fn corrupt_store_yields_default() {
        let mut store = MemStore::with(b"not json at all");
        let (state, outcome) = RetainedState::load_or_default(&mut store);
        assert_eq!(outcome, Err(PersistenceError::Corrupt));
        assert_eq!(state, RetainedState::default());
    }

    #[test]
    fn door_state_serializes_as_pin_level() {
        let mut state = RetainedState::default();
        state.last_door_state = DoorState::Open;
        let mut buf = [0u8; RETAINED_STATE_MAX];
        let len = state.encode(&mut buf).unwrap();
        let text = core::str::from_utf8(&buf[..len]).unwrap();
        assert!(text.contains("\"last_door_state\":1"));
        assert!(text.contains("\"RSSI\""));
        assert!(text.contains("\"SNR\""));
    }

    #[test]
    fn decode_tolerates_blob_without_link_quality() {
        // Blob shape written before the first transmission ever happened.
        let blob = br#"{"source":"mailbox","battery_level":0.0,"boot_count":3,"stuck_boot_count":0,"last_door_state":0,"time_awake_millis":90}"#;
        let state = RetainedState::decode(blob).unwrap();
        assert_eq!(state.boot_count, 3);
        assert_eq!(state.rssi, 0);
        assert_eq!(state.snr, 0.0);
        assert_eq!(state.message, None);
    }
}
