//! Wire format shared by the sensor and gateway nodes.
//!
//! Two encodings of the same record exist for interoperability across node
//! generations:
//!
//! - **Compact**: `S<source>M<message>R<rssi>N<snr>B<battery>C<boot_count>`,
//!   a positional single-letter-tagged string with no escaping, used by the
//!   airtime-constrained sensor (`SmbMopenR-20N5B3.9C20`).
//! - **Structured**: a JSON object with the same fields, used on the
//!   gateway-to-broker path and by senders without airtime pressure.
//!
//! Known fragility of the compact form: values must not contain the tag
//! letters themselves. `source` and `message` are short lowercase labels in
//! practice, so the first occurrence of the next tag letter terminates a
//! field.

use core::fmt::Write;

use serde::{Deserialize, Serialize};

use crate::{MAX_LABEL_LEN, RADIO_FRAME_SIZE};

/// Short text field of the wire format (source or event label).
pub type Label = heapless::String<MAX_LABEL_LEN>;

/// Wire encoding selected by sender configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncodingProfile {
    /// Tagged compact string, minimal airtime.
    Compact,
    /// Self-describing JSON object.
    Structured,
}

/// Codec failures. Decoding never yields a partially populated record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CodecError {
    /// The input does not match either wire form.
    Malformed,
    /// Compact encoding requested for a record with an absent field.
    MissingField,
}

#[cfg(feature = "std")]
impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CodecError::Malformed => write!(f, "malformed wire message"),
            CodecError::MissingField => write!(f, "field required by the compact form is absent"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for CodecError {}

/// One radio transmission, unified across sender variants.
///
/// Every field is optional: the compact form always carries all six, while
/// structured senders may omit any of them. Absent fields are skipped when
/// re-encoding to JSON.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WireMessage {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<Label>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<Label>,
    #[serde(rename = "RSSI", skip_serializing_if = "Option::is_none")]
    pub rssi: Option<i16>,
    #[serde(rename = "SNR", skip_serializing_if = "Option::is_none")]
    pub snr: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub battery_level: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub boot_count: Option<u32>,
}

impl WireMessage {
    /// Build the record a sensor transmits for a door event.
    pub fn new_door_event(source: &Label, message: &str, rssi: i16, snr: f32, battery_level: f32, boot_count: u32) -> Result<Self, CodecError> {
        let mut label = Label::new();
        label.push_str(message).map_err(|_| CodecError::Malformed)?;
        Ok(WireMessage {
            source: Some(source.clone()),
            message: Some(label),
            rssi: Some(rssi),
            snr: Some(snr),
            battery_level: Some(battery_level),
            boot_count: Some(boot_count),
        })
    }

    /// Decode either wire form, sniffing JSON by its leading brace.
    pub fn decode(frame: &str) -> Result<Self, CodecError> {
        let trimmed = frame.trim();
        if trimmed.starts_with('{') {
            Self::decode_structured(trimmed)
        } else {
            Self::decode_compact(trimmed)
        }
    }

    pub fn decode_structured(frame: &str) -> Result<Self, CodecError> {
        let (message, _consumed) = serde_json_core::from_str::<WireMessage>(frame).map_err(|_| CodecError::Malformed)?;
        Ok(message)
    }

    pub fn decode_compact(frame: &str) -> Result<Self, CodecError> {
        let rest = frame.strip_prefix('S').ok_or(CodecError::Malformed)?;
        let (source, rest) = split_at_tag(rest, 'M')?;
        let (message, rest) = split_at_tag(rest, 'R')?;
        let (rssi, rest) = split_at_tag(rest, 'N')?;
        let (snr, rest) = split_at_tag(rest, 'B')?;
        let (battery, boot_count) = split_at_tag(rest, 'C')?;

        Ok(WireMessage {
            source: Some(parse_label(source)?),
            message: Some(parse_label(message)?),
            rssi: Some(rssi.parse::<i16>().map_err(|_| CodecError::Malformed)?),
            snr: Some(snr.parse::<f32>().map_err(|_| CodecError::Malformed)?),
            battery_level: Some(battery.parse::<f32>().map_err(|_| CodecError::Malformed)?),
            boot_count: Some(boot_count.parse::<u32>().map_err(|_| CodecError::Malformed)?),
        })
    }

    /// Encode the compact form. All six fields must be present.
    pub fn encode_compact(&self) -> Result<heapless::String<RADIO_FRAME_SIZE>, CodecError> {
        let source = self.source.as_ref().ok_or(CodecError::MissingField)?;
        let message = self.message.as_ref().ok_or(CodecError::MissingField)?;
        let rssi = self.rssi.ok_or(CodecError::MissingField)?;
        let snr = self.snr.ok_or(CodecError::MissingField)?;
        let battery_level = self.battery_level.ok_or(CodecError::MissingField)?;
        let boot_count = self.boot_count.ok_or(CodecError::MissingField)?;

        let mut out = heapless::String::new();
        // Label-sized fields cannot overflow a full radio frame.
        write!(out, "S{}M{}R{}N{}B{}C{}", source, message, rssi, snr, battery_level, boot_count).map_err(|_| CodecError::Malformed)?;
        Ok(out)
    }

    /// Encode the structured (JSON) form, omitting absent fields.
    pub fn encode_structured<const N: usize>(&self) -> Result<heapless::String<N>, CodecError> {
        serde_json_core::to_string(self).map_err(|_| CodecError::Malformed)
    }

    /// Remove and return the source label, falling back to `"default"`.
    ///
    /// The gateway uses it as the per-source topic suffix; the republished
    /// payload must not repeat it.
    pub fn take_source(&mut self) -> Label {
        self.source.take().unwrap_or_else(|| {
            let mut fallback = Label::new();
            let _ = fallback.push_str("default");
            fallback
        })
    }
}

fn split_at_tag(input: &str, tag: char) -> Result<(&str, &str), CodecError> {
    let index = input.find(tag).ok_or(CodecError::Malformed)?;
    Ok((&input[..index], &input[index + tag.len_utf8()..]))
}

fn parse_label(input: &str) -> Result<Label, CodecError> {
    let mut label = Label::new();
    label.push_str(input).map_err(|_| CodecError::Malformed)?;
    Ok(label)
}

#[cfg(all(test, feature = "std"))]
mod tests {
    use super::*;

    fn sample() -> WireMessage {
        let mut source = Label::new();
        source.push_str("mb").unwrap();
        WireMessage::new_door_event(&source, "open", -20, 5.25, 3.907, 20).unwrap()
    }

    #[test]
    fn compact_encode_matches_reference_layout() {
        let encoded = sample().encode_compact().unwrap();
        assert_eq!(encoded.as_str(), "SmbMopenR-20N5.25B3.907C20");
    }

    #[test]
    fn compact_round_trip() {
        let message = sample();
        let encoded = message.encode_compact().unwrap();
        let decoded = WireMessage::decode(encoded.as_str()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn compact_decodes_reference_frame() {
        let decoded = WireMessage::decode("SmbMopenR-20N5B3.9C20").unwrap();
        assert_eq!(decoded.source.as_ref().unwrap().as_str(), "mb");
        assert_eq!(decoded.message.as_ref().unwrap().as_str(), "open");
        assert_eq!(decoded.rssi, Some(-20));
        assert_eq!(decoded.snr, Some(5.0));
        assert_eq!(decoded.battery_level, Some(3.9));
        assert_eq!(decoded.boot_count, Some(20));
    }

    #[test]
    fn garbage_is_malformed_not_partial() {
        assert_eq!(WireMessage::decode("garbage-no-tags"), Err(CodecError::Malformed));
        assert_eq!(WireMessage::decode(""), Err(CodecError::Malformed));
        // Truncated frames fail too, whole-or-nothing.
        assert_eq!(WireMessage::decode("SmbMopen"), Err(CodecError::Malformed));
        assert_eq!(WireMessage::decode("SmbMopenR-20N5B3.9"), Err(CodecError::Malformed));
        // Non-numeric payload in a numeric field.
        assert_eq!(WireMessage::decode("SmbMopenRxxN5B3.9C20"), Err(CodecError::Malformed));
    }

    #[test]
    fn compact_encode_requires_all_fields() {
        let mut message = sample();
        message.boot_count = None;
        assert_eq!(message.encode_compact(), Err(CodecError::MissingField));
    }

    #[test]
    fn structured_round_trip_preserves_fields() {
        let message = sample();
        let encoded: heapless::String<192> = message.encode_structured().unwrap();
        let decoded = WireMessage::decode(encoded.as_str()).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn structured_decode_tolerates_absent_fields() {
        let decoded = WireMessage::decode(r#"{"source":"mb","battery_level":3.9}"#).unwrap();
        assert_eq!(decoded.source.as_ref().unwrap().as_str(), "mb");
        assert_eq!(decoded.battery_level, Some(3.9));
        assert_eq!(decoded.message, None);
        assert_eq!(decoded.rssi, None);
    }

    #[test]
    fn structured_encode_skips_absent_fields() {
        let mut message = sample();
        let _ = message.take_source();
        let encoded: heapless::String<192> = message.encode_structured().unwrap();
        assert!(!encoded.as_str().contains("source"));
        assert!(encoded.as_str().contains("\"RSSI\""));
    }

    #[test]
    fn take_source_defaults_when_absent() {
        let mut message = sample();
        assert_eq!(message.take_source().as_str(), "mb");
        assert_eq!(message.take_source().as_str(), "default");
    }

    #[test]
    fn malformed_json_is_rejected() {
        assert_eq!(WireMessage::decode(r#"{"source":"#), Err(CodecError::Malformed));
    }
}
