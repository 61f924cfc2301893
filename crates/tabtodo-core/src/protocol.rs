use chrono::Utc;
use serde::de::{self, DeserializeOwned, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::marker::PhantomData;
use thiserror::Error;

pub const DEFAULT_MAX_FRAME_BYTES: usize = 256 * 1024;
pub const CURRENT_PROTOCOL_VERSION: u16 = 1;
pub const DEFAULT_CHANNEL: &str = "todo_updates";

/// Wire form of the bare relay signal.
pub const SIGNAL_TEXT: &str = "update";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ProtocolVersion(pub u16);

impl ProtocolVersion {
    pub const CURRENT: Self = Self(CURRENT_PROTOCOL_VERSION);

    pub fn is_supported(self) -> bool {
        self.0 <= CURRENT_PROTOCOL_VERSION
    }
}

impl Default for ProtocolVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl Serialize for ProtocolVersion {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&self.0.to_string())
    }
}

impl<'de> Deserialize<'de> for ProtocolVersion {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        struct ProtocolVersionVisitor;

        impl<'de> Visitor<'de> for ProtocolVersionVisitor {
            type Value = ProtocolVersion;

            fn expecting(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
                formatter.write_str("a protocol version as string or integer")
            }

            fn visit_u64<E>(self, value: u64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let version = u16::try_from(value)
                    .map_err(|_| E::custom(format!("protocol version out of range: {value}")))?;
                Ok(ProtocolVersion(version))
            }

            fn visit_i64<E>(self, value: i64) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                if value < 0 {
                    return Err(E::custom(format!(
                        "protocol version cannot be negative: {value}"
                    )));
                }
                self.visit_u64(value as u64)
            }

            fn visit_str<E>(self, value: &str) -> Result<Self::Value, E>
            where
                E: de::Error,
            {
                let cleaned = value.trim().trim_start_matches('v');
                let version = cleaned.parse::<u16>().map_err(|err| {
                    E::custom(format!("invalid protocol version '{value}': {err}"))
                })?;
                Ok(ProtocolVersion(version))
            }
        }

        deserializer.deserialize_any(ProtocolVersionVisitor)
    }
}

/// Partial app-state snapshot attached to an `update`.
///
/// A missing field leaves the receiver untouched; `"editingId": null` clears
/// the receiver's editing index.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AppStatePatch {
    #[serde(
        default,
        deserialize_with = "crate::deserialize_present",
        skip_serializing_if = "Option::is_none"
    )]
    pub editing_id: Option<Option<usize>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub input_value: Option<String>,
}

/// A message travelling over the shared channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "RawChannelMsg", into = "RawChannelMsg")]
pub enum ChannelMsg {
    /// Untyped invalidation from the relay. Any message without a `type` field
    /// decodes to this and is handled like a payload-free `Update`.
    Signal,
    ClearHighlight,
    Update(Option<AppStatePatch>),
    /// Typed message this build does not understand. Receivers ignore it.
    Unknown,
}

impl ChannelMsg {
    pub fn update() -> Self {
        ChannelMsg::Update(None)
    }

    pub fn update_with(patch: AppStatePatch) -> Self {
        ChannelMsg::Update(Some(patch))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ChannelMsg::Signal => "signal",
            ChannelMsg::ClearHighlight => "clear_highlight",
            ChannelMsg::Update(Some(_)) => "update_with_state",
            ChannelMsg::Update(None) => "update",
            ChannelMsg::Unknown => "unknown",
        }
    }
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum RawChannelMsg {
    Bare(String),
    Typed(TypedMsg),
    Other(Value),
}

#[derive(Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
enum TypedMsg {
    ClearHighlight,
    Update {
        #[serde(default, rename = "appState", skip_serializing_if = "Option::is_none")]
        app_state: Option<AppStatePatch>,
    },
    #[serde(other)]
    Unknown,
}

impl From<RawChannelMsg> for ChannelMsg {
    fn from(raw: RawChannelMsg) -> Self {
        match raw {
            RawChannelMsg::Bare(_) | RawChannelMsg::Other(_) => ChannelMsg::Signal,
            RawChannelMsg::Typed(TypedMsg::ClearHighlight) => ChannelMsg::ClearHighlight,
            RawChannelMsg::Typed(TypedMsg::Update { app_state }) => ChannelMsg::Update(app_state),
            RawChannelMsg::Typed(TypedMsg::Unknown) => ChannelMsg::Unknown,
        }
    }
}

impl From<ChannelMsg> for RawChannelMsg {
    fn from(msg: ChannelMsg) -> Self {
        match msg {
            ChannelMsg::Signal => RawChannelMsg::Bare(SIGNAL_TEXT.to_string()),
            ChannelMsg::ClearHighlight => RawChannelMsg::Typed(TypedMsg::ClearHighlight),
            ChannelMsg::Update(app_state) => RawChannelMsg::Typed(TypedMsg::Update { app_state }),
            ChannelMsg::Unknown => RawChannelMsg::Typed(TypedMsg::Unknown),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClientRole {
    /// Posts and receives.
    Tab,
    /// Receives only.
    Observer,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HelloPayload {
    pub client_id: String,
    pub role: ClientRole,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "body", rename_all = "snake_case")]
pub enum Frame {
    Hello(HelloPayload),
    Post(ChannelMsg),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireEnvelope {
    #[serde(default)]
    pub version: ProtocolVersion,
    pub channel: String,
    pub sender_id: String,
    pub timestamp: String,
    #[serde(flatten)]
    pub frame: Frame,
}

impl WireEnvelope {
    pub fn new(channel: &str, sender_id: &str, frame: Frame) -> Self {
        Self {
            version: ProtocolVersion::CURRENT,
            channel: channel.to_string(),
            sender_id: sender_id.to_string(),
            timestamp: Utc::now().to_rfc3339(),
            frame,
        }
    }

    pub fn hello(channel: &str, client_id: &str, role: ClientRole) -> Self {
        Self::new(
            channel,
            client_id,
            Frame::Hello(HelloPayload {
                client_id: client_id.to_string(),
                role,
            }),
        )
    }

    pub fn post(channel: &str, sender_id: &str, msg: ChannelMsg) -> Self {
        Self::new(channel, sender_id, Frame::Post(msg))
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FrameError {
    #[error("frame exceeds max size: {size} > {max}")]
    OversizedFrame { size: usize, max: usize },
    #[error("buffer exceeds max size without delimiter: {size} > {max}")]
    OversizedBuffer { size: usize, max: usize },
    #[error("frame encode failed: {0}")]
    Encode(String),
    #[error("frame decode failed: {0}")]
    Decode(String),
}

#[derive(Debug, Clone)]
pub struct DecodeReport<T> {
    pub frames: Vec<T>,
    pub errors: Vec<FrameError>,
}

impl<T> Default for DecodeReport<T> {
    fn default() -> Self {
        Self {
            frames: Vec::new(),
            errors: Vec::new(),
        }
    }
}

pub fn encode_frame<T: Serialize>(
    value: &T,
    max_frame_bytes: usize,
) -> Result<Vec<u8>, FrameError> {
    let mut encoded =
        serde_json::to_vec(value).map_err(|err| FrameError::Encode(err.to_string()))?;
    if encoded.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: encoded.len(),
            max: max_frame_bytes,
        });
    }
    encoded.push(b'\n');
    Ok(encoded)
}

pub fn decode_frame<T: DeserializeOwned>(
    bytes: &[u8],
    max_frame_bytes: usize,
) -> Result<T, FrameError> {
    let raw = trim_line_ending(bytes);
    if raw.len() > max_frame_bytes {
        return Err(FrameError::OversizedFrame {
            size: raw.len(),
            max: max_frame_bytes,
        });
    }
    serde_json::from_slice(raw).map_err(|err| FrameError::Decode(err.to_string()))
}

fn trim_line_ending(bytes: &[u8]) -> &[u8] {
    let mut raw = bytes;
    if raw.ends_with(b"\n") {
        raw = &raw[..raw.len() - 1];
    }
    if raw.ends_with(b"\r") {
        raw = &raw[..raw.len() - 1];
    }
    raw
}

/// Splits a byte stream into newline-delimited JSON frames.
pub struct NdjsonFrameDecoder<T> {
    max_frame_bytes: usize,
    pending: Vec<u8>,
    marker: PhantomData<T>,
}

impl<T> NdjsonFrameDecoder<T> {
    pub fn new(max_frame_bytes: usize) -> Self {
        Self {
            max_frame_bytes,
            pending: Vec::new(),
            marker: PhantomData,
        }
    }
}

impl<T> Default for NdjsonFrameDecoder<T> {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_FRAME_BYTES)
    }
}

impl<T: DeserializeOwned> NdjsonFrameDecoder<T> {
    pub fn push_chunk(&mut self, chunk: &[u8]) -> DecodeReport<T> {
        let mut report = DecodeReport::default();
        self.pending.extend_from_slice(chunk);

        while let Some(newline_idx) = self.pending.iter().position(|byte| *byte == b'\n') {
            let line = self.pending.drain(..=newline_idx).collect::<Vec<u8>>();
            let frame = trim_line_ending(&line);
            if frame.iter().all(|b| b.is_ascii_whitespace()) {
                continue;
            }
            self.decode_raw_frame(frame, &mut report);
        }

        if self.pending.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedBuffer {
                size: self.pending.len(),
                max: self.max_frame_bytes,
            });
            self.pending.clear();
        }

        report
    }

    fn decode_raw_frame(&self, frame: &[u8], report: &mut DecodeReport<T>) {
        if frame.len() > self.max_frame_bytes {
            report.errors.push(FrameError::OversizedFrame {
                size: frame.len(),
                max: self.max_frame_bytes,
            });
            return;
        }
        match serde_json::from_slice(frame) {
            Ok(parsed) => report.frames.push(parsed),
            Err(err) => report.errors.push(FrameError::Decode(err.to_string())),
        }
    }
}
