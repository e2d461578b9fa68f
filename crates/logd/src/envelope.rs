// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Envelope codec shared by the sender and the server.
//!
//! Envelopes travel as MessagePack maps keyed by field name, with the kind
//! carried in the integer `id` field:
//!
//! ```text
//! LOG:     {id: 1, name, path, pid?, time, msg, level, loc?, tb?, rate?}
//! COUNTER: {id: 2, key, value, rate?}
//! TIMER:   {id: 3, key, value, rate?}
//! ```
//!
//! Optional fields are left out of the map when absent and unknown fields are
//! ignored on decode, so older and newer senders can talk to the same server.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::errors::{DecodeError, EncodeError};

/// Wire tag of a log line.
pub const LOG: u8 = 1;
/// Wire tag of a counter delta.
pub const COUNTER: u8 = 2;
/// Wire tag of a timer sample.
pub const TIMER: u8 = 3;

/// Ordinal severity of a log line, from 10 (debug) to 50 (critical).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Level(pub u16);

impl Level {
    pub const DEBUG: Level = Level(10);
    pub const INFO: Level = Level(20);
    pub const WARNING: Level = Level(30);
    pub const ERROR: Level = Level(40);
    pub const CRITICAL: Level = Level(50);

    /// The levels every purge sweeps, whether or not an entry used them.
    pub const STANDARD: [Level; 5] = [
        Level::DEBUG,
        Level::INFO,
        Level::WARNING,
        Level::ERROR,
        Level::CRITICAL,
    ];

    /// Maps a level name, as some senders put it on the wire, to its ordinal.
    pub fn from_name(name: &str) -> Option<Level> {
        match name.trim().to_ascii_uppercase().as_str() {
            "DEBUG" => Some(Level::DEBUG),
            "INFO" => Some(Level::INFO),
            "WARN" | "WARNING" => Some(Level::WARNING),
            "ERROR" => Some(Level::ERROR),
            "CRITICAL" | "FATAL" => Some(Level::CRITICAL),
            _ => None,
        }
    }
}

impl fmt::Display for Level {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Serialize for Level {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u16(self.0)
    }
}

impl<'de> Deserialize<'de> for Level {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u16),
            Name(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(Level(n)),
            Repr::Name(name) => Level::from_name(&name)
                .ok_or_else(|| serde::de::Error::custom(format!("unknown level name {name}"))),
        }
    }
}

fn unsampled() -> f64 {
    1.0
}

fn is_unsampled(rate: &f64) -> bool {
    *rate >= 1.0
}

fn one() -> i64 {
    1
}

/// A structured log line bound for a log path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LogMessage {
    /// Logical log stream, e.g. `web.log`.
    pub path: String,
    /// Name of the logger that emitted the line.
    pub name: String,
    pub level: Level,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pid: Option<u32>,
    /// Seconds since the unix epoch.
    pub time: f64,
    pub msg: String,
    /// Source location, `file function:line`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub loc: Option<String>,
    /// Rendered traceback text; never a raw error value.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tb: Option<String>,
    #[serde(default = "unsampled", skip_serializing_if = "is_unsampled")]
    pub rate: f64,
}

impl LogMessage {
    /// Builds a log line stamped with the current time and process id.
    pub fn new(
        path: impl Into<String>,
        name: impl Into<String>,
        level: Level,
        msg: impl Into<String>,
    ) -> Self {
        Self {
            path: path.into(),
            name: name.into(),
            level,
            pid: Some(std::process::id()),
            time: unix_time(),
            msg: msg.into(),
            loc: None,
            tb: None,
            rate: unsampled(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CounterDelta {
    pub key: String,
    #[serde(default = "one")]
    pub value: i64,
    #[serde(default = "unsampled", skip_serializing_if = "is_unsampled")]
    pub rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimerSample {
    pub key: String,
    /// Duration, in whatever unit the sender reports (usually milliseconds).
    pub value: f64,
    #[serde(default = "unsampled", skip_serializing_if = "is_unsampled")]
    pub rate: f64,
}

/// The unit of ingestion.
#[derive(Debug, Clone, PartialEq)]
pub enum Envelope {
    Log(LogMessage),
    Counter(CounterDelta),
    Timer(TimerSample),
}

impl Envelope {
    /// Wire tag for this envelope.
    pub fn kind(&self) -> u8 {
        match self {
            Envelope::Log(_) => LOG,
            Envelope::Counter(_) => COUNTER,
            Envelope::Timer(_) => TIMER,
        }
    }

    /// Sampling rate the sender applied, 1.0 when unsampled.
    pub fn sample_rate(&self) -> f64 {
        match self {
            Envelope::Log(log) => log.rate,
            Envelope::Counter(counter) => counter.rate,
            Envelope::Timer(timer) => timer.rate,
        }
    }
}

#[derive(Serialize)]
struct Tagged<'a, T> {
    id: u8,
    #[serde(flatten)]
    body: &'a T,
}

#[derive(Deserialize)]
struct Tag {
    id: u8,
}

fn encode_tagged<T: Serialize>(id: u8, body: &T) -> Result<Vec<u8>, EncodeError> {
    Ok(rmp_serde::to_vec_named(&Tagged { id, body })?)
}

/// Encodes an envelope into its wire form.
pub fn encode(envelope: &Envelope) -> Result<Vec<u8>, EncodeError> {
    match envelope {
        Envelope::Log(log) => encode_tagged(LOG, log),
        Envelope::Counter(counter) => encode_tagged(COUNTER, counter),
        Envelope::Timer(timer) => encode_tagged(TIMER, timer),
    }
}

/// Decodes one datagram. The tag is read first, then the whole map is decoded
/// again as the matching payload type.
pub fn decode(buf: &[u8]) -> Result<Envelope, DecodeError> {
    let Tag { id } = rmp_serde::from_slice(buf)?;
    match id {
        LOG => Ok(Envelope::Log(rmp_serde::from_slice(buf)?)),
        COUNTER => Ok(Envelope::Counter(rmp_serde::from_slice(buf)?)),
        TIMER => Ok(Envelope::Timer(rmp_serde::from_slice(buf)?)),
        other => Err(DecodeError::UnknownKind(other)),
    }
}

/// A log line as persisted by the store, with its sequence id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredEntry {
    /// Sequence id within the entry's path.
    pub id: u64,
    /// Address of the sender, when the line arrived over the network.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ip: Option<String>,
    pub log: LogMessage,
}

pub fn encode_entry(entry: &StoredEntry) -> Result<Vec<u8>, EncodeError> {
    Ok(rmp_serde::to_vec_named(entry)?)
}

pub fn decode_entry(buf: &[u8]) -> Result<StoredEntry, DecodeError> {
    Ok(rmp_serde::from_slice(buf)?)
}

/// Current time as float seconds since the unix epoch.
pub fn unix_time() -> f64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or_default()
}
