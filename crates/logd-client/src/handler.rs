// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::error::Error;
use std::fmt::Write;
use std::sync::Arc;

use logd::envelope::{unix_time, Envelope, Level, LogMessage};

use crate::sender::{Delivery, Sender};
use crate::transport::Transport;

/// A log record as produced by an application logger.
#[derive(Debug, Clone)]
pub struct LogRecord<'a> {
    pub name: &'a str,
    pub level: Level,
    pub msg: &'a str,
    pub pid: u32,
    pub time: f64,
    /// Source location, `file function:line`.
    pub loc: Option<String>,
    pub error: Option<&'a (dyn Error + 'static)>,
}

impl<'a> LogRecord<'a> {
    /// A record stamped with the current time and process id.
    pub fn new(name: &'a str, level: Level, msg: &'a str) -> Self {
        Self {
            name,
            level,
            msg,
            pid: std::process::id(),
            time: unix_time(),
            loc: None,
            error: None,
        }
    }

    #[must_use]
    pub fn location(mut self, file: &str, function: &str, line: u32) -> Self {
        self.loc = Some(format!("{file} {function}:{line}"));
        self
    }

    #[must_use]
    pub fn error(mut self, error: &'a (dyn Error + 'static)) -> Self {
        self.error = Some(error);
        self
    }
}

/// Sends log records to one logd path.
pub struct LogHandler<T> {
    path: String,
    sender: Arc<Sender<T>>,
}

impl<T> Clone for LogHandler<T> {
    fn clone(&self) -> Self {
        Self {
            path: self.path.clone(),
            sender: Arc::clone(&self.sender),
        }
    }
}

impl<T: Transport> LogHandler<T> {
    pub fn new(path: impl Into<String>, sender: Arc<Sender<T>>) -> Self {
        Self {
            path: path.into(),
            sender,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Builds the LOG payload for a record. An attached error is captured as
    /// rendered text only.
    pub fn make_message(&self, record: &LogRecord<'_>) -> LogMessage {
        LogMessage {
            path: self.path.clone(),
            name: record.name.to_string(),
            level: record.level,
            pid: Some(record.pid),
            time: record.time,
            msg: record.msg.to_string(),
            loc: record.loc.clone(),
            tb: record.error.map(render_traceback),
            rate: 1.0,
        }
    }

    pub fn emit(&self, record: &LogRecord<'_>) -> Delivery {
        self.send(self.make_message(record))
    }

    /// Sends an already built message to this handler's path.
    pub fn send(&self, mut log: LogMessage) -> Delivery {
        log.path.clone_from(&self.path);
        self.sender.send(&Envelope::Log(log))
    }
}

/// Renders an error and its chain of sources.
///
/// ```
/// use std::io;
/// use logd_client::handler::render_traceback;
///
/// let error = io::Error::new(io::ErrorKind::Other, "disk on fire");
/// assert_eq!(render_traceback(&error), "disk on fire");
/// ```
pub fn render_traceback(error: &(dyn Error + 'static)) -> String {
    let mut rendered = error.to_string();
    let mut source = error.source();
    if source.is_some() {
        rendered.push_str("\n\nCaused by:");
    }
    let mut depth = 0;
    while let Some(cause) = source {
        let _ = write!(rendered, "\n    {depth}: {cause}");
        source = cause.source();
        depth += 1;
    }
    rendered
}
