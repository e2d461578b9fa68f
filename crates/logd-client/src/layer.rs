// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Forwards `tracing` events to logd as log lines.

use std::error::Error;
use std::fmt::{self, Write};

use logd::envelope::{Level, LogMessage};
use tracing::field::{Field, Visit};
use tracing::{Event, Subscriber};
use tracing_subscriber::layer::{Context, Layer};

use crate::handler::{render_traceback, LogHandler};
use crate::transport::Transport;

// Events emitted by this crate would otherwise loop back into the sender.
const CLIENT_TARGET: &str = "logd_client";

/// Layer that sends every event to a logd path. The event target becomes the
/// logger name, the `message` field the message and an `error` field the
/// traceback. Other fields are appended to the message as `key=value`.
pub struct LogdLayer<T> {
    handler: LogHandler<T>,
}

impl<T: Transport> LogdLayer<T> {
    pub fn new(handler: LogHandler<T>) -> Self {
        Self { handler }
    }
}

fn level_for(level: &tracing::Level) -> Level {
    match *level {
        tracing::Level::TRACE | tracing::Level::DEBUG => Level::DEBUG,
        tracing::Level::INFO => Level::INFO,
        tracing::Level::WARN => Level::WARNING,
        tracing::Level::ERROR => Level::ERROR,
    }
}

#[derive(Default)]
struct EventVisitor {
    message: String,
    fields: String,
    tb: Option<String>,
}

impl EventVisitor {
    fn into_msg(self) -> String {
        if self.fields.is_empty() {
            self.message
        } else if self.message.is_empty() {
            self.fields.trim_start().to_string()
        } else {
            self.message + &self.fields
        }
    }
}

impl Visit for EventVisitor {
    fn record_str(&mut self, field: &Field, value: &str) {
        if field.name() == "message" {
            self.message = value.to_string();
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_error(&mut self, field: &Field, value: &(dyn Error + 'static)) {
        if field.name() == "error" {
            self.tb = Some(render_traceback(value));
        } else {
            let _ = write!(self.fields, " {}={}", field.name(), value);
        }
    }

    fn record_debug(&mut self, field: &Field, value: &dyn fmt::Debug) {
        if field.name() == "message" {
            self.message = format!("{value:?}");
        } else {
            let _ = write!(self.fields, " {}={:?}", field.name(), value);
        }
    }
}

impl<S, T> Layer<S> for LogdLayer<T>
where
    S: Subscriber,
    T: Transport + 'static,
{
    fn on_event(&self, event: &Event<'_>, _ctx: Context<'_, S>) {
        let metadata = event.metadata();
        if metadata.target().starts_with(CLIENT_TARGET) {
            return;
        }

        let mut visitor = EventVisitor::default();
        event.record(&mut visitor);
        let tb = visitor.tb.take();

        let mut log = LogMessage::new(
            self.handler.path(),
            metadata.target(),
            level_for(metadata.level()),
            visitor.into_msg(),
        );
        log.loc = metadata.file().map(|file| {
            format!(
                "{} {}:{}",
                file,
                metadata.module_path().unwrap_or_default(),
                metadata.line().unwrap_or_default()
            )
        });
        log.tb = tb;

        self.handler.send(log);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::sender::tests::RecordingTransport;
    use crate::sender::Sender;
    use logd::envelope::Envelope;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::Arc;
    use tracing_subscriber::layer::SubscriberExt;

    fn logs(transport: &RecordingTransport) -> Vec<LogMessage> {
        transport
            .envelopes()
            .into_iter()
            .filter_map(|envelope| match envelope {
                Envelope::Log(log) => Some(log),
                _ => None,
            })
            .collect()
    }

    fn with_layer(f: impl FnOnce()) -> Arc<RecordingTransport> {
        let transport = Arc::new(RecordingTransport::default());
        let sender = Sender::with_rng(Arc::clone(&transport), StdRng::seed_from_u64(1));
        let handler = LogHandler::new("app.log", Arc::new(sender));
        let subscriber = tracing_subscriber::registry().with(LogdLayer::new(handler));
        tracing::subscriber::with_default(subscriber, f);
        transport
    }

    #[test]
    fn test_events_become_log_lines() {
        let transport = with_layer(|| {
            tracing::info!(target: "app::web", user = 7, "signed in");
            tracing::warn!(target: "app::db", "slow query");
        });

        let logs = logs(&transport);
        assert_eq!(logs.len(), 2);
        assert_eq!(logs[0].path, "app.log");
        assert_eq!(logs[0].name, "app::web");
        assert_eq!(logs[0].level, Level::INFO);
        assert_eq!(logs[0].msg, "signed in user=7");
        assert!(logs[0].loc.as_deref().unwrap().contains("layer.rs"));
        assert_eq!(logs[1].level, Level::WARNING);
        assert_eq!(logs[1].msg, "slow query");
    }

    #[test]
    fn test_error_field_becomes_traceback() {
        let transport = with_layer(|| {
            let error = std::io::Error::new(std::io::ErrorKind::NotFound, "no such table");
            let error: &(dyn Error + 'static) = &error;
            tracing::error!(target: "app::db", error, "lookup failed");
        });

        let logs = logs(&transport);
        assert_eq!(logs[0].level, Level::ERROR);
        assert_eq!(logs[0].msg, "lookup failed");
        assert_eq!(logs[0].tb.as_deref(), Some("no such table"));
    }

    #[test]
    fn test_client_events_are_skipped() {
        let transport = with_layer(|| {
            tracing::warn!(target: "logd_client::sender", "Dropping envelope");
            tracing::debug!(target: "app", "kept");
        });

        let logs = logs(&transport);
        assert_eq!(logs.len(), 1);
        assert_eq!(logs[0].level, Level::DEBUG);
        assert_eq!(logs[0].msg, "kept");
    }
}
