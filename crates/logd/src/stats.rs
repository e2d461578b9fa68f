// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Raw counter and timer recording.
//!
//! Counters are scaled by their sample rate and summed, timer samples are
//! kept as received. Turning them into rates or percentiles is left to
//! whoever consumes a [`StatsSnapshot`].

use hashbrown::HashMap;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error};

use crate::envelope::{CounterDelta, TimerSample};

#[derive(Debug, Clone, PartialEq)]
pub enum Stat {
    Counter(CounterDelta),
    Timer(TimerSample),
}

#[derive(Debug)]
pub enum StatsCommand {
    Record(Vec<Stat>),
    Snapshot(oneshot::Sender<StatsSnapshot>),
    Shutdown,
}

/// Everything recorded since the previous snapshot.
#[derive(Debug, Default, Clone, PartialEq)]
pub struct StatsSnapshot {
    pub counters: HashMap<String, f64>,
    pub timers: HashMap<String, Vec<f64>>,
}

impl StatsSnapshot {
    pub fn is_empty(&self) -> bool {
        self.counters.is_empty() && self.timers.is_empty()
    }
}

#[derive(Clone)]
pub struct StatsHandle {
    tx: mpsc::UnboundedSender<StatsCommand>,
}

impl StatsHandle {
    pub fn record(&self, stats: Vec<Stat>) -> Result<(), mpsc::error::SendError<StatsCommand>> {
        self.tx.send(StatsCommand::Record(stats))
    }

    /// Drains and returns the recorded stats.
    pub async fn snapshot(&self) -> Result<StatsSnapshot, String> {
        let (response_tx, response_rx) = oneshot::channel();
        self.tx
            .send(StatsCommand::Snapshot(response_tx))
            .map_err(|e| format!("Failed to send snapshot command: {}", e))?;

        response_rx
            .await
            .map_err(|e| format!("Failed to receive snapshot response: {}", e))
    }

    pub fn shutdown(&self) -> Result<(), mpsc::error::SendError<StatsCommand>> {
        self.tx.send(StatsCommand::Shutdown)
    }
}

pub struct StatsService {
    current: StatsSnapshot,
    rx: mpsc::UnboundedReceiver<StatsCommand>,
}

impl StatsService {
    pub fn new() -> (Self, StatsHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let service = Self {
            current: StatsSnapshot::default(),
            rx,
        };
        (service, StatsHandle { tx })
    }

    fn record(&mut self, stat: Stat) {
        match stat {
            Stat::Counter(counter) => {
                let rate = if counter.rate > 0.0 { counter.rate } else { 1.0 };
                *self.current.counters.entry(counter.key).or_insert(0.0) +=
                    counter.value as f64 / rate;
            }
            Stat::Timer(timer) => {
                self.current
                    .timers
                    .entry(timer.key)
                    .or_default()
                    .push(timer.value);
            }
        }
    }

    pub async fn run(mut self) {
        debug!("Stats service started");

        while let Some(command) = self.rx.recv().await {
            match command {
                StatsCommand::Record(stats) => {
                    for stat in stats {
                        self.record(stat);
                    }
                }

                StatsCommand::Snapshot(response_tx) => {
                    let snapshot = std::mem::take(&mut self.current);
                    if response_tx.send(snapshot).is_err() {
                        error!("Failed to send snapshot response - receiver dropped");
                    }
                }

                StatsCommand::Shutdown => {
                    debug!("Stats service shutting down");
                    break;
                }
            }
        }

        debug!("Stats service stopped");
    }
}
