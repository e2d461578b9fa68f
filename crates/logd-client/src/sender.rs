// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::sync::Mutex;

use logd::envelope::{encode, CounterDelta, Envelope, TimerSample};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tracing::warn;

use crate::transport::Transport;

/// What happened to an envelope handed to [`Sender::send`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Handed to the transport.
    Sent,
    /// Dropped by sampling.
    Sampled,
    /// Could not be encoded or sent; the failure was logged.
    Failed,
}

/// Samples, encodes and transmits envelopes.
pub struct Sender<T> {
    transport: T,
    rng: Mutex<StdRng>,
}

impl<T: Transport> Sender<T> {
    pub fn new(transport: T) -> Self {
        Self::with_rng(transport, StdRng::from_os_rng())
    }

    /// Uses the given random source for sampling decisions.
    pub fn with_rng(transport: T, rng: StdRng) -> Self {
        Self {
            transport,
            rng: Mutex::new(rng),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Sends one envelope. Envelopes with a rate below 1 are kept with that
    /// probability. Never fails: errors are logged and reported as
    /// [`Delivery::Failed`].
    pub fn send(&self, envelope: &Envelope) -> Delivery {
        let rate = envelope.sample_rate();
        if rate < 1.0 && !self.keep(rate) {
            return Delivery::Sampled;
        }

        let datagram = match encode(envelope) {
            Ok(datagram) => datagram,
            Err(e) => {
                warn!("Failed to encode {:?}: {}", envelope, e);
                return Delivery::Failed;
            }
        };

        match self.transport.send_to(&datagram) {
            Ok(()) => Delivery::Sent,
            Err(e) => {
                warn!("Dropping envelope of kind {}: {}", envelope.kind(), e);
                Delivery::Failed
            }
        }
    }

    fn keep(&self, rate: f64) -> bool {
        #[allow(clippy::expect_used)]
        let mut rng = self.rng.lock().expect("lock poisoned");
        rng.random::<f64>() <= rate
    }

    pub fn increment(&self, key: &str, rate: f64) -> Delivery {
        self.change_by(key, 1, rate)
    }

    pub fn decrement(&self, key: &str, rate: f64) -> Delivery {
        self.change_by(key, -1, rate)
    }

    /// Changes a counter by `by`, which may be negative.
    pub fn change_by(&self, key: &str, by: i64, rate: f64) -> Delivery {
        self.send(&Envelope::Counter(CounterDelta {
            key: key.to_string(),
            value: by,
            rate,
        }))
    }

    /// Records one timing sample.
    pub fn timer(&self, key: &str, value: f64, rate: f64) -> Delivery {
        self.send(&Envelope::Timer(TimerSample {
            key: key.to_string(),
            value,
            rate,
        }))
    }
}
