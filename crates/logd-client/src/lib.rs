// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

//! Fire-and-forget sender for logd.
//!
//! Nothing here ever blocks on or fails because of the logd server: datagrams
//! that cannot be encoded or sent are logged and dropped.

pub mod handler;
pub mod layer;
pub mod sender;
pub mod transport;

pub use handler::{LogHandler, LogRecord};
pub use layer::LogdLayer;
pub use sender::{Delivery, Sender};
pub use transport::{ClientConfig, Transport, TransportError, UdpTransport};
