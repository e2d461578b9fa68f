// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the codec, the log store and configuration.

/// Error encoding an envelope or a stored entry.
#[derive(Debug, thiserror::Error)]
#[error("failed to encode: {0}")]
pub struct EncodeError(#[from] pub rmp_serde::encode::Error);

/// Error decoding a datagram or a stored entry.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("malformed envelope: {0}")]
    Malformed(#[from] rmp_serde::decode::Error),
    #[error("unknown envelope kind {0}")]
    UnknownKind(u8),
}

/// Errors emitted by the log store and its backends.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database error: {0}")]
    Db(#[from] sled::Error),
    #[error("filesystem error: {0}")]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Encode(#[from] EncodeError),
    #[error("store consistency error: {0}")]
    Consistency(String),
}

/// Errors raised while loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}
