// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SdkError {
    #[error("Request to {url} failed: {source}")]
    Transport {
        url: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("Node answered {url} with {status}: {message}")]
    Remote { url: String, status: u16, message: String },

    #[error("Invalid bootstrap value for {name}: {value}")]
    Bootstrap { name: &'static str, value: String },

    #[error("Only the master agent can spawn workers")]
    NotMaster,

    #[error("Count must be between 1 and 65,534, got {0}")]
    InvalidCount(u32),

    #[error("Agent host I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SdkError>;
