// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Errors raised while turning a configuration into a live channel or server.
#[derive(Error, Debug)]
pub enum ConfigError {
    // Endpoint validation
    #[error("missing endpoint")]
    MissingEndpoint,
    #[error("error parsing URI: {0}")]
    UriParseError(String),
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    // Unix domain sockets
    #[error("unix socket endpoint is missing a path")]
    UnixSocketMissingPath,
    #[error("unix sockets are not supported on this platform")]
    UnixSocketUnsupported,

    // Listener setup
    #[error("error parsing socket address: {0}")]
    AddrParseError(#[from] std::net::AddrParseError),
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    // Pool
    #[error("channel pool is shut down")]
    PoolClosed,
}
