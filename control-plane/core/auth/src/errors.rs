// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AuthError {
    #[error("peer identity is empty")]
    EmptyPeer,
    #[error("token is missing")]
    MissingToken,
    #[error("token expired")]
    TokenExpired,
}
