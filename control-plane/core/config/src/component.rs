// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

use crate::grpc::errors::ConfigError;

/// Implemented by every deserializable configuration struct in the workspace.
pub trait Configuration {
    fn validate(&self) -> Result<(), ConfigError>;
}
