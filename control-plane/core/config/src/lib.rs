// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Configuration and plumbing for the WEFT gRPC surfaces: client channels
//! (`tcp://` and `unix://`), server listeners with graceful shutdown, and the
//! shared per-URL channel pool.

pub mod component;
pub mod grpc;
