// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Chain assemblies: the concrete clients, endpoints, managers and proxies
//! built from the stage library.

pub mod client;
pub mod endpoint;
pub mod nsmgr;
pub mod nsmgrproxy;
