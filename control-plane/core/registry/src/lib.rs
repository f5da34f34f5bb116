// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Registry chains of the WEFT control plane.
//!
//! Network services and their endpoints are registered, discovered and
//! watched through ordered chains of stages sharing one contract
//! (`register`/`find`/`unregister`). The in-memory store, the lease
//! expiration sweeper, the remote-registry connect stage and the interdomain
//! forwarding stages all compose through the same [`chain`] module.

pub mod chain;
pub mod client;
pub mod clienturl;
pub mod clock;
pub mod connect;
pub mod context;
pub mod interdomain;
pub mod matches;
pub mod memory;
pub mod proxy;
pub mod refresh;
pub mod server;

pub use tonic::Status;

pub use chain::{
    NsNext, NsRegistryChain, NsResponseStream, NseNext, NseRegistryChain, NseResponseStream,
    NsRegistryStage, NseRegistryStage,
};
pub use context::RegistryContext;
