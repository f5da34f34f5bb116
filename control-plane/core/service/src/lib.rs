// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Network service chains of the WEFT control plane.
//!
//! A connection request flows through an ordered pipeline of stages sharing
//! one two-method contract (`request`/`close`). Stages inspect and mutate the
//! request, descend through an owned [`chain::Next`] continuation, and
//! observe the downstream result on the way back. The assemblies under
//! [`chains`] wire the stages into clients, endpoints, managers and
//! interdomain proxies.

pub mod authorize;
pub mod chain;
pub mod chains;
pub mod clienturl;
pub mod connect;
pub mod context;
pub mod discover;
pub mod heal;
pub mod interpose;
pub mod mechanisms;
pub mod mechanismtranslation;
pub mod refresh;
pub mod serialize;
pub mod server;
pub mod timeout;
pub mod trace;
pub mod updatepath;

pub use tonic::Status;

pub use chain::{Chain, LateBound, NetworkServiceStage, Next};
pub use context::CallContext;
