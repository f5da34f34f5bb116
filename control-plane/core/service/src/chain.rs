// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Stage contract and continuation dispatch.
//!
//! A chain is an ordered list of stages. A stage may short-circuit, delegate
//! to the rest of the chain exactly once through the owned [`Next`] handle,
//! or (heal only) retry within its budget. An exhausted `Next` behaves as the
//! identity: `request` returns the request's connection unchanged, `close`
//! succeeds.

use std::sync::{Arc, OnceLock};

use tonic::{Status, async_trait};

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};

use crate::context::CallContext;

/// One element of a network service chain.
#[async_trait]
pub trait NetworkServiceStage: Send + Sync + 'static {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status>;

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status>;
}

/// Owned continuation over the remaining stages. Cloneable, so stages that
/// must act later (timeout eviction) can retain their tail.
#[derive(Clone)]
pub struct Next {
    stages: Arc<[Arc<dyn NetworkServiceStage>]>,
    index: usize,
}

impl Next {
    /// A continuation with nothing left to run.
    pub fn empty() -> Self {
        Self {
            stages: Arc::from(Vec::new()),
            index: 0,
        }
    }

    fn advance(&self) -> Self {
        Self {
            stages: self.stages.clone(),
            index: self.index + 1,
        }
    }

    pub async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
    ) -> Result<Connection, Status> {
        match self.stages.get(self.index) {
            Some(stage) => stage.request(ctx, request, self.advance()).await,
            None => Ok(request.connection.unwrap_or_default()),
        }
    }

    pub async fn close(&self, ctx: &mut CallContext, conn: Connection) -> Result<(), Status> {
        match self.stages.get(self.index) {
            Some(stage) => stage.close(ctx, conn, self.advance()).await,
            None => Ok(()),
        }
    }
}

/// An assembled chain. Chains are stages themselves, so a whole chain can be
/// nested as one element of another (the connect stage's per-URL clients).
#[derive(Clone)]
pub struct Chain {
    head: Next,
}

impl Chain {
    pub fn new(stages: Vec<Arc<dyn NetworkServiceStage>>) -> Self {
        Self {
            head: Next {
                stages: stages.into(),
                index: 0,
            },
        }
    }

    pub async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
    ) -> Result<Connection, Status> {
        self.head.request(ctx, request).await
    }

    pub async fn close(&self, ctx: &mut CallContext, conn: Connection) -> Result<(), Status> {
        self.head.close(ctx, conn).await
    }
}

#[async_trait]
impl NetworkServiceStage for Chain {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        _next: Next,
    ) -> Result<Connection, Status> {
        self.head.request(ctx, request).await
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        _next: Next,
    ) -> Result<(), Status> {
        self.head.close(ctx, conn).await
    }
}

/// Late-bound back reference to a chain head.
///
/// Heal and refresh re-enter the chain they are part of; the cycle is broken
/// by injecting this handle at build time and resolving it at call time.
#[derive(Default)]
pub struct LateBound {
    inner: OnceLock<Arc<dyn NetworkServiceStage>>,
}

impl LateBound {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Binds the handle. Later binds are ignored.
    pub fn bind(&self, stage: Arc<dyn NetworkServiceStage>) {
        let _ = self.inner.set(stage);
    }

    pub fn get(&self) -> Option<Arc<dyn NetworkServiceStage>> {
        self.inner.get().cloned()
    }
}
