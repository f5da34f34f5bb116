// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Mechanism selection at the end of an endpoint chain.

use tonic::{Status, async_trait};

use weft_api::networkservice::v1::{Connection, Mechanism, NetworkServiceRequest};
use weft_api::{cls, mechanisms};

use crate::chain::{NetworkServiceStage, Next};
use crate::context::CallContext;

/// Picks the datapath mechanism for the connection: the first supported
/// preference the client proposed, or the default kernel mechanism when the
/// preferences are empty (a translated boundary crossing).
pub struct SelectMechanism {
    supported: Vec<String>,
}

impl SelectMechanism {
    pub fn new() -> Self {
        Self {
            supported: vec![mechanisms::KERNEL.to_string()],
        }
    }

    pub fn with_supported(supported: Vec<String>) -> Self {
        Self { supported }
    }

    fn default_mechanism(&self) -> Mechanism {
        Mechanism {
            cls: cls::LOCAL.to_string(),
            r#type: self
                .supported
                .first()
                .cloned()
                .unwrap_or_else(|| mechanisms::KERNEL.to_string()),
            ..Default::default()
        }
    }
}

impl Default for SelectMechanism {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NetworkServiceStage for SelectMechanism {
    async fn request(
        &self,
        ctx: &mut CallContext,
        mut request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status> {
        let conn = request
            .connection
            .as_mut()
            .ok_or_else(|| Status::invalid_argument("connection is required"))?;

        if conn.mechanism.is_none() {
            let chosen = request
                .mechanism_preferences
                .iter()
                .find(|m| self.supported.iter().any(|s| s == &m.r#type))
                .cloned()
                .unwrap_or_else(|| self.default_mechanism());
            conn.mechanism = Some(chosen);
        }

        next.request(ctx, request).await
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        next.close(ctx, conn).await
    }
}
