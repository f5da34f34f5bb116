// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Mechanism namespace translation at a boundary crossing.
//!
//! A forwarder's outgoing leg speaks the local mechanism namespace while its
//! upstream negotiated a remote one. On the way down the stage strips the
//! negotiated mechanism and the preferences so the inner chain negotiates
//! fresh local mechanisms; on the way back it restores the original, leaving
//! the connection context untouched.

use tonic::{Status, async_trait};

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};

use crate::chain::{NetworkServiceStage, Next};
use crate::context::CallContext;

#[derive(Debug, Default)]
pub struct MechanismTranslation;

impl MechanismTranslation {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NetworkServiceStage for MechanismTranslation {
    async fn request(
        &self,
        ctx: &mut CallContext,
        mut request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status> {
        let saved_preferences = std::mem::take(&mut request.mechanism_preferences);
        let saved_mechanism = request
            .connection
            .as_mut()
            .and_then(|c| c.mechanism.take());

        let mut conn = next.request(ctx, request).await?;

        let restored = saved_mechanism.or_else(|| saved_preferences.first().cloned());
        if let Some(mechanism) = restored {
            conn.mechanism = Some(mechanism);
        }

        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        mut conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        conn.mechanism = None;
        next.close(ctx, conn).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::Chain;
    use crate::mechanisms::SelectMechanism;
    use std::sync::Arc;
    use weft_api::networkservice::v1::Mechanism;
    use weft_api::{cls, mechanisms};

    #[tokio::test]
    async fn test_inner_chain_negotiates_fresh_then_original_is_restored() {
        // translation in front of a local mechanism selection
        let chain = Chain::new(vec![
            Arc::new(MechanismTranslation::new()) as Arc<dyn NetworkServiceStage>,
            Arc::new(SelectMechanism::new()),
        ]);

        let remote = Mechanism {
            cls: cls::REMOTE.to_string(),
            r#type: mechanisms::VXLAN.to_string(),
            ..Default::default()
        };

        let mut ctx = CallContext::new();
        let conn = chain
            .request(
                &mut ctx,
                NetworkServiceRequest {
                    connection: Some(Connection {
                        id: "1".to_string(),
                        mechanism: Some(remote.clone()),
                        ..Default::default()
                    }),
                    mechanism_preferences: vec![remote.clone()],
                },
            )
            .await
            .unwrap();

        // the caller sees its remote mechanism again
        assert_eq!(conn.mechanism.unwrap(), remote);
    }

    #[tokio::test]
    async fn test_context_is_untouched() {
        use weft_api::networkservice::v1::ConnectionContext;

        let chain = Chain::new(vec![
            Arc::new(MechanismTranslation::new()) as Arc<dyn NetworkServiceStage>
        ]);

        let context = ConnectionContext {
            mtu: 1450,
            ..Default::default()
        };

        let mut ctx = CallContext::new();
        let conn = chain
            .request(
                &mut ctx,
                NetworkServiceRequest {
                    connection: Some(Connection {
                        id: "1".to_string(),
                        context: Some(context.clone()),
                        ..Default::default()
                    }),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(conn.context.unwrap(), context);
    }
}
