// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Compact change logging for chain traffic.
//!
//! The stage keeps the previous request and response per connection id as
//! structural trees and logs only what changed between successive messages:
//! scalars by value, repeated fields and maps per key with `+key`/`-key`
//! markers, nested messages recursively.

pub mod diff;
pub mod value;

use std::collections::HashMap;

use parking_lot::Mutex;
use serde_json::Value;
use tonic::{Status, async_trait};
use tracing::debug;

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest};

use crate::chain::{NetworkServiceStage, Next};
use crate::context::CallContext;

#[derive(Default)]
struct TraceInfo {
    request: Option<Value>,
    response: Option<Value>,
}

#[derive(Default)]
pub struct Trace {
    conns: Mutex<HashMap<String, TraceInfo>>,
}

impl Trace {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl NetworkServiceStage for Trace {
    async fn request(
        &self,
        ctx: &mut CallContext,
        request: NetworkServiceRequest,
        next: Next,
    ) -> Result<Connection, Status> {
        let id = request
            .connection
            .as_ref()
            .map(|c| c.id.clone())
            .unwrap_or_default();

        let request_value = value::request_value(&request);
        {
            let mut conns = self.conns.lock();
            let info = conns.entry(id.clone()).or_default();
            match info.request.as_ref() {
                Some(previous) => {
                    if let Some(changes) = diff::diff(previous, &request_value) {
                        debug!(conn_id = %id, diff = %changes, "request diff");
                    }
                }
                None => {
                    debug!(conn_id = %id, request = %request_value, "request");
                }
            }
            info.request = Some(request_value);
        }

        let result = next.request(ctx, request).await;

        match &result {
            Ok(conn) => {
                let response_value = value::connection_value(conn);
                let mut conns = self.conns.lock();
                let info = conns.entry(id.clone()).or_default();
                match info.response.as_ref() {
                    Some(previous) => {
                        if let Some(changes) = diff::diff(previous, &response_value) {
                            debug!(conn_id = %id, diff = %changes, "response diff");
                        }
                    }
                    None => {
                        debug!(conn_id = %id, response = %response_value, "response");
                    }
                }
                info.response = Some(response_value);
            }
            Err(e) => {
                debug!(conn_id = %id, error = %e, "request failed");
            }
        }

        result
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        debug!(conn_id = %conn.id, "close");
        self.conns.lock().remove(&conn.id);
        next.close(ctx, conn).await
    }
}
