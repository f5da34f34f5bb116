// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Path stamping.
//!
//! Every chain element that represents a hop appends (or refreshes) its
//! [`PathSegment`] as the request descends: empty path starts one, a segment
//! with this element's name at the current or next index is refreshed in
//! place, and a fresh name at the end of the path is appended. Anything else
//! is a broken path. Segments grow monotonically during a single traversal
//! and a refresh preserves both the connection id and the path length.

use std::sync::Arc;

use tonic::{Status, async_trait};
use uuid::Uuid;

use weft_api::networkservice::v1::{Connection, NetworkServiceRequest, Path, PathSegment};
use weft_auth::TokenProvider;
use weft_registry::clock::to_timestamp;

use crate::chain::{NetworkServiceStage, Next};
use crate::context::CallContext;

pub struct UpdatePath {
    name: String,
    token_provider: Arc<dyn TokenProvider>,
}

impl UpdatePath {
    pub fn new(name: &str, token_provider: Arc<dyn TokenProvider>) -> Self {
        Self {
            name: name.to_string(),
            token_provider,
        }
    }

    fn stamp(&self, segment: &mut PathSegment) -> Result<(), Status> {
        let token = self
            .token_provider
            .generate(&self.name)
            .map_err(|e| Status::internal(format!("token generation failed: {}", e)))?;
        segment.token = token.token;
        segment.expires = Some(to_timestamp(token.expires_at));
        Ok(())
    }

    fn fresh_segment(&self) -> Result<PathSegment, Status> {
        let mut segment = PathSegment {
            name: self.name.clone(),
            id: Uuid::new_v4().to_string(),
            ..Default::default()
        };
        self.stamp(&mut segment)?;
        Ok(segment)
    }

    /// Applies the stamping rules and returns this element's segment index.
    fn update(&self, path: &mut Path) -> Result<u32, Status> {
        if path.path_segments.is_empty() {
            path.path_segments.push(self.fresh_segment()?);
            path.index = 0;
            return Ok(0);
        }

        let index = path.index as usize;
        if index >= path.path_segments.len() {
            return Err(Status::invalid_argument("path index out of bounds"));
        }

        // refresh at the current position
        if path.path_segments[index].name == self.name {
            self.stamp(&mut path.path_segments[index])?;
            return Ok(path.index);
        }

        // descend to the next position
        match path.path_segments.get(index + 1) {
            Some(segment) if segment.name == self.name => {
                self.stamp(&mut path.path_segments[index + 1])?;
            }
            Some(_) => {
                return Err(Status::invalid_argument(
                    "path does not match the traversed chain",
                ));
            }
            None => {
                let segment = self.fresh_segment()?;
                path.path_segments.push(segment);
            }
        }

        path.index += 1;
        Ok(path.index)
    }

    /// Moves the index forward for a Close traversal without touching tokens.
    fn advance_for_close(&self, path: &mut Path) {
        let index = path.index as usize;
        if path
            .path_segments
            .get(index)
            .is_some_and(|s| s.name == self.name)
        {
            return;
        }
        if path
            .path_segments
            .get(index + 1)
            .is_some_and(|s| s.name == self.name)
        {
            path.index += 1;
        }
    }
}

#[async_trait]
impl NetworkServiceStage for UpdatePath {
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
        if conn.id.is_empty() {
            return Err(Status::invalid_argument("connection id is required"));
        }

        let own_index = self.update(conn.path_mut())?;

        let mut conn = next.request(ctx, request).await?;

        // the expected segment must survive the round trip
        let path = conn
            .path
            .as_mut()
            .ok_or_else(|| Status::internal("path lost in response"))?;
        match path.path_segments.get(own_index as usize) {
            Some(segment) if segment.name == self.name => {}
            _ => {
                return Err(Status::internal(
                    "own path segment missing in response",
                ));
            }
        }
        path.index = own_index;

        Ok(conn)
    }

    async fn close(
        &self,
        ctx: &mut CallContext,
        mut conn: Connection,
        next: Next,
    ) -> Result<(), Status> {
        if let Some(path) = conn.path.as_mut() {
            self.advance_for_close(path);
        }
        next.close(ctx, conn).await
    }
}
