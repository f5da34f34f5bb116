// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Wire contracts of the WEFT control plane.
//!
//! The `networkservice.v1` and `registry.v1` packages are generated from the
//! protos under `proto/v1/` and committed under `src/gen/`.

pub mod networkservice {
    pub mod v1 {
        include!("gen/networkservice.v1.rs");
    }
}

pub mod registry {
    pub mod v1 {
        include!("gen/registry.v1.rs");
    }
}

pub use tonic::Status;

/// Mechanism classes understood by the chain.
pub mod cls {
    /// Mechanism local to a single node.
    pub const LOCAL: &str = "LOCAL";
    /// Mechanism spanning two nodes.
    pub const REMOTE: &str = "REMOTE";
}

/// Well-known mechanism types carried opaquely to forwarders.
pub mod mechanisms {
    pub const KERNEL: &str = "KERNEL";
    pub const VXLAN: &str = "VXLAN";
    pub const WIREGUARD: &str = "WIREGUARD";
}

impl networkservice::v1::Path {
    /// Segment the index currently points at, if any.
    pub fn current_segment(&self) -> Option<&networkservice::v1::PathSegment> {
        self.path_segments.get(self.index as usize)
    }

    /// Segment of the element the message was received from: the one right
    /// before the current index.
    pub fn previous_segment(&self) -> Option<&networkservice::v1::PathSegment> {
        let index = (self.index as usize).checked_sub(1)?;
        self.path_segments.get(index)
    }
}

impl networkservice::v1::Connection {
    /// Path of the connection, creating an empty one when unset.
    pub fn path_mut(&mut self) -> &mut networkservice::v1::Path {
        self.path.get_or_insert_with(networkservice::v1::Path::default)
    }
}

#[cfg(test)]
mod tests {
    use super::networkservice::v1::{Connection, Path, PathSegment};

    #[test]
    fn test_path_segment_accessors() {
        let path = Path {
            index: 1,
            path_segments: vec![
                PathSegment {
                    name: "nsc".to_string(),
                    ..Default::default()
                },
                PathSegment {
                    name: "nsmgr".to_string(),
                    ..Default::default()
                },
            ],
        };

        assert_eq!(path.current_segment().unwrap().name, "nsmgr");
        assert_eq!(path.previous_segment().unwrap().name, "nsc");

        let empty = Path::default();
        assert!(empty.current_segment().is_none());
        assert!(empty.previous_segment().is_none());
    }

    #[test]
    fn test_connection_path_mut_inserts_default() {
        let mut conn = Connection::default();
        assert!(conn.path.is_none());
        conn.path_mut().index = 3;
        assert_eq!(conn.path.as_ref().unwrap().index, 3);
    }
}
