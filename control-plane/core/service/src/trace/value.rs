// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Structural projections of the wire messages for the differ. Maps come out
//! as sorted objects so diffs are deterministic.

use std::collections::HashMap;

use serde_json::{Map, Value, json};

use weft_api::networkservice::v1::{
    Connection, ConnectionContext, Mechanism, NetworkServiceRequest, Path, PathSegment,
};

fn string_map(map: &HashMap<String, String>) -> Value {
    Value::Object(
        map.iter()
            .map(|(k, v)| (k.clone(), Value::String(v.clone())))
            .collect::<Map<String, Value>>(),
    )
}

fn option<T>(value: Option<&T>, f: impl Fn(&T) -> Value) -> Value {
    value.map(f).unwrap_or(Value::Null)
}

pub fn mechanism_value(mechanism: &Mechanism) -> Value {
    json!({
        "cls": mechanism.cls,
        "type": mechanism.r#type,
        "parameters": string_map(&mechanism.parameters),
    })
}

pub fn segment_value(segment: &PathSegment) -> Value {
    json!({
        "name": segment.name,
        "id": segment.id,
        "token": segment.token,
        "expires": option(segment.expires.as_ref(), |t| {
            Value::String(format!("{}.{:09}", t.seconds, t.nanos))
        }),
    })
}

pub fn path_value(path: &Path) -> Value {
    json!({
        "index": path.index,
        "path_segments": path
            .path_segments
            .iter()
            .map(segment_value)
            .collect::<Vec<_>>(),
    })
}

fn context_value(context: &ConnectionContext) -> Value {
    json!({
        "ip_context": option(context.ip_context.as_ref(), |ip| json!({
            "src_ip_addrs": ip.src_ip_addrs,
            "dst_ip_addrs": ip.dst_ip_addrs,
            "src_routes": ip.src_routes.iter().map(|r| r.prefix.clone()).collect::<Vec<_>>(),
            "dst_routes": ip.dst_routes.iter().map(|r| r.prefix.clone()).collect::<Vec<_>>(),
            "excluded_prefixes": ip.excluded_prefixes,
        })),
        "dns_context": option(context.dns_context.as_ref(), |dns| json!({
            "servers": dns.servers,
            "search_domains": dns.search_domains,
        })),
        "ethernet_context": option(context.ethernet_context.as_ref(), |eth| json!({
            "src_mac": eth.src_mac,
            "dst_mac": eth.dst_mac,
            "vlan_tag": eth.vlan_tag,
        })),
        "extra_context": string_map(&context.extra_context),
        "mtu": context.mtu,
    })
}

pub fn connection_value(conn: &Connection) -> Value {
    json!({
        "id": conn.id,
        "network_service": conn.network_service,
        "mechanism": option(conn.mechanism.as_ref(), mechanism_value),
        "context": option(conn.context.as_ref(), context_value),
        "labels": string_map(&conn.labels),
        "path": option(conn.path.as_ref(), path_value),
        "network_service_endpoint_name": conn.network_service_endpoint_name,
        "payload": conn.payload,
    })
}

pub fn request_value(request: &NetworkServiceRequest) -> Value {
    json!({
        "connection": option(request.connection.as_ref(), connection_value),
        "mechanism_preferences": request
            .mechanism_preferences
            .iter()
            .map(mechanism_value)
            .collect::<Vec<_>>(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trace::diff::diff;

    #[test]
    fn test_connection_projection_is_stable() {
        let conn = Connection {
            id: "1".to_string(),
            network_service: "svc".to_string(),
            ..Default::default()
        };
        assert_eq!(
            diff(&connection_value(&conn), &connection_value(&conn)),
            None
        );
    }

    #[test]
    fn test_path_growth_is_visible() {
        let mut conn = Connection {
            id: "1".to_string(),
            path: Some(Path {
                index: 0,
                path_segments: vec![PathSegment {
                    name: "nsc".to_string(),
                    ..Default::default()
                }],
            }),
            ..Default::default()
        };
        let before = connection_value(&conn);

        conn.path.as_mut().unwrap().path_segments.push(PathSegment {
            name: "nsmgr".to_string(),
            ..Default::default()
        });
        let after = connection_value(&conn);

        let changes = diff(&before, &after).unwrap();
        assert!(changes.to_string().contains("+1"));
        assert!(changes.to_string().contains("nsmgr"));
    }
}
