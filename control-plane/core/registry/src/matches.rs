// Copyright AGNTCY Contributors (https://github.com/agntcy)
// SPDX-License-Identifier: Apache-2.0

//! Query predicate matching: field-wise conjunction of the non-empty fields
//! of a query template, with prefix-tolerant record names so that `name`
//! also matches `name@domain`.

use std::collections::HashMap;

use weft_api::registry::v1::{NetworkService, NetworkServiceEndpoint};

/// Empty query names match everything; otherwise the candidate matches
/// exactly or by prefix (interdomain suffixes, derived names).
pub fn name_matches(query: &str, candidate: &str) -> bool {
    query.is_empty() || candidate == query || candidate.starts_with(query)
}

/// Every selector entry must be present in the labels with the same value.
pub fn labels_subset(selector: &HashMap<String, String>, labels: &HashMap<String, String>) -> bool {
    selector
        .iter()
        .all(|(k, v)| labels.get(k).is_some_and(|lv| lv == v))
}

pub fn service_matches(query: &NetworkService, candidate: &NetworkService) -> bool {
    name_matches(&query.name, &candidate.name)
        && (query.payload.is_empty() || query.payload == candidate.payload)
}

pub fn endpoint_matches(
    query: &NetworkServiceEndpoint,
    candidate: &NetworkServiceEndpoint,
) -> bool {
    if !name_matches(&query.name, &candidate.name) {
        return false;
    }

    if !query.url.is_empty() && query.url != candidate.url {
        return false;
    }

    // every queried service name must be offered by the candidate
    if !query.network_service_names.iter().all(|wanted| {
        candidate
            .network_service_names
            .iter()
            .any(|offered| name_matches(wanted, offered))
    }) {
        return false;
    }

    // per-service label selectors
    query.network_service_labels.iter().all(|(service, wanted)| {
        candidate
            .network_service_labels
            .get(service)
            .is_some_and(|offered| labels_subset(&wanted.labels, &offered.labels))
    })
}
