//! `tools/list` filtering: the caller-presented `x-authorized-tools` JWT
//! allow-list, then the `x-mcp-virtualserver` selector, composed by
//! intersection. Grounded on the reference stack's `kid`-less decode-and-
//! validate shape (`identity/src/test/token_validation.rs`), generalized from
//! RS256-internal-token verification to ES256-external-JWT verification since
//! the allow-list JWT is minted by a caller-controlled IdP, not this service.

use std::collections::{HashMap, HashSet};

use jsonwebtoken::{Algorithm, DecodingKey, Validation, decode};
use serde::Deserialize;

use crate::config::VirtualServer;
use crate::registry::AggregatedTool;

#[derive(Debug, Deserialize)]
struct AllowlistClaims {
    #[serde(rename = "allowed-tools")]
    allowed_tools: HashMap<String, Vec<String>>,
}

#[derive(Debug, Clone, Copy)]
pub struct FilterOptions<'a> {
    pub enforce_tool_filter: bool,
    pub allowlist_public_key_pem: Option<&'a str>,
}

/// Applies the JWT allow-list filter (if a token is presented, or if the
/// Broker is configured to require one) followed by the virtual-server
/// filter (if a selector is presented). Returns the catalog unchanged when
/// neither header is present and enforcement is off.
pub fn apply_filters(
    catalog: &[AggregatedTool],
    authorized_tools_jwt: Option<&str>,
    virtual_server_name: Option<&str>,
    virtual_servers: &[VirtualServer],
    options: FilterOptions<'_>,
) -> Vec<AggregatedTool> {
    let mut filtered: Vec<AggregatedTool> = match authorized_tools_jwt {
        Some(jwt) if !jwt.is_empty() => apply_jwt_allowlist(catalog, jwt, options),
        _ if options.enforce_tool_filter => Vec::new(),
        _ => catalog.to_vec(),
    };

    if let Some(name) = virtual_server_name {
        filtered = apply_virtual_server(&filtered, name, virtual_servers);
    }

    filtered
}

fn apply_jwt_allowlist(
    catalog: &[AggregatedTool],
    jwt: &str,
    options: FilterOptions<'_>,
) -> Vec<AggregatedTool> {
    let Some(pem) = options.allowlist_public_key_pem else {
        return Vec::new();
    };
    let Ok(decoding_key) = DecodingKey::from_ec_pem(pem.as_bytes()) else {
        return Vec::new();
    };

    let mut validation = Validation::new(Algorithm::ES256);
    validation.validate_exp = true;

    let claims = match decode::<AllowlistClaims>(jwt, &decoding_key, &validation) {
        Ok(token_data) => token_data.claims,
        Err(_) => return Vec::new(),
    };

    catalog
        .iter()
        .filter(|tool| {
            claims
                .allowed_tools
                .get(&tool.upstream_name)
                .is_some_and(|names| names.iter().any(|n| n == &tool.original_name))
        })
        .cloned()
        .collect()
}

fn apply_virtual_server(
    catalog: &[AggregatedTool],
    name: &str,
    virtual_servers: &[VirtualServer],
) -> Vec<AggregatedTool> {
    let Some(server) = virtual_servers.iter().find(|v| v.qualified_name == name) else {
        return Vec::new();
    };
    let allowed: HashSet<&str> = server.tools.iter().map(String::as_str).collect();
    catalog
        .iter()
        .filter(|tool| allowed.contains(tool.gateway_name.as_str()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(upstream_name: &str, original_name: &str) -> AggregatedTool {
        AggregatedTool {
            gateway_name: format!("{upstream_name}_{original_name}"),
            upstream_id: format!("{upstream_name}:{upstream_name}_:http://localhost:9000/"),
            upstream_name: upstream_name.to_string(),
            original_name: original_name.to_string(),
            description: None,
            input_schema: serde_json::json!({}),
            annotations: Default::default(),
        }
    }

    #[test]
    fn no_headers_and_no_enforcement_returns_full_catalog() {
        let catalog = vec![tool("ns/a", "hello")];
        let out = apply_filters(
            &catalog,
            None,
            None,
            &[],
            FilterOptions {
                enforce_tool_filter: false,
                allowlist_public_key_pem: None,
            },
        );
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn enforcement_without_header_returns_empty() {
        let catalog = vec![tool("ns/a", "hello")];
        let out = apply_filters(
            &catalog,
            None,
            None,
            &[],
            FilterOptions {
                enforce_tool_filter: true,
                allowlist_public_key_pem: None,
            },
        );
        assert!(out.is_empty());
    }

    #[test]
    fn jwt_allowlist_keys_on_qualified_name_not_composite_id() {
        let catalog = vec![tool("ns/a", "hello")];
        let options = FilterOptions {
            enforce_tool_filter: false,
            allowlist_public_key_pem: Some(crate::test::fixtures::ES256_PUBLIC_KEY_PEM),
        };

        let by_name = crate::test::fixtures::sign_allowlist_jwt(
            serde_json::json!({"ns/a": ["hello"]}),
        );
        let out = apply_filters(&catalog, Some(&by_name), None, &[], options);
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].gateway_name, "ns/a_hello");

        let mut composite_claim = serde_json::Map::new();
        composite_claim.insert(
            catalog[0].upstream_id.clone(),
            serde_json::json!(["hello"]),
        );
        let by_id = crate::test::fixtures::sign_allowlist_jwt(composite_claim.into());
        let out = apply_filters(&catalog, Some(&by_id), None, &[], options);
        assert!(out.is_empty());
    }

    #[test]
    fn virtual_server_filter_intersects_by_gateway_name() {
        let catalog = vec![tool("ns/a", "hello"), tool("ns/b", "world")];
        let vservers = vec![VirtualServer {
            qualified_name: "team/one".to_string(),
            description: None,
            tools: vec!["ns/a_hello".to_string()],
        }];
        let out = apply_filters(
            &catalog,
            None,
            Some("team/one"),
            &vservers,
            FilterOptions {
                enforce_tool_filter: false,
                allowlist_public_key_pem: None,
            },
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].gateway_name, "ns/a_hello");
    }

    #[test]
    fn unknown_virtual_server_returns_empty() {
        let catalog = vec![tool("ns/a", "hello")];
        let out = apply_filters(
            &catalog,
            None,
            Some("no/such"),
            &[],
            FilterOptions {
                enforce_tool_filter: false,
                allowlist_public_key_pem: None,
            },
        );
        assert!(out.is_empty());
    }
}
