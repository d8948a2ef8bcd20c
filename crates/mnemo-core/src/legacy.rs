//! Deprecation-routing table (spec §6, §9): maps the engine's historical
//! single-purpose operation names onto the twelve unified `memory_*`
//! operations, plus the argument-shape transform needed to call the
//! canonical operation with the legacy call's arguments.
//!
//! This is a pure lookup + transform with no dependency on [`crate::Engine`]
//! — a future protocol layer (CLI flag compatibility, an MCP tool alias)
//! can resolve a legacy name without the engine itself knowing these names
//! ever existed. `Engine` never calls through here.

use serde_json::{Map, Value};

/// One legacy-name entry.
pub struct LegacyRoute {
    /// The name a caller might still be using.
    pub legacy_name: &'static str,
    /// The unified `memory_*` operation it now maps to.
    pub canonical_name: &'static str,
    /// Reshapes a JSON argument object built for the legacy call into one
    /// shaped for `canonical_name`.
    pub transform: fn(Value) -> Value,
}

fn rename_key(mut args: Value, from: &str, to: &str) -> Value {
    if let Value::Object(ref mut map) = args {
        if let Some(v) = map.remove(from) {
            map.insert(to.to_string(), v);
        }
    }
    args
}

fn insert_field(mut args: Value, key: &str, value: Value) -> Value {
    if let Value::Object(ref mut map) = args {
        map.insert(key.to_string(), value);
    }
    args
}

/// Lift a single scalar field (`tag: "x"`) into the list-shaped field the
/// canonical op expects (`tags: ["x"]`), renaming along the way.
fn wrap_scalar_as_tags(mut args: Value, from: &str) -> Value {
    if let Value::Object(ref mut map) = args {
        if let Some(v) = map.remove(from) {
            map.insert("tags".to_string(), Value::Array(vec![v]));
        }
    }
    args
}

fn identity(args: Value) -> Value {
    args
}

fn add_memory_transform(args: Value) -> Value {
    rename_key(args, "text", "content")
}

fn retrieve_memory_transform(args: Value) -> Value {
    let args = rename_key(args, "text", "query");
    insert_field(args, "mode", Value::from("semantic"))
}

fn delete_by_tag_transform(args: Value) -> Value {
    let args = wrap_scalar_as_tags(args, "tag");
    insert_field(args, "tag_match", Value::from("any"))
}

fn consolidation_status_transform(args: Value) -> Value {
    insert_field(args, "action", Value::from("status"))
}

fn trigger_consolidation_transform(args: Value) -> Value {
    insert_field(args, "action", Value::from("run"))
}

fn pause_consolidation_transform(args: Value) -> Value {
    insert_field(args, "action", Value::from("pause"))
}

fn resume_consolidation_transform(args: Value) -> Value {
    insert_field(args, "action", Value::from("resume"))
}

fn rate_memory_transform(args: Value) -> Value {
    let args = rename_key(args, "hash", "content_hash");
    insert_field(args, "action", Value::from("rate"))
}

fn get_quality_transform(args: Value) -> Value {
    let args = rename_key(args, "hash", "content_hash");
    insert_field(args, "action", Value::from("get"))
}

fn analyze_quality_transform(args: Value) -> Value {
    insert_field(args, "action", Value::from("analyze"))
}

fn get_associations_transform(args: Value) -> Value {
    let args = rename_key(args, "hash", "content_hash");
    insert_field(args, "action", Value::from("connected"))
}

fn find_path_transform(args: Value) -> Value {
    let args = rename_key(args, "from", "hash1");
    let args = rename_key(args, "to", "hash2");
    insert_field(args, "action", Value::from("path"))
}

fn get_subgraph_transform(args: Value) -> Value {
    let args = rename_key(args, "hash", "content_hash");
    insert_field(args, "action", Value::from("subgraph"))
}

/// The routing table. Legacy names predate the unified twelve-operation
/// surface (spec §6); each row is kept only as a compatibility shim.
pub static LEGACY_ROUTES: &[LegacyRoute] = &[
    LegacyRoute { legacy_name: "add_memory", canonical_name: "memory_store", transform: add_memory_transform },
    LegacyRoute {
        legacy_name: "retrieve_memory",
        canonical_name: "memory_search",
        transform: retrieve_memory_transform,
    },
    LegacyRoute { legacy_name: "search_memory", canonical_name: "memory_search", transform: identity },
    LegacyRoute {
        legacy_name: "delete_by_tag",
        canonical_name: "memory_delete",
        transform: delete_by_tag_transform,
    },
    LegacyRoute { legacy_name: "list_memories", canonical_name: "memory_list", transform: identity },
    LegacyRoute { legacy_name: "update_memory", canonical_name: "memory_update", transform: identity },
    LegacyRoute { legacy_name: "health_check", canonical_name: "memory_health", transform: identity },
    LegacyRoute { legacy_name: "get_stats", canonical_name: "memory_stats", transform: identity },
    LegacyRoute { legacy_name: "cleanup_duplicates", canonical_name: "memory_cleanup", transform: identity },
    LegacyRoute { legacy_name: "ingest_file", canonical_name: "memory_ingest", transform: identity },
    LegacyRoute { legacy_name: "rate_memory", canonical_name: "memory_quality", transform: rate_memory_transform },
    LegacyRoute { legacy_name: "get_quality", canonical_name: "memory_quality", transform: get_quality_transform },
    LegacyRoute {
        legacy_name: "analyze_quality",
        canonical_name: "memory_quality",
        transform: analyze_quality_transform,
    },
    LegacyRoute {
        legacy_name: "consolidation_status",
        canonical_name: "memory_consolidate",
        transform: consolidation_status_transform,
    },
    LegacyRoute {
        legacy_name: "trigger_consolidation",
        canonical_name: "memory_consolidate",
        transform: trigger_consolidation_transform,
    },
    LegacyRoute {
        legacy_name: "pause_consolidation",
        canonical_name: "memory_consolidate",
        transform: pause_consolidation_transform,
    },
    LegacyRoute {
        legacy_name: "resume_consolidation",
        canonical_name: "memory_consolidate",
        transform: resume_consolidation_transform,
    },
    LegacyRoute {
        legacy_name: "get_associations",
        canonical_name: "memory_graph",
        transform: get_associations_transform,
    },
    LegacyRoute { legacy_name: "find_path", canonical_name: "memory_graph", transform: find_path_transform },
    LegacyRoute { legacy_name: "get_subgraph", canonical_name: "memory_graph", transform: get_subgraph_transform },
];

/// Look up `legacy_name`; if found, log a deprecation warning and return
/// the canonical operation name plus `args` reshaped for it. Returns
/// `None` for a name that was never a recognized legacy alias (distinct
/// from an unrecognized *canonical* name, which callers should reject
/// themselves).
pub fn resolve_legacy_call(legacy_name: &str, args: Value) -> Option<(&'static str, Value)> {
    let route = LEGACY_ROUTES.iter().find(|r| r.legacy_name == legacy_name)?;
    tracing::warn!(
        legacy_name = route.legacy_name,
        canonical_name = route.canonical_name,
        "deprecated operation name used; route to the unified memory_* surface instead"
    );
    Some((route.canonical_name, (route.transform)(args)))
}

/// Build an empty JSON object, the starting point for tests and any
/// caller assembling legacy-call arguments programmatically.
pub fn empty_args() -> Value {
    Value::Object(Map::new())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_unknown_legacy_name_resolves_to_none() {
        assert!(resolve_legacy_call("not_a_real_op", empty_args()).is_none());
    }

    #[test]
    fn test_delete_by_tag_renames_and_wraps_single_tag() {
        let (canonical, args) = resolve_legacy_call("delete_by_tag", json!({"tag": "stale"})).unwrap();
        assert_eq!(canonical, "memory_delete");
        assert_eq!(args["tags"], json!(["stale"]));
        assert_eq!(args["tag_match"], json!("any"));
        assert!(args.get("tag").is_none());
    }

    #[test]
    fn test_retrieve_memory_renames_text_to_query_and_defaults_mode() {
        let (canonical, args) =
            resolve_legacy_call("retrieve_memory", json!({"text": "authentication"})).unwrap();
        assert_eq!(canonical, "memory_search");
        assert_eq!(args["query"], json!("authentication"));
        assert_eq!(args["mode"], json!("semantic"));
    }

    #[test]
    fn test_consolidation_status_maps_to_memory_consolidate_with_status_action() {
        let (canonical, args) = resolve_legacy_call("consolidation_status", empty_args()).unwrap();
        assert_eq!(canonical, "memory_consolidate");
        assert_eq!(args["action"], json!("status"));
    }

    #[test]
    fn test_find_path_renames_from_to_into_hash1_hash2() {
        let (canonical, args) =
            resolve_legacy_call("find_path", json!({"from": "aaa", "to": "bbb"})).unwrap();
        assert_eq!(canonical, "memory_graph");
        assert_eq!(args["hash1"], json!("aaa"));
        assert_eq!(args["hash2"], json!("bbb"));
        assert_eq!(args["action"], json!("path"));
    }

    #[test]
    fn test_every_route_points_at_one_of_the_twelve_unified_operations() {
        const UNIFIED: &[&str] = &[
            "memory_store",
            "memory_search",
            "memory_list",
            "memory_delete",
            "memory_update",
            "memory_health",
            "memory_stats",
            "memory_consolidate",
            "memory_cleanup",
            "memory_ingest",
            "memory_quality",
            "memory_graph",
        ];
        for route in LEGACY_ROUTES {
            assert!(
                UNIFIED.contains(&route.canonical_name),
                "{} routes to unrecognized canonical op {}",
                route.legacy_name,
                route.canonical_name
            );
        }
    }
}
