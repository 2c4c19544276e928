use serde_json::{Map, Value};
use tracing::{debug, info, warn};

/// Schema version stamped onto every saved board.
pub const SCHEMA_VERSION: &str = "1.1";

struct Migration {
    /// Applied when the stored version is below this threshold.
    threshold: &'static [u32],
    label: &'static str,
    apply: fn(&mut Map<String, Value>),
}

/// Ordered oldest-first. Every transformation must be idempotent: loading a
/// board that already carries the fields it adds is a no-op.
const MIGRATIONS: &[Migration] = &[Migration {
    threshold: &[1, 1],
    label: "function node defaults",
    apply: add_function_node_defaults,
}];

pub(crate) fn migrate(board: &mut Map<String, Value>, file_version: &str) {
    info!(
        from = file_version,
        to = SCHEMA_VERSION,
        "migrating board data"
    );

    let version = parse_version(file_version);

    for migration in MIGRATIONS {
        if version_lt(&version, migration.threshold) {
            info!(migration = migration.label, "applying migration");
            (migration.apply)(board);
        }
    }

    debug!("migration completed");
}

fn parse_version(version: &str) -> Vec<u32> {
    if version.is_empty() {
        return vec![0, 0];
    }

    match version
        .split('.')
        .map(|part| part.parse::<u32>())
        .collect::<Result<Vec<_>, _>>()
    {
        Ok(parts) => parts,
        Err(_) => {
            warn!(version, "invalid version format, treating as 0.0");
            vec![0, 0]
        }
    }
}

/// Componentwise numeric comparison, missing components counting as zero:
/// `"1" == "1.0"`, `"1" < "1.1"`, `"1.0.5" < "1.1"`.
fn version_lt(version: &[u32], threshold: &[u32]) -> bool {
    let len = version.len().max(threshold.len());

    for i in 0..len {
        let a = version.get(i).copied().unwrap_or(0);
        let b = threshold.get(i).copied().unwrap_or(0);
        if a != b {
            return a < b;
        }
    }

    false
}

/// v1.0 -> v1.1: function nodes gained `function_id`, `function_name` and
/// `ai_response`; older boards get them as nulls.
fn add_function_node_defaults(board: &mut Map<String, Value>) {
    let nodes = match board.get_mut("function_nodes").and_then(Value::as_array_mut) {
        Some(nodes) => nodes,
        None => return,
    };

    for node in nodes {
        let node = match node.as_object_mut() {
            Some(node) => node,
            None => continue,
        };

        for key in ["function_id", "function_name", "ai_response"] {
            if !node.contains_key(key) {
                debug!(
                    key,
                    node = node.get("id").and_then(serde_json::Value::as_str).unwrap_or("unknown"),
                    "added default field"
                );
                node.insert(key.to_string(), Value::Null);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn board_with_function_node() -> Map<String, Value> {
        let Value::Object(map) = json!({
            "function_nodes": [
                {"id": "fn-1"},
                {"id": "fn-2", "function_id": "existing"},
            ],
        }) else {
            unreachable!()
        };
        map
    }

    #[test]
    fn old_boards_gain_function_node_fields() {
        let mut board = board_with_function_node();
        migrate(&mut board, "1.0");

        let nodes = board["function_nodes"].as_array().unwrap();
        assert_eq!(nodes[0]["function_id"], Value::Null);
        assert_eq!(nodes[0]["function_name"], Value::Null);
        assert_eq!(nodes[0]["ai_response"], Value::Null);
        // Existing values are never overwritten.
        assert_eq!(nodes[1]["function_id"], json!("existing"));
    }

    #[test]
    fn current_boards_are_untouched() {
        let mut board = board_with_function_node();
        migrate(&mut board, SCHEMA_VERSION);

        let nodes = board["function_nodes"].as_array().unwrap();
        assert!(!nodes[0].as_object().unwrap().contains_key("function_id"));
    }

    #[test]
    fn migration_is_idempotent() {
        let mut board = board_with_function_node();
        migrate(&mut board, "1.0");
        let once = board.clone();
        migrate(&mut board, "1.0");
        assert_eq!(board, once);
    }

    #[test]
    fn unparsable_versions_run_everything() {
        let mut board = board_with_function_node();
        migrate(&mut board, "not-a-version");

        let nodes = board["function_nodes"].as_array().unwrap();
        assert_eq!(nodes[0]["function_id"], Value::Null);
    }

    #[test]
    fn version_ordering() {
        assert!(version_lt(&parse_version("1.0"), &[1, 1]));
        assert!(version_lt(&parse_version("0.9.9"), &[1, 1]));
        assert!(!version_lt(&parse_version("1.1"), &[1, 1]));
        assert!(!version_lt(&parse_version("1.2"), &[1, 1]));
        assert!(!version_lt(&parse_version("2"), &[1, 1]));
        // Missing components count as zero.
        assert!(version_lt(&parse_version("1"), &[1, 1]));
        assert!(!version_lt(&parse_version("1.1.0"), &[1, 1]));
        assert!(version_lt(&parse_version(""), &[1, 1]));
        assert!(version_lt(&parse_version("1.x"), &[1, 1]));
    }
}
