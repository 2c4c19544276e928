use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use qonvo_format::{EntryName, ATTACHMENTS_PREFIX, REPOSITORIES_PREFIX};
use serde_json::{Map, Value};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Path fields holding lists of attachment references on an ordinary node.
const NODE_LIST_FIELDS: &[&str] = &["user_files", "ai_image_paths"];

/// Result of the save-side collection pass: which real files go into the
/// container under which archive names, plus everything that could not be
/// resolved. Soft failures are recorded here, never raised.
#[derive(Debug, Default)]
pub(crate) struct CollectOutcome {
    /// `(resolved real path, archive name)` in first-seen order.
    pub entries: Vec<(PathBuf, String)>,
    pub missing: Vec<String>,
    pub mirrored_files: usize,
}

/// Walks `board` and every nested `dimensions[].board_data` level, calling
/// `visit` once per level.
fn for_each_level(board: &mut Map<String, Value>, visit: &mut impl FnMut(&mut Map<String, Value>)) {
    visit(board);

    if let Some(dims) = board.get_mut("dimensions").and_then(Value::as_array_mut) {
        for dim in dims {
            if let Some(nested) = dim.get_mut("board_data").and_then(Value::as_object_mut) {
                for_each_level(nested, visit);
            }
        }
    }
}

fn for_each_level_ref(board: &Map<String, Value>, visit: &mut impl FnMut(&Map<String, Value>)) {
    visit(board);

    if let Some(dims) = board.get("dimensions").and_then(Value::as_array) {
        for dim in dims {
            if let Some(nested) = dim.get("board_data").and_then(Value::as_object) {
                for_each_level_ref(nested, visit);
            }
        }
    }
}

/// A repository node's id can be stored as either a JSON string or number.
fn node_id_string(value: Option<&Value>) -> Option<String> {
    match value? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

// ── save side ──

struct Collector<'a> {
    /// Working directory used to resolve lazily materialized
    /// `attachments/…` references that only exist in extracted form.
    working_dir: &'a Path,
    seen: HashMap<PathBuf, String>,
    outcome: CollectOutcome,
}

impl Collector<'_> {
    /// Resolves a stored reference to a readable real path, or `None`.
    fn resolve(&self, raw: &str) -> Option<PathBuf> {
        if raw.is_empty() {
            return None;
        }

        let as_path = Path::new(raw);
        if as_path.exists() {
            return Some(as_path.to_path_buf());
        }

        let normalized = raw.replace('\\', "/");
        if normalized.starts_with(ATTACHMENTS_PREFIX) || normalized.starts_with(REPOSITORIES_PREFIX)
        {
            let candidate = self.working_dir.join(&normalized);
            if candidate.exists() {
                debug!(reference = raw, resolved = %candidate.display(), "resolved lazy path");
                return Some(candidate);
            }
            error!(
                reference = raw,
                working_dir = %self.working_dir.display(),
                "unresolvable attachment"
            );
        }

        None
    }

    /// Maps one reference into the archive, deduplicating by resolved real
    /// path within this save.
    fn map_file(&mut self, raw: &str) -> Option<String> {
        let resolved = self.resolve(raw)?;

        if let Some(existing) = self.seen.get(&resolved) {
            return Some(existing.clone());
        }

        let ext = resolved
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        let archive = EntryName::new(format!("attachments/{}{}", Uuid::new_v4().simple(), ext))
            .ok()?
            .as_str()
            .to_string();

        info!(reference = raw, archive = %archive, "mapped attachment");
        self.seen.insert(resolved.clone(), archive.clone());
        self.outcome.entries.push((resolved, archive.clone()));
        Some(archive)
    }

    /// Rewrites a list field in place: resolvable references become archive
    /// names, unresolvable ones are dropped and recorded as missing.
    fn rewrite_list(&mut self, object: &mut Map<String, Value>, key: &str, context: &str) {
        let items = match object.get_mut(key).and_then(Value::as_array_mut) {
            Some(items) => items,
            None => return,
        };

        let mut mapped = Vec::with_capacity(items.len());
        for item in items.iter() {
            let raw = match item.as_str() {
                Some(raw) if !raw.is_empty() => raw,
                _ => continue,
            };
            match self.map_file(raw) {
                Some(archive) => mapped.push(Value::String(archive)),
                None => {
                    warn!(path = raw, context, "missing attachment, dropping reference");
                    self.outcome.missing.push(raw.to_string());
                }
            }
        }

        *items = mapped;
    }

    /// Rewrites a single-path field in place; an unresolvable reference is
    /// cleared to the empty string so no ghost path is ever written.
    fn rewrite_single(&mut self, object: &mut Map<String, Value>, key: &str, context: &str) {
        let raw = match object.get(key).and_then(Value::as_str) {
            Some(raw) if !raw.is_empty() => raw.to_string(),
            _ => return,
        };

        match self.map_file(&raw) {
            Some(archive) => {
                object.insert(key.to_string(), Value::String(archive));
            }
            None => {
                warn!(path = %raw, context, "missing attachment, clearing reference");
                self.outcome.missing.push(raw);
                object.insert(key.to_string(), Value::String(String::new()));
            }
        }
    }

    fn process_node(&mut self, node: &mut Map<String, Value>) {
        for key in NODE_LIST_FIELDS {
            self.rewrite_list(node, key, key);
        }

        if let Some(history) = node.get_mut("history").and_then(Value::as_array_mut) {
            for entry in history {
                if let Some(entry) = entry.as_object_mut() {
                    self.rewrite_list(entry, "images", "history_image");
                }
            }
        }
    }

    /// Mirrors one level's repository-node folders: every regular file
    /// directly inside the folder (one level, sorted) becomes a
    /// `repositories/<node-id>/<filename>` entry.
    fn mirror_repositories(&mut self, board: &mut Map<String, Value>) {
        let repos = match board
            .get_mut("repository_nodes")
            .and_then(Value::as_array_mut)
        {
            Some(repos) => repos,
            None => return,
        };

        for repo in repos {
            let repo = match repo.as_object_mut() {
                Some(repo) => repo,
                None => continue,
            };

            let folder = match repo.get("folder_path").and_then(Value::as_str) {
                Some(folder) if !folder.is_empty() => folder.to_string(),
                _ => continue,
            };
            let node_id = match node_id_string(repo.get("id")) {
                Some(id) => id,
                None => continue,
            };
            if !Path::new(&folder).is_dir() {
                continue;
            }

            let mut files: Vec<PathBuf> = match std::fs::read_dir(&folder) {
                Ok(iter) => iter
                    .filter_map(|entry| entry.ok())
                    .map(|entry| entry.path())
                    .collect(),
                Err(e) => {
                    warn!(folder = %folder, error = %e, "cannot read repository folder");
                    continue;
                }
            };
            files.sort();

            let mut mirrored = Vec::new();
            for path in files {
                if !path.is_file() {
                    continue;
                }
                let filename = match path.file_name() {
                    Some(name) => name.to_string_lossy().into_owned(),
                    None => continue,
                };
                let archive = match EntryName::new(format!(
                    "repositories/{}/{}",
                    node_id, filename
                )) {
                    Ok(name) => name.as_str().to_string(),
                    Err(_) => continue,
                };

                self.seen.insert(path.clone(), archive.clone());
                self.outcome.entries.push((path, archive));
                mirrored.push(Value::String(filename));
                self.outcome.mirrored_files += 1;
            }

            repo.insert("_mirrored_files".to_string(), Value::Array(mirrored));
        }
    }
}

/// Save-side pass: rewrites every attachment reference in `board`
/// (recursing into nested dimension boards) to an archive name and returns
/// the set of real files to store.
pub(crate) fn collect_attachments(
    board: &mut Map<String, Value>,
    working_dir: &Path,
) -> CollectOutcome {
    let mut collector = Collector {
        working_dir,
        seen: HashMap::new(),
        outcome: CollectOutcome::default(),
    };

    for_each_level(board, &mut |level| {
        if let Some(nodes) = level.get_mut("nodes").and_then(Value::as_array_mut) {
            for node in nodes {
                if let Some(node) = node.as_object_mut() {
                    collector.process_node(node);
                }
            }
        }

        if let Some(cards) = level.get_mut("image_cards").and_then(Value::as_array_mut) {
            for card in cards {
                if let Some(card) = card.as_object_mut() {
                    collector.rewrite_single(card, "image_path", "image_card");
                }
            }
        }

        collector.mirror_repositories(level);
    });

    collector.outcome
}

// ── integrity check ──

/// Diagnostic re-walk after entry assembly: every `attachments/…` reference
/// left in the rewritten tree must have a matching container entry.
/// Mismatches are logged, never raised. Returns the number of verified
/// references.
pub(crate) fn verify_archive_refs(
    board: &Map<String, Value>,
    entry_names: &HashSet<String>,
) -> usize {
    let mut verified = 0usize;

    let mut check = |raw: Option<&str>, context: &str| {
        let raw = match raw {
            Some(raw) if raw.starts_with(ATTACHMENTS_PREFIX) => raw,
            _ => return,
        };
        if entry_names.contains(raw) {
            verified += 1;
        } else {
            error!(reference = raw, context, "archive reference has no entry");
        }
    };

    for_each_level_ref(board, &mut |level| {
        if let Some(cards) = level.get("image_cards").and_then(Value::as_array) {
            for card in cards {
                check(card.get("image_path").and_then(Value::as_str), "image_card");
            }
        }

        if let Some(nodes) = level.get("nodes").and_then(Value::as_array) {
            for node in nodes {
                for key in NODE_LIST_FIELDS {
                    if let Some(items) = node.get(*key).and_then(Value::as_array) {
                        for item in items {
                            check(item.as_str(), key);
                        }
                    }
                }
                if let Some(history) = node.get("history").and_then(Value::as_array) {
                    for entry in history {
                        if let Some(images) = entry.get("images").and_then(Value::as_array) {
                            for image in images {
                                check(image.as_str(), "history_image");
                            }
                        }
                    }
                }
            }
        }
    });

    verified
}

// ── load side ──

/// Result of the load-side resolution pass.
#[derive(Debug, Default)]
pub(crate) struct ResolveOutcome {
    pub missing: Vec<String>,
    pub repo_rewrites: usize,
}

struct Resolver<'a> {
    working_dir: &'a Path,
    outcome: ResolveOutcome,
}

impl Resolver<'_> {
    /// Rewrites one `attachments/…` reference to its extracted real path;
    /// anything else (already-real paths, unknown prefixes) passes through.
    fn resolve(&mut self, raw: &str) -> String {
        if raw.is_empty() {
            return raw.to_string();
        }

        let normalized = raw.replace('\\', "/");
        if !normalized.starts_with(ATTACHMENTS_PREFIX) {
            return raw.to_string();
        }

        let real = self.working_dir.join(&normalized);
        if real.exists() {
            real.to_string_lossy().into_owned()
        } else {
            self.outcome.missing.push(raw.to_string());
            raw.to_string()
        }
    }

    fn resolve_list(&mut self, object: &mut Map<String, Value>, key: &str) {
        let items = match object.get_mut(key).and_then(Value::as_array_mut) {
            Some(items) => items,
            None => return,
        };

        for item in items {
            if let Some(raw) = item.as_str() {
                *item = Value::String(self.resolve(raw));
            }
        }
    }

    fn resolve_node(&mut self, node: &mut Map<String, Value>) {
        for key in NODE_LIST_FIELDS {
            self.resolve_list(node, key);
        }

        if let Some(history) = node.get_mut("history").and_then(Value::as_array_mut) {
            for entry in history {
                if let Some(entry) = entry.as_object_mut() {
                    self.resolve_list(entry, "images");
                }
            }
        }
    }

    /// Repository nodes fall back to the extracted mirror only when the
    /// original folder is gone; a still-valid original folder wins.
    fn resolve_repositories(&mut self, board: &mut Map<String, Value>) {
        let repos = match board
            .get_mut("repository_nodes")
            .and_then(Value::as_array_mut)
        {
            Some(repos) => repos,
            None => return,
        };

        for repo in repos {
            let repo = match repo.as_object_mut() {
                Some(repo) => repo,
                None => continue,
            };

            let mirrored = repo
                .get("_mirrored_files")
                .and_then(Value::as_array)
                .map(|files| !files.is_empty())
                .unwrap_or(false);
            if !mirrored {
                continue;
            }
            let node_id = match node_id_string(repo.get("id")) {
                Some(id) => id,
                None => continue,
            };

            let extracted = self.working_dir.join("repositories").join(&node_id);
            if !extracted.is_dir() {
                continue;
            }

            let original = repo
                .get("folder_path")
                .and_then(Value::as_str)
                .unwrap_or("");
            if original.is_empty() || !Path::new(original).is_dir() {
                info!(node = %node_id, dir = %extracted.display(), "repository folder remapped to extracted mirror");
                repo.insert(
                    "folder_path".to_string(),
                    Value::String(extracted.to_string_lossy().into_owned()),
                );
                self.outcome.repo_rewrites += 1;
            } else {
                info!(node = %node_id, folder = original, "repository folder still valid, keeping original");
            }
        }
    }
}

/// Load-side pass: rewrites every archive reference in `board` (recursing
/// into nested dimension boards) to a real path under the working
/// directory. References without an extracted file stay as-is and are
/// recorded as missing.
pub(crate) fn resolve_attachments(
    board: &mut Map<String, Value>,
    working_dir: &Path,
) -> ResolveOutcome {
    let mut resolver = Resolver {
        working_dir,
        outcome: ResolveOutcome::default(),
    };

    for_each_level(board, &mut |level| {
        if let Some(nodes) = level.get_mut("nodes").and_then(Value::as_array_mut) {
            for node in nodes {
                if let Some(node) = node.as_object_mut() {
                    resolver.resolve_node(node);
                }
            }
        }

        if let Some(cards) = level.get_mut("image_cards").and_then(Value::as_array_mut) {
            for card in cards {
                if let Some(card) = card.as_object_mut() {
                    let raw = card
                        .get("image_path")
                        .and_then(Value::as_str)
                        .unwrap_or("")
                        .to_string();
                    if !raw.is_empty() {
                        let resolved = resolver.resolve(&raw);
                        card.insert("image_path".to_string(), Value::String(resolved));
                    }
                }
            }
        }

        resolver.resolve_repositories(level);
    });

    resolver.outcome
}
