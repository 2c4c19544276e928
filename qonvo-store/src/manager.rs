use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Local;
use parking_lot::Mutex;
use qonvo_format::{
    is_container_file, EntryName, QonvoFileReader, QonvoFileWriter, ATTACHMENTS_PREFIX, BOARD_ENTRY,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::attachments::{collect_attachments, resolve_attachments, verify_archive_refs};
use crate::error::{Result, StoreError};
use crate::migrate::{self, SCHEMA_VERSION};
use crate::{legacy, BoardData};

const BOARD_EXT: &str = "qonvo";

/// Wall-clock timeout for the one-shot default-board download. Container
/// I/O itself never has a timeout.
const FETCH_TIMEOUT: Duration = Duration::from_secs(15);

/// Outcome of the best-effort backup rotation. A failed step never aborts
/// the save; it is recorded here and logged.
#[derive(Debug, Default)]
struct RotationOutcome {
    created: bool,
    failed_steps: Vec<&'static str>,
}

/// The board persistence service: owns the boards directory and a single
/// process-wide lock serializing every save and load.
///
/// The lock is deliberately not per-board: extraction directories are keyed
/// by board name only, and a concurrent save and load of the same name
/// would race on the same temp paths. Callers on an interactive thread
/// should run save/load on a worker and expect to block until any other
/// in-flight operation completes.
pub struct BoardStore {
    boards_dir: PathBuf,
    io_lock: Mutex<()>,
}

impl BoardStore {
    /// Creates the service, making sure the boards directory exists.
    pub fn new<P: Into<PathBuf>>(boards_dir: P) -> Result<BoardStore> {
        let boards_dir = boards_dir.into();
        fs::create_dir_all(&boards_dir).map_err(|e| StoreError::CreateBoardsDir {
            path: boards_dir.clone(),
            source: e,
        })?;

        Ok(BoardStore {
            boards_dir,
            io_lock: Mutex::new(()),
        })
    }

    pub fn boards_dir(&self) -> &Path {
        &self.boards_dir
    }

    fn board_path(&self, name: &str) -> PathBuf {
        self.boards_dir.join(format!("{name}.{BOARD_EXT}"))
    }

    fn temp_root(&self) -> PathBuf {
        self.boards_dir.join(".temp")
    }

    /// Sorted names of all saved boards.
    pub fn list(&self) -> Result<Vec<String>> {
        let entries = fs::read_dir(&self.boards_dir).map_err(|e| StoreError::ListBoards {
            path: self.boards_dir.clone(),
            source: e,
        })?;

        let mut boards = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|e| StoreError::ListBoards {
                path: self.boards_dir.clone(),
                source: e,
            })?;
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == BOARD_EXT) {
                if let Some(stem) = path.file_stem() {
                    boards.push(stem.to_string_lossy().into_owned());
                }
            }
        }

        boards.sort();
        Ok(boards)
    }

    /// Saves a board atomically, rotating up to three backup generations of
    /// the previous file. Returns the final container path.
    ///
    /// The tree is rewritten on the way in: attachment references become
    /// archive names, unresolvable references are cleared. A failure at any
    /// point leaves the previously saved file untouched.
    pub fn save(&self, name: &str, board: BoardData) -> Result<PathBuf> {
        let _guard = self.io_lock.lock();
        info!(name, "starting board save");

        let filepath = self.board_path(name);
        let temp_path = self.boards_dir.join(format!("{name}.{BOARD_EXT}.tmp"));

        let result = self.save_inner(name, board, &filepath, &temp_path);

        if let Err(e) = &result {
            error!(error = %e, "save failed, previous board file left intact");
            if temp_path.exists() {
                if let Err(cleanup) = fs::remove_file(&temp_path) {
                    warn!(error = %cleanup, "failed to remove temp container");
                }
            }
        }

        result
    }

    fn save_inner(
        &self,
        name: &str,
        mut board: BoardData,
        filepath: &Path,
        temp_path: &Path,
    ) -> Result<PathBuf> {
        if filepath.exists() {
            let rotation = rotate_backups(&self.boards_dir, name, filepath);
            if !rotation.failed_steps.is_empty() {
                warn!(steps = ?rotation.failed_steps, "backup rotation partially failed");
            } else if rotation.created {
                debug!("backup rotation complete");
            }
        }

        board.insert("name".to_string(), Value::String(name.to_string()));
        board.insert(
            "version".to_string(),
            Value::String(SCHEMA_VERSION.to_string()),
        );
        board.insert(
            "saved_at".to_string(),
            Value::String(Local::now().to_rfc3339()),
        );

        let working_dir = self.temp_root().join(name);
        let collected = collect_attachments(&mut board, &working_dir);
        if !collected.missing.is_empty() {
            warn!(
                count = collected.missing.len(),
                "files not found, references dropped"
            );
        }
        info!(
            attachments = collected.entries.len(),
            mirrored = collected.mirrored_files,
            "collected attachments"
        );

        let board_bytes =
            serde_json::to_vec_pretty(&board).map_err(|e| StoreError::EncodeBoard { source: e })?;

        let write_err = |e: std::io::Error| StoreError::WriteBoard {
            path: temp_path.to_path_buf(),
            source: e,
        };

        let mut writer = QonvoFileWriter::create(temp_path).map_err(write_err)?;
        let mut inserted: HashSet<String> = HashSet::new();

        let board_entry = EntryName::new(BOARD_ENTRY).map_err(|e| write_err(e.as_io_error()))?;
        writer.insert(board_entry, board_bytes).map_err(write_err)?;
        inserted.insert(BOARD_ENTRY.to_string());

        let mut skipped = Vec::new();
        for (real_path, archive) in &collected.entries {
            let bytes = match fs::read(real_path) {
                Ok(bytes) => bytes,
                Err(e) => {
                    warn!(
                        path = %real_path.display(),
                        error = %e,
                        "skipping unreadable attachment"
                    );
                    skipped.push(real_path.clone());
                    continue;
                }
            };

            let entry_name = EntryName::new(archive).map_err(|e| write_err(e.as_io_error()))?;
            match writer.insert(entry_name, bytes) {
                Ok(()) => {
                    inserted.insert(archive.clone());
                }
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => {
                    warn!(archive = %archive, "duplicate archive name, keeping first entry");
                }
                Err(e) => return Err(write_err(e)),
            }
        }

        let total_bytes = writer.finish().map_err(write_err)?;
        info!(
            bytes = total_bytes,
            attachments = inserted
                .iter()
                .filter(|n| n.starts_with(ATTACHMENTS_PREFIX))
                .count(),
            missing = collected.missing.len(),
            skipped = skipped.len(),
            "container written"
        );

        let verified = verify_archive_refs(&board, &inserted);
        info!(refs = verified, "integrity check complete");

        fs::rename(temp_path, filepath).map_err(|e| StoreError::CommitBoard {
            path: filepath.to_path_buf(),
            source: e,
        })?;
        info!(path = %filepath.display(), "board saved");

        Ok(filepath.to_path_buf())
    }

    /// Loads a board from a container or legacy archive file, extracting
    /// attachments into the per-board working directory and resolving the
    /// tree's references to real paths.
    ///
    /// Extraction happens in a staging directory that is only swapped into
    /// place once complete; a failed load never disturbs the working
    /// directory left by the last successful one.
    pub fn load<P: AsRef<Path>>(&self, path: P) -> Result<BoardData> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading board");

        if !path.exists() {
            error!(path = %path.display(), "board file not found");
            return Err(StoreError::NotFound {
                path: path.to_path_buf(),
            });
        }

        let _guard = self.io_lock.lock();
        self.load_inner(path)
    }

    fn load_inner(&self, path: &Path) -> Result<BoardData> {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "board".to_string());

        let temp_root = self.temp_root();
        let working = temp_root.join(&stem);
        let staging = temp_root.join(format!("{stem}._staging"));
        let old = temp_root.join(format!("{stem}._old"));

        for leftover in [&staging, &old] {
            if leftover.exists() {
                if let Err(e) = fs::remove_dir_all(leftover) {
                    warn!(path = %leftover.display(), error = %e, "failed to clean leftover directory");
                }
            }
        }

        fs::create_dir_all(&staging).map_err(|e| StoreError::CreateStaging {
            path: staging.clone(),
            source: e,
        })?;

        let result = self.load_staged(path, &working, &staging, &old);

        if result.is_err() && staging.exists() {
            if let Err(e) = fs::remove_dir_all(&staging) {
                warn!(error = %e, "failed to clean up staging directory");
            }
            error!("load failed, existing working directory preserved");
        }

        result
    }

    fn load_staged(
        &self,
        path: &Path,
        working: &Path,
        staging: &Path,
        old: &Path,
    ) -> Result<BoardData> {
        let board_bytes = if is_container_file(path) {
            info!("detected Qonvo container format");
            let reader = QonvoFileReader::open(path).map_err(|e| StoreError::OpenContainer {
                path: path.to_path_buf(),
                source: e,
            })?;
            let extracted =
                reader
                    .extract_to_dir(staging)
                    .map_err(|e| StoreError::ExtractContainer {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
            extracted.board
        } else {
            info!("detected legacy archive format");
            legacy::extract_legacy(path, staging)?
        };

        let parsed: Value = serde_json::from_slice(&board_bytes).map_err(|e| {
            error!(error = %e, "board.json is not valid JSON");
            StoreError::InvalidBoardJson { source: e }
        })?;
        let mut board = match parsed {
            Value::Object(board) => board,
            _ => return Err(StoreError::UnexpectedBoardShape),
        };

        let file_version = board
            .get("version")
            .and_then(Value::as_str)
            .unwrap_or("1.0")
            .to_string();
        info!(version = %file_version, "board.json loaded");
        migrate::migrate(&mut board, &file_version);

        swap_staging(working, staging, old)?;

        let outcome = resolve_attachments(&mut board, working);
        if !outcome.missing.is_empty() {
            warn!(count = outcome.missing.len(), "attachments not found");
        }

        info!(
            nodes = board.get("nodes").and_then(serde_json::Value::as_array).map_or(0, |a| a.len()),
            edges = board.get("edges").and_then(serde_json::Value::as_array).map_or(0, |a| a.len()),
            "board loaded"
        );

        Ok(board)
    }

    /// Deletes a saved board file. Returns whether it existed.
    pub fn delete(&self, name: &str) -> Result<bool> {
        let filepath = self.board_path(name);

        if !filepath.exists() {
            return Ok(false);
        }

        fs::remove_file(&filepath).map_err(|e| StoreError::DeleteBoard {
            path: filepath.clone(),
            source: e,
        })?;
        info!(path = %filepath.display(), "board deleted");
        Ok(true)
    }

    /// Downloads a default board container into the boards directory and
    /// returns its path. The only networked operation in the store, with
    /// its own short timeout.
    pub fn fetch_default(&self, url: &str) -> Result<PathBuf> {
        let filename = match url.rsplit_once('/') {
            Some((_, tail)) => tail,
            None => "",
        };
        let filename = if filename.ends_with(".qonvo") {
            filename.to_string()
        } else {
            "default.qonvo".to_string()
        };
        let filepath = self.boards_dir.join(filename);

        let config = ureq::Agent::config_builder()
            .timeout_global(Some(FETCH_TIMEOUT))
            .build();
        let agent = ureq::Agent::new_with_config(config);

        let mut response = agent
            .get(url)
            .header("User-Agent", "qonvo")
            .call()
            .map_err(|e| {
                error!(url, error = %e, "default board download failed");
                StoreError::FetchDefault {
                    url: url.to_string(),
                    source: Box::new(e),
                }
            })?;

        let mut file = fs::File::create(&filepath).map_err(|e| StoreError::WriteBoard {
            path: filepath.clone(),
            source: e,
        })?;
        if let Err(e) = std::io::copy(&mut response.body_mut().as_reader(), &mut file) {
            let _ = fs::remove_file(&filepath);
            return Err(StoreError::WriteBoard {
                path: filepath.clone(),
                source: e,
            });
        }

        info!(url, path = %filepath.display(), "default board fetched");
        Ok(filepath)
    }
}

/// Rotates backup generations before an overwrite:
/// `backup2 -> backup3` (evicting any old `backup3`), `backup -> backup2`,
/// then copies the current file into the single-backup slot. Every step is
/// individually best-effort.
fn rotate_backups(boards_dir: &Path, name: &str, filepath: &Path) -> RotationOutcome {
    let backup = boards_dir.join(format!("{name}.{BOARD_EXT}.backup"));
    let backup2 = boards_dir.join(format!("{name}.{BOARD_EXT}.backup2"));
    let backup3 = boards_dir.join(format!("{name}.{BOARD_EXT}.backup3"));

    let mut outcome = RotationOutcome::default();

    if backup2.exists() {
        if backup3.exists() {
            if let Err(e) = fs::remove_file(&backup3) {
                warn!(error = %e, "failed to remove oldest backup");
                outcome.failed_steps.push("remove backup3");
            }
        }
        if let Err(e) = fs::rename(&backup2, &backup3) {
            warn!(error = %e, "failed to rotate backup2 to backup3");
            outcome.failed_steps.push("rotate backup2");
        }
    }

    if backup.exists() {
        if let Err(e) = fs::rename(&backup, &backup2) {
            warn!(error = %e, "failed to rotate backup to backup2");
            outcome.failed_steps.push("rotate backup");
        }
    }

    match fs::copy(filepath, &backup) {
        Ok(bytes) => {
            info!(bytes, path = %backup.display(), "backup created");
            outcome.created = true;
        }
        Err(e) => {
            error!(error = %e, "backup creation failed");
            outcome.failed_steps.push("copy current");
        }
    }

    outcome
}

/// Swaps the freshly extracted staging directory into place as the working
/// directory. The previous working directory is moved aside first (falling
/// back to deletion, then to a uniquely suffixed name) so it is never
/// silently lost while still in use.
fn swap_staging(working: &Path, staging: &Path, old: &Path) -> Result<()> {
    if working.exists() {
        if let Err(e) = fs::rename(working, old) {
            warn!(error = %e, "cannot move working directory aside, trying removal");
            if let Err(e) = fs::remove_dir_all(working) {
                warn!(error = %e, "cannot remove working directory either");
                if working.exists() {
                    let alt = alt_old_name(working);
                    fs::rename(working, &alt).map_err(|e| {
                        error!(error = %e, "cannot free working directory");
                        StoreError::ReplaceWorkingDir {
                            path: working.to_path_buf(),
                            source: e,
                        }
                    })?;
                }
            }
        }
    }

    if let Err(e) = fs::rename(staging, working) {
        // Cross-device or similar; fall back to a recursive copy.
        warn!(error = %e, "staging rename failed, falling back to copy");
        copy_dir_all(staging, working).map_err(|e| StoreError::ReplaceWorkingDir {
            path: working.to_path_buf(),
            source: e,
        })?;
        if let Err(e) = fs::remove_dir_all(staging) {
            warn!(error = %e, "failed to remove staging after copy");
        }
    }
    info!(working = %working.display(), "staging swapped into place");

    if old.exists() {
        if let Err(e) = fs::remove_dir_all(old) {
            warn!(error = %e, "failed to clean up old working directory");
        }
    }

    Ok(())
}

fn alt_old_name(working: &Path) -> PathBuf {
    let stem = working
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "board".to_string());
    working.with_file_name(format!("{stem}._old_{}", std::process::id()))
}

fn copy_dir_all(src: &Path, dst: &Path) -> std::io::Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_all(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}
