use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::entry::LedgerEntry;
use crate::error::{LedgerError, LedgerResult};

/// Storage backend trait: allows file-backed and in-memory ledgers.
pub trait LedgerStorage: Send {
    /// Load every complete record. A trailing partial record is dropped.
    fn load(&mut self) -> LedgerResult<Vec<LedgerEntry>>;
    /// Durably append one record.
    fn append(&mut self, entry: &LedgerEntry) -> LedgerResult<()>;
    /// Human-readable location, for logs.
    fn describe(&self) -> String;
}

/// Parsed contents of a JSONL ledger image.
struct ParsedImage {
    entries: Vec<LedgerEntry>,
    /// Byte length of the complete records.
    valid_len: u64,
    /// Bytes after the last newline (an interrupted write).
    partial_tail: usize,
}

fn parse_image(bytes: &[u8]) -> LedgerResult<ParsedImage> {
    let mut entries = Vec::new();
    let mut offset = 0usize;
    let mut line_no = 0usize;
    while let Some(pos) = bytes[offset..].iter().position(|b| *b == b'\n') {
        line_no += 1;
        let line = &bytes[offset..offset + pos];
        offset += pos + 1;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        let entry: LedgerEntry =
            serde_json::from_slice(line).map_err(|e| LedgerError::Corrupt {
                line: line_no,
                reason: e.to_string(),
            })?;
        entries.push(entry);
    }
    Ok(ParsedImage {
        entries,
        valid_len: offset as u64,
        partial_tail: bytes.len() - offset,
    })
}

// ── File-backed storage ─────────────────────────────────────────────────

/// JSONL file, one canonical record per line.
///
/// The single writer holds an exclusive advisory lock on a sibling `.lock`
/// file for as long as the storage lives. The kernel drops the lock when the
/// holder exits, so a crash never leaves the ledger wedged; the PID written
/// into the file is for operators only.
pub struct FileLedgerStorage {
    path: PathBuf,
    _lock: File,
    file: Option<File>,
    len: u64,
}

impl FileLedgerStorage {
    pub fn open(path: impl Into<PathBuf>) -> LedgerResult<Self> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let lock_path = lock_path_for(&path);
        let mut lock = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&lock_path)?;
        if !try_flock_exclusive(&lock)? {
            return Err(LedgerError::Locked(path));
        }
        lock.set_len(0)?;
        writeln!(lock, "{}", std::process::id())?;
        debug!(lock = %lock_path.display(), "Ledger writer lock acquired");
        Ok(Self {
            path,
            _lock: lock,
            file: None,
            len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn lock_path_for(path: &Path) -> PathBuf {
    let mut name = path.file_name().unwrap_or_default().to_os_string();
    name.push(".lock");
    path.with_file_name(name)
}

/// Non-blocking exclusive `flock`; `Ok(false)` when another holder has it.
#[allow(unsafe_code)]
fn try_flock_exclusive(file: &File) -> std::io::Result<bool> {
    #[cfg(unix)]
    {
        use std::os::unix::io::AsRawFd;
        // SAFETY: `file` owns a valid descriptor for the duration of the call.
        let result = unsafe { libc::flock(file.as_raw_fd(), libc::LOCK_EX | libc::LOCK_NB) };
        if result == 0 {
            return Ok(true);
        }
        let err = std::io::Error::last_os_error();
        if err.kind() == std::io::ErrorKind::WouldBlock
            || err.raw_os_error() == Some(libc::EWOULDBLOCK)
        {
            return Ok(false);
        }
        Err(err)
    }
    #[cfg(not(unix))]
    {
        let _ = file;
        Ok(true)
    }
}

impl LedgerStorage for FileLedgerStorage {
    fn load(&mut self) -> LedgerResult<Vec<LedgerEntry>> {
        let bytes = match std::fs::read(&self.path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(e.into()),
        };
        let image = parse_image(&bytes)?;
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        if image.partial_tail > 0 {
            warn!(
                path = %self.path.display(),
                bytes = image.partial_tail,
                "Discarding partial trailing ledger record"
            );
            file.set_len(image.valid_len)?;
            file.sync_all()?;
        }
        self.len = image.valid_len;
        self.file = Some(file);
        Ok(image.entries)
    }

    fn append(&mut self, entry: &LedgerEntry) -> LedgerResult<()> {
        if self.file.is_none() {
            let f = OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)?;
            self.len = f.metadata()?.len();
            self.file = Some(f);
        }
        let Some(file) = self.file.as_mut() else {
            return Err(std::io::Error::other("ledger file not open").into());
        };
        let mut line = entry.to_line()?;
        line.push('\n');
        let written = file.write_all(line.as_bytes()).and_then(|_| file.sync_data());
        if let Err(e) = written {
            // Roll the file back so no partial record survives.
            let _ = file.set_len(self.len);
            return Err(e.into());
        }
        self.len += line.len() as u64;
        debug!(path = %self.path.display(), bytes = line.len(), "Ledger record synced");
        Ok(())
    }

    fn describe(&self) -> String {
        self.path.display().to_string()
    }
}

/// Write a complete ledger image atomically: temp file, fsync, rename.
pub fn write_snapshot(path: &Path, entries: &[LedgerEntry]) -> LedgerResult<()> {
    let mut tmp_name = path.file_name().unwrap_or_default().to_os_string();
    tmp_name.push(".tmp");
    let tmp = path.with_file_name(tmp_name);
    {
        let mut file = File::create(&tmp)?;
        for entry in entries {
            let mut line = entry.to_line()?;
            line.push('\n');
            file.write_all(line.as_bytes())?;
        }
        file.sync_all()?;
    }
    std::fs::rename(&tmp, path)?;
    Ok(())
}

// ── In-memory storage (for testing) ─────────────────────────────────────

/// Stores raw JSONL lines in memory.
#[derive(Default)]
pub struct MemoryLedgerStorage {
    lines: Vec<String>,
}

impl MemoryLedgerStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed with raw lines, as an auditor would receive them.
    pub fn from_lines(lines: Vec<String>) -> Self {
        Self { lines }
    }
}

impl LedgerStorage for MemoryLedgerStorage {
    fn load(&mut self) -> LedgerResult<Vec<LedgerEntry>> {
        let mut image = self.lines.join("\n");
        if !image.is_empty() {
            image.push('\n');
        }
        Ok(parse_image(image.as_bytes())?.entries)
    }

    fn append(&mut self, entry: &LedgerEntry) -> LedgerResult<()> {
        self.lines.push(entry.to_line()?);
        Ok(())
    }

    fn describe(&self) -> String {
        "memory".into()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mgp_types::ContentHash;
    use serde_json::json;

    fn make_entry(n: u64) -> LedgerEntry {
        LedgerEntry::chained(ContentHash::zero(), json!({ "n": n })).unwrap()
    }

    #[test]
    fn parse_skips_partial_tail() {
        let mut bytes = make_entry(1).to_line().unwrap().into_bytes();
        bytes.push(b'\n');
        bytes.extend_from_slice(br#"{"payload":{"n":"#);
        let image = parse_image(&bytes).unwrap();
        assert_eq!(image.entries.len(), 1);
        assert!(image.partial_tail > 0);
    }

    #[test]
    fn parse_rejects_corrupt_complete_line() {
        let bytes = b"not json\n".to_vec();
        assert!(matches!(
            parse_image(&bytes),
            Err(LedgerError::Corrupt { line: 1, .. })
        ));
    }

    #[test]
    fn file_storage_truncates_partial_tail() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let mut good = make_entry(1).to_line().unwrap();
        good.push('\n');
        std::fs::write(&path, format!("{good}{{\"payload\":")).unwrap();

        let mut storage = FileLedgerStorage::open(&path).unwrap();
        let entries = storage.load().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), good);

        storage.append(&make_entry(2)).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
    }

    #[test]
    fn second_writer_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        let _first = FileLedgerStorage::open(&path).unwrap();
        assert!(matches!(
            FileLedgerStorage::open(&path),
            Err(LedgerError::Locked(_))
        ));
    }

    #[test]
    fn lock_released_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("ledger.jsonl");
        drop(FileLedgerStorage::open(&path).unwrap());
        assert!(FileLedgerStorage::open(&path).is_ok());
    }

    #[test]
    fn stale_lock_from_a_dead_writer_is_reclaimed() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lineage.jsonl");
        {
            let ledger = crate::Ledger::open(&path).unwrap();
            ledger.append(serde_json::json!({"type": "test"})).unwrap();
        }
        // What a crashed writer leaves behind.
        std::fs::write(dir.path().join("lineage.jsonl.lock"), "999999\n").unwrap();

        let ledger = crate::Ledger::open(&path).unwrap();
        assert_eq!(ledger.len(), 1);
        let pid = std::fs::read_to_string(dir.path().join("lineage.jsonl.lock")).unwrap();
        assert_eq!(pid.trim(), std::process::id().to_string());
    }

    #[test]
    fn snapshot_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("export.jsonl");
        std::fs::write(&path, "old\n").unwrap();
        write_snapshot(&path, &[make_entry(1), make_entry(2)]).unwrap();
        let text = std::fs::read_to_string(&path).unwrap();
        assert_eq!(text.lines().count(), 2);
        assert!(!dir.path().join("export.jsonl.tmp").exists());
    }
}
