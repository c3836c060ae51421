//! Service log sink.
//!
//! The executor and the child's output pumps share one [`SinkHandle`]. The
//! concrete [`RotatingFile`] keeps the log bounded by size, backup count and
//! age.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::SystemTime;

use chrono::{NaiveDateTime, Utc};
use flate2::Compression;
use flate2::write::GzEncoder;

use crate::config::LogRotation;

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";
const BACKUP_TIME_LEN: usize = 23;
const COMPRESS_SUFFIX: &str = ".gz";

/// Byte sink for service output. Write failures are the sink's problem.
pub trait LogSink: Send {
    fn append(&mut self, bytes: &[u8]);
    fn close(&mut self);
}

struct SinkState {
    sink: Box<dyn LogSink>,
    closed: bool,
}

/// Shared, close-once handle to a [`LogSink`].
#[derive(Clone)]
pub struct SinkHandle {
    inner: Arc<Mutex<SinkState>>,
}

impl SinkHandle {
    pub fn new(sink: impl LogSink + 'static) -> Self {
        Self {
            inner: Arc::new(Mutex::new(SinkState {
                sink: Box::new(sink),
                closed: false,
            })),
        }
    }

    fn state(&self) -> MutexGuard<'_, SinkState> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Append raw bytes. Dropped silently once the sink is closed.
    pub fn append(&self, bytes: &[u8]) {
        let mut state = self.state();
        if !state.closed {
            state.sink.append(bytes);
        }
    }

    /// Append one timestamped line.
    pub fn line(&self, msg: &str) {
        let stamped = format!("{} {msg}\n", Utc::now().format("%Y-%m-%dT%H:%M:%S%.3fZ"));
        self.append(stamped.as_bytes());
    }

    /// Close the underlying sink; later calls are no-ops.
    pub fn close(&self) {
        let mut state = self.state();
        if !state.closed {
            state.closed = true;
            state.sink.close();
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    /// Guard that closes the sink when dropped, whichever way the scope exits.
    pub fn close_guard(&self) -> CloseGuard {
        CloseGuard(self.clone())
    }
}

pub struct CloseGuard(SinkHandle);

impl Drop for CloseGuard {
    fn drop(&mut self) {
        self.0.close();
    }
}

/// Size-rotated log file with optional backup pruning and gzip compression.
pub struct RotatingFile {
    policy: LogRotation,
    file: Option<File>,
    size: u64,
}

impl RotatingFile {
    /// The file is opened lazily on the first append.
    pub fn new(policy: LogRotation) -> Self {
        Self {
            policy,
            file: None,
            size: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.policy.path
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        let incoming = bytes.len() as u64;

        if self.file.is_none() {
            self.open_existing(incoming)?;
        } else if self.size > 0 && self.size + incoming > self.policy.max_bytes {
            self.rotate()?;
        }

        if let Some(file) = self.file.as_mut() {
            file.write_all(bytes)?;
            self.size += incoming;
        }
        Ok(())
    }

    fn open_existing(&mut self, incoming: u64) -> io::Result<()> {
        if let Some(dir) = self.policy.path.parent()
            && !dir.as_os_str().is_empty()
        {
            fs::create_dir_all(dir)?;
        }

        match fs::metadata(&self.policy.path) {
            Ok(meta) if meta.len() > 0 && meta.len() + incoming > self.policy.max_bytes => {
                self.rotate()
            }
            Ok(meta) => {
                self.file = Some(OpenOptions::new().append(true).open(&self.policy.path)?);
                self.size = meta.len();
                Ok(())
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => self.open_new(),
            Err(e) => Err(e),
        }
    }

    fn open_new(&mut self) -> io::Result<()> {
        self.file = Some(
            OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&self.policy.path)?,
        );
        self.size = 0;
        Ok(())
    }

    fn rotate(&mut self) -> io::Result<()> {
        if let Some(mut file) = self.file.take() {
            file.flush()?;
        }
        if self.policy.path.exists() {
            fs::rename(&self.policy.path, self.next_backup_path())?;
        }
        self.open_new()?;
        if let Err(e) = self.prune() {
            log::warn!("Failed to prune log backups of {}: {e}", self.policy.path.display());
        }
        Ok(())
    }

    fn name_parts(&self) -> (String, String) {
        let stem = self
            .policy
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .policy
            .path
            .extension()
            .map(|s| format!(".{}", s.to_string_lossy()))
            .unwrap_or_default();
        (stem, ext)
    }

    fn next_backup_path(&self) -> PathBuf {
        let (stem, ext) = self.name_parts();
        let dir = self.policy.path.parent().unwrap_or_else(|| Path::new(""));
        let stamp = Utc::now().format(BACKUP_TIME_FORMAT).to_string();

        let mut candidate = dir.join(format!("{stem}-{stamp}{ext}"));
        let mut n = 1;
        while candidate.exists() || with_gz(&candidate).exists() {
            candidate = dir.join(format!("{stem}-{stamp}-{n}{ext}"));
            n += 1;
        }
        candidate
    }

    /// Backups of this log, newest first.
    fn backups(&self) -> io::Result<Vec<Backup>> {
        let (stem, ext) = self.name_parts();
        let prefix = format!("{stem}-");
        let dir = match self.policy.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };

        let mut found = Vec::new();
        for entry in fs::read_dir(&dir)?.flatten() {
            let name = entry.file_name().to_string_lossy().into_owned();
            let (plain, compressed) = match name.strip_suffix(COMPRESS_SUFFIX) {
                Some(plain) => (plain, true),
                None => (name.as_str(), false),
            };
            let Some(middle) = plain
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(ext.as_str()))
            else {
                continue;
            };
            let Some(stamp) = middle.get(..BACKUP_TIME_LEN) else {
                continue;
            };
            let Ok(taken) = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT) else {
                continue;
            };
            found.push(Backup {
                path: entry.path(),
                order: middle.to_string(),
                taken: SystemTime::from(taken.and_utc()),
                compressed,
            });
        }
        found.sort_by(|a, b| b.order.cmp(&a.order));
        Ok(found)
    }

    fn prune(&self) -> io::Result<()> {
        let mut keep = Vec::new();
        let now = SystemTime::now();

        for (idx, backup) in self.backups()?.into_iter().enumerate() {
            let over_count = self.policy.max_backups > 0 && idx >= self.policy.max_backups;
            let too_old = self.policy.max_age.is_some_and(|max_age| {
                now.duration_since(backup.taken)
                    .is_ok_and(|age| age > max_age)
            });
            if over_count || too_old {
                fs::remove_file(&backup.path)?;
            } else {
                keep.push(backup);
            }
        }

        if self.policy.compress {
            for backup in keep.iter().filter(|b| !b.compressed) {
                compress_file(&backup.path)?;
            }
        }
        Ok(())
    }
}

struct Backup {
    path: PathBuf,
    order: String,
    taken: SystemTime,
    compressed: bool,
}

fn with_gz(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_owned();
    name.push(COMPRESS_SUFFIX);
    PathBuf::from(name)
}

fn compress_file(src: &Path) -> io::Result<()> {
    let dst = with_gz(src);
    let mut input = File::open(src)?;
    let mut encoder = GzEncoder::new(File::create(&dst)?, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    drop(input);
    fs::remove_file(src)
}

impl LogSink for RotatingFile {
    fn append(&mut self, bytes: &[u8]) {
        if let Err(e) = self.write_bytes(bytes) {
            log::warn!("Failed to write to {}: {e}", self.policy.path.display());
        }
    }

    fn close(&mut self) {
        if let Some(mut file) = self.file.take()
            && let Err(e) = file.flush()
        {
            log::warn!("Failed to flush {}: {e}", self.policy.path.display());
        }
    }
}
