//! Append-only persistence engine.
//!
//! The whole database is one textual log file. Every mutation is appended
//! as a `set` or `del` record and the in-memory index is rebuilt by
//! replaying the file on open. [Aof::defrag] rewrites the file down to one
//! `set` record per live key.
//!
//! Record grammar, each line `\n`-terminated:
//!
//! ```text
//! set\n<bucket>_<id>\n<value>\n
//! del\n<bucket>_<id>\n
//! ```
//!
//! Values must not contain a newline; there is no escaping layer.

use std::{
    collections::HashMap,
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, BufWriter, Lines, Write},
    path::{Component, Path, PathBuf},
    sync::{mpsc, Arc, Mutex},
    thread,
    time::Duration,
};

use log::{debug, error, warn};

use crate::{KvError, Result};

/// In-memory index rebuilt from the log: bucket name to key id to value.
pub type Keys = HashMap<String, HashMap<u64, Vec<u8>>>;

/// Append-only log engine owning a single database file.
///
/// [Aof::open] replays the file and returns the reconstructed index along
/// with the handle. Appends are serialized by an internal mutex so each
/// record lands as one contiguous write. With a positive sync interval a
/// background flusher pushes buffered data to stable storage every tick;
/// with an interval of zero every append syncs before returning.
pub struct Aof {
    path: PathBuf,
    shared: Arc<Mutex<Shared>>,
    flusher: Mutex<Option<Flusher>>,
}

struct Shared {
    /// `None` once the engine has been closed.
    writer: Option<BufWriter<File>>,
    sync_every_write: bool,
}

struct Flusher {
    stop_tx: mpsc::Sender<()>,
    handle: thread::JoinHandle<()>,
}

impl Aof {
    /// Open the log at `path`, creating the file if absent, and replay it.
    ///
    /// The parent directory must already exist; it is never created here.
    /// A path whose lexical cleaning differs from the path as given (a
    /// `..` or `.` component threading back through the directory) is
    /// rejected before touching the filesystem.
    ///
    /// Returns the engine handle together with the replayed index. Any
    /// malformed record fails the open: no handle is returned and the file
    /// is left untouched.
    pub fn open(path: impl Into<PathBuf>, sync_interval_ms: u64) -> Result<(Aof, Keys)> {
        let path = path.into();
        if lexical_clean(&path) != path {
            return Err(KvError::InvalidPath(path.display().to_string()));
        }

        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(&path)?;

        let keys = replay(File::open(&path)?)?;
        debug!(
            "replayed {:?}: {} buckets, {} keys",
            path,
            keys.len(),
            keys.values().map(HashMap::len).sum::<usize>()
        );

        let shared = Arc::new(Mutex::new(Shared {
            writer: Some(BufWriter::new(file)),
            sync_every_write: sync_interval_ms == 0,
        }));

        let flusher = if sync_interval_ms > 0 {
            Some(spawn_flusher(
                Arc::clone(&shared),
                Duration::from_millis(sync_interval_ms),
            ))
        } else {
            None
        };

        let aof = Aof {
            path,
            shared,
            flusher: Mutex::new(flusher),
        };

        Ok((aof, keys))
    }

    /// Append one pre-formatted record.
    ///
    /// The whole string is written under the writer mutex, so concurrent
    /// callers never interleave within a record. After a successful return
    /// the record is in the OS page cache; it reaches stable storage on
    /// the next flush tick, or before returning when the sync interval
    /// is zero.
    pub fn write(&self, record: &str) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        let sync = shared.sync_every_write;
        let writer = shared.writer.as_mut().ok_or(KvError::Closed)?;
        writer.write_all(record.as_bytes())?;
        if sync {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }

    /// Rewrite the file so it holds exactly one `set` record per live key.
    ///
    /// The current file is moved aside to `<path>.bak`, a fresh file is
    /// written from `keys`, and the backup is removed once the new file is
    /// on disk. If anything fails in between, the backup is moved back.
    pub fn defrag(&self, keys: &Keys) -> Result<()> {
        let mut shared = self.shared.lock().unwrap();
        let mut old_writer = shared.writer.take().ok_or(KvError::Closed)?;
        old_writer.flush()?;

        let bak = bak_path(&self.path);
        if let Err(e) = fs::rename(&self.path, &bak) {
            shared.writer = Some(old_writer);
            return Err(e.into());
        }

        match write_snapshot(&self.path, keys) {
            Ok(writer) => {
                shared.writer = Some(writer);
                drop(old_writer);
                if let Err(e) = fs::remove_file(&bak) {
                    warn!("defrag: could not remove {:?}: {}", bak, e);
                }
                Ok(())
            }
            Err(e) => {
                error!("defrag of {:?} failed, restoring backup: {}", self.path, e);
                drop(old_writer);
                restore_backup(&self.path, &bak, &mut shared);
                Err(e)
            }
        }
    }

    /// Stop the flusher, flush pending data and close the file.
    ///
    /// Closing an already-closed engine is a no-op; appends after close
    /// fail with [KvError::Closed].
    pub fn close(&self) -> Result<()> {
        if let Some(flusher) = self.flusher.lock().unwrap().take() {
            let _ = flusher.stop_tx.send(());
            let _ = flusher.handle.join();
        }

        let mut shared = self.shared.lock().unwrap();
        if let Some(mut writer) = shared.writer.take() {
            writer.flush()?;
            writer.get_ref().sync_all()?;
        }
        Ok(())
    }
}

impl Drop for Aof {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            error!("closing {:?} on drop failed: {}", self.path, e);
        }
    }
}

/// Format a `set` record for one key/value pair.
pub(crate) fn set_record(bucket: &str, id: u64, value: &str) -> String {
    format!("set\n{}_{}\n{}\n", bucket, id, value)
}

/// Format a `del` record for one key.
pub(crate) fn del_record(bucket: &str, id: u64) -> String {
    format!("del\n{}_{}\n", bucket, id)
}

fn spawn_flusher(shared: Arc<Mutex<Shared>>, interval: Duration) -> Flusher {
    let (stop_tx, stop_rx) = mpsc::channel();
    let handle = thread::spawn(move || loop {
        match stop_rx.recv_timeout(interval) {
            Err(mpsc::RecvTimeoutError::Timeout) => {
                let mut shared = shared.lock().unwrap();
                match shared.writer.as_mut() {
                    Some(writer) => {
                        if let Err(e) = writer.flush().and_then(|_| writer.get_ref().sync_data()) {
                            error!("background flush failed: {}", e);
                        }
                    }
                    None => return,
                }
            }
            Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => return,
        }
    });
    Flusher { stop_tx, handle }
}

/// Stream the whole file and rebuild the index.
fn replay(file: File) -> Result<Keys> {
    let mut keys = Keys::new();
    let mut lines = BufReader::new(file).lines();

    while let Some(verb) = lines.next() {
        match verb?.as_str() {
            "set" => {
                let token = next_line(&mut lines, "set record is missing its key")?;
                let value = next_line(&mut lines, "set record is missing its value")?;
                let (bucket, id) = parse_key(&token)?;
                keys.entry(bucket).or_default().insert(id, value.into_bytes());
            }
            "del" => {
                let token = next_line(&mut lines, "del record is missing its key")?;
                let (bucket, id) = parse_key(&token)?;
                if let Some(entries) = keys.get_mut(&bucket) {
                    entries.remove(&id);
                }
            }
            other => {
                return Err(KvError::Corrupt(format!("unknown instruction {:?}", other)));
            }
        }
    }

    Ok(keys)
}

fn next_line(lines: &mut Lines<BufReader<File>>, missing: &str) -> Result<String> {
    match lines.next() {
        Some(line) => Ok(line?),
        None => Err(KvError::Corrupt(missing.to_string())),
    }
}

/// Split a `<bucket>_<id>` token on its last underscore.
fn parse_key(token: &str) -> Result<(String, u64)> {
    let (bucket, id) = token
        .rsplit_once('_')
        .ok_or_else(|| KvError::Corrupt(format!("key {:?} has no bucket separator", token)))?;
    if bucket.is_empty() {
        return Err(KvError::Corrupt(format!("key {:?} has an empty bucket", token)));
    }
    let id = id
        .parse::<u64>()
        .map_err(|_| KvError::Corrupt(format!("key {:?} has a non-numeric id", token)))?;
    Ok((bucket.to_string(), id))
}

fn bak_path(path: &Path) -> PathBuf {
    let mut bak = path.as_os_str().to_owned();
    bak.push(".bak");
    PathBuf::from(bak)
}

fn write_snapshot(path: &Path, keys: &Keys) -> Result<BufWriter<File>> {
    let file = OpenOptions::new()
        .create_new(true)
        .read(true)
        .append(true)
        .open(path)?;
    let mut writer = BufWriter::new(file);

    for (bucket, entries) in keys {
        for (id, value) in entries {
            if value.contains(&b'\n') {
                return Err(KvError::InvalidArgument(format!(
                    "value for {}_{} contains a newline",
                    bucket, id
                )));
            }
            writer.write_all(format!("set\n{}_{}\n", bucket, id).as_bytes())?;
            writer.write_all(value)?;
            writer.write_all(b"\n")?;
        }
    }

    writer.flush()?;
    writer.get_ref().sync_all()?;
    Ok(writer)
}

fn restore_backup(path: &Path, bak: &Path, shared: &mut Shared) {
    let _ = fs::remove_file(path);
    if let Err(e) = fs::rename(bak, path) {
        error!("could not restore {:?} from backup: {}", path, e);
        return;
    }
    match OpenOptions::new().read(true).append(true).open(path) {
        Ok(file) => shared.writer = Some(BufWriter::new(file)),
        Err(e) => error!("could not reopen {:?} after restore: {}", path, e),
    }
}

/// Lexically normalize a path: drop `.` components and fold `..` into the
/// preceding normal component. Leading `..` components are kept as given.
fn lexical_clean(path: &Path) -> PathBuf {
    let mut out: Vec<Component> = Vec::new();
    for comp in path.components() {
        match comp {
            Component::CurDir => {}
            Component::ParentDir => match out.last() {
                Some(Component::Normal(_)) => {
                    out.pop();
                }
                Some(Component::RootDir) => {}
                _ => out.push(comp),
            },
            _ => out.push(comp),
        }
    }
    if out.is_empty() {
        return PathBuf::from(".");
    }
    out.iter().collect()
}
