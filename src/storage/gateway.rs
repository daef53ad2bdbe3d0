//! Lock-guarded file primitives on the storage volumes.
//!
//! Every primitive takes the [`StorageLock`] with its bounded timeout before
//! it touches a volume and releases it on every exit path. File handles are
//! opened after the guard and dropped before it. Primitives never call each
//! other while holding the guard.

#![allow(missing_docs)]

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, ErrorKind, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;

use crate::core::errors::{Result, SdcError};
use crate::core::paths::refers_to_same_file;
use crate::platform::pal::VolumeKind;
use crate::storage::lock::StorageLock;
use crate::storage::volumes::VolumeSet;

const LINE_SCAN_BUFFER: usize = 8 * 1024;

/// How a destination file is opened for writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteMode {
    /// Fail with `AlreadyExists` if the file is present.
    CreateNew,
    /// Create or truncate.
    Truncate,
    /// Create or append at the end.
    Append,
}

/// One bounded piece of a streaming copy.
#[derive(Debug, Clone, Copy)]
pub struct SliceSpec {
    pub offset: u64,
    pub max_bytes: u64,
    pub chunk_bytes: usize,
    pub mode: WriteMode,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SliceOutcome {
    pub copied: u64,
    pub reached_eof: bool,
}

/// Directory listing entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DirEntryInfo {
    pub name: String,
    pub size: u64,
    pub is_dir: bool,
}

/// The only way the runtime touches storage.
#[derive(Clone)]
pub struct StorageGateway {
    lock: Arc<StorageLock>,
    volumes: Arc<VolumeSet>,
}

impl std::fmt::Debug for StorageGateway {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StorageGateway")
            .field("lock", &self.lock)
            .finish_non_exhaustive()
    }
}

impl StorageGateway {
    pub fn new(lock: Arc<StorageLock>, volumes: Arc<VolumeSet>) -> Self {
        Self { lock, volumes }
    }

    #[must_use]
    pub fn lock(&self) -> &Arc<StorageLock> {
        &self.lock
    }

    #[must_use]
    pub fn volumes(&self) -> &Arc<VolumeSet> {
        &self.volumes
    }

    /// Run `body` under the storage lock after mounting the volumes of `paths`.
    fn with_lock<T>(
        &self,
        operation: &'static str,
        paths: &[&Path],
        body: impl FnOnce() -> Result<T>,
    ) -> Result<T> {
        let guard = self.lock.acquire(operation)?;
        for path in paths {
            self.volumes.ensure_mounted_for(path)?;
        }
        let result = body();
        drop(guard);
        result
    }

    /// Read a whole file.
    pub fn read_all(&self, path: &Path) -> Result<Vec<u8>> {
        self.with_lock("read_all", &[path], || {
            let mut file = File::open(path).map_err(|e| SdcError::io(path, e))?;
            let expected = file.metadata().map_err(|e| SdcError::io(path, e))?.len();
            let capacity = usize::try_from(expected).map_err(|_| SdcError::OutOfMemory {
                path: path.to_path_buf(),
                requested: expected,
            })?;
            let mut buf = Vec::new();
            buf.try_reserve_exact(capacity)
                .map_err(|_| SdcError::OutOfMemory {
                    path: path.to_path_buf(),
                    requested: expected,
                })?;
            file.read_to_end(&mut buf)
                .map_err(|e| SdcError::io(path, e))?;
            if (buf.len() as u64) < expected {
                return Err(SdcError::IoShort {
                    path: path.to_path_buf(),
                    expected,
                    actual: buf.len() as u64,
                });
            }
            Ok(buf)
        })
    }

    /// Write `bytes` as the whole content of `path`.
    ///
    /// With `overwrite = false` an existing file fails with `AlreadyExists`
    /// and is left untouched.
    pub fn write_all(&self, path: &Path, bytes: &[u8], overwrite: bool) -> Result<()> {
        let mode = if overwrite {
            WriteMode::Truncate
        } else {
            WriteMode::CreateNew
        };
        self.with_lock("write_all", &[path], || {
            let mut file = open_for_write(path, mode)?;
            write_fully(&mut file, path, bytes, 0)
        })
    }

    /// Append `text` plus a newline. Returns the bytes written.
    pub fn append_line(&self, path: &Path, text: &str) -> Result<u64> {
        if text.contains(['\n', '\r']) {
            return Err(SdcError::invalid_argument(format!(
                "record text must be a single line: {text:?}"
            )));
        }
        let mut line = String::with_capacity(text.len() + 1);
        line.push_str(text);
        line.push('\n');
        self.with_lock("append_line", &[path], || {
            let mut file = open_for_write(path, WriteMode::Append)?;
            write_fully(&mut file, path, line.as_bytes(), 0)?;
            Ok(line.len() as u64)
        })
    }

    /// Number of records in `path`. A final line without `\n` still counts.
    pub fn line_count(&self, path: &Path) -> Result<u64> {
        self.with_lock("line_count", &[path], || {
            let mut file = File::open(path).map_err(|e| SdcError::io(path, e))?;
            let mut buf = vec![0_u8; LINE_SCAN_BUFFER];
            let mut count = 0_u64;
            let mut last = None;
            loop {
                let n = match file.read(&mut buf) {
                    Ok(0) => break,
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(SdcError::io(path, e)),
                };
                count += memchr::memchr_iter(b'\n', &buf[..n]).count() as u64;
                last = Some(buf[n - 1]);
            }
            if last.is_some_and(|byte| byte != b'\n') {
                count += 1;
            }
            Ok(count)
        })
    }

    /// Stream `source` into a truncated `destination` under one acquisition.
    ///
    /// If either open fails both handles are dropped and the lock released
    /// before the error is returned.
    pub fn transform<T, F>(&self, source: &Path, destination: &Path, f: F) -> Result<T>
    where
        F: FnOnce(&mut BufReader<File>, &mut BufWriter<File>) -> io::Result<T>,
    {
        if refers_to_same_file(source, destination) {
            return Err(SdcError::invalid_argument(format!(
                "cannot transform {} onto itself",
                source.display()
            )));
        }
        self.with_lock("transform", &[source, destination], || {
            let input = File::open(source).map_err(|e| SdcError::io(source, e))?;
            let output = open_for_write(destination, WriteMode::Truncate)?;
            let mut reader = BufReader::new(input);
            let mut writer = BufWriter::new(output);
            let value = f(&mut reader, &mut writer)
                .map_err(|e| map_stream_error(source, destination, e))?;
            writer
                .flush()
                .map_err(|e| map_stream_error(source, destination, e))?;
            Ok(value)
        })
    }

    /// Copy at most `spec.max_bytes` from `source@spec.offset` into `destination`.
    pub fn copy_slice(
        &self,
        source: &Path,
        destination: &Path,
        spec: SliceSpec,
    ) -> Result<SliceOutcome> {
        if spec.chunk_bytes == 0 {
            return Err(SdcError::invalid_argument("copy chunk size must be > 0"));
        }
        self.with_lock("copy_slice", &[source, destination], || {
            let mut input = File::open(source).map_err(|e| SdcError::io(source, e))?;
            input
                .seek(SeekFrom::Start(spec.offset))
                .map_err(|e| SdcError::io(source, e))?;
            let mut output = open_for_write(destination, spec.mode)?;
            let mut buf = vec![0_u8; spec.chunk_bytes];
            let mut copied = 0_u64;
            while copied < spec.max_bytes {
                let want = usize::try_from(spec.max_bytes - copied)
                    .map_or(spec.chunk_bytes, |remaining| remaining.min(spec.chunk_bytes));
                let n = match input.read(&mut buf[..want]) {
                    Ok(0) => {
                        return Ok(SliceOutcome {
                            copied,
                            reached_eof: true,
                        });
                    }
                    Ok(n) => n,
                    Err(e) if e.kind() == ErrorKind::Interrupted => continue,
                    Err(e) => return Err(SdcError::io(source, e)),
                };
                write_fully(&mut output, destination, &buf[..n], spec.offset + copied)?;
                copied += n as u64;
            }
            Ok(SliceOutcome {
                copied,
                reached_eof: false,
            })
        })
    }

    pub fn exists(&self, path: &Path) -> Result<bool> {
        self.with_lock("exists", &[path], || {
            path.try_exists().map_err(|e| SdcError::io(path, e))
        })
    }

    /// Size of a regular file. Anything else is an `InvalidArgument`.
    pub fn file_size(&self, path: &Path) -> Result<u64> {
        self.with_lock("file_size", &[path], || {
            let meta = fs::metadata(path).map_err(|e| SdcError::io(path, e))?;
            if !meta.is_file() {
                return Err(SdcError::invalid_argument(format!(
                    "{} is not a regular file",
                    path.display()
                )));
            }
            Ok(meta.len())
        })
    }

    pub fn remove(&self, path: &Path) -> Result<()> {
        self.with_lock("remove", &[path], || {
            fs::remove_file(path).map_err(|e| SdcError::io(path, e))
        })
    }

    /// Unmount `kind` once no storage operation is in flight.
    ///
    /// The next operation on that volume mounts it again.
    pub fn release(&self, kind: VolumeKind) -> Result<()> {
        self.with_lock("release", &[], || self.volumes.unmount(kind))
    }

    /// Entries of `dir`, sorted by name.
    pub fn list_dir(&self, dir: &Path) -> Result<Vec<DirEntryInfo>> {
        self.with_lock("list_dir", &[dir], || {
            let mut entries = Vec::new();
            for entry in fs::read_dir(dir).map_err(|e| SdcError::io(dir, e))? {
                let entry = entry.map_err(|e| SdcError::io(dir, e))?;
                let meta = entry.metadata().map_err(|e| SdcError::io(entry.path(), e))?;
                entries.push(DirEntryInfo {
                    name: entry.file_name().to_string_lossy().into_owned(),
                    size: meta.len(),
                    is_dir: meta.is_dir(),
                });
            }
            entries.sort_by(|a, b| a.name.cmp(&b.name));
            Ok(entries)
        })
    }
}

fn open_for_write(path: &Path, mode: WriteMode) -> Result<File> {
    let mut options = OpenOptions::new();
    match mode {
        WriteMode::CreateNew => options.write(true).create_new(true),
        WriteMode::Truncate => options.write(true).create(true).truncate(true),
        WriteMode::Append => options.append(true).create(true),
    };
    options.open(path).map_err(|e| {
        if e.kind() == ErrorKind::AlreadyExists {
            SdcError::AlreadyExists {
                path: path.to_path_buf(),
            }
        } else {
            SdcError::io(path, e)
        }
    })
}

/// Write every byte or fail. `base` is the destination offset of `bytes`,
/// used to report totals in `IoShort`.
fn write_fully(out: &mut impl Write, path: &Path, bytes: &[u8], base: u64) -> Result<()> {
    let mut written = 0_usize;
    while written < bytes.len() {
        match out.write(&bytes[written..]) {
            Ok(0) => return Err(short(path, base, bytes.len(), written)),
            Ok(n) => written += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::StorageFull => {
                return Err(SdcError::InsufficientSpace {
                    path: path.to_path_buf(),
                    needed: (bytes.len() - written) as u64,
                    available: 0,
                });
            }
            Err(e) if e.kind() == ErrorKind::WriteZero => {
                return Err(short(path, base, bytes.len(), written));
            }
            Err(e) => return Err(SdcError::io(path, e)),
        }
    }
    Ok(())
}

fn short(path: &Path, base: u64, expected: usize, actual: usize) -> SdcError {
    SdcError::IoShort {
        path: path.to_path_buf(),
        expected: base + expected as u64,
        actual: base + actual as u64,
    }
}

fn map_stream_error(source: &Path, destination: &Path, e: io::Error) -> SdcError {
    let failing: PathBuf = match e.kind() {
        ErrorKind::StorageFull => {
            return SdcError::InsufficientSpace {
                path: destination.to_path_buf(),
                needed: 0,
                available: 0,
            };
        }
        ErrorKind::WriteZero => destination.to_path_buf(),
        _ => source.to_path_buf(),
    };
    SdcError::io(failing, e)
}
