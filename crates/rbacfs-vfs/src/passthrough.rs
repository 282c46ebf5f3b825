//! Passthrough backend.
//!
//! Mirrors a real directory tree. Virtual paths are already normalized and
//! free of `..`, so joining their segments onto the root cannot climb out of
//! it lexically. File data is always opened with `O_NOFOLLOW` so a final
//! symlink component is never silently followed.

use async_trait::async_trait;
use std::ffi::CString;
use std::io;
use std::os::unix::ffi::OsStrExt;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncSeekExt, AsyncWriteExt};

use crate::backend::Backend;
use crate::error::{FsError, FsResult};
use crate::types::{AccessMask, DirEntry, FileAttr, OpenFlags, SetAttr, SetTime, StatFs};
use crate::vpath::VirtualPath;

/// Passthrough backend over a local directory.
///
/// All operations are relative to `root`. For example, if `root` is
/// `/srv/data`, then reading `/docs/readme.txt` reads
/// `/srv/data/docs/readme.txt`.
#[derive(Debug, Clone)]
pub struct Passthrough {
    root: PathBuf,
    read_only: bool,
}

impl Passthrough {
    /// Create a passthrough backend rooted at `root`.
    ///
    /// The root is canonicalized once, here.
    ///
    /// # Errors
    ///
    /// If `root` does not exist or is not a directory.
    pub fn new(root: impl AsRef<Path>) -> io::Result<Self> {
        let root = root.as_ref().canonicalize()?;
        if !root.is_dir() {
            return Err(io::Error::from_raw_os_error(libc::ENOTDIR));
        }
        Ok(Self { root, read_only: false })
    }

    /// Set whether writes are refused with `EROFS`.
    pub fn with_read_only(mut self, read_only: bool) -> Self {
        self.read_only = read_only;
        self
    }

    /// Get the root path.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &VirtualPath) -> PathBuf {
        path.backing_path(&self.root)
    }

    fn check_writable(&self) -> FsResult<()> {
        if self.read_only {
            Err(FsError::from_errno(libc::EROFS))
        } else {
            Ok(())
        }
    }

    async fn lstat(full: &Path) -> FsResult<FileAttr> {
        let meta = fs::symlink_metadata(full).await?;
        Ok(FileAttr::from_metadata(&meta))
    }

    async fn open_nofollow(full: &Path, read: bool, write: bool, truncate: bool) -> FsResult<fs::File> {
        let file = fs::OpenOptions::new()
            .read(read)
            .write(write)
            .truncate(truncate)
            .custom_flags(libc::O_NOFOLLOW)
            .open(full)
            .await?;
        Ok(file)
    }
}

/// Run a blocking syscall off the async worker threads.
async fn blocking<T, F>(f: F) -> FsResult<T>
where
    F: FnOnce() -> io::Result<T> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| FsError::Io(io::Error::other(e)))?
        .map_err(FsError::from)
}

fn c_path(path: &Path) -> io::Result<CString> {
    CString::new(path.as_os_str().as_bytes()).map_err(|_| io::Error::from_raw_os_error(libc::EINVAL))
}

#[cfg(target_os = "linux")]
fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    let (from, to) = (c_path(from)?, c_path(to)?);
    // SAFETY: both paths are NUL-terminated and outlive the call.
    let rc = unsafe {
        libc::renameat2(
            libc::AT_FDCWD,
            from.as_ptr(),
            libc::AT_FDCWD,
            to.as_ptr(),
            libc::RENAME_NOREPLACE,
        )
    };
    if rc == 0 {
        Ok(())
    } else {
        Err(io::Error::last_os_error())
    }
}

// No atomic variant here: check, then move.
#[cfg(not(target_os = "linux"))]
fn rename_noreplace(from: &Path, to: &Path) -> io::Result<()> {
    match std::fs::symlink_metadata(to) {
        Ok(_) => Err(io::Error::from_raw_os_error(libc::EEXIST)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => std::fs::rename(from, to),
        Err(e) => Err(e),
    }
}

fn timespec(time: Option<SetTime>) -> libc::timespec {
    let (tv_sec, tv_nsec) = match time {
        None => (0, libc::UTIME_OMIT),
        Some(SetTime::Now) => (0, libc::UTIME_NOW),
        Some(SetTime::At(t)) => match t.duration_since(SystemTime::UNIX_EPOCH) {
            Ok(d) => (d.as_secs() as libc::time_t, d.subsec_nanos() as libc::c_long),
            Err(e) => {
                // Before the epoch: whole seconds down, positive nanoseconds.
                let d = e.duration();
                let mut secs = -(d.as_secs() as libc::time_t);
                let mut nanos = d.subsec_nanos() as libc::c_long;
                if nanos > 0 {
                    secs -= 1;
                    nanos = 1_000_000_000 - nanos;
                }
                (secs, nanos)
            }
        },
    };
    libc::timespec { tv_sec, tv_nsec }
}

#[async_trait]
impl Backend for Passthrough {
    async fn getattr(&self, path: &VirtualPath) -> FsResult<FileAttr> {
        Self::lstat(&self.resolve(path)).await
    }

    async fn readdir(&self, path: &VirtualPath) -> FsResult<Vec<DirEntry>> {
        let full = self.resolve(path);
        let mut entries = Vec::new();
        let mut dir = fs::read_dir(&full).await?;

        while let Some(entry) = dir.next_entry().await? {
            let file_type = entry.file_type().await?;
            entries.push(DirEntry::new(entry.file_name().to_string_lossy(), file_type.into()));
        }

        entries.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(entries)
    }

    async fn open(&self, path: &VirtualPath, flags: OpenFlags) -> FsResult<()> {
        if flags.write || flags.truncate {
            self.check_writable()?;
        }
        let full = self.resolve(path);
        // O_RDONLY|O_TRUNC needs a writable descriptor to truncate through.
        let write = flags.write || flags.truncate;
        let read = flags.read || !write;
        let mut file = Self::open_nofollow(&full, read, write, flags.truncate).await?;
        if write {
            file.flush().await?;
        }
        Ok(())
    }

    async fn read(&self, path: &VirtualPath, offset: u64, size: u32) -> FsResult<Vec<u8>> {
        let full = self.resolve(path);
        let mut file = Self::open_nofollow(&full, true, false, false).await?;
        file.seek(io::SeekFrom::Start(offset)).await?;

        let mut buffer = Vec::with_capacity(size as usize);
        file.take(u64::from(size)).read_to_end(&mut buffer).await?;
        Ok(buffer)
    }

    async fn readlink(&self, path: &VirtualPath) -> FsResult<PathBuf> {
        Ok(fs::read_link(self.resolve(path)).await?)
    }

    async fn access(&self, path: &VirtualPath, mask: AccessMask) -> FsResult<()> {
        if mask.contains(AccessMask::WRITE) && !mask.is_exists_only() {
            self.check_writable()?;
        }
        fs::symlink_metadata(self.resolve(path)).await?;
        Ok(())
    }

    async fn write(&self, path: &VirtualPath, offset: u64, data: &[u8]) -> FsResult<u32> {
        self.check_writable()?;
        let full = self.resolve(path);
        let mut file = Self::open_nofollow(&full, false, true, false).await?;
        file.seek(io::SeekFrom::Start(offset)).await?;
        file.write_all(data).await?;
        file.flush().await?;
        Ok(data.len() as u32)
    }

    async fn create(&self, path: &VirtualPath, mode: u32) -> FsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path);
        let file = fs::OpenOptions::new()
            .read(true)
            .write(true)
            .create_new(true)
            .mode(mode)
            .custom_flags(libc::O_NOFOLLOW)
            .open(&full)
            .await?;
        let meta = file.metadata().await?;
        Ok(FileAttr::from_metadata(&meta))
    }

    async fn mkdir(&self, path: &VirtualPath, mode: u32) -> FsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path);
        fs::DirBuilder::new().mode(mode).create(&full).await?;
        Self::lstat(&full).await
    }

    async fn mknod(&self, path: &VirtualPath, mode: u32, rdev: u32) -> FsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path);
        let c = c_path(&full)?;
        blocking(move || {
            // SAFETY: `c` is a valid NUL-terminated path that outlives the call.
            let rc = unsafe { libc::mknod(c.as_ptr(), mode as libc::mode_t, rdev as libc::dev_t) };
            if rc == 0 {
                Ok(())
            } else {
                Err(io::Error::last_os_error())
            }
        })
        .await?;
        Self::lstat(&full).await
    }

    async fn unlink(&self, path: &VirtualPath) -> FsResult<()> {
        self.check_writable()?;
        Ok(fs::remove_file(self.resolve(path)).await?)
    }

    async fn rmdir(&self, path: &VirtualPath) -> FsResult<()> {
        self.check_writable()?;
        Ok(fs::remove_dir(self.resolve(path)).await?)
    }

    async fn rename(&self, from: &VirtualPath, to: &VirtualPath, replace: bool) -> FsResult<()> {
        self.check_writable()?;
        let (from, to) = (self.resolve(from), self.resolve(to));
        if replace {
            return Ok(fs::rename(from, to).await?);
        }
        blocking(move || rename_noreplace(&from, &to)).await
    }

    async fn setattr(&self, path: &VirtualPath, attr: &SetAttr) -> FsResult<FileAttr> {
        if !attr.is_empty() {
            self.check_writable()?;
        }
        let full = self.resolve(path);

        if let Some(size) = attr.size {
            let file = Self::open_nofollow(&full, false, true, false).await?;
            file.set_len(size).await?;
        }

        if let Some(mode) = attr.mode {
            // Linux symlinks carry no mode of their own; chmod would follow them.
            let meta = fs::symlink_metadata(&full).await?;
            if !meta.file_type().is_symlink() {
                use std::os::unix::fs::PermissionsExt;
                fs::set_permissions(&full, std::fs::Permissions::from_mode(mode & 0o7777)).await?;
            }
        }

        if attr.uid.is_some() || attr.gid.is_some() {
            let (uid, gid, target) = (attr.uid, attr.gid, full.clone());
            blocking(move || std::os::unix::fs::lchown(&target, uid, gid)).await?;
        }

        if attr.atime.is_some() || attr.mtime.is_some() {
            let c = c_path(&full)?;
            let times = [timespec(attr.atime), timespec(attr.mtime)];
            blocking(move || {
                // SAFETY: `c` is NUL-terminated and `times` holds exactly two entries.
                let rc = unsafe {
                    libc::utimensat(libc::AT_FDCWD, c.as_ptr(), times.as_ptr(), libc::AT_SYMLINK_NOFOLLOW)
                };
                if rc == 0 {
                    Ok(())
                } else {
                    Err(io::Error::last_os_error())
                }
            })
            .await?;
        }

        Self::lstat(&full).await
    }

    async fn symlink(&self, path: &VirtualPath, target: &Path) -> FsResult<FileAttr> {
        self.check_writable()?;
        let full = self.resolve(path);
        fs::symlink(target, &full).await?;
        Self::lstat(&full).await
    }

    async fn link(&self, oldpath: &VirtualPath, newpath: &VirtualPath) -> FsResult<FileAttr> {
        self.check_writable()?;
        let new_full = self.resolve(newpath);
        fs::hard_link(self.resolve(oldpath), &new_full).await?;
        Self::lstat(&new_full).await
    }

    async fn statfs(&self) -> FsResult<StatFs> {
        let c = c_path(&self.root)?;
        blocking(move || {
            let mut stat = std::mem::MaybeUninit::<libc::statvfs>::uninit();
            // SAFETY: `c` is NUL-terminated; `stat` is only read after success.
            let rc = unsafe { libc::statvfs(c.as_ptr(), stat.as_mut_ptr()) };
            if rc != 0 {
                return Err(io::Error::last_os_error());
            }
            // SAFETY: statvfs returned 0 and filled the struct.
            let stat = unsafe { stat.assume_init() };
            Ok(StatFs {
                blocks: stat.f_blocks as u64,
                bfree: stat.f_bfree as u64,
                bavail: stat.f_bavail as u64,
                files: stat.f_files as u64,
                ffree: stat.f_ffree as u64,
                bsize: stat.f_bsize as u32,
                namelen: stat.f_namemax as u32,
                frsize: stat.f_frsize as u32,
            })
        })
        .await
    }

    fn read_only(&self) -> bool {
        self.read_only
    }
}
