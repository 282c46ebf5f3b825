//! FUSE adapter.
//!
//! Translates kernel requests into dispatcher calls. Every callback resolves
//! inode numbers to virtual paths synchronously, then hands the request to a
//! runtime task that authorizes, forwards, and replies.
//!
//! Entry and attribute TTLs are zero. Kernel caches are shared by all
//! callers while decisions are per caller, so nothing may be answered from
//! cache.

use std::ffi::OsStr;
use std::future::Future;
use std::io;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use fuser::{
    FileType as FuseFileType, Filesystem, KernelConfig, MountOption, ReplyAttr, ReplyCreate, ReplyData,
    ReplyDirectory, ReplyEmpty, ReplyEntry, ReplyOpen, ReplyStatfs, ReplyWrite, Request, TimeOrNow,
};
use rbacfs_vfs::{
    AccessMask, Caller, Dispatcher, FileAttr, FileType, FsError, FsResult, InodeTable, OpenFlags, Passthrough,
    SetAttr, SetTime, VirtualPath,
};
use tokio::runtime::Handle;

use crate::config::MountConfig;

const TTL: Duration = Duration::ZERO;

/// Inode reported for directory entries the kernel has not looked up yet.
const UNLISTED_INODE: u64 = u64::MAX;

/// Mount `dispatcher` at `mountpoint` and serve until unmounted.
///
/// # Errors
///
/// Any error from the FUSE session, including a failed mount.
pub fn mount(
    config: &MountConfig,
    mountpoint: &Path,
    dispatcher: Dispatcher<Passthrough>,
    runtime: Handle,
) -> io::Result<()> {
    let fs = RbacFs::new(Arc::new(dispatcher), runtime);
    fuser::mount2(fs, mountpoint, &mount_options(config))
}

fn mount_options(config: &MountConfig) -> Vec<MountOption> {
    let mut options = vec![MountOption::FSName("rbacfs".to_string()), MountOption::Subtype("rbacfs".to_string())];
    if config.allow_other {
        options.push(MountOption::AllowOther);
    }
    if config.read_only {
        options.push(MountOption::RO);
    }
    if config.default_permissions {
        options.push(MountOption::DefaultPermissions);
    }
    if config.auto_unmount {
        options.push(MountOption::AutoUnmount);
    }
    options
}

/// The mounted filesystem.
pub struct RbacFs {
    dispatcher: Arc<Dispatcher<Passthrough>>,
    inodes: Arc<InodeTable>,
    runtime: Handle,
}

impl RbacFs {
    /// Create the adapter over a shared dispatcher.
    pub fn new(dispatcher: Arc<Dispatcher<Passthrough>>, runtime: Handle) -> Self {
        Self {
            dispatcher,
            inodes: Arc::new(InodeTable::new()),
            runtime,
        }
    }

    fn caller(req: &Request<'_>) -> Caller {
        Caller::new(req.uid(), req.gid(), req.pid())
    }

    fn path(&self, ino: u64) -> FsResult<VirtualPath> {
        self.inodes
            .path(ino)
            .ok_or_else(|| FsError::not_found(format!("inode {ino}")))
    }

    fn child(&self, parent: u64, name: &OsStr) -> FsResult<VirtualPath> {
        let parent = self.path(parent)?;
        let name = name
            .to_str()
            .ok_or_else(|| FsError::invalid_path(format!("{parent}/{}", name.to_string_lossy())))?;
        parent.join(name)
    }

    fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        self.runtime.spawn(task);
    }
}

fn fuse_kind(kind: FileType) -> FuseFileType {
    match kind {
        FileType::File => FuseFileType::RegularFile,
        FileType::Directory => FuseFileType::Directory,
        FileType::Symlink => FuseFileType::Symlink,
        FileType::NamedPipe => FuseFileType::NamedPipe,
        FileType::CharDevice => FuseFileType::CharDevice,
        FileType::BlockDevice => FuseFileType::BlockDevice,
        FileType::Socket => FuseFileType::Socket,
    }
}

fn fuse_attr(ino: u64, attr: &FileAttr) -> fuser::FileAttr {
    fuser::FileAttr {
        ino,
        size: attr.size,
        blocks: attr.blocks,
        atime: attr.atime,
        mtime: attr.mtime,
        ctime: attr.ctime,
        crtime: UNIX_EPOCH,
        kind: fuse_kind(attr.kind),
        perm: attr.perm,
        nlink: attr.nlink,
        uid: attr.uid,
        gid: attr.gid,
        rdev: attr.rdev,
        blksize: attr.blksize,
        flags: 0,
    }
}

fn set_time(time: TimeOrNow) -> SetTime {
    match time {
        TimeOrNow::Now => SetTime::Now,
        TimeOrNow::SpecificTime(at) => SetTime::At(at),
    }
}

/// Register a freshly created or looked-up entry and reply with it.
fn reply_entry(inodes: &InodeTable, path: &VirtualPath, attr: &FileAttr, reply: ReplyEntry) {
    let ino = inodes.lookup(path);
    reply.entry(&TTL, &fuse_attr(ino, attr), 0);
}

impl Filesystem for RbacFs {
    fn init(&mut self, _req: &Request<'_>, _config: &mut KernelConfig) -> Result<(), libc::c_int> {
        tracing::info!(
            root = %self.dispatcher.backend().root().display(),
            roles = self.dispatcher.policy().roles().len(),
            rules = self.dispatcher.policy().rule_count(),
            "Filesystem mounted"
        );
        Ok(())
    }

    fn destroy(&mut self) {
        tracing::info!(inodes = self.inodes.len(), "Filesystem destroyed");
    }

    fn lookup(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEntry) {
        let caller = Self::caller(req);
        let parent = match self.path(parent) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let Some(name) = name.to_str().map(str::to_string) else {
            return reply.error(FsError::invalid_path(parent.to_string()).errno());
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            match dispatcher.lookup(&caller, &parent, &name).await {
                Ok((path, attr)) => reply_entry(&inodes, &path, &attr, reply),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn forget(&mut self, _req: &Request<'_>, ino: u64, nlookup: u64) {
        self.inodes.forget(ino, nlookup);
    }

    fn getattr(&mut self, req: &Request<'_>, ino: u64, _fh: Option<u64>, reply: ReplyAttr) {
        let caller = Self::caller(req);
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn(async move {
            match dispatcher.getattr(&caller, &path).await {
                Ok(attr) => reply.attr(&TTL, &fuse_attr(ino, &attr)),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn setattr(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        mode: Option<u32>,
        uid: Option<u32>,
        gid: Option<u32>,
        size: Option<u64>,
        atime: Option<TimeOrNow>,
        mtime: Option<TimeOrNow>,
        _ctime: Option<SystemTime>,
        _fh: Option<u64>,
        _crtime: Option<SystemTime>,
        _chgtime: Option<SystemTime>,
        _bkuptime: Option<SystemTime>,
        _flags: Option<u32>,
        reply: ReplyAttr,
    ) {
        let caller = Self::caller(req);
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let attr = SetAttr {
            size,
            mode,
            uid,
            gid,
            atime: atime.map(set_time),
            mtime: mtime.map(set_time),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn(async move {
            match dispatcher.setattr(&caller, &path, &attr).await {
                Ok(attr) => reply.attr(&TTL, &fuse_attr(ino, &attr)),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn readlink(&mut self, req: &Request<'_>, ino: u64, reply: ReplyData) {
        let caller = Self::caller(req);
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn(async move {
            match dispatcher.readlink(&caller, &path).await {
                Ok(target) => {
                    use std::os::unix::ffi::OsStrExt;
                    reply.data(target.as_os_str().as_bytes())
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn mknod(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        rdev: u32,
        reply: ReplyEntry,
    ) {
        let caller = Self::caller(req);
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            match dispatcher.mknod(&caller, &path, mode & !umask, rdev).await {
                Ok(attr) => reply_entry(&inodes, &path, &attr, reply),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn mkdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, mode: u32, umask: u32, reply: ReplyEntry) {
        let caller = Self::caller(req);
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            match dispatcher.mkdir(&caller, &path, mode & !umask).await {
                Ok(attr) => reply_entry(&inodes, &path, &attr, reply),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn unlink(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let caller = Self::caller(req);
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            match dispatcher.unlink(&caller, &path).await {
                Ok(()) => {
                    inodes.remove(&path);
                    reply.ok()
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn rmdir(&mut self, req: &Request<'_>, parent: u64, name: &OsStr, reply: ReplyEmpty) {
        let caller = Self::caller(req);
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            match dispatcher.rmdir(&caller, &path).await {
                Ok(()) => {
                    inodes.remove(&path);
                    reply.ok()
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn symlink(&mut self, req: &Request<'_>, parent: u64, link_name: &OsStr, target: &Path, reply: ReplyEntry) {
        let caller = Self::caller(req);
        let path = match self.child(parent, link_name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let target = target.to_path_buf();
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            match dispatcher.symlink(&caller, &path, &target).await {
                Ok(attr) => reply_entry(&inodes, &path, &attr, reply),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn rename(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        newparent: u64,
        newname: &OsStr,
        flags: u32,
        reply: ReplyEmpty,
    ) {
        // RENAME_NOREPLACE and RENAME_EXCHANGE are not passed through
        if flags != 0 {
            return reply.error(FsError::from_errno(libc::EINVAL).errno());
        }
        let caller = Self::caller(req);
        let (from, to) = match (self.child(parent, name), self.child(newparent, newname)) {
            (Ok(from), Ok(to)) => (from, to),
            (Err(e), _) | (_, Err(e)) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            match dispatcher.rename(&caller, &from, &to).await {
                Ok(()) => {
                    inodes.rename(&from, &to);
                    reply.ok()
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn link(&mut self, req: &Request<'_>, ino: u64, newparent: u64, newname: &OsStr, reply: ReplyEntry) {
        let caller = Self::caller(req);
        let (source, path) = match (self.path(ino), self.child(newparent, newname)) {
            (Ok(source), Ok(path)) => (source, path),
            (Err(e), _) | (_, Err(e)) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            match dispatcher.link(&caller, &source, &path).await {
                Ok(attr) => reply_entry(&inodes, &path, &attr, reply),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn open(&mut self, req: &Request<'_>, ino: u64, flags: i32, reply: ReplyOpen) {
        let caller = Self::caller(req);
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let flags = OpenFlags::from_raw(flags);
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn(async move {
            // stateless handles: every read and write re-resolves the path
            match dispatcher.open(&caller, &path, flags).await {
                Ok(()) => reply.opened(0, 0),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn read(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        size: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyData,
    ) {
        let caller = Self::caller(req);
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(FsError::from_errno(libc::EINVAL).errno());
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn(async move {
            match dispatcher.read(&caller, &path, offset, size).await {
                Ok(data) => reply.data(&data),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn write(
        &mut self,
        req: &Request<'_>,
        ino: u64,
        _fh: u64,
        offset: i64,
        data: &[u8],
        _write_flags: u32,
        _flags: i32,
        _lock_owner: Option<u64>,
        reply: ReplyWrite,
    ) {
        let caller = Self::caller(req);
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let Ok(offset) = u64::try_from(offset) else {
            return reply.error(FsError::from_errno(libc::EINVAL).errno());
        };
        let data = data.to_vec();
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn(async move {
            match dispatcher.write(&caller, &path, offset, &data).await {
                Ok(written) => reply.written(written),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn opendir(&mut self, req: &Request<'_>, ino: u64, _flags: i32, reply: ReplyOpen) {
        let caller = Self::caller(req);
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn(async move {
            match dispatcher.opendir(&caller, &path).await {
                Ok(()) => reply.opened(0, 0),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn readdir(&mut self, req: &Request<'_>, ino: u64, _fh: u64, offset: i64, mut reply: ReplyDirectory) {
        let caller = Self::caller(req);
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let skip = usize::try_from(offset).unwrap_or(0);
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            let entries = match dispatcher.readdir(&caller, &path).await {
                Ok(entries) => entries,
                Err(e) => return reply.error(e.errno()),
            };

            let parent_ino = inodes.get(&path.parent()).unwrap_or(UNLISTED_INODE);
            let dots = [
                (ino, FuseFileType::Directory, ".".to_string()),
                (parent_ino, FuseFileType::Directory, "..".to_string()),
            ];
            let listed = entries.into_iter().map(|entry| {
                let child = path.join(&entry.name).ok().and_then(|p| inodes.get(&p));
                (child.unwrap_or(UNLISTED_INODE), fuse_kind(entry.kind), entry.name)
            });

            for (i, (entry_ino, kind, name)) in dots.into_iter().chain(listed).enumerate().skip(skip) {
                // offset of the next entry
                if reply.add(entry_ino, (i + 1) as i64, kind, &name) {
                    break;
                }
            }
            reply.ok();
        });
    }

    fn statfs(&mut self, req: &Request<'_>, _ino: u64, reply: ReplyStatfs) {
        let caller = Self::caller(req);
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn(async move {
            match dispatcher.statfs(&caller).await {
                Ok(st) => reply.statfs(st.blocks, st.bfree, st.bavail, st.files, st.ffree, st.bsize, st.namelen, st.frsize),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn access(&mut self, req: &Request<'_>, ino: u64, mask: i32, reply: ReplyEmpty) {
        let caller = Self::caller(req);
        let path = match self.path(ino) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let mask = AccessMask::from_raw(mask);
        let dispatcher = Arc::clone(&self.dispatcher);
        self.spawn(async move {
            match dispatcher.access(&caller, &path, mask).await {
                Ok(()) => reply.ok(),
                Err(e) => reply.error(e.errno()),
            }
        });
    }

    fn create(
        &mut self,
        req: &Request<'_>,
        parent: u64,
        name: &OsStr,
        mode: u32,
        umask: u32,
        _flags: i32,
        reply: ReplyCreate,
    ) {
        let caller = Self::caller(req);
        let path = match self.child(parent, name) {
            Ok(p) => p,
            Err(e) => return reply.error(e.errno()),
        };
        let dispatcher = Arc::clone(&self.dispatcher);
        let inodes = Arc::clone(&self.inodes);
        self.spawn(async move {
            match dispatcher.create(&caller, &path, mode & !umask).await {
                Ok(attr) => {
                    let ino = inodes.lookup(&path);
                    reply.created(&TTL, &fuse_attr(ino, &attr), 0, 0, 0)
                }
                Err(e) => reply.error(e.errno()),
            }
        });
    }
}
