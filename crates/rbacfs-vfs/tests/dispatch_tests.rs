//! Dispatcher tests against a real backing tree.
//!
//! Each test builds a temporary backing directory, compiles a policy and
//! drives the dispatcher directly, the way the FUSE adapter would. They
//! check both the decision and the state of the backing tree afterwards:
//! a denied request must leave it untouched.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tempfile::TempDir;

use rbacfs_policy::{load_str, Permission};
use rbacfs_vfs::{
    AccessMask, Backend, Caller, DirEntry, Dispatcher, FileAttr, FixedRoles, FsError, FsResult, OpenFlags,
    Passthrough, SetAttr, StatFs, VirtualPath,
};

const DEFS: &str = r#"
# Readers browse /docs, but nothing under /docs/secret is writable for them.
role reader
role editor : reader

allow reader read,list /docs
deny  reader write     /docs/secret
allow editor write,create,delete /docs
deny  editor delete    /docs/keep
allow editor execute,chmod /docs/public

bind gid:100 reader
bind uid:1000 editor
"#;

const READER: Caller = Caller { uid: 2000, gid: 100, pid: 1 };
const EDITOR: Caller = Caller { uid: 1000, gid: 1000, pid: 2 };
const STRANGER: Caller = Caller { uid: 3000, gid: 3000, pid: 3 };

struct Fixture {
    dir: TempDir,
    dispatcher: Dispatcher<Passthrough>,
}

impl Fixture {
    fn new() -> Self {
        let dir = TempDir::new().unwrap();
        for sub in ["docs/secret", "docs/keep", "docs/public", "other"] {
            std::fs::create_dir_all(dir.path().join(sub)).unwrap();
        }
        std::fs::write(dir.path().join("docs/readme.txt"), b"hello").unwrap();
        std::fs::write(dir.path().join("docs/secret/notes.txt"), b"classified").unwrap();
        std::fs::write(dir.path().join("docs/keep/ledger"), b"1,2,3").unwrap();
        std::fs::write(dir.path().join("other/file"), b"other").unwrap();

        let policy = Arc::new(load_str(DEFS).unwrap());
        let dispatcher = Dispatcher::new(policy, Passthrough::new(dir.path()).unwrap());
        Self { dir, dispatcher }
    }

    fn backing(&self, rel: &str) -> std::path::PathBuf {
        self.dir.path().join(rel)
    }
}

fn vp(s: &str) -> VirtualPath {
    VirtualPath::parse(s).unwrap()
}

fn assert_denied<T: std::fmt::Debug>(result: FsResult<T>, permission: Permission) {
    match result {
        Err(FsError::AccessDenied { permission: p, .. }) => assert_eq!(p, permission),
        other => panic!("expected denial of {permission}, got {other:?}"),
    }
}

#[tokio::test]
async fn test_reader_scenario() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;

    let data = d.read(&READER, &vp("/docs/readme.txt"), 0, 100).await.unwrap();
    assert_eq!(data, b"hello");

    let denied = d.write(&READER, &vp("/docs/secret/notes.txt"), 0, b"leak").await;
    assert_denied(denied, Permission::Write);
    assert_eq!(std::fs::read(fx.backing("docs/secret/notes.txt")).unwrap(), b"classified");

    assert_denied(d.read(&READER, &vp("/other/file"), 0, 100).await, Permission::Read);
}

#[tokio::test]
async fn test_unbound_caller_is_denied_everything() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;

    assert_denied(d.getattr(&STRANGER, &vp("/docs")).await, Permission::Read);
    assert_denied(d.readdir(&STRANGER, &vp("/")).await, Permission::List);
    assert_denied(d.create(&STRANGER, &vp("/docs/x"), 0o644).await, Permission::Create);
    assert!(!fx.backing("docs/x").exists());

    // The mount root itself stays stat-able so the mount is usable at all.
    assert!(d.getattr(&STRANGER, &VirtualPath::root()).await.unwrap().is_dir());
    assert!(d.statfs(&STRANGER).await.is_ok());
}

#[tokio::test]
async fn test_lookup_and_readdir() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;

    let (path, attr) = d.lookup(&READER, &vp("/docs"), "readme.txt").await.unwrap();
    assert_eq!(path.to_string(), "/docs/readme.txt");
    assert_eq!(attr.size, 5);

    let entries = d.readdir(&READER, &vp("/docs")).await.unwrap();
    let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["keep", "public", "readme.txt", "secret"]);

    assert!(d.opendir(&READER, &vp("/docs")).await.is_ok());
    let not_dir = d.opendir(&READER, &vp("/docs/readme.txt")).await.unwrap_err();
    assert_eq!(not_dir.errno(), libc::ENOTDIR);

    assert!(matches!(
        d.lookup(&READER, &vp("/docs"), "..").await,
        Err(FsError::InvalidPath(_))
    ));
}

#[tokio::test]
async fn test_open_modes() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;
    let readme = vp("/docs/readme.txt");

    d.open(&READER, &readme, OpenFlags::read()).await.unwrap();
    assert_denied(d.open(&READER, &readme, OpenFlags::read_write()).await, Permission::Write);
    assert_denied(
        d.open(&READER, &readme, OpenFlags::read().with_truncate()).await,
        Permission::Write,
    );
    assert_eq!(std::fs::read(fx.backing("docs/readme.txt")).unwrap(), b"hello");

    d.open(&EDITOR, &readme, OpenFlags::write().with_truncate()).await.unwrap();
    assert_eq!(std::fs::read(fx.backing("docs/readme.txt")).unwrap(), b"");
}

#[tokio::test]
async fn test_editor_inherits_and_writes() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;

    // Inherited from reader.
    assert_eq!(d.read(&EDITOR, &vp("/docs/readme.txt"), 0, 5).await.unwrap(), b"hello");

    let new = vp("/docs/new.txt");
    d.create(&EDITOR, &new, 0o644).await.unwrap();
    d.write(&EDITOR, &new, 0, b"draft").await.unwrap();
    assert_eq!(std::fs::read(fx.backing("docs/new.txt")).unwrap(), b"draft");

    d.mkdir(&EDITOR, &vp("/docs/drafts"), 0o755).await.unwrap();
    assert!(fx.backing("docs/drafts").is_dir());

    d.unlink(&EDITOR, &new).await.unwrap();
    assert!(!fx.backing("docs/new.txt").exists());

    // Reader's deny on /docs/secret is inherited at the same depth.
    assert_denied(
        d.write(&EDITOR, &vp("/docs/secret/notes.txt"), 0, b"x").await,
        Permission::Write,
    );
}

#[tokio::test]
async fn test_rename_is_all_or_nothing() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;

    // delete on the source is denied: nothing moves.
    let denied = d.rename(&EDITOR, &vp("/docs/keep/ledger"), &vp("/docs/ledger")).await;
    assert_denied(denied, Permission::Delete);
    assert!(fx.backing("docs/keep/ledger").exists());
    assert!(!fx.backing("docs/ledger").exists());

    // create on the destination parent is denied: nothing moves either.
    let denied = d.rename(&EDITOR, &vp("/docs/readme.txt"), &vp("/other/readme.txt")).await;
    assert_denied(denied, Permission::Create);
    assert!(fx.backing("docs/readme.txt").exists());
    assert!(!fx.backing("other/readme.txt").exists());

    d.rename(&EDITOR, &vp("/docs/readme.txt"), &vp("/docs/public/readme.txt"))
        .await
        .unwrap();
    assert!(fx.backing("docs/public/readme.txt").exists());
}

#[tokio::test]
async fn test_rename_over_existing_needs_delete_on_destination() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;
    std::fs::write(fx.backing("docs/junk"), b"junk").unwrap();

    // unlink is denied, and so is destroying the ledger by moving over it.
    assert_denied(d.unlink(&EDITOR, &vp("/docs/keep/ledger")).await, Permission::Delete);
    let denied = d.rename(&EDITOR, &vp("/docs/junk"), &vp("/docs/keep/ledger")).await;
    match denied {
        Err(FsError::AccessDenied { path, permission, .. }) => {
            assert_eq!(path, "/docs/keep/ledger");
            assert_eq!(permission, Permission::Delete);
        }
        other => panic!("expected denial, got {other:?}"),
    }
    assert_eq!(std::fs::read(fx.backing("docs/keep/ledger")).unwrap(), b"1,2,3");
    assert!(fx.backing("docs/junk").exists());

    // A new name beneath the same directory needs no delete there.
    d.rename(&EDITOR, &vp("/docs/junk"), &vp("/docs/keep/junk")).await.unwrap();
    assert_eq!(std::fs::read(fx.backing("docs/keep/junk")).unwrap(), b"junk");

    // Replacing is fine where delete is granted.
    std::fs::write(fx.backing("docs/draft"), b"v2").unwrap();
    d.rename(&EDITOR, &vp("/docs/draft"), &vp("/docs/readme.txt")).await.unwrap();
    assert_eq!(std::fs::read(fx.backing("docs/readme.txt")).unwrap(), b"v2");
    assert!(!fx.backing("docs/draft").exists());
}

#[tokio::test]
async fn test_link_and_symlink() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;

    std::fs::write(fx.backing("docs/public/page.html"), b"<html>").unwrap();
    let attr = d
        .link(&EDITOR, &vp("/docs/public/page.html"), &vp("/docs/page.html"))
        .await
        .unwrap();
    assert!(attr.nlink >= 2);
    assert_denied(
        d.link(&EDITOR, &vp("/other/file"), &vp("/docs/stolen")).await,
        Permission::Read,
    );
    assert!(!fx.backing("docs/stolen").exists());

    // An alias would carry permissions the source does not grant.
    assert_denied(
        d.link(&EDITOR, &vp("/docs/readme.txt"), &vp("/docs/public/readme.txt")).await,
        Permission::Execute,
    );
    assert!(!fx.backing("docs/public/readme.txt").exists());

    let attr = d
        .symlink(&EDITOR, &vp("/docs/latest"), Path::new("readme.txt"))
        .await
        .unwrap();
    assert!(attr.is_symlink());
    assert_eq!(d.readlink(&READER, &vp("/docs/latest")).await.unwrap(), Path::new("readme.txt"));
    assert_denied(
        d.symlink(&READER, &vp("/docs/mine"), Path::new("readme.txt")).await,
        Permission::Create,
    );
}

#[tokio::test]
async fn test_write_denied_file_cannot_be_aliased() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;
    let notes = vp("/docs/secret/notes.txt");
    let alias = vp("/docs/alias");

    assert_denied(d.write(&EDITOR, &notes, 0, b"PWNED").await, Permission::Write);
    assert_denied(d.link(&EDITOR, &notes, &alias).await, Permission::Write);
    assert!(!fx.backing("docs/alias").exists());

    // With no alias, the write through it has nothing to reach.
    let err = d.write(&EDITOR, &alias, 0, b"PWNED").await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOENT);
    assert_eq!(std::fs::read(fx.backing("docs/secret/notes.txt")).unwrap(), b"classified");
}

#[tokio::test]
async fn test_setattr_permissions() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;
    std::fs::write(fx.backing("docs/public/page.html"), b"<html>").unwrap();
    let page = vp("/docs/public/page.html");

    let attr = d.setattr(&EDITOR, &page, &SetAttr::new().with_mode(0o600)).await.unwrap();
    assert_eq!(attr.perm, 0o600);

    // chmod is only granted beneath /docs/public.
    assert_denied(
        d.setattr(&EDITOR, &vp("/docs/readme.txt"), &SetAttr::new().with_mode(0o600)).await,
        Permission::Chmod,
    );

    // Truncation is a write.
    let attr = d.setattr(&EDITOR, &vp("/docs/readme.txt"), &SetAttr::new().with_size(2)).await.unwrap();
    assert_eq!(attr.size, 2);
    assert_denied(
        d.setattr(&READER, &vp("/docs/readme.txt"), &SetAttr::new().with_size(0)).await,
        Permission::Write,
    );
    assert_eq!(std::fs::read(fx.backing("docs/readme.txt")).unwrap(), b"he");
}

#[tokio::test]
async fn test_access_mask() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;
    let readme = vp("/docs/readme.txt");

    d.access(&READER, &readme, AccessMask::EXISTS).await.unwrap();
    d.access(&READER, &readme, AccessMask::READ).await.unwrap();
    assert_denied(d.access(&READER, &readme, AccessMask::WRITE).await, Permission::Write);
    assert_denied(d.access(&EDITOR, &readme, AccessMask::EXECUTE).await, Permission::Execute);
}

#[tokio::test]
async fn test_backing_errors_pass_through() {
    let fx = Fixture::new();
    let d = &fx.dispatcher;

    let err = d.getattr(&READER, &vp("/docs/missing")).await.unwrap_err();
    assert!(!err.is_denial());
    assert_eq!(err.errno(), libc::ENOENT);

    let err = d.rmdir(&EDITOR, &vp("/docs/secret")).await.unwrap_err();
    assert_eq!(err.errno(), libc::ENOTEMPTY);

    let err = d.create(&EDITOR, &vp("/docs/readme.txt"), 0o644).await.unwrap_err();
    assert_eq!(err.errno(), libc::EEXIST);
}

#[tokio::test]
async fn test_fixed_roles_resolver() {
    let dir = TempDir::new().unwrap();
    std::fs::create_dir(dir.path().join("docs")).unwrap();
    std::fs::write(dir.path().join("docs/a"), b"a").unwrap();

    let policy = Arc::new(load_str(DEFS).unwrap());
    let d = Dispatcher::new(policy, Passthrough::new(dir.path()).unwrap()).with_resolver(FixedRoles::new(["reader"]));

    assert_eq!(d.read(&STRANGER, &vp("/docs/a"), 0, 1).await.unwrap(), b"a");
}

/// Backend that counts calls, to prove denials never reach it.
#[derive(Default)]
struct CountingBackend {
    calls: AtomicUsize,
}

impl CountingBackend {
    fn hit<T>(&self) -> FsResult<T> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Err(FsError::from_errno(libc::ENOSYS))
    }
}

#[async_trait]
impl Backend for CountingBackend {
    async fn getattr(&self, _: &VirtualPath) -> FsResult<FileAttr> {
        self.hit()
    }
    async fn readdir(&self, _: &VirtualPath) -> FsResult<Vec<DirEntry>> {
        self.hit()
    }
    async fn open(&self, _: &VirtualPath, _: OpenFlags) -> FsResult<()> {
        self.hit()
    }
    async fn read(&self, _: &VirtualPath, _: u64, _: u32) -> FsResult<Vec<u8>> {
        self.hit()
    }
    async fn readlink(&self, _: &VirtualPath) -> FsResult<std::path::PathBuf> {
        self.hit()
    }
    async fn access(&self, _: &VirtualPath, _: AccessMask) -> FsResult<()> {
        self.hit()
    }
    async fn write(&self, _: &VirtualPath, _: u64, _: &[u8]) -> FsResult<u32> {
        self.hit()
    }
    async fn create(&self, _: &VirtualPath, _: u32) -> FsResult<FileAttr> {
        self.hit()
    }
    async fn mkdir(&self, _: &VirtualPath, _: u32) -> FsResult<FileAttr> {
        self.hit()
    }
    async fn mknod(&self, _: &VirtualPath, _: u32, _: u32) -> FsResult<FileAttr> {
        self.hit()
    }
    async fn unlink(&self, _: &VirtualPath) -> FsResult<()> {
        self.hit()
    }
    async fn rmdir(&self, _: &VirtualPath) -> FsResult<()> {
        self.hit()
    }
    async fn rename(&self, _: &VirtualPath, _: &VirtualPath, _: bool) -> FsResult<()> {
        self.hit()
    }
    async fn setattr(&self, _: &VirtualPath, _: &SetAttr) -> FsResult<FileAttr> {
        self.hit()
    }
    async fn symlink(&self, _: &VirtualPath, _: &Path) -> FsResult<FileAttr> {
        self.hit()
    }
    async fn link(&self, _: &VirtualPath, _: &VirtualPath) -> FsResult<FileAttr> {
        self.hit()
    }
    async fn statfs(&self) -> FsResult<StatFs> {
        self.hit()
    }
    fn read_only(&self) -> bool {
        false
    }
}

#[tokio::test]
async fn test_denials_never_reach_backend() {
    let policy = Arc::new(load_str(DEFS).unwrap());
    let d = Dispatcher::new(policy, CountingBackend::default());
    let p = vp("/other/file");
    let q = vp("/other/g");

    assert!(d.getattr(&STRANGER, &p).await.unwrap_err().is_denial());
    assert!(d.readdir(&STRANGER, &p).await.unwrap_err().is_denial());
    assert!(d.open(&STRANGER, &p, OpenFlags::read()).await.unwrap_err().is_denial());
    assert!(d.read(&STRANGER, &p, 0, 1).await.unwrap_err().is_denial());
    assert!(d.readlink(&STRANGER, &p).await.unwrap_err().is_denial());
    assert!(d.access(&STRANGER, &p, AccessMask::READ).await.unwrap_err().is_denial());
    assert!(d.write(&STRANGER, &p, 0, b"x").await.unwrap_err().is_denial());
    assert!(d.create(&STRANGER, &q, 0o644).await.unwrap_err().is_denial());
    assert!(d.mkdir(&STRANGER, &q, 0o755).await.unwrap_err().is_denial());
    assert!(d.mknod(&STRANGER, &q, 0o644, 0).await.unwrap_err().is_denial());
    assert!(d.unlink(&STRANGER, &p).await.unwrap_err().is_denial());
    assert!(d.rmdir(&STRANGER, &p).await.unwrap_err().is_denial());
    assert!(d.rename(&STRANGER, &p, &q).await.unwrap_err().is_denial());
    assert!(d.setattr(&STRANGER, &p, &SetAttr::new().with_mode(0)).await.unwrap_err().is_denial());
    assert!(d.symlink(&STRANGER, &q, Path::new("file")).await.unwrap_err().is_denial());
    assert!(d.link(&STRANGER, &p, &q).await.unwrap_err().is_denial());
    assert_eq!(d.backend().calls.load(Ordering::SeqCst), 0);

    // Allowed requests do reach it.
    assert!(!d.statfs(&STRANGER).await.unwrap_err().is_denial());
    assert_eq!(d.backend().calls.load(Ordering::SeqCst), 1);
}
