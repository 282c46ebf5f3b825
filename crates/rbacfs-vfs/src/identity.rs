//! Caller identity and subject resolution.

use rbacfs_policy::{Policy, Subject};

/// The OS identity of the process issuing a filesystem request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Caller {
    /// Effective user ID
    pub uid: u32,
    /// Effective group ID
    pub gid: u32,
    /// Process ID, for diagnostics only
    pub pid: u32,
}

impl Caller {
    /// Create a caller identity.
    pub fn new(uid: u32, gid: u32, pid: u32) -> Self {
        Self { uid, gid, pid }
    }
}

/// Maps a caller to the subject the policy evaluates.
pub trait SubjectResolver: Send + Sync {
    /// Resolve `caller` against `policy`.
    ///
    /// The returned subject must come from `policy` itself; role ids are
    /// only meaningful within the policy that interned them.
    fn resolve(&self, policy: &Policy, caller: &Caller) -> Subject;
}

/// Resolves callers through the policy's `bind` declarations.
///
/// A caller matching no binding resolves to an empty subject and is denied
/// everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct BindingResolver;

impl SubjectResolver for BindingResolver {
    fn resolve(&self, policy: &Policy, caller: &Caller) -> Subject {
        policy.subject_for(caller.uid, caller.gid)
    }
}

/// Grants every caller the same roles, ignoring bindings.
///
/// Useful for single-user mounts and tests.
#[derive(Debug, Clone, Default)]
pub struct FixedRoles {
    roles: Vec<String>,
}

impl FixedRoles {
    /// Create a resolver granting `roles`.
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roles: roles.into_iter().map(Into::into).collect(),
        }
    }
}

impl SubjectResolver for FixedRoles {
    fn resolve(&self, policy: &Policy, _caller: &Caller) -> Subject {
        policy.subject(&self.roles)
    }
}

impl<F> SubjectResolver for F
where
    F: Fn(&Policy, &Caller) -> Subject + Send + Sync,
{
    fn resolve(&self, policy: &Policy, caller: &Caller) -> Subject {
        self(policy, caller)
    }
}
