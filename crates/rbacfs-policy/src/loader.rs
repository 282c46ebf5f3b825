//! Loading policies from definitions files.

use std::path::Path;

use crate::compiler::compile;
use crate::defs;
use crate::error::{PolicyError, PolicyResult};
use crate::policy::Policy;

/// Read, parse and compile a definitions file.
///
/// # Arguments
///
/// * `path` - Path of the `rbac.defs` file
///
/// # Errors
///
/// `PolicyError::Io` if the file cannot be read, otherwise the parse or
/// compile error for its contents.
pub fn load(path: impl AsRef<Path>) -> PolicyResult<Policy> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|source| PolicyError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let policy = load_str(&text)?;

    tracing::info!(
        path = %path.display(),
        roles = policy.roles().len(),
        rules = policy.rule_count(),
        bindings = policy.binding_count(),
        "Loaded RBAC policy"
    );

    Ok(policy)
}

/// Parse and compile definitions text.
pub fn load_str(text: &str) -> PolicyResult<Policy> {
    let declarations = defs::parse(text)?;
    Ok(compile(declarations)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::permissions::Permission;
    use std::io::Write;

    #[test]
    fn test_load_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "# team policy").unwrap();
        writeln!(file, "role reader").unwrap();
        writeln!(file, "allow reader read,list /docs").unwrap();
        file.flush().unwrap();

        let policy = load(file.path()).unwrap();
        assert_eq!(policy.rule_count(), 1);
        let reader = policy.subject(["reader"]);
        assert!(policy.authorize(&reader, "/docs/a", Permission::List).is_allowed());
    }

    #[test]
    fn test_load_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("rbac.defs");
        match load(&missing) {
            Err(PolicyError::Io { path, .. }) => assert_eq!(path, missing),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_load_str_errors() {
        assert!(matches!(load_str("role\n"), Err(PolicyError::Parse(e)) if e.line == 1));
        assert!(matches!(
            load_str("role a : b\n"),
            Err(PolicyError::Compile(_))
        ));
    }

    #[test]
    fn test_error_display() {
        let err = load_str("role a\nrole b\nallow c read /\n").unwrap_err();
        assert_eq!(err.to_string(), "compile error (UnknownRole): line 3: unknown role `c`");
    }
}
