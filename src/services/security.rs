use std::{
    env,
    path::{Component, Path, PathBuf},
    sync::Arc,
};

use crate::{error::ClientError, TERMINALWIRE_HOME_ENV, TERMINALWIRE_URL_ENV};

/// Environment variables the server may read through the gate.
pub(crate) const ALLOWED_ENV_VARS: [&str; 3] =
    ["HOME", TERMINALWIRE_HOME_ENV, TERMINALWIRE_URL_ENV];

type EnvLookup = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

/// Single checkpoint for every filesystem path and environment variable the
/// server asks the client to touch.
#[derive(Clone)]
pub(crate) struct SecurityGate {
    home: PathBuf,
    root: PathBuf,
    cwd: PathBuf,
    env: EnvLookup,
}

impl SecurityGate {
    /// `home` must be absolute. `root` and `cwd` are normalized here so that
    /// containment checks compare like with like.
    pub(crate) fn new(home: PathBuf, root: PathBuf, cwd: PathBuf) -> Result<Self, ClientError> {
        if home.as_os_str().is_empty() || !home.is_absolute() {
            return Err(ClientError::configuration(
                "home directory is unknown or not absolute",
            ));
        }

        let home = normalize_path(&home);
        let cwd = if cwd.is_absolute() {
            normalize_path(&cwd)
        } else {
            home.clone()
        };
        let root = expand_home(&root.to_string_lossy(), &home);
        let root = normalize_path(&absolutize(&root, &cwd));

        Ok(Self {
            home,
            root,
            cwd,
            env: Arc::new(|name: &str| env::var(name).ok()),
        })
    }

    pub(crate) fn with_env_lookup<F>(mut self, lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String> + Send + Sync + 'static,
    {
        self.env = Arc::new(lookup);
        self
    }

    pub(crate) fn home(&self) -> &Path {
        &self.home
    }

    pub(crate) fn root(&self) -> &Path {
        &self.root
    }

    pub(crate) fn validate_path(&self, raw: &str) -> Result<PathBuf, ClientError> {
        let expanded = expand_home(raw, &self.home);
        let canonical = normalize_path(&absolutize(&expanded, &self.cwd));

        // Path::starts_with compares whole components, so `~/.terminalwireX`
        // is not inside `~/.terminalwire`.
        if !canonical.starts_with(&self.home) {
            return Err(ClientError::access_denied(&format!(
                "{raw} is outside the home directory"
            )));
        }
        if !canonical.starts_with(&self.root) {
            return Err(ClientError::access_denied(&format!(
                "{raw} is outside {}",
                self.root.display()
            )));
        }

        Ok(canonical)
    }

    pub(crate) fn read_env_var(&self, name: &str) -> Result<Option<String>, ClientError> {
        if !ALLOWED_ENV_VARS.contains(&name) {
            return Err(ClientError::access_denied(&format!(
                "environment variable {name} is not readable"
            )));
        }

        Ok((self.env)(name))
    }
}

pub(crate) fn expand_home(raw: &str, home: &Path) -> PathBuf {
    if raw == "~" {
        return home.to_path_buf();
    }

    match raw.strip_prefix("~/") {
        Some(rest) => home.join(rest),
        None => PathBuf::from(raw),
    }
}

fn absolutize(path: &Path, cwd: &Path) -> PathBuf {
    if path.is_absolute() {
        path.to_path_buf()
    } else {
        cwd.join(path)
    }
}

/// Lexical normalization: drops `.` and resolves `..` against the components
/// seen so far. Never touches the filesystem.
pub(crate) fn normalize_path(path: &Path) -> PathBuf {
    let mut normalized = PathBuf::new();

    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                normalized.pop();
            }
            Component::RootDir | Component::Prefix(_) | Component::Normal(_) => {
                normalized.push(component.as_os_str());
            }
        }
    }

    normalized
}

#[cfg(test)]
mod tests {
    use super::{normalize_path, SecurityGate};
    use crate::error::ClientError;
    use std::path::PathBuf;

    fn gate() -> SecurityGate {
        SecurityGate::new(
            PathBuf::from("/home/u"),
            PathBuf::from("/home/u/.x"),
            PathBuf::from("/home/u"),
        )
        .expect("build gate")
    }

    #[test]
    fn normalizes_dot_segments_lexically() {
        assert_eq!(
            normalize_path(&PathBuf::from("/home/u/./.x/../.x/a")),
            PathBuf::from("/home/u/.x/a")
        );
        assert_eq!(normalize_path(&PathBuf::from("/../..")), PathBuf::from("/"));
    }

    #[test]
    fn accepts_root_and_descendants() {
        let gate = gate();
        assert_eq!(
            gate.validate_path("~/.x").expect("root"),
            PathBuf::from("/home/u/.x")
        );
        assert_eq!(
            gate.validate_path("~/.x/a/b.txt").expect("descendant"),
            PathBuf::from("/home/u/.x/a/b.txt")
        );
        assert_eq!(
            gate.validate_path(".x/c").expect("relative to cwd"),
            PathBuf::from("/home/u/.x/c")
        );
    }

    #[test]
    fn validation_is_idempotent() {
        let gate = gate();
        let first = gate.validate_path("~/.x/./d/../e").expect("first");
        let second = gate
            .validate_path(&first.to_string_lossy())
            .expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn rejects_traversal_out_of_root() {
        let gate = gate();
        for path in [
            "../../etc/passwd",
            "~/.x/../../../etc/passwd",
            "~/.x/..",
            "/etc/passwd",
            "~",
            "~/.bashrc",
        ] {
            let error = gate.validate_path(path).expect_err(path);
            assert!(matches!(error, ClientError::AccessDenied(_)), "{path}");
        }
    }

    #[test]
    fn rejects_sibling_with_shared_name_prefix() {
        let error = gate().validate_path("/home/u/.xx/file").expect_err("sibling");
        assert!(matches!(error, ClientError::AccessDenied(_)));
    }

    #[test]
    fn rejects_root_outside_home() {
        let gate = SecurityGate::new(
            PathBuf::from("/home/u"),
            PathBuf::from("/srv/shared"),
            PathBuf::from("/home/u"),
        )
        .expect("build gate");
        let error = gate.validate_path("/srv/shared/a").expect_err("outside home");
        assert!(matches!(error, ClientError::AccessDenied(_)));
    }

    #[test]
    fn requires_absolute_home() {
        let error = SecurityGate::new(PathBuf::new(), PathBuf::from("/x"), PathBuf::from("/"))
            .err()
            .expect("empty home");
        assert!(matches!(error, ClientError::Configuration(_)));
    }

    #[test]
    fn root_override_may_use_tilde() {
        let gate = SecurityGate::new(
            PathBuf::from("/home/u"),
            PathBuf::from("~/.custom"),
            PathBuf::from("/"),
        )
        .expect("build gate");
        assert_eq!(gate.root(), PathBuf::from("/home/u/.custom").as_path());
    }

    #[test]
    fn env_reads_follow_allowlist() {
        let gate = gate().with_env_lookup(|name| match name {
            "HOME" => Some("/home/u".to_string()),
            "SECRET_TOKEN" => Some("hunter2".to_string()),
            _ => None,
        });

        assert_eq!(
            gate.read_env_var("HOME").expect("home"),
            Some("/home/u".to_string())
        );
        assert_eq!(gate.read_env_var("TERMINALWIRE_HOME").expect("unset"), None);

        let error = gate.read_env_var("SECRET_TOKEN").expect_err("denied");
        assert!(matches!(error, ClientError::AccessDenied(_)));
    }
}
