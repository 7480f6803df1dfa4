//! Sandbox Policy
//!
//! Path-based access policy for the file commands and for host-embedded
//! deployments. Reads, writes, and child-process launches each carry
//! their own allow-list of glob patterns; a sandbox directory whitelists
//! everything beneath it.

use std::path::{Path, PathBuf};

use glob::Pattern;

#[derive(Debug, Clone, Default)]
pub struct SandboxPolicy {
    pub allow_read: Vec<Pattern>,
    pub allow_write: Vec<Pattern>,
    pub allow_exec: Vec<Pattern>,
    pub sandbox_dir: Option<PathBuf>,
}

impl SandboxPolicy {
    /// Build a policy from CLI-style rules. Each rule is a glob pattern
    /// (a plain path allows exactly that path).
    pub fn from_rules(
        allow_read: &[String],
        allow_write: &[String],
        allow_exec: &[String],
        sandbox_dir: Option<&str>,
    ) -> Result<Self, glob::PatternError> {
        fn compile(rules: &[String]) -> Result<Vec<Pattern>, glob::PatternError> {
            rules.iter().map(|r| Pattern::new(r)).collect()
        }
        Ok(Self {
            allow_read: compile(allow_read)?,
            allow_write: compile(allow_write)?,
            allow_exec: compile(allow_exec)?,
            sandbox_dir: sandbox_dir.map(PathBuf::from),
        })
    }

    fn in_sandbox_dir(&self, path: &Path) -> bool {
        match &self.sandbox_dir {
            Some(dir) => path.starts_with(dir),
            None => false,
        }
    }

    fn matches(patterns: &[Pattern], path: &Path) -> bool {
        let text = path.to_string_lossy();
        patterns.iter().any(|p| p.matches(&text))
    }

    pub fn can_read(&self, path: &Path) -> bool {
        self.in_sandbox_dir(path) || Self::matches(&self.allow_read, path)
    }

    pub fn can_write(&self, path: &Path) -> bool {
        self.in_sandbox_dir(path) || Self::matches(&self.allow_write, path)
    }

    pub fn can_exec(&self, path: &Path) -> bool {
        self.in_sandbox_dir(path) || Self::matches(&self.allow_exec, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_policy_denies() {
        let policy = SandboxPolicy::default();
        assert!(!policy.can_read(Path::new("/etc/passwd")));
        assert!(!policy.can_write(Path::new("/tmp/out")));
    }

    #[test]
    fn test_allow_patterns() {
        let policy = SandboxPolicy::from_rules(
            &["/data/*.txt".to_string()],
            &["/tmp/**".to_string()],
            &[],
            None,
        )
        .unwrap();
        assert!(policy.can_read(Path::new("/data/a.txt")));
        assert!(!policy.can_read(Path::new("/data/a.bin")));
        assert!(policy.can_write(Path::new("/tmp/x/y")));
        assert!(!policy.can_write(Path::new("/data/a.txt")));
    }

    #[test]
    fn test_sandbox_dir_allows_everything_beneath() {
        let policy = SandboxPolicy::from_rules(&[], &[], &[], Some("/work")).unwrap();
        assert!(policy.can_read(Path::new("/work/sub/file")));
        assert!(policy.can_write(Path::new("/work/out")));
        assert!(policy.can_exec(Path::new("/work/tool")));
        assert!(!policy.can_read(Path::new("/home/file")));
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        assert!(SandboxPolicy::from_rules(&["[".to_string()], &[], &[], None).is_err());
    }
}
