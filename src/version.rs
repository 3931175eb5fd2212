//! Build metadata reported by `tollgate version`.

use std::fmt;

use serde::Serialize;

/// Package version from Cargo.toml.
pub const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");

/// What the build script recorded about this binary.
///
/// Git fields are `None` when built outside a checkout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct BuildInfo {
    pub version: &'static str,
    pub git_branch: Option<&'static str>,
    pub git_sha: Option<&'static str>,
    pub git_dirty: bool,
    pub built_at: Option<&'static str>,
}

impl BuildInfo {
    pub fn current() -> Self {
        Self {
            version: PKG_VERSION,
            git_branch: option_env!("VERGEN_GIT_BRANCH"),
            git_sha: option_env!("VERGEN_GIT_SHA"),
            git_dirty: option_env!("VERGEN_GIT_DIRTY") == Some("true"),
            built_at: option_env!("VERGEN_BUILD_TIMESTAMP"),
        }
    }

    /// First seven characters of the commit SHA.
    pub fn short_sha(&self) -> Option<&'static str> {
        self.git_sha.map(|sha| sha.get(..7).unwrap_or(sha))
    }
}

/// `{version}+{branch}.{sha}[.dirty]`, or the bare version without git data.
impl fmt::Display for BuildInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.version)?;
        if self.git_branch.is_none() && self.git_sha.is_none() {
            return Ok(());
        }
        write!(
            f,
            "+{}.{}",
            self.git_branch.unwrap_or("unknown"),
            self.short_sha().unwrap_or("unknown")
        )?;
        if self.git_dirty {
            f.write_str(".dirty")?;
        }
        Ok(())
    }
}
