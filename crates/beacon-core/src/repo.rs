//! Locate the git checkout handed to `put` and resolve its commit.
//!
//! Concourse mounts each put input as a subdirectory of the build directory.
//! The resource expects exactly one of them to be a git checkout: the
//! repository whose commit gets the status. The checkout is read directly
//! from `.git` so no git binary is needed in the resource image.

use std::fs;
use std::path::{Path, PathBuf};

use crate::error::RepoError;

type Result<T> = std::result::Result<T, RepoError>;

/// A git checkout found in the put input directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Checkout {
    pub path: PathBuf,
    git_dir: PathBuf,
}

impl Checkout {
    /// Find the single git checkout in `input_dir`.
    ///
    /// `input_dir` itself is accepted when it is a checkout.
    pub fn discover(input_dir: &Path) -> Result<Self> {
        if input_dir.join(".git").is_dir() {
            return Ok(Self::at(input_dir));
        }

        let entries = fs::read_dir(input_dir).map_err(|source| RepoError::Io {
            path: input_dir.to_path_buf(),
            source,
        })?;
        let mut found = Vec::new();
        for entry in entries {
            let entry = entry.map_err(|source| RepoError::Io {
                path: input_dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.join(".git").is_dir() {
                found.push(path);
            }
        }
        found.sort();

        match found.len() {
            0 => Err(RepoError::NoCheckout {
                dir: input_dir.to_path_buf(),
            }),
            1 => Ok(Self::at(&found[0])),
            _ => Err(RepoError::TooManyCheckouts {
                dir: input_dir.to_path_buf(),
                found: found
                    .iter()
                    .filter_map(|p| p.file_name())
                    .map(|n| n.to_string_lossy().into_owned())
                    .collect(),
            }),
        }
    }

    fn at(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            git_dir: path.join(".git"),
        }
    }

    /// Commit SHA of the checkout.
    ///
    /// Prefers `.git/ref`, written by the Concourse git resource, then
    /// resolves `HEAD` through loose refs and `packed-refs`.
    pub fn commit(&self) -> Result<String> {
        if let Ok(contents) = fs::read_to_string(self.git_dir.join("ref")) {
            if let Some(sha) = contents.split_whitespace().next().filter(|s| is_sha(s)) {
                return Ok(sha.to_string());
            }
        }

        let head_path = self.git_dir.join("HEAD");
        let head = self.read(&head_path)?;
        let head = head.trim();
        match head.strip_prefix("ref:") {
            Some(reference) => self.resolve_ref(reference.trim()),
            None if is_sha(head) => Ok(head.to_string()),
            None => Err(RepoError::InvalidHead {
                path: head_path,
                reason: format!("neither a ref nor a commit: {head:?}"),
            }),
        }
    }

    fn resolve_ref(&self, reference: &str) -> Result<String> {
        if let Ok(contents) = fs::read_to_string(self.git_dir.join(reference)) {
            let sha = contents.trim();
            if is_sha(sha) {
                return Ok(sha.to_string());
            }
        }

        if let Ok(packed) = fs::read_to_string(self.git_dir.join("packed-refs")) {
            let hit = packed
                .lines()
                .filter(|line| !line.starts_with('#') && !line.starts_with('^'))
                .filter_map(|line| line.split_once(' '))
                .find(|(_, name)| name.trim() == reference);
            if let Some((sha, _)) = hit.filter(|(sha, _)| is_sha(sha)) {
                return Ok(sha.to_string());
            }
        }

        Err(RepoError::RefNotFound {
            path: self.path.clone(),
            reference: reference.to_string(),
        })
    }

    /// URL of the `origin` remote from `.git/config`.
    pub fn origin_url(&self) -> Result<String> {
        let config = self.read(&self.git_dir.join("config"))?;
        let mut in_origin = false;
        for line in config.lines().map(str::trim) {
            if line.starts_with('[') {
                in_origin = line == r#"[remote "origin"]"#;
                continue;
            }
            if !in_origin {
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                if key.trim() == "url" {
                    return Ok(value.trim().to_string());
                }
            }
        }
        Err(RepoError::NoOrigin {
            path: self.path.clone(),
        })
    }

    /// Check that `origin` points at `owner/repo`.
    pub fn verify_origin(&self, owner: &str, repo: &str) -> Result<()> {
        let url = self.origin_url()?;
        match parse_remote(&url) {
            Some((o, r)) if o.eq_ignore_ascii_case(owner) && r.eq_ignore_ascii_case(repo) => Ok(()),
            _ => Err(RepoError::OriginMismatch {
                url,
                owner: owner.to_string(),
                repo: repo.to_string(),
            }),
        }
    }

    fn read(&self, path: &Path) -> Result<String> {
        fs::read_to_string(path).map_err(|source| RepoError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

/// Extract `(owner, repo)` from an https, ssh or scp-style git URL.
pub fn parse_remote(url: &str) -> Option<(String, String)> {
    let path = if let Some((_, rest)) = url.split_once("://") {
        rest.split_once('/')?.1
    } else {
        // scp-like: git@github.com:owner/repo.git
        url.split_once(':')?.1
    };
    let mut parts = path.trim_end_matches('/').rsplitn(2, '/');
    let repo = parts.next()?.trim_end_matches(".git");
    let owner = parts.next()?.rsplit('/').next()?;
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner.to_string(), repo.to_string()))
}

fn is_sha(s: &str) -> bool {
    (s.len() == 40 || s.len() == 64) && s.chars().all(|c| c.is_ascii_hexdigit())
}
