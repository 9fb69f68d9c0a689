//! Repository reference parsing and collection-key derivation.
//!
//! A [`RepoRef`] identifies one GitHub repository by owner and name.
//! It can be parsed from an HTTPS URL, an SSH URL, or a bare
//! `owner/repo` string. The derived collection key is the vector-store
//! namespace for that repository: lowercased `owner_repo` with `/` and
//! `-` replaced by `_`, so the same reference always maps to the same
//! key and distinct repositories never collide.

use crate::error::FetchError;

/// Owner/name pair identifying a repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepoRef {
    pub owner: String,
    pub name: String,
}

impl RepoRef {
    /// Parse a repository reference.
    ///
    /// Accepted forms:
    /// - `https://github.com/owner/repo` (optionally with `.git`, trailing
    ///   slash, or extra path segments)
    /// - `git@github.com:owner/repo.git`
    /// - `owner/repo`
    pub fn parse(reference: &str) -> Result<Self, FetchError> {
        let trimmed = reference.trim().trim_end_matches('/');
        let trimmed = trimmed.strip_suffix(".git").unwrap_or(trimmed);

        let path = if let Some(rest) = trimmed.strip_prefix("git@github.com:") {
            rest
        } else if let Some(pos) = trimmed.find("github.com/") {
            &trimmed[pos + "github.com/".len()..]
        } else {
            trimmed
        };

        let mut parts = path.split('/').filter(|p| !p.is_empty());
        let owner = parts.next();
        let name = parts.next();

        match (owner, name) {
            (Some(owner), Some(name)) if valid_token(owner) && valid_token(name) => Ok(RepoRef {
                owner: owner.to_string(),
                name: name.to_string(),
            }),
            _ => Err(FetchError::InvalidReference(reference.to_string())),
        }
    }

    /// `owner/repo` path as used by the GitHub API and the catalog.
    pub fn path(&self) -> String {
        format!("{}/{}", self.owner, self.name)
    }

    /// Canonical HTTPS URL for the repository.
    pub fn url(&self) -> String {
        format!("https://github.com/{}/{}", self.owner, self.name)
    }

    /// Deterministic vector-store namespace for this repository.
    pub fn collection_key(&self) -> String {
        format!("{}_{}", self.owner, self.name)
            .to_lowercase()
            .replace('-', "_")
    }

    /// Human-readable display name derived from the repo name
    /// (`my-cool-repo` becomes `My Cool Repo`).
    pub fn display_name(&self) -> String {
        self.name
            .split(['-', '_'])
            .filter(|w| !w.is_empty())
            .map(|w| {
                let mut chars = w.chars();
                match chars.next() {
                    Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
                    None => String::new(),
                }
            })
            .collect::<Vec<_>>()
            .join(" ")
    }
}

fn valid_token(s: &str) -> bool {
    !s.is_empty()
        && s.chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_https_url() {
        let r = RepoRef::parse("https://github.com/tokio-rs/tokio").unwrap();
        assert_eq!(r.owner, "tokio-rs");
        assert_eq!(r.name, "tokio");
    }

    #[test]
    fn parses_ssh_url_and_git_suffix() {
        let r = RepoRef::parse("git@github.com:serde-rs/serde.git").unwrap();
        assert_eq!(r.path(), "serde-rs/serde");

        let r = RepoRef::parse("https://github.com/serde-rs/serde.git/").unwrap();
        assert_eq!(r.path(), "serde-rs/serde");
    }

    #[test]
    fn parses_bare_path() {
        let r = RepoRef::parse("rust-lang/book").unwrap();
        assert_eq!(r.url(), "https://github.com/rust-lang/book");
    }

    #[test]
    fn rejects_garbage() {
        assert!(RepoRef::parse("not a repo").is_err());
        assert!(RepoRef::parse("https://example.com/nothing").is_err());
        assert!(RepoRef::parse("").is_err());
    }

    #[test]
    fn collection_key_is_deterministic_and_distinct() {
        let a = RepoRef::parse("https://github.com/Tokio-RS/tokio").unwrap();
        let b = RepoRef::parse("git@github.com:tokio-rs/tokio.git").unwrap();
        assert_eq!(a.collection_key(), b.collection_key());
        assert_eq!(a.collection_key(), "tokio_rs_tokio");

        let c = RepoRef::parse("rust-lang/book").unwrap();
        assert_ne!(a.collection_key(), c.collection_key());
    }

    #[test]
    fn display_name_titlecases() {
        let r = RepoRef::parse("acme/my-cool-repo").unwrap();
        assert_eq!(r.display_name(), "My Cool Repo");
    }
}
