//! Helpers for the POSIX-style, `/`-rooted paths that address the namespace.
//!
//! Every path handled by the core is absolute, starts with `/`, carries no trailing slash
//! (except the root itself) and contains no empty or dot components.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};

/// The root of the namespace.
pub const ROOT: &str = "/";

/// Normalizes a client-supplied path: forces a leading `/`, collapses duplicate separators,
/// strips a trailing `/` and rejects `.`/`..` components.
pub fn normalize(raw: &str) -> Result<String> {
    let mut out = String::with_capacity(raw.len() + 1);
    for seg in raw.split('/') {
        match seg {
            "" | "." => continue,
            ".." => return Err(Error::bad_request(format!("path {raw:?} contains a parent component"))),
            s => {
                out.push('/');
                out.push_str(s);
            }
        }
    }
    if out.is_empty() {
        out.push('/');
    }
    Ok(out)
}

/// Parent path of `path`; the root is its own parent.
pub fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => ROOT,
        Some(idx) => &path[..idx],
    }
}

/// Final component of `path`; empty for the root.
pub fn name_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// The canonical storage key for a path: the path without its leading slash.
pub fn storage_key(path: &str) -> String {
    path.trim_start_matches('/').to_string()
}

/// Tells whether `path` equals `ancestor` or lies below it.
pub fn is_within(ancestor: &str, path: &str) -> bool {
    if ancestor == ROOT {
        return true;
    }
    path == ancestor || path.starts_with(&format!("{ancestor}/"))
}

/// All ancestor prefixes of `path`, most specific first, ending with the root.
/// `/a/b/c` yields `["/a/b", "/a", "/"]`.
pub fn ancestors(path: &str) -> Vec<String> {
    let mut out = Vec::new();
    let mut p = parent_of(path).to_string();
    loop {
        out.push(p.clone());
        if p == ROOT {
            break;
        }
        p = parent_of(&p).to_string();
    }
    out
}

/// Joins a parent path and a child name.
pub fn join(parent: &str, name: &str) -> String {
    if parent == ROOT {
        format!("/{name}")
    } else {
        format!("{parent}/{name}")
    }
}

/// The stable, deterministic id for a path: first 16 bytes of `SHA-256(path)`, lowercase hex.
pub fn entry_id(path: &str) -> String {
    let digest = Sha256::digest(path.as_bytes());
    hex::encode(&digest[..16])
}

/// Lowercased extension of `path`, without the dot.
pub fn extension(path: &str) -> Option<String> {
    let name = name_of(path);
    let idx = name.rfind('.')?;
    if idx == 0 || idx + 1 == name.len() {
        return None;
    }
    Some(name[idx + 1..].to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn normalize_paths() {
        assert_eq!(normalize("/a/b/").unwrap(), "/a/b");
        assert_eq!(normalize("a//b").unwrap(), "/a/b");
        assert_eq!(normalize("/").unwrap(), "/");
        assert_eq!(normalize("").unwrap(), "/");
        assert!(normalize("/a/../b").is_err());
    }

    #[test]
    fn parents_and_names() {
        assert_eq!(parent_of("/a/b/c"), "/a/b");
        assert_eq!(parent_of("/a"), "/");
        assert_eq!(parent_of("/"), "/");
        assert_eq!(name_of("/a/b/c"), "c");
        assert_eq!(name_of("/"), "");
    }

    #[test]
    fn ancestor_chain_is_most_specific_first() {
        assert_eq!(ancestors("/a/b/c"), vec!["/a/b".to_string(), "/a".to_string(), "/".to_string()]);
        assert_eq!(ancestors("/a"), vec!["/".to_string()]);
    }

    #[test]
    fn containment() {
        assert!(is_within("/", "/anything"));
        assert!(is_within("/a", "/a"));
        assert!(is_within("/a", "/a/b"));
        assert!(!is_within("/a", "/ab"));
    }

    #[test]
    fn ids_are_deterministic_and_distinct() {
        assert_eq!(entry_id("/a.txt"), entry_id("/a.txt"));
        assert_ne!(entry_id("/a.txt"), entry_id("/b.txt"));
        assert_eq!(entry_id("/a.txt").len(), 32);
    }

    #[test]
    fn extensions() {
        assert_eq!(extension("/p/photo.JPG").as_deref(), Some("jpg"));
        assert_eq!(extension("/p/archive.tar.gz").as_deref(), Some("gz"));
        assert_eq!(extension("/p/noext"), None);
        assert_eq!(extension("/p/.hidden"), None);
    }
}
