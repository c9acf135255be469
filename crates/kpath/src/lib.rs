#![cfg_attr(feature = "no_std", no_std)]

//! Pure path-manipulation logic for the VFS: normalization and
//! longest-mountpoint-prefix matching.
//!
//! Kept dependency-free and usable under `std` by default (the `no_std`
//! feature is only turned on by the kernel binary) so the properties in
//! the specification's testable-properties section can be exercised with
//! plain `cargo test` on the host, the same way the reference kernel's
//! small leaf crates default to `std` and opt into `no_std`.

extern crate alloc;

use alloc::string::String;
use alloc::vec::Vec;

/// Maximum normalized path length the VFS will accept.
pub const VFS_PATH_MAX: usize = 4096;

/// Collapse `//`, drop `.`, pop one component per `..` (never above root),
/// force a leading `/`, and strip any trailing `/` except for the root
/// itself. Idempotent: `normalize(normalize(p)) == normalize(p)`.
pub fn normalize(path: &str) -> String {
    let mut stack: Vec<&str> = Vec::new();

    for component in path.split('/') {
        match component {
            "" | "." => continue,
            ".." => {
                stack.pop();
            }
            comp => stack.push(comp),
        }
    }

    let mut out = String::with_capacity(path.len().min(VFS_PATH_MAX) + 1);
    out.push('/');
    for (i, comp) in stack.iter().enumerate() {
        if i > 0 {
            out.push('/');
        }
        out.push_str(comp);
    }

    if out.len() > VFS_PATH_MAX {
        out.truncate(VFS_PATH_MAX);
    }
    out
}

/// Does normalized mountpoint `mountpoint` cover normalized query `query`?
/// `/` covers everything; otherwise `query` must equal `mountpoint` or
/// start with `mountpoint` followed by `/`.
pub fn mount_covers(mountpoint: &str, query: &str) -> bool {
    if mountpoint == "/" {
        return true;
    }
    query == mountpoint
        || (query.len() > mountpoint.len()
            && query.starts_with(mountpoint)
            && query.as_bytes()[mountpoint.len()] == b'/')
}

/// Pick the longest-prefix match among `mountpoints` for `query`, returning
/// its index and the path relative to that mountpoint (no leading `/`).
/// `mountpoints` need not be sorted; ties are broken by earlier index,
/// matching a front-to-back scan of a mount list that keeps the most
/// recently mounted entry first.
pub fn find_mount<'a>(mountpoints: &[&'a str], query: &str) -> Option<(usize, String)> {
    let mut best: Option<(usize, &'a str)> = None;

    for (idx, &mp) in mountpoints.iter().enumerate() {
        if !mount_covers(mp, query) {
            continue;
        }
        match best {
            Some((_, best_mp)) if best_mp.len() >= mp.len() => {}
            _ => best = Some((idx, mp)),
        }
    }

    best.map(|(idx, mp)| {
        let rel = if mp == "/" {
            query.trim_start_matches('/')
        } else {
            query[mp.len()..].trim_start_matches('/')
        };
        (idx, String::from(rel))
    })
}

/// Split a normalized absolute path into its non-empty components.
pub fn components(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Split `path` into `(parent, name)`; `parent` is normalized and absolute,
/// `name` is empty only when `path` normalizes to `/`.
pub fn split_parent(path: &str) -> (String, String) {
    let normalized = normalize(path);
    if normalized == "/" {
        return (String::from("/"), String::new());
    }
    match normalized.rfind('/') {
        Some(0) => (String::from("/"), String::from(&normalized[1..])),
        Some(idx) => (
            String::from(&normalized[..idx]),
            String::from(&normalized[idx + 1..]),
        ),
        None => (String::from("/"), normalized),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_collapses_and_resolves_dots() {
        assert_eq!(normalize("/a//b/./c/../d/"), "/a/b/d");
        assert_eq!(normalize("////"), "/");
        assert_eq!(normalize("/.."), "/");
        assert_eq!(normalize(""), "/");
        assert_eq!(normalize("/a/b/.."), "/a");
    }

    #[test]
    fn normalize_never_escapes_root() {
        assert_eq!(normalize("/../../../etc"), "/etc");
    }

    #[test]
    fn normalize_is_idempotent() {
        for p in [
            "/a//b/./c/../d/",
            "////",
            "/..",
            "/mnt/data/x",
            "relative/path",
            "/trailing/",
        ] {
            let once = normalize(p);
            let twice = normalize(&once);
            assert_eq!(once, twice, "not idempotent for {p:?}");
            assert!(once.starts_with('/'));
            assert!(!once.contains("//"));
            assert!(once == "/" || !once.ends_with('/'));
        }
    }

    #[test]
    fn mount_lookup_picks_longest_prefix() {
        let mounts = ["/", "/mnt", "/mnt/data"];
        let (idx, rel) = find_mount(&mounts, "/mnt/data/x").unwrap();
        assert_eq!(mounts[idx], "/mnt/data");
        assert_eq!(rel, "x");

        let (idx, rel) = find_mount(&mounts, "/mnt/other").unwrap();
        assert_eq!(mounts[idx], "/mnt");
        assert_eq!(rel, "other");

        let (idx, rel) = find_mount(&mounts, "/elsewhere").unwrap();
        assert_eq!(mounts[idx], "/");
        assert_eq!(rel, "elsewhere");
    }

    #[test]
    fn mount_lookup_exact_match_wins_over_root() {
        let mounts = ["/", "/mnt"];
        let (idx, rel) = find_mount(&mounts, "/mnt").unwrap();
        assert_eq!(mounts[idx], "/mnt");
        assert_eq!(rel, "");
    }

    #[test]
    fn split_parent_handles_root_and_nested() {
        assert_eq!(split_parent("/hello.txt"), (String::from("/"), String::from("hello.txt")));
        assert_eq!(
            split_parent("/a/b/c"),
            (String::from("/a/b"), String::from("c"))
        );
        assert_eq!(split_parent("/"), (String::from("/"), String::new()));
    }
}
