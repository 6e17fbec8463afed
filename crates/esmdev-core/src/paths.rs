//! Mapping between absolute file paths and the URL paths the browser requests.
//!
//! Files inside the root are served at their root-relative path (`/src/a.js`).
//! Files outside the root keep their relative position, with every `..`
//! segment encoded as `__..__` so the browser does not collapse it.

use std::path::{Component, Path, PathBuf};

/// URL segment standing in for `..`.
pub const DOTDOT_ENCODING: &str = "__..__";

/// Query parameter that carries a non-file namespace in a request URL.
pub const NAMESPACE_QUERY: &str = "namespace";

/// Convert a path to a forward-slash string.
#[must_use]
pub fn slash(path: &Path) -> String {
    let s = path.to_string_lossy();
    if cfg!(windows) {
        s.replace('\\', "/")
    } else {
        s.into_owned()
    }
}

/// Lexically normalize `.` and `..` components without touching the filesystem.
#[must_use]
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Relative path from directory `from` to `to`; both must be absolute.
#[must_use]
pub fn relative(from: &Path, to: &Path) -> PathBuf {
    let from = normalize(from);
    let to = normalize(to);
    let from_parts: Vec<_> = from.components().collect();
    let to_parts: Vec<_> = to.components().collect();

    let common = from_parts
        .iter()
        .zip(&to_parts)
        .take_while(|(a, b)| a == b)
        .count();

    let mut rel = PathBuf::new();
    for _ in common..from_parts.len() {
        rel.push("..");
    }
    for part in &to_parts[common..] {
        rel.push(part.as_os_str());
    }
    rel
}

/// Root-relative, slash-normalized form of `path`, as used for bundle map keys.
#[must_use]
pub fn root_relative(root: &Path, path: &Path) -> String {
    slash(&relative(root, path))
}

/// URL path for a file, e.g. `/project/src/a.js` → `/src/a.js`.
#[must_use]
pub fn file_to_request(root: &Path, path: &Path) -> String {
    let rel = root_relative(root, path);
    let encoded: Vec<&str> = rel
        .split('/')
        .map(|seg| if seg == ".." { DOTDOT_ENCODING } else { seg })
        .collect();
    format!("/{}", encoded.join("/"))
}

/// Inverse of [`file_to_request`]. Query strings and hashes are ignored.
#[must_use]
pub fn request_to_file(root: &Path, request: &str) -> PathBuf {
    let clean = clean_url(request);
    let decoded: Vec<&str> = clean
        .trim_start_matches('/')
        .split('/')
        .map(|seg| if seg == DOTDOT_ENCODING { ".." } else { seg })
        .collect();
    normalize(&root.join(decoded.join("/")))
}

/// Strip query string and hash from a URL.
#[must_use]
pub fn clean_url(url: &str) -> &str {
    let end = url.find(['?', '#']).unwrap_or(url.len());
    &url[..end]
}

/// Extract the `namespace` query parameter of a request URL, if any.
#[must_use]
pub fn namespace_of(url: &str) -> Option<&str> {
    let query = url.split_once('?')?.1;
    let query = query.split('#').next().unwrap_or(query);
    query.split('&').find_map(|pair| {
        let (k, v) = pair.split_once('=')?;
        (k == NAMESPACE_QUERY && !v.is_empty()).then_some(v)
    })
}

/// Whether a specifier points outside the dev server (network or inline data).
#[must_use]
pub fn is_external_url(url: &str) -> bool {
    let lower = url.trim_start();
    lower.starts_with("http://")
        || lower.starts_with("https://")
        || lower.starts_with("//")
        || lower.starts_with("data:")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_to_request_inside_root() {
        let root = Path::new("/project");
        assert_eq!(
            file_to_request(root, Path::new("/project/src/App.js")),
            "/src/App.js"
        );
    }

    #[test]
    fn test_file_to_request_outside_root() {
        let root = Path::new("/project/app");
        let url = file_to_request(root, Path::new("/project/shared/util.js"));
        assert_eq!(url, "/__..__/shared/util.js");
        assert_eq!(
            request_to_file(root, &url),
            PathBuf::from("/project/shared/util.js")
        );
    }

    #[test]
    fn test_request_to_file_ignores_query() {
        let root = Path::new("/project");
        assert_eq!(
            request_to_file(root, "/src/a.js?t=123#x"),
            PathBuf::from("/project/src/a.js")
        );
    }

    #[test]
    fn test_relative_and_normalize() {
        assert_eq!(
            relative(Path::new("/a/b"), Path::new("/a/c/d.js")),
            PathBuf::from("../c/d.js")
        );
        assert_eq!(normalize(Path::new("/a/./b/../c")), PathBuf::from("/a/c"));
        assert_eq!(
            root_relative(Path::new("/p"), Path::new("/p/node_modules/x/i.js")),
            "node_modules/x/i.js"
        );
    }

    #[test]
    fn test_clean_url() {
        assert_eq!(clean_url("/a.js?import"), "/a.js");
        assert_eq!(clean_url("/a.js#top"), "/a.js");
        assert_eq!(clean_url("/a.js"), "/a.js");
    }

    #[test]
    fn test_namespace_of() {
        assert_eq!(namespace_of("/fs?namespace=node-builtins"), Some("node-builtins"));
        assert_eq!(namespace_of("/a.js?t=1&namespace=x#h"), Some("x"));
        assert_eq!(namespace_of("/a.js?t=1"), None);
        assert_eq!(namespace_of("/a.js"), None);
    }

    #[test]
    fn test_is_external_url() {
        assert!(is_external_url("https://cdn.example.com/x.js"));
        assert!(is_external_url("http://x"));
        assert!(is_external_url("//cdn.example.com/x.js"));
        assert!(is_external_url("data:text/javascript,export default 1"));
        assert!(!is_external_url("./local.js"));
        assert!(!is_external_url("/src/a.js"));
        assert!(!is_external_url("react"));
    }
}
