//! Path helpers. Paths are absolute, `/`-separated, without trailing slash.

use crate::error::TreeError;

/// Path of the allocation's root directory.
pub const ROOT_PATH: &str = "/";

/// Validate and canonicalize a path.
pub fn normalize(path: &str) -> Result<String, TreeError> {
    let invalid = |reason| TreeError::InvalidPath {
        path: path.to_string(),
        reason,
    };

    if !path.starts_with('/') {
        return Err(invalid("must be absolute"));
    }
    let trimmed = if path.len() > 1 {
        path.trim_end_matches('/')
    } else {
        path
    };
    if trimmed.is_empty() {
        return Ok(ROOT_PATH.to_string());
    }
    for segment in segments(trimmed) {
        validate_name(segment).map_err(|_| invalid("bad segment"))?;
    }
    if trimmed.len() > 1 && trimmed[1..].split('/').any(str::is_empty) {
        return Err(invalid("empty segment"));
    }
    Ok(trimmed.to_string())
}

/// Check a single path component.
pub fn validate_name(name: &str) -> Result<(), TreeError> {
    if name.is_empty() || name == "." || name == ".." || name.contains('/') {
        return Err(TreeError::InvalidPath {
            path: name.to_string(),
            reason: "bad name",
        });
    }
    Ok(())
}

/// Segments of a normalized path. The root has none.
pub fn segments(path: &str) -> impl Iterator<Item = &str> {
    path.split('/').filter(|s| !s.is_empty())
}

/// Parent of a normalized path; `None` for the root.
pub fn parent(path: &str) -> Option<&str> {
    if path == ROOT_PATH {
        return None;
    }
    match path.rfind('/') {
        Some(0) => Some(ROOT_PATH),
        Some(i) => Some(&path[..i]),
        None => None,
    }
}

/// Last component of a normalized path; the root's name is `/`.
pub fn file_name(path: &str) -> &str {
    if path == ROOT_PATH {
        return ROOT_PATH;
    }
    path.rsplit('/').next().unwrap_or(path)
}

/// Child path of `dir`.
pub fn join(dir: &str, name: &str) -> String {
    if dir == ROOT_PATH {
        format!("/{}", name)
    } else {
        format!("{}/{}", dir, name)
    }
}

/// `path` itself and every ancestor, root first.
pub fn ancestry(path: &str) -> Vec<String> {
    let mut out = vec![ROOT_PATH.to_string()];
    let mut current = ROOT_PATH.to_string();
    for segment in segments(path) {
        current = join(&current, segment);
        out.push(current.clone());
    }
    out
}

/// True if `path` equals `ancestor` or lies below it.
pub fn is_within(path: &str, ancestor: &str) -> bool {
    ancestor == ROOT_PATH
        || path == ancestor
        || (path.starts_with(ancestor) && path.as_bytes().get(ancestor.len()) == Some(&b'/'))
}
