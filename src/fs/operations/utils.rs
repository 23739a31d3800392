//! Shared helpers for filesystem operations.

/// Normalize a path (remove trailing slashes, handle //).
pub(crate) fn normalize_path(path: &str) -> String {
    let mut result = path.to_string();
    while result.contains("//") {
        result = result.replace("//", "/");
    }
    while result.ends_with('/') && result.len() > 1 {
        result.pop();
    }
    if !result.starts_with('/') {
        result = format!("/{}", result);
    }
    result
}

/// Split a path into its storage description and the components below it.
///
/// Returns `None` for `/`, which names no storage.
pub(crate) fn split_path(path: &str) -> Option<(String, Vec<String>)> {
    let normalized = normalize_path(path);
    let mut parts = normalized.split('/').filter(|p| !p.is_empty() && *p != ".");
    let storage = parts.next()?.to_string();
    Some((storage, parts.map(str::to_string).collect()))
}
