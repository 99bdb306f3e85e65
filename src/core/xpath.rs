/// Compute the path of the potential parent by removing the last step.
///
/// Returns `None` when no parent can be derived (empty path, or a relative
/// single step such as `html[1]`). A single absolute step (`/html[1]`) and a
/// single search-anywhere step (`//html[1]`) both map to the conceptual root,
/// represented by the empty string.
pub fn parent_xpath(xpath: &str) -> Option<&str> {
    let (parent, _) = xpath.rsplit_once('/')?;

    if parent.is_empty() {
        // "/html[1]" -> root; "a/b" style relative paths never end up here
        return xpath.starts_with('/').then_some("");
    }
    if parent == "/" && xpath.starts_with("//") {
        return Some("");
    }

    Some(parent)
}

/// Expand a path into its prefix chain, shallowest first.
///
/// `/html[1]/body[1]` becomes `["/html[1]", "/html[1]/body[1]"]`; the leading
/// `/` or `//` stays attached to the first step.
pub fn ancestor_chain(xpath: &str) -> Vec<String> {
    let (prefix, rest) = split_prefix(xpath);

    let mut chain: Vec<String> = Vec::new();
    for step in rest.split('/').filter(|s| !s.is_empty()) {
        let next = match chain.last() {
            Some(previous) => format!("{}/{}", previous, step),
            None => format!("{}{}", prefix, step),
        };
        chain.push(next);
    }
    chain
}

/// Number of steps in a path. The root path (`""`) has depth 0.
pub fn path_depth(xpath: &str) -> usize {
    let (_, rest) = split_prefix(xpath);
    rest.split('/').filter(|s| !s.is_empty()).count()
}

fn split_prefix(xpath: &str) -> (&str, &str) {
    if let Some(rest) = xpath.strip_prefix("//") {
        ("//", rest)
    } else if let Some(rest) = xpath.strip_prefix('/') {
        ("/", rest)
    } else {
        ("", xpath)
    }
}
