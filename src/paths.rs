use std::cmp::Ordering;

/// Normalize a virtual path: backslashes become slashes, runs of slashes
/// collapse, leading and trailing slashes are stripped. `"/"` alone maps
/// to the root (empty string).
pub fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut prev_slash = false;
    for ch in path.chars() {
        let ch = if ch == '\\' { '/' } else { ch };
        if ch == '/' {
            if prev_slash {
                continue;
            }
            prev_slash = true;
        } else {
            prev_slash = false;
        }
        out.push(ch);
    }
    let trimmed = out.trim_start_matches('/').trim_end_matches('/');
    trimmed.to_string()
}

/// Join two relative path fragments with a single separator.
pub fn join(a: &str, b: &str) -> String {
    let a = a.trim_end_matches('/');
    let b = b.trim_start_matches('/');
    if a.is_empty() {
        return b.to_string();
    }
    if b.is_empty() {
        return a.to_string();
    }
    format!("{a}/{b}")
}

/// The parent key of a cache key, or `None` for the root itself.
/// Top-level entries parent to the root (empty string).
pub fn parent_of(key: &str) -> Option<&str> {
    if key.is_empty() {
        return None;
    }
    match key.rfind('/') {
        Some(idx) => Some(&key[..idx]),
        None => Some(""),
    }
}

/// Last component of a path, the whole path when it has no separator.
pub fn basename(path: &str) -> &str {
    match path.rfind('/') {
        Some(idx) => &path[idx + 1..],
        None => path,
    }
}

/// Lowercased, dot-prefixed extension of a name (`".zip"`), compound
/// tar suffixes excluded: this is pure last-dot extraction.
pub fn extension_of(name: &str) -> Option<String> {
    let base = basename(name);
    let idx = base.rfind('.')?;
    if idx == 0 || idx + 1 == base.len() {
        return None;
    }
    Some(base[idx..].to_ascii_lowercase())
}

/// Split a mixed path into `(archive_path, internal_path)` by scanning
/// slash-separated prefixes left to right and returning at the first
/// prefix `is_archive` accepts. No prefix qualifying yields
/// `("", path)`. Absolute inputs keep their leading slash on the
/// archive side.
pub fn split_archive_path<F>(path: &str, is_archive: F) -> (String, String)
where
    F: Fn(&str) -> bool,
{
    let mut folded = path.replace('\\', "/");
    while folded.contains("//") {
        folded = folded.replace("//", "/");
    }
    let norm = folded.trim_end_matches('/');
    if norm.is_empty() {
        return (String::new(), String::new());
    }
    let start = if norm.starts_with('/') { 1 } else { 0 };
    let mut boundary = start;
    loop {
        let next = match norm[boundary..].find('/') {
            Some(off) => boundary + off,
            None => break,
        };
        let prefix = &norm[..next];
        if is_archive(prefix) {
            return (prefix.to_string(), norm[next + 1..].to_string());
        }
        boundary = next + 1;
    }
    if is_archive(norm) {
        return (norm.to_string(), String::new());
    }
    (String::new(), norm[start..].to_string())
}

/// One comparable fragment of a natural sort key.
#[derive(Debug, Clone, PartialEq, Eq)]
enum SortPart {
    Number(u64),
    Text(String),
}

impl Ord for SortPart {
    fn cmp(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortPart::Number(a), SortPart::Number(b)) => a.cmp(b),
            (SortPart::Text(a), SortPart::Text(b)) => a.cmp(b),
            // Digits order before letters, matching '0' < 'a'.
            (SortPart::Number(_), SortPart::Text(_)) => Ordering::Less,
            (SortPart::Text(_), SortPart::Number(_)) => Ordering::Greater,
        }
    }
}

impl PartialOrd for SortPart {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// Case-insensitive sort key that compares digit runs numerically, so
/// `page2` orders before `page10`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct NaturalKey(Vec<SortPart>);

pub fn natural_key(text: &str) -> NaturalKey {
    let mut parts = Vec::new();
    let mut buf = String::new();
    let mut in_digits = false;

    for ch in text.chars() {
        let digit = ch.is_ascii_digit();
        if !buf.is_empty() && digit != in_digits {
            parts.push(flush(&mut buf, in_digits));
        }
        in_digits = digit;
        buf.push(ch);
    }
    if !buf.is_empty() {
        parts.push(flush(&mut buf, in_digits));
    }
    if parts.is_empty() {
        parts.push(SortPart::Text(String::new()));
    }
    NaturalKey(parts)
}

fn flush(buf: &mut String, digits: bool) -> SortPart {
    let text = std::mem::take(buf);
    if digits {
        // Runs too long for u64 fall back to text comparison.
        match text.parse::<u64>() {
            Ok(n) => SortPart::Number(n),
            Err(_) => SortPart::Text(text),
        }
    } else {
        SortPart::Text(text.to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_strips_and_collapses() {
        assert_eq!(normalize("a\\b//c/"), "a/b/c");
        assert_eq!(normalize("/a/b"), "a/b");
        assert_eq!(normalize("/"), "");
        assert_eq!(normalize(""), "");
    }

    #[test]
    fn join_handles_empty_sides() {
        assert_eq!(join("", "b"), "b");
        assert_eq!(join("a", ""), "a");
        assert_eq!(join("a/", "/b"), "a/b");
    }

    #[test]
    fn parent_and_basename() {
        assert_eq!(parent_of("a/b/c"), Some("a/b"));
        assert_eq!(parent_of("a"), Some(""));
        assert_eq!(parent_of(""), None);
        assert_eq!(basename("a/b/c.txt"), "c.txt");
        assert_eq!(basename("c.txt"), "c.txt");
    }

    #[test]
    fn extension_lowercases() {
        assert_eq!(extension_of("A.ZIP").as_deref(), Some(".zip"));
        assert_eq!(extension_of("dir/file.tar.gz").as_deref(), Some(".gz"));
        assert_eq!(extension_of("noext"), None);
        assert_eq!(extension_of(".hidden"), None);
    }

    #[test]
    fn split_finds_first_archive_prefix() {
        let is_arc = |p: &str| p.ends_with(".zip");
        assert_eq!(
            split_archive_path("a.zip/b/c.txt", is_arc),
            ("a.zip".to_string(), "b/c.txt".to_string())
        );
        assert_eq!(
            split_archive_path("a.zip/b.zip/c.txt", is_arc),
            ("a.zip".to_string(), "b.zip/c.txt".to_string())
        );
        assert_eq!(
            split_archive_path("plain/dir", is_arc),
            ("".to_string(), "plain/dir".to_string())
        );
        assert_eq!(
            split_archive_path("only.zip", is_arc),
            ("only.zip".to_string(), "".to_string())
        );
        assert_eq!(
            split_archive_path("/abs/dir/a.zip/m/f.txt", is_arc),
            ("/abs/dir/a.zip".to_string(), "m/f.txt".to_string())
        );
    }

    #[test]
    fn natural_order() {
        let mut names = vec!["page10.png", "Page2.png", "page1.png", "cover.png"];
        names.sort_by_key(|n| natural_key(n));
        assert_eq!(names, vec!["cover.png", "page1.png", "Page2.png", "page10.png"]);
    }
}
