//! Turns caller-supplied names into safe file name components.

/// Prefix used when no usable prefix is given.
pub const DEFAULT_PREFIX: &str = "tmp_";

/// Suffix used when no suffix is given or none can be derived from a name.
pub const DEFAULT_SUFFIX: &str = ".tmp";

/// Shorter prefixes are padded with trailing `_`.
pub const MIN_PREFIX_LENGTH: usize = 3;

/// Longer prefixes are truncated.
pub const MAX_PREFIX_LENGTH: usize = 64;

/// Generates a file name prefix from a name template.
///
/// 1. An empty template yields [`DEFAULT_PREFIX`].
/// 2. Any character that is not in `[a-zA-Z0-9._-]` is replaced with `_`.
/// 3. The result is truncated to [`MAX_PREFIX_LENGTH`] characters.
/// 4. The result is padded with trailing `_` to [`MIN_PREFIX_LENGTH`] characters.
///
/// ## Example
///
/// ```
/// use tempfile_context::names::sanitize_prefix;
///
/// assert_eq!(sanitize_prefix(""), "tmp_");
/// assert_eq!(sanitize_prefix("a b"), "a_b");
/// assert_eq!(sanitize_prefix("x"), "x__");
/// ```
pub fn sanitize_prefix(template: &str) -> String {
    if template.is_empty() {
        return DEFAULT_PREFIX.to_string();
    }

    let mut prefix: String = template
        .chars()
        .take(MAX_PREFIX_LENGTH)
        .map(|ch| if is_safe_prefix_char(ch) { ch } else { '_' })
        .collect();
    while prefix.len() < MIN_PREFIX_LENGTH {
        prefix.push('_');
    }
    prefix
}

/// Splits a desired file name into a sanitized prefix and a suffix, keeping the
/// file type recognizable by its extension.
///
/// A trailing run of `.`-separated segments made of `[a-zA-Z0-9_]` becomes the
/// suffix, so multiple extensions such as `.tar.gz` are kept together. A dot in
/// first position, a dot preceded by another dot, and an empty segment all end
/// the scan. When a suffix is split off, the prefix gets a trailing `_`
/// separating it from the random part of the generated name. Without a
/// suffix, [`DEFAULT_SUFFIX`] is used.
///
/// Neither dot of a `..` pair is a boundary, so only the segments after the
/// pair can form the suffix: `x..tar.gz` keeps `.gz`, and `a..gz` has no
/// suffix at all. Accepting the second dot instead would give `.tar.gz` and
/// `.gz`.
///
/// ## Example
///
/// ```
/// use tempfile_context::names::split_name;
///
/// assert_eq!(split_name("archive.tar.gz"), ("archive_".to_string(), ".tar.gz".to_string()));
/// assert_eq!(split_name("README"), ("README".to_string(), ".tmp".to_string()));
/// assert_eq!(split_name("a..gz"), ("a..gz".to_string(), ".tmp".to_string()));
/// ```
pub fn split_name(name: &str) -> (String, String) {
    match suffix_start(name) {
        Some(boundary) => {
            let prefix = format!("{}_", &name[..boundary]);
            (sanitize_prefix(&prefix), name[boundary..].to_string())
        }
        None => (sanitize_prefix(name), DEFAULT_SUFFIX.to_string()),
    }
}

/// Byte index of the dot that starts the extension, if any.
fn suffix_start(name: &str) -> Option<usize> {
    let bytes = name.as_bytes();
    let mut boundary = bytes.len();
    let mut i = bytes.len();
    // Index 0 is never an extension boundary.
    while i > 1 {
        i -= 1;
        match bytes[i] {
            b'.' => {
                if i + 1 == boundary || bytes[i - 1] == b'.' {
                    break;
                }
                boundary = i;
            }
            b if is_safe_suffix_byte(b) => {}
            _ => break,
        }
    }
    (boundary < bytes.len()).then_some(boundary)
}

fn is_safe_prefix_char(ch: char) -> bool {
    ch.is_ascii_alphanumeric() || ch == '.' || ch == '-' || ch == '_'
}

fn is_safe_suffix_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_'
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split(name: &str) -> (String, String) {
        split_name(name)
    }

    #[test]
    fn empty_template_uses_default() {
        assert_eq!(sanitize_prefix(""), DEFAULT_PREFIX);
    }

    #[test]
    fn unsafe_characters_are_replaced() {
        assert_eq!(sanitize_prefix("my report (1)"), "my_report__1_");
        assert_eq!(sanitize_prefix("../etc/passwd"), ".._etc_passwd");
        assert_eq!(sanitize_prefix("naïve"), "na_ve");
    }

    #[test]
    fn short_prefixes_are_padded() {
        assert_eq!(sanitize_prefix("a"), "a__");
        assert_eq!(sanitize_prefix("ab"), "ab_");
        assert_eq!(sanitize_prefix("abc"), "abc");
    }

    #[test]
    fn long_prefixes_are_truncated() {
        let long = "x".repeat(200);
        assert_eq!(sanitize_prefix(&long), "x".repeat(MAX_PREFIX_LENGTH));
    }

    #[test]
    fn sanitize_is_idempotent_and_bounded() {
        let inputs = vec![
            String::new(),
            "a".to_string(),
            "tmp_".to_string(),
            "héllo wörld".to_string(),
            "/\\:*?\"<>|".to_string(),
            "archive.tar.gz".to_string(),
            "é".repeat(100),
            "ab/".repeat(40),
        ];
        for input in &inputs {
            let once = sanitize_prefix(input);
            assert_eq!(sanitize_prefix(&once), once, "input {input:?}");
            assert!(once.len() >= MIN_PREFIX_LENGTH, "input {input:?}");
            assert!(once.len() <= MAX_PREFIX_LENGTH, "input {input:?}");
            assert!(once.chars().all(is_safe_prefix_char), "input {input:?}");
        }
    }

    #[test]
    fn multi_extension_is_kept() {
        assert_eq!(split("archive.tar.gz"), ("archive_".into(), ".tar.gz".into()));
    }

    #[test]
    fn single_extension() {
        assert_eq!(split("report.pdf"), ("report_".into(), ".pdf".into()));
        assert_eq!(split("x.gz"), ("x__".into(), ".gz".into()));
    }

    #[test]
    fn no_extension_uses_default_suffix() {
        assert_eq!(split(""), ("tmp_".into(), ".tmp".into()));
        assert_eq!(split("README"), ("README".into(), ".tmp".into()));
    }

    #[test]
    fn leading_dot_is_not_an_extension() {
        assert_eq!(split(".bashrc"), (".bashrc".into(), ".tmp".into()));
        assert_eq!(split(".config.json"), (".config_".into(), ".json".into()));
    }

    #[test]
    fn double_dot_ends_the_scan() {
        assert_eq!(split("a..gz"), ("a..gz".into(), ".tmp".into()));
        assert_eq!(split("x..tar.gz"), ("x..tar_".into(), ".gz".into()));
    }

    #[test]
    fn trailing_dot_is_not_an_extension() {
        assert_eq!(split("name."), ("name.".into(), ".tmp".into()));
    }

    #[test]
    fn unsafe_character_ends_the_scan() {
        assert_eq!(split("my-file.v2.txt"), ("my-file_".into(), ".v2.txt".into()));
        assert_eq!(split("a.b-c.txt"), ("a.b-c_".into(), ".txt".into()));
        assert_eq!(split("photo.jpé"), ("photo.jp_".into(), ".tmp".into()));
    }
}
