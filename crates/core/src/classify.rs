//! Content classification: binary vs text, structured vs free-form, and
//! line-ending normalization.

use std::path::Path;

/// Number of leading bytes inspected by [`is_binary`].
const SAMPLE_LEN: usize = 8000;

/// Maximum share (percent) of control bytes in the sample before content is
/// considered binary.
const MAX_CONTROL_PERCENT: usize = 30;

/// How a file's content is merged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContentKind {
    /// Opaque bytes; never merged, local wins.
    Binary,
    /// Field-keyed document merged field by field.
    Structured,
    /// Free-form text merged line by line.
    Text,
}

/// Heuristic binary detection over a leading sample.
///
/// Content is binary if the sample contains a NUL byte or if more than 30%
/// of it is non-whitespace control bytes. Bytes >= 0x80 always count as
/// text, so UTF-8 and legacy 8-bit encodings are never misclassified.
pub fn is_binary(content: &[u8]) -> bool {
    let sample = &content[..content.len().min(SAMPLE_LEN)];
    if sample.is_empty() {
        return false;
    }
    if sample.contains(&0) {
        return true;
    }
    let control = sample.iter().filter(|&&b| is_control(b)).count();
    control * 100 > sample.len() * MAX_CONTROL_PERCENT
}

fn is_control(b: u8) -> bool {
    // tab, LF, FF, CR and ESC show up in ordinary text files.
    (b < 0x20 && !matches!(b, b'\t' | b'\n' | 0x0c | b'\r' | 0x1b)) || b == 0x7f
}

/// Convert CRLF and lone CR line endings to LF.
pub fn normalize_line_endings(content: &[u8]) -> Vec<u8> {
    if !content.contains(&b'\r') {
        return content.to_vec();
    }
    let mut out = Vec::with_capacity(content.len());
    let mut iter = content.iter().copied().peekable();
    while let Some(b) = iter.next() {
        if b == b'\r' {
            if iter.peek() == Some(&b'\n') {
                iter.next();
            }
            out.push(b'\n');
        } else {
            out.push(b);
        }
    }
    out
}

/// Normalize content as it enters a snapshot: text gets LF line endings,
/// binary content is passed through untouched.
pub fn normalize_content(content: Vec<u8>) -> Vec<u8> {
    if is_binary(&content) {
        content
    } else {
        normalize_line_endings(&content)
    }
}

/// Decides which merger handles a path.
#[derive(Debug, Clone)]
pub struct Classifier {
    structured_extensions: Vec<String>,
}

impl Default for Classifier {
    fn default() -> Self {
        Self::new(vec!["json".to_string()])
    }
}

impl Classifier {
    /// Create a classifier treating the given extensions (without the dot,
    /// case-insensitive) as structured documents.
    pub fn new(structured_extensions: Vec<String>) -> Self {
        Self {
            structured_extensions: structured_extensions
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
        }
    }

    /// `true` if the path's extension denotes a field-keyed format.
    pub fn is_structured(&self, path: &str) -> bool {
        Path::new(path)
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| {
                let ext = ext.to_ascii_lowercase();
                self.structured_extensions.iter().any(|s| *s == ext)
            })
            .unwrap_or(false)
    }

    /// Classify one path given both sides' content. Either side being binary
    /// makes the whole path binary.
    pub fn classify(&self, path: &str, local: &[u8], remote: &[u8]) -> ContentKind {
        if is_binary(local) || is_binary(remote) {
            ContentKind::Binary
        } else if self.is_structured(path) {
            ContentKind::Structured
        } else {
            ContentKind::Text
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_not_binary() {
        assert!(!is_binary(b""));
        assert!(!is_binary(b"hello\nworld\n"));
        assert!(!is_binary("caf\u{e9} \u{1f600}\r\n\t".as_bytes()));
        assert!(!is_binary(b"\x1b[31mred\x1b[0m\n"));
    }

    #[test]
    fn test_nul_byte_is_binary() {
        assert!(is_binary(b"PK\x03\x04\x00\x00"));
        assert!(is_binary(&[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a, 0x00]));
    }

    #[test]
    fn test_control_ratio() {
        // 4 control bytes out of 10 -> binary.
        assert!(is_binary(b"\x01\x02\x03\x04abcdef"));
        // 1 control byte out of 10 -> text.
        assert!(!is_binary(b"\x01bcdefghij"));
    }

    #[test]
    fn test_only_sample_is_inspected() {
        let mut content = vec![b'a'; SAMPLE_LEN];
        content.push(0);
        assert!(!is_binary(&content));
    }

    #[test]
    fn test_normalize_line_endings() {
        assert_eq!(normalize_line_endings(b"a\r\nb\rc\n"), b"a\nb\nc\n");
        assert_eq!(normalize_line_endings(b"\r\r\n"), b"\n\n");
        assert_eq!(normalize_line_endings(b"plain\n"), b"plain\n");
    }

    #[test]
    fn test_normalize_content_leaves_binary_alone() {
        let binary = b"\x00\r\n".to_vec();
        assert_eq!(normalize_content(binary.clone()), binary);
        assert_eq!(normalize_content(b"x\r\n".to_vec()), b"x\n");
    }

    #[test]
    fn test_is_structured() {
        let c = Classifier::default();
        assert!(c.is_structured("pages/home.json"));
        assert!(c.is_structured("DATA.JSON"));
        assert!(!c.is_structured("readme.md"));
        assert!(!c.is_structured("json"));

        let c = Classifier::new(vec![".yaml".into(), "JSON".into()]);
        assert!(c.is_structured("a.yaml"));
        assert!(c.is_structured("a.json"));
    }

    #[test]
    fn test_classify() {
        let c = Classifier::default();
        assert_eq!(c.classify("a.json", b"{}", b"{}"), ContentKind::Structured);
        assert_eq!(c.classify("a.txt", b"x", b"y"), ContentKind::Text);
        assert_eq!(c.classify("a.json", b"\x00", b"{}"), ContentKind::Binary);
    }
}
