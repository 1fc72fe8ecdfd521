//! Column-name exclusion patterns

use regex::RegexSet;

use crate::error::{PipelineError, PipelineResult};

/// Compiled `exclude_columns` globs
///
/// `*` matches any run of characters and `?` exactly one; everything else is
/// literal. Matching is case-insensitive and anchored to the whole name.
#[derive(Debug, Clone)]
pub struct ExcludePatterns {
    patterns: Vec<String>,
    set: RegexSet,
}

impl ExcludePatterns {
    pub fn new<I, S>(patterns: I) -> PipelineResult<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let patterns: Vec<String> = patterns.into_iter().map(Into::into).collect();
        let set = RegexSet::new(patterns.iter().map(|p| glob_to_regex(p))).map_err(|e| {
            PipelineError::Config(format!("invalid exclude_columns pattern: {e}"))
        })?;
        Ok(Self { patterns, set })
    }

    pub fn is_excluded(&self, column: &str) -> bool {
        self.set.is_match(column)
    }

    pub fn patterns(&self) -> &[String] {
        &self.patterns
    }
}

fn glob_to_regex(glob: &str) -> String {
    let mut pattern = String::with_capacity(glob.len() + 8);
    pattern.push_str("(?i)^");
    for c in glob.chars() {
        match c {
            '*' => pattern.push_str(".*"),
            '?' => pattern.push('.'),
            other => pattern.push_str(&regex::escape(other.encode_utf8(&mut [0; 4]))),
        }
    }
    pattern.push('$');
    pattern
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_patterns() {
        let patterns = ExcludePatterns::new(["id", "*deleted*"]).unwrap();
        assert!(patterns.is_excluded("id"));
        assert!(patterns.is_excluded("ID"));
        assert!(patterns.is_excluded("is_deleted"));
        assert!(patterns.is_excluded("DeletedAt"));
        assert!(!patterns.is_excluded("customer_id"));
        assert!(!patterns.is_excluded("idx"));
    }

    #[test]
    fn test_literal_metacharacters() {
        let patterns = ExcludePatterns::new(["a.b", "v?"]).unwrap();
        assert!(patterns.is_excluded("a.b"));
        assert!(!patterns.is_excluded("axb"));
        assert!(patterns.is_excluded("v1"));
        assert!(!patterns.is_excluded("v12"));
    }

    #[test]
    fn test_empty_set_excludes_nothing() {
        let patterns = ExcludePatterns::new(Vec::<String>::new()).unwrap();
        assert!(!patterns.is_excluded("id"));
        assert!(patterns.patterns().is_empty());
    }
}
