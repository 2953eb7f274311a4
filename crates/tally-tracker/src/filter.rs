//! Include/exclude path rules.
//!
//! Glob syntax: `*` matches any run of characters (including `/`), `?` one
//! character, and `[...]` a character class (`[!...]` negated). Everything
//! else is literal. A pattern that does not start with `*` is anchored at
//! the start of the path, and one that does not end with `*` at the end.
//!
//! Exclude rules always win. With no include rules every path that is not
//! excluded is tracked.

use regex::Regex;

use tally_core::error::{Result, TallyError};
use tally_core::FilterRules;

#[derive(Debug, Clone)]
struct CompiledPattern {
    source: String,
    regex: Regex,
}

impl CompiledPattern {
    fn compile(pattern: &str) -> Result<Self> {
        Ok(Self {
            source: pattern.to_string(),
            regex: glob_to_regex(pattern)?,
        })
    }
}

/// Translate a glob pattern into an anchored [`Regex`].
///
/// # Errors
///
/// Returns [`TallyError::FilterConfig`] for an empty pattern, an unclosed
/// character class, or a class the regex engine rejects.
pub fn glob_to_regex(pattern: &str) -> Result<Regex> {
    let invalid = |reason: &str| TallyError::FilterConfig {
        pattern: pattern.to_string(),
        reason: reason.to_string(),
    };

    if pattern.trim().is_empty() {
        return Err(invalid("pattern is empty"));
    }

    let mut re = String::with_capacity(pattern.len() * 2 + 2);
    if !pattern.starts_with('*') {
        re.push('^');
    }

    let mut chars = pattern.chars().peekable();
    while let Some(c) = chars.next() {
        match c {
            '*' => re.push_str(".*"),
            '?' => re.push('.'),
            '[' => {
                re.push('[');
                if chars.peek() == Some(&'!') {
                    chars.next();
                    re.push('^');
                }
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    if matches!(inner, '\\' | '[' | '&' | '~') {
                        re.push('\\');
                    }
                    re.push(inner);
                }
                if !closed {
                    return Err(invalid("unclosed character class"));
                }
                re.push(']');
            }
            other => {
                let mut buf = [0u8; 4];
                re.push_str(&regex::escape(other.encode_utf8(&mut buf)));
            }
        }
    }

    if !pattern.ends_with('*') {
        re.push('$');
    }

    Regex::new(&re).map_err(|e| invalid(&e.to_string()))
}

/// Normalise a document path for matching: `/` separators, no leading `./` or `/`.
#[must_use]
pub fn normalize_path(path: &str) -> String {
    let path = path.replace('\\', "/");
    let mut trimmed = path.as_str();
    loop {
        if let Some(rest) = trimmed.strip_prefix("./") {
            trimmed = rest;
        } else if let Some(rest) = trimmed.strip_prefix('/') {
            trimmed = rest;
        } else {
            break;
        }
    }
    trimmed.to_string()
}

/// Decides whether a document path is in scope for tracking.
///
/// Patterns are compiled when rules change, never per lookup.
#[derive(Debug, Clone, Default)]
pub struct PathFilter {
    include: Vec<CompiledPattern>,
    exclude: Vec<CompiledPattern>,
}

impl PathFilter {
    /// A filter with no rules: every path is tracked.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// # Errors
    ///
    /// Returns [`TallyError::FilterConfig`] for the first malformed pattern.
    pub fn from_rules(rules: &FilterRules) -> Result<Self> {
        Ok(Self {
            include: compile_all(&rules.include_patterns)?,
            exclude: compile_all(&rules.exclude_patterns)?,
        })
    }

    #[must_use]
    pub fn should_track(&self, path: &str) -> bool {
        let path = normalize_path(path);
        if self.exclude.iter().any(|p| p.regex.is_match(&path)) {
            return false;
        }
        self.include.is_empty() || self.include.iter().any(|p| p.regex.is_match(&path))
    }

    /// Same answer as [`PathFilter::should_track`].
    #[must_use]
    pub fn is_within_scope(&self, path: &str) -> bool {
        self.should_track(path)
    }

    /// Replace all rules. On error the previous rules stay in effect.
    ///
    /// # Errors
    ///
    /// Returns [`TallyError::FilterConfig`] for the first malformed pattern.
    pub fn update_from_rules(&mut self, rules: &FilterRules) -> Result<()> {
        *self = Self::from_rules(rules)?;
        Ok(())
    }

    /// # Errors
    ///
    /// Returns [`TallyError::FilterConfig`] if the pattern is malformed.
    pub fn add_include(&mut self, pattern: &str) -> Result<()> {
        add_pattern(&mut self.include, pattern)
    }

    /// # Errors
    ///
    /// Returns [`TallyError::FilterConfig`] if the pattern is malformed.
    pub fn add_exclude(&mut self, pattern: &str) -> Result<()> {
        add_pattern(&mut self.exclude, pattern)
    }

    /// Returns whether the pattern was present.
    pub fn remove_include(&mut self, pattern: &str) -> bool {
        remove_pattern(&mut self.include, pattern)
    }

    /// Returns whether the pattern was present.
    pub fn remove_exclude(&mut self, pattern: &str) -> bool {
        remove_pattern(&mut self.exclude, pattern)
    }

    /// Current rules in insertion order.
    #[must_use]
    pub fn rules(&self) -> FilterRules {
        FilterRules {
            include_patterns: self.include.iter().map(|p| p.source.clone()).collect(),
            exclude_patterns: self.exclude.iter().map(|p| p.source.clone()).collect(),
        }
    }
}

fn compile_all(patterns: &[String]) -> Result<Vec<CompiledPattern>> {
    let mut compiled: Vec<CompiledPattern> = Vec::with_capacity(patterns.len());
    for pattern in patterns {
        let pattern = pattern.trim();
        if compiled.iter().any(|p| p.source == pattern) {
            continue;
        }
        compiled.push(CompiledPattern::compile(pattern)?);
    }
    Ok(compiled)
}

fn add_pattern(list: &mut Vec<CompiledPattern>, pattern: &str) -> Result<()> {
    let pattern = pattern.trim();
    if list.iter().any(|p| p.source == pattern) {
        return Ok(());
    }
    list.push(CompiledPattern::compile(pattern)?);
    Ok(())
}

fn remove_pattern(list: &mut Vec<CompiledPattern>, pattern: &str) -> bool {
    let pattern = pattern.trim();
    let before = list.len();
    list.retain(|p| p.source != pattern);
    list.len() != before
}
