//! Choosing a subset of layers by position or by name pattern.
//!
//! A selection string is either a list of 1-based positions and inclusive
//! ranges (`"1,3-5"`) or a list of case-insensitive glob patterns
//! (`"conv*,*bias"`). Glob patterns understand `*`, `?`, `[abc]` and
//! `[!abc]`. Whatever order a selection lists things in, the selected layers
//! keep their collection order.
//!
//! # Example
//!
//! ```rust
//! use tensor_grid::{LayerSelection, Tensor, TensorCollection};
//!
//! # fn main() -> tensor_grid::Result<()> {
//! let tensors = TensorCollection::from_tensors([
//!     Tensor::from_vec("Conv1.weight", vec![1.0]),
//!     Tensor::from_vec("conv1.bias", vec![0.0]),
//!     Tensor::from_vec("fc.weight", vec![2.0]),
//! ])?;
//!
//! let by_name: LayerSelection = "conv*".parse()?;
//! assert_eq!(by_name.apply(&tensors)?.names(), vec!["Conv1.weight", "conv1.bias"]);
//!
//! let by_position: LayerSelection = "3,1".parse()?;
//! assert_eq!(by_position.apply(&tensors)?.names(), vec!["Conv1.weight", "fc.weight"]);
//! # Ok(())
//! # }
//! ```

use std::collections::HashSet;
use std::fmt;
use std::ops::RangeInclusive;
use std::str::FromStr;

use regex::Regex;

use crate::error::{GridError, Result};
use crate::tensor::TensorCollection;

/// A compiled, case-insensitive glob over layer names.
#[derive(Debug, Clone)]
pub struct GlobPattern {
    pattern: String,
    regex: Regex,
}

impl GlobPattern {
    /// Compile a glob pattern.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Selection`] if the pattern has a malformed
    /// character class.
    pub fn new(pattern: &str) -> Result<Self> {
        let regex = Regex::new(&glob_to_regex(pattern))
            .map_err(|e| GridError::Selection(format!("invalid pattern '{pattern}': {e}")))?;
        Ok(Self {
            pattern: pattern.to_string(),
            regex,
        })
    }

    /// Whether the whole name matches, ignoring case.
    #[must_use]
    pub fn matches(&self, name: &str) -> bool {
        self.regex.is_match(name)
    }

    /// The pattern as written.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.pattern
    }
}

fn glob_to_regex(pattern: &str) -> String {
    let mut source = String::from("(?i)^");
    let mut rest = pattern;
    while let Some(c) = rest.chars().next() {
        rest = &rest[c.len_utf8()..];
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            '[' => match rest.find(']') {
                Some(end) if end > 0 => {
                    let mut class = &rest[..end];
                    source.push('[');
                    if let Some(negated) = class.strip_prefix('!') {
                        source.push('^');
                        class = negated;
                    }
                    for member in class.chars() {
                        if matches!(member, '\\' | '[' | '^' | '&' | '~') {
                            source.push('\\');
                        }
                        source.push(member);
                    }
                    source.push(']');
                    rest = &rest[end + 1..];
                }
                _ => source.push_str(r"\["),
            },
            literal => source.push_str(&regex::escape(literal.encode_utf8(&mut [0; 4]))),
        }
    }
    source.push('$');
    source
}

/// A parsed layer selection.
#[derive(Debug, Clone)]
pub enum LayerSelection {
    /// 1-based inclusive position ranges. Positions past the end are ignored.
    Positions(Vec<RangeInclusive<usize>>),
    /// Glob patterns; a layer is kept if any pattern matches its name.
    Patterns(Vec<GlobPattern>),
}

impl LayerSelection {
    /// Parse a selection string.
    ///
    /// Strings made only of digits, commas, dashes and spaces are positions;
    /// anything else is a comma-separated list of glob patterns. Position
    /// entries that do not parse (`"3-"`, `"1-2-3"`) are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Selection`] for an empty string or a malformed
    /// glob pattern.
    pub fn parse(selection: &str) -> Result<Self> {
        let selection = selection.trim();
        if selection.is_empty() {
            return Err(GridError::Selection("empty layer selection".into()));
        }

        let positional = selection
            .chars()
            .all(|c| c.is_ascii_digit() || matches!(c, ',' | '-' | ' '));
        if positional {
            return Ok(Self::Positions(parse_positions(selection)));
        }

        let patterns = selection
            .split(',')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(GlobPattern::new)
            .collect::<Result<Vec<_>>>()?;
        Ok(Self::Patterns(patterns))
    }

    /// The layers this selection keeps, in collection order.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Selection`] if no layer is selected.
    pub fn apply(&self, tensors: &TensorCollection) -> Result<TensorCollection> {
        let selected = match self {
            Self::Positions(ranges) => tensors.select_by_positions(ranges),
            Self::Patterns(patterns) => {
                tensors.filtered(|t| patterns.iter().any(|p| p.matches(t.name())))
            }
        };
        if selected.is_empty() {
            return Err(GridError::Selection(format!("no layers match '{self}'")));
        }
        tracing::debug!("Selected {} of {} layer(s) with '{}'", selected.len(), tensors.len(), self);
        Ok(selected)
    }
}

fn parse_positions(selection: &str) -> Vec<RangeInclusive<usize>> {
    let mut ranges = Vec::new();
    for part in selection.split(',').map(str::trim).filter(|p| !p.is_empty()) {
        match part.split_once('-') {
            Some((start, end)) => {
                if let (Ok(start), Ok(end)) = (start.trim().parse::<usize>(), end.trim().parse::<usize>()) {
                    ranges.push(start..=end);
                }
            }
            None => {
                if let Ok(position) = part.parse::<usize>() {
                    ranges.push(position..=position);
                }
            }
        }
    }
    ranges
}

impl FromStr for LayerSelection {
    type Err = GridError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl fmt::Display for LayerSelection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let parts: Vec<String> = match self {
            Self::Positions(ranges) => ranges
                .iter()
                .map(|r| {
                    if r.start() == r.end() {
                        r.start().to_string()
                    } else {
                        format!("{}-{}", r.start(), r.end())
                    }
                })
                .collect(),
            Self::Patterns(patterns) => patterns.iter().map(|p| p.as_str().to_string()).collect(),
        };
        f.write_str(&parts.join(","))
    }
}

impl TensorCollection {
    /// Layers whose 1-based position falls in any of `ranges`.
    #[must_use]
    pub fn select_by_positions(&self, ranges: &[RangeInclusive<usize>]) -> Self {
        let keep: HashSet<&str> = self
            .iter()
            .enumerate()
            .filter(|(i, _)| ranges.iter().any(|r| r.contains(&(i + 1))))
            .map(|(_, t)| t.name())
            .collect();
        self.filtered(|t| keep.contains(t.name()))
    }

    /// Layers whose name matches any of the glob `patterns`, ignoring case.
    ///
    /// # Errors
    ///
    /// Returns [`GridError::Selection`] if a pattern is malformed.
    pub fn select_by_patterns(&self, patterns: &[&str]) -> Result<Self> {
        let globs = patterns
            .iter()
            .map(|p| GlobPattern::new(p))
            .collect::<Result<Vec<_>>>()?;
        Ok(self.filtered(|t| globs.iter().any(|g| g.matches(t.name()))))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tensor::Tensor;

    fn model() -> TensorCollection {
        TensorCollection::from_tensors(
            ["conv1.weight", "conv1.bias", "FC.weight", "fc.bias", "head"]
                .into_iter()
                .map(|name| Tensor::from_vec(name, vec![1.0])),
        )
        .unwrap()
    }

    #[test]
    fn test_glob_wildcards() {
        let glob = GlobPattern::new("conv?.*").unwrap();
        assert!(glob.matches("conv1.weight"));
        assert!(glob.matches("CONV2.bias"));
        assert!(!glob.matches("conv12.weight"));
        assert!(!glob.matches("xconv1.weight"));
    }

    #[test]
    fn test_glob_literal_dots() {
        let glob = GlobPattern::new("fc.weight").unwrap();
        assert!(glob.matches("FC.weight"));
        assert!(!glob.matches("fcXweight"));
    }

    #[test]
    fn test_glob_character_classes() {
        let glob = GlobPattern::new("layer[0-2].*").unwrap();
        assert!(glob.matches("layer1.weight"));
        assert!(!glob.matches("layer3.weight"));

        let negated = GlobPattern::new("layer[!0].*").unwrap();
        assert!(negated.matches("layer7.bias"));
        assert!(!negated.matches("layer0.bias"));

        let unclosed = GlobPattern::new("odd[name").unwrap();
        assert!(unclosed.matches("odd[name"));
    }

    #[test]
    fn test_patterns_keep_collection_order() {
        let selection: LayerSelection = "*bias, conv*".parse().unwrap();
        let selected = selection.apply(&model()).unwrap();
        assert_eq!(selected.names(), vec!["conv1.weight", "conv1.bias", "fc.bias"]);
    }

    #[test]
    fn test_positions_and_ranges() {
        let selection = LayerSelection::parse("1,3-4").unwrap();
        let selected = selection.apply(&model()).unwrap();
        assert_eq!(selected.names(), vec!["conv1.weight", "FC.weight", "fc.bias"]);
        assert_eq!(selection.to_string(), "1,3-4");
    }

    #[test]
    fn test_positions_out_of_range_and_malformed_are_ignored() {
        let selection = LayerSelection::parse("0, 5, 9-12, 2-, 1-2-3").unwrap();
        assert_eq!(selection.apply(&model()).unwrap().names(), vec!["head"]);
    }

    #[test]
    fn test_huge_range_does_not_allocate() {
        let selection = LayerSelection::parse("4-18446744073709551615").unwrap();
        assert_eq!(selection.apply(&model()).unwrap().names(), vec!["fc.bias", "head"]);
    }

    #[test]
    fn test_no_match_is_an_error() {
        let err = LayerSelection::parse("attn*").unwrap().apply(&model()).unwrap_err();
        assert!(matches!(err, GridError::Selection(_)));
        assert!(err.to_string().contains("attn*"));

        assert!(LayerSelection::parse("7").unwrap().apply(&model()).is_err());
        assert!(LayerSelection::parse("  ").is_err());
    }

    #[test]
    fn test_collection_select_by_patterns() {
        let selected = model().select_by_patterns(&["fc*"]).unwrap();
        assert_eq!(selected.names(), vec!["FC.weight", "fc.bias"]);
        assert!(model().select_by_patterns(&["nothing"]).unwrap().is_empty());
    }
}
