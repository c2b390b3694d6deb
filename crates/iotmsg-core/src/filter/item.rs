//! Single-field comparison predicates.
//!
//! A [`FilterItem`] pairs a [`CompareOp`] with match text and a
//! case-sensitivity flag.  `value1` is always the message field under test
//! and `value2` the filter's match text, so `Contains` asks "does the field
//! contain the match text?" while `In` asks the reverse: "does the field occur
//! inside the match text?".
//!
//! Case-insensitive comparisons fold ASCII letters only.  The admin and wire
//! surfaces are ASCII, and ASCII folding never changes byte lengths, which
//! keeps the offsets used by [`FilterItem::strip_match`] exact.

use std::fmt;
use std::ops::Range;
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Comparison operator of a [`FilterItem`].
///
/// Serialized as its snake_case name; deserialization goes through
/// [`FromStr`] so configuration files may also write `"!contains"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum CompareOp {
    Equals,
    NotEquals,
    Contains,
    NotContains,
    StartsWith,
    NotStartsWith,
    EndsWith,
    NotEndsWith,
    /// `value1` occurs inside `value2`.
    In,
    NotIn,
    AlwaysTrue,
    /// The default: a filter that was never configured is inactive.
    #[default]
    AlwaysFalse,
}

impl CompareOp {
    /// All operators, in declaration order.
    pub const ALL: [CompareOp; 12] = [
        CompareOp::Equals,
        CompareOp::NotEquals,
        CompareOp::Contains,
        CompareOp::NotContains,
        CompareOp::StartsWith,
        CompareOp::NotStartsWith,
        CompareOp::EndsWith,
        CompareOp::NotEndsWith,
        CompareOp::In,
        CompareOp::NotIn,
        CompareOp::AlwaysTrue,
        CompareOp::AlwaysFalse,
    ];

    /// Returns the operator with the opposite result.
    pub fn negated(self) -> CompareOp {
        use CompareOp::*;
        match self {
            Equals => NotEquals,
            NotEquals => Equals,
            Contains => NotContains,
            NotContains => Contains,
            StartsWith => NotStartsWith,
            NotStartsWith => StartsWith,
            EndsWith => NotEndsWith,
            NotEndsWith => EndsWith,
            In => NotIn,
            NotIn => In,
            AlwaysTrue => AlwaysFalse,
            AlwaysFalse => AlwaysTrue,
        }
    }

    /// `true` for the `Not*` variants.
    pub fn is_negation(self) -> bool {
        use CompareOp::*;
        matches!(
            self,
            NotEquals | NotContains | NotStartsWith | NotEndsWith | NotIn
        )
    }

    fn name(self) -> &'static str {
        use CompareOp::*;
        match self {
            Equals => "equals",
            NotEquals => "not_equals",
            Contains => "contains",
            NotContains => "not_contains",
            StartsWith => "starts_with",
            NotStartsWith => "not_starts_with",
            EndsWith => "ends_with",
            NotEndsWith => "not_ends_with",
            In => "in",
            NotIn => "not_in",
            AlwaysTrue => "always_true",
            AlwaysFalse => "always_false",
        }
    }
}

impl fmt::Display for CompareOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Returned when an operator name cannot be parsed.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("unknown comparison operator: {0:?}")]
pub struct UnknownCompareOp(pub String);

impl FromStr for CompareOp {
    type Err = UnknownCompareOp;

    /// Accepts the snake_case names, with or without separators and in any
    /// case, plus a leading `!` as shorthand for the `not_` form.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (negate, body) = match s.trim().strip_prefix('!') {
            Some(rest) => (true, rest),
            None => (false, s.trim()),
        };
        let key: String = body
            .chars()
            .filter(|c| *c != '_' && *c != '-')
            .map(|c| c.to_ascii_lowercase())
            .collect();

        let op = CompareOp::ALL
            .into_iter()
            .find(|op| op.name().replace('_', "") == key)
            .ok_or_else(|| UnknownCompareOp(s.to_string()))?;

        Ok(if negate { op.negated() } else { op })
    }
}

impl Serialize for CompareOp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for CompareOp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        name.parse().map_err(serde::de::Error::custom)
    }
}

/// Evaluates `op` with `value1` as the tested field and `value2` as the match
/// text.
///
/// # Examples
///
/// ```rust
/// use iotmsg_core::filter::{compare, CompareOp};
///
/// assert!(compare(CompareOp::StartsWith, "led on", "led", false));
/// assert!(compare(CompareOp::In, "on", "on|off", false));
/// assert!(compare(CompareOp::NotEquals, "A", "a", false));
/// assert!(!compare(CompareOp::NotEquals, "A", "a", true));
/// ```
pub fn compare(op: CompareOp, value1: &str, value2: &str, ignore_case: bool) -> bool {
    use CompareOp::*;
    match op {
        AlwaysTrue => true,
        AlwaysFalse => false,
        Equals => text_eq(value1, value2, ignore_case),
        Contains => find(value1, value2, ignore_case).is_some(),
        StartsWith => prefix_len(value1, value2, ignore_case).is_some(),
        EndsWith => suffix_start(value1, value2, ignore_case).is_some(),
        In => find(value2, value1, ignore_case).is_some(),
        NotEquals | NotContains | NotStartsWith | NotEndsWith | NotIn => {
            !compare(op.negated(), value1, value2, ignore_case)
        }
    }
}

/// A single comparison against one message field.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FilterItem {
    pub op: CompareOp,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub ignore_case: bool,
}

impl FilterItem {
    pub fn new(op: CompareOp, text: impl Into<String>, ignore_case: bool) -> Self {
        Self {
            op,
            text: text.into(),
            ignore_case,
        }
    }

    /// An inactive filter (`AlwaysFalse`, empty text).
    pub fn inactive() -> Self {
        Self::default()
    }

    /// A filter is inactive when its operator is `AlwaysFalse` or it has no
    /// match text.  Inactive filters are skipped during evaluation.
    pub fn is_active(&self) -> bool {
        self.op != CompareOp::AlwaysFalse && !self.text.is_empty()
    }

    /// Evaluates the operator against `value`.
    pub fn evaluate(&self, value: &str) -> bool {
        compare(self.op, value, &self.text, self.ignore_case)
    }

    /// Removes the part of `value` this filter matched and trims the rest.
    ///
    /// Only the positive operators that identify a concrete span (`Equals`,
    /// `Contains`, `StartsWith`, `EndsWith`) strip anything; for every other
    /// operator, or if `value` does not actually match, `value` is returned
    /// unchanged.
    pub fn strip_match(&self, value: &str) -> String {
        let span = self.matched_span(value);
        match span.and_then(|r| Some((value.get(..r.start)?, value.get(r.end..)?))) {
            Some((head, tail)) => {
                let mut out = String::with_capacity(head.len() + tail.len());
                out.push_str(head);
                out.push_str(tail);
                out.trim().to_string()
            }
            None => value.to_string(),
        }
    }

    fn matched_span(&self, value: &str) -> Option<Range<usize>> {
        let ic = self.ignore_case;
        match self.op {
            CompareOp::Equals if text_eq(value, &self.text, ic) => Some(0..value.len()),
            CompareOp::StartsWith => prefix_len(value, &self.text, ic).map(|n| 0..n),
            CompareOp::EndsWith => suffix_start(value, &self.text, ic).map(|s| s..value.len()),
            CompareOp::Contains => find(value, &self.text, ic).map(|s| s..s + self.text.len()),
            _ => None,
        }
    }
}

// ── ASCII-folding string helpers ──────────────────────────────────────────────

fn text_eq(a: &str, b: &str, ignore_case: bool) -> bool {
    if ignore_case {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

fn prefix_len(hay: &str, needle: &str, ignore_case: bool) -> Option<usize> {
    let head = hay.as_bytes().get(..needle.len())?;
    bytes_eq(head, needle.as_bytes(), ignore_case).then_some(needle.len())
}

fn suffix_start(hay: &str, needle: &str, ignore_case: bool) -> Option<usize> {
    let start = hay.len().checked_sub(needle.len())?;
    bytes_eq(&hay.as_bytes()[start..], needle.as_bytes(), ignore_case).then_some(start)
}

fn find(hay: &str, needle: &str, ignore_case: bool) -> Option<usize> {
    if !ignore_case {
        return hay.find(needle);
    }
    if needle.is_empty() {
        return Some(0);
    }
    hay.as_bytes()
        .windows(needle.len())
        .position(|w| w.eq_ignore_ascii_case(needle.as_bytes()))
}

fn bytes_eq(a: &[u8], b: &[u8], ignore_case: bool) -> bool {
    if ignore_case {
        a.eq_ignore_ascii_case(b)
    } else {
        a == b
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_equals_active_filter_matches_exact_text() {
        let item = FilterItem::new(CompareOp::Equals, "X", false);
        assert!(item.evaluate("X"));
        assert!(!item.evaluate("x"));
    }

    #[test]
    fn test_equals_lowercase_depends_only_on_ignore_case() {
        let sensitive = FilterItem::new(CompareOp::Equals, "X", false);
        let insensitive = FilterItem::new(CompareOp::Equals, "X", true);
        assert!(!sensitive.evaluate("x"));
        assert!(insensitive.evaluate("x"));
    }

    #[test]
    fn test_every_negation_inverts_its_positive_operator() {
        let positives = [
            CompareOp::Equals,
            CompareOp::Contains,
            CompareOp::StartsWith,
            CompareOp::EndsWith,
            CompareOp::In,
        ];
        let samples = [("abc", "abc"), ("abc", "b"), ("ABC", "ab"), ("", "x"), ("b", "abc")];
        for op in positives {
            for (v1, v2) in samples {
                for ic in [false, true] {
                    assert_eq!(
                        compare(op.negated(), v1, v2, ic),
                        !compare(op, v1, v2, ic),
                        "{op} on ({v1:?}, {v2:?}) ignore_case={ic}"
                    );
                }
            }
        }
    }

    #[test]
    fn test_in_is_reversed_containment() {
        assert!(compare(CompareOp::In, "on", "on,off", false));
        assert!(!compare(CompareOp::Contains, "on", "on,off", false));
        assert!(compare(CompareOp::In, "OFF", "on,off", true));
    }

    #[test]
    fn test_always_ops_ignore_arguments() {
        assert!(compare(CompareOp::AlwaysTrue, "", "zzz", false));
        assert!(!compare(CompareOp::AlwaysFalse, "zzz", "zzz", true));
    }

    #[test]
    fn test_case_insensitive_prefix_and_suffix() {
        assert!(compare(CompareOp::StartsWith, "LED on", "led", true));
        assert!(compare(CompareOp::EndsWith, "switch ON", "on", true));
        assert!(!compare(CompareOp::EndsWith, "on", "switch on", true));
    }

    #[test]
    fn test_inactive_when_always_false_or_empty_text() {
        assert!(!FilterItem::inactive().is_active());
        assert!(!FilterItem::new(CompareOp::AlwaysFalse, "x", false).is_active());
        assert!(!FilterItem::new(CompareOp::Contains, "", false).is_active());
        assert!(!FilterItem::new(CompareOp::AlwaysTrue, "", false).is_active());
        assert!(FilterItem::new(CompareOp::AlwaysTrue, "*", false).is_active());
    }

    #[test]
    fn test_strip_match_removes_prefix_and_trims() {
        let item = FilterItem::new(CompareOp::StartsWith, "CMD", true);
        assert_eq!(item.strip_match("cmd   led on "), "led on");
    }

    #[test]
    fn test_strip_match_removes_first_contained_occurrence() {
        let item = FilterItem::new(CompareOp::Contains, "please", false);
        assert_eq!(item.strip_match("reboot please now please"), "reboot  now please");
    }

    #[test]
    fn test_strip_match_removes_suffix() {
        let item = FilterItem::new(CompareOp::EndsWith, "!", false);
        assert_eq!(item.strip_match("go!"), "go");
    }

    #[test]
    fn test_strip_match_leaves_text_for_negated_ops() {
        let item = FilterItem::new(CompareOp::NotContains, "x", false);
        assert_eq!(item.strip_match(" keep me "), " keep me ");
    }

    #[test]
    fn test_strip_match_equals_empties_text() {
        let item = FilterItem::new(CompareOp::Equals, "status", true);
        assert_eq!(item.strip_match("STATUS"), "");
    }

    #[test]
    fn test_compare_op_parses_names_and_bang_prefix() {
        assert_eq!("starts_with".parse(), Ok(CompareOp::StartsWith));
        assert_eq!("StartsWith".parse(), Ok(CompareOp::StartsWith));
        assert_eq!("!contains".parse(), Ok(CompareOp::NotContains));
        assert_eq!("not-in".parse(), Ok(CompareOp::NotIn));
        assert!("sometimes".parse::<CompareOp>().is_err());
    }

    #[test]
    fn test_compare_op_display_round_trips_through_from_str() {
        for op in CompareOp::ALL {
            assert_eq!(op.to_string().parse(), Ok(op));
        }
    }
}
