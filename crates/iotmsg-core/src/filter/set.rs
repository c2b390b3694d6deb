//! Six-slot filter sets evaluated against whole messages.
//!
//! Evaluation depends on the message format:
//!
//! - **Plain** messages only carry text, so only the `text` slot is
//!   evaluated.  When it accepts, the matched part is stripped from the
//!   routed copy, which lets a prefix filter such as `starts_with "led"` both
//!   select and clean a command line.
//! - **Framed** messages are tested slot by slot: `from`, `return`, `body`
//!   and `text` (both against the text), `to` and `type`.  Every active slot
//!   must accept.
//!
//! Inactive slots are vacuously true, but a set whose six slots are all
//! inactive accepts nothing.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::filter::item::FilterItem;
use crate::protocol::message::{Message, MessageFormat};

/// Names one of the six slots of a [`FilterSet`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FilterSlot {
    Body,
    From,
    Return,
    To,
    Type,
    Text,
}

impl FilterSlot {
    pub const ALL: [FilterSlot; 6] = [
        FilterSlot::Body,
        FilterSlot::From,
        FilterSlot::Return,
        FilterSlot::To,
        FilterSlot::Type,
        FilterSlot::Text,
    ];

    fn name(self) -> &'static str {
        match self {
            FilterSlot::Body => "body",
            FilterSlot::From => "from",
            FilterSlot::Return => "return",
            FilterSlot::To => "to",
            FilterSlot::Type => "type",
            FilterSlot::Text => "text",
        }
    }
}

impl fmt::Display for FilterSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for FilterSlot {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        FilterSlot::ALL
            .into_iter()
            .find(|slot| slot.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| format!("unknown filter slot: {s:?}"))
    }
}

/// Per-field filters deciding whether a route accepts a message.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterSet {
    pub body: FilterItem,
    pub from: FilterItem,
    #[serde(rename = "return")]
    pub return_path: FilterItem,
    pub to: FilterItem,
    #[serde(rename = "type")]
    pub message_type: FilterItem,
    pub text: FilterItem,
}

impl FilterSet {
    /// A set with every slot inactive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder: replaces one slot.
    ///
    /// # Examples
    ///
    /// ```rust
    /// use iotmsg_core::filter::{CompareOp, FilterItem, FilterSet, FilterSlot};
    ///
    /// let set = FilterSet::new()
    ///     .with(FilterSlot::Text, FilterItem::new(CompareOp::StartsWith, "led", true));
    /// assert!(set.is_active());
    /// ```
    pub fn with(mut self, slot: FilterSlot, item: FilterItem) -> Self {
        *self.slot_mut(slot) = item;
        self
    }

    pub fn slot(&self, slot: FilterSlot) -> &FilterItem {
        match slot {
            FilterSlot::Body => &self.body,
            FilterSlot::From => &self.from,
            FilterSlot::Return => &self.return_path,
            FilterSlot::To => &self.to,
            FilterSlot::Type => &self.message_type,
            FilterSlot::Text => &self.text,
        }
    }

    pub fn slot_mut(&mut self, slot: FilterSlot) -> &mut FilterItem {
        match slot {
            FilterSlot::Body => &mut self.body,
            FilterSlot::From => &mut self.from,
            FilterSlot::Return => &mut self.return_path,
            FilterSlot::To => &mut self.to,
            FilterSlot::Type => &mut self.message_type,
            FilterSlot::Text => &mut self.text,
        }
    }

    /// `true` if at least one slot is active.
    pub fn is_active(&self) -> bool {
        FilterSlot::ALL.iter().any(|s| self.slot(*s).is_active())
    }

    /// Returns `true` if the set accepts `msg`.
    pub fn matches(&self, msg: &Message) -> bool {
        if !self.is_active() {
            return false;
        }
        match msg.format() {
            MessageFormat::Plain => passes(&self.text, msg.text()),
            MessageFormat::Framed => {
                passes(&self.from, msg.from_path())
                    && passes(&self.return_path, msg.return_path())
                    && passes(&self.body, msg.text())
                    && passes(&self.text, msg.text())
                    && passes(&self.to, msg.to_path())
                    && passes(&self.message_type, msg.message_type())
            }
        }
    }

    /// Evaluates the set and, on acceptance, returns the copy of `msg` that
    /// should be delivered: for Plain messages the text slot's match is
    /// stripped, Framed messages are delivered unchanged.
    pub fn accept(&self, msg: &Message) -> Option<Message> {
        if !self.matches(msg) {
            return None;
        }
        let mut routed = msg.clone();
        if msg.format() == MessageFormat::Plain && self.text.is_active() {
            routed.set_text(self.text.strip_match(msg.text()));
        }
        Some(routed)
    }
}

fn passes(item: &FilterItem, value: &str) -> bool {
    !item.is_active() || item.evaluate(value)
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::filter::item::CompareOp;

    fn item(op: CompareOp, text: &str) -> FilterItem {
        FilterItem::new(op, text, false)
    }

    #[test]
    fn test_inactive_set_accepts_nothing() {
        let set = FilterSet::new();
        assert!(!set.matches(&Message::plain("anything")));
        assert!(!set.matches(&Message::framed("anything").with_from("a")));
    }

    #[test]
    fn test_plain_only_evaluates_text_slot() {
        // Arrange: a from filter that a plain message could never satisfy
        let set = FilterSet::new()
            .with(FilterSlot::Text, item(CompareOp::StartsWith, "led"))
            .with(FilterSlot::From, item(CompareOp::Equals, "dev9"));

        // Act / Assert
        assert!(set.matches(&Message::plain("led on")));
        assert!(!set.matches(&Message::plain("fan on")));
    }

    #[test]
    fn test_plain_accept_strips_matched_prefix() {
        let set = FilterSet::new().with(
            FilterSlot::Text,
            FilterItem::new(CompareOp::StartsWith, "LED", true),
        );
        let routed = set.accept(&Message::plain("led   on")).unwrap();
        assert_eq!(routed.text(), "on");
    }

    #[test]
    fn test_plain_with_inactive_text_slot_is_vacuously_accepted() {
        let set = FilterSet::new().with(FilterSlot::To, item(CompareOp::Equals, "x"));
        let routed = set.accept(&Message::plain(" as is ")).unwrap();
        assert_eq!(routed.text(), " as is ");
    }

    #[test]
    fn test_framed_requires_every_active_slot() {
        // Arrange
        let set = FilterSet::new()
            .with(FilterSlot::From, item(CompareOp::Equals, "dev1"))
            .with(FilterSlot::Type, item(CompareOp::In, "cmd,req"));

        // Act / Assert
        let good = Message::framed("x").with_from("dev1").with_type("cmd");
        let wrong_type = Message::framed("x").with_from("dev1").with_type("evt");
        let wrong_from = Message::framed("x").with_from("dev2").with_type("cmd");
        assert!(set.matches(&good));
        assert!(!set.matches(&wrong_type));
        assert!(!set.matches(&wrong_from));
    }

    #[test]
    fn test_framed_body_slot_tests_text_and_does_not_strip() {
        let set = FilterSet::new().with(FilterSlot::Body, item(CompareOp::Contains, "on"));
        let msg = Message::framed("turn on").with_to("lamp");
        let routed = set.accept(&msg).unwrap();
        assert_eq!(routed.text(), "turn on");
    }

    #[test]
    fn test_framed_text_slot_is_checked_against_text() {
        // Arrange: a plain-style prefix route
        let set = FilterSet::new().with(FilterSlot::Text, item(CompareOp::StartsWith, "relay"));

        // Act / Assert
        assert!(!set.matches(&Message::framed("lamp on").with_to("lamp")));
        let routed = set
            .accept(&Message::framed("relay 1 on").with_to("hub"))
            .unwrap();
        assert_eq!(routed.text(), "relay 1 on", "framed text is never stripped");
    }

    #[test]
    fn test_framed_return_slot_checks_return_path() {
        let set = FilterSet::new().with(FilterSlot::Return, item(CompareOp::NotEquals, ""));
        // NotEquals "" is inactive because the match text is empty.
        assert!(!set.is_active());

        let set = FilterSet::new().with(FilterSlot::Return, item(CompareOp::Equals, "hub"));
        assert!(set.matches(&Message::framed("x").with_return("hub")));
        assert!(!set.matches(&Message::framed("x")));
    }

    #[test]
    fn test_slot_names_parse_case_insensitively() {
        assert_eq!("RETURN".parse(), Ok(FilterSlot::Return));
        assert_eq!("type".parse(), Ok(FilterSlot::Type));
        assert!("header".parse::<FilterSlot>().is_err());
    }

    #[test]
    fn test_filter_set_deserializes_from_toml() {
        // Arrange
        let toml_str = r#"
[text]
op = "starts_with"
text = "led"
ignore_case = true

[type]
op = "!equals"
text = "evt"
"#;

        // Act
        let set: FilterSet = toml::from_str(toml_str).expect("deserialize");

        // Assert
        assert_eq!(set.text, FilterItem::new(CompareOp::StartsWith, "led", true));
        assert!(set.from.op == CompareOp::AlwaysFalse);
        assert!(!set.from.is_active());
        assert!(set.message_type.is_active());
    }
}
