//! Predicates deciding whether a route accepts a message.

pub mod item;
pub mod set;

pub use item::{compare, CompareOp, FilterItem, UnknownCompareOp};
pub use set::{FilterSet, FilterSlot};
