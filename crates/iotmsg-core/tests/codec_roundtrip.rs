//! Integration tests for the iotmsg-core codec and filters.
//!
//! These tests go through the public API only, exercising the codec, the
//! filter predicates and the bounded queue together the way the router uses
//! them: decode a received line, decide whether a route accepts it, queue the
//! accepted copy, re-encode it for transmission.

use iotmsg_core::{
    decode_message, encode_wire_text, BoundedQueue, CompareOp, FilterItem, FilterSet, FilterSlot,
    Message, MessageFormat,
};

fn roundtrip(msg: &Message) -> Message {
    let wire = encode_wire_text(msg).expect("encode must succeed");
    decode_message(&wire)
}

#[test]
fn test_framed_round_trip_preserves_type_from_to_and_text() {
    // Arrange
    let original = Message::framed("set level 3")
        .with_type("cmd")
        .with_from("hub/serial0")
        .with_to("dimmer-1");

    // Act
    let decoded = roundtrip(&original);

    // Assert
    assert_eq!(decoded.format(), MessageFormat::Framed);
    assert_eq!(decoded.message_type(), original.message_type());
    assert_eq!(decoded.from_path(), original.from_path());
    assert_eq!(decoded.to_path(), original.to_path());
    assert_eq!(decoded.text(), original.text());
}

#[test]
fn test_framed_round_trip_keeps_distinct_return_path() {
    let original = Message::framed("ack")
        .with_type("rsp")
        .with_from("a")
        .with_to("b")
        .with_return("c");
    assert_eq!(roundtrip(&original), original);
}

#[test]
fn test_scenario_decode_and_reencode_framed_line() {
    // Arrange
    let line = "[from=dev1 to=dev2] turn on";

    // Act
    let mut msg = decode_message(line);

    // Assert
    assert_eq!(msg.format(), MessageFormat::Framed);
    assert_eq!(msg.from_path(), "dev1");
    assert_eq!(msg.to_path(), "dev2");
    assert_eq!(msg.text(), "turn on");
    assert_eq!(msg.encode().expect("encode"), line);
}

#[test]
fn test_scenario_decode_plain_line() {
    let msg = decode_message("hello world");
    assert_eq!(msg.format(), MessageFormat::Plain);
    assert_eq!(msg.text(), "hello world");
}

#[test]
fn test_encode_is_idempotent_until_a_field_changes() {
    let mut msg = decode_message("[type=evt from=door] opened");
    let first = msg.encode().expect("encode").to_string();
    let second = msg.encode().expect("encode").to_string();
    assert_eq!(first, second);

    msg.set_to_path("alarm");
    assert_eq!(msg.wire_text(), None, "mutation must invalidate the cached wire text");
    assert_eq!(msg.encode().expect("encode"), "[type=evt from=door to=alarm] opened");
}

#[test]
fn test_prefix_filter_selects_cleans_and_queues_plain_command() {
    // Arrange
    let set = FilterSet::new().with(
        FilterSlot::Text,
        FilterItem::new(CompareOp::StartsWith, "relay", true),
    );
    let mut buffer = BoundedQueue::new("relay-commands", 2);

    // Act
    for line in ["RELAY 1 on", "fan off", "relay 2 off", "relay 3 on"] {
        if let Some(accepted) = set.accept(&decode_message(line)) {
            let _ = buffer.push(accepted);
        }
    }

    // Assert: third matching line was rejected by the full buffer
    let texts: Vec<String> = std::iter::from_fn(|| buffer.pop())
        .map(|m| m.text().to_string())
        .collect();
    assert_eq!(texts, vec!["1 on".to_string(), "2 off".to_string()]);
}

#[test]
fn test_framed_filter_routes_on_destination() {
    let set = FilterSet::new().with(
        FilterSlot::To,
        FilterItem::new(CompareOp::Equals, "lamp", true),
    );
    assert!(set.matches(&decode_message("[to=LAMP] on")));
    assert!(!set.matches(&decode_message("[to=fan] on")));
    assert!(!set.matches(&decode_message("lamp on")), "plain text has no destination");
}
