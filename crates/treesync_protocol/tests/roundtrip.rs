//! Every message kind survives a trip through a frame.

use proptest::prelude::*;
use serde_json::json;
use treesync_core::{MergeMap, Node, Operation, Path, Priority, QueryFilter, QuerySpec};
use treesync_protocol::{FrameDecode, FrameEncode, InboundMessage, OutboundMessage, RevertReason};

fn path(s: &str) -> Path {
    Path::parse(s).unwrap()
}

fn node(value: serde_json::Value) -> Node {
    Node::from_json(&value).unwrap()
}

fn merge() -> MergeMap {
    let mut merge = MergeMap::new();
    merge.insert(path("a"), Node::from(1));
    merge.insert(path("b/c"), Node::server_timestamp());
    merge.insert(path("gone"), Node::empty());
    merge
}

fn outbound_messages() -> Vec<OutboundMessage> {
    let query = QuerySpec::new(path("/rooms/1"), QueryFilter::new("orderByChild=ts&limitToLast=10"));
    vec![
        OutboundMessage::Listen {
            query: query.clone(),
        },
        OutboundMessage::Unlisten {
            query: QuerySpec::default_at(Path::root()),
        },
        OutboundMessage::Write {
            write_id: 7,
            path: path("/rooms/1/title"),
            operation: Operation::Set(node(json!({".value": "hi", ".priority": 2}))),
            precondition: None,
        },
        OutboundMessage::Write {
            write_id: 8,
            path: path("/counters/x"),
            operation: Operation::Set(Node::from(3)),
            precondition: Some(Node::from(2).hash()),
        },
        OutboundMessage::Write {
            write_id: 9,
            path: path("/rooms/1"),
            operation: Operation::Merge(merge()),
            precondition: None,
        },
        OutboundMessage::Write {
            write_id: 10,
            path: path("/rooms/1"),
            operation: Operation::SetPriority(Priority::string("top")),
            precondition: None,
        },
        OutboundMessage::OnDisconnect {
            path: path("/presence/me"),
            operation: Operation::remove(),
        },
        OutboundMessage::CancelOnDisconnect {
            path: path("/presence"),
        },
    ]
}

fn inbound_messages() -> Vec<InboundMessage> {
    vec![
        InboundMessage::Connected,
        InboundMessage::Disconnected,
        InboundMessage::ServerUpdate {
            path: path("/rooms"),
            node: node(json!({"1": {"title": "a"}, "2": {"title": "b", ".priority": 1.5}})),
        },
        InboundMessage::ServerMerge {
            path: path("/rooms/1"),
            merge: merge(),
        },
        InboundMessage::QueryUpdate {
            query: QuerySpec::new(path("/rooms"), QueryFilter::new("limitToLast=1")),
            node: node(json!({"2": {"title": "b"}})),
        },
        InboundMessage::QueryMerge {
            query: QuerySpec::new(path("/rooms"), QueryFilter::new("limitToLast=1")),
            merge: merge(),
        },
        InboundMessage::ListenComplete {
            query: QuerySpec::default_at(path("/rooms")),
        },
        InboundMessage::ListenRevoked {
            query: QuerySpec::new(path("/secret"), QueryFilter::new("limitToFirst=1")),
            reason: "permission_denied".into(),
        },
        InboundMessage::Ack {
            write_id: 3,
            server_time: Some(1_700_000_000_123.0),
        },
        InboundMessage::Ack {
            write_id: 4,
            server_time: None,
        },
        InboundMessage::Revert {
            write_id: 5,
            reason: RevertReason::DataStale,
        },
        InboundMessage::Revert {
            write_id: 6,
            reason: RevertReason::Unknown("overloaded".into()),
        },
    ]
}

#[test]
fn outbound_messages_survive_a_frame() {
    for message in outbound_messages() {
        let frame = message.encode_frame().unwrap();
        assert_eq!(OutboundMessage::decode_frame(&frame).unwrap(), message);
    }
}

#[test]
fn inbound_messages_survive_a_frame() {
    for message in inbound_messages() {
        let frame = message.encode_frame().unwrap();
        assert_eq!(InboundMessage::decode_frame(&frame).unwrap(), message);
    }
}

#[test]
fn inbound_frame_is_not_an_outbound_frame() {
    let frame = InboundMessage::Connected.encode_frame().unwrap();
    assert!(OutboundMessage::decode_frame(&frame).is_err());
}

proptest! {
    #[test]
    fn server_updates_with_arbitrary_leaves(
        key in "[a-z]{1,6}",
        number in -1.0e9f64..1.0e9,
        text in "[ -~]{0,16}",
        flag in any::<bool>(),
    ) {
        let value = json!({ key.clone(): { "n": number, "s": text, "b": flag } });
        let message = InboundMessage::ServerUpdate {
            path: path("/p"),
            node: Node::from_json(&value).unwrap(),
        };
        let frame = message.encode_frame().unwrap();
        prop_assert_eq!(InboundMessage::decode_frame(&frame).unwrap(), message);
    }
}
