use forum_common::protocol::chat::{decode_frame, encode_frame, ChatFrame};
use forum_common::types::{ChatMessage, NewChatMessage};

#[test]
fn broadcast_frame_has_only_username_and_content() {
    let value =
        serde_json::to_value(ChatFrame::new("alice", "hi")).expect("frame should serialize");
    let object = value.as_object().expect("frame should be a json object");

    let mut keys: Vec<&str> = object.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["content", "username"]);
}

#[test]
fn broadcast_frame_matches_documented_shape() {
    let encoded = encode_frame(&ChatFrame::new("guest-marker", "yo")).expect("frame should encode");
    assert_eq!(encoded, r#"{"username":"guest-marker","content":"yo"}"#);
}

#[test]
fn clients_tolerate_whitespace_in_frames() {
    let decoded = decode_frame("{ \"username\": \"alice\", \"content\": \"hi\" }")
        .expect("whitespace should not matter");
    assert_eq!(decoded, ChatFrame::new("alice", "hi"));
}

#[test]
fn listing_entry_round_trips_through_json() {
    let message = NewChatMessage::new(42, "carol", "hello forum").into_stored(3);
    let encoded = serde_json::to_string(&message).expect("message should serialize");
    let decoded: ChatMessage = serde_json::from_str(&encoded).expect("message should deserialize");

    assert_eq!(decoded, message);
}
