use super::*;
use shared::protocol::MessageKey;

fn wire(participant: Option<&str>, push_name: Option<&str>) -> WireMessage {
    WireMessage {
        key: MessageKey {
            id: MessageId::from("BAE5"),
            remote_jid: Jid::from("120363@g.us"),
            from_me: false,
            participant: participant.map(Jid::from),
        },
        push_name: push_name.map(str::to_string),
        timestamp: Some(1_700_000_123),
        content: Some(MessageContent::Text {
            text: "hi there".to_string(),
        }),
    }
}

#[test]
fn group_message_sender_is_participant() {
    let message = InboundMessage::from_wire(&wire(Some("555@s.whatsapp.net"), Some("Grace")))
        .expect("content");
    assert_eq!(message.sender.as_str(), "555@s.whatsapp.net");
    assert_eq!(message.chat.as_str(), "120363@g.us");
    assert!(message.is_group());
    assert_eq!(message.push_name, "Grace");
    assert_eq!(message.kind(), "text");
    assert_eq!(message.text(), Some("hi there"));
    assert_eq!(message.timestamp.timestamp(), 1_700_000_123);
}

#[test]
fn direct_message_sender_is_chat() {
    let mut raw = wire(None, Some("Grace"));
    raw.key.remote_jid = Jid::from("777@s.whatsapp.net");
    let message = InboundMessage::from_wire(&raw).expect("content");
    assert_eq!(message.sender.as_str(), "777@s.whatsapp.net");
    assert!(!message.is_group());
}

#[test]
fn missing_or_blank_push_name_defaults_to_unknown() {
    let missing = InboundMessage::from_wire(&wire(None, None)).expect("content");
    assert_eq!(missing.push_name, "Unknown");
    let blank = InboundMessage::from_wire(&wire(None, Some("  "))).expect("content");
    assert_eq!(blank.push_name, "Unknown");
}

#[test]
fn contentless_message_is_dropped() {
    let mut raw = wire(None, None);
    raw.content = None;
    assert!(InboundMessage::from_wire(&raw).is_none());
}
