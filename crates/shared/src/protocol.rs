use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::{DirectoryEntry, EntryKind, Message};

/// Listing entries with `Type == 1` are sub-lists, anything else is a file.
pub const LIST_ENTRY_TYPE: i64 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum RemoteRequest {
    #[serde(rename = "channel.get")]
    ChannelGet {
        channel: String,
        older_than: Option<String>,
        newer_than: Option<String>,
        amount: u32,
    },
    #[serde(rename = "message.get")]
    MessageGet { hash: String },
    #[serde(rename = "message.send")]
    MessageSend { channel: String, text: String },
    #[serde(rename = "file.add")]
    FileAdd { channel: String, path: String },
    #[serde(rename = "swarm.get")]
    SwarmGet,
    #[serde(rename = "list.get")]
    ListGet { hash: String },
}

impl RemoteRequest {
    pub fn event_name(&self) -> &'static str {
        match self {
            Self::ChannelGet { .. } => "channel.get",
            Self::MessageGet { .. } => "message.get",
            Self::MessageSend { .. } => "message.send",
            Self::FileAdd { .. } => "file.add",
            Self::SwarmGet => "swarm.get",
            Self::ListGet { .. } => "list.get",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum RemoteResponse {
    ChannelMessages {
        channel: String,
        #[serde(default)]
        messages: Option<Vec<Message>>,
    },
    MessageContent(Option<ContentPayload>),
    Ack {
        #[serde(default)]
        error: Option<String>,
    },
    Swarm(Value),
    DirectoryListing(Option<Vec<RawListEntry>>),
}

/// Reply body of `message.get`; `Data` holds the JSON-encoded message content.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentPayload {
    #[serde(rename = "Data")]
    pub data: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawListEntry {
    #[serde(rename = "Hash")]
    pub hash: String,
    #[serde(rename = "Size")]
    pub size: u64,
    #[serde(rename = "Type")]
    pub entry_type: i64,
    #[serde(rename = "Name")]
    pub name: String,
}

impl From<RawListEntry> for DirectoryEntry {
    fn from(raw: RawListEntry) -> Self {
        Self {
            hash: raw.hash,
            size: raw.size,
            kind: if raw.entry_type == LIST_ENTRY_TYPE {
                EntryKind::List
            } else {
                EntryKind::File
            },
            name: raw.name,
        }
    }
}

/// Server-initiated notifications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum PushEvent {
    /// New messages exist in `channel`. The batch is only a hint; clients
    /// refetch from their own latest boundary.
    Messages {
        channel: String,
        #[serde(default)]
        batch: Vec<Message>,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClientFrame {
    pub id: u64,
    pub request: RemoteRequest,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum ServerFrame {
    Ack { id: u64, response: RemoteResponse },
    Push(PushEvent),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_get_uses_dotted_event_name_on_the_wire() {
        let request = RemoteRequest::ChannelGet {
            channel: "general".into(),
            older_than: None,
            newer_than: Some("k9".into()),
            amount: 4,
        };
        let json = serde_json::to_value(&request).expect("serialize");
        assert_eq!(json["type"], "channel.get");
        assert_eq!(json["payload"]["newer_than"], "k9");
        assert!(json["payload"]["older_than"].is_null());
    }

    #[test]
    fn message_keeps_unknown_fields_in_payload() {
        let raw = r#"{"hash":"h1","key":"k1","seq":3,"author":"ann","ts":17}"#;
        let message: Message = serde_json::from_str(raw).expect("decode");
        assert_eq!(message.hash, "h1");
        assert_eq!(message.seq, Some(Value::from(3)));
        assert_eq!(message.payload.get("author"), Some(&Value::from("ann")));
        assert_eq!(message.payload.len(), 2);
    }

    #[test]
    fn non_numeric_seq_still_decodes() {
        let raw = r#"{"type":"ack","payload":{"id":2,"response":{"type":"channel_messages",
            "payload":{"channel":"general","messages":[
                {"hash":"h1","key":"k1","seq":"0001-a"},
                {"hash":"h2","key":"k2","seq":1.5}]}}}}"#;
        let frame: ServerFrame = serde_json::from_str(raw).expect("decode");
        let messages = match frame {
            ServerFrame::Ack {
                response:
                    RemoteResponse::ChannelMessages {
                        messages: Some(messages),
                        ..
                    },
                ..
            } => messages,
            other => panic!("unexpected frame {other:?}"),
        };
        assert_eq!(messages[0].seq, Some(Value::from("0001-a")));
        assert_eq!(messages[1].seq, Some(Value::from(1.5)));
    }

    #[test]
    fn list_entries_map_type_one_to_list() {
        let raw = r#"[{"Hash":"a","Size":10,"Type":1,"Name":"docs"},
                      {"Hash":"b","Size":3,"Type":2,"Name":"x.txt"}]"#;
        let entries: Vec<RawListEntry> = serde_json::from_str(raw).expect("decode");
        let entries: Vec<DirectoryEntry> = entries.into_iter().map(Into::into).collect();
        assert_eq!(entries[0].kind, EntryKind::List);
        assert_eq!(entries[1].kind, EntryKind::File);
        assert_eq!(entries[1].name, "x.txt");
    }

    #[test]
    fn server_frame_decodes_ack_with_null_messages() {
        let raw = r#"{"type":"ack","payload":{"id":5,"response":
            {"type":"channel_messages","payload":{"channel":"general","messages":null}}}}"#;
        let frame: ServerFrame = serde_json::from_str(raw).expect("decode");
        assert_eq!(
            frame,
            ServerFrame::Ack {
                id: 5,
                response: RemoteResponse::ChannelMessages {
                    channel: "general".into(),
                    messages: None,
                },
            }
        );
    }
}
