use orb_types::{BackendId, ObjectId, OrbError};
use serde::{Deserialize, Serialize};

use crate::api::{MakePersistentRequest, PutMode};

pub const PROTOCOL_VERSION: u32 = 1;
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024 * 1024;

/// All messages exchanged with a backend. Requests carry tags below 64,
/// responses 64 and above.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum Message {
    MakePersistent(MakePersistentRequest),
    Execute { id: ObjectId, method: String, args: Vec<u8> },
    GetAttribute { id: ObjectId, field: String },
    SetAttribute { id: ObjectId, field: String, value: Vec<u8> },
    DeleteAttribute { id: ObjectId, field: String },
    GetState { id: ObjectId },
    PutState { id: ObjectId, state: Vec<u8>, mode: PutMode },
    DiscardState { id: ObjectId },
    MoveObject { id: ObjectId, target: Option<BackendId> },
    NewReplica { id: ObjectId, target: Option<BackendId> },
    FlushAll,
    MoveAllObjects,

    Identity(ObjectId),
    Payload(Vec<u8>),
    Backend(BackendId),
    Count(u64),
    Done,
    Error(OrbError),
}

impl Message {
    pub fn type_tag(&self) -> u8 {
        match self {
            Self::MakePersistent(_) => 1,
            Self::Execute { .. } => 2,
            Self::GetAttribute { .. } => 3,
            Self::SetAttribute { .. } => 4,
            Self::GetState { .. } => 5,
            Self::PutState { .. } => 6,
            Self::DiscardState { .. } => 7,
            Self::MoveObject { .. } => 8,
            Self::NewReplica { .. } => 9,
            Self::FlushAll => 10,
            Self::DeleteAttribute { .. } => 11,
            Self::MoveAllObjects => 12,
            Self::Identity(_) => 64,
            Self::Payload(_) => 65,
            Self::Backend(_) => 66,
            Self::Count(_) => 67,
            Self::Done => 68,
            Self::Error(_) => 255,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            Self::MakePersistent(_) => "MakePersistent",
            Self::Execute { .. } => "Execute",
            Self::GetAttribute { .. } => "GetAttribute",
            Self::SetAttribute { .. } => "SetAttribute",
            Self::GetState { .. } => "GetState",
            Self::PutState { .. } => "PutState",
            Self::DiscardState { .. } => "DiscardState",
            Self::MoveObject { .. } => "MoveObject",
            Self::NewReplica { .. } => "NewReplica",
            Self::FlushAll => "FlushAll",
            Self::DeleteAttribute { .. } => "DeleteAttribute",
            Self::MoveAllObjects => "MoveAllObjects",
            Self::Identity(_) => "Identity",
            Self::Payload(_) => "Payload",
            Self::Backend(_) => "Backend",
            Self::Count(_) => "Count",
            Self::Done => "Done",
            Self::Error(_) => "Error",
        }
    }

    pub fn is_request(&self) -> bool {
        self.type_tag() < 64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all() -> Vec<Message> {
        let id = ObjectId::new();
        vec![
            Message::MakePersistent(MakePersistentRequest {
                id,
                class_name: "C".into(),
                dataset: "d".into(),
                alias: None,
                state: vec![],
                read_only: false,
            }),
            Message::Execute { id, method: "m".into(), args: vec![] },
            Message::GetAttribute { id, field: "f".into() },
            Message::SetAttribute { id, field: "f".into(), value: vec![] },
            Message::GetState { id },
            Message::PutState { id, state: vec![], mode: PutMode::Master },
            Message::DiscardState { id },
            Message::MoveObject { id, target: None },
            Message::NewReplica { id, target: None },
            Message::FlushAll,
            Message::DeleteAttribute { id, field: "f".into() },
            Message::MoveAllObjects,
            Message::Identity(id),
            Message::Payload(vec![]),
            Message::Backend(BackendId::new()),
            Message::Count(0),
            Message::Done,
            Message::Error(OrbError::Shutdown),
        ]
    }

    #[test]
    fn type_tags_unique() {
        let msgs = all();
        let mut tags: Vec<u8> = msgs.iter().map(|m| m.type_tag()).collect();
        tags.sort();
        tags.dedup();
        assert_eq!(tags.len(), msgs.len(), "type tags should be unique");
    }

    #[test]
    fn requests_and_responses_are_split_by_tag() {
        let requests = all().iter().filter(|m| m.is_request()).count();
        assert_eq!(requests, 12);
        assert!(!Message::Error(OrbError::Shutdown).is_request());
        assert_eq!(Message::FlushAll.type_name(), "FlushAll");
    }
}
