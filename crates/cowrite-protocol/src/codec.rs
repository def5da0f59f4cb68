//! Conversion between wire operations and core operations

use crate::error::{ProtocolError, ProtocolResult};
use crate::message::{ClientRequest, RequestType, ServerMessage, WireOperation};
use cowrite_core::{
    ArrayEdit, Edit, IntegerEdit, Node, ObjectEdit, Operation, OperationKind, Path, TextEdit,
};

/// Maximum accepted frame size (1MB)
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

fn invalid_data(kind: OperationKind, data: &str, reason: impl ToString) -> ProtocolError {
    ProtocolError::InvalidData {
        kind: kind.to_string(),
        data: data.to_string(),
        reason: reason.to_string(),
    }
}

fn parse_node(kind: OperationKind, data: &str) -> ProtocolResult<Node> {
    serde_json::from_str(data).map_err(|e| invalid_data(kind, data, e))
}

/// Build the core operation a client request describes.
///
/// `data` is read according to the target kind: an integer or boolean
/// literal, a raw string, JSON for array and object values, or the inserted
/// text of a text edit.
pub fn decode_operation(request: &ClientRequest) -> ProtocolResult<Operation> {
    let wire = &request.operation;
    let kind = wire.kind;
    let data = wire.data.as_str();

    let edit = match (kind, request.request_type) {
        (OperationKind::Integer, RequestType::Add) => {
            Edit::Integer(IntegerEdit::Add(data.trim().parse().map_err(|e| invalid_data(kind, data, e))?))
        }
        (OperationKind::Integer, RequestType::Set) => {
            Edit::Integer(IntegerEdit::Set(data.trim().parse().map_err(|e| invalid_data(kind, data, e))?))
        }
        (OperationKind::Boolean, RequestType::Set) => {
            Edit::Boolean(data.trim().parse().map_err(|e| invalid_data(kind, data, e))?)
        }
        (OperationKind::String, RequestType::Set) => Edit::String(data.to_string()),
        (OperationKind::Text, RequestType::Replace) => Edit::Text(TextEdit {
            start: wire.location,
            end: wire.end.unwrap_or(wire.location),
            insert: data.to_string(),
        }),
        (OperationKind::Text, RequestType::Insert) => Edit::Text(TextEdit {
            start: wire.location,
            end: wire.location,
            insert: data.to_string(),
        }),
        (OperationKind::Text, RequestType::Remove) => {
            let end = wire
                .end
                .ok_or_else(|| ProtocolError::MissingArgument("end".into()))?;
            Edit::Text(TextEdit {
                start: wire.location,
                end,
                insert: String::new(),
            })
        }
        (OperationKind::Array, RequestType::Insert) => Edit::Array(ArrayEdit::Insert(parse_node(kind, data)?)),
        (OperationKind::Array, RequestType::Update) => Edit::Array(ArrayEdit::Update(parse_node(kind, data)?)),
        (OperationKind::Array, RequestType::Remove) => Edit::Array(ArrayEdit::Remove),
        (OperationKind::Object, RequestType::Insert | RequestType::Set) => {
            Edit::Object(ObjectEdit::Insert(parse_node(kind, data)?))
        }
        (OperationKind::Object, RequestType::Remove) => Edit::Object(ObjectEdit::Remove(None)),
        (kind, request_type) => {
            return Err(ProtocolError::UnsupportedRequest {
                request_type: request_type.to_string(),
                kind: kind.to_string(),
            })
        }
    };

    Ok(Operation::new(Path::parse(&wire.target_path), edit, wire.base_history_index))
}

/// Describe an applied operation on the wire.
///
/// No-ops have no wire form; they are never sent to clients.
pub fn encode_operation(op: &Operation) -> ProtocolResult<(RequestType, WireOperation)> {
    let mut wire = WireOperation {
        data: String::new(),
        location: 0,
        end: None,
        kind: op.kind(),
        target_path: op.path().to_string(),
        base_history_index: op.base_history_index(),
    };

    let request_type = match op.edit() {
        Edit::Integer(IntegerEdit::Add(delta)) => {
            wire.data = delta.to_string();
            RequestType::Add
        }
        Edit::Integer(IntegerEdit::Set(value)) => {
            wire.data = value.to_string();
            RequestType::Set
        }
        Edit::Boolean(value) => {
            wire.data = value.to_string();
            RequestType::Set
        }
        Edit::String(value) => {
            wire.data = value.clone();
            RequestType::Set
        }
        Edit::Text(edit) => {
            wire.data = edit.insert.clone();
            wire.location = edit.start;
            wire.end = Some(edit.end);
            RequestType::Replace
        }
        Edit::Array(ArrayEdit::Insert(value)) => {
            wire.data = serde_json::to_string(value)?;
            RequestType::Insert
        }
        Edit::Array(ArrayEdit::Update(value)) => {
            wire.data = serde_json::to_string(value)?;
            RequestType::Update
        }
        Edit::Object(ObjectEdit::Insert(value) | ObjectEdit::Restore(value, _)) => {
            wire.data = serde_json::to_string(value)?;
            RequestType::Insert
        }
        Edit::Array(ArrayEdit::Remove) | Edit::Object(ObjectEdit::Remove(_)) => RequestType::Remove,
        Edit::Noop(kind) => {
            return Err(ProtocolError::UnsupportedRequest {
                request_type: "noop".into(),
                kind: kind.to_string(),
            })
        }
    };

    Ok((request_type, wire))
}

impl ServerMessage {
    /// Fan-out message for an operation applied at `history_index`
    pub fn operation(history_index: usize, op: &Operation) -> ProtocolResult<Self> {
        let (request_type, operation) = encode_operation(op)?;
        Ok(ServerMessage::Operation {
            history_index,
            request_type,
            operation,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(request_type: &str, kind: &str, path: &str, data: &str) -> ClientRequest {
        let json = serde_json::json!({
            "requestType": request_type,
            "operation": {
                "data": data,
                "location": 1,
                "end": 3,
                "kind": kind,
                "targetPath": path,
                "baseHistoryIndex": 2,
            }
        });
        serde_json::from_value(json).unwrap()
    }

    #[test]
    fn test_decode_scalars() {
        let op = decode_operation(&request("add", "integer", "count", " 5")).unwrap();
        assert_eq!(op, Operation::integer_add("count", 5, 2));

        let op = decode_operation(&request("set", "boolean", "done", "true")).unwrap();
        assert_eq!(op, Operation::boolean_set("done", true, 2));

        let op = decode_operation(&request("set", "string", "title", "  raw  ")).unwrap();
        assert_eq!(op, Operation::string_set("title", "  raw  ", 2));
    }

    #[test]
    fn test_decode_text_range() {
        let op = decode_operation(&request("replace", "text", "body", "xy")).unwrap();
        assert_eq!(op, Operation::text_replace("body", 1, 3, "xy", 2));

        let op = decode_operation(&request("insert", "text", "body", "xy")).unwrap();
        assert_eq!(op, Operation::text_replace("body", 1, 1, "xy", 2));
    }

    #[test]
    fn test_decode_structural() {
        let op = decode_operation(&request("insert", "array", "items/0", r#"{"a":1}"#)).unwrap();
        assert_eq!(
            op,
            Operation::array_insert("items/0", serde_json::from_str::<Node>(r#"{"a":1}"#).unwrap(), 2)
        );

        let op = decode_operation(&request("remove", "object", "meta/k", "")).unwrap();
        assert_eq!(op, Operation::object_remove("meta/k", 2));
    }

    #[test]
    fn test_path_problems_are_left_to_the_document() {
        // a non-numeric array index decodes; the server rejects it on apply
        let op = decode_operation(&request("insert", "array", "items/first", "1")).unwrap();
        assert_eq!(op.path().to_string(), "items/first");
        assert!(matches!(op.validate(), Err(cowrite_core::Error::InvalidPath(_))));
    }

    #[test]
    fn test_decode_invalid() {
        assert!(matches!(
            decode_operation(&request("add", "integer", "count", "five")),
            Err(ProtocolError::InvalidData { .. })
        ));
        assert!(matches!(
            decode_operation(&request("add", "text", "body", "1")),
            Err(ProtocolError::UnsupportedRequest { .. })
        ));
        assert!(matches!(
            decode_operation(&request("update", "array", "items/0", "{broken")),
            Err(ProtocolError::InvalidData { .. })
        ));
    }

    #[test]
    fn test_fan_out_message() {
        let op = Operation::text_replace("body", 0, 2, "hey", 7);
        let msg = ServerMessage::operation(9, &op).unwrap();
        assert_eq!(
            msg.encode().unwrap(),
            r#"{"type":"operation","historyIndex":9,"requestType":"replace","operation":{"data":"hey","location":0,"end":2,"kind":"text","targetPath":"body","baseHistoryIndex":7}}"#
        );

        let array = Operation::array_update("items/1", vec![1i64, 2], 0);
        match ServerMessage::operation(1, &array).unwrap() {
            ServerMessage::Operation { request_type, operation, .. } => {
                assert_eq!(request_type, RequestType::Update);
                assert_eq!(operation.data, "[1,2]");
            }
            other => panic!("unexpected message {:?}", other),
        }

        assert!(ServerMessage::operation(2, &op.to_noop()).is_err());
    }

    #[test]
    fn test_wire_form_decodes_to_same_operation() {
        let op = Operation::object_insert("meta/tags", vec!["a", "b"], 3);
        let (request_type, operation) = encode_operation(&op).unwrap();
        let decoded = decode_operation(&ClientRequest { request_type, operation }).unwrap();
        assert_eq!(decoded, op);
    }
}
