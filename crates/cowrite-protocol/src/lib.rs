//! cowrite wire protocol
//!
//! JSON messages exchanged over WebSocket text frames.
//!
//! ## Client requests
//! ```text
//! {"requestType": "set|add|insert|update|remove|replace",
//!  "operation": {"data": "...", "location": 0, "end": 0,
//!                "kind": "integer|boolean|string|array|object|text",
//!                "targetPath": "a/b/3", "baseHistoryIndex": 0}}
//! ```
//!
//! ## Server messages
//! ```text
//! {"type": "init", "contents": <document>, "historyIndex": n}
//! {"type": "acknowledged", "historyIndex": n}
//! {"type": "rejected", "reason": "..."}
//! {"type": "operation", "historyIndex": n, "requestType": "...", "operation": {...}}
//! ```
//!
//! Sessions end with a close frame whose reason is `locked`, `error` or
//! `terminating`.

pub mod codec;
pub mod error;
pub mod message;

pub use codec::{decode_operation, encode_operation, MAX_MESSAGE_SIZE};
pub use error::{ProtocolError, ProtocolResult};
pub use message::{ClientRequest, CloseReason, RequestType, ServerMessage, WireOperation};
