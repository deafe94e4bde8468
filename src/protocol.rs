//! Wire protocol: the action catalog, requests, responses and framing.
//!
//! Every request and every response is a single JSON object sent as raw
//! bytes with no length prefix or delimiter. A request names its action in
//! the `action` member; all other members are the action's fields.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Deserializer, Map, Value};
use thiserror::Error;

use crate::auth::Permission;
use crate::{GradebookError, Result};

/// Size of a single socket read on the server.
pub const READ_CHUNK_SIZE: usize = 4096;

/// Largest request the server will reassemble across reads.
pub const MAX_MESSAGE_SIZE: usize = 64 * 1024;

/// Errors raised while turning bytes into a [`Request`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// The bytes are not JSON.
    #[error("Invalid JSON format")]
    InvalidJson,
    /// The payload is JSON but not an object.
    #[error("Request must be a JSON object")]
    NotAnObject,
    /// The `action` member is absent or not a string.
    #[error("Missing action field")]
    MissingAction,
    /// The action is not in the catalog.
    #[error("Unknown action: {0}")]
    UnknownAction(String),
    /// A partial message was never completed.
    #[error("Incomplete request")]
    Incomplete,
    /// A message grew past [`MAX_MESSAGE_SIZE`] without completing.
    #[error("Request exceeds {0} bytes")]
    TooLarge(usize),
}

/// Operations a client may request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    /// Verify credentials and report the caller's permission.
    Login,
    /// Insert a new student record.
    AddStudent,
    /// Remove a student record.
    DeleteStudent,
    /// Change some fields of a student record.
    UpdateStudent,
    /// Fetch one student record.
    GetStudent,
    /// Fetch every record ordered by total score.
    ListStudents,
    /// Fetch per-subject averages and maxima.
    GetStatistics,
    /// Replace an account's password.
    ChangePassword,
    /// Anything not in the catalog.
    Unknown,
}

/// Type a request field must carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A non-empty JSON string.
    Text,
    /// A JSON number.
    Number,
}

/// A named, typed request field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FieldSpec {
    /// Wire name of the field.
    pub name: &'static str,
    /// Expected JSON type.
    pub kind: FieldKind,
}

const fn text(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Text,
    }
}

const fn number(name: &'static str) -> FieldSpec {
    FieldSpec {
        name,
        kind: FieldKind::Number,
    }
}

const LOGIN_FIELDS: &[FieldSpec] = &[text("username"), text("password")];
const STUDENT_ID_FIELD: &[FieldSpec] = &[text("student_id")];
const ADD_STUDENT_FIELDS: &[FieldSpec] = &[
    text("student_id"),
    text("name"),
    text("gender"),
    number("score1"),
    number("score2"),
    number("score3"),
];
const UPDATE_STUDENT_OPTIONAL: &[FieldSpec] = &[
    text("name"),
    text("gender"),
    number("score1"),
    number("score2"),
    number("score3"),
];
const CHANGE_PASSWORD_FIELDS: &[FieldSpec] = &[
    text("username"),
    text("old_password"),
    text("new_password"),
];

impl Action {
    /// Every action the server understands.
    pub const CATALOG: [Action; 8] = [
        Action::Login,
        Action::AddStudent,
        Action::DeleteStudent,
        Action::UpdateStudent,
        Action::GetStudent,
        Action::ListStudents,
        Action::GetStatistics,
        Action::ChangePassword,
    ];

    /// Wire name of the action.
    pub fn name(self) -> &'static str {
        match self {
            Action::Login => "login",
            Action::AddStudent => "add_student",
            Action::DeleteStudent => "delete_student",
            Action::UpdateStudent => "update_student",
            Action::GetStudent => "get_student",
            Action::ListStudents => "list_students",
            Action::GetStatistics => "get_statistics",
            Action::ChangePassword => "change_password",
            Action::Unknown => "unknown",
        }
    }

    /// Looks up an action by wire name. Names outside the catalog map to
    /// [`Action::Unknown`].
    pub fn from_name(name: &str) -> Action {
        Action::CATALOG
            .into_iter()
            .find(|action| action.name() == name)
            .unwrap_or(Action::Unknown)
    }

    /// Fields that must be present for the action.
    pub fn required_fields(self) -> &'static [FieldSpec] {
        match self {
            Action::Login => LOGIN_FIELDS,
            Action::AddStudent => ADD_STUDENT_FIELDS,
            Action::DeleteStudent | Action::UpdateStudent | Action::GetStudent => {
                STUDENT_ID_FIELD
            }
            Action::ChangePassword => CHANGE_PASSWORD_FIELDS,
            Action::ListStudents | Action::GetStatistics | Action::Unknown => &[],
        }
    }

    /// Fields that may be present; only `update_student` has any.
    pub fn optional_fields(self) -> &'static [FieldSpec] {
        match self {
            Action::UpdateStudent => UPDATE_STUDENT_OPTIONAL,
            _ => &[],
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A decoded request: an action plus its fields.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    action: Action,
    name: String,
    fields: Map<String, Value>,
}

impl Request {
    /// Creates a request for `action` with no fields.
    pub fn new(action: Action) -> Self {
        Request {
            action,
            name: action.name().to_owned(),
            fields: Map::new(),
        }
    }

    /// Adds or replaces a field.
    pub fn with(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.fields.insert(field.to_owned(), value.into());
        self
    }

    /// The requested action.
    pub fn action(&self) -> Action {
        self.action
    }

    /// The action name exactly as it appeared on the wire.
    pub fn action_name(&self) -> &str {
        &self.name
    }

    /// All fields except `action`.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Returns true when `field` is present and not `null`.
    pub fn contains(&self, field: &str) -> bool {
        !matches!(self.fields.get(field), None | Some(Value::Null))
    }

    /// Returns a required, non-empty string field.
    pub fn text(&self, field: &str) -> Result<&str> {
        self.optional_text(field)?
            .ok_or_else(|| GradebookError::MissingField(field.to_owned()))
    }

    /// Returns a required numeric field.
    pub fn number(&self, field: &str) -> Result<f64> {
        self.optional_number(field)?
            .ok_or_else(|| GradebookError::MissingField(field.to_owned()))
    }

    /// Returns a string field, or `None` when it is absent or `null`.
    pub fn optional_text(&self, field: &str) -> Result<Option<&str>> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::String(s)) if s.is_empty() => Err(GradebookError::InvalidField {
                field: field.to_owned(),
                expected: "must not be empty",
            }),
            Some(Value::String(s)) => Ok(Some(s.as_str())),
            Some(_) => Err(GradebookError::InvalidField {
                field: field.to_owned(),
                expected: "expected string",
            }),
        }
    }

    /// Returns a numeric field, or `None` when it is absent or `null`.
    pub fn optional_number(&self, field: &str) -> Result<Option<f64>> {
        match self.fields.get(field) {
            None | Some(Value::Null) => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(_) => Err(GradebookError::InvalidField {
                field: field.to_owned(),
                expected: "expected number",
            }),
        }
    }

    /// Checks presence and type of every field the catalog requires, and
    /// the type of every optional field that is present.
    pub fn validate(&self) -> Result<()> {
        for spec in self.action.required_fields() {
            match spec.kind {
                FieldKind::Text => self.text(spec.name).map(drop)?,
                FieldKind::Number => self.number(spec.name).map(drop)?,
            }
        }
        for spec in self.action.optional_fields() {
            match spec.kind {
                FieldKind::Text => self.optional_text(spec.name).map(drop)?,
                FieldKind::Number => self.optional_number(spec.name).map(drop)?,
            }
        }
        Ok(())
    }

    /// Serializes the request as one JSON object.
    pub fn encode(&self) -> Vec<u8> {
        let mut object = Map::with_capacity(self.fields.len() + 1);
        object.insert("action".to_owned(), Value::String(self.name.clone()));
        for (key, value) in &self.fields {
            object.insert(key.clone(), value.clone());
        }
        Value::Object(object).to_string().into_bytes()
    }

    /// Decodes one complete request payload.
    pub fn decode(bytes: &[u8]) -> std::result::Result<Request, ProtocolError> {
        let value: Value = serde_json::from_slice(bytes).map_err(|_| ProtocolError::InvalidJson)?;
        Request::from_value(value)
    }

    /// Builds a request from an already parsed JSON value.
    pub fn from_value(value: Value) -> std::result::Result<Request, ProtocolError> {
        let Value::Object(mut fields) = value else {
            return Err(ProtocolError::NotAnObject);
        };
        let name = match fields.remove("action") {
            Some(Value::String(name)) => name,
            _ => return Err(ProtocolError::MissingAction),
        };
        Ok(Request {
            action: Action::from_name(&name),
            name,
            fields,
        })
    }
}

/// Outcome carried by every response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    /// The action completed.
    Success,
    /// The action failed; `message` says why.
    Error,
}

/// Response sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    /// Success or error.
    pub status: Status,
    /// Human readable outcome.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Resolved permission; only set by `login`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub permission: Option<Permission>,
    /// Action-specific payload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl Response {
    /// A bare success response.
    pub fn success() -> Self {
        Response {
            status: Status::Success,
            message: None,
            permission: None,
            data: None,
        }
    }

    /// An error response with the given message.
    pub fn error(message: impl Into<String>) -> Self {
        Response {
            status: Status::Error,
            message: Some(message.into()),
            permission: None,
            data: None,
        }
    }

    /// Sets the message.
    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Sets the data payload.
    pub fn with_data(mut self, data: Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Sets the top-level permission member.
    pub fn with_permission(mut self, permission: Permission) -> Self {
        self.permission = Some(permission);
        self
    }

    /// Returns true for a success status.
    pub fn is_success(&self) -> bool {
        self.status == Status::Success
    }

    /// The message, or a placeholder when the server sent none.
    pub fn message_or_default(&self) -> &str {
        self.message.as_deref().unwrap_or("Unknown error")
    }

    /// Converts an error status into [`GradebookError::Server`].
    pub fn into_result(self) -> Result<Response> {
        if self.is_success() {
            Ok(self)
        } else {
            Err(GradebookError::Server(self.message_or_default().to_owned()))
        }
    }

    /// Serializes the response as one JSON object.
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }
}

/// Accumulates socket reads and splits them into requests.
///
/// A read may hold a partial request, exactly one request, or several
/// back-to-back requests; the buffer yields each complete JSON value in
/// order and keeps any trailing partial value for the next read.
#[derive(Debug, Default)]
pub struct RequestBuffer {
    buf: Vec<u8>,
}

enum Scan {
    Empty,
    Complete(Value, usize),
    Partial,
    Malformed,
}

impl RequestBuffer {
    /// Creates an empty buffer.
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends bytes from a read.
    pub fn extend(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Returns true when part of a request is buffered.
    pub fn is_pending(&self) -> bool {
        self.buf.iter().any(|b| !b.is_ascii_whitespace())
    }

    /// Drops everything buffered.
    pub fn clear(&mut self) {
        self.buf.clear();
    }

    /// Takes the next complete request off the buffer.
    ///
    /// Returns `None` when more bytes are needed. A run of malformed bytes
    /// yields one error and is skipped up to the next `{`, so a request
    /// that follows garbage in the same read is still served. An oversized
    /// message yields one error and empties the buffer.
    pub fn next_frame(&mut self) -> Option<std::result::Result<Request, ProtocolError>> {
        match scan(&self.buf) {
            Scan::Empty => {
                self.buf.clear();
                None
            }
            Scan::Complete(value, consumed) => {
                self.buf.drain(..consumed);
                Some(Request::from_value(value))
            }
            Scan::Partial if self.buf.len() > MAX_MESSAGE_SIZE => {
                self.buf.clear();
                Some(Err(ProtocolError::TooLarge(MAX_MESSAGE_SIZE)))
            }
            Scan::Partial => None,
            Scan::Malformed => {
                self.resync();
                Some(Err(ProtocolError::InvalidJson))
            }
        }
    }

    /// Drops leading bytes until the buffer no longer starts with a
    /// malformed value.
    fn resync(&mut self) {
        loop {
            match self.buf.iter().skip(1).position(|&b| b == b'{') {
                Some(i) => {
                    self.buf.drain(..=i);
                }
                None => {
                    self.buf.clear();
                    return;
                }
            }
            if !matches!(scan(&self.buf), Scan::Malformed) {
                return;
            }
        }
    }
}

fn scan(buf: &[u8]) -> Scan {
    let mut stream = Deserializer::from_slice(buf).into_iter::<Value>();
    match stream.next() {
        None => Scan::Empty,
        Some(Ok(value)) => Scan::Complete(value, stream.byte_offset()),
        Some(Err(e)) if e.is_eof() => Scan::Partial,
        Some(Err(_)) => Scan::Malformed,
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn decodes_login() {
        let req = Request::decode(br#"{"action":"login","username":"admin","password":"pw"}"#)
            .unwrap();
        assert_eq!(req.action(), Action::Login);
        assert_eq!(req.text("username").unwrap(), "admin");
        assert!(!req.fields().contains_key("action"));
        req.validate().unwrap();
    }

    #[test]
    fn decode_failures() {
        assert_eq!(Request::decode(b"not json"), Err(ProtocolError::InvalidJson));
        assert_eq!(Request::decode(b"[1, 2]"), Err(ProtocolError::NotAnObject));
        assert_eq!(
            Request::decode(br#"{"student_id":"1"}"#),
            Err(ProtocolError::MissingAction)
        );
        assert_eq!(
            Request::decode(br#"{"action":7}"#),
            Err(ProtocolError::MissingAction)
        );
    }

    #[test]
    fn unknown_action_keeps_its_name() {
        let req = Request::decode(br#"{"action":"drop_tables"}"#).unwrap();
        assert_eq!(req.action(), Action::Unknown);
        assert_eq!(req.action_name(), "drop_tables");
    }

    #[test]
    fn catalog_round_trips_names() {
        for action in Action::CATALOG {
            assert_eq!(Action::from_name(action.name()), action);
        }
        assert_eq!(Action::from_name("get_statistic"), Action::Unknown);
    }

    #[test]
    fn validation_names_offending_field() {
        let req = Request::new(Action::AddStudent)
            .with("student_id", "s1")
            .with("name", "Ann")
            .with("gender", "F")
            .with("score1", 90)
            .with("score2", "eighty")
            .with("score3", 70);
        match req.validate() {
            Err(GradebookError::InvalidField { field, .. }) => assert_eq!(field, "score2"),
            other => panic!("unexpected {other:?}"),
        }

        let req = Request::new(Action::AddStudent).with("student_id", "s1");
        match req.validate() {
            Err(GradebookError::MissingField(field)) => assert_eq!(field, "name"),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn null_is_absent_but_zero_is_present() {
        let req = Request::new(Action::UpdateStudent)
            .with("student_id", "s1")
            .with("score1", 0)
            .with("score2", Value::Null);
        assert_eq!(req.optional_number("score1").unwrap(), Some(0.0));
        assert_eq!(req.optional_number("score2").unwrap(), None);
        assert_eq!(req.optional_number("score3").unwrap(), None);
        assert!(req.contains("score1"));
        assert!(!req.contains("score2"));
    }

    #[test]
    fn empty_required_text_is_rejected() {
        let req = Request::new(Action::GetStudent).with("student_id", "");
        assert!(matches!(
            req.validate(),
            Err(GradebookError::InvalidField { .. })
        ));
    }

    #[test]
    fn encode_puts_action_on_the_wire() {
        let bytes = Request::new(Action::GetStudent)
            .with("student_id", "s1")
            .encode();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"action": "get_student", "student_id": "s1"}));
    }

    #[test]
    fn response_omits_absent_members() {
        let bytes = Response::success()
            .with_message("ok")
            .encode()
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"status": "success", "message": "ok"}));

        let bytes = Response::success()
            .with_permission(Permission::Admin)
            .encode()
            .unwrap();
        let value: Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(value, json!({"status": "success", "permission": "admin"}));
    }

    #[test]
    fn error_response_becomes_server_error() {
        let err = Response::error("Student not found").into_result().unwrap_err();
        assert_eq!(err.to_string(), "Student not found");
    }

    #[test]
    fn buffer_splits_coalesced_requests() {
        let mut buffer = RequestBuffer::new();
        buffer.extend(br#"{"action":"list_students"}{"action":"get_statistics"}"#);
        assert_eq!(
            buffer.next_frame().unwrap().unwrap().action(),
            Action::ListStudents
        );
        assert_eq!(
            buffer.next_frame().unwrap().unwrap().action(),
            Action::GetStatistics
        );
        assert!(buffer.next_frame().is_none());
        assert!(!buffer.is_pending());
    }

    #[test]
    fn buffer_reassembles_split_request() {
        let mut buffer = RequestBuffer::new();
        buffer.extend(br#"{"action":"get_st"#);
        assert!(buffer.next_frame().is_none());
        assert!(buffer.is_pending());
        buffer.extend(br#"udent","student_id":"s1"}"#);
        let req = buffer.next_frame().unwrap().unwrap();
        assert_eq!(req.action(), Action::GetStudent);
        assert!(!buffer.is_pending());
    }

    #[test]
    fn buffer_recovers_after_garbage() {
        let mut buffer = RequestBuffer::new();
        buffer.extend(b"\xff\xfe garbage");
        assert_eq!(buffer.next_frame(), Some(Err(ProtocolError::InvalidJson)));
        assert!(buffer.next_frame().is_none());
        buffer.extend(br#"{"action":"list_students"}"#);
        assert!(buffer.next_frame().unwrap().is_ok());
    }

    #[test]
    fn buffer_serves_request_after_leading_garbage() {
        let mut buffer = RequestBuffer::new();
        buffer.extend(br#"oops{"action":"list_students"}"#);
        assert_eq!(buffer.next_frame(), Some(Err(ProtocolError::InvalidJson)));
        assert_eq!(
            buffer.next_frame().unwrap().unwrap().action(),
            Action::ListStudents
        );
        assert!(buffer.next_frame().is_none());
        assert!(!buffer.is_pending());
    }

    #[test]
    fn buffer_reports_one_error_per_garbage_run() {
        let mut buffer = RequestBuffer::new();
        buffer.extend(br#"{"a" x}{bad}{"action":"get_statistics"}"#);
        assert_eq!(buffer.next_frame(), Some(Err(ProtocolError::InvalidJson)));
        assert_eq!(
            buffer.next_frame().unwrap().unwrap().action(),
            Action::GetStatistics
        );
        assert!(buffer.next_frame().is_none());
    }

    #[test]
    fn buffer_rejects_oversized_message() {
        let mut buffer = RequestBuffer::new();
        buffer.extend(br#"{"action":"add_student","name":""#);
        buffer.extend(&vec![b'a'; MAX_MESSAGE_SIZE]);
        assert_eq!(
            buffer.next_frame(),
            Some(Err(ProtocolError::TooLarge(MAX_MESSAGE_SIZE)))
        );
        assert!(!buffer.is_pending());
    }

    #[test]
    fn whitespace_is_not_pending() {
        let mut buffer = RequestBuffer::new();
        buffer.extend(b" \r\n");
        assert!(!buffer.is_pending());
        assert!(buffer.next_frame().is_none());
    }
}
