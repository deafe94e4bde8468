//! Maps decoded requests to handlers and handler outcomes to responses.
//!
//! Nothing a client sends can make a handler fail past this boundary:
//! every error, from an undecodable payload to a backend failure, comes
//! back as an error [`Response`].

use log::{error, info};
use serde_json::{json, Value};

use crate::auth::{AuthService, Permission, User};
use crate::protocol::{Action, ProtocolError, Request, Response};
use crate::store::{DataStore, StudentRecord, StudentUpdate};
use crate::{GradebookError, Result};

const AUDIT_TARGET: &str = "gradebook::audit";

type Handler<S> = fn(&Dispatcher<S>, &Request, Option<&User>) -> Result<Response>;

/// Routes requests for one connection.
///
/// Owns that connection's store handle; dropping the dispatcher releases it.
pub struct Dispatcher<S: DataStore> {
    store: S,
    auth: AuthService<S>,
    require_auth: bool,
}

impl<S: DataStore> Dispatcher<S> {
    /// Creates a dispatcher over `store`.
    ///
    /// With `require_auth`, every action other than `login` and
    /// `change_password` must carry `username` and `password`.
    pub fn new(store: S, require_auth: bool) -> Self {
        let auth = AuthService::new(store.clone());
        Self {
            store,
            auth,
            require_auth,
        }
    }

    /// Decodes and handles one complete payload.
    pub fn handle_bytes(&self, bytes: &[u8], peer: &str) -> Response {
        self.dispatch(Request::decode(bytes), peer)
    }

    /// Handles one decode outcome.
    pub fn dispatch(
        &self,
        frame: std::result::Result<Request, ProtocolError>,
        peer: &str,
    ) -> Response {
        let request = match frame {
            Ok(request) => request,
            Err(e) => {
                audit(Action::Unknown.name(), None, peer, Err(&e.to_string()));
                return Response::error(e.to_string());
            }
        };

        let mut caller = None;
        let outcome = self.authorize(&request).and_then(|user| {
            caller = user;
            request.validate()?;
            let handler = Self::handler(request.action());
            handler(self, &request, caller.as_ref())
        });

        let username = caller
            .as_ref()
            .map(|user| user.username.as_str())
            .or_else(|| match request.action() {
                Action::Login | Action::ChangePassword => {
                    request.optional_text("username").ok().flatten()
                }
                _ => None,
            });

        match outcome {
            Ok(response) => {
                audit(request.action_name(), username, peer, Ok(()));
                response
            }
            Err(e) => {
                if matches!(
                    e,
                    GradebookError::Io(_)
                        | GradebookError::Serde(_)
                        | GradebookError::Sled(_)
                        | GradebookError::StringError(_)
                ) {
                    error!("Store failure during {}: {}", request.action_name(), e);
                }
                let message = e.client_message();
                audit(request.action_name(), username, peer, Err(&message));
                Response::error(message)
            }
        }
    }

    fn handler(action: Action) -> Handler<S> {
        match action {
            Action::Login => Self::login,
            Action::AddStudent => Self::add_student,
            Action::DeleteStudent => Self::delete_student,
            Action::UpdateStudent => Self::update_student,
            Action::GetStudent => Self::get_student,
            Action::ListStudents => Self::list_students,
            Action::GetStatistics => Self::get_statistics,
            Action::ChangePassword => Self::change_password,
            Action::Unknown => Self::unknown,
        }
    }

    /// Verifies credentials carried by the request, if any.
    ///
    /// `login` and `change_password` authenticate themselves.
    fn authorize(&self, request: &Request) -> Result<Option<User>> {
        let action = request.action();
        if matches!(
            action,
            Action::Login | Action::ChangePassword | Action::Unknown
        ) {
            return Ok(None);
        }
        let has_credentials = request.contains("username") || request.contains("password");
        if !has_credentials && !self.require_auth {
            return Ok(None);
        }

        let user = self
            .auth
            .authenticate(request.text("username")?, request.text("password")?)?;
        if !user.permission.permits(action) {
            return Err(GradebookError::PermissionDenied(action.name().to_owned()));
        }
        Ok(Some(user))
    }

    fn login(&self, request: &Request, _caller: Option<&User>) -> Result<Response> {
        let user = self
            .auth
            .authenticate(request.text("username")?, request.text("password")?)?;
        if user.permission == Permission::Unknown {
            return Err(GradebookError::PermissionDenied(
                Action::Login.name().to_owned(),
            ));
        }
        Ok(Response::success()
            .with_message("Login successful")
            .with_permission(user.permission))
    }

    fn add_student(&self, request: &Request, _caller: Option<&User>) -> Result<Response> {
        let record = StudentRecord {
            student_id: request.text("student_id")?.to_owned(),
            name: request.text("name")?.to_owned(),
            gender: request.text("gender")?.to_owned(),
            score1: request.number("score1")?,
            score2: request.number("score2")?,
            score3: request.number("score3")?,
        };
        let student_id = record.student_id.clone();
        if !self.store.create(record)? {
            return Err(GradebookError::DuplicateStudent(student_id));
        }
        Ok(Response::success().with_message("Student added successfully"))
    }

    fn delete_student(&self, request: &Request, _caller: Option<&User>) -> Result<Response> {
        let student_id = request.text("student_id")?;
        if !self.store.delete(student_id)? {
            return Err(GradebookError::StudentNotFound(student_id.to_owned()));
        }
        Ok(Response::success().with_message("Student deleted successfully"))
    }

    fn update_student(&self, request: &Request, _caller: Option<&User>) -> Result<Response> {
        let update = StudentUpdate {
            student_id: request.text("student_id")?.to_owned(),
            name: request.optional_text("name")?.map(str::to_owned),
            gender: request.optional_text("gender")?.map(str::to_owned),
            score1: request.optional_number("score1")?,
            score2: request.optional_number("score2")?,
            score3: request.optional_number("score3")?,
        };
        if update.is_empty() {
            return Err(GradebookError::NoUpdateFields);
        }
        if !self.store.update(&update)? {
            return Err(GradebookError::StudentNotFound(update.student_id));
        }
        Ok(Response::success().with_message("Student updated successfully"))
    }

    fn get_student(&self, request: &Request, caller: Option<&User>) -> Result<Response> {
        let student_id = request.text("student_id")?;
        if let Some(user) = caller {
            if user.permission == Permission::User && user.username != student_id {
                return Err(GradebookError::PermissionDenied(
                    Action::GetStudent.name().to_owned(),
                ));
            }
        }
        let record = self
            .store
            .read(student_id)?
            .ok_or_else(|| GradebookError::StudentNotFound(student_id.to_owned()))?;
        Ok(Response::success().with_data(json!({
            "student_id": record.student_id,
            "name": record.name,
            "gender": record.gender,
            "score1": record.score1,
            "score2": record.score2,
            "score3": record.score3,
        })))
    }

    fn list_students(&self, _request: &Request, _caller: Option<&User>) -> Result<Response> {
        let students: Vec<Value> = self
            .store
            .list_sorted_by_total_desc()?
            .into_iter()
            .map(|record| {
                json!({
                    "student_id": record.student_id,
                    "name": record.name,
                    "gender": record.gender,
                    "score1": record.score1,
                    "score2": record.score2,
                    "score3": record.score3,
                    "total": record.total(),
                })
            })
            .collect();
        Ok(Response::success().with_data(Value::Array(students)))
    }

    fn get_statistics(&self, _request: &Request, _caller: Option<&User>) -> Result<Response> {
        let statistics = self.store.aggregate()?;
        Ok(Response::success().with_data(serde_json::to_value(statistics)?))
    }

    fn change_password(&self, request: &Request, _caller: Option<&User>) -> Result<Response> {
        self.auth.change_password(
            request.text("username")?,
            request.text("old_password")?,
            request.text("new_password")?,
        )?;
        Ok(Response::success().with_message("Password changed successfully"))
    }

    fn unknown(&self, request: &Request, _caller: Option<&User>) -> Result<Response> {
        Err(ProtocolError::UnknownAction(request.action_name().to_owned()).into())
    }
}

fn audit(action: &str, username: Option<&str>, peer: &str, outcome: std::result::Result<(), &str>) {
    let by = username.map(|u| format!(" by {u}")).unwrap_or_default();
    match outcome {
        Ok(()) => info!(target: AUDIT_TARGET, "{action}{by} - SUCCESS - {peer}"),
        Err(detail) => info!(target: AUDIT_TARGET, "{action}{by} - FAILED - {peer} - {detail}"),
    }
}
