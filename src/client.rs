use std::fmt::Display;
use std::io::{BufWriter, Write};
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::thread;
use std::time::Duration;

use log::{info, warn};
use serde::Deserialize;
use serde_json::de::IoRead;
use serde_json::Deserializer;

use crate::protocol::{Action, Request, Response};
use crate::store::{StudentRecord, StudentUpdate};
use crate::{GradebookError, Result};

/// Send and receive timeout bounding a single exchange.
pub const IO_TIMEOUT: Duration = Duration::from_secs(5);

/// How many times, and how far apart, to try connecting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub attempts: u32,
    /// Pause between failed attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            attempts: 5,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Calls `attempt` with the 1-based attempt number until it succeeds or
    /// the attempts run out, sleeping `delay` between failures. Returns the
    /// last error.
    pub fn retry<T, E: Display>(
        &self,
        mut attempt: impl FnMut(u32) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E> {
        let attempts = self.attempts.max(1);
        let mut n = 1;
        loop {
            match attempt(n) {
                Ok(value) => return Ok(value),
                Err(e) if n < attempts => {
                    warn!(
                        "Attempt {}/{} failed: {}; retrying in {:?}",
                        n, attempts, e, self.delay
                    );
                    thread::sleep(self.delay);
                    n += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Username and password resent with every privileged request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    /// Login name.
    pub username: String,
    /// Plaintext password, kept only in client memory.
    pub password: String,
}

/// The client side of one connection.
///
/// Strictly one outstanding request: every call writes a request and
/// blocks until its response has been read.
pub struct GradebookClient {
    reader: Deserializer<IoRead<TcpStream>>,
    writer: BufWriter<TcpStream>,
    peer: SocketAddr,
    credentials: Option<Credentials>,
}

impl GradebookClient {
    /// Connects once to `addr`.
    pub fn connect(addr: SocketAddr) -> Result<Self> {
        let reader_stream = TcpStream::connect_timeout(&addr, IO_TIMEOUT)?;
        reader_stream.set_read_timeout(Some(IO_TIMEOUT))?;
        reader_stream.set_write_timeout(Some(IO_TIMEOUT))?;
        let writer_stream = reader_stream.try_clone()?;
        Ok(Self {
            reader: Deserializer::from_reader(reader_stream),
            writer: BufWriter::new(writer_stream),
            peer: addr,
            credentials: None,
        })
    }

    /// Connects with the default policy: 5 attempts, 3 seconds apart.
    pub fn connect_with_retry(host: &str, port: u16) -> Result<Self> {
        Self::connect_with_policy(host, port, &RetryPolicy::default())
    }

    /// Connects, retrying failures according to `policy`.
    pub fn connect_with_policy(host: &str, port: u16, policy: &RetryPolicy) -> Result<Self> {
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            GradebookError::StringError(format!("{host}:{port} did not resolve to an address"))
        })?;

        policy
            .retry(|attempt| {
                info!(
                    "Connecting to {} (attempt {}/{})",
                    addr, attempt, policy.attempts
                );
                Self::connect(addr)
            })
            .map_err(|e| {
                warn!("Giving up on {}: {}", addr, e);
                GradebookError::Connection {
                    addr,
                    attempts: policy.attempts.max(1),
                }
            })
    }

    /// The server address.
    pub fn peer_addr(&self) -> SocketAddr {
        self.peer
    }

    /// Credentials attached to privileged requests, if logged in.
    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Replaces the stored credentials.
    pub fn set_credentials(&mut self, credentials: Option<Credentials>) {
        self.credentials = credentials;
    }

    /// Sends one request and waits for its response.
    pub fn send(&mut self, request: &Request) -> Result<Response> {
        self.writer.write_all(&request.encode())?;
        self.writer.flush()?;
        Ok(Response::deserialize(&mut self.reader)?)
    }

    fn send_authenticated(&mut self, request: Request) -> Result<Response> {
        let request = match &self.credentials {
            Some(credentials) => request
                .with("username", credentials.username.as_str())
                .with("password", credentials.password.as_str()),
            None => request,
        };
        self.send(&request)
    }

    /// Checks credentials. On success they are kept for later requests.
    pub fn login(&mut self, username: &str, password: &str) -> Result<Response> {
        let request = Request::new(Action::Login)
            .with("username", username)
            .with("password", password);
        let response = self.send(&request)?;
        if response.is_success() {
            self.credentials = Some(Credentials {
                username: username.to_owned(),
                password: password.to_owned(),
            });
        }
        Ok(response)
    }

    /// Adds a new student.
    pub fn add_student(&mut self, record: &StudentRecord) -> Result<Response> {
        let request = Request::new(Action::AddStudent)
            .with("student_id", record.student_id.as_str())
            .with("name", record.name.as_str())
            .with("gender", record.gender.as_str())
            .with("score1", record.score1)
            .with("score2", record.score2)
            .with("score3", record.score3);
        self.send_authenticated(request)
    }

    /// Deletes a student.
    pub fn delete_student(&mut self, student_id: &str) -> Result<Response> {
        self.send_authenticated(Request::new(Action::DeleteStudent).with("student_id", student_id))
    }

    /// Sends only the fields set in `update`.
    pub fn update_student(&mut self, update: &StudentUpdate) -> Result<Response> {
        let mut request =
            Request::new(Action::UpdateStudent).with("student_id", update.student_id.as_str());
        if let Some(name) = &update.name {
            request = request.with("name", name.as_str());
        }
        if let Some(gender) = &update.gender {
            request = request.with("gender", gender.as_str());
        }
        for (field, score) in [
            ("score1", update.score1),
            ("score2", update.score2),
            ("score3", update.score3),
        ] {
            if let Some(score) = score {
                request = request.with(field, score);
            }
        }
        self.send_authenticated(request)
    }

    /// Fetches one student.
    pub fn get_student(&mut self, student_id: &str) -> Result<Response> {
        self.send_authenticated(Request::new(Action::GetStudent).with("student_id", student_id))
    }

    /// Fetches every student, highest total first.
    pub fn list_students(&mut self) -> Result<Response> {
        self.send_authenticated(Request::new(Action::ListStudents))
    }

    /// Fetches per-subject statistics.
    pub fn get_statistics(&mut self) -> Result<Response> {
        self.send_authenticated(Request::new(Action::GetStatistics))
    }

    /// Changes a password. On success stored credentials are updated.
    pub fn change_password(
        &mut self,
        username: &str,
        old_password: &str,
        new_password: &str,
    ) -> Result<Response> {
        let request = Request::new(Action::ChangePassword)
            .with("username", username)
            .with("old_password", old_password)
            .with("new_password", new_password);
        let response = self.send(&request)?;
        if response.is_success() {
            if let Some(credentials) = &mut self.credentials {
                if credentials.username == username {
                    credentials.password = new_password.to_owned();
                }
            }
        }
        Ok(response)
    }
}
