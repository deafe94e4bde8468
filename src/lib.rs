#![deny(missing_docs)]

//! A networked student score roster.
//!
//! A threaded TCP server answers single-object JSON requests against a
//! pluggable record store, and a menu-driven client talks to it. Passwords
//! are checked against SHA-256 digests; admins may change the roster,
//! users may only read it.

/// Password verification and permissions.
pub mod auth;
mod client;
mod config;
mod dispatcher;
mod error;
/// Wire protocol and framing.
pub mod protocol;
mod server;
mod session;
/// Record and account storage.
pub mod store;
/// Thread pool implementations for concurrent request handling.
pub mod thread_pool;

pub use auth::{hash_password, AuthService, Permission, User};
pub use client::{Credentials, GradebookClient, RetryPolicy, IO_TIMEOUT};
pub use config::{ClientConfig, CONFIG_FILE_NAME};
pub use dispatcher::Dispatcher;
pub use error::{GradebookError, Result};
pub use protocol::{Action, Request, Response, Status};
pub use server::{
    GradebookServer, ServerOptions, ShutdownHandle, DEFAULT_PORT, PARTIAL_REQUEST_TIMEOUT,
};
pub use session::{ClientSession, MenuState, SessionOutcome, MAX_LOGIN_ATTEMPTS};
pub use store::{
    Account, AccountStore, DataStore, MemoryStore, SledStore, Statistics, StudentRecord,
    StudentStore, StudentUpdate, SubjectStats,
};
pub use thread_pool::{NaiveThreadPool, SharedQueueThreadPool, ThreadPool};
