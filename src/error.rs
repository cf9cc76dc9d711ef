// src/error.rs

//! Defines the primary error type for the client, mirroring the taxonomy that gRPC
//! transport errors and application-level store errors are classified into.

use std::sync::Arc;
use thiserror::Error;
use tonic::Code;

/// The main error enum, representing all possible failures a caller of this crate
/// can observe. `#[source]` preserves the underlying transport error where one exists.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("cancelled")]
    Cancelled(#[source] Option<Arc<tonic::Status>>),

    #[error("unknown error: {0}")]
    Unknown(String),

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("deadline exceeded")]
    DeadlineExceeded,

    #[error("key not found")]
    NotFound,

    #[error("already exists")]
    AlreadyExists,

    #[error("permission denied")]
    PermissionDenied,

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("failed precondition: {0}")]
    FailedPrecondition(String),

    #[error("aborted: {0}")]
    Aborted(String),

    #[error("out of range: {0}")]
    OutOfRange(String),

    #[error("not implemented")]
    NotImplemented,

    #[error("internal error: {0}")]
    Internal(String),

    #[error("unavailable: {0}")]
    Unavailable(String),

    #[error("data loss: {0}")]
    DataLoss(String),

    #[error("unauthenticated")]
    Unauthenticated,

    #[error("role already exists")]
    RoleExists,

    #[error("user already exists")]
    UserExists,

    #[error("role is not granted to the user")]
    RoleNotGranted,

    #[error("role not found")]
    RoleNotFound,

    #[error("user not found")]
    UserNotFound,

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("invalid auth token")]
    InvalidAuthToken,

    #[error("requested lease not found")]
    LeaseInvalid,

    #[error("failed to acquire lock")]
    LockFailed,

    #[error("watch stream ended unexpectedly")]
    WatchStreamEnded,

    #[error("no leader")]
    NoLeader,

    #[error("not the leader")]
    NotLeader,

    #[error("transaction conflict, retries exhausted")]
    STMConflict,

    #[error("client is closed")]
    ClientClosed,

    #[error("campaign is not running")]
    NotCampaigning,

    #[error("invalid configuration: {0}")]
    Config(String),

    /// Internal invariant violated; indicates a bug in this crate rather than a
    /// server- or network-triggered condition.
    #[error("client runtime invariant violated: {0}")]
    ClientRuntime(String),
}

/// String-match table mapping substrings of server error messages to application-level
/// kinds, checked in the order listed (first match wins), in the spirit of this
/// codebase's glob-matching ACL rule tables.
const MESSAGE_TABLE: &[(&str, fn(String) -> ClientError)] = &[
    ("etcdserver: role name already exists", |_| ClientError::RoleExists),
    ("etcdserver: user name already exists", |_| ClientError::UserExists),
    ("etcdserver: role is not granted to the user", |_| ClientError::RoleNotGranted),
    ("etcdserver: role name not found", |_| ClientError::RoleNotFound),
    ("etcdserver: user name not found", |_| ClientError::UserNotFound),
    ("etcdserver: authentication failed, invalid user ID or password", |_| {
        ClientError::AuthenticationFailed
    }),
    ("etcdserver: invalid auth token", |_| ClientError::InvalidAuthToken),
    ("etcdserver: auth: token provided is invalid", |_| ClientError::InvalidAuthToken),
    ("etcdserver: requested lease not found", |_| ClientError::LeaseInvalid),
    ("etcdserver: lease not found", |_| ClientError::LeaseInvalid),
    ("etcdserver: no leader", |_| ClientError::NoLeader),
];

impl ClientError {
    /// Classifies a transport-level error into a typed `ClientError`, preserving the
    /// original message and source chain. This is the sole entry point the pool and
    /// every streaming subsystem route gRPC failures through.
    pub fn classify(status: tonic::Status) -> Self {
        let message = status.message().to_string();
        for (needle, ctor) in MESSAGE_TABLE {
            if message.contains(needle) {
                return ctor(message);
            }
        }

        let status = Arc::new(status);
        match status.code() {
            Code::Cancelled => ClientError::Cancelled(Some(status)),
            Code::Unknown => ClientError::Unknown(message),
            Code::InvalidArgument => ClientError::InvalidArgument(message),
            Code::DeadlineExceeded => ClientError::DeadlineExceeded,
            Code::NotFound => ClientError::NotFound,
            Code::AlreadyExists => ClientError::AlreadyExists,
            Code::PermissionDenied => ClientError::PermissionDenied,
            Code::ResourceExhausted => ClientError::ResourceExhausted(message),
            Code::FailedPrecondition => ClientError::FailedPrecondition(message),
            Code::Aborted => ClientError::Aborted(message),
            Code::OutOfRange => ClientError::OutOfRange(message),
            Code::Unimplemented => ClientError::NotImplemented,
            Code::Internal => ClientError::Internal(message),
            Code::Unavailable => ClientError::Unavailable(message),
            Code::DataLoss => ClientError::DataLoss(message),
            Code::Unauthenticated => ClientError::Unauthenticated,
            Code::Ok => ClientError::ClientRuntime("classify called on an Ok status".into()),
        }
    }

    /// Whether retrying this error against a different host (or the same host, later)
    /// has a reasonable chance of succeeding.
    pub fn recoverable(&self) -> bool {
        matches!(
            self,
            ClientError::Cancelled(_)
                | ClientError::Unknown(_)
                | ClientError::DeadlineExceeded
                | ClientError::ResourceExhausted(_)
                | ClientError::Aborted(_)
                | ClientError::Internal(_)
                | ClientError::Unavailable(_)
        )
    }
}

impl From<tonic::Status> for ClientError {
    fn from(status: tonic::Status) -> Self {
        ClientError::classify(status)
    }
}

impl From<tonic::transport::Error> for ClientError {
    fn from(err: tonic::transport::Error) -> Self {
        ClientError::Unavailable(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn transport_codes_map_one_to_one() {
        let cases: &[(Code, fn(&ClientError) -> bool)] = &[
            (Code::Cancelled, |e| matches!(e, ClientError::Cancelled(_))),
            (Code::NotFound, |e| matches!(e, ClientError::NotFound)),
            (Code::AlreadyExists, |e| matches!(e, ClientError::AlreadyExists)),
            (Code::PermissionDenied, |e| matches!(e, ClientError::PermissionDenied)),
            (Code::Unauthenticated, |e| matches!(e, ClientError::Unauthenticated)),
            (Code::Unimplemented, |e| matches!(e, ClientError::NotImplemented)),
        ];
        for (code, check) in cases {
            let status = tonic::Status::new(*code, "boom");
            let err = ClientError::classify(status);
            assert!(check(&err), "unexpected classification for {code:?}: {err:?}");
        }
    }

    #[test]
    fn string_match_table_overrides_code() {
        let status = tonic::Status::new(Code::InvalidArgument, "etcdserver: requested lease not found");
        assert!(matches!(ClientError::classify(status), ClientError::LeaseInvalid));
    }

    #[test]
    fn recoverable_set_matches_spec() {
        assert!(ClientError::Unavailable("x".into()).recoverable());
        assert!(ClientError::DeadlineExceeded.recoverable());
        assert!(!ClientError::NotFound.recoverable());
        assert!(!ClientError::PermissionDenied.recoverable());
    }
}
