use std::convert::Infallible;
use std::error::Error;
use std::fmt;
use std::fmt::{Display, Formatter};

use serde::Serialize;
use warp::http::StatusCode;
use warp::reject::Reject;

#[derive(Clone, Debug)]
pub struct ServerError {
  message: String,
  pub kind: ServerErrorKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ServerErrorKind {
  Invalid,               // 400
  DoesNotExist,          // 404
  AlreadyHeld,           // 409, lock contention
  NotLeader,             // election lost; caller should sleep until next cycle
  CopyError,             // bulk-store transfer failed
  ProvisionError,        // local filesystem or DDL failure
  CoordinationStoreError, // transient; retried within the tick budget
  ConfigError,           // fatal at startup
  Internal,              // 500
}

impl ServerErrorKind {
  pub fn warp_status_code(&self) -> StatusCode {
    match self {
      ServerErrorKind::Invalid => StatusCode::BAD_REQUEST,
      ServerErrorKind::DoesNotExist => StatusCode::NOT_FOUND,
      ServerErrorKind::AlreadyHeld => StatusCode::CONFLICT,
      ServerErrorKind::NotLeader => StatusCode::SERVICE_UNAVAILABLE,
      ServerErrorKind::CopyError => StatusCode::BAD_GATEWAY,
      ServerErrorKind::ProvisionError => StatusCode::INTERNAL_SERVER_ERROR,
      ServerErrorKind::CoordinationStoreError => StatusCode::SERVICE_UNAVAILABLE,
      ServerErrorKind::ConfigError => StatusCode::INTERNAL_SERVER_ERROR,
      ServerErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
    }
  }

  // whether a tick encountering this error kind should retry on its own,
  // rather than surface the failure to a caller
  pub fn is_transient(&self) -> bool {
    matches!(self, ServerErrorKind::CoordinationStoreError | ServerErrorKind::CopyError)
  }
}

impl ServerError {
  pub fn does_not_exist(entity_name: &'static str, value: &str) -> ServerError {
    ServerError {
      message: format!("{} with name {} does not exist", entity_name, value),
      kind: ServerErrorKind::DoesNotExist,
    }
  }

  pub fn invalid(explanation: impl Into<String>) -> ServerError {
    ServerError {
      message: explanation.into(),
      kind: ServerErrorKind::Invalid,
    }
  }

  pub fn internal(explanation: impl Into<String>) -> ServerError {
    ServerError {
      message: explanation.into(),
      kind: ServerErrorKind::Internal,
    }
  }

  pub fn already_held(name: &str) -> ServerError {
    ServerError {
      message: format!("lock {} is already held", name),
      kind: ServerErrorKind::AlreadyHeld,
    }
  }

  pub fn not_leader() -> ServerError {
    ServerError {
      message: "this node is not the sync master".to_string(),
      kind: ServerErrorKind::NotLeader,
    }
  }

  pub fn copy_error(explanation: impl Into<String>) -> ServerError {
    ServerError {
      message: explanation.into(),
      kind: ServerErrorKind::CopyError,
    }
  }

  pub fn provision_error(explanation: impl Into<String>) -> ServerError {
    ServerError {
      message: explanation.into(),
      kind: ServerErrorKind::ProvisionError,
    }
  }

  pub fn coordination_store(explanation: impl Into<String>) -> ServerError {
    ServerError {
      message: explanation.into(),
      kind: ServerErrorKind::CoordinationStoreError,
    }
  }

  pub fn config(explanation: impl Into<String>) -> ServerError {
    ServerError {
      message: explanation.into(),
      kind: ServerErrorKind::ConfigError,
    }
  }
}

impl Display for ServerError {
  fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
    let prefix = match &self.kind {
      ServerErrorKind::Invalid => "invalid request",
      ServerErrorKind::DoesNotExist => "missing",
      ServerErrorKind::AlreadyHeld => "lock held",
      ServerErrorKind::NotLeader => "not leader",
      ServerErrorKind::CopyError => "copy failed",
      ServerErrorKind::ProvisionError => "provision failed",
      ServerErrorKind::CoordinationStoreError => "coordination store error",
      ServerErrorKind::ConfigError => "config error",
      ServerErrorKind::Internal => "internal error",
    };
    write!(f, "{}; {}", prefix, self.message)
  }
}

impl<E> From<E> for ServerError where E: Error {
  fn from(reason: E) -> Self {
    ServerError {
      message: reason.to_string(),
      kind: ServerErrorKind::Internal,
    }
  }
}

pub type ServerResult<T> = Result<T, ServerError>;

#[derive(Serialize)]
struct ErrorResponse {
  pub message: String,
}

impl Reject for ServerError {}

pub fn server_result_into_warp<T: Serialize>(res: ServerResult<T>) -> Result<Box<dyn warp::Reply>, Infallible> {
  match res {
    Ok(x) => Ok(Box::new(warp::reply::json(&x))),
    Err(e) => {
      let reply = warp::reply::json(&ErrorResponse { message: e.to_string() });
      Ok(Box::new(warp::reply::with_status(reply, e.kind.warp_status_code())))
    }
  }
}
