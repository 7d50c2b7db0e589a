// Copyright (c) 2025 Graphcore Ltd. All rights reserved.

//! Operational error reporting.
//!
//! Fatal task errors travel as [`SimError`](ssd_engine::types::SimError)
//! through `SimResult`. Operational failures (a bad NAND block, CRC retries
//! exhausted) are non-fatal: the offending packet is dropped, a counter is
//! incremented and a [`ModelError`] is pushed onto the composition's shared
//! [`ErrorLog`] so the statistics snapshot can reveal them after the run.

use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

/// The kinds of operational and configuration errors a module can raise.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidAttribute,
    AddressOutOfBounds,
    InvalidPacketType,
    ConfigurationError,
    ResourceExhausted,
    DeviceError,
}

impl ErrorKind {
    /// Short stable code used in logs.
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            ErrorKind::InvalidAttribute => "E001",
            ErrorKind::AddressOutOfBounds => "E002",
            ErrorKind::InvalidPacketType => "E003",
            ErrorKind::ConfigurationError => "E004",
            ErrorKind::ResourceExhausted => "E005",
            ErrorKind::DeviceError => "E006",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// One surfaced operational error.
#[derive(Clone, Debug)]
pub struct ModelError {
    pub module: String,
    pub kind: ErrorKind,
    pub message: String,
}

impl fmt::Display for ModelError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "{}: [{}] {} {}",
            self.module,
            self.kind.code(),
            self.kind,
            self.message
        )
    }
}

/// A shared, append-only record of the operational errors raised during a
/// run.
#[derive(Clone, Default)]
pub struct ErrorLog {
    errors: Rc<RefCell<Vec<ModelError>>>,
}

impl ErrorLog {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, module: &str, kind: ErrorKind, message: String) {
        self.errors.borrow_mut().push(ModelError {
            module: String::from(module),
            kind,
            message,
        });
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.errors.borrow().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.errors.borrow().is_empty()
    }

    /// Clone out the recorded errors.
    #[must_use]
    pub fn snapshot(&self) -> Vec<ModelError> {
        self.errors.borrow().clone()
    }

    /// Count the recorded errors of one kind.
    #[must_use]
    pub fn count_of(&self, kind: ErrorKind) -> usize {
        self.errors.borrow().iter().filter(|e| e.kind == kind).count()
    }
}

/// Report an operational error: log it against the entity and append it to
/// the shared error log.
#[macro_export]
macro_rules! model_error {
    ($entity:expr, $log:expr, $kind:expr ; $($arg:tt)+) => {{
        let message = format!($($arg)+);
        ssd_track::error!($entity ; "[{}] {}", $kind.code(), message);
        $log.push(&$entity.full_name(), $kind, message);
    }};
}
