//! Error types for the bulker library.

use std::fmt;

use thiserror::Error;

/// Boxed source error carried by destination failures.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Which destination operation failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Connect,
    BeginTransaction,
    Commit,
    Rollback,
    CreateSchema,
    GetTableSchema,
    CreateTable,
    PatchTableSchema,
    Insert,
    CopyTables,
    TruncateTable,
    DropTable,
    ReplaceTable,
    Update,
    Delete,
    Select,
    Count,
    Upload,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Connect => "connect",
            ErrorKind::BeginTransaction => "begin transaction",
            ErrorKind::Commit => "commit",
            ErrorKind::Rollback => "rollback",
            ErrorKind::CreateSchema => "create schema",
            ErrorKind::GetTableSchema => "get table schema",
            ErrorKind::CreateTable => "create table",
            ErrorKind::PatchTableSchema => "patch table schema",
            ErrorKind::Insert => "insert",
            ErrorKind::CopyTables => "copy tables",
            ErrorKind::TruncateTable => "truncate table",
            ErrorKind::DropTable => "drop table",
            ErrorKind::ReplaceTable => "replace table",
            ErrorKind::Update => "update",
            ErrorKind::Delete => "delete",
            ErrorKind::Select => "select",
            ErrorKind::Count => "count",
            ErrorKind::Upload => "upload",
        };
        f.write_str(s)
    }
}

/// Structured context attached to destination failures.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorPayload {
    pub destination: String,
    pub schema: Option<String>,
    pub table: Option<String>,
    /// Object-storage bucket, for staged loads.
    pub bucket: Option<String>,
    pub statement: Option<String>,
}

impl ErrorPayload {
    pub fn new(destination: impl Into<String>) -> Self {
        Self {
            destination: destination.into(),
            ..Default::default()
        }
    }

    pub fn table(mut self, schema: impl Into<String>, table: impl Into<String>) -> Self {
        let schema = schema.into();
        self.schema = (!schema.is_empty()).then_some(schema);
        self.table = Some(table.into());
        self
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn statement(mut self, statement: impl Into<String>) -> Self {
        self.statement = Some(statement.into());
        self
    }
}

impl fmt::Display for ErrorPayload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "destination={}", self.destination)?;
        match (&self.schema, &self.table) {
            (Some(schema), Some(table)) => write!(f, " table={}.{}", schema, table)?,
            (None, Some(table)) => write!(f, " table={}", table)?,
            _ => {}
        }
        if let Some(bucket) = &self.bucket {
            write!(f, " bucket={}", bucket)?;
        }
        if let Some(statement) = &self.statement {
            write!(f, " statement={}", statement)?;
        }
        Ok(())
    }
}

/// Main error type for bulk-load operations.
#[derive(Error, Debug)]
pub enum BulkerError {
    /// Configuration error (invalid YAML, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Input rejected before reaching the destination. Never retried.
    #[error("Validation failed: {0}")]
    Validation(String),

    /// A destination operation failed.
    #[error("Failed to {kind}: {message}\n  Context: {payload}")]
    Destination {
        kind: ErrorKind,
        message: String,
        payload: ErrorPayload,
        #[source]
        source: Option<BoxError>,
    },

    /// The destination does not support the requested bulk mode.
    #[error("{destination}: {message} (requested '{mode}')")]
    UnsupportedMode {
        destination: String,
        mode: String,
        message: String,
    },

    /// HTTP destination answered with a non-success status.
    #[error("HTTP {status}: {body}\n  Context: {payload}")]
    Http {
        status: u16,
        body: String,
        payload: ErrorPayload,
    },

    /// The stream was already completed or aborted.
    #[error("Stream {0} is closed")]
    StreamClosed(String),

    /// Internal invariant violated.
    #[error("Internal error: {0}")]
    Internal(String),

    /// IO error (file operations)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Operation was cancelled (SIGINT, etc.)
    #[error("Operation cancelled")]
    Cancelled,
}

impl BulkerError {
    /// Create a Destination error wrapping a driver error.
    pub fn destination<E>(kind: ErrorKind, payload: ErrorPayload, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        BulkerError::Destination {
            kind,
            message: source.to_string(),
            payload,
            source: Some(Box::new(source)),
        }
    }

    /// Create a Destination error from a plain message.
    pub fn destination_msg(
        kind: ErrorKind,
        payload: ErrorPayload,
        message: impl Into<String>,
    ) -> Self {
        BulkerError::Destination {
            kind,
            message: message.into(),
            payload,
            source: None,
        }
    }

    /// Create an Http error for a rejected request.
    pub fn http(status: u16, body: impl Into<String>, payload: ErrorPayload) -> Self {
        BulkerError::Http {
            status,
            body: body.into(),
            payload,
        }
    }

    /// Create an UnsupportedMode error.
    pub fn unsupported_mode(
        destination: impl Into<String>,
        mode: impl fmt::Display,
        message: impl Into<String>,
    ) -> Self {
        BulkerError::UnsupportedMode {
            destination: destination.into(),
            mode: mode.to_string(),
            message: message.into(),
        }
    }

    /// Kind of the failed destination operation, if any.
    pub fn kind(&self) -> Option<ErrorKind> {
        match self {
            BulkerError::Destination { kind, .. } => Some(*kind),
            _ => None,
        }
    }

    /// Destination context of the failure, if any.
    pub fn payload(&self) -> Option<&ErrorPayload> {
        match self {
            BulkerError::Destination { payload, .. } | BulkerError::Http { payload, .. } => {
                Some(payload)
            }
            _ => None,
        }
    }

    /// Process exit code for the CLI.
    pub fn exit_code(&self) -> i32 {
        match self {
            BulkerError::Config(_) | BulkerError::Yaml(_) => 2,
            BulkerError::Validation(_) | BulkerError::UnsupportedMode { .. } => 3,
            BulkerError::Destination { .. } | BulkerError::Http { .. } => 4,
            BulkerError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for bulk-load operations.
pub type Result<T> = std::result::Result<T, BulkerError>;
