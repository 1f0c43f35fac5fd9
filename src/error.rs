//! Error types for pglink.

use std::collections::BTreeMap;

use thiserror::Error;

/// Result type for pglink operations.
pub type Result<T> = core::result::Result<T, Error>;

/// PostgreSQL error/notice fields reported by the server.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorFields {
    /// Severity: ERROR, FATAL, PANIC, WARNING, NOTICE, DEBUG, INFO, LOG
    pub severity: Option<String>,
    /// SQLSTATE error code (5 characters)
    pub code: Option<String>,
    /// Primary error message
    pub message: Option<String>,
    /// Detailed error explanation
    pub detail: Option<String>,
    /// Suggestion for fixing the error
    pub hint: Option<String>,
    /// Cursor position in query string (1-based)
    pub position: Option<u32>,
    /// Context/stack trace
    pub where_: Option<String>,
    /// Schema name
    pub schema: Option<String>,
    /// Table name
    pub table: Option<String>,
    /// Column name
    pub column: Option<String>,
    /// Data type name
    pub data_type: Option<String>,
    /// Constraint name
    pub constraint: Option<String>,
    /// Source file name
    pub file: Option<String>,
    /// Source line number
    pub line: Option<u32>,
    /// Source routine name
    pub routine: Option<String>,
}

impl ErrorFields {
    /// Create fields carrying a SQLSTATE code and primary message.
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            severity: Some("ERROR".into()),
            code: Some(code.into()),
            message: Some(message.into()),
            ..Self::default()
        }
    }

    /// Diagnostics as a key/value mapping.
    ///
    /// Keys follow libpq's diagnostic field names (`sqlstate`, `message_primary`,
    /// `message_detail`, ...). Absent fields are omitted.
    pub fn diagnostics(&self) -> BTreeMap<&'static str, String> {
        let mut map = BTreeMap::new();
        let text = [
            ("severity", &self.severity),
            ("sqlstate", &self.code),
            ("message_primary", &self.message),
            ("message_detail", &self.detail),
            ("message_hint", &self.hint),
            ("context", &self.where_),
            ("schema_name", &self.schema),
            ("table_name", &self.table),
            ("column_name", &self.column),
            ("datatype_name", &self.data_type),
            ("constraint_name", &self.constraint),
            ("source_file", &self.file),
            ("source_function", &self.routine),
        ];
        for (key, value) in text {
            if let Some(value) = value {
                map.insert(key, value.clone());
            }
        }
        if let Some(position) = self.position {
            map.insert("statement_position", position.to_string());
        }
        if let Some(line) = self.line {
            map.insert("source_line", line.to_string());
        }
        map
    }
}

impl std::fmt::Display for ErrorFields {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if let Some(severity) = &self.severity {
            write!(f, "{}: ", severity)?;
        }
        if let Some(message) = &self.message {
            write!(f, "{}", message)?;
        }
        if let Some(code) = &self.code {
            write!(f, " (SQLSTATE {})", code)?;
        }
        if let Some(detail) = &self.detail {
            write!(f, "\nDETAIL: {}", detail)?;
        }
        if let Some(hint) = &self.hint {
            write!(f, "\nHINT: {}", hint)?;
        }
        Ok(())
    }
}

/// Error type for pglink.
#[derive(Debug, Error)]
pub enum Error {
    /// The connection could not be established or was lost
    #[error("Connection error: {0}")]
    Connection(String),

    /// Malformed input rejected before anything was sent to the server
    #[error("Query error: {0}")]
    Query(String),

    /// Server error response for a query that reached the server
    #[error("PostgreSQL error: {0}")]
    Server(ErrorFields),

    /// Operation on a transaction that is no longer active
    #[error("Transaction error: {0}")]
    Transaction(String),

    /// The operation was cancelled before completion
    #[error("Operation cancelled")]
    Cancelled,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Invalid usage (e.g., unlistening twice)
    #[error("Invalid usage: {0}")]
    InvalidUsage(String),

    /// A column value could not be converted to the requested type
    #[error("Decode error: {0}")]
    Decode(String),
}

impl Error {
    /// Returns true if the error indicates the connection is broken and cannot be reused.
    pub fn is_connection_broken(&self) -> bool {
        match self {
            Error::Io(_) | Error::Connection(_) => true,
            Error::Server(fields) => {
                // FATAL and PANIC errors terminate the backend
                matches!(fields.severity.as_deref(), Some("FATAL") | Some("PANIC"))
            }
            _ => false,
        }
    }

    /// Get the SQLSTATE code if this is a server error.
    pub fn sqlstate(&self) -> Option<&str> {
        match self {
            Error::Server(fields) => fields.code.as_deref(),
            _ => None,
        }
    }

    /// Server diagnostics if this is a server error.
    pub fn diagnostics(&self) -> Option<BTreeMap<&'static str, String>> {
        match self {
            Error::Server(fields) => Some(fields.diagnostics()),
            _ => None,
        }
    }
}
