use std::collections::HashMap;
use std::error::Error as StdError;
use std::fmt;

use anyhow::Error as AnyhowError;
use serde::{Deserialize, Serialize};
use serde_json::Error as SerdeJsonError;
use sqlx::Error as SqlxError;
use std::io::Error as IoError;

/// A structured engine error that can be serialized into run reports and logs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppError {
    /// Machine readable error code, namespaced per component (`STORE/…`, `FIX/…`).
    pub code: String,
    /// Human friendly message.
    pub message: String,
    /// Arbitrary key/value pairs that provide additional context.
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub context: HashMap<String, String>,
    /// Optional nested cause that preserves the error chain.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cause: Option<Box<AppError>>,
}

pub type AppResult<T> = std::result::Result<T, AppError>;

impl AppError {
    /// Default code used when an upstream error does not expose a specific code.
    pub const UNKNOWN_CODE: &'static str = "APP/UNKNOWN";
    /// Code used for errors created from free-form messages.
    pub const GENERIC_CODE: &'static str = "APP/GENERIC";

    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        AppError {
            code: code.into(),
            message: message.into(),
            context: HashMap::new(),
            cause: None,
        }
    }

    pub fn code(&self) -> &str {
        &self.code
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &HashMap<String, String> {
        &self.context
    }

    pub fn cause(&self) -> Option<&AppError> {
        self.cause.as_deref()
    }

    /// Adds a contextual key/value pair to the error.
    pub fn with_context(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.context.insert(key.into(), value.into());
        self
    }

    /// Sets the nested cause for the error.
    pub fn with_cause(mut self, cause: impl Into<AppError>) -> Self {
        self.cause = Some(Box::new(cause.into()));
        self
    }
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.context.is_empty() {
            write!(f, "[{}] {}", self.code, self.message)
        } else {
            write!(f, "[{}] {} ({:?})", self.code, self.message, self.context)
        }
    }
}

impl StdError for AppError {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.cause
            .as_deref()
            .map(|cause| cause as &(dyn StdError + 'static))
    }
}

impl From<&str> for AppError {
    fn from(message: &str) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<String> for AppError {
    fn from(message: String) -> Self {
        AppError::new(AppError::GENERIC_CODE, message)
    }
}

impl From<AnyhowError> for AppError {
    fn from(error: AnyhowError) -> Self {
        fn convert(err: &(dyn StdError + 'static)) -> AppError {
            if let Some(app) = err.downcast_ref::<AppError>() {
                return app.clone();
            }

            let mut root = AppError::new(AppError::UNKNOWN_CODE, err.to_string());
            if let Some(source) = err.source() {
                root.cause = Some(Box::new(convert(source)));
            }
            root
        }

        convert(error.as_ref())
    }
}

impl From<IoError> for AppError {
    fn from(error: IoError) -> Self {
        let code = format!("IO/{:?}", error.kind());
        let mut app_error = AppError::new(code, error.to_string());
        if let Some(os_code) = error.raw_os_error() {
            app_error = app_error.with_context("os_code", os_code.to_string());
        }
        app_error
    }
}

impl From<SerdeJsonError> for AppError {
    fn from(error: SerdeJsonError) -> Self {
        let code = if error.is_data() {
            "JSON/DATA"
        } else if error.is_syntax() {
            "JSON/SYNTAX"
        } else if error.is_eof() {
            "JSON/EOF"
        } else if error.is_io() {
            "JSON/IO"
        } else {
            "JSON/ERROR"
        };

        let mut app_error = AppError::new(code, error.to_string());
        let line = error.line();
        if line > 0 {
            app_error = app_error.with_context("line", line.to_string());
        }
        let column = error.column();
        if column > 0 {
            app_error = app_error.with_context("column", column.to_string());
        }
        app_error
    }
}

impl From<SqlxError> for AppError {
    fn from(error: SqlxError) -> Self {
        match error {
            SqlxError::RowNotFound => AppError::new("SQLX/ROW_NOT_FOUND", "Record not found"),
            SqlxError::ColumnNotFound(name) => {
                AppError::new("SQLX/COLUMN_NOT_FOUND", format!("Column not found: {name}"))
            }
            SqlxError::PoolTimedOut => AppError::new(
                "SQLX/POOL_TIMEOUT",
                "Timed out acquiring a database connection",
            ),
            SqlxError::PoolClosed => AppError::new("SQLX/POOL_CLOSED", "Database pool is closed"),
            SqlxError::Io(err) => AppError::from(err).with_context("source", "sqlx"),
            SqlxError::Database(db) => {
                let code = db
                    .code()
                    .map(|code| format!("Sqlite/{code}"))
                    .unwrap_or_else(|| "SQLX/DATABASE".to_string());
                let mut app_error = AppError::new(code, db.message().to_string());
                if let Some(constraint) = db.constraint() {
                    app_error = app_error.with_context("constraint", constraint.to_string());
                }
                app_error
            }
            SqlxError::ColumnDecode { index, source } => {
                AppError::new("SQLX/COLUMN_DECODE", source.to_string())
                    .with_context("column_index", index.to_string())
            }
            SqlxError::Decode(decode_err) => AppError::new("SQLX/DECODE", decode_err.to_string()),
            other => AppError::new("SQLX/ERROR", other.to_string()),
        }
    }
}
