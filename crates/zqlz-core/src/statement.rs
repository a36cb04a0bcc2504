//! Prepared statement signatures
//!
//! A [`StatementSignature`] identifies a prepared statement exactly: the SQL
//! text plus every option that changes how the driver prepares it. Two
//! signatures are interchangeable only when the text is byte-identical and
//! all options match.

use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Whether a statement is a plain prepared statement or a stored-procedure call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatementKind {
    #[default]
    Plain,
    Callable,
}

/// Scrolling behaviour of a result cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorType {
    ForwardOnly,
    ScrollInsensitive,
    ScrollSensitive,
}

/// Whether rows can be updated through the cursor
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorConcurrency {
    ReadOnly,
    Updatable,
}

/// What happens to open cursors when the transaction commits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CursorHoldability {
    HoldOverCommit,
    CloseAtCommit,
}

/// Cursor type, concurrency and optional holdability requested at prepare time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CursorOptions {
    pub cursor_type: CursorType,
    pub concurrency: CursorConcurrency,
    pub holdability: Option<CursorHoldability>,
}

impl CursorOptions {
    pub fn new(cursor_type: CursorType, concurrency: CursorConcurrency) -> Self {
        Self {
            cursor_type,
            concurrency,
            holdability: None,
        }
    }

    pub fn with_holdability(mut self, holdability: CursorHoldability) -> Self {
        self.holdability = Some(holdability);
        self
    }

    /// Options equivalent to not asking for anything special
    pub fn is_default(&self) -> bool {
        self.cursor_type == CursorType::ForwardOnly
            && self.concurrency == CursorConcurrency::ReadOnly
            && self.holdability.is_none()
    }
}

/// Which generated keys the statement should report after execution
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GeneratedKeys {
    /// Report (or explicitly do not report) the driver's default generated keys
    Flag(bool),
    /// Report the columns at these 1-based indexes
    ColumnIndexes(Vec<u32>),
    /// Report the columns with these names
    ColumnNames(Vec<String>),
}

impl GeneratedKeys {
    /// Whether any keys are requested at all
    pub fn is_requested(&self) -> bool {
        match self {
            GeneratedKeys::Flag(requested) => *requested,
            GeneratedKeys::ColumnIndexes(indexes) => !indexes.is_empty(),
            GeneratedKeys::ColumnNames(names) => !names.is_empty(),
        }
    }
}

/// Preparation options beyond the statement kind.
///
/// Cursor options and generated-key requests are mutually exclusive.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StatementOptions {
    #[default]
    Default,
    Cursor(CursorOptions),
    GeneratedKeys(GeneratedKeys),
}

/// Canonical identity of a prepared statement.
///
/// Hashing only looks at the SQL text; equality compares the text, the kind
/// and the options, so colliding texts with different options never match.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatementSignature {
    sql: String,
    kind: StatementKind,
    options: StatementOptions,
}

impl StatementSignature {
    /// A plain prepared statement with default options
    pub fn new(sql: impl Into<String>) -> Self {
        Self {
            sql: sql.into(),
            kind: StatementKind::Plain,
            options: StatementOptions::Default,
        }
    }

    /// A stored-procedure call with default options
    pub fn callable(sql: impl Into<String>) -> Self {
        Self {
            kind: StatementKind::Callable,
            ..Self::new(sql)
        }
    }

    /// Request specific cursor behaviour, replacing any generated-keys request
    pub fn with_cursor(mut self, cursor: CursorOptions) -> Self {
        self.options = StatementOptions::Cursor(cursor);
        self
    }

    /// Request generated keys, replacing any cursor options
    pub fn with_generated_keys(mut self, keys: GeneratedKeys) -> Self {
        self.options = StatementOptions::GeneratedKeys(keys);
        self
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn kind(&self) -> StatementKind {
        self.kind
    }

    pub fn is_callable(&self) -> bool {
        self.kind == StatementKind::Callable
    }

    pub fn options(&self) -> &StatementOptions {
        &self.options
    }

    /// Cursor options, if any were requested
    pub fn cursor(&self) -> Option<&CursorOptions> {
        match &self.options {
            StatementOptions::Cursor(cursor) => Some(cursor),
            _ => None,
        }
    }

    /// Generated-key request, if any
    pub fn generated_keys(&self) -> Option<&GeneratedKeys> {
        match &self.options {
            StatementOptions::GeneratedKeys(keys) => Some(keys),
            _ => None,
        }
    }
}

impl Hash for StatementSignature {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.sql.hash(state);
    }
}

impl std::fmt::Display for StatementSignature {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let preview: String = self.sql.chars().take(80).collect();
        match self.kind {
            StatementKind::Plain => write!(f, "{}", preview),
            StatementKind::Callable => write!(f, "call {}", preview),
        }
    }
}
