use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VellumErrorCode {
    TableNotFound,
    IndexNotFound,
    DocumentNotFound,
    FieldNotFound,
    KeyNotFound,
    StoreNotFound,
    TableExists,
    IndexExists,
    StoreExists,
    DuplicateDocument,
    DuplicateIndexValue,
    TypeMismatch,
    NotNullViolation,
    Conversion,
    Parse,
    UnknownFunction,
    ParameterMismatch,
    Decode,
    Encode,
    Engine,
    ScanLimitExceeded,
    Cancelled,
    TxReadOnly,
    TxClosed,
    Validation,
}

impl VellumErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            VellumErrorCode::TableNotFound => "table_not_found",
            VellumErrorCode::IndexNotFound => "index_not_found",
            VellumErrorCode::DocumentNotFound => "document_not_found",
            VellumErrorCode::FieldNotFound => "field_not_found",
            VellumErrorCode::KeyNotFound => "key_not_found",
            VellumErrorCode::StoreNotFound => "store_not_found",
            VellumErrorCode::TableExists => "table_already_exists",
            VellumErrorCode::IndexExists => "index_already_exists",
            VellumErrorCode::StoreExists => "store_already_exists",
            VellumErrorCode::DuplicateDocument => "duplicate_document",
            VellumErrorCode::DuplicateIndexValue => "duplicate_index_value",
            VellumErrorCode::TypeMismatch => "type_mismatch",
            VellumErrorCode::NotNullViolation => "not_null_violation",
            VellumErrorCode::Conversion => "conversion_error",
            VellumErrorCode::Parse => "parse_error",
            VellumErrorCode::UnknownFunction => "unknown_function",
            VellumErrorCode::ParameterMismatch => "parameter_mismatch",
            VellumErrorCode::Decode => "decode_error",
            VellumErrorCode::Encode => "encode_error",
            VellumErrorCode::Engine => "engine_error",
            VellumErrorCode::ScanLimitExceeded => "scan_limit_exceeded",
            VellumErrorCode::Cancelled => "cancelled",
            VellumErrorCode::TxReadOnly => "tx_read_only",
            VellumErrorCode::TxClosed => "tx_closed",
            VellumErrorCode::Validation => "validation",
        }
    }
}

#[derive(Debug, Error)]
pub enum VellumError {
    #[error("table '{0}' not found")]
    TableNotFound(String),
    #[error("index '{0}' not found")]
    IndexNotFound(String),
    #[error("document not found")]
    DocumentNotFound,
    #[error("field not found")]
    FieldNotFound,
    #[error("key not found")]
    KeyNotFound,
    #[error("store '{0}' not found")]
    StoreNotFound(String),
    #[error("table '{0}' already exists")]
    TableExists(String),
    #[error("index '{0}' already exists")]
    IndexExists(String),
    #[error("store '{0}' already exists")]
    StoreExists(String),
    #[error("duplicate document in table '{table}': key {key}")]
    DuplicateDocument { table: String, key: String },
    #[error("duplicate value for unique index '{index}'")]
    DuplicateIndexValue { index: String },
    #[error("type mismatch: expected {expected}, got {actual}")]
    TypeMismatch { expected: String, actual: String },
    #[error("NOT NULL violation on '{path}' in table '{table}'")]
    NotNullViolation { table: String, path: String },
    #[error("cannot convert {from} to {to}")]
    Conversion { from: String, to: String },
    #[error(
        "parse error at line {line}, column {column}: found {found}, expected {}",
        expected.join(", ")
    )]
    Parse {
        line: u32,
        column: u32,
        found: String,
        expected: Vec<String>,
    },
    #[error("no such function: '{0}'")]
    UnknownFunction(String),
    #[error("parameter mismatch: {0}")]
    ParameterMismatch(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("encode error: {0}")]
    Encode(String),
    #[error("engine error: {0}")]
    Engine(String),
    #[error("statement scanned more than max_scan_rows ({max_scan_rows}) rows")]
    ScanLimitExceeded { max_scan_rows: usize },
    #[error("operation cancelled")]
    Cancelled,
    #[error("cannot write in a read-only transaction")]
    TxReadOnly,
    #[error("transaction already closed")]
    TxClosed,
    #[error("validation error: {0}")]
    Validation(String),
}

impl VellumError {
    pub fn code(&self) -> VellumErrorCode {
        match self {
            VellumError::TableNotFound(_) => VellumErrorCode::TableNotFound,
            VellumError::IndexNotFound(_) => VellumErrorCode::IndexNotFound,
            VellumError::DocumentNotFound => VellumErrorCode::DocumentNotFound,
            VellumError::FieldNotFound => VellumErrorCode::FieldNotFound,
            VellumError::KeyNotFound => VellumErrorCode::KeyNotFound,
            VellumError::StoreNotFound(_) => VellumErrorCode::StoreNotFound,
            VellumError::TableExists(_) => VellumErrorCode::TableExists,
            VellumError::IndexExists(_) => VellumErrorCode::IndexExists,
            VellumError::StoreExists(_) => VellumErrorCode::StoreExists,
            VellumError::DuplicateDocument { .. } => VellumErrorCode::DuplicateDocument,
            VellumError::DuplicateIndexValue { .. } => VellumErrorCode::DuplicateIndexValue,
            VellumError::TypeMismatch { .. } => VellumErrorCode::TypeMismatch,
            VellumError::NotNullViolation { .. } => VellumErrorCode::NotNullViolation,
            VellumError::Conversion { .. } => VellumErrorCode::Conversion,
            VellumError::Parse { .. } => VellumErrorCode::Parse,
            VellumError::UnknownFunction(_) => VellumErrorCode::UnknownFunction,
            VellumError::ParameterMismatch(_) => VellumErrorCode::ParameterMismatch,
            VellumError::Decode(_) => VellumErrorCode::Decode,
            VellumError::Encode(_) => VellumErrorCode::Encode,
            VellumError::Engine(_) => VellumErrorCode::Engine,
            VellumError::ScanLimitExceeded { .. } => VellumErrorCode::ScanLimitExceeded,
            VellumError::Cancelled => VellumErrorCode::Cancelled,
            VellumError::TxReadOnly => VellumErrorCode::TxReadOnly,
            VellumError::TxClosed => VellumErrorCode::TxClosed,
            VellumError::Validation(_) => VellumErrorCode::Validation,
        }
    }

    pub fn code_str(&self) -> &'static str {
        self.code().as_str()
    }

    /// True for the NotFound family, which callers commonly recover from.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            VellumError::TableNotFound(_)
                | VellumError::IndexNotFound(_)
                | VellumError::DocumentNotFound
                | VellumError::FieldNotFound
                | VellumError::KeyNotFound
                | VellumError::StoreNotFound(_)
        )
    }
}
