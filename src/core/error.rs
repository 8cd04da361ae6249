use thiserror::Error;

/// Typed error taxonomy. Every variant maps to a fixed SQLSTATE code via
/// [`DbError::sqlstate`] so the wire session can build an `ErrorResponse`
/// without re-deriving the code from the message text.
#[derive(Error, Debug)]
pub enum DbError {
    #[error("syntax error: {0}")]
    ParseError(String),

    #[error("relation \"{0}\" already exists")]
    TableExists(String),

    #[error("relation \"{0}\" does not exist")]
    TableNotFound(String),

    #[error("column \"{0}\" of relation \"{1}\" already exists")]
    DuplicateColumn(String, String),

    #[error("column \"{0}\" does not exist")]
    ColumnNotFound(String),

    #[error("index \"{0}\" does not exist")]
    IndexNotFound(String),

    #[error("cannot drop column \"{0}\": {1}")]
    InvalidOperation(String, String),

    #[error("cannot {0} a system relation")]
    WrongObjectType(String),

    #[error("cannot mix aggregate and non-aggregate expressions without GROUP BY")]
    GroupingError,

    #[error("function {0} does not exist")]
    UndefinedFunction(String),

    #[error("division by zero")]
    DivisionByZero,

    #[error("invalid parameter value: {0}")]
    InvalidParam(String),

    #[error("invalid input syntax: {0}")]
    InvalidTextInput(String),

    #[error("invalid argument for {0}")]
    InvalidArgumentForMath(String),

    #[error("negative {0} is not allowed")]
    NegativeLimitOrOffset(&'static str),

    #[error("duplicate key value violates unique constraint \"{0}\"")]
    UniqueViolation(String),

    #[error("null value in column \"{0}\" violates not-null constraint")]
    NotNullViolation(String),

    #[error("{0} is not supported")]
    FeatureNotSupported(String),

    #[error("invalid password")]
    AuthFailed,

    #[error("role \"{0}\" does not exist")]
    UnknownUser(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed wire message: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, DbError>;

impl DbError {
    /// The 5-character SQLSTATE code for this error, per the error taxonomy.
    pub fn sqlstate(&self) -> &'static str {
        match self {
            DbError::ParseError(_) => "42601",
            DbError::TableNotFound(_) => "42P01",
            DbError::TableExists(_) => "42P07",
            DbError::ColumnNotFound(_) | DbError::DuplicateColumn(_, _) => "42703",
            DbError::IndexNotFound(_) => "42704",
            DbError::WrongObjectType(_) => "42809",
            DbError::GroupingError => "42803",
            DbError::UndefinedFunction(_) => "42883",
            DbError::DivisionByZero => "22012",
            DbError::InvalidParam(_) | DbError::InvalidOperation(_, _) => "22023",
            DbError::InvalidTextInput(_) => "22P02",
            DbError::InvalidArgumentForMath(_) => "2201F",
            DbError::NegativeLimitOrOffset(which) => {
                if *which == "LIMIT" { "2201W" } else { "2201X" }
            }
            DbError::UniqueViolation(_) => "23505",
            DbError::NotNullViolation(_) => "23502",
            DbError::FeatureNotSupported(_) => "0A000",
            DbError::UnknownUser(_) => "28000",
            DbError::AuthFailed => "28P01",
            DbError::Io(_) | DbError::Protocol(_) | DbError::Internal(_) => "XX000",
        }
    }

    /// Whether this error should terminate the session (PG severity FATAL).
    pub fn is_fatal(&self) -> bool {
        matches!(self, DbError::AuthFailed | DbError::UnknownUser(_))
    }
}

impl<T> From<std::sync::PoisonError<T>> for DbError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        DbError::Internal(format!("lock poisoned: {err}"))
    }
}

impl From<std::string::FromUtf8Error> for DbError {
    fn from(err: std::string::FromUtf8Error) -> Self {
        DbError::Protocol(format!("invalid UTF-8: {err}"))
    }
}
