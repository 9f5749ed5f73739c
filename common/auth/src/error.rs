use thiserror::Error;

pub type AuthResult<T> = Result<T, AuthError>;

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("token is not three non-empty dot-separated segments")]
    MalformedToken,
    #[error("failed to decode token claims: {0}")]
    Decode(String),
    #[error("malformed claim payload: {0}")]
    InvalidJson(String),
    #[error("unknown role '{0}'")]
    UnknownRole(String),
    #[error("authorization header missing")]
    MissingAuthorization,
    #[error("authorization header malformed")]
    InvalidAuthorization,
}

impl From<jsonwebtoken::errors::Error> for AuthError {
    fn from(value: jsonwebtoken::errors::Error) -> Self {
        Self::Decode(value.to_string())
    }
}
