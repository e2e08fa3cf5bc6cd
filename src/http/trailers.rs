//! HTTP trailer fields.
//!
//! Trailers arrive after the body, so they are modelled as a future that
//! resolves to a header map. Fields that frame, route or authenticate a
//! message may not be sent as trailers (RFC 7230 §4.1.2).

use std::collections::BTreeSet;
use std::future::Future;

use axum::http::header::{HeaderMap, HeaderName};
use futures_util::future::BoxFuture;
use futures_util::FutureExt;

use crate::http::error::BoxError;

/// Fields that must never appear in trailers.
pub const DISALLOWED_TRAILERS: [&str; 16] = [
    "authorization",
    "content-encoding",
    "content-length",
    "content-range",
    "content-type",
    "cookie",
    "expect",
    "host",
    "pragma",
    "proxy-authenticate",
    "proxy-authorization",
    "range",
    "te",
    "trailer",
    "transfer-encoding",
    "www-authenticate",
];

pub fn is_disallowed(field: &str) -> bool {
    DISALLOWED_TRAILERS
        .iter()
        .any(|disallowed| disallowed.eq_ignore_ascii_case(field))
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrailerError {
    #[error("Field '{0}' is not allowed in trailers")]
    Disallowed(String),
    #[error("Invalid trailer field name '{0}'")]
    InvalidField(String),
    #[error("Trailers do not contain the expected fields (expected {expected:?}, got {received:?})")]
    UnexpectedFields {
        expected: Vec<String>,
        received: Vec<String>,
    },
    #[error("Trailers could not be received: {0}")]
    Unavailable(String),
}

/// Trailer fields of a message, available once the body has been read.
pub struct Trailers {
    fields: Vec<HeaderName>,
    headers: BoxFuture<'static, Result<HeaderMap, BoxError>>,
}

impl Trailers {
    /// `fields` lists the trailer fields that will be sent. It may be empty;
    /// when it is not, the resolved trailers must carry exactly these fields.
    pub fn new<Fut, I>(headers: Fut, fields: I) -> Result<Self, TrailerError>
    where
        Fut: Future<Output = Result<HeaderMap, BoxError>> + Send + 'static,
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let mut declared = Vec::new();
        for field in fields {
            let field = field.as_ref();
            if is_disallowed(field) {
                return Err(TrailerError::Disallowed(field.to_ascii_lowercase()));
            }
            let name = HeaderName::try_from(field)
                .map_err(|_| TrailerError::InvalidField(field.to_string()))?;
            if !declared.contains(&name) {
                declared.push(name);
            }
        }

        Ok(Self {
            fields: declared,
            headers: headers.boxed(),
        })
    }

    /// The declared trailer fields, lowercased.
    pub fn fields(&self) -> &[HeaderName] {
        &self.fields
    }

    /// Wait for the trailers and validate them.
    pub async fn resolve(self) -> Result<HeaderMap, TrailerError> {
        let headers = self
            .headers
            .await
            .map_err(|err| TrailerError::Unavailable(err.to_string()))?;

        if self.fields.is_empty() {
            if let Some(name) = headers.keys().find(|name| is_disallowed(name.as_str())) {
                return Err(TrailerError::Disallowed(name.as_str().to_string()));
            }
            return Ok(headers);
        }

        let expected: BTreeSet<&str> = self.fields.iter().map(HeaderName::as_str).collect();
        let received: BTreeSet<&str> = headers.keys().map(HeaderName::as_str).collect();
        if expected != received {
            return Err(TrailerError::UnexpectedFields {
                expected: expected.into_iter().map(str::to_string).collect(),
                received: received.into_iter().map(str::to_string).collect(),
            });
        }

        Ok(headers)
    }
}

impl std::fmt::Debug for Trailers {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Trailers")
            .field("fields", &self.fields)
            .finish_non_exhaustive()
    }
}
