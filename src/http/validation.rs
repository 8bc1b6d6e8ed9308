//! Request validation.
//!
//! Request bodies implement [`Validate`] with a [`Validator`] chain of reusable field rules.
//! [`ValidatedJson`] deserializes and validates in one step; both malformed JSON and
//! rule violations are reported as `VALIDATION_ERROR` with per-field details.

use crate::http::error::ApiError;
use axum::{
    Json,
    extract::{FromRequest, Request},
};
use chrono::DateTime;
use serde::{Serialize, de::DeserializeOwned};

pub const NAME_MAX_CHARS: usize = 200;
pub const DESCRIPTION_MAX_CHARS: usize = 500;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FieldError {
    pub field: String,
    pub message: String,
}

impl FieldError {
    pub fn new(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
        }
    }
}

pub trait Validate {
    fn validate(&self) -> Result<(), Vec<FieldError>>;
}

/// Collects rule violations for one value.
#[derive(Debug, Default)]
#[must_use]
pub struct Validator {
    errors: Vec<FieldError>,
}

impl Validator {
    pub fn new() -> Self {
        Self::default()
    }

    fn check(mut self, ok: bool, field: &str, message: impl FnOnce() -> String) -> Self {
        if !ok {
            self.errors.push(FieldError::new(field, message()));
        }
        self
    }

    /// 0 or 1.
    pub fn bit(self, field: &str, value: i64) -> Self {
        self.check(value == 0 || value == 1, field, || "Must be 0 or 1".into())
    }

    /// Positive integer id.
    pub fn fk(self, field: &str, value: i64) -> Self {
        self.check(value > 0, field, || "Must be a positive integer".into())
    }

    pub fn nullable_fk(self, field: &str, value: Option<i64>) -> Self {
        match value {
            Some(v) => self.fk(field, v),
            None => self,
        }
    }

    pub fn non_empty(self, field: &str, value: &str) -> Self {
        self.check(!value.is_empty(), field, || "Must not be empty".into())
    }

    /// 1 to 200 characters.
    pub fn name(self, field: &str, value: &str) -> Self {
        let len = value.chars().count();
        self.check(len >= 1 && len <= NAME_MAX_CHARS, field, || {
            format!("Must be between 1 and {} characters", NAME_MAX_CHARS)
        })
    }

    /// Up to 500 characters, may be null.
    pub fn description(self, field: &str, value: Option<&str>) -> Self {
        let len = value.map(|v| v.chars().count()).unwrap_or(0);
        self.check(len <= DESCRIPTION_MAX_CHARS, field, || {
            format!("Must be at most {} characters", DESCRIPTION_MAX_CHARS)
        })
    }

    /// ISO-8601 date-time with offset.
    pub fn date_time(self, field: &str, value: &str) -> Self {
        self.check(DateTime::parse_from_rfc3339(value).is_ok(), field, || {
            "Must be an ISO-8601 date-time".into()
        })
    }

    pub fn email(self, field: &str, value: &str) -> Self {
        self.check(is_email(value), field, || "Must be a valid email address".into())
    }

    /// Positive finite number.
    pub fn price(self, field: &str, value: f64) -> Self {
        self.check(value.is_finite() && value > 0.0, field, || {
            "Must be a positive number".into()
        })
    }

    pub fn nullable_price(self, field: &str, value: Option<f64>) -> Self {
        match value {
            Some(v) => self.price(field, v),
            None => self,
        }
    }

    pub fn finish(self) -> Result<(), Vec<FieldError>> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(self.errors)
        }
    }
}

fn is_email(value: &str) -> bool {
    let Some((local, domain)) = value.split_once('@') else {
        return false;
    };
    !local.is_empty()
        && !domain.contains('@')
        && !value.chars().any(char::is_whitespace)
        && domain
            .split_once('.')
            .is_some_and(|(host, tld)| !host.is_empty() && !tld.is_empty() && !tld.ends_with('.'))
}

/// JSON body extractor that runs [`Validate`] before the handler sees the value.
pub struct ValidatedJson<T>(pub T);

impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state)
            .await
            .map_err(|rejection| {
                ApiError::validation(vec![FieldError::new("body", rejection.body_text())])
            })?;

        value.validate().map_err(ApiError::validation)?;
        Ok(Self(value))
    }
}
