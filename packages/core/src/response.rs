//! Typed success/failure envelope returned by every pipeline call.

use std::time::Duration;

use crate::error::ProxyError;

#[derive(Debug, Clone, PartialEq)]
enum Outcome<T> {
    Success(T),
    Failure(ProxyError),
}

/// Result of one dispatch through the pipeline.
///
/// Exactly one of value/error is populated. The outcome is private, so the
/// only way to build a `Response` is [`Response::success`],
/// [`Response::failure`] or a conversion from `Result`; nothing can observe a
/// value on a failed response.
#[derive(Debug, Clone, PartialEq)]
pub struct Response<T> {
    outcome: Outcome<T>,
    correlation_id: Option<String>,
    duration: Option<Duration>,
}

impl<T> Response<T> {
    /// Builds a successful response carrying `value`.
    #[must_use]
    pub fn success(value: T) -> Self {
        Self {
            outcome: Outcome::Success(value),
            correlation_id: None,
            duration: None,
        }
    }

    /// Builds a failed response carrying `error`.
    #[must_use]
    pub fn failure(error: ProxyError) -> Self {
        Self {
            outcome: Outcome::Failure(error),
            correlation_id: None,
            duration: None,
        }
    }

    /// Attaches the correlation id of the call that produced this response.
    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }

    /// Attaches the wall-clock duration of the call.
    #[must_use]
    pub fn with_duration(mut self, duration: Duration) -> Self {
        self.duration = Some(duration);
        self
    }

    /// Discriminant: `true` iff this response carries a value.
    #[must_use]
    pub fn is_success(&self) -> bool {
        matches!(self.outcome, Outcome::Success(_))
    }

    /// The success value, or `None` on failure.
    #[must_use]
    pub fn value(&self) -> Option<&T> {
        match &self.outcome {
            Outcome::Success(value) => Some(value),
            Outcome::Failure(_) => None,
        }
    }

    /// The classified error, or `None` on success.
    #[must_use]
    pub fn error(&self) -> Option<&ProxyError> {
        match &self.outcome {
            Outcome::Success(_) => None,
            Outcome::Failure(error) => Some(error),
        }
    }

    #[must_use]
    pub fn correlation_id(&self) -> Option<&str> {
        self.correlation_id.as_deref()
    }

    #[must_use]
    pub fn duration(&self) -> Option<Duration> {
        self.duration
    }

    /// Consumes the response, returning the value or `T::default()` on failure.
    #[must_use]
    pub fn into_value_or_default(self) -> T
    where
        T: Default,
    {
        match self.outcome {
            Outcome::Success(value) => value,
            Outcome::Failure(_) => T::default(),
        }
    }

    /// Consumes the response into a plain `Result`, dropping the metadata.
    ///
    /// # Errors
    ///
    /// Returns the carried [`ProxyError`] when the response is a failure.
    pub fn into_result(self) -> Result<T, ProxyError> {
        match self.outcome {
            Outcome::Success(value) => Ok(value),
            Outcome::Failure(error) => Err(error),
        }
    }

    /// Maps the success value, keeping correlation id and duration.
    #[must_use]
    pub fn map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> U,
    {
        self.try_map(|value| Ok(f(value)))
    }

    /// Maps the success value with a fallible conversion. A conversion error
    /// turns the response into a failure.
    #[must_use]
    pub fn try_map<U, F>(self, f: F) -> Response<U>
    where
        F: FnOnce(T) -> Result<U, ProxyError>,
    {
        let outcome = match self.outcome {
            Outcome::Success(value) => match f(value) {
                Ok(mapped) => Outcome::Success(mapped),
                Err(error) => Outcome::Failure(error),
            },
            Outcome::Failure(error) => Outcome::Failure(error),
        };
        Response {
            outcome,
            correlation_id: self.correlation_id,
            duration: self.duration,
        }
    }
}

impl<T> From<Result<T, ProxyError>> for Response<T> {
    fn from(result: Result<T, ProxyError>) -> Self {
        match result {
            Ok(value) => Self::success(value),
            Err(error) => Self::failure(error),
        }
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arb_error() -> impl Strategy<Value = ProxyError> {
        prop_oneof![
            ("[a-z]{1,8}", ".{0,16}").prop_map(|(c, m)| ProxyError::business(c, m)),
            (proptest::option::of(400u16..500), ".{0,16}").prop_map(|(status, message)| {
                ProxyError::NonRetryableTransport { status, message }
            }),
            (proptest::option::of(500u16..600), ".{0,16}")
                .prop_map(|(status, message)| ProxyError::RetryableTransport { status, message }),
            "[A-Za-z]{1,12}".prop_map(|request_type| ProxyError::HandlerNotFound { request_type }),
            Just(ProxyError::Cancelled),
            ".{0,16}".prop_map(|message| ProxyError::CacheUnavailable { message }),
        ]
    }

    proptest! {
        #[test]
        fn success_always_has_value_and_no_error(v in any::<i64>()) {
            let resp = Response::success(v);
            prop_assert!(resp.is_success());
            prop_assert!(resp.error().is_none());
            prop_assert_eq!(resp.value(), Some(&v));
        }

        #[test]
        fn failure_never_exposes_a_value(e in arb_error()) {
            let resp: Response<String> = Response::failure(e.clone());
            prop_assert!(!resp.is_success());
            prop_assert!(resp.value().is_none());
            prop_assert_eq!(resp.error(), Some(&e));
            prop_assert_eq!(resp.into_value_or_default(), String::new());
        }
    }

    #[test]
    fn metadata_survives_mapping() {
        let resp = Response::success(21)
            .with_correlation_id(Some("corr-1".into()))
            .with_duration(Duration::from_millis(5))
            .map(|v| v * 2);
        assert_eq!(resp.value(), Some(&42));
        assert_eq!(resp.correlation_id(), Some("corr-1"));
        assert_eq!(resp.duration(), Some(Duration::from_millis(5)));
    }

    #[test]
    fn try_map_error_turns_success_into_failure() {
        let resp: Response<u8> =
            Response::success("x").try_map(|_| Err(ProxyError::internal("decode")));
        assert!(!resp.is_success());
        assert_eq!(resp.error(), Some(&ProxyError::internal("decode")));
    }

    #[test]
    fn converts_from_result() {
        let ok: Response<u8> = Ok(1).into();
        let err: Response<u8> = Err(ProxyError::Cancelled).into();
        assert!(ok.is_success());
        assert_eq!(err.into_result(), Err(ProxyError::Cancelled));
    }
}
