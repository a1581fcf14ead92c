// Copyright 2026 Kusto Ingest Contributors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     https://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! The error type returned by every public operation in the ingestion client.
//!
//! Modeled on the `Error`/`ErrorKind` split used throughout the generated
//! Google Cloud clients: a closed `kind` for dispatch plus a boxed `source`
//! for the human-readable cause, with `as_inner::<T>()` to recover a specific
//! inner error type when callers need it (for example, the managed router
//! recovers a [`StreamingErrorCategory`] from a failed streaming attempt).

use std::fmt;

type BoxError = Box<dyn std::error::Error + Send + Sync>;

/// The error type returned by all `kusto-ingest` operations.
///
/// Carries a [`ErrorKind`], a permanence flag, and the optional
/// `code`/`sub_code`/`request_id`/`activity_id` quadruple that propagates
/// from a service error envelope (§7).
pub struct Error {
    kind: ErrorKind,
    permanent: bool,
    code: Option<String>,
    sub_code: Option<String>,
    request_id: Option<String>,
    activity_id: Option<String>,
    source: BoxError,
}

impl Error {
    /// Creates a new [Error], inferring permanence from the [ErrorKind].
    pub fn new<T: Into<BoxError>>(kind: ErrorKind, source: T) -> Self {
        let permanent = kind.default_permanence();
        Self {
            kind,
            permanent,
            code: None,
            sub_code: None,
            request_id: None,
            activity_id: None,
            source: source.into(),
        }
    }

    /// Overrides the permanence flag computed from the [ErrorKind].
    pub fn with_permanent(mut self, permanent: bool) -> Self {
        self.permanent = permanent;
        self
    }

    pub fn with_code(mut self, code: impl Into<String>) -> Self {
        self.code = Some(code.into());
        self
    }

    pub fn with_sub_code(mut self, sub_code: impl Into<String>) -> Self {
        self.sub_code = Some(sub_code.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    pub fn with_activity_id(mut self, activity_id: impl Into<String>) -> Self {
        self.activity_id = Some(activity_id.into());
        self
    }

    /// A helper to create a new [ErrorKind::Client] error (invalid input at the boundary).
    pub fn client<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Client, source)
    }

    /// A helper to create a new [ErrorKind::Service] error.
    pub fn service<T: Into<BoxError>>(source: T, permanent: bool) -> Self {
        Self::new(ErrorKind::Service, source).with_permanent(permanent)
    }

    /// A helper to create a new [ErrorKind::Throttled] error. Always transient.
    pub fn throttled<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Throttled, source)
    }

    /// A helper to create a new [ErrorKind::NoAvailableContainers] error.
    pub fn no_available_containers() -> Self {
        Self::new(ErrorKind::NoAvailableContainers, "no containers available")
    }

    /// A helper to create a new [ErrorKind::NoAvailableQueues] error.
    pub fn no_available_queues() -> Self {
        Self::new(ErrorKind::NoAvailableQueues, "no queues available")
    }

    /// A helper to create a new [ErrorKind::Upload] error.
    pub fn upload<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Upload, source)
    }

    /// A helper to create a new [ErrorKind::PermissionDenied] error. Always permanent.
    pub fn permission_denied<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::PermissionDenied, source)
    }

    /// A helper to create a new [ErrorKind::Canceled] error.
    pub fn canceled() -> Self {
        Self::new(ErrorKind::Canceled, "operation canceled")
    }

    /// A helper to create a new [ErrorKind::Io] error.
    pub fn io<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Io, source)
    }

    /// A helper to create a new [ErrorKind::Serde] error.
    pub fn serde<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Serde, source)
    }

    /// A helper to create a new [ErrorKind::Other] error.
    pub fn other<T: Into<BoxError>>(source: T) -> Self {
        Self::new(ErrorKind::Other, source)
    }

    /// Returns the [ErrorKind] associated with this error.
    pub fn kind(&self) -> ErrorKind {
        self.kind.clone()
    }

    /// Whether the retry driver and managed router must treat this error as
    /// non-retryable, regardless of the active retry policy.
    pub fn is_permanent(&self) -> bool {
        self.permanent
    }

    pub fn code(&self) -> Option<&str> {
        self.code.as_deref()
    }

    pub fn sub_code(&self) -> Option<&str> {
        self.sub_code.as_deref()
    }

    pub fn request_id(&self) -> Option<&str> {
        self.request_id.as_deref()
    }

    pub fn activity_id(&self) -> Option<&str> {
        self.activity_id.as_deref()
    }

    /// Recurses through the source error chain and returns a reference to
    /// the inner value if it is of type `T`, or `None` if no such inner
    /// value is found.
    pub fn as_inner<T: std::error::Error + Send + Sync + 'static>(&self) -> Option<&T> {
        let mut error = self.source.as_ref() as &(dyn std::error::Error);
        loop {
            match error.downcast_ref::<T>() {
                Some(e) => return Some(e),
                None => error = error.source()?,
            }
        }
    }
}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Error")
            .field("kind", &self.kind)
            .field("permanent", &self.permanent)
            .field("code", &self.code)
            .field("sub_code", &self.sub_code)
            .field("request_id", &self.request_id)
            .field("activity_id", &self.activity_id)
            .field("source", &self.source.to_string())
            .finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.source)?;
        if let Some(code) = &self.code {
            write!(f, " (code={code})")?;
        }
        Ok(())
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(self.source.as_ref())
    }
}

/// The type of error held by an [Error] instance.
///
/// Mirrors the taxonomy of §7: client-boundary errors, classified service
/// errors, the local-catalog-exhaustion kinds owned by the resource manager,
/// and the upload/cancellation kinds.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum ErrorKind {
    /// Input invalid at the boundary (missing required property, invalid
    /// URL, invalid mapping combination). Always permanent.
    Client,
    /// A remote call failed with a server error envelope. Permanence is
    /// carried explicitly rather than inferred (`@permanent` on the wire).
    Service,
    /// A specific transient service error: the request was throttled.
    Throttled,
    /// The local container catalog is exhausted; retryable after the next
    /// refresh.
    NoAvailableContainers,
    /// The local queue catalog is exhausted; retryable after the next
    /// refresh.
    NoAvailableQueues,
    /// An upload-specific failure; see `ingest::upload::UploadErrorKind` for
    /// the finer-grained classification.
    Upload,
    /// The caller is not authorized to perform the operation. Always
    /// permanent.
    PermissionDenied,
    /// The operation was canceled via a cancellation signal.
    Canceled,
    /// An I/O error (reading a local source, writing to a socket).
    Io,
    /// A serialization or deserialization error.
    Serde,
    /// An uncategorized error.
    #[default]
    Other,
}

impl ErrorKind {
    fn default_permanence(&self) -> bool {
        matches!(
            self,
            ErrorKind::Client | ErrorKind::PermissionDenied | ErrorKind::Canceled
        )
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Client => write!(f, "invalid request"),
            ErrorKind::Service => write!(f, "service error"),
            ErrorKind::Throttled => write!(f, "request was throttled"),
            ErrorKind::NoAvailableContainers => write!(f, "no storage containers available"),
            ErrorKind::NoAvailableQueues => write!(f, "no queues available"),
            ErrorKind::Upload => write!(f, "upload failed"),
            ErrorKind::PermissionDenied => write!(f, "permission denied"),
            ErrorKind::Canceled => write!(f, "operation canceled"),
            ErrorKind::Io => write!(f, "a problem occurred during I/O"),
            ErrorKind::Serde => write!(
                f,
                "a problem occurred during serialization or deserialization"
            ),
            ErrorKind::Other => write!(f, "a problem occurred"),
        }
    }
}
