// This file is part of Portaria, an access-control terminal gateway.
// Copyright (C) 2026 The Portaria Authors.
// SPDX-License-Identifier: GPL-v3.0-or-later WITH GPL-3.0-linking-exception.

//! Kinded errors.
//!
//! Every operation against a terminal fails with an [Error] carrying one [ErrorKind]. The kind
//! determines the stable code reported to callers (`error` in the JSON envelope) and the HTTP
//! status chosen by the gateway; the cause chain carries the human-readable detail.

use failure::{Backtrace, Context, Fail};
use std::fmt;

#[derive(Debug)]
pub struct Error {
    inner: Context<ErrorKind>,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        *self.inner.get_context()
    }

    /// Returns the most specific message: the innermost cause if there is one, else the kind.
    pub fn message(&self) -> String {
        let mut msg = None;
        let mut cause = self.inner.cause();
        while let Some(c) = cause {
            msg = Some(c.to_string());
            cause = c.cause();
        }
        msg.unwrap_or_else(|| self.kind().to_string())
    }

    /// Wraps this error in a different kind, keeping it as the cause.
    pub fn reclassify(self, kind: ErrorKind) -> Error {
        if self.kind() == kind {
            return self;
        }
        Error::from(self.context(kind))
    }
}

impl Fail for Error {
    fn cause(&self) -> Option<&dyn Fail> {
        self.inner.cause()
    }

    fn backtrace(&self) -> Option<&Backtrace> {
        self.inner.backtrace()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.inner.cause() {
            None => fmt::Display::fmt(&self.kind(), f),
            Some(c) => write!(f, "{}: {}", self.kind(), c),
        }
    }
}

impl From<ErrorKind> for Error {
    fn from(kind: ErrorKind) -> Error {
        Error {
            inner: Context::new(kind),
        }
    }
}

impl From<Context<ErrorKind>> for Error {
    fn from(inner: Context<ErrorKind>) -> Error {
        Error { inner }
    }
}

impl From<failure::Error> for Error {
    fn from(e: failure::Error) -> Error {
        Error {
            inner: e.context(ErrorKind::Internal),
        }
    }
}

/// Error kind, one per failure class a caller can act on.
#[derive(Copy, Clone, Debug, Eq, Fail, Hash, PartialEq)]
pub enum ErrorKind {
    /// Caller input is malformed; no device was contacted.
    #[fail(display = "invalid request")]
    Validation,

    #[fail(display = "device not found")]
    DeviceNotFound,

    /// The target is missing an address or credentials.
    #[fail(display = "incomplete device configuration")]
    Config,

    #[fail(display = "device unreachable")]
    Unreachable,

    /// Network failure or timeout after the device was reached.
    #[fail(display = "transport error")]
    Transport,

    #[fail(display = "authentication failed")]
    AuthFailed,

    /// The device answered an RPC with an explicit error.
    #[fail(display = "device rpc error")]
    Rpc,

    /// The device answered a CGI action with a recognized failure message.
    #[fail(display = "device rejected command")]
    Device,

    #[fail(display = "RecordFinder.factory.create failed")]
    FactoryCreateFailed,

    #[fail(display = "RecordFinder.startFind failed")]
    StartFindFailed,

    #[fail(display = "RPC_Loadfile failed")]
    LoadFileFailed,

    #[fail(display = "not a JPEG image")]
    InvalidImage,

    #[fail(display = "unknown device response")]
    UnknownResponse,

    #[fail(display = "internal error")]
    Internal,
}

impl ErrorKind {
    /// Returns the stable code reported in `{ok:false, error}` envelopes.
    pub fn code(self) -> &'static str {
        match self {
            ErrorKind::Validation => "VALIDATION_ERROR",
            ErrorKind::DeviceNotFound => "DEVICE_NOT_FOUND",
            ErrorKind::Config => "CONFIG_ERROR",
            ErrorKind::Unreachable => "UNREACHABLE",
            ErrorKind::Transport => "TRANSPORT_ERROR",
            ErrorKind::AuthFailed => "AUTH_FAILED",
            ErrorKind::Rpc => "RPC_ERROR",
            ErrorKind::Device => "DEVICE_ERROR",
            ErrorKind::FactoryCreateFailed => "FACTORY_CREATE_FAILED",
            ErrorKind::StartFindFailed => "START_FIND_FAILED",
            ErrorKind::LoadFileFailed => "LOAD_FILE_FAILED",
            ErrorKind::InvalidImage => "INVALID_IMAGE",
            ErrorKind::UnknownResponse => "UNKNOWN_RESPONSE",
            ErrorKind::Internal => "INTERNAL_ERROR",
        }
    }
}

/// Extension methods for `Result`.
pub trait ResultExt<T, E> {
    /// Annotates an error with the given kind.
    ///
    /// Example:
    /// ```
    /// use portaria_device::{ErrorKind, ResultExt};
    /// let e = "not a number".parse::<u32>().err_kind(ErrorKind::Validation).unwrap_err();
    /// assert_eq!(e.kind(), ErrorKind::Validation);
    /// ```
    fn err_kind(self, k: ErrorKind) -> Result<T, Error>;
}

impl<T, E> ResultExt<T, E> for Result<T, E>
where
    E: Into<failure::Error>,
{
    fn err_kind(self, k: ErrorKind) -> Result<T, Error> {
        self.map_err(|e| e.into().context(k).into())
    }
}

/// Like `failure::bail!`, but the first argument specifies a kind.
///
/// Example:
/// ```
/// use portaria_device::{bail_t, Error, ErrorKind};
/// fn check(from: i64, to: i64) -> Result<(), Error> {
///     if from >= to {
///         bail_t!(Validation, "from {} must precede to {}", from, to);
///     }
///     Ok(())
/// }
/// let e = check(2, 1).unwrap_err();
/// assert_eq!(e.kind(), ErrorKind::Validation);
/// assert_eq!(e.message(), "from 2 must precede to 1");
/// ```
#[macro_export]
macro_rules! bail_t {
    ($t:ident, $e:expr) => {
        return Err($crate::format_err_t!($t, $e).into())
    };
    ($t:ident, $fmt:expr, $($arg:tt)+) => {
        return Err($crate::format_err_t!($t, $fmt, $($arg)+).into())
    };
}

/// Like `failure::format_err!`, but the first argument specifies a kind.
#[macro_export]
macro_rules! format_err_t {
    ($t:ident, $e:expr) => {
        $crate::Error::from(::failure::err_msg($e).context($crate::ErrorKind::$t))
    };
    ($t:ident, $fmt:expr, $($arg:tt)+) => {
        $crate::Error::from(::failure::err_msg(format!($fmt, $($arg)+))
                            .context($crate::ErrorKind::$t))
    };
}
