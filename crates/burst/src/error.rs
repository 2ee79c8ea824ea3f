//! Error type shared by every stage of the pipeline.

use std::borrow::Cow;

use deku::DekuError;
use miette::Diagnostic;
use thiserror::Error;

/// Convenience return type.
pub type Result<T> = std::result::Result<T, Error>;

/// An error from parsing, fetching, or writing out an archive.
///
/// Failures inside a part carry the part index and the absolute archive
/// offset at which processing stopped.
#[derive(Error, Diagnostic, Debug, Clone)]
#[error("{}: {message}", .kind.name())]
pub struct Error {
	/// Error kind.
	pub kind: ErrorKind,

	/// Error message.
	pub message: Cow<'static, str>,

	/// Part index the failure occurred in, if any.
	pub part: Option<u64>,

	/// Absolute archive offset at which processing stopped, if known.
	pub offset: Option<u64>,
}

impl Error {
	/// New error with the kind's default message.
	pub fn new(kind: ErrorKind) -> Self {
		Self {
			kind,
			message: kind.default_message(),
			part: None,
			offset: None,
		}
	}

	/// New parse error from deku.
	///
	/// Incomplete input is not representable here: callers that can ask for
	/// more bytes must check for [`DekuError::Incomplete`] themselves before
	/// converting.
	pub fn from_deku(orig: DekuError) -> Self {
		Self::new(ErrorKind::FormatInvalidSignature).with_message(orig.to_string())
	}

	/// Change the error message.
	pub fn with_message(mut self, message: impl Into<Cow<'static, str>>) -> Self {
		self.message = message.into();
		self
	}

	/// Attach the part index and absolute archive offset of the failure.
	pub fn at_part(mut self, part: u64, offset: u64) -> Self {
		if self.part.is_none() {
			self.message =
				format!("{} (part {part}, archive offset {offset})", self.message).into();
			self.part = Some(part);
			self.offset = Some(offset);
		}
		self
	}

	/// The process exit code this error maps to.
	///
	/// `1` for usage errors, `2` for credentials/network failures, `3` for
	/// format or local I/O failures.
	pub fn exit_code(&self) -> i32 {
		match self.kind {
			ErrorKind::InvalidArgs => 1,
			ErrorKind::Network
			| ErrorKind::Auth
			| ErrorKind::HttpStatus(_)
			| ErrorKind::Timeout => 2,
			_ => 3,
		}
	}
}

impl From<std::io::Error> for Error {
	fn from(err: std::io::Error) -> Self {
		Self::new(ErrorKind::Io).with_message(err.to_string())
	}
}

/// Error kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ErrorKind {
	/// Invalid arguments or options.
	InvalidArgs,

	/// Local filesystem I/O error.
	Io,

	/// Transport-level error talking to the byte source.
	Network,

	/// Credentials were missing, expired, or rejected.
	Auth,

	/// The byte source answered with a non-success HTTP status.
	HttpStatus(u16),

	/// A part fetch or the tail fetch exceeded its deadline.
	Timeout,

	/// No end-of-central-directory record in the archive tail.
	FormatNoEocd,

	/// A record was cut short or lies outside the fetched bytes.
	FormatTruncated,

	/// A magic number or record field did not match the format.
	FormatInvalidSignature,

	/// A Zstandard frame did not declare its content size.
	FormatZstdMissingContentSize,

	/// A well-formed frame arrived in a state that does not accept it.
	FormatUnexpectedFrame,

	/// A part ended in the middle of a frame or member.
	FormatUnexpectedEof,

	/// ZIP64/multi-volume feature outside what burst supports.
	Zip64Unsupported,

	/// The encoded-write sink rejected a frame.
	SinkWriteFailed,

	/// An allocation for the staging buffer failed.
	OutOfMemory,

	/// The operation was cancelled because a peer failed first.
	Canceled,
}

impl ErrorKind {
	/// Short stable name, used as the error-line prefix.
	pub fn name(&self) -> &'static str {
		match self {
			ErrorKind::InvalidArgs => "invalid arguments",
			ErrorKind::Io => "i/o error",
			ErrorKind::Network => "network error",
			ErrorKind::Auth => "auth error",
			ErrorKind::HttpStatus(_) => "http error",
			ErrorKind::Timeout => "timeout",
			ErrorKind::FormatNoEocd => "format error",
			ErrorKind::FormatTruncated => "format error",
			ErrorKind::FormatInvalidSignature => "format error",
			ErrorKind::FormatZstdMissingContentSize => "format error",
			ErrorKind::FormatUnexpectedFrame => "format error",
			ErrorKind::FormatUnexpectedEof => "format error",
			ErrorKind::Zip64Unsupported => "format error",
			ErrorKind::SinkWriteFailed => "write error",
			ErrorKind::OutOfMemory => "out of memory",
			ErrorKind::Canceled => "canceled",
		}
	}

	/// Get the default error message for this error kind.
	pub fn default_message(self) -> Cow<'static, str> {
		match self {
			ErrorKind::InvalidArgs => Cow::Borrowed("invalid arguments"),
			ErrorKind::Io => Cow::Borrowed("i/o error"),
			ErrorKind::Network => Cow::Borrowed("network error"),
			ErrorKind::Auth => Cow::Borrowed("could not authenticate"),
			ErrorKind::HttpStatus(code) => Cow::Owned(format!("http status {code}")),
			ErrorKind::Timeout => Cow::Borrowed("request timed out"),
			ErrorKind::FormatNoEocd => {
				Cow::Borrowed("no end-of-central-directory record found")
			}
			ErrorKind::FormatTruncated => Cow::Borrowed("record truncated"),
			ErrorKind::FormatInvalidSignature => Cow::Borrowed("invalid signature"),
			ErrorKind::FormatZstdMissingContentSize => {
				Cow::Borrowed("zstandard frame does not declare its content size")
			}
			ErrorKind::FormatUnexpectedFrame => Cow::Borrowed("unexpected frame"),
			ErrorKind::FormatUnexpectedEof => Cow::Borrowed("unexpected end of part"),
			ErrorKind::Zip64Unsupported => Cow::Borrowed("unsupported zip64 feature"),
			ErrorKind::SinkWriteFailed => Cow::Borrowed("encoded write failed"),
			ErrorKind::OutOfMemory => Cow::Borrowed("staging allocation failed"),
			ErrorKind::Canceled => Cow::Borrowed("canceled"),
		}
	}
}

impl From<ErrorKind> for Error {
	fn from(kind: ErrorKind) -> Self {
		Self::new(kind)
	}
}
