//! Crate-wide error types, wire error codes, and `Result` alias.

// crates.io
use http::StatusCode;

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Wire-level error kinds surfaced to HTTP clients via the `Kasha-Code` header.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Code {
	/// Malformed or missing query parameter.
	ClientInvalidParam,
	/// Forwarded header unparsable.
	ClientInvalidHeader,
	/// Protocol other than http/https.
	ClientInvalidProtocol,
	/// Empty `Host` header.
	ClientEmptyHostHeader,
	/// SiteConfig missing while `disallowUnknownSite` is on.
	ClientHostConfigNotExist,
	/// Method other than GET/HEAD.
	ClientMethodNotAllowed,
	/// No route matched in API mode.
	ClientNoSuchApi,
	/// No reply from a worker within the timeout window.
	ServerWorkerTimeout,
	/// Worker reported a render failure.
	ServerRenderError,
	/// Worker reported an upstream network failure.
	ServerNetError,
	/// Requested URL is disallowed by the target site's robots policy.
	ServerRobotsDisallow,
	/// Catch-all; carries an event id keyed into the structured log.
	ServerInternalError,
}
impl Code {
	/// Stable wire form of the code.
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::ClientInvalidParam => "CLIENT_INVALID_PARAM",
			Self::ClientInvalidHeader => "CLIENT_INVALID_HEADER",
			Self::ClientInvalidProtocol => "CLIENT_INVALID_PROTOCOL",
			Self::ClientEmptyHostHeader => "CLIENT_EMPTY_HOST_HEADER",
			Self::ClientHostConfigNotExist => "CLIENT_HOST_CONFIG_NOT_EXIST",
			Self::ClientMethodNotAllowed => "CLIENT_METHOD_NOT_ALLOWED",
			Self::ClientNoSuchApi => "CLIENT_NO_SUCH_API",
			Self::ServerWorkerTimeout => "SERVER_WORKER_TIMEOUT",
			Self::ServerRenderError => "SERVER_RENDER_ERROR",
			Self::ServerNetError => "SERVER_NET_ERROR",
			Self::ServerRobotsDisallow => "SERVER_ROBOTS_DISALLOW",
			Self::ServerInternalError => "SERVER_INTERNAL_ERROR",
		}
	}

	/// HTTP status paired with the code.
	pub fn status(&self) -> StatusCode {
		match self {
			Self::ClientInvalidParam
			| Self::ClientInvalidHeader
			| Self::ClientInvalidProtocol
			| Self::ClientEmptyHostHeader => StatusCode::BAD_REQUEST,
			Self::ClientHostConfigNotExist | Self::ClientNoSuchApi => StatusCode::NOT_FOUND,
			Self::ClientMethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
			Self::ServerWorkerTimeout => StatusCode::GATEWAY_TIMEOUT,
			Self::ServerRenderError | Self::ServerInternalError =>
				StatusCode::INTERNAL_SERVER_ERROR,
			Self::ServerNetError => StatusCode::BAD_GATEWAY,
			Self::ServerRobotsDisallow => StatusCode::FORBIDDEN,
		}
	}

	/// Parse the wire form back into a code; unknown strings map to the catch-all.
	pub fn parse(value: &str) -> Self {
		match value {
			"CLIENT_INVALID_PARAM" => Self::ClientInvalidParam,
			"CLIENT_INVALID_HEADER" => Self::ClientInvalidHeader,
			"CLIENT_INVALID_PROTOCOL" => Self::ClientInvalidProtocol,
			"CLIENT_EMPTY_HOST_HEADER" => Self::ClientEmptyHostHeader,
			"CLIENT_HOST_CONFIG_NOT_EXIST" => Self::ClientHostConfigNotExist,
			"CLIENT_METHOD_NOT_ALLOWED" => Self::ClientMethodNotAllowed,
			"CLIENT_NO_SUCH_API" => Self::ClientNoSuchApi,
			"SERVER_WORKER_TIMEOUT" => Self::ServerWorkerTimeout,
			"SERVER_RENDER_ERROR" => Self::ServerRenderError,
			"SERVER_NET_ERROR" => Self::ServerNetError,
			"SERVER_ROBOTS_DISALLOW" => Self::ServerRobotsDisallow,
			_ => Self::ServerInternalError,
		}
	}
}
impl std::fmt::Display for Code {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Unified error type for the gateway.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[error(transparent)]
	Io(#[from] std::io::Error),

	#[error(transparent)]
	Figment(#[from] Box<figment::Error>),
	#[error(transparent)]
	Http(#[from] http::Error),
	#[error(transparent)]
	Pool(#[from] deadpool_redis::PoolError),
	#[error(transparent)]
	PoolCreate(#[from] deadpool_redis::CreatePoolError),
	#[error(transparent)]
	Redis(#[from] redis::RedisError),
	#[error(transparent)]
	Reqwest(#[from] reqwest::Error),
	#[error(transparent)]
	Serde(#[from] serde_json::Error),
	#[error(transparent)]
	Url(#[from] url::ParseError),
	#[error(transparent)]
	Xml(#[from] quick_xml::SeError),

	#[error("Bus error: {0}")]
	Bus(String),
	#[error("{message}")]
	Client { code: Code, message: String },
	#[error("Render failed ({code}): {message}")]
	Render { code: Code, message: String },
	#[error("Path '{path}' on {site} is disallowed by the site's robots policy.")]
	Robots { site: String, path: String },
	#[error("Store error: {0}")]
	Store(String),
	#[error("Validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
}
impl Error {
	/// Construct a client-attributable error with an explicit wire code.
	pub fn client(code: Code, message: impl Into<String>) -> Self {
		Self::Client { code, message: message.into() }
	}

	/// Wire code for this error; anything unexpected collapses onto the catch-all.
	pub fn code(&self) -> Code {
		match self {
			Self::Client { code, .. } | Self::Render { code, .. } => *code,
			Self::Robots { .. } => Code::ServerRobotsDisallow,
			_ => Code::ServerInternalError,
		}
	}
}
impl From<figment::Error> for Error {
	fn from(value: figment::Error) -> Self {
		Self::Figment(Box::new(value))
	}
}
