//! Error types for telemetry operations.

use std::error::Error;
use std::fmt::{self, Display, Formatter};
use std::string::FromUtf8Error;

use prometheus::Error as PrometheusError;
use tracing_subscriber::filter::ParseError;
use tracing_subscriber::util::TryInitError;

/// Result alias for telemetry operations.
pub type TelemetryResult<T> = std::result::Result<T, TelemetryError>;

/// Errors raised while installing logging or maintaining metrics.
#[derive(Debug)]
pub enum TelemetryError {
    /// A global subscriber was already installed, or installation failed.
    SubscriberInstall {
        /// Underlying tracing subscriber error.
        source: TryInitError,
    },
    /// The configured level is not a valid filter directive.
    LogFilter {
        /// Directive that failed to parse.
        directive: String,
        /// Underlying filter parse error.
        source: ParseError,
    },
    /// Creating or registering a collector failed.
    Metric {
        /// Metric name.
        name: &'static str,
        /// `create` or `register`.
        operation: &'static str,
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// Rendering the text exposition failed.
    Exposition {
        /// Underlying Prometheus error.
        source: PrometheusError,
    },
    /// The rendered exposition was not UTF-8.
    ExpositionUtf8 {
        /// Underlying conversion error.
        source: FromUtf8Error,
    },
}

impl TelemetryError {
    pub(crate) const fn metric(
        name: &'static str,
        operation: &'static str,
        source: PrometheusError,
    ) -> Self {
        Self::Metric {
            name,
            operation,
            source,
        }
    }
}

impl Display for TelemetryError {
    fn fmt(&self, formatter: &mut Formatter<'_>) -> fmt::Result {
        let message = match self {
            Self::SubscriberInstall { .. } => "failed to install tracing subscriber",
            Self::LogFilter { .. } => "invalid log filter directive",
            Self::Metric { .. } => "metric setup failed",
            Self::Exposition { .. } => "failed to render metrics",
            Self::ExpositionUtf8 { .. } => "rendered metrics were not valid utf-8",
        };
        formatter.write_str(message)
    }
}

impl Error for TelemetryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::SubscriberInstall { source } => Some(source),
            Self::LogFilter { source, .. } => Some(source),
            Self::Metric { source, .. } | Self::Exposition { source } => Some(source),
            Self::ExpositionUtf8 { source } => Some(source),
        }
    }
}
