//! Terminal bootstrap failures and their user-facing explanations.

/// Why a bootstrap run ended without a connection.
///
/// Recoverable conditions (a refused connection while the embedded daemon
/// comes up, a daemon still warming up) are handled inside the orchestrator
/// and never show up here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BootstrapError {
    #[error("daemon is not configured: {0}")]
    ConfigMissing(String),

    #[error("daemon conf could not be read: {0}")]
    ConfigUnreadable(String),

    #[error("could not write daemon conf: {0}")]
    ConfigWrite(String),

    #[error("parameter files are still missing after download")]
    ParamsMissing,

    #[error("parameter download failed: {0}")]
    DownloadFailed(String),

    #[error("embedded daemon could not be started")]
    ProcessLaunchFailed {
        /// The conf sets `daemon=1`.
        detached: bool,
        /// Captured stderr of the launch attempt.
        stderr: String,
    },

    #[error("connection to {host}:{port} refused")]
    ConnectionRefused {
        host: String,
        port: u16,
        uses_conf_file: bool,
    },

    #[error("authentication failed")]
    AuthenticationFailed,

    #[error("transport error: {0}")]
    TransportError(String),

    #[error("malformed response: {0}")]
    MalformedResponse(String),
}

impl BootstrapError {
    /// Short heading for an error display.
    pub fn title(&self) -> &'static str {
        match self {
            Self::ConfigMissing(_) | Self::ConfigUnreadable(_) | Self::ConfigWrite(_) => {
                "Configuration Error"
            }
            Self::ParamsMissing | Self::DownloadFailed(_) => "Parameter Download Error",
            Self::ProcessLaunchFailed { .. } => "Daemon Error",
            Self::AuthenticationFailed => "Authentication Error",
            Self::ConnectionRefused { .. } | Self::TransportError(_) | Self::MalformedResponse(_) => {
                "Connection Error"
            }
        }
    }

    /// What went wrong and what the user can do about it.
    pub fn explanation(&self, daemon: &str) -> String {
        match self {
            Self::ConfigMissing(detail) => format!(
                "Could not find a configuration for {daemon} ({detail}).\n\n\
                 Create THC.conf, or save the host, port, rpcuser and rpcpassword \
                 with `hempconnect settings set-connection`."
            ),
            Self::ConfigUnreadable(detail) => {
                format!("The {daemon} conf file could not be read: {detail}")
            }
            Self::ConfigWrite(detail) => {
                format!("Could not create a conf file for {daemon}: {detail}")
            }
            Self::ParamsMissing => "The parameter files are still missing after downloading. \
                 Check free disk space and try again."
                .to_string(),
            Self::DownloadFailed(detail) => format!(
                "Downloading the parameter files failed: {detail}\n\n\
                 Check your internet connection and try again."
            ),
            Self::ProcessLaunchFailed { detached: true, .. } => format!(
                "Your THC.conf sets {daemon} to run as a daemon, so it detaches \
                 and could not be reached.\n\n\
                 Remove the following line from THC.conf and restart:\ndaemon=1"
            ),
            Self::ProcessLaunchFailed {
                detached: false,
                stderr,
            } => {
                let mut text = format!(
                    "Couldn't start the embedded {daemon}.\n\n\
                     Please try restarting.\n\n\
                     If you previously started {daemon} with custom arguments, \
                     you might need to reset THC.conf.\n\n\
                     If all else fails, please run {daemon} manually."
                );
                let stderr = stderr.trim_end();
                if !stderr.is_empty() {
                    text.push_str("\n\nThe process returned:\n\n");
                    text.push_str(stderr);
                }
                text
            }
            Self::ConnectionRefused {
                host,
                port,
                uses_conf_file: true,
            } => format!(
                "Connection refused. Please make sure {daemon} is running and \
                 listening on {host}:{port} as set in THC.conf."
            ),
            Self::ConnectionRefused {
                host,
                port,
                uses_conf_file: false,
            } => format!(
                "Could not connect to {daemon} at {host}:{port} configured in settings.\n\n\
                 Check the saved host and port, and make sure {daemon} is running."
            ),
            Self::AuthenticationFailed => format!(
                "Authentication failed. {daemon} did not accept the rpcuser/rpcpassword. \
                 Check them in THC.conf or in the saved connection settings."
            ),
            Self::TransportError(detail) => {
                format!("There was a network error talking to {daemon}: {detail}")
            }
            Self::MalformedResponse(detail) => {
                format!("{daemon} sent a reply that could not be understood: {detail}")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_refused_explanation_depends_on_source() {
        let from_conf = BootstrapError::ConnectionRefused {
            host: "127.0.0.1".into(),
            port: 36790,
            uses_conf_file: true,
        };
        let from_settings = BootstrapError::ConnectionRefused {
            host: "node.lan".into(),
            port: 9999,
            uses_conf_file: false,
        };
        assert!(from_conf.explanation("thcd").contains("THC.conf"));
        assert!(from_settings.explanation("thcd").contains("configured in settings"));
        assert!(from_settings.explanation("thcd").contains("node.lan:9999"));
        assert_eq!(from_conf.title(), "Connection Error");
    }

    #[test]
    fn test_launch_failure_includes_stderr() {
        let err = BootstrapError::ProcessLaunchFailed {
            detached: false,
            stderr: "Error: Cannot obtain a lock\n".into(),
        };
        let text = err.explanation("thcd");
        assert!(text.starts_with("Couldn't start the embedded thcd."));
        assert!(text.ends_with("The process returned:\n\nError: Cannot obtain a lock"));
    }

    #[test]
    fn test_launch_failure_without_stderr() {
        let err = BootstrapError::ProcessLaunchFailed {
            detached: false,
            stderr: String::new(),
        };
        assert!(!err.explanation("thcd").contains("The process returned"));
    }

    #[test]
    fn test_detached_explanation() {
        let err = BootstrapError::ProcessLaunchFailed {
            detached: true,
            stderr: String::new(),
        };
        assert!(err.explanation("thcd").ends_with("daemon=1"));
        assert_eq!(err.title(), "Daemon Error");
    }
}
