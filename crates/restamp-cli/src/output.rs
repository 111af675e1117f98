//! Shared output layer for human/JSON parity across all CLI commands.
//!
//! Every command handler receives an [`OutputMode`]. Human output goes to
//! stdout as short labelled sections; JSON output is one pretty-printed
//! document per invocation. Errors always go to stderr.

use restamp_core::error::{ErrorCode, RestampError};
use restamp_core::lock::LockError;
use restamp_core::push::PushRejectedError;
use restamp_core::StoreError;
use serde::Serialize;
use std::io::{self, Write};

/// Shared width for human separators.
pub const RULE_WIDTH: usize = 60;

/// Write a horizontal separator.
pub fn rule(w: &mut dyn Write) -> io::Result<()> {
    writeln!(w, "{:-<width$}", "", width = RULE_WIDTH)
}

/// Write a section heading followed by a separator.
pub fn section(w: &mut dyn Write, heading: &str) -> io::Result<()> {
    writeln!(w, "{heading}")?;
    rule(w)
}

/// Render a left-aligned key/value line.
pub fn kv(w: &mut dyn Write, key: &str, value: impl AsRef<str>) -> io::Result<()> {
    writeln!(w, "{:<12} {}", format!("{key}:"), value.as_ref())
}

/// The output modes supported by the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    Human,
    Json,
}

impl OutputMode {
    /// Returns `true` if JSON output was requested.
    pub const fn is_json(self) -> bool {
        matches!(self, Self::Json)
    }
}

/// Render a serializable value to stdout in the requested format.
///
/// In JSON mode the value is serialized with `serde_json`; otherwise
/// `human_fn` writes the text form.
pub fn render<T: Serialize>(
    mode: OutputMode,
    value: &T,
    human_fn: impl FnOnce(&T, &mut dyn Write) -> io::Result<()>,
) -> anyhow::Result<()> {
    let stdout = io::stdout();
    let mut out = stdout.lock();
    match mode {
        OutputMode::Json => {
            serde_json::to_writer_pretty(&mut out, value)?;
            writeln!(out)?;
        }
        OutputMode::Human => human_fn(value, &mut out)?,
    }
    Ok(())
}

/// A structured error with an optional hint and error code.
#[derive(Debug, Clone, Serialize)]
pub struct CliError {
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hint: Option<String>,
    /// Stable `E####` code.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    pub retryable: bool,
}

impl CliError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            hint: None,
            error_code: None,
            retryable: false,
        }
    }

    fn with_code(message: String, code: ErrorCode, retryable: bool) -> Self {
        Self {
            message,
            hint: code.hint().map(str::to_string),
            error_code: Some(code.code().to_string()),
            retryable,
        }
    }
}

/// Pick the most specific known error out of an `anyhow` chain.
impl From<&anyhow::Error> for CliError {
    fn from(err: &anyhow::Error) -> Self {
        let message = format!("{err:#}");
        for cause in err.chain() {
            if let Some(e) = cause.downcast_ref::<RestampError>() {
                return Self::with_code(message, e.code(), e.is_retryable());
            }
            if let Some(e) = cause.downcast_ref::<LockError>() {
                return Self::with_code(message, e.code(), e.is_retryable());
            }
            if cause.is::<PushRejectedError>() {
                return Self::with_code(message, ErrorCode::PushRejected, true);
            }
            if let Some(e) = cause.downcast_ref::<StoreError>() {
                return Self::with_code(message, e.code(), false);
            }
        }
        Self::new(message)
    }
}

fn write_error(w: &mut dyn Write, mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    match mode {
        OutputMode::Json => {
            let wrapper = serde_json::json!({ "error": error });
            serde_json::to_writer_pretty(&mut *w, &wrapper)?;
            writeln!(w)?;
        }
        OutputMode::Human => {
            match &error.error_code {
                Some(code) => writeln!(w, "error[{code}]: {}", error.message)?,
                None => writeln!(w, "error: {}", error.message)?,
            }
            if let Some(hint) = &error.hint {
                writeln!(w, "  hint: {hint}")?;
            }
        }
    }
    Ok(())
}

/// Render an error to stderr in the requested format.
pub fn render_error(mode: OutputMode, error: &CliError) -> anyhow::Result<()> {
    let stderr = io::stderr();
    let mut out = stderr.lock();
    write_error(&mut out, mode, error)
}

#[cfg(test)]
mod tests {
    use super::*;
    use restamp_core::refs::RefUpdateError;

    fn rendered(mode: OutputMode, error: &CliError) -> String {
        let mut buf = Vec::new();
        write_error(&mut buf, mode, error).unwrap();
        String::from_utf8(buf).unwrap()
    }

    #[test]
    fn restamp_error_carries_code_and_hint() {
        let err = anyhow::Error::new(RestampError::Refs(RefUpdateError::Locked {
            name: "refs/heads/main".into(),
        }));
        let cli = CliError::from(&err);
        assert_eq!(cli.error_code.as_deref(), Some("E4003"));
        assert!(cli.hint.is_some());
        assert!(cli.retryable);
    }

    #[test]
    fn lock_io_failure_is_not_retryable() {
        let err = anyhow::Error::new(LockError::from(io::Error::from(
            io::ErrorKind::PermissionDenied,
        )))
        .context("Failed to lock repository");
        let cli = CliError::from(&err);
        assert!(!cli.retryable);

        let busy = anyhow::Error::new(LockError::Timeout {
            path: "restamp.lock".into(),
            waited: std::time::Duration::from_millis(5),
        });
        assert!(CliError::from(&busy).retryable);
    }

    #[test]
    fn context_is_kept_in_message() {
        let err = anyhow::Error::new(RestampError::Cancelled).context("repo /tmp/x");
        let cli = CliError::from(&err);
        assert!(cli.message.starts_with("repo /tmp/x: "));
        assert_eq!(cli.error_code.as_deref(), Some("E8001"));
        assert!(!cli.retryable);
    }

    #[test]
    fn plain_errors_have_no_code() {
        let err = anyhow::anyhow!("something went wrong");
        let cli = CliError::from(&err);
        assert!(cli.error_code.is_none());
        assert_eq!(rendered(OutputMode::Human, &cli), "error: something went wrong\n");
    }

    #[test]
    fn human_error_shows_code_and_hint() {
        let cli = CliError::with_code("boom".into(), ErrorCode::PushRejected, true);
        let text = rendered(OutputMode::Human, &cli);
        assert!(text.starts_with("error[E5001]: boom\n"));
        assert!(text.contains("  hint: "));
    }

    #[test]
    fn json_error_is_wrapped() {
        let cli = CliError::with_code("boom".into(), ErrorCode::LockContention, true);
        let value: serde_json::Value =
            serde_json::from_str(&rendered(OutputMode::Json, &cli)).unwrap();
        assert_eq!(value["error"]["error_code"], "E4003");
        assert_eq!(value["error"]["retryable"], true);
    }

    #[test]
    fn json_mode_flag() {
        assert!(OutputMode::Json.is_json());
        assert!(!OutputMode::Human.is_json());
    }
}
