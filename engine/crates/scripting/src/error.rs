use std::path::PathBuf;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ScriptError {
    /// A script-raised failure caught by a run scope. `message` is the thrown
    /// value's string form.
    #[error("script error: {message}")]
    Script { message: String },

    #[error("Lua error: {0}")]
    Lua(#[from] mlua::Error),

    #[error("module not found: {request} (from {})", base.display())]
    ModuleNotFound { request: String, base: PathBuf },

    #[error("module {} is outside the script root {}", path.display(), root.display())]
    ModuleOutsideRoot { path: PathBuf, root: PathBuf },

    #[error("data module {}: {reason}", path.display())]
    DataModule { path: PathBuf, reason: String },

    #[error("script load error: {0}")]
    Load(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl ScriptError {
    /// Text carried across the boundary, without the variant prefix for
    /// script-raised errors.
    pub fn message(&self) -> String {
        match self {
            ScriptError::Script { message } => message.clone(),
            other => other.to_string(),
        }
    }

    /// Raise this error through the runtime's exception channel.
    pub fn into_lua(self) -> mlua::Error {
        mlua::Error::external(self)
    }
}

/// Marker the runtime's message handler puts before the traceback it appends.
const TRACEBACK_MARKER: &str = "\nstack traceback:";

fn strip_traceback(message: &str) -> String {
    match message.find(TRACEBACK_MARKER) {
        Some(at) => message[..at].to_string(),
        None => message.to_string(),
    }
}

/// Reduce a runtime error to the message of the value that was thrown.
///
/// Callback wrappers added while the error crossed native frames are peeled
/// off and any appended traceback is cut, so a script `error("boom", 0)`
/// yields exactly `boom`.
pub fn thrown_message(err: &mlua::Error) -> String {
    match err {
        mlua::Error::CallbackError { cause, .. } => thrown_message(cause),
        mlua::Error::WithContext { cause, .. } => thrown_message(cause),
        mlua::Error::RuntimeError(message) => strip_traceback(message),
        mlua::Error::SyntaxError { message, .. } => strip_traceback(message),
        mlua::Error::ExternalError(inner) => match inner.downcast_ref::<ScriptError>() {
            Some(script) => strip_traceback(&script.message()),
            None => strip_traceback(&inner.to_string()),
        },
        other => strip_traceback(&other.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn runtime_error_message_is_verbatim() {
        let err = mlua::Error::RuntimeError("boom".into());
        assert_eq!(thrown_message(&err), "boom");
    }

    #[test]
    fn appended_traceback_is_cut() {
        let err = mlua::Error::RuntimeError(
            "boom\nstack traceback:\n\t[C]: in ?\n\t[C]: in function 'error'".into(),
        );
        assert_eq!(thrown_message(&err), "boom");
    }

    #[test]
    fn nested_cause_traceback_is_cut() {
        let err = mlua::Error::CallbackError {
            traceback: "stack traceback:\n\t[C]: in ?".into(),
            cause: Arc::new(mlua::Error::RuntimeError(
                "custom failure\nstack traceback:\n\tt2:1: in ?".into(),
            )),
        };
        assert_eq!(thrown_message(&err), "custom failure");
    }

    #[test]
    fn multiline_message_without_traceback_is_kept() {
        let err = mlua::Error::RuntimeError("first\nsecond".into());
        assert_eq!(thrown_message(&err), "first\nsecond");
    }

    #[test]
    fn callback_wrappers_are_peeled() {
        let err = mlua::Error::CallbackError {
            traceback: "stack traceback:".into(),
            cause: Arc::new(mlua::Error::CallbackError {
                traceback: String::new(),
                cause: Arc::new(mlua::Error::RuntimeError("inner".into())),
            }),
        };
        assert_eq!(thrown_message(&err), "inner");
    }

    #[test]
    fn external_script_error_keeps_its_text() {
        let err = ScriptError::ModuleNotFound {
            request: "missing.lua".into(),
            base: PathBuf::from("/scripts"),
        }
        .into_lua();
        assert_eq!(
            thrown_message(&err),
            "module not found: missing.lua (from /scripts)"
        );
    }

    #[test]
    fn script_variant_message_has_no_prefix() {
        let err = ScriptError::Script { message: "boom".into() };
        assert_eq!(err.message(), "boom");
        assert_eq!(err.to_string(), "script error: boom");
    }
}
