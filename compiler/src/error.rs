use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path:   PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{file}:{line}:{column}: {msg}")]
    ParseError {
        file:   String,
        msg:    String,
        line:   usize,
        column: usize,
    },

    #[error("{file}: import \"{import}\" failed: {msg}")]
    ImportError {
        file:   String,
        import: String,
        msg:    String,
    },

    #[error("{file}: {msg}")]
    VerifierError {
        file: String,
        msg:  String,
    },

    #[error("Descriptor decode error: {0}")]
    DecodeError(String),

    #[error("Descriptor encode error: {0}")]
    EncodeError(String),
}

impl CompileError {
    /// Attach the schema file name to a parse error raised by the tokenizer or
    /// parser, which only know line and column.
    pub fn in_file(self, name: &str) -> Self {
        match self {
            CompileError::ParseError { msg, line, column, .. } => CompileError::ParseError {
                file: name.to_string(),
                msg,
                line,
                column,
            },
            other => other,
        }
    }
}

impl From<protoplex_wire::WireError> for CompileError {
    fn from(err: protoplex_wire::WireError) -> Self {
        CompileError::DecodeError(err.to_string())
    }
}
