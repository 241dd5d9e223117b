use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Top-level error type for template merging.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum QuillError {
    #[error("Malformed template: {0}")]
    MalformedTemplate(String),

    #[error("Malformed data file: {0}")]
    MalformedData(String),

    #[error("Row {row}: column '{column}' not found")]
    MissingColumn { row: usize, column: String },

    #[error("Invalid rules: {0}")]
    InvalidRules(String),

    #[error("Invalid row selection: {0}")]
    InvalidSelection(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("File system error: {0}")]
    Io(String),
}

/// Classification of errors for logging and user display.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// An uploaded file or argument is unusable; processing halts.
    Input,
    /// A single data row could not be rendered; the batch continues.
    Row,
    /// Invalid or missing configuration.
    Config,
    /// File I/O or anything unexpected.
    System,
}

impl QuillError {
    /// Returns the broad error category for routing and display purposes.
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::MalformedTemplate(_) => ErrorCategory::Input,
            Self::MalformedData(_) => ErrorCategory::Input,
            Self::MissingColumn { .. } => ErrorCategory::Row,
            Self::InvalidRules(_) => ErrorCategory::Input,
            Self::InvalidSelection(_) => ErrorCategory::Input,
            Self::Config(_) => ErrorCategory::Config,
            Self::Io(_) => ErrorCategory::System,
        }
    }

    /// Returns a user-friendly message.
    pub fn user_message(&self) -> String {
        match self {
            Self::MalformedTemplate(_) => {
                "The template is not a valid .docx file. Save it as .docx and try again.".into()
            }
            Self::MalformedData(msg) => format!("The data file could not be read: {msg}"),
            Self::MissingColumn { row, column } => {
                format!("Row {row} has no column named '{column}'.")
            }
            Self::InvalidRules(msg) => format!("Rules: {msg}"),
            Self::InvalidSelection(msg) => format!("Row selection: {msg}"),
            Self::Config(msg) => format!("Configuration issue: {msg}"),
            Self::Io(_) => "File error. Check the path and permissions.".into(),
        }
    }

    /// Whether processing of the remaining rows may continue.
    pub fn is_row_local(&self) -> bool {
        self.category() == ErrorCategory::Row
    }
}

// ---------------------------------------------------------------------------
// Classification for anyhow::Error
// ---------------------------------------------------------------------------

/// Classified error with context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClassifiedError {
    pub category: ErrorCategory,
    pub message: String,
    pub user_message: String,
}

/// Classify an `anyhow::Error`. A `QuillError` anywhere in the chain decides
/// the category; otherwise the message is matched against known patterns.
pub fn classify_error(error: &anyhow::Error) -> ClassifiedError {
    if let Some(quill) = error.chain().find_map(|e| e.downcast_ref::<QuillError>()) {
        return ClassifiedError {
            category: quill.category(),
            message: format!("{error:#}"),
            user_message: quill.user_message(),
        };
    }

    let msg = format!("{error:#}").to_lowercase();
    let (category, user_msg) = if msg.contains("no such file") || msg.contains("not found") {
        (ErrorCategory::System, "File not found.")
    } else if msg.contains("permission denied") {
        (ErrorCategory::System, "Permission denied.")
    } else if msg.contains("config") {
        (ErrorCategory::Config, "Configuration error. Check settings.")
    } else if msg.contains("zip") || msg.contains("xml") {
        (ErrorCategory::Input, "The input file appears to be damaged.")
    } else {
        (ErrorCategory::System, "An unexpected error occurred.")
    };

    ClassifiedError {
        category,
        message: format!("{error:#}"),
        user_message: user_msg.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::{Context, anyhow};

    // -----------------------------------------------------------------------
    // QuillError category mapping
    // -----------------------------------------------------------------------

    #[test]
    fn test_missing_column_is_row_local() {
        let err = QuillError::MissingColumn {
            row: 3,
            column: "Name".into(),
        };
        assert_eq!(err.category(), ErrorCategory::Row);
        assert!(err.is_row_local());
        assert_eq!(err.to_string(), "Row 3: column 'Name' not found");
    }

    #[test]
    fn test_malformed_inputs_halt() {
        for err in [
            QuillError::MalformedTemplate("bad zip".into()),
            QuillError::MalformedData("no header".into()),
            QuillError::InvalidRules("not an array".into()),
            QuillError::InvalidSelection("5-2".into()),
        ] {
            assert_eq!(err.category(), ErrorCategory::Input);
            assert!(!err.is_row_local());
        }
    }

    #[test]
    fn test_user_message_hides_internals() {
        let err = QuillError::Io("EACCES at /srv/secret".into());
        assert!(!err.user_message().contains("/srv/secret"));
    }

    // -----------------------------------------------------------------------
    // classify_error
    // -----------------------------------------------------------------------

    #[test]
    fn test_classify_finds_quill_error_under_context() {
        let err: anyhow::Error = Err::<(), _>(QuillError::MalformedTemplate("eof".into()))
            .context("Failed to load template.docx")
            .unwrap_err();
        let classified = classify_error(&err);
        assert_eq!(classified.category, ErrorCategory::Input);
        assert!(classified.message.contains("template.docx"));
    }

    #[test]
    fn test_classify_no_such_file() {
        let err = anyhow!("No such file or directory (os error 2)");
        let classified = classify_error(&err);
        assert_eq!(classified.category, ErrorCategory::System);
        assert_eq!(classified.user_message, "File not found.");
    }

    #[test]
    fn test_classify_zip_damage() {
        let err = anyhow!("invalid Zip archive: Could not find central directory end");
        assert_eq!(classify_error(&err).category, ErrorCategory::Input);
    }

    #[test]
    fn test_classify_fallback() {
        let err = anyhow!("something totally unexpected happened");
        let classified = classify_error(&err);
        assert_eq!(classified.category, ErrorCategory::System);
        assert_eq!(classified.user_message, "An unexpected error occurred.");
    }

    #[test]
    fn test_category_serde_round_trip() {
        for category in [
            ErrorCategory::Input,
            ErrorCategory::Row,
            ErrorCategory::Config,
            ErrorCategory::System,
        ] {
            let json = serde_json::to_string(&category).unwrap();
            let back: ErrorCategory = serde_json::from_str(&json).unwrap();
            assert_eq!(category, back);
        }
    }
}
