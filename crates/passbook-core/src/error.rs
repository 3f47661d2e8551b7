//! Error types for pass generation.

use std::path::PathBuf;

/// Error classification.
///
/// Configuration errors are detected before any I/O and are never retried.
/// The other classes surface asynchronously while a run is in flight.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Bad style, missing fields, malformed credentials or asset types.
    Configuration,
    /// Asset file could not be opened or an asset stream failed.
    AssetIo,
    /// The signing authority rejected the manifest or produced garbage.
    Signing,
    /// The archive writer failed.
    Assembly,
}

impl std::fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Pass generation errors.
#[derive(Debug, thiserror::Error)]
pub enum PassError {
    /// A required top-level field is absent or empty.
    #[error("{field} is required")]
    MissingField { field: String },

    /// Style is not one of the closed set.
    #[error("incorrect pass style: {style}")]
    InvalidStyle { style: String },

    /// More than one style key is populated.
    #[error("pass has style {style} but also contains style key {other}")]
    ConflictingStyle { style: String, other: String },

    /// A style-specific field is used outside its style.
    #[error("{field} is only allowed in a {allowed}, not in a {style}")]
    FieldNotAllowed {
        field: String,
        allowed: String,
        style: String,
    },

    /// Malformed `locations` entry.
    #[error("invalid locations: {reason}")]
    InvalidLocation { reason: String },

    /// Malformed `barcode` object.
    #[error("invalid barcode: {reason}")]
    InvalidBarcode { reason: String },

    /// Field set is not a JSON object or has a malformed value.
    #[error("invalid fields: {reason}")]
    InvalidFields { reason: String },

    /// Credential bundle missing or malformed.
    #[error("invalid credentials: {reason}")]
    InvalidCredentials { reason: String },

    /// Image field holds a value that is neither a path, buffer nor stream.
    #[error("{field} cannot be {actual}")]
    InvalidAssetType { field: String, actual: String },

    /// Image name outside the known vocabulary.
    #[error("unknown image: {name}")]
    UnknownImage { name: String },

    /// The same entry name was added twice.
    #[error("duplicate entry: {name}")]
    DuplicateEntry { name: String },

    /// Configuration file could not be loaded.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Asset could not be read.
    #[error("failed to read asset {name} ({}): {source}", origin(.path))]
    AssetIo {
        name: String,
        path: Option<PathBuf>,
        #[source]
        source: std::io::Error,
    },

    /// Signing failed; carries the signer's diagnostic text.
    #[error("signing failed: {message}")]
    Signing { message: String },

    /// Archive writer failed.
    #[error("archive assembly failed: {message}")]
    Assembly { message: String },

    /// An existing archive is not a well-formed pass.
    #[error("invalid pass archive: {reason}")]
    InvalidArchive { reason: String },
}

impl PassError {
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::AssetIo { .. } => ErrorClass::AssetIo,
            Self::Signing { .. } => ErrorClass::Signing,
            Self::Assembly { .. } | Self::InvalidArchive { .. } => ErrorClass::Assembly,
            Self::MissingField { .. }
            | Self::InvalidStyle { .. }
            | Self::ConflictingStyle { .. }
            | Self::FieldNotAllowed { .. }
            | Self::InvalidLocation { .. }
            | Self::InvalidBarcode { .. }
            | Self::InvalidFields { .. }
            | Self::InvalidCredentials { .. }
            | Self::InvalidAssetType { .. }
            | Self::UnknownImage { .. }
            | Self::DuplicateEntry { .. }
            | Self::Config { .. } => ErrorClass::Configuration,
        }
    }

    /// Exit code for CLI.
    pub fn exit_code(&self) -> i32 {
        match self.class() {
            ErrorClass::Configuration => 2,
            ErrorClass::AssetIo => 3,
            ErrorClass::Signing => 4,
            ErrorClass::Assembly => 5,
        }
    }

    pub(crate) fn signing(message: impl Into<String>) -> Self {
        Self::Signing {
            message: message.into(),
        }
    }

    pub(crate) fn assembly(message: impl Into<String>) -> Self {
        Self::Assembly {
            message: message.into(),
        }
    }
}

impl From<zip::result::ZipError> for PassError {
    fn from(err: zip::result::ZipError) -> Self {
        Self::Assembly {
            message: err.to_string(),
        }
    }
}

fn origin(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => p.display().to_string(),
        None => "stream".to_string(),
    }
}

/// Result type for pass operations.
pub type PassResult<T> = Result<T, PassError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_errors_share_exit_code() {
        let missing = PassError::MissingField {
            field: "serialNumber".into(),
        };
        let asset = PassError::InvalidAssetType {
            field: "icon".into(),
            actual: "number".into(),
        };
        assert_eq!(missing.class(), ErrorClass::Configuration);
        assert_eq!(missing.exit_code(), asset.exit_code());
        assert_eq!(missing.to_string(), "serialNumber is required");
    }

    #[test]
    fn asset_io_message_names_path() {
        let err = PassError::AssetIo {
            name: "icon".into(),
            path: Some(PathBuf::from("/nope/icon.png")),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        };
        assert_eq!(err.class(), ErrorClass::AssetIo);
        assert!(err.to_string().contains("/nope/icon.png"));
        assert_eq!(err.exit_code(), 3);
    }
}
