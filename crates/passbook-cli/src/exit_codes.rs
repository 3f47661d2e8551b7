//! Exit codes for `passbook`.
//! These codes are part of the public contract; scripts branch on them.

use passbook_core::{ErrorClass, PassError};

pub const SUCCESS: i32 = 0;
pub const VERIFY_FAILED: i32 = 1; // Archive digests disagree with manifest.json
pub const CONFIG_ERROR: i32 = 2; // Bad style, fields, credentials, config or arguments
pub const ASSET_ERROR: i32 = 3; // Image could not be read
pub const SIGNING_ERROR: i32 = 4; // Signer failed or wrote diagnostics
pub const ASSEMBLY_ERROR: i32 = 5; // Archive could not be written or read

pub fn for_class(class: ErrorClass) -> i32 {
    match class {
        ErrorClass::Configuration => CONFIG_ERROR,
        ErrorClass::AssetIo => ASSET_ERROR,
        ErrorClass::Signing => SIGNING_ERROR,
        ErrorClass::Assembly => ASSEMBLY_ERROR,
    }
}

/// Library errors map by class; anything else is a usage or I/O problem.
pub fn for_error(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<PassError>()
        .map(|e| for_class(e.class()))
        .unwrap_or(CONFIG_ERROR)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_library_exit_codes() {
        let errors = [
            PassError::MissingField {
                field: "serialNumber".into(),
            },
            PassError::AssetIo {
                name: "icon".into(),
                path: None,
                source: std::io::Error::other("boom"),
            },
            PassError::Signing {
                message: "bad key".into(),
            },
            PassError::Assembly {
                message: "disk full".into(),
            },
        ];
        for err in errors {
            let expected = err.exit_code();
            assert_eq!(for_class(err.class()), expected);
            assert_eq!(for_error(&anyhow::Error::new(err)), expected);
        }
    }

    #[test]
    fn wrapped_library_error_keeps_its_code() {
        let err = anyhow::Error::new(PassError::Signing {
            message: "bad key".into(),
        })
        .context("generating pass");
        assert_eq!(for_error(&err), SIGNING_ERROR);
        assert_eq!(for_error(&anyhow::anyhow!("no such file")), CONFIG_ERROR);
    }
}
