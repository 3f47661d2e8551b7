//! Reusable pass templates.
//!
//! A template fixes the style, shared fields (organization, team, pass type)
//! and signing setup; each [`PassTemplate::create_pass`] call adds the fields
//! that vary per pass and returns a pipeline builder.

use std::sync::Arc;

use crate::archive::CompressionLevel;
use crate::credentials::Credentials;
use crate::error::PassResult;
use crate::fields::{FieldSet, PassStyle};
use crate::pipeline::PipelineBuilder;
use crate::signing::SignatureService;

/// Template fields win over per-pass fields on key collisions.
#[derive(Clone)]
pub struct PassTemplate {
    style: PassStyle,
    fields: FieldSet,
    credentials: Credentials,
    signer: Option<Arc<dyn SignatureService>>,
    compression: CompressionLevel,
}

impl PassTemplate {
    /// Rejects an unknown style immediately and pins `formatVersion` to 1.
    pub fn new(style: &str, fields: FieldSet) -> PassResult<Self> {
        let style: PassStyle = style.parse()?;
        let mut fields = fields;
        fields.insert("formatVersion", 1);
        Ok(Self {
            style,
            fields,
            credentials: Credentials::default(),
            signer: None,
            compression: CompressionLevel::default(),
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = credentials;
        self
    }

    pub fn with_signer(mut self, signer: Arc<dyn SignatureService>) -> Self {
        self.signer = Some(signer);
        self
    }

    pub fn with_compression(mut self, level: CompressionLevel) -> Self {
        self.compression = level;
        self
    }

    /// Replace credentials on an existing template.
    pub fn set_credentials(&mut self, credentials: Credentials) {
        self.credentials = credentials;
    }

    pub fn style(&self) -> PassStyle {
        self.style
    }

    pub fn fields(&self) -> &FieldSet {
        &self.fields
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Start a pass from this template. Validation runs on `build()`.
    pub fn create_pass(&self, fields: FieldSet) -> PipelineBuilder {
        let mut merged = fields;
        merged.extend(self.fields.clone());

        let builder = PipelineBuilder::new(self.style.as_str(), merged)
            .credentials(self.credentials.clone())
            .compression(self.compression);
        match &self.signer {
            Some(signer) => builder.signer(Arc::clone(signer)),
            None => builder,
        }
    }
}

impl std::fmt::Debug for PassTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PassTemplate")
            .field("style", &self.style)
            .field("fields", &self.fields)
            .field("credentials", &self.credentials)
            .field("compression", &self.compression)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::PassError;
    use serde_json::json;

    fn shared() -> FieldSet {
        FieldSet::new()
            .with("passTypeIdentifier", "pass.com.example.coupon")
            .with("teamIdentifier", "TEAM123456")
            .with("organizationName", "Example Shop")
    }

    #[test]
    fn invalid_style_rejected_at_construction() {
        let err = PassTemplate::new("eventTicker", shared()).unwrap_err();
        assert!(matches!(err, PassError::InvalidStyle { style } if style == "eventTicker"));
    }

    #[test]
    fn format_version_is_pinned() {
        let template = PassTemplate::new("coupon", shared().with("formatVersion", 7)).unwrap();
        assert_eq!(template.fields().get("formatVersion"), Some(&json!(1)));
        assert_eq!(template.style(), PassStyle::Coupon);
    }

    #[test]
    fn template_keys_override_pass_keys() {
        let template = PassTemplate::new("coupon", shared())
            .unwrap()
            .with_credentials(Credentials::new("pass.pem", "wwdr.pem", "pw"));

        let pipeline = template
            .create_pass(
                FieldSet::new()
                    .with("organizationName", "Someone Else")
                    .with("serialNumber", "C-42")
                    .with("description", "10% off"),
            )
            .build()
            .unwrap();

        let fields = pipeline.fields();
        assert_eq!(fields.get("organizationName"), Some(&json!("Example Shop")));
        assert_eq!(fields.get("serialNumber"), Some(&json!("C-42")));
        assert!(fields.get("coupon").is_some());
    }

    #[test]
    fn missing_credentials_surface_on_build() {
        let template = PassTemplate::new("generic", shared()).unwrap();
        let err = template
            .create_pass(
                FieldSet::new()
                    .with("serialNumber", "G-1")
                    .with("description", "member"),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, PassError::InvalidCredentials { .. }));
    }
}
