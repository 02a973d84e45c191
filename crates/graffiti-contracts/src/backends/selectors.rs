use super::registry::{BackendCatalog, BackendDescriptor, Operation};

/// Upper bound on backend attempts per dispatch: the primary and one alternate.
pub const MAX_ATTEMPTS: usize = 2;

#[derive(Debug, Clone, PartialEq)]
pub struct BackendSelection {
    pub primary: BackendDescriptor,
    pub alternate: Option<BackendDescriptor>,
    pub requested: Option<String>,
    pub fallback_reason: Option<String>,
}

impl BackendSelection {
    /// Backends in the order they should be tried.
    pub fn attempts(&self) -> Vec<&BackendDescriptor> {
        std::iter::once(&self.primary)
            .chain(self.alternate.as_ref())
            .take(MAX_ATTEMPTS)
            .collect()
    }
}

#[derive(Debug, Clone)]
pub struct BackendSelector {
    pub catalog: BackendCatalog,
}

impl BackendSelector {
    pub fn new(catalog: BackendCatalog) -> Self {
        Self { catalog }
    }

    pub fn select(
        &self,
        requested: Option<&str>,
        operation: Operation,
    ) -> Result<BackendSelection, String> {
        let (fallback_reason, requested_text) = if let Some(requested_value) = requested {
            if let Some(backend) = self
                .catalog
                .get(requested_value)
                .filter(|backend| backend.operation == operation)
            {
                return Ok(self.selection(
                    backend.clone(),
                    Some(requested_value.to_string()),
                    None,
                ));
            }
            (
                Some(format!(
                    "Requested backend '{requested_value}' unavailable for operation '{}'.",
                    operation.as_str()
                )),
                Some(requested_value.to_string()),
            )
        } else {
            (Some("No backend specified; using default.".to_string()), None)
        };

        let Some(backend) = self.catalog.default_for(operation).cloned() else {
            return Err(format!(
                "No backends available for operation '{}'.",
                operation.as_str()
            ));
        };
        Ok(self.selection(backend, requested_text, fallback_reason))
    }

    fn selection(
        &self,
        primary: BackendDescriptor,
        requested: Option<String>,
        fallback_reason: Option<String>,
    ) -> BackendSelection {
        let alternate = self.catalog.fallback_for(&primary.key).cloned();
        BackendSelection {
            primary,
            alternate,
            requested,
            fallback_reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{BackendSelector, MAX_ATTEMPTS};
    use crate::backends::{BackendCatalog, Operation};

    fn selector() -> BackendSelector {
        BackendSelector::new(BackendCatalog::builtin().expect("builtin catalog"))
    }

    #[test]
    fn requested_backend_is_primary_with_its_alternate() {
        let selection = selector()
            .select(Some("g1_pro"), Operation::TryOn)
            .expect("selection");
        assert_eq!(selection.primary.key, "g1_pro");
        assert_eq!(
            selection.alternate.as_ref().map(|b| b.key.as_str()),
            Some("g1_fast")
        );
        assert!(selection.fallback_reason.is_none());
        let keys: Vec<&str> = selection.attempts().iter().map(|b| b.key.as_str()).collect();
        assert_eq!(keys, vec!["g1_pro", "g1_fast"]);
        assert!(selection.attempts().len() <= MAX_ATTEMPTS);
    }

    #[test]
    fn unknown_backend_falls_back_to_default() {
        let selection = selector()
            .select(Some("g9"), Operation::TryOn)
            .expect("selection");
        assert_eq!(selection.primary.key, "g1_fast");
        assert_eq!(selection.requested.as_deref(), Some("g9"));
        assert_eq!(
            selection.fallback_reason.as_deref(),
            Some("Requested backend 'g9' unavailable for operation 'try_on'.")
        );
    }

    #[test]
    fn backend_of_other_operation_is_not_selected() {
        let selection = selector()
            .select(Some("g1_image"), Operation::TryOn)
            .expect("selection");
        assert_eq!(selection.primary.key, "g1_fast");
        assert!(selection.fallback_reason.is_some());
    }

    #[test]
    fn missing_request_uses_generation_default() {
        let selection = selector()
            .select(None, Operation::GenerateImage)
            .expect("selection");
        assert_eq!(selection.primary.key, "g1_image");
        assert_eq!(
            selection.alternate.as_ref().map(|b| b.key.as_str()),
            Some("g1_image_schnell")
        );
    }

    #[test]
    fn empty_operation_reports_error() {
        let catalog = BackendCatalog::from_json(
            r#"[{"key": "only", "name": "Only", "operation": "generate_image", "target": "a/b",
                 "api_name": "/infer", "convention": "positional",
                 "inputs": [{"name": "prompt", "from": "prompt"}]}]"#,
        )
        .expect("catalog");
        let err = BackendSelector::new(catalog)
            .select(None, Operation::TryOn)
            .expect_err("no try-on backends");
        assert_eq!(err, "No backends available for operation 'try_on'.");
    }
}
