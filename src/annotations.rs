//! Annotation keys read and written on injected objects.

/// Prefix used when no annotation namespace is configured.
pub const DEFAULT_ANNOTATION_NAMESPACE: &str = "injector.example.com";

/// Value of the status annotation once a template has been applied.
pub const STATUS_INJECTED: &str = "injected";

/// The annotation keys derived from one annotation namespace.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AnnotationKeys {
    /// `<ns>/request`, names the template an object asks for.
    pub request: String,
    /// `<ns>/status`, set to [`STATUS_INJECTED`] after injection.
    pub status: String,
}

impl AnnotationKeys {
    pub fn new(namespace: &str) -> Self {
        let namespace = namespace.trim_end_matches('/');
        Self {
            request: format!("{namespace}/request"),
            status: format!("{namespace}/status"),
        }
    }
}

impl Default for AnnotationKeys {
    fn default() -> Self {
        Self::new(DEFAULT_ANNOTATION_NAMESPACE)
    }
}

/// Escape a map key for use as a single JSON Pointer token (RFC 6901).
pub fn pointer_token(key: &str) -> String {
    key.replace('~', "~0").replace('/', "~1")
}
