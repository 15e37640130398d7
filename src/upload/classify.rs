/// Classification of a failed transmission
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Worth exactly one fallback transmission
    Retryable,
    Fatal,
}

/// Decides whether a server error body describes a transient processing
/// failure.
///
/// The processing server reports frame-blend failures only as text, so the
/// check is a substring match against configured signatures.
#[derive(Debug, Clone)]
pub struct FailureClassifier {
    signatures: Vec<String>,
}

impl FailureClassifier {
    pub fn new(signatures: Vec<String>) -> Self {
        Self { signatures }
    }

    pub fn classify(&self, error_body: &str) -> FailureClass {
        if self
            .signatures
            .iter()
            .any(|signature| !signature.is_empty() && error_body.contains(signature.as_str()))
        {
            FailureClass::Retryable
        } else {
            FailureClass::Fatal
        }
    }

    pub fn signatures(&self) -> &[String] {
        &self.signatures
    }
}
