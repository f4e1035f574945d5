//! Non-fatal problems found while building and resolving.
//!
//! Every entry is also emitted through `tracing` as it is recorded, so a
//! host that only installs a subscriber still sees them.

use std::fmt;

use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Severity {
    Warning,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiagnosticKind {
    /// A child node named no field of its composite.
    UnmatchedField,
    /// A composite node had no children or text.
    EmptyComposite,
    /// List-shaped content where no list was expected, or the reverse.
    ListShape,
    /// A converter could not parse a value.
    ValueParse,
    /// A `Class` or type-name value did not resolve, or was not assignable.
    TypeResolution,
    /// A node failed to build and was skipped.
    NodeFailed,
    /// A reference-capable object produced no ID.
    NullReferenceId,
    /// Two objects registered the same reference ID.
    DuplicateReferenceId,
    /// A reference named an ID that is not in the map.
    MissingReference,
    /// A referenced object cannot fill the requesting slot.
    ReferenceTypeMismatch,
    /// A reference could not be honoured where it appeared.
    UnsupportedReference,
}

impl DiagnosticKind {
    pub fn severity(self) -> Severity {
        match self {
            DiagnosticKind::ValueParse
            | DiagnosticKind::TypeResolution
            | DiagnosticKind::NodeFailed
            | DiagnosticKind::MissingReference
            | DiagnosticKind::ReferenceTypeMismatch => Severity::Error,
            _ => Severity::Warning,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Diagnostic {
    pub kind: DiagnosticKind,
    pub severity: Severity,
    /// Slash-separated path of the node, when one applies.
    pub node: Option<String>,
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let level = match self.severity {
            Severity::Warning => "warning",
            Severity::Error => "error",
        };
        match &self.node {
            Some(node) => write!(f, "[{level}] {node}: {}", self.message),
            None => write!(f, "[{level}] {}", self.message),
        }
    }
}

#[derive(Debug, Default, Clone)]
pub struct Diagnostics {
    entries: Vec<Diagnostic>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a diagnostic at the kind's default severity.
    pub fn report(&mut self, kind: DiagnosticKind, node: Option<&str>, message: impl Into<String>) {
        self.push(Diagnostic {
            kind,
            severity: kind.severity(),
            node: node.map(str::to_owned),
            message: message.into(),
        });
    }

    pub fn push(&mut self, diagnostic: Diagnostic) {
        let node = diagnostic.node.as_deref().unwrap_or("");
        match diagnostic.severity {
            Severity::Warning => {
                warn!(kind = ?diagnostic.kind, node, "{}", diagnostic.message)
            }
            Severity::Error => {
                error!(kind = ?diagnostic.kind, node, "{}", diagnostic.message)
            }
        }
        self.entries.push(diagnostic);
    }

    pub fn iter(&self) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter()
    }

    pub fn of_kind(&self, kind: DiagnosticKind) -> impl Iterator<Item = &Diagnostic> {
        self.entries.iter().filter(move |d| d.kind == kind)
    }

    pub fn count(&self, kind: DiagnosticKind) -> usize {
        self.of_kind(kind).count()
    }

    pub fn has_errors(&self) -> bool {
        self.entries.iter().any(|d| d.severity == Severity::Error)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn extend(&mut self, other: Diagnostics) {
        self.entries.extend(other.entries);
    }

    pub fn into_vec(self) -> Vec<Diagnostic> {
        self.entries
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn report_uses_kind_severity() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.report(DiagnosticKind::UnmatchedField, Some("Defs/Gear/Colour"), "no field");
        assert!(!diagnostics.has_errors());
        diagnostics.report(DiagnosticKind::MissingReference, None, "no 'Iron'");
        assert!(diagnostics.has_errors());
        assert_eq!(diagnostics.count(DiagnosticKind::UnmatchedField), 1);
        assert_eq!(diagnostics.len(), 2);
    }

    #[test]
    fn display_includes_node_path() {
        let mut diagnostics = Diagnostics::new();
        diagnostics.report(DiagnosticKind::ValueParse, Some("Defs/Gear/Teeth"), "bad int");
        let rendered = diagnostics.iter().next().unwrap().to_string();
        assert_eq!(rendered, "[error] Defs/Gear/Teeth: bad int");
    }
}
