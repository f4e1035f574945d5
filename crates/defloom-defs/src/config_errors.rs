use std::fmt;

/// One problem a def found with its own data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigIssue {
    pub def_id: String,
    pub field: Option<String>,
    pub message: String,
}

impl fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.field {
            Some(field) => write!(f, "[{}] Field:<{field}> {}", self.def_id, self.message),
            None => write!(f, "[{}] {}", self.def_id, self.message),
        }
    }
}

/// Errors and warnings collected from [`crate::Def::config_errors`].
/// Entries are attributed to the def currently being checked.
#[derive(Debug, Default, Clone)]
pub struct ConfigErrors {
    current: String,
    errors: Vec<ConfigIssue>,
    warnings: Vec<ConfigIssue>,
}

impl ConfigErrors {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_current(&mut self, def_id: impl Into<String>) {
        self.current = def_id.into();
    }

    pub fn error(&mut self, message: impl Into<String>) {
        let issue = self.issue(None, message.into());
        self.errors.push(issue);
    }

    pub fn field_error(&mut self, field: &str, message: impl Into<String>) {
        let issue = self.issue(Some(field), message.into());
        self.errors.push(issue);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        let issue = self.issue(None, message.into());
        self.warnings.push(issue);
    }

    pub fn field_warn(&mut self, field: &str, message: impl Into<String>) {
        let issue = self.issue(Some(field), message.into());
        self.warnings.push(issue);
    }

    pub fn errors(&self) -> &[ConfigIssue] {
        &self.errors
    }

    pub fn warnings(&self) -> &[ConfigIssue] {
        &self.warnings
    }

    pub fn is_empty(&self) -> bool {
        self.errors.is_empty() && self.warnings.is_empty()
    }

    fn issue(&self, field: Option<&str>, message: String) -> ConfigIssue {
        ConfigIssue {
            def_id: self.current.clone(),
            field: field.map(str::to_owned),
            message,
        }
    }
}
