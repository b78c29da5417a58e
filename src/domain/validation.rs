// Validation results reported for dashboard configurations
use serde::{Deserialize, Serialize};

use super::layout::OverlapSeverity;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ValidationCode {
    InvalidGrid,
    InvalidBreakpoint,
    MissingPanelId,
    DuplicatePanelId,
    DuplicateVariable,
    MissingVariableName,
    InvalidPosition,
    InvalidDimensions,
    PanelOutOfBounds,
    PanelOverlap,
    MissingDatasource,
    EmptyQuery,
}

impl ValidationCode {
    /// Structural problems that make a dashboard impossible to evaluate at all.
    /// The rest only affect the panel they were raised for.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            ValidationCode::InvalidGrid
                | ValidationCode::InvalidBreakpoint
                | ValidationCode::MissingPanelId
                | ValidationCode::DuplicatePanelId
                | ValidationCode::DuplicateVariable
                | ValidationCode::MissingVariableName
                | ValidationCode::InvalidPosition
                | ValidationCode::InvalidDimensions
                | ValidationCode::PanelOutOfBounds
        )
    }
}

impl std::fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ValidationCode::InvalidGrid => "INVALID_GRID",
            ValidationCode::InvalidBreakpoint => "INVALID_BREAKPOINT",
            ValidationCode::MissingPanelId => "MISSING_PANEL_ID",
            ValidationCode::DuplicatePanelId => "DUPLICATE_PANEL_ID",
            ValidationCode::DuplicateVariable => "DUPLICATE_VARIABLE",
            ValidationCode::MissingVariableName => "MISSING_VARIABLE_NAME",
            ValidationCode::InvalidPosition => "INVALID_POSITION",
            ValidationCode::InvalidDimensions => "INVALID_DIMENSIONS",
            ValidationCode::PanelOutOfBounds => "PANEL_OUT_OF_BOUNDS",
            ValidationCode::PanelOverlap => "PANEL_OVERLAP",
            ValidationCode::MissingDatasource => "MISSING_DATASOURCE",
            ValidationCode::EmptyQuery => "EMPTY_QUERY",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ValidationError {
    pub field: String,
    pub message: String,
    pub code: ValidationCode,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub panel_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub severity: Option<OverlapSeverity>,
}

impl ValidationError {
    pub fn new(code: ValidationCode, field: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            message: message.into(),
            code,
            panel_id: None,
            severity: None,
        }
    }

    pub fn for_panel(mut self, panel_id: impl Into<String>) -> Self {
        self.panel_id = Some(panel_id.into());
        self
    }
}

impl std::fmt::Display for ValidationError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}: {}", self.code, self.field, self.message)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ValidationResult {
    pub valid: bool,
    pub errors: Vec<ValidationError>,
}

impl ValidationResult {
    pub fn from_errors(errors: Vec<ValidationError>) -> Self {
        Self {
            valid: errors.is_empty(),
            errors,
        }
    }

    pub fn merge(mut self, other: ValidationResult) -> Self {
        self.errors.extend(other.errors);
        self.valid = self.errors.is_empty();
        self
    }

    pub fn has_code(&self, code: ValidationCode) -> bool {
        self.errors.iter().any(|e| e.code == code)
    }

    pub fn structural_errors(&self) -> Vec<ValidationError> {
        self.errors
            .iter()
            .filter(|e| e.code.is_structural())
            .cloned()
            .collect()
    }
}
