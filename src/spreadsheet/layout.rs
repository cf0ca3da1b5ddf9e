use crate::error::ServiceError;
use serde::{Deserialize, Serialize};
use std::ops::Range;

pub const DEFAULT_LAYOUT_VERSION: &str = "eoed-master-v6";

/// How a group of columns is presented in the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupKind {
    /// Single select: a row marks at most one column of the group.
    Dropdown,
    /// Multi select: a row may mark any number of columns.
    Checkbox,
}

/// A named, contiguous range of zero-based spreadsheet columns.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnGroup {
    pub name: String,
    pub kind: GroupKind,
    pub start: usize,
    /// Exclusive.
    pub end: usize,
}

impl ColumnGroup {
    pub fn new(name: &str, kind: GroupKind, start: usize, end: usize) -> Self {
        Self {
            name: name.to_string(),
            kind,
            start,
            end,
        }
    }

    pub fn columns(&self) -> Range<usize> {
        self.start..self.end
    }

    pub fn contains(&self, column: usize) -> bool {
        self.columns().contains(&column)
    }
}

fn default_header_rows() -> usize {
    2
}

/// Versioned description of where each option group lives in the workbook.
///
/// The workbook layout changes between revisions, so the offsets are data
/// rather than code. A layout is only usable once [`ColumnLayout::validate`]
/// has accepted it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnLayout {
    pub version: String,
    #[serde(default = "default_header_rows")]
    pub header_rows: usize,
    /// Worksheet to read; the first sheet when absent.
    #[serde(default)]
    pub sheet: Option<String>,
    pub groups: Vec<ColumnGroup>,
}

impl Default for ColumnLayout {
    fn default() -> Self {
        use GroupKind::{Checkbox, Dropdown};

        Self {
            version: DEFAULT_LAYOUT_VERSION.to_string(),
            header_rows: default_header_rows(),
            sheet: None,
            groups: vec![
                ColumnGroup::new("Category", Checkbox, 4, 12),
                ColumnGroup::new("Life Cycle", Dropdown, 12, 16),
                ColumnGroup::new("Size", Dropdown, 16, 23),
                ColumnGroup::new("Grow Operations", Checkbox, 25, 32),
                ColumnGroup::new("Construct New", Checkbox, 34, 37),
                ColumnGroup::new("Construct Existing", Checkbox, 38, 41),
            ],
        }
    }
}

impl ColumnLayout {
    /// Parse and validate a layout from its JSON form.
    pub fn from_json(raw: &str) -> Result<Self, ServiceError> {
        let layout: ColumnLayout = serde_json::from_str(raw)?;
        layout.validate()?;
        Ok(layout)
    }

    pub fn validate(&self) -> Result<(), ServiceError> {
        if self.header_rows == 0 {
            return Err(ServiceError::InvalidLayout(
                "header_rows must be at least 1".to_string(),
            ));
        }
        if self.groups.is_empty() {
            return Err(ServiceError::InvalidLayout(
                "layout has no column groups".to_string(),
            ));
        }

        for (idx, group) in self.groups.iter().enumerate() {
            if group.name.trim().is_empty() {
                return Err(ServiceError::InvalidLayout(format!(
                    "group {} has an empty name",
                    idx
                )));
            }
            if group.start >= group.end {
                return Err(ServiceError::InvalidLayout(format!(
                    "group '{}' has an empty column range {}..{}",
                    group.name, group.start, group.end
                )));
            }

            for other in &self.groups[..idx] {
                if other.name == group.name {
                    return Err(ServiceError::InvalidLayout(format!(
                        "group '{}' is defined twice",
                        group.name
                    )));
                }
                if group.start < other.end && other.start < group.end {
                    return Err(ServiceError::InvalidLayout(format!(
                        "group '{}' ({}..{}) overlaps group '{}' ({}..{})",
                        group.name, group.start, group.end, other.name, other.start, other.end
                    )));
                }
            }
        }

        Ok(())
    }

    pub fn group_for_column(&self, column: usize) -> Option<&ColumnGroup> {
        self.groups.iter().find(|g| g.contains(column))
    }

    pub fn group(&self, name: &str) -> Option<&ColumnGroup> {
        self.groups.iter().find(|g| g.name == name)
    }
}
