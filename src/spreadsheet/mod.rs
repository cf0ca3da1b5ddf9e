//! Spreadsheet parsing and reshaping into dropdown / checkbox / record JSON.

pub mod layout;
pub mod schema;
pub mod workbook;

pub use self::layout::{ColumnGroup, ColumnLayout, GroupKind};
pub use self::schema::{build_ui_schema, UiSchema};
pub use self::workbook::Sheet;
