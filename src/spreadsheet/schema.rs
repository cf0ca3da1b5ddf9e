use super::layout::{ColumnGroup, ColumnLayout, GroupKind};
use super::workbook::Sheet;
use serde::Serialize;
use serde_json::{Map, Value};

/// Dropdown and checkbox options plus one flattened record per data row.
#[derive(Debug, Clone, Default, Serialize, PartialEq)]
pub struct UiSchema {
    pub dropdowns: Map<String, Value>,
    pub checkboxes: Map<String, Value>,
    pub records: Vec<Map<String, Value>>,
}

/// Whether an indicator cell selects its column.
pub fn is_marked(cell: &Value) -> bool {
    match cell {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => matches!(
            s.trim().to_ascii_lowercase().as_str(),
            "1" | "x" | "y" | "yes" | "true"
        ),
        _ => false,
    }
}

fn option_labels(sheet: &Sheet, group: &ColumnGroup) -> Vec<String> {
    group
        .columns()
        .filter_map(|column| sheet.option_label(column))
        .collect()
}

fn group_value(sheet: &Sheet, group: &ColumnGroup, row: &[Value], names: &[String]) -> Value {
    let mut marked = group
        .columns()
        .filter(|&column| row.get(column).map(is_marked).unwrap_or(false))
        .map(|column| {
            sheet
                .option_label(column)
                .or_else(|| names.get(column).cloned())
                .unwrap_or_else(|| format!("Column {}", column + 1))
        });

    match group.kind {
        GroupKind::Dropdown => marked.next().map(Value::String).unwrap_or(Value::Null),
        GroupKind::Checkbox => Value::Array(marked.map(Value::String).collect()),
    }
}

/// Reshape a worksheet into the UI schema described by `layout`.
pub fn build_ui_schema(sheet: &Sheet, layout: &ColumnLayout) -> UiSchema {
    let mut schema = UiSchema::default();

    for group in &layout.groups {
        let options = Value::from(option_labels(sheet, group));
        match group.kind {
            GroupKind::Dropdown => schema.dropdowns.insert(group.name.clone(), options),
            GroupKind::Checkbox => schema.checkboxes.insert(group.name.clone(), options),
        };
    }

    let reserved: Vec<&str> = layout.groups.iter().map(|g| g.name.as_str()).collect();
    let names = sheet.column_names(&reserved);
    let total = layout
        .groups
        .iter()
        .map(|g| g.end)
        .chain(std::iter::once(sheet.width()))
        .max()
        .unwrap_or(0);

    for row in sheet.rows() {
        let mut record = Map::new();
        for column in 0..total {
            match layout.group_for_column(column) {
                Some(group) if group.start == column => {
                    record.insert(group.name.clone(), group_value(sheet, group, row, &names));
                }
                Some(_) => {}
                None => {
                    if let Some(name) = names.get(column) {
                        let cell = row.get(column).cloned().unwrap_or(Value::Null);
                        record.insert(name.clone(), cell);
                    }
                }
            }
        }
        schema.records.push(record);
    }

    schema
}
