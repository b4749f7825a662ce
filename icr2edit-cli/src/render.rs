use comfy_table::modifiers::UTF8_ROUND_CORNERS;
use comfy_table::presets::UTF8_FULL_CONDENSED;
use comfy_table::{Attribute, Cell, CellAlignment, Color, ContentArrangement, Table};

use icr2edit_core::{Category, ImportReport, ResetReport, Row};

/// One table per category, rows in index order.
pub fn parameter_table<'a>(category: Category, rows: impl IntoIterator<Item = Row<'a>>) -> Table {
    let mut table = Table::new();
    table.set_header(vec![
        header_cell("#"),
        header_cell("Parameter"),
        header_cell("Type"),
        header_cell("Offset"),
        header_cell("Current"),
        header_cell("Stock"),
        header_cell("Comment"),
    ]);
    apply_table_style(&mut table);

    for row in rows
        .into_iter()
        .filter(|r| r.definition.category == category)
    {
        let def = row.definition;
        let current = if row.is_modified() {
            Cell::new(format!("{} (was {})", row.value, row.committed))
                .fg(Color::Yellow)
                .add_attribute(Attribute::Bold)
        } else {
            Cell::new(row.value)
        };
        let stock = match def.stock {
            Some(value) => Cell::new(value),
            None => Cell::new("-").add_attribute(Attribute::Dim),
        };
        table.add_row(vec![
            Cell::new(def.index),
            Cell::new(&def.name),
            Cell::new(def.encoding.type_name()),
            Cell::new(format!("{:#X}", def.offset)),
            current,
            stock,
            Cell::new(def.comment.as_deref().unwrap_or("")),
        ]);
    }
    for index in [0, 3, 4, 5] {
        if let Some(column) = table.column_mut(index) {
            column.set_cell_alignment(CellAlignment::Right);
        }
    }
    table
}

pub fn print_reset(report: &ResetReport) {
    println!(
        "Reset {} parameter(s), {} without a stock value.",
        report.reset.len(),
        report.skipped.len()
    );
    for (selector, err) in &report.failed {
        eprintln!("  {selector}: {err}");
    }
}

pub fn print_import(report: &ImportReport) {
    println!("Applied {} value(s).", report.applied.len());
    for label in &report.unmatched {
        println!("  not in this catalog: {label}");
    }
    for (label, err) in &report.failed {
        eprintln!("  {label}: {err}");
    }
}

fn apply_table_style(table: &mut Table) {
    table
        .load_preset(UTF8_FULL_CONDENSED)
        .apply_modifier(UTF8_ROUND_CORNERS)
        .set_content_arrangement(ContentArrangement::Dynamic);
}

fn header_cell(label: &str) -> Cell {
    Cell::new(label)
        .fg(Color::Cyan)
        .add_attribute(Attribute::Bold)
}
