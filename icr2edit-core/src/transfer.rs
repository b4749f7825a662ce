//! Moving parameter values between images through CSV files.
//!
//! Values are keyed by category and name, not by offset, so a sheet
//! exported from one build can be applied to another.

use serde::{Deserialize, Serialize};
use std::io::{Read, Write};

use crate::catalog::{Catalog, Category, Selector};
use crate::codec::Value;
use crate::image::LoadedImage;
use crate::table::{apply_value, snapshot};
use crate::{EditorError, Result};

#[derive(Debug, Serialize, Deserialize)]
struct ValueRecord {
    #[serde(rename = "Category")]
    category: String,
    #[serde(rename = "Name")]
    name: String,
    #[serde(rename = "Length", default)]
    length: Option<usize>,
    #[serde(rename = "Value")]
    value: String,
}

#[derive(Debug, Default)]
pub struct ImportReport {
    pub applied: Vec<Selector>,
    /// Rows naming a parameter this build's catalog does not have.
    pub unmatched: Vec<String>,
    pub failed: Vec<(String, EditorError)>,
}

/// Write the current values of `selectors` as CSV. Returns the number of
/// rows written.
pub fn export_values<W: Write>(
    image: &LoadedImage,
    catalog: &Catalog,
    selectors: &[Selector],
    writer: W,
) -> Result<usize> {
    for selector in selectors {
        catalog.resolve(*selector)?;
    }

    let mut out = csv::Writer::from_writer(writer);
    let mut written = 0;
    for row in snapshot(image, catalog)?.filter(|r| selectors.contains(&r.definition.selector())) {
        out.serialize(ValueRecord {
            category: row.definition.category.to_string(),
            name: row.definition.name.clone(),
            length: Some(row.definition.width()),
            value: row.value.to_string(),
        })?;
        written += 1;
    }
    out.flush()
        .map_err(|e| EditorError::io("write", "exported values", e))?;

    tracing::info!(rows = written, "exported parameter values");
    Ok(written)
}

/// Apply a value sheet to `image` in memory. Each row is applied on its
/// own; a bad row is reported and the others still go through.
pub fn import_values<R: Read>(
    image: &mut LoadedImage,
    catalog: &Catalog,
    reader: R,
) -> Result<ImportReport> {
    let mut report = ImportReport::default();
    let mut rows = csv::ReaderBuilder::new().trim(csv::Trim::All).from_reader(reader);

    for record in rows.deserialize::<ValueRecord>() {
        let record = record?;
        let category = Category::from_label(&record.category);
        let label = format!("{category}/{}", record.name);

        let Some(definition) = catalog.find(category, &record.name) else {
            report.unmatched.push(label);
            continue;
        };

        if let Some(length) = record.length {
            if length != definition.width() {
                report.failed.push((
                    label,
                    EditorError::InvalidInput {
                        parameter: definition.name.clone(),
                        reason: format!("{} bytes here but {length} in the sheet", definition.width()),
                    },
                ));
                continue;
            }
        }

        let selector = definition.selector();
        let result = record
            .value
            .parse::<Value>()
            .map_err(|e| EditorError::from_codec(&definition.name, e))
            .and_then(|value| apply_value(image, catalog, selector, value));
        match result {
            Ok(_) => report.applied.push(selector),
            Err(err) => {
                tracing::warn!(parameter = %label, error = %err, "skipped imported value");
                report.failed.push((label, err));
            }
        }
    }

    tracing::info!(
        applied = report.applied.len(),
        unmatched = report.unmatched.len(),
        failed = report.failed.len(),
        "imported parameter values"
    );
    Ok(report)
}
