//! Current-value table and single-field edits over a loaded image.

use crate::catalog::{Catalog, ParameterDefinition, Selector};
use crate::codec::{self, FieldValue, Value};
use crate::image::LoadedImage;
use crate::{EditorError, Result};

/// One parameter with its value in memory and on disk.
#[derive(Debug, Clone, Copy)]
pub struct Row<'a> {
    pub definition: &'a ParameterDefinition,
    pub value: FieldValue,
    pub committed: FieldValue,
}

impl Row<'_> {
    /// Whether the in-memory value differs from what was last saved.
    pub fn is_modified(&self) -> bool {
        self.value != self.committed
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EditOutcome {
    pub selector: Selector,
    pub previous: FieldValue,
    pub current: FieldValue,
}

#[derive(Debug, Default)]
pub struct ResetReport {
    pub reset: Vec<Selector>,
    /// Fields without a known stock value.
    pub skipped: Vec<Selector>,
    pub failed: Vec<(Selector, EditorError)>,
}

impl ResetReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

fn check_binding(image: &LoadedImage, catalog: &Catalog) -> Result<()> {
    if catalog.variant_tag() != image.variant().tag || catalog.variant_size() != image.len() {
        return Err(EditorError::Catalog(format!(
            "catalog for {} cannot be used with a {} image",
            catalog.variant_tag(),
            image.variant().tag
        )));
    }
    Ok(())
}

/// Every catalog parameter decoded against `image`, in catalog order.
///
/// The returned iterator is lazy and can be cloned to restart it.
pub fn snapshot<'i, 'c>(
    image: &'i LoadedImage,
    catalog: &'c Catalog,
) -> Result<impl Iterator<Item = Row<'c>> + Clone + use<'i, 'c>> {
    check_binding(image, catalog)?;
    let current = image.bytes();
    let committed = image.committed();
    Ok(catalog.iter().map(move |definition| {
        let range = definition.range();
        Row {
            definition,
            value: codec::decode(&current[range.clone()], definition.encoding),
            committed: codec::decode(&committed[range], definition.encoding),
        }
    }))
}

/// Rows with unsaved edits.
pub fn modified_rows<'a>(
    image: &'a LoadedImage,
    catalog: &'a Catalog,
) -> Result<impl Iterator<Item = Row<'a>> + Clone + 'a> {
    Ok(snapshot(image, catalog)?.filter(Row::is_modified))
}

/// Rows whose value in `image` differs from `baseline`, typically the
/// backup. `committed` carries the baseline value.
pub fn changed_since<'a>(
    image: &'a LoadedImage,
    baseline: &'a LoadedImage,
    catalog: &'a Catalog,
) -> Result<impl Iterator<Item = Row<'a>> + Clone + 'a> {
    let before = snapshot(baseline, catalog)?;
    Ok(snapshot(image, catalog)?
        .zip(before)
        .filter(|(row, base)| row.value != base.value)
        .map(|(row, base)| Row {
            committed: base.value,
            ..row
        }))
}

/// Parse `text` and write it into the field at `selector`.
pub fn apply_edit(
    image: &mut LoadedImage,
    catalog: &Catalog,
    selector: Selector,
    text: &str,
) -> Result<EditOutcome> {
    check_binding(image, catalog)?;
    let definition = catalog.resolve(selector)?;
    let value = text
        .parse::<Value>()
        .map_err(|e| EditorError::from_codec(&definition.name, e))?;
    write_value(image, definition, value)
}

/// Write an already-parsed value into the field at `selector`.
pub fn apply_value(
    image: &mut LoadedImage,
    catalog: &Catalog,
    selector: Selector,
    value: Value,
) -> Result<EditOutcome> {
    check_binding(image, catalog)?;
    let definition = catalog.resolve(selector)?;
    write_value(image, definition, value)
}

// Encoding happens before the image is touched, so a rejected value leaves
// every byte as it was.
fn write_value(
    image: &mut LoadedImage,
    definition: &ParameterDefinition,
    value: Value,
) -> Result<EditOutcome> {
    let previous = codec::decode(image.field(definition)?, definition.encoding);
    let bytes = codec::encode(value, definition.encoding)
        .map_err(|e| EditorError::from_codec(&definition.name, e))?;
    image.write_field(definition, &bytes)?;
    let current = codec::decode(&bytes, definition.encoding);

    tracing::debug!(
        parameter = %definition.name,
        selector = %definition.selector(),
        offset = definition.offset,
        %previous,
        %current,
        "applied edit"
    );
    Ok(EditOutcome {
        selector: definition.selector(),
        previous,
        current,
    })
}

/// Put every parameter with a known stock value back to it.
///
/// Each field goes through the same path as a user edit. A field that
/// fails is recorded and the rest are still reset.
pub fn reset_to_default(image: &mut LoadedImage, catalog: &Catalog) -> Result<ResetReport> {
    check_binding(image, catalog)?;
    let mut report = ResetReport::default();

    for definition in catalog.iter() {
        let selector = definition.selector();
        let Some(stock) = definition.stock else {
            report.skipped.push(selector);
            continue;
        };
        match apply_value(image, catalog, selector, stock) {
            Ok(_) => report.reset.push(selector),
            Err(err) => {
                tracing::warn!(parameter = %definition.name, error = %err, "could not reset parameter");
                report.failed.push((selector, err));
            }
        }
    }

    tracing::info!(
        reset = report.reset.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "reset to stock values"
    );
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::Category;
    use crate::codec::{FieldEncoding, Scale, Width};
    use crate::variant::{Variant, VariantRegistry};

    fn setup() -> (LoadedImage, Catalog) {
        let variant = Variant::new("test", 64, "Test address");
        let mut registry = VariantRegistry::new();
        registry.insert(variant.clone());

        let mut bytes = vec![0xAAu8; 64];
        bytes[0x10..0x12].copy_from_slice(&[0x78, 0x00]);
        bytes[0x20] = 0xFD;
        let image = LoadedImage::from_bytes(bytes, &registry).unwrap();

        let mut catalog = Catalog::new(&variant);
        catalog
            .add(
                ParameterDefinition::new("boost", Category::Engine, 0, 0x10, FieldEncoding::new(Width::Two, false))
                    .with_stock(Value::Integer(120)),
            )
            .unwrap();
        catalog
            .add(
                ParameterDefinition::new("toe", Category::Chassis, 0, 0x20, FieldEncoding::new(Width::One, true))
                    .with_stock(Value::Integer(-3)),
            )
            .unwrap();
        catalog
            .add(ParameterDefinition::new(
                "camber",
                Category::Chassis,
                1,
                0x22,
                FieldEncoding::new(Width::Two, true).scaled(Scale::new(10, 1).unwrap()),
            ))
            .unwrap();
        (image, catalog)
    }

    #[test]
    fn snapshot_decodes_in_catalog_order() {
        let (image, catalog) = setup();
        let rows: Vec<_> = snapshot(&image, &catalog).unwrap().collect();
        let names: Vec<_> = rows.iter().map(|r| r.definition.name.as_str()).collect();
        assert_eq!(names, ["boost", "toe", "camber"]);
        assert_eq!(rows[0].value.raw, 120);
        assert_eq!(rows[1].value.raw, -3);
        assert!(rows.iter().all(|r| !r.is_modified()));
    }

    #[test]
    fn snapshot_restarts_from_clone() {
        let (image, catalog) = setup();
        let rows = snapshot(&image, &catalog).unwrap();
        assert_eq!(rows.clone().count(), 3);
        assert_eq!(rows.count(), 3);
    }

    #[test]
    fn edit_touches_only_its_field() {
        let (mut image, catalog) = setup();
        let before = image.bytes().to_vec();
        let outcome = apply_edit(&mut image, &catalog, Selector::new(Category::Engine, 0), "150").unwrap();
        assert_eq!(outcome.previous.raw, 120);
        assert_eq!(outcome.current.raw, 150);

        for (i, (a, b)) in before.iter().zip(image.bytes()).enumerate() {
            if (0x10..0x12).contains(&i) {
                continue;
            }
            assert_eq!(a, b, "byte {i:#X} changed");
        }
        assert_eq!(&image.bytes()[0x10..0x12], &[0x96, 0x00]);

        let modified: Vec<_> = modified_rows(&image, &catalog).unwrap().collect();
        assert_eq!(modified.len(), 1);
        assert_eq!(modified[0].committed.raw, 120);
    }

    #[test]
    fn changed_since_compares_against_baseline() {
        let (mut image, catalog) = setup();
        let baseline = image.clone();
        apply_edit(&mut image, &catalog, Selector::new(Category::Chassis, 0), "4").unwrap();
        image.revert();
        assert_eq!(changed_since(&image, &baseline, &catalog).unwrap().count(), 0);

        apply_edit(&mut image, &catalog, Selector::new(Category::Chassis, 0), "4").unwrap();
        let changed: Vec<_> = changed_since(&image, &baseline, &catalog).unwrap().collect();
        assert_eq!(changed.len(), 1);
        assert_eq!(changed[0].definition.name, "toe");
        assert_eq!(changed[0].committed.raw, -3);
        assert_eq!(changed[0].value.raw, 4);
        assert!(changed[0].is_modified());
    }

    #[test]
    fn failed_edit_changes_nothing() {
        let (mut image, catalog) = setup();
        let before = image.bytes().to_vec();
        let toe = Selector::new(Category::Chassis, 0);

        let err = apply_edit(&mut image, &catalog, toe, "200").unwrap_err();
        assert!(matches!(err, EditorError::OutOfRange { ref parameter, .. } if parameter == "toe"));
        let err = apply_edit(&mut image, &catalog, toe, "soft").unwrap_err();
        assert!(matches!(err, EditorError::InvalidInput { .. }));
        let err = apply_edit(&mut image, &catalog, Selector::new(Category::Other, 0), "1").unwrap_err();
        assert!(matches!(err, EditorError::UnknownParameter(_)));

        assert_eq!(image.bytes(), before.as_slice());
        assert!(!image.is_modified());
    }

    #[test]
    fn scaled_edit_accepts_decimals() {
        let (mut image, catalog) = setup();
        let camber = Selector::new(Category::Chassis, 1);
        let outcome = apply_edit(&mut image, &catalog, camber, "-1.5").unwrap();
        assert_eq!(outcome.current.raw, -15);
        assert_eq!(outcome.current.to_string(), "-1.5");
    }

    #[test]
    fn reset_restores_stock_and_skips_unknown() {
        let (mut image, catalog) = setup();
        apply_edit(&mut image, &catalog, Selector::new(Category::Engine, 0), "999").unwrap();
        apply_edit(&mut image, &catalog, Selector::new(Category::Chassis, 0), "5").unwrap();

        let report = reset_to_default(&mut image, &catalog).unwrap();
        assert!(report.is_complete());
        assert_eq!(report.reset.len(), 2);
        assert_eq!(report.skipped, vec![Selector::new(Category::Chassis, 1)]);
        assert!(!image.is_modified());
    }

    #[test]
    fn reset_continues_past_a_bad_stock_value() {
        let (mut image, mut catalog) = setup();
        catalog
            .add(
                ParameterDefinition::new("bad", Category::Engine, 1, 0x30, FieldEncoding::new(Width::One, false))
                    .with_stock(Value::Integer(300)),
            )
            .unwrap();
        catalog
            .add(
                ParameterDefinition::new("late", Category::Other, 0, 0x31, FieldEncoding::new(Width::One, false))
                    .with_stock(Value::Integer(7)),
            )
            .unwrap();

        let report = reset_to_default(&mut image, &catalog).unwrap();
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, Selector::new(Category::Engine, 1));
        assert_eq!(image.bytes()[0x30], 0xAA);
        assert_eq!(image.bytes()[0x31], 7);
    }

    #[test]
    fn refuses_catalog_for_other_variant() {
        let (mut image, _) = setup();
        let other = Catalog::new(&Variant::new("other", 64, "Other address"));
        assert!(matches!(snapshot(&image, &other).err(), Some(EditorError::Catalog(_))));
        assert!(apply_edit(&mut image, &other, Selector::new(Category::Engine, 0), "1").is_err());
    }
}
