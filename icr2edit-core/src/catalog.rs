//! Parameter catalog bound to a single executable variant.
//!
//! The catalog source is a CSV sheet with one address column per variant.
//! Rows are validated once, here, into typed [`ParameterDefinition`]s so the
//! codec never has to guess at widths or signedness.

use csv::ReaderBuilder;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::io::Read;
use std::ops::Range;
use std::path::PathBuf;
use std::str::FromStr;

use crate::codec::{to_raw, FieldEncoding, Scale, Value, Width};
use crate::variant::Variant;
use crate::{EditorError, Result};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Category {
    Engine,
    Chassis,
    Other,
}

impl Category {
    pub const ALL: [Category; 3] = [Category::Engine, Category::Chassis, Category::Other];

    /// Map a free-form catalog label onto a category. Unknown labels land
    /// in `Other`.
    pub fn from_label(label: &str) -> Category {
        label.parse().unwrap_or(Category::Other)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Category::Engine => "engine",
            Category::Chassis => "chassis",
            Category::Other => "other",
        }
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Category {
    type Err = EditorError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "engine" => Ok(Category::Engine),
            "chassis" => Ok(Category::Chassis),
            "other" => Ok(Category::Other),
            _ => Err(EditorError::UnknownParameter(format!("no category named '{s}'"))),
        }
    }
}

/// Addresses one parameter: its category and position in that category.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Selector {
    pub category: Category,
    pub index: usize,
}

impl Selector {
    pub fn new(category: Category, index: usize) -> Self {
        Self { category, index }
    }
}

impl fmt::Display for Selector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.category, self.index)
    }
}

impl FromStr for Selector {
    type Err = EditorError;

    /// `engine.3` or `engine:3`.
    fn from_str(s: &str) -> Result<Self> {
        let (cat, idx) = s
            .split_once(['.', ':'])
            .ok_or_else(|| EditorError::UnknownParameter(format!("bad selector '{s}'")))?;
        let index = idx
            .trim()
            .parse::<usize>()
            .map_err(|_| EditorError::UnknownParameter(format!("bad selector '{s}'")))?;
        Ok(Selector::new(cat.parse()?, index))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ParameterDefinition {
    pub name: String,
    pub description: String,
    pub category: Category,
    pub index: usize,
    pub offset: usize,
    pub encoding: FieldEncoding,
    /// Value in the unmodified executable, when known.
    pub stock: Option<Value>,
    pub comment: Option<String>,
}

impl ParameterDefinition {
    pub fn new(
        name: &str,
        category: Category,
        index: usize,
        offset: usize,
        encoding: FieldEncoding,
    ) -> Self {
        Self {
            name: name.to_string(),
            description: String::new(),
            category,
            index,
            offset,
            encoding,
            stock: None,
            comment: None,
        }
    }

    pub fn with_stock(mut self, stock: Value) -> Self {
        self.stock = Some(stock);
        self
    }

    pub fn selector(&self) -> Selector {
        Selector::new(self.category, self.index)
    }

    pub fn width(&self) -> usize {
        self.encoding.width.bytes()
    }

    /// Byte range occupied in the image.
    pub fn range(&self) -> Range<usize> {
        self.offset..self.offset + self.width()
    }
}

pub enum CatalogSource {
    File(PathBuf),
    Text(String),
}

#[derive(Debug, Clone)]
pub struct Catalog {
    variant_tag: String,
    variant_size: usize,
    entries: BTreeMap<Category, BTreeMap<usize, ParameterDefinition>>,
}

impl Catalog {
    /// Empty catalog for `variant`.
    pub fn new(variant: &Variant) -> Self {
        Self {
            variant_tag: variant.tag.clone(),
            variant_size: variant.size,
            entries: BTreeMap::new(),
        }
    }

    /// Read a catalog sheet and keep the rows that carry an address for
    /// `variant`.
    pub fn load(source: &CatalogSource, variant: &Variant) -> Result<Self> {
        match source {
            CatalogSource::File(path) => {
                let file = std::fs::File::open(path)
                    .map_err(|e| EditorError::io("open catalog", path, e))?;
                Self::from_reader(file, variant)
            }
            CatalogSource::Text(text) => Self::from_reader(text.as_bytes(), variant),
        }
    }

    pub fn from_reader<R: Read>(reader: R, variant: &Variant) -> Result<Self> {
        let mut reader = ReaderBuilder::new()
            .has_headers(true)
            .flexible(true)
            .from_reader(reader);

        let headers: Vec<String> = reader
            .headers()?
            .iter()
            .map(|h| h.trim_matches('\u{feff}').trim().to_string())
            .collect();

        let mut catalog = Self::new(variant);
        let mut next_index: HashMap<Category, usize> = HashMap::new();
        let mut skipped = 0usize;

        for record in reader.records() {
            let record = record?;
            let line = record.position().map_or(0, |p| p.line());
            let row: HashMap<&str, &str> = headers
                .iter()
                .map(String::as_str)
                .zip(record.iter().map(str::trim))
                .collect();
            let field = |key: &str| row.get(key).copied().unwrap_or("");

            let label = field("Category");
            if label.is_empty() {
                continue;
            }
            let Some(offset) = parse_address(field(variant.address_column.as_str())) else {
                skipped += 1;
                continue;
            };

            let category = Category::from_label(label);
            let index = *next_index.entry(category).or_insert(0);
            let definition = definition_from_row(&field, line, category, index, offset)?;
            catalog.add(definition)?;
            next_index.insert(category, index + 1);
        }

        tracing::info!(
            variant = %variant.tag,
            parameters = catalog.len(),
            skipped,
            "loaded parameter catalog"
        );
        Ok(catalog)
    }

    pub fn variant_tag(&self) -> &str {
        &self.variant_tag
    }

    pub fn variant_size(&self) -> usize {
        self.variant_size
    }

    /// Insert a definition. Its range must fit the variant's image and its
    /// (category, index) must be free.
    pub fn add(&mut self, definition: ParameterDefinition) -> Result<()> {
        let end = definition.offset.checked_add(definition.width());
        if end.map_or(true, |end| end > self.variant_size) {
            return Err(EditorError::OffsetOutOfBounds {
                name: definition.name,
                variant: self.variant_tag.clone(),
                offset: definition.offset,
                width: definition.encoding.width.bytes(),
                size: self.variant_size,
            });
        }

        let slot = self.entries.entry(definition.category).or_default();
        if slot.contains_key(&definition.index) {
            return Err(EditorError::DuplicateDefinition {
                category: definition.category,
                index: definition.index,
                name: definition.name,
            });
        }
        slot.insert(definition.index, definition);
        Ok(())
    }

    /// Remove the first definition called `name`. Other indices are left
    /// as they were, so existing selectors stay valid.
    pub fn remove(&mut self, name: &str) -> Result<ParameterDefinition> {
        let selector = self
            .iter()
            .find(|d| d.name == name)
            .map(ParameterDefinition::selector)
            .ok_or_else(|| EditorError::UnknownParameter(name.to_string()))?;

        let slot = self
            .entries
            .get_mut(&selector.category)
            .ok_or_else(|| EditorError::UnknownParameter(name.to_string()))?;
        let removed = slot
            .remove(&selector.index)
            .ok_or_else(|| EditorError::UnknownParameter(name.to_string()))?;
        if slot.is_empty() {
            self.entries.remove(&selector.category);
        }
        Ok(removed)
    }

    pub fn get(&self, selector: Selector) -> Option<&ParameterDefinition> {
        self.entries
            .get(&selector.category)
            .and_then(|slot| slot.get(&selector.index))
    }

    pub fn resolve(&self, selector: Selector) -> Result<&ParameterDefinition> {
        self.get(selector).ok_or_else(|| {
            EditorError::UnknownParameter(format!("{selector} in {}", self.variant_tag))
        })
    }

    pub fn find(&self, category: Category, name: &str) -> Option<&ParameterDefinition> {
        self.category(category).find(|d| d.name == name)
    }

    /// All definitions, category by category, in index order.
    pub fn iter(&self) -> impl Iterator<Item = &ParameterDefinition> + Clone {
        self.entries.values().flat_map(|slot| slot.values())
    }

    pub fn category(&self, category: Category) -> impl Iterator<Item = &ParameterDefinition> + Clone {
        self.entries
            .get(&category)
            .into_iter()
            .flat_map(|slot| slot.values())
    }

    /// Categories that hold at least one definition.
    pub fn categories(&self) -> Vec<Category> {
        self.entries.keys().copied().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_address(text: &str) -> Option<usize> {
    let hex = text
        .strip_prefix("0x")
        .or_else(|| text.strip_prefix("0X"))
        .unwrap_or(text);
    if hex.is_empty() || !hex.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    usize::from_str_radix(hex, 16).ok()
}

fn parse_data_type(text: &str) -> Option<(Width, bool)> {
    match text.to_ascii_lowercase().as_str() {
        "uint8" => Some((Width::One, false)),
        "uint16" => Some((Width::Two, false)),
        "uint32" => Some((Width::Four, false)),
        "int8" => Some((Width::One, true)),
        "int16" => Some((Width::Two, true)),
        "int32" => Some((Width::Four, true)),
        _ => None,
    }
}

fn parse_flag(text: &str) -> Option<bool> {
    match text.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "y" => Some(true),
        "0" | "false" | "no" | "n" => Some(false),
        _ => None,
    }
}

fn definition_from_row<'a, F>(
    field: &F,
    line: u64,
    category: Category,
    index: usize,
    offset: usize,
) -> Result<ParameterDefinition>
where
    F: Fn(&str) -> &'a str,
{
    let bad = |msg: String| EditorError::Catalog(format!("line {line}: {msg}"));

    let description = field("Description");
    let name = match field("Name") {
        "" => description,
        name => name,
    };
    if name.is_empty() {
        return Err(bad("parameter has no name".to_string()));
    }

    let data_type = match field("Data type") {
        "" => None,
        text => Some(parse_data_type(text).ok_or_else(|| bad(format!("unknown data type '{text}'")))?),
    };

    let width = match field("Length") {
        "" => data_type.map_or(Width::Four, |(w, _)| w),
        text => {
            let bytes = text
                .parse::<u32>()
                .map_err(|_| bad(format!("length '{text}' is not a number")))?;
            Width::from_bytes(bytes).ok_or_else(|| EditorError::UnsupportedWidth {
                name: name.to_string(),
                width: bytes,
            })?
        }
    };
    if let Some((declared, _)) = data_type {
        if declared != width {
            return Err(bad(format!(
                "'{name}' has length {width} but data type {}",
                field("Data type")
            )));
        }
    }

    let signed = match field("Signed") {
        "" => data_type.map_or(false, |(_, s)| s),
        text => parse_flag(text).ok_or_else(|| bad(format!("signed flag '{text}' is not a boolean")))?,
    };
    if let Some((_, declared)) = data_type {
        if declared != signed {
            return Err(bad(format!(
                "'{name}' has signed flag '{}' but data type {}",
                field("Signed"),
                field("Data type")
            )));
        }
    }

    let scale = field("Scale")
        .parse::<Scale>()
        .map_err(|e| bad(e.to_string()))?;

    let stock = match field("Default value") {
        "" => None,
        text => match text.parse::<Value>() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(line, parameter = name, default = text, "ignoring non-numeric default");
                None
            }
        },
    };

    let encoding = FieldEncoding::new(width, signed).scaled(scale);
    if let Some(value) = stock {
        if let Err(e) = to_raw(value, encoding) {
            tracing::warn!(line, parameter = name, default = %value, error = %e, "default does not fit the field");
        }
    }

    let comment = match field("Comments") {
        "" => None,
        text => Some(text.to_string()),
    };

    Ok(ParameterDefinition {
        name: name.to_string(),
        description: description.to_string(),
        category,
        index,
        offset,
        encoding,
        stock,
        comment,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    const SHEET: &str = "\
Category,Name,Description,Length,Data type,Default value,Comments,DOS address,Windy address
Engine,turbo_boost,Turbo boost,2,UInt16,120,Boost pressure,800,1000
Engine,rev_limit,Rev limiter,4,UInt32,12000,,804,
Chassis,ride_height,Ride height,1,Int8,-3,,810,1010
Aero,wing_angle,Rear wing,2,UInt16,7,,812,1012
,ignored,Blank category,2,UInt16,1,,900,900
";

    fn windy() -> Variant {
        Variant::new("windy101", 0x2000, "Windy address")
    }

    fn dos() -> Variant {
        Variant::new("dos100", 0x2000, "DOS address")
    }

    fn load(sheet: &str, variant: &Variant) -> Result<Catalog> {
        Catalog::load(&CatalogSource::Text(sheet.to_string()), variant)
    }

    #[test]
    fn loads_rows_for_variant_column() {
        let catalog = load(SHEET, &windy()).unwrap();
        assert_eq!(catalog.len(), 3);

        let boost = catalog.get(Selector::new(Category::Engine, 0)).unwrap();
        assert_eq!(boost.name, "turbo_boost");
        assert_eq!(boost.offset, 0x1000);
        assert_eq!(boost.encoding, FieldEncoding::new(Width::Two, false));
        assert_eq!(boost.stock, Some(Value::Integer(120)));
        assert_eq!(boost.comment.as_deref(), Some("Boost pressure"));

        // rev_limit has no windy address.
        assert!(catalog.get(Selector::new(Category::Engine, 1)).is_none());

        let height = catalog.get(Selector::new(Category::Chassis, 0)).unwrap();
        assert!(height.encoding.signed);

        let wing = catalog.find(Category::Other, "wing_angle").unwrap();
        assert_eq!(wing.index, 0);
    }

    #[test]
    fn variants_get_independent_offsets() {
        let windy = load(SHEET, &windy()).unwrap();
        let dos = load(SHEET, &dos()).unwrap();
        assert_eq!(windy.find(Category::Engine, "turbo_boost").unwrap().offset, 0x1000);
        assert_eq!(dos.find(Category::Engine, "turbo_boost").unwrap().offset, 0x800);
        assert_eq!(dos.category(Category::Engine).count(), 2);
    }

    #[test]
    fn rejects_unsupported_width() {
        let sheet = "Category,Name,Length,Windy address\nEngine,odd,3,100\n";
        assert!(matches!(
            load(sheet, &windy()),
            Err(EditorError::UnsupportedWidth { width: 3, .. })
        ));
    }

    #[test]
    fn rejects_offset_past_image() {
        let sheet = "Category,Name,Length,Windy address\nEngine,edge,4,1FFE\n";
        assert!(matches!(
            load(sheet, &windy()),
            Err(EditorError::OffsetOutOfBounds { offset: 0x1FFE, .. })
        ));
        let sheet = "Category,Name,Length,Windy address\nEngine,edge,2,1FFE\n";
        assert!(load(sheet, &windy()).is_ok());
    }

    #[test]
    fn rejects_mismatched_type_and_length() {
        let sheet = "Category,Name,Length,Data type,Windy address\nEngine,x,2,UInt32,10\n";
        assert!(matches!(load(sheet, &windy()), Err(EditorError::Catalog(_))));
    }

    #[test]
    fn rejects_signed_flag_against_type() {
        let sheet = "Category,Name,Data type,Signed,Windy address\nEngine,x,UInt16,yes,10\n";
        assert!(matches!(load(sheet, &windy()), Err(EditorError::Catalog(_))));
        let sheet = "Category,Name,Data type,Signed,Windy address\nEngine,x,Int16,yes,10\n";
        assert!(load(sheet, &windy()).unwrap().find(Category::Engine, "x").unwrap().encoding.signed);
    }

    #[test]
    fn keeps_impossible_default_for_reset_to_report() {
        let sheet = "Category,Name,Data type,Default value,Windy address\nEngine,x,UInt8,300,10\n";
        let catalog = load(sheet, &windy()).unwrap();
        assert_eq!(catalog.find(Category::Engine, "x").unwrap().stock, Some(Value::Integer(300)));
    }

    #[test]
    fn signed_addresses_are_skipped() {
        let sheet = "Category,Name,Length,Windy address\nEngine,plus,2,+1000\nEngine,minus,2,-10\nEngine,hex,2,0x20\n";
        let catalog = load(sheet, &windy()).unwrap();
        assert_eq!(catalog.len(), 1);
        assert_eq!(catalog.find(Category::Engine, "hex").unwrap().offset, 0x20);
    }

    #[test]
    fn length_defaults_to_four_bytes() {
        let sheet = "Category,Description,Windy address\nEngine,Fuel flow,20\n";
        let catalog = load(sheet, &windy()).unwrap();
        let def = catalog.find(Category::Engine, "Fuel flow").unwrap();
        assert_eq!(def.encoding.width, Width::Four);
    }

    #[test]
    fn reads_scale_column() {
        let sheet = "Category,Name,Length,Signed,Scale,Windy address\nChassis,camber,2,yes,10,40\n";
        let catalog = load(sheet, &windy()).unwrap();
        let def = catalog.find(Category::Chassis, "camber").unwrap();
        assert!(def.encoding.signed);
        assert_eq!(def.encoding.scale, Scale::new(10, 1).unwrap());
    }

    #[test]
    fn add_refuses_duplicate_slot() {
        let mut catalog = load(SHEET, &windy()).unwrap();
        let dup = ParameterDefinition::new(
            "other_boost",
            Category::Engine,
            0,
            0x20,
            FieldEncoding::new(Width::One, false),
        );
        assert!(matches!(
            catalog.add(dup),
            Err(EditorError::DuplicateDefinition { index: 0, .. })
        ));
    }

    #[test]
    fn remove_keeps_remaining_indices() {
        let mut catalog = Catalog::new(&windy());
        for (i, name) in ["a", "b", "c"].iter().enumerate() {
            let def = ParameterDefinition::new(
                name,
                Category::Engine,
                i,
                i * 4,
                FieldEncoding::new(Width::Four, false),
            );
            catalog.add(def).unwrap();
        }
        let removed = catalog.remove("b").unwrap();
        assert_eq!(removed.index, 1);
        assert!(catalog.get(Selector::new(Category::Engine, 1)).is_none());
        assert_eq!(catalog.get(Selector::new(Category::Engine, 2)).unwrap().name, "c");
        assert!(matches!(catalog.remove("b"), Err(EditorError::UnknownParameter(_))));
    }

    #[test]
    fn parses_selectors() {
        let sel: Selector = "engine.3".parse().unwrap();
        assert_eq!(sel, Selector::new(Category::Engine, 3));
        let sel: Selector = "Chassis:0".parse().unwrap();
        assert_eq!(sel, Selector::new(Category::Chassis, 0));
        assert!("tyres.1".parse::<Selector>().is_err());
        assert!("engine".parse::<Selector>().is_err());
    }
}
