use std::path::PathBuf;

use icr2edit_core::{Catalog, CatalogSource, Category, LoadedImage, Selector, VariantRegistry};

use crate::CliError;

/// An opened executable and the catalog bound to its build.
pub struct Session {
    pub path: PathBuf,
    pub image: LoadedImage,
    pub catalog: Catalog,
}

impl Session {
    pub fn open(path: PathBuf, catalog_path: PathBuf, registry: &VariantRegistry) -> Result<Self, CliError> {
        let image = icr2edit_core::open(&path, registry)?;
        let catalog = Catalog::load(&CatalogSource::File(catalog_path), image.variant())?;
        tracing::info!(
            variant = %image.variant().tag,
            parameters = catalog.len(),
            "catalog bound"
        );
        Ok(Self { path, image, catalog })
    }

    pub fn save(&mut self) -> Result<(), CliError> {
        icr2edit_core::save(&mut self.image, &self.path).map_err(CliError::SaveFailed)
    }

    /// `engine.3`, `engine:3`, or a parameter name.
    pub fn target(&self, text: &str) -> Result<Selector, CliError> {
        if let Ok(selector) = text.parse::<Selector>() {
            return Ok(selector);
        }
        Category::ALL
            .iter()
            .find_map(|&category| self.catalog.find(category, text))
            .map(|def| def.selector())
            .ok_or_else(|| icr2edit_core::EditorError::UnknownParameter(text.to_string()).into())
    }
}
