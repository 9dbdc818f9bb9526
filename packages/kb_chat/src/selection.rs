//! Product/version selection shared by every pane.

use stream_session::{Collection, SelectionContext};

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SelectionError {
    #[error("no product named {0:?}")]
    UnknownProduct(String),

    #[error("{product} has no version {version:?}")]
    UnknownVersion { product: String, version: String },

    #[error("select a product first")]
    NoProduct,
}

/// The loaded catalog plus what is currently selected from it.
#[derive(Debug, Clone)]
pub struct Selection {
    catalog: Vec<Collection>,
    context: SelectionContext,
}

impl Selection {
    /// Empty catalog, `none` selected.
    pub fn new(language: impl Into<String>) -> Self {
        Self {
            catalog: Vec::new(),
            context: SelectionContext::none(language),
        }
    }

    /// Install the catalog and select its first product at its first version.
    /// An empty catalog leaves `none` selected.
    pub fn load_catalog(&mut self, catalog: Vec<Collection>) {
        self.catalog = catalog;
        if let Some(first) = self.catalog.first() {
            let version = first.first_version().unwrap_or_default().to_string();
            self.context.collection = first.clone();
            self.context.version = version;
        }
    }

    pub fn catalog(&self) -> &[Collection] {
        &self.catalog
    }

    pub fn context(&self) -> &SelectionContext {
        &self.context
    }

    /// Select a product by full name (case-insensitive), at its first version.
    pub fn select_product(
        &mut self,
        full_name: &str,
    ) -> Result<&SelectionContext, SelectionError> {
        let wanted = full_name.trim();
        let collection = self
            .catalog
            .iter()
            .find(|c| c.collection_full_name.eq_ignore_ascii_case(wanted))
            .ok_or_else(|| SelectionError::UnknownProduct(wanted.to_string()))?;

        self.context.version = collection.first_version().unwrap_or_default().to_string();
        self.context.collection = collection.clone();
        Ok(&self.context)
    }

    /// Select a version of the current product.
    pub fn select_version(
        &mut self,
        version: &str,
    ) -> Result<&SelectionContext, SelectionError> {
        let version = version.trim();
        let current = &self.context.collection;
        if current.is_none() {
            return Err(SelectionError::NoProduct);
        }
        if !current.has_version(version) {
            return Err(SelectionError::UnknownVersion {
                product: current.collection_full_name.clone(),
                version: version.to_string(),
            });
        }
        self.context.version = version.to_string();
        Ok(&self.context)
    }
}
