//! Seed the catalog from a YAML file.
//!
//! ```yaml
//! products:
//!   - name: Brake Pad
//!     code: BP-100
//!     make: Toyota
//!     model: Corolla
//!     year: 2016
//!   - name: Rotor
//! ```
//!
//! Every entry is validated before the first product is written.

use std::path::Path;

use serde::Deserialize;
use tracing::{error, info};

use parts_crm_core::OrganizationId;
use parts_crm_server::db::{NewProduct, RecordStore};
use parts_crm_server::services::ProductInput;

use super::{CliError, connect};

/// Layout of a catalog seed file.
#[derive(Debug, Deserialize)]
pub struct CatalogFile {
    pub products: Vec<ProductInput>,
}

/// Validate every entry, collecting all problems instead of stopping at the
/// first.
fn validate(org_id: OrganizationId, file: CatalogFile) -> Result<Vec<NewProduct>, Vec<String>> {
    let mut products = Vec::with_capacity(file.products.len());
    let mut errors = Vec::new();
    for (index, input) in file.products.into_iter().enumerate() {
        match input.into_new(org_id) {
            Ok(product) => products.push(product),
            Err(e) => errors.push(format!("entry {}: {e}", index + 1)),
        }
    }
    if errors.is_empty() {
        Ok(products)
    } else {
        Err(errors)
    }
}

/// Seed catalog products for an organization.
///
/// # Errors
///
/// Returns an error if the file cannot be read or parsed, any entry is
/// invalid, the organization does not exist or a write fails.
pub async fn products(org_id: OrganizationId, file_path: &str) -> Result<(), CliError> {
    let path = Path::new(file_path);
    if !path.exists() {
        return Err(CliError::Invalid(format!("File not found: {file_path}")));
    }

    info!(path = %file_path, "Loading catalog from file");
    let content = tokio::fs::read_to_string(path).await?;
    let file: CatalogFile = serde_yaml::from_str(&content)?;
    info!(products = file.products.len(), "Parsed catalog");

    let products = validate(org_id, file).map_err(|errors| {
        error!("Catalog validation failed:");
        for err in &errors {
            error!("  - {err}");
        }
        CliError::Invalid(format!("{} validation errors found", errors.len()))
    })?;

    let store = connect().await?;
    if store.get_organization(org_id).await?.is_none() {
        return Err(CliError::Invalid(format!("organization {org_id} does not exist")));
    }

    let mut created = 0_usize;
    for product in products {
        let product = store.create_product(product).await?;
        info!(product_id = %product.id, name = %product.name, "Product created");
        created += 1;
    }

    info!(created, %org_id, "Catalog seeding complete");
    Ok(())
}
