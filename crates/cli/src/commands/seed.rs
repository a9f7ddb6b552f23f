//! Demo catalog seeding.
//!
//! Reads products and variants from YAML (the bundled `seed/catalog.yaml`
//! unless `--file` is given). Safe to re-run: existing slugs and SKUs are
//! left alone.

use std::path::Path;

use larder_api::db::{RepositoryError, products};
use larder_core::ProductId;
use rust_decimal::Decimal;
use serde::Deserialize;
use sqlx::PgPool;
use tracing::info;

use super::{CliError, connect};

const BUNDLED_CATALOG: &str = include_str!("../../seed/catalog.yaml");

#[derive(Debug, Deserialize)]
struct SeedProduct {
    slug: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(default)]
    variants: Vec<SeedVariant>,
}

#[derive(Debug, Deserialize)]
struct SeedVariant {
    sku: String,
    title: String,
    price: Decimal,
    #[serde(default)]
    stock: i32,
}

fn parse_catalog(content: &str) -> Result<Vec<SeedProduct>, CliError> {
    let catalog: Vec<SeedProduct> =
        serde_yaml::from_str(content).map_err(|e| CliError::Seed(e.to_string()))?;
    for product in &catalog {
        if product.slug.trim().is_empty() || product.title.trim().is_empty() {
            return Err(CliError::Seed("every product needs a slug and title".to_string()));
        }
        if let Some(v) = product.variants.iter().find(|v| v.price < Decimal::ZERO || v.stock < 0) {
            return Err(CliError::Seed(format!("{}: negative price or stock", v.sku)));
        }
    }
    Ok(catalog)
}

/// Counts from one seeding run.
#[derive(Debug, Default)]
struct Seeded {
    products: usize,
    variants: usize,
    skipped: usize,
}

/// Seed the catalog.
pub async fn catalog(file: Option<&Path>) -> Result<(), CliError> {
    let content = match file {
        Some(path) => {
            info!(path = %path.display(), "Loading catalog from file");
            tokio::fs::read_to_string(path)
                .await
                .map_err(|e| CliError::Seed(format!("{}: {e}", path.display())))?
        }
        None => BUNDLED_CATALOG.to_string(),
    };
    let catalog = parse_catalog(&content)?;
    info!(products = catalog.len(), "Parsed catalog");

    let pool = connect().await?;
    let mut seeded = Seeded::default();
    for product in &catalog {
        seed_product(&pool, product, &mut seeded).await?;
    }

    info!(
        products = seeded.products,
        variants = seeded.variants,
        skipped = seeded.skipped,
        "Seeding complete"
    );
    Ok(())
}

async fn seed_product(
    pool: &PgPool,
    product: &SeedProduct,
    seeded: &mut Seeded,
) -> Result<(), CliError> {
    let product_id: ProductId = match products::create(
        pool,
        products::NewProduct {
            slug: &product.slug,
            title: &product.title,
            description: &product.description,
            is_active: true,
        },
    )
    .await
    {
        Ok(created) => {
            seeded.products += 1;
            created.id
        }
        Err(RepositoryError::Conflict(_)) => {
            info!(slug = %product.slug, "Product exists, skipping");
            seeded.skipped += 1;
            return Ok(());
        }
        Err(err) => return Err(err.into()),
    };

    for variant in &product.variants {
        match products::create_variant(
            pool,
            product_id,
            products::NewVariant {
                sku: &variant.sku,
                title: &variant.title,
                price: variant.price,
                stock: variant.stock,
            },
        )
        .await
        {
            Ok(_) => seeded.variants += 1,
            Err(RepositoryError::Conflict(_)) => {
                info!(sku = %variant.sku, "SKU exists, skipping");
                seeded.skipped += 1;
            }
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn test_bundled_catalog_parses() {
        let catalog = parse_catalog(BUNDLED_CATALOG).unwrap();
        assert!(!catalog.is_empty());
        assert!(catalog.iter().all(|p| !p.variants.is_empty()));
        let oil = catalog.iter().find(|p| p.slug == "extra-virgin-olive-oil").unwrap();
        assert_eq!(oil.variants[0].price, Decimal::new(1299, 2));
    }

    #[test]
    fn test_rejects_negative_stock() {
        let yaml = r#"
- slug: salt
  title: Sea Salt
  variants:
    - sku: SALT-1
      title: 250g
      price: "2.00"
      stock: -1
"#;
        assert!(matches!(parse_catalog(yaml), Err(CliError::Seed(_))));
    }
}
