//! Cart lines priced at current variant prices.

use larder_core::{CostBreakdown, PricedLine, ProductId, VariantId};
use rust_decimal::Decimal;
use serde::Serialize;

/// One cart line joined with its variant and product.
#[derive(Debug, Clone, Serialize, sqlx::FromRow)]
pub struct CartLine {
    pub variant_id: VariantId,
    pub product_id: ProductId,
    pub product_title: String,
    pub variant_title: String,
    pub sku: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    pub stock: i32,
    /// Variant and product are both active.
    pub purchasable: bool,
}

impl CartLine {
    #[must_use]
    pub const fn priced(&self) -> PricedLine {
        PricedLine {
            variant_id: self.variant_id,
            unit_price: self.unit_price,
            quantity: self.quantity,
        }
    }
}

/// The cart with a preview breakdown when it has purchasable lines.
#[derive(Debug, Clone, Serialize)]
pub struct CartView {
    pub lines: Vec<CartLine>,
    pub breakdown: Option<CostBreakdown>,
}
