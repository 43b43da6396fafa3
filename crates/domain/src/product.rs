//! Product catalog entry and the stock-availability rule.

use chrono::{DateTime, Utc};
use common::{Money, ProductId};
use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Whether a product can currently be sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProductStatus {
    #[default]
    Active,
    Inactive,
}

impl ProductStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProductStatus::Active => "active",
            ProductStatus::Inactive => "inactive",
        }
    }
}

impl std::fmt::Display for ProductStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for ProductStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ProductStatus::Active),
            "inactive" => Ok(ProductStatus::Inactive),
            other => Err(DomainError::UnknownStatus {
                kind: "product",
                value: other.to_string(),
            }),
        }
    }
}

/// A sellable product with its stock counter.
///
/// `stock_qty` is never negative; the ledger enforces that with a
/// conditional decrement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    pub id: ProductId,
    pub sku: String,
    pub name: String,
    #[serde(rename = "priceCents")]
    pub price: Money,
    pub currency: String,
    pub stock_qty: i64,
    pub status: ProductStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl Product {
    /// Evaluates whether `quantity` units can be sold right now.
    ///
    /// Inactive products are never available, whatever their stock.
    pub fn check(&self, quantity: u32) -> StockCheck {
        StockCheck {
            product_id: self.id,
            requested_qty: quantity,
            available_qty: self.stock_qty,
            available: self.status == ProductStatus::Active
                && self.stock_qty >= i64::from(quantity),
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == ProductStatus::Active
    }
}

/// Outcome of an availability check. Never an error: unavailable is a
/// normal answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StockCheck {
    pub product_id: ProductId,
    pub available: bool,
    pub requested_qty: u32,
    pub available_qty: i64,
}

/// Validated input for creating a product.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewProduct {
    pub sku: String,
    pub name: String,
    pub price: Money,
    pub currency: String,
    pub stock_qty: i64,
}

impl NewProduct {
    pub fn new(
        sku: impl Into<String>,
        name: impl Into<String>,
        price: Money,
        currency: impl Into<String>,
        stock_qty: i64,
    ) -> Result<Self, DomainError> {
        let sku = sku.into();
        let name = name.into();
        if sku.trim().is_empty() {
            return Err(DomainError::EmptyField("sku"));
        }
        if name.trim().is_empty() {
            return Err(DomainError::EmptyField("name"));
        }
        if !price.is_positive() {
            return Err(DomainError::InvalidPrice {
                cents: price.cents(),
            });
        }
        if stock_qty < 0 {
            return Err(DomainError::InvalidStock {
                quantity: stock_qty,
            });
        }
        Ok(Self {
            sku,
            name,
            price,
            currency: currency.into().to_uppercase(),
            stock_qty,
        })
    }

    /// Materializes the product with a fresh id, active status.
    pub fn into_product(self, now: DateTime<Utc>) -> Product {
        Product {
            id: ProductId::new(),
            sku: self.sku,
            name: self.name,
            price: self.price,
            currency: self.currency,
            stock_qty: self.stock_qty,
            status: ProductStatus::Active,
            created_at: now,
            updated_at: None,
        }
    }

    /// Overwrites the editable fields of `product` with these values.
    pub fn apply_to(self, product: &mut Product, now: DateTime<Utc>) {
        product.name = self.name;
        product.price = self.price;
        product.currency = self.currency;
        product.stock_qty = self.stock_qty;
        product.updated_at = Some(now);
    }
}
