//! Cart Aggregate
//!
//! Client-held list of selected items. The cart has no server authority: it is
//! priced locally and snapshotted into an order at checkout.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::domain::value_objects::Money;

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Cart {
    items: Vec<CartItem>,
    updated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CartItem {
    pub product_id: String,
    pub name: String,
    pub image: Option<String>,
    pub unit_price: Money,
    pub quantity: u32,
    pub stock_ceiling: u32,
}

impl CartItem {
    pub fn line_total(&self) -> Money { self.unit_price.multiply(self.quantity) }
}

impl Default for Cart {
    fn default() -> Self { Self::new() }
}

impl Cart {
    pub fn new() -> Self {
        Self { items: vec![], updated_at: Utc::now() }
    }

    pub fn items(&self) -> &[CartItem] { &self.items }
    pub fn item_count(&self) -> usize { self.items.len() }
    pub fn is_empty(&self) -> bool { self.items.is_empty() }
    pub fn updated_at(&self) -> DateTime<Utc> { self.updated_at }

    pub fn subtotal(&self) -> Money { self.items.iter().map(CartItem::line_total).sum() }

    pub fn quantity_of(&self, product_id: &str) -> u32 {
        self.items.iter().find(|i| i.product_id == product_id).map_or(0, |i| i.quantity)
    }

    /// Adds an item, merging with an existing line for the same product.
    pub fn add_item(&mut self, item: CartItem) -> Result<(), CartError> {
        if item.quantity == 0 { return Err(CartError::InvalidQuantity); }
        if item.unit_price.is_negative() { return Err(CartError::InvalidPrice(item.product_id)); }
        if let Some(existing) = self.items.iter_mut().find(|i| i.product_id == item.product_id) {
            let wanted = existing.quantity.saturating_add(item.quantity);
            if wanted > item.stock_ceiling {
                return Err(CartError::StockExceeded { product_id: item.product_id, available: item.stock_ceiling });
            }
            existing.quantity = wanted;
            existing.unit_price = item.unit_price;
            existing.stock_ceiling = item.stock_ceiling;
        } else {
            if item.quantity > item.stock_ceiling {
                return Err(CartError::StockExceeded { product_id: item.product_id, available: item.stock_ceiling });
            }
            self.items.push(item);
        }
        self.touch();
        Ok(())
    }

    pub fn increment(&mut self, product_id: &str) -> Result<u32, CartError> {
        let item = self.find_mut(product_id)?;
        if item.quantity >= item.stock_ceiling {
            return Err(CartError::StockExceeded { product_id: product_id.to_string(), available: item.stock_ceiling });
        }
        item.quantity += 1;
        let quantity = item.quantity;
        self.touch();
        Ok(quantity)
    }

    /// Decrements the quantity; going below one removes the line and returns 0.
    pub fn decrement(&mut self, product_id: &str) -> Result<u32, CartError> {
        let item = self.find_mut(product_id)?;
        if item.quantity <= 1 {
            self.items.retain(|i| i.product_id != product_id);
            self.touch();
            return Ok(0);
        }
        item.quantity -= 1;
        let quantity = item.quantity;
        self.touch();
        Ok(quantity)
    }

    pub fn remove_item(&mut self, product_id: &str) -> Result<(), CartError> {
        let before = self.items.len();
        self.items.retain(|i| i.product_id != product_id);
        if self.items.len() == before { return Err(CartError::ItemNotFound(product_id.to_string())); }
        self.touch();
        Ok(())
    }

    pub fn clear(&mut self) { self.items.clear(); self.touch(); }

    fn find_mut(&mut self, product_id: &str) -> Result<&mut CartItem, CartError> {
        self.items.iter_mut().find(|i| i.product_id == product_id).ok_or_else(|| CartError::ItemNotFound(product_id.to_string()))
    }

    fn touch(&mut self) { self.updated_at = Utc::now(); }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CartError {
    #[error("Item {0} is not in the cart")]
    ItemNotFound(String),
    #[error("Only {available} of {product_id} in stock")]
    StockExceeded { product_id: String, available: u32 },
    #[error("Quantity must be at least 1")]
    InvalidQuantity,
    #[error("Item {0} has a negative price")]
    InvalidPrice(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rice(quantity: u32) -> CartItem {
        CartItem { product_id: "P1".into(), name: "Com tam".into(), image: None, unit_price: Money::new(45_000), quantity, stock_ceiling: 3 }
    }

    #[test]
    fn test_cart_operations() {
        let mut cart = Cart::new();
        cart.add_item(rice(2)).unwrap();
        assert_eq!(cart.item_count(), 1);
        assert_eq!(cart.subtotal(), Money::new(90_000));
        cart.add_item(rice(1)).unwrap();
        assert_eq!(cart.items()[0].quantity, 3); // Merged
    }

    #[test]
    fn test_quantity_never_exceeds_stock() {
        let mut cart = Cart::new();
        cart.add_item(rice(3)).unwrap();
        assert!(matches!(cart.increment("P1"), Err(CartError::StockExceeded { available: 3, .. })));
        assert!(matches!(cart.add_item(rice(1)), Err(CartError::StockExceeded { .. })));
        assert_eq!(cart.quantity_of("P1"), 3);
    }

    #[test]
    fn test_decrement_below_one_removes() {
        let mut cart = Cart::new();
        cart.add_item(rice(2)).unwrap();
        assert_eq!(cart.decrement("P1").unwrap(), 1);
        assert_eq!(cart.decrement("P1").unwrap(), 0);
        assert!(cart.is_empty());
        assert_eq!(cart.decrement("P1"), Err(CartError::ItemNotFound("P1".into())));
    }

    #[test]
    fn test_zero_quantity_rejected() {
        let mut cart = Cart::new();
        assert_eq!(cart.add_item(rice(0)), Err(CartError::InvalidQuantity));
    }

    #[test]
    fn test_negative_price_rejected() {
        let mut cart = Cart::new();
        let refund = CartItem { unit_price: Money::new(-100_000), ..rice(1) };
        assert_eq!(cart.add_item(refund), Err(CartError::InvalidPrice("P1".into())));
        assert!(cart.is_empty());
        assert_eq!(cart.subtotal(), Money::ZERO);
    }
}
