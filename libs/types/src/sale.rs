//! Sale events and their wire decoding
//!
//! A sale arrives on the stream as a JSON record:
//!
//! ```json
//! {"categoria": 1, "producto_id": "P7", "precio": 99.99, "cantidad_vendida": 3}
//! ```
//!
//! Missing, null, and unknown fields fall back to zero values. Anything that
//! is not a JSON object, or whose fields carry the wrong type, is rejected.
//! A decoded event is immutable and never persisted as such.

use rust_decimal::Decimal;
use serde::{Deserialize, Deserializer};
use serde_json::Value;

use crate::category::{self, CategoryLabel};
use crate::errors::DecodeError;
use crate::ids::ProductId;
use crate::numeric::{Price, Quantity};

/// A single decoded sale
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaleEvent {
    category: i64,
    product_id: ProductId,
    price: Price,
    quantity_sold: Quantity,
}

impl SaleEvent {
    pub fn new(
        category: i64,
        product_id: ProductId,
        price: Price,
        quantity_sold: Quantity,
    ) -> Self {
        Self {
            category,
            product_id,
            price,
            quantity_sold,
        }
    }

    /// Decode a raw stream payload.
    pub fn decode(payload: &[u8]) -> Result<Self, DecodeError> {
        if payload.iter().all(u8::is_ascii_whitespace) {
            return Err(DecodeError::Empty);
        }

        let value: Value =
            serde_json::from_slice(payload).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        if !value.is_object() {
            return Err(DecodeError::NotARecord {
                found: json_kind(&value),
            });
        }

        let wire: WireSale =
            serde_json::from_value(value).map_err(|e| DecodeError::Malformed(e.to_string()))?;
        wire.try_into()
    }

    /// Raw wire category code.
    pub fn category(&self) -> i64 {
        self.category
    }

    /// Resolved category label.
    pub fn label(&self) -> CategoryLabel {
        category::resolve(self.category)
    }

    pub fn product_id(&self) -> &ProductId {
        &self.product_id
    }

    pub fn price(&self) -> Price {
        self.price
    }

    pub fn quantity_sold(&self) -> Quantity {
        self.quantity_sold
    }
}

/// Field layout produced by the sale relay.
#[derive(Debug, Default, Deserialize)]
struct WireSale {
    #[serde(default, alias = "category", deserialize_with = "null_as_default")]
    categoria: i64,
    #[serde(default, deserialize_with = "null_as_default")]
    producto_id: String,
    #[serde(default, deserialize_with = "null_as_default")]
    precio: Decimal,
    #[serde(default, deserialize_with = "null_as_default")]
    cantidad_vendida: i64,
}

impl TryFrom<WireSale> for SaleEvent {
    type Error = DecodeError;

    fn try_from(wire: WireSale) -> Result<Self, Self::Error> {
        let product_id =
            ProductId::try_new(wire.producto_id).ok_or_else(|| DecodeError::InvalidField {
                field: "producto_id",
                reason: "missing or empty".to_string(),
            })?;
        let price = Price::try_new(wire.precio).ok_or_else(|| DecodeError::InvalidField {
            field: "precio",
            reason: format!("negative price {}", wire.precio),
        })?;
        let quantity_sold = Quantity::try_from_i64(wire.cantidad_vendida).ok_or_else(|| {
            DecodeError::InvalidField {
                field: "cantidad_vendida",
                reason: format!("negative quantity {}", wire.cantidad_vendida),
            }
        })?;

        Ok(SaleEvent::new(wire.categoria, product_id, price, quantity_sold))
    }
}

fn null_as_default<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: Deserialize<'de> + Default,
{
    Ok(Option::<T>::deserialize(deserializer)?.unwrap_or_default())
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
