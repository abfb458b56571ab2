//! Order scenario input
//!
//! A scenario describes the order a diagnostic run creates. The built-in
//! bakery scenario is used when no file is given.

use crate::core::error::ConfigError;
use crate::core::money::ExchangeRate;
use crate::core::order::{NewOrder, NewOrderItem, OrderNumber, OrderStatus};
use chrono::Utc;
use rust_decimal::Decimal;
use serde::Deserialize;
use std::path::Path;

const DEFAULT_NOTES: &str = "Diagnostic order created by order-creation-check";

fn default_commission_rate() -> Decimal {
    Decimal::ZERO
}

fn default_assigned_status() -> OrderStatus {
    OrderStatus::Confirmed
}

/// One line of a scenario
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ScenarioItem {
    pub product_id: u64,
    /// Falls back to `Product <id>`
    #[serde(default)]
    pub product_name: Option<String>,
    pub quantity: u32,
    pub unit_price: Decimal,
    #[serde(default)]
    pub unit_cost: Option<Decimal>,
}

/// An order to create, its distributor and the exchange rate to price it with
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct OrderScenario {
    pub store_id: u64,
    pub store_name: String,
    #[serde(default)]
    pub created_by: Option<u64>,
    #[serde(default)]
    pub created_by_name: Option<String>,
    #[serde(default)]
    pub notes: Option<String>,
    /// Secondary currency units per primary unit
    pub exchange_rate: Decimal,
    #[serde(default = "default_commission_rate")]
    pub commission_rate: Decimal,
    pub distributor_id: u64,
    #[serde(default = "default_assigned_status")]
    pub assigned_status: OrderStatus,
    pub items: Vec<ScenarioItem>,
}

impl OrderScenario {
    /// Store 1, two lines (5 × 20.00 and 3 × 20.00), distributor 1
    pub fn bakery_default() -> Self {
        Self {
            store_id: 1,
            store_name: "Test Store".to_string(),
            created_by: Some(1),
            created_by_name: Some("Admin".to_string()),
            notes: Some(DEFAULT_NOTES.to_string()),
            exchange_rate: Decimal::ONE_HUNDRED,
            commission_rate: Decimal::ZERO,
            distributor_id: 1,
            assigned_status: OrderStatus::Confirmed,
            items: vec![
                ScenarioItem {
                    product_id: 1,
                    product_name: Some("Bread".to_string()),
                    quantity: 5,
                    unit_price: Decimal::new(2000, 2),
                    unit_cost: None,
                },
                ScenarioItem {
                    product_id: 2,
                    product_name: Some("Croissant".to_string()),
                    quantity: 3,
                    unit_price: Decimal::new(2000, 2),
                    unit_cost: None,
                },
            ],
        }
    }

    pub fn from_yaml_str(source: &str, content: &str) -> Result<Self, ConfigError> {
        serde_yaml::from_str(content).map_err(|e| ConfigError::ParseError {
            file: source.to_string(),
            message: e.to_string(),
        })
    }

    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::ParseError {
            file: path.display().to_string(),
            message: e.to_string(),
        })?;
        Self::from_yaml_str(&path.display().to_string(), &content)
    }

    pub fn exchange_rate(&self) -> ExchangeRate {
        ExchangeRate::new(self.exchange_rate)
    }

    /// Build the order request under `order_number`
    pub fn to_new_order(&self, order_number: OrderNumber) -> NewOrder {
        NewOrder {
            order_number,
            store_id: self.store_id,
            store_name: self.store_name.clone(),
            order_date: Utc::now(),
            commission_rate: self.commission_rate,
            notes: self.notes.clone(),
            created_by: self.created_by,
            created_by_name: self.created_by_name.clone(),
            items: self
                .items
                .iter()
                .map(|item| NewOrderItem {
                    product_id: item.product_id,
                    product_name: item
                        .product_name
                        .clone()
                        .unwrap_or_else(|| format!("Product {}", item.product_id)),
                    quantity: item.quantity,
                    unit_price: item.unit_price,
                    unit_cost: item.unit_cost,
                })
                .collect(),
        }
    }
}

impl Default for OrderScenario {
    fn default() -> Self {
        Self::bakery_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;
    use std::io::Write;

    const YAML: &str = r#"
store_id: 7
store_name: Harbour Kiosk
exchange_rate: "98.35"
commission_rate: "0.05"
distributor_id: 4
items:
  - product_id: 10
    product_name: Rye loaf
    quantity: 2
    unit_price: "3.40"
  - product_id: 11
    quantity: 1
    unit_price: 1.20
    unit_cost: 0.70
"#;

    #[test]
    fn test_parse_yaml_scenario() {
        let scenario = OrderScenario::from_yaml_str("inline", YAML).unwrap();
        assert_eq!(scenario.store_id, 7);
        assert_eq!(scenario.exchange_rate, dec!(98.35));
        assert_eq!(scenario.commission_rate, dec!(0.05));
        assert_eq!(scenario.assigned_status, OrderStatus::Confirmed);
        assert_eq!(scenario.items.len(), 2);
        assert_eq!(scenario.items[1].unit_cost, Some(dec!(0.70)));
    }

    #[test]
    fn test_missing_product_name_gets_placeholder() {
        let scenario = OrderScenario::from_yaml_str("inline", YAML).unwrap();
        let order = scenario.to_new_order(OrderNumber::from("TEST-9"));
        assert_eq!(order.items[0].product_name, "Rye loaf");
        assert_eq!(order.items[1].product_name, "Product 11");
        assert!(order.check(&scenario.exchange_rate()).is_ok());
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let err = OrderScenario::from_yaml_str("broken.yaml", "store_id: [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError { ref file, .. } if file == "broken.yaml"));
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(YAML.as_bytes()).unwrap();

        let scenario = OrderScenario::from_yaml_file(file.path()).unwrap();
        assert_eq!(scenario.distributor_id, 4);
    }

    #[test]
    fn test_missing_file_is_parse_error() {
        let err = OrderScenario::from_yaml_file("/nonexistent/scenario.yaml").unwrap_err();
        assert_eq!(err.error_code(), "CONFIG_PARSE_ERROR");
    }

    #[test]
    fn test_bakery_default_is_valid() {
        let scenario = OrderScenario::bakery_default();
        let order = scenario.to_new_order(OrderNumber::from("TEST-1"));
        assert!(order.check(&scenario.exchange_rate()).is_ok());
        assert_eq!(order.items.len(), 2);
        assert_eq!(order.items[0].quantity, 5);
        assert_eq!(order.items[1].quantity, 3);
    }
}
