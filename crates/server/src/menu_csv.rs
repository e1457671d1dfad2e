//! CSV import and export of menus.
//!
//! Header names are matched case-insensitively with spaces read as `_`.
//! `name`, `category` and `price` are required; unknown columns are ignored.

use rollwise_core::domain::order::{MenuItem, NewMenuItem};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const REQUIRED_COLUMNS: [&str; 3] = ["name", "category", "price"];

#[derive(Debug, Error)]
pub enum MenuCsvError {
    #[error("Missing required columns: {}", .0.join(", "))]
    MissingColumns(Vec<String>),
    #[error("CSV could not be read: {0}")]
    Malformed(#[from] csv::Error),
    #[error("CSV could not be written: {0}")]
    Write(String),
}

/// One spreadsheet row, also the template's column layout.
#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct MenuCsvRow {
    pub number: Option<String>,
    pub name: String,
    pub description: Option<String>,
    pub category: String,
    pub price: String,
    pub allergens: Option<String>,
    pub available: Option<String>,
    pub is_popular: Option<String>,
}

impl MenuCsvRow {
    pub fn into_new_item(self) -> Result<NewMenuItem, String> {
        let name = self.name.trim().to_string();
        if name.is_empty() {
            return Err("Name is required".to_string());
        }
        let category = self.category.trim().to_string();
        if category.is_empty() {
            return Err("Category is required".to_string());
        }
        let price = self.price.trim();
        if price.is_empty() {
            return Err("price is required".to_string());
        }
        let price = price.parse::<Decimal>().map_err(|_| format!("Invalid price: {price}"))?;
        let number = match non_blank(self.number) {
            Some(raw) => Some(raw.parse::<i64>().map_err(|_| format!("Invalid number: {raw}"))?),
            None => None,
        };

        let item = NewMenuItem {
            number,
            name,
            description: non_blank(self.description),
            category: Some(category),
            price,
            allergens: split_list(self.allergens.as_deref()),
            available: flag(self.available.as_deref(), true),
            is_popular: flag(self.is_popular.as_deref(), false),
        };
        item.validate().map_err(|error| error.to_string())?;
        Ok(item)
    }
}

#[derive(Debug, Serialize)]
struct MenuCsvExport<'a> {
    id: &'a str,
    number: Option<i64>,
    name: &'a str,
    description: &'a str,
    category: &'a str,
    price: String,
    allergens: String,
    available: bool,
    is_popular: bool,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.map(|value| value.trim().to_string()).filter(|value| !value.is_empty())
}

fn flag(value: Option<&str>, default: bool) -> bool {
    match value.map(str::trim).filter(|value| !value.is_empty()) {
        Some(value) => matches!(value.to_ascii_lowercase().as_str(), "true" | "1" | "yes" | "y" | "on"),
        None => default,
    }
}

fn split_list(value: Option<&str>) -> Vec<String> {
    value
        .unwrap_or_default()
        .split([',', ';'])
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(str::to_string)
        .collect()
}

fn normalize_header(header: &str) -> String {
    header.trim().to_lowercase().replace(' ', "_")
}

/// Rows in file order, each parsed or rejected with its message. Row numbers
/// start at 2, the header being row 1.
pub fn read_menu(data: &[u8]) -> Result<Vec<(usize, Result<NewMenuItem, String>)>, MenuCsvError> {
    let mut reader = csv::ReaderBuilder::new().flexible(true).from_reader(data);
    let headers: csv::StringRecord = reader.headers()?.iter().map(normalize_header).collect();
    let missing: Vec<String> = REQUIRED_COLUMNS
        .iter()
        .filter(|column| !headers.iter().any(|header| header == **column))
        .map(|column| column.to_string())
        .collect();
    if !missing.is_empty() {
        return Err(MenuCsvError::MissingColumns(missing));
    }
    reader.set_headers(headers.clone());

    let mut rows = Vec::new();
    for (index, record) in reader.records().enumerate() {
        let row_number = index + 2;
        let parsed = record
            .and_then(|record| record.deserialize::<MenuCsvRow>(Some(&headers)))
            .map_err(|error| error.to_string())
            .and_then(MenuCsvRow::into_new_item);
        rows.push((row_number, parsed));
    }
    Ok(rows)
}

fn finish(writer: csv::Writer<Vec<u8>>) -> Result<String, MenuCsvError> {
    let bytes = writer.into_inner().map_err(|error| MenuCsvError::Write(error.to_string()))?;
    String::from_utf8(bytes).map_err(|error| MenuCsvError::Write(error.to_string()))
}

pub fn write_menu(items: &[MenuItem]) -> Result<String, MenuCsvError> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    for item in items {
        writer.serialize(MenuCsvExport {
            id: &item.id.0,
            number: item.number,
            name: &item.name,
            description: item.description.as_deref().unwrap_or_default(),
            category: item.category.as_deref().unwrap_or_default(),
            price: item.price.to_string(),
            allergens: item.allergens.join(", "),
            available: item.available,
            is_popular: item.is_popular,
        })?;
    }
    finish(writer)
}

pub fn template() -> Result<String, MenuCsvError> {
    let examples = [
        ["1", "Margherita Pizza", "Tomato, mozzarella and basil", "Entree", "15.99", "dairy, gluten", "true"],
        ["2", "Caesar Salad", "Romaine with caesar dressing", "Appetizer", "8.99", "dairy, eggs", "false"],
        ["3", "House Wine", "Red or white by the glass", "Drink", "7.50", "sulfites", "false"],
    ];
    let mut writer = csv::Writer::from_writer(Vec::new());
    for [number, name, description, category, price, allergens, is_popular] in examples {
        writer.serialize(MenuCsvRow {
            number: Some(number.to_string()),
            name: name.to_string(),
            description: Some(description.to_string()),
            category: category.to_string(),
            price: price.to_string(),
            allergens: Some(allergens.to_string()),
            available: Some("true".to_string()),
            is_popular: Some(is_popular.to_string()),
        })?;
    }
    finish(writer)
}
