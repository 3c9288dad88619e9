use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Named collections a user's records live in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Collection {
    #[serde(rename = "foodLogs")]
    FoodLogs,
    #[serde(rename = "waterLogs")]
    WaterLogs,
    #[serde(rename = "settings")]
    Settings,
}

impl Collection {
    pub fn as_str(&self) -> &'static str {
        match self {
            Collection::FoodLogs => "foodLogs",
            Collection::WaterLogs => "waterLogs",
            Collection::Settings => "settings",
        }
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw record as held by the store, keyed by the id the store minted.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StoredRecord {
    pub id: String,
    pub record: Value,
}

impl StoredRecord {
    pub fn new(id: impl Into<String>, record: Value) -> Self {
        Self {
            id: id.into(),
            record,
        }
    }
}

/// One logged food item.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FoodEntry {
    pub id: String,
    pub timestamp_ms: i64,
    pub product_name: String,
    pub calories_kcal: f64,
    pub protein_grams: f64,
    pub carb_grams: f64,
    pub fat_grams: f64,
    pub sugar_grams: f64,
    pub vegetarian_status: String,
    pub image_ref: String,
}

impl FoodEntry {
    /// Reads an entry out of a stored record. Numeric fields that are missing
    /// or unparsable read as 0; the rest of the entry is unaffected.
    pub fn from_record(stored: &StoredRecord) -> Self {
        let r = &stored.record;
        Self {
            id: stored.id.clone(),
            timestamp_ms: lenient_timestamp(r.get("timestamp")),
            product_name: text_field(r, "productName"),
            calories_kcal: lenient_number(r.get("calories")),
            protein_grams: lenient_number(r.get("protein")),
            carb_grams: lenient_number(r.get("carbohydrates")),
            fat_grams: lenient_number(r.get("totalFat")),
            sugar_grams: sugar_grams(r.get("sugar")),
            vegetarian_status: text_field(r, "vegetarianStatus"),
            image_ref: text_field(r, "imageUri"),
        }
    }
}

/// One logged glass/bottle of water.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WaterEntry {
    pub id: String,
    pub timestamp_ms: i64,
    pub amount_liters: f64,
}

impl WaterEntry {
    pub fn from_record(stored: &StoredRecord) -> Self {
        Self {
            id: stored.id.clone(),
            timestamp_ms: lenient_timestamp(stored.record.get("timestamp")),
            amount_liters: lenient_number(stored.record.get("amount")),
        }
    }
}

/// Body accepted when logging food by hand or saving a scan result.
///
/// Unknown keys (health score, additives, ...) ride along untouched in
/// `extra` so the stored record keeps whatever the analysis produced.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFoodEntry {
    pub product_name: String,
    #[serde(default)]
    pub timestamp: Option<i64>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl NewFoodEntry {
    pub fn into_record(self, now_ms: i64) -> Value {
        let mut record = self.extra;
        record.insert("productName".into(), Value::String(self.product_name));
        record.insert("timestamp".into(), json!(self.timestamp.unwrap_or(now_ms)));
        Value::Object(record)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct NewWaterEntry {
    pub amount: f64,
    #[serde(default)]
    pub timestamp: Option<i64>,
}

impl NewWaterEntry {
    pub fn into_record(self, now_ms: i64) -> Value {
        json!({
            "amount": self.amount,
            "timestamp": self.timestamp.unwrap_or(now_ms),
        })
    }
}

/// Numeric read with the same forgiveness a `parseFloat(x) || 0` has:
/// numbers pass through, strings parse from their leading numeric prefix,
/// anything else is 0.
pub fn lenient_number(value: Option<&Value>) -> f64 {
    let n = match value {
        Some(Value::Number(n)) => n.as_f64().unwrap_or(0.0),
        Some(Value::String(s)) => parse_numeric_prefix(s).unwrap_or(0.0),
        _ => 0.0,
    };
    if n.is_finite() {
        n
    } else {
        0.0
    }
}

fn lenient_timestamp(value: Option<&Value>) -> i64 {
    match value {
        Some(Value::Number(n)) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f.trunc() as i64))
            .unwrap_or(0),
        Some(Value::String(s)) => parse_numeric_prefix(s)
            .map(|f| f.trunc() as i64)
            .unwrap_or(0),
        _ => 0,
    }
}

// Analysis output nests sugar as `{ "labelSugar": .. }`; manual entries use a
// plain number.
fn sugar_grams(value: Option<&Value>) -> f64 {
    match value {
        Some(Value::Object(obj)) => lenient_number(obj.get("labelSugar")),
        other => lenient_number(other),
    }
}

fn text_field(record: &Value, key: &str) -> String {
    match record.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn parse_numeric_prefix(s: &str) -> Option<f64> {
    let s = s.trim_start();
    let bytes = s.as_bytes();
    let mut end = 0;
    if matches!(bytes.first(), Some(b'+') | Some(b'-')) {
        end = 1;
    }
    let digits_start = end;
    let mut seen_dot = false;
    while let Some(&b) = bytes.get(end) {
        match b {
            b'0'..=b'9' => end += 1,
            b'.' if !seen_dot => {
                seen_dot = true;
                end += 1;
            }
            _ => break,
        }
    }
    if end == digits_start || &s[digits_start..end] == "." {
        return None;
    }
    let mantissa_end = end;
    if matches!(bytes.get(end), Some(b'e') | Some(b'E')) {
        let mut exp = end + 1;
        if matches!(bytes.get(exp), Some(b'+') | Some(b'-')) {
            exp += 1;
        }
        let exp_digits = bytes[exp..].iter().take_while(|b| b.is_ascii_digit()).count();
        if exp_digits > 0 {
            end = exp + exp_digits;
        }
    }
    let mantissa = s[..mantissa_end].trim_end_matches('.');
    format!("{mantissa}{}", &s[mantissa_end..end])
        .parse::<f64>()
        .ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lenient_number_handles_strings_and_garbage() {
        assert_eq!(lenient_number(Some(&json!(12.5))), 12.5);
        assert_eq!(lenient_number(Some(&json!("120"))), 120.0);
        assert_eq!(lenient_number(Some(&json!(" 7.5 g"))), 7.5);
        assert_eq!(lenient_number(Some(&json!("12."))), 12.0);
        assert_eq!(lenient_number(Some(&json!("abc"))), 0.0);
        assert_eq!(lenient_number(Some(&json!("."))), 0.0);
        assert_eq!(lenient_number(Some(&json!(null))), 0.0);
        assert_eq!(lenient_number(Some(&json!([1, 2]))), 0.0);
        assert_eq!(lenient_number(None), 0.0);
    }

    #[test]
    fn lenient_number_reads_exponents() {
        assert_eq!(lenient_number(Some(&json!("1e3"))), 1000.0);
        assert_eq!(lenient_number(Some(&json!("1.5E2 kcal"))), 150.0);
        assert_eq!(lenient_number(Some(&json!("25e-1g"))), 2.5);
        assert_eq!(lenient_number(Some(&json!("4.e1"))), 40.0);
        // A dangling exponent marker is not part of the number.
        assert_eq!(lenient_number(Some(&json!("2e"))), 2.0);
        assert_eq!(lenient_number(Some(&json!("3e+x"))), 3.0);
        assert_eq!(lenient_number(Some(&json!("1e999"))), 0.0);
    }

    #[test]
    fn malformed_field_only_zeroes_that_field() {
        let stored = StoredRecord::new(
            "a1",
            json!({
                "productName": "Oats",
                "timestamp": 1_700_000_000_000i64,
                "calories": "not a number",
                "protein": "13",
                "carbohydrates": 60,
                "totalFat": 7,
                "sugar": { "labelSugar": "1.2", "hiddenSugars": [] },
                "vegetarianStatus": "Vegan",
            }),
        );
        let entry = FoodEntry::from_record(&stored);
        assert_eq!(entry.id, "a1");
        assert_eq!(entry.calories_kcal, 0.0);
        assert_eq!(entry.protein_grams, 13.0);
        assert_eq!(entry.carb_grams, 60.0);
        assert_eq!(entry.fat_grams, 7.0);
        assert_eq!(entry.sugar_grams, 1.2);
        assert_eq!(entry.vegetarian_status, "Vegan");
        assert_eq!(entry.image_ref, "");
        assert_eq!(entry.timestamp_ms, 1_700_000_000_000);
    }

    #[test]
    fn new_food_entry_keeps_extra_fields() {
        let body: NewFoodEntry = serde_json::from_value(json!({
            "productName": "Granola Bar",
            "calories": 190,
            "healthScore": 41,
        }))
        .unwrap();
        let record = body.into_record(42);
        assert_eq!(record["productName"], "Granola Bar");
        assert_eq!(record["calories"], 190);
        assert_eq!(record["healthScore"], 41);
        assert_eq!(record["timestamp"], 42);
    }

    #[test]
    fn collection_wire_names() {
        assert_eq!(Collection::FoodLogs.to_string(), "foodLogs");
        assert_eq!(
            serde_json::to_value(Collection::WaterLogs).unwrap(),
            json!("waterLogs")
        );
    }
}
