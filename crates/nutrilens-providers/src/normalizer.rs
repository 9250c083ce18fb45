//! Response normalizer: maps each backend kind's raw payload into the
//! shared [`RecognitionResult`] shape.
//!
//! One [`RawPayload`] variant per backend kind; nothing here sniffs shapes
//! across kinds.

use std::sync::OnceLock;

use regex::Regex;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use nutrilens_core::types::{round1, Confidence, NutritionTotals, RecognitionItem, RecognitionResult};
use nutrilens_core::utils::truncate_string;
use nutrilens_core::NormalizationError;

use crate::nutrition::{lookup_label, scan_caption};
use crate::traits::Prediction;

/// A backend reply, tagged with the kind that produced it.
#[derive(Clone, Copy, Debug)]
pub enum RawPayload<'a> {
    /// Text reply of a remote multi-model call.
    Remote(&'a str),
    /// Top prediction of the on-device classifier.
    OnDevice(&'a Prediction),
    /// Caption of the in-process model.
    InProcess(&'a str),
}

/// Normalize one backend payload.
///
/// A remote payload may legitimately contain zero items; the caller decides
/// whether that counts as a usable answer.
pub fn normalize(payload: RawPayload<'_>) -> Result<RecognitionResult, NormalizationError> {
    match payload {
        RawPayload::Remote(text) => normalize_remote(text),
        RawPayload::OnDevice(prediction) => normalize_prediction(prediction),
        RawPayload::InProcess(caption) => normalize_caption(caption),
    }
}

// ─────────────────────────────────────────────
// Remote
// ─────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct RemotePayload {
    #[serde(alias = "foods", alias = "food_items")]
    items: Vec<RemoteItem>,
    #[serde(default)]
    confidence: Option<Value>,
    #[serde(default, alias = "summary")]
    description: Option<String>,
    #[serde(default, alias = "total")]
    totals: Option<RemoteTotals>,
}

#[derive(Debug, Deserialize)]
struct RemoteItem {
    #[serde(alias = "food", alias = "label")]
    name: String,
    #[serde(alias = "kcal", deserialize_with = "lenient_number")]
    calories: f64,
    #[serde(alias = "protein_g", deserialize_with = "lenient_number")]
    protein: f64,
    #[serde(alias = "carbs_g", alias = "carbohydrates", deserialize_with = "lenient_number")]
    carbs: f64,
    #[serde(alias = "fat_g", deserialize_with = "lenient_number")]
    fat: f64,
    #[serde(default, alias = "sugar_g", deserialize_with = "lenient_optional")]
    sugar: Option<f64>,
    #[serde(default, alias = "fiber_g", alias = "fibre", deserialize_with = "lenient_optional")]
    fiber: Option<f64>,
    #[serde(
        default,
        alias = "portion_grams",
        alias = "grams",
        deserialize_with = "lenient_optional"
    )]
    portion_g: Option<f64>,
    #[serde(default, alias = "portion", alias = "serving")]
    portion_description: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RemoteTotals {
    #[serde(default, alias = "kcal", deserialize_with = "lenient_optional")]
    calories: Option<f64>,
}

/// Accept a JSON number or a numeric string such as `"12.5"` or `"266 kcal"`.
fn lenient_number<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    let value = Value::deserialize(deserializer)?;
    number_from_value(&value).ok_or_else(|| de::Error::custom(format!("expected a number, got {}", value)))
}

fn lenient_optional<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<f64>, D::Error> {
    let value = Value::deserialize(deserializer)?;
    if value.is_null() {
        return Ok(None);
    }
    number_from_value(&value)
        .map(Some)
        .ok_or_else(|| de::Error::custom(format!("expected a number or null, got {}", value)))
}

fn number_from_value(value: &Value) -> Option<f64> {
    let n = match value {
        Value::Number(n) => n.as_f64()?,
        Value::String(s) => s
            .trim()
            .trim_end_matches(|c: char| c.is_alphabetic() || c.is_whitespace())
            .parse()
            .ok()?,
        _ => return None,
    };
    n.is_finite().then_some(n)
}

fn fenced_block() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:\w+)?\s*(\{.*?\})\s*```").ok())
        .as_ref()
}

/// The outermost `{...}` span of `text`.
fn outermost_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a remote reply, trying the bare text, then a fenced block, then the
/// outermost object span.
fn parse_remote(text: &str) -> Result<RemotePayload, NormalizationError> {
    let trimmed = text.trim();
    let mut candidates = vec![trimmed];
    if let Some(fenced) = fenced_block()
        .and_then(|re| re.captures(trimmed))
        .and_then(|c| c.get(1))
    {
        candidates.push(fenced.as_str());
    }
    if let Some(span) = outermost_object(trimmed) {
        candidates.push(span);
    }

    let mut last_error = String::from("no JSON object found");
    for candidate in candidates {
        match serde_json::from_str::<RemotePayload>(candidate) {
            Ok(payload) => return Ok(payload),
            Err(e) => last_error = e.to_string(),
        }
    }

    Err(NormalizationError::Malformed(format!(
        "{} in {}",
        last_error,
        truncate_string(trimmed, 120)
    )))
}

fn remote_confidence(value: Option<&Value>) -> Confidence {
    match value {
        Some(Value::String(label)) => Confidence::parse(label)
            .or_else(|| {
                let score = label.trim().trim_end_matches('%').parse::<f64>().ok()?;
                Some(percent_confidence(score))
            })
            .unwrap_or_default(),
        Some(Value::Number(n)) => n.as_f64().map(percent_confidence).unwrap_or_default(),
        _ => Confidence::default(),
    }
}

/// Scores at or below 1.0 are read as fractions.
fn percent_confidence(score: f64) -> Confidence {
    if score <= 1.0 {
        Confidence::from_percent(score * 100.0)
    } else {
        Confidence::from_percent(score)
    }
}

fn normalize_remote(text: &str) -> Result<RecognitionResult, NormalizationError> {
    let payload = parse_remote(text)?;

    let mut items = Vec::with_capacity(payload.items.len());
    for raw in payload.items {
        let name = raw.name.trim().to_string();
        if name.is_empty() {
            return Err(NormalizationError::Malformed("item without a name".to_string()));
        }
        let macros = [raw.calories, raw.protein, raw.carbs, raw.fat];
        if macros.iter().chain(raw.sugar.iter()).chain(raw.fiber.iter()).any(|v| *v < 0.0) {
            return Err(NormalizationError::Malformed(format!("negative nutrition for '{}'", name)));
        }
        items.push(RecognitionItem {
            name,
            calories: round1(raw.calories),
            protein: round1(raw.protein),
            carbs: round1(raw.carbs),
            fat: round1(raw.fat),
            sugar: raw.sugar.map(round1),
            fiber: raw.fiber.map(round1),
            portion_grams: raw.portion_g.map(round1).unwrap_or(0.0).max(0.0),
            portion_description: raw
                .portion_description
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .unwrap_or_else(|| "1 serving".to_string()),
        });
    }

    let confidence = remote_confidence(payload.confidence.as_ref());
    let description = payload
        .description
        .map(|d| d.trim().to_string())
        .filter(|d| !d.is_empty())
        .unwrap_or_else(|| describe(&items));

    let result = RecognitionResult::from_items(items, confidence, description);

    if let Some(stated) = payload.totals.and_then(|t| t.calories) {
        check_totals(stated, &result.totals);
    }

    debug!(items = result.items.len(), confidence = %result.confidence, "normalized remote payload");
    Ok(result)
}

/// Provided totals are informational; the item sum is authoritative.
fn check_totals(stated_calories: f64, computed: &NutritionTotals) {
    let tolerance = (computed.calories * 0.02).max(1.0);
    if (stated_calories - computed.calories).abs() > tolerance {
        warn!(
            stated = stated_calories,
            computed = computed.calories,
            "provider totals disagree with item sum, using item sum"
        );
    }
}

fn describe(items: &[RecognitionItem]) -> String {
    items.iter().map(|i| i.name.as_str()).collect::<Vec<_>>().join(", ")
}

// ─────────────────────────────────────────────
// On-device
// ─────────────────────────────────────────────

fn normalize_prediction(prediction: &Prediction) -> Result<RecognitionResult, NormalizationError> {
    let label = prediction.label.trim();
    if label.is_empty() {
        return Err(NormalizationError::Empty);
    }

    let description = format!("{} ({:.0}%)", label, prediction.confidence);
    let result = match lookup_label(label) {
        Some(food) => RecognitionResult::from_items(
            vec![food.to_item()],
            Confidence::from_percent(prediction.confidence),
            description,
        ),
        None => {
            debug!(label, "classifier label not in nutrition table");
            RecognitionResult::from_items(vec![unknown_item(&label.replace('_', " "))], Confidence::Low, description)
        }
    };
    Ok(result)
}

// ─────────────────────────────────────────────
// In-process
// ─────────────────────────────────────────────

fn normalize_caption(caption: &str) -> Result<RecognitionResult, NormalizationError> {
    let caption = caption.trim();
    if caption.is_empty() {
        return Err(NormalizationError::Empty);
    }

    let result = match scan_caption(caption) {
        Some(food) => RecognitionResult::from_items(vec![food.to_item()], Confidence::Medium, caption),
        None => RecognitionResult::from_items(
            vec![unknown_item(&truncate_string(caption, 60))],
            Confidence::Low,
            caption,
        ),
    };
    Ok(result)
}

/// A named item with no nutrition, for the user to fill in.
fn unknown_item(name: &str) -> RecognitionItem {
    RecognitionItem {
        name: name.to_string(),
        calories: 0.0,
        protein: 0.0,
        carbs: 0.0,
        fat: 0.0,
        sugar: None,
        fiber: None,
        portion_grams: 0.0,
        portion_description: "1 serving".to_string(),
    }
}

// ─────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const PIZZA: &str = r#"{"items":[{"name":"Pizza","calories":266,"protein":11,"carbs":33,"fat":10,"portion_g":107,"portion_description":"1 slice"}],"confidence":"high"}"#;

    fn remote(text: &str) -> Result<RecognitionResult, NormalizationError> {
        normalize(RawPayload::Remote(text))
    }

    #[test]
    fn test_remote_pizza() {
        let result = remote(PIZZA).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].name, "Pizza");
        assert_eq!(result.items[0].portion_grams, 107.0);
        assert_eq!(result.items[0].sugar, None);
        assert_eq!(result.confidence, Confidence::High);
        assert_eq!(result.totals.calories, 266.0);
        assert_eq!(result.description, "Pizza");
        assert!(!result.is_multi_item);
    }

    #[test]
    fn test_remote_fenced_block_with_prose() {
        let text = format!("Sure! Here is the analysis:\n```json\n{}\n```\nEnjoy your meal.", PIZZA);
        assert_eq!(remote(&text).unwrap().totals.calories, 266.0);
    }

    #[test]
    fn test_remote_outermost_span_fallback() {
        let text = format!("The image shows {}. Let me know if you need more.", PIZZA);
        assert_eq!(remote(&text).unwrap().items[0].name, "Pizza");
    }

    #[test]
    fn test_remote_numeric_strings_and_aliases() {
        let text = r#"{"foods":[{"food":"Rice","kcal":"206 kcal","protein_g":"4.3","carbohydrates":45,"fat":"0.4","sugar":null,"fiber":"0.6","grams":158}],"confidence":0.9}"#;
        let result = remote(text).unwrap();
        let item = &result.items[0];
        assert_eq!(item.calories, 206.0);
        assert_eq!(item.protein, 4.3);
        assert_eq!(item.sugar, None);
        assert_eq!(item.fiber, Some(0.6));
        assert_eq!(item.portion_grams, 158.0);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_remote_totals_recomputed_from_items() {
        let text = json!({
            "items": [
                {"name": "Egg", "calories": 78, "protein": 6.3, "carbs": 0.6, "fat": 5.3, "sugar": 0.6},
                {"name": "Toast", "calories": 79, "protein": 2.7, "carbs": 15, "fat": 1, "fiber": 0.8}
            ],
            "totals": {"calories": 900},
            "confidence": "medium"
        })
        .to_string();
        let result = remote(&text).unwrap();
        assert_eq!(result.totals.calories, 157.0);
        assert_eq!(result.totals.protein, 9.0);
        assert_eq!(result.totals.sugar, 0.6);
        assert_eq!(result.totals.fiber, 0.8);
        assert!(result.is_multi_item);
    }

    #[test]
    fn test_remote_empty_item_list_is_ok() {
        let result = remote(r#"{"items":[],"confidence":"low","description":"no food"}"#).unwrap();
        assert!(result.items.is_empty());
        assert_eq!(result.description, "no food");
    }

    #[test]
    fn test_remote_unknown_confidence_defaults_to_medium() {
        let text = PIZZA.replace("\"high\"", "\"certain\"");
        assert_eq!(remote(&text).unwrap().confidence, Confidence::Medium);
    }

    #[test]
    fn test_remote_malformed() {
        for text in [
            "I can't tell what this is.",
            "{ not json }",
            r#"{"items":[{"name":"Pizza","calories":266}]}"#,
            r#"{"items":[{"name":"Pizza","calories":"lots","protein":1,"carbs":1,"fat":1}]}"#,
            r#"{"items":[{"name":" ","calories":1,"protein":1,"carbs":1,"fat":1}]}"#,
            r#"{"items":[{"name":"Pizza","calories":-5,"protein":1,"carbs":1,"fat":1}]}"#,
            r#"{"description":"no items key"}"#,
        ] {
            assert!(
                matches!(remote(text), Err(NormalizationError::Malformed(_))),
                "accepted: {text}"
            );
        }
    }

    #[test]
    fn test_remote_round_trip() {
        let original = remote(
            r#"{"items":[
                {"name":"Salmon","calories":280.04,"protein":39,"carbs":0,"fat":13.26,"portion_g":154,"portion_description":"1 fillet"},
                {"name":"Broccoli","calories":55,"protein":3.7,"carbs":11.1,"fat":0.6,"sugar":2.2,"fiber":5.1,"portion_g":156,"portion_description":"1 cup"}
            ],"confidence":"high"}"#,
        )
        .unwrap();

        let items: Vec<Value> = original
            .items
            .iter()
            .map(|i| {
                json!({
                    "name": i.name,
                    "calories": i.calories,
                    "protein": i.protein,
                    "carbs": i.carbs,
                    "fat": i.fat,
                    "sugar": i.sugar,
                    "fiber": i.fiber,
                    "portion_g": i.portion_grams,
                    "portion_description": i.portion_description,
                })
            })
            .collect();
        let serialized = json!({ "items": items, "confidence": original.confidence }).to_string();

        let again = remote(&serialized).unwrap();
        assert_eq!(again.items.len(), original.items.len());
        for (a, b) in again.items.iter().zip(&original.items) {
            assert_eq!(a.name, b.name);
            assert!((a.calories - b.calories).abs() < 0.05);
            assert!((a.fat - b.fat).abs() < 0.05);
            assert_eq!(a.sugar, b.sugar);
        }
        assert!((again.totals.calories - original.totals.calories).abs() < 0.05);
        assert_eq!(again.confidence, original.confidence);
    }

    // ── On-device ──

    #[test]
    fn test_on_device_known_label() {
        let prediction = Prediction {
            label: "pizza".to_string(),
            confidence: 82.0,
        };
        let result = normalize(RawPayload::OnDevice(&prediction)).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].name, "Pizza");
        assert_eq!(result.totals.calories, 266.0);
        assert_eq!(result.confidence, Confidence::High);
    }

    #[test]
    fn test_on_device_confidence_buckets() {
        for (score, expected) in [(70.0, Confidence::High), (55.0, Confidence::Medium), (31.0, Confidence::Low)] {
            let prediction = Prediction {
                label: "banana".to_string(),
                confidence: score,
            };
            assert_eq!(normalize(RawPayload::OnDevice(&prediction)).unwrap().confidence, expected);
        }
    }

    #[test]
    fn test_on_device_unknown_label() {
        let prediction = Prediction {
            label: "mystery_stew_xyz".to_string(),
            confidence: 95.0,
        };
        let result = normalize(RawPayload::OnDevice(&prediction)).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].name, "mystery stew xyz");
        assert_eq!(result.items[0].calories, 0.0);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn test_on_device_empty_label() {
        let prediction = Prediction {
            label: "  ".to_string(),
            confidence: 95.0,
        };
        assert_eq!(normalize(RawPayload::OnDevice(&prediction)), Err(NormalizationError::Empty));
    }

    // ── In-process ──

    #[test]
    fn test_caption_match_is_medium() {
        let result = normalize(RawPayload::InProcess("a slice of pizza on a white plate")).unwrap();
        assert_eq!(result.items[0].name, "Pizza");
        assert_eq!(result.confidence, Confidence::Medium);
        assert_eq!(result.description, "a slice of pizza on a white plate");
    }

    #[test]
    fn test_caption_without_keyword_is_low() {
        let result = normalize(RawPayload::InProcess("a blurry photo of a table")).unwrap();
        assert_eq!(result.items.len(), 1);
        assert_eq!(result.items[0].name, "a blurry photo of a table");
        assert_eq!(result.totals.calories, 0.0);
        assert_eq!(result.confidence, Confidence::Low);
    }

    #[test]
    fn test_empty_caption() {
        assert_eq!(normalize(RawPayload::InProcess("")), Err(NormalizationError::Empty));
    }
}
