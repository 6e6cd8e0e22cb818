use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use super::value_objects::{FieldPath, PathSegment, PlanError};

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UserDetails {
    pub name: String,
    pub email: String,
    pub phone_number: String,
    pub passport_nationality: String,
    pub home_address: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PersonDetails {
    pub name: String,
    pub age: Option<u32>,
    pub gender: String,
    pub relation_to_user: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Preferences {
    pub travel_theme: Vec<String>,
    pub cuisine_preferences: Vec<String>,
    pub dietary_restrictions: Vec<String>,
    pub interests: Vec<String>,
    pub hotel_type: String,
    pub flight_seat_type: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ScheduleItem {
    pub activity_type: String,
    pub start_time: String,
    pub end_time: String,
    pub description: String,
    pub details: Map<String, Value>,
    pub booking_status: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Day {
    pub day_number: Option<u32>,
    pub date: String,
    pub schedule: Vec<ScheduleItem>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Itinerary {
    pub trip_name: String,
    pub origin: String,
    pub destination: String,
    pub start_date: String,
    pub end_date: String,
    pub days: Vec<Day>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ExpenseBreakdown {
    pub flights: Option<f64>,
    pub hotels: Option<f64>,
    pub food: Option<f64>,
    pub activities: Option<f64>,
    pub transport: Option<f64>,
    pub miscellaneous: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Budget {
    pub total_budget: Option<f64>,
    pub currency: String,
    pub expense_breakdown: ExpenseBreakdown,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CurrencyExchange {
    pub from_currency: String,
    pub to_currency: String,
    pub exchange_rate: Option<f64>,
    pub last_updated: String,
}

/// One entry of the user-visible conversation log
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanMessage {
    pub sender: String,
    pub message: String,
    pub timestamp: String,
    pub message_type: String,
    #[serde(rename = "activityType", skip_serializing_if = "Option::is_none")]
    pub activity_type: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub activity_object: Option<String>,
}

/// Durable, user-visible plan document
///
/// Edited either wholesale or through [`PlanState::with_update`], which
/// re-validates the result against this shape so a bad path or a mistyped
/// value never reaches storage.
///
/// # Example
/// ```
/// use tripmesh_api::domain::plan::PlanState;
/// use serde_json::json;
///
/// let plan = PlanState::default()
///     .with_update(&"budget.total_budget".parse().unwrap(), json!(500.0))
///     .expect("valid update");
/// assert_eq!(plan.budget.total_budget, Some(500.0));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PlanState {
    pub user_details: UserDetails,
    pub persons_details: Vec<PersonDetails>,
    pub preferences: Preferences,
    pub itinerary: Itinerary,
    pub budget: Budget,
    pub currency_exchange: CurrencyExchange,
    /// Latest answer of each specialist, keyed by source agent
    pub specialist_results: BTreeMap<String, Value>,
    pub itinerary_created: bool,
    pub messages: Vec<PlanMessage>,
    pub typing: bool,
}

impl PlanState {
    /// Returns a copy with `value` written at `path`.
    ///
    /// A record value is merged key by key into an existing record at the
    /// path; anything else replaces the leaf. Missing map entries along the
    /// way are created; sequence indices must already exist.
    pub fn with_update(&self, path: &FieldPath, value: Value) -> Result<PlanState, PlanError> {
        let mut document = serde_json::to_value(self)?;
        write_at(&mut document, path, value)?;
        Ok(serde_json::from_value(document)?)
    }
}

fn write_at(root: &mut Value, path: &FieldPath, value: Value) -> Result<(), PlanError> {
    let mut slot = root;
    for segment in path.segments() {
        slot = step(slot, segment, path)?;
    }

    match (slot, value) {
        (Value::Object(existing), Value::Object(incoming)) => {
            for (key, child) in incoming {
                existing.insert(key, child);
            }
        }
        (slot, value) => *slot = value,
    }
    Ok(())
}

fn step<'a>(
    current: &'a mut Value,
    segment: &PathSegment,
    path: &FieldPath,
) -> Result<&'a mut Value, PlanError> {
    if current.is_null() {
        *current = Value::Object(Map::new());
    }

    match (current, segment) {
        (Value::Object(map), PathSegment::Field(name)) => {
            Ok(map.entry(name.clone()).or_insert(Value::Null))
        }
        (Value::Object(map), PathSegment::Index(index)) => {
            Ok(map.entry(index.to_string()).or_insert(Value::Null))
        }
        (Value::Array(items), PathSegment::Index(index)) => {
            items
                .get_mut(*index)
                .ok_or_else(|| PlanError::PathNotFound {
                    path: path.to_string(),
                    segment: segment.to_string(),
                })
        }
        _ => Err(PlanError::NotTraversable(path.to_string())),
    }
}
