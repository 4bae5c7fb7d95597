//! Core domain model and record normalization for the EONET ingest service.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value as JsonValue;
use thiserror::Error;

pub const CRATE_NAME: &str = "eonet-core";

/// Polymorphic category identifier as it arrives from the feed.
///
/// EONET serves category ids inconsistently: integers in some payloads,
/// floats or numeric strings in others, and occasionally nothing at all.
/// Every JSON input maps to one of these variants; resolution to an
/// integer is total and never errors.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
#[serde(untagged)]
pub enum CategoryId {
    Integer(i64),
    Float(f64),
    Text(String),
    #[default]
    Absent,
}

impl<'de> Deserialize<'de> for CategoryId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        let value = JsonValue::deserialize(deserializer)?;
        Ok(match value {
            JsonValue::Number(n) => match n.as_i64() {
                Some(i) => CategoryId::Integer(i),
                None => CategoryId::Float(n.as_f64().unwrap_or(0.0)),
            },
            JsonValue::String(s) => CategoryId::Text(s),
            _ => CategoryId::Absent,
        })
    }
}

impl CategoryId {
    /// Total conversion to an integer id: integers pass through, floats
    /// truncate toward zero, strings parse base-10, everything else is 0.
    pub fn resolve(&self) -> i64 {
        match self {
            CategoryId::Integer(i) => *i,
            CategoryId::Float(f) => *f as i64,
            CategoryId::Text(s) => s.parse::<i64>().unwrap_or(0),
            CategoryId::Absent => 0,
        }
    }
}

/// Top-level payload returned by the events endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EonetResponse {
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub events: Vec<Event>,
    #[serde(default)]
    pub categories: Vec<Category>,
}

/// A natural event as served by the feed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Event {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub categories: Vec<EventCategory>,
    #[serde(default)]
    pub sources: Vec<Source>,
    #[serde(default)]
    pub geometry: Vec<Geometry>,
    /// Close timestamp as served; `None` means the event is still open.
    #[serde(default)]
    pub closed: Option<String>,
}

/// Category reference embedded in an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EventCategory {
    #[serde(default)]
    pub id: CategoryId,
    #[serde(default)]
    pub title: String,
}

/// A standalone category as served by the categories endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Category {
    #[serde(default)]
    pub id: CategoryId,
    #[serde(default)]
    pub title: String,
    #[serde(default)]
    pub link: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub layers: String,
}

/// External data source attribution for an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Source {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub title: String,
}

/// One dated geometry observation attached to an event.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Geometry {
    #[serde(default)]
    pub date: DateTime<Utc>,
    #[serde(default, rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub coordinates: Coordinates,
}

/// Coordinate payload carried by a geometry. Opaque beyond its nesting
/// depth: a bare point, a linear ring, or a polygon of rings. Round-trips
/// through serde unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Coordinates {
    Point(Vec<f64>),
    Ring(Vec<Vec<f64>>),
    Polygon(Vec<Vec<Vec<f64>>>),
}

impl Default for Coordinates {
    fn default() -> Self {
        Coordinates::Point(Vec::new())
    }
}

/// Normalization failure for a single event record.
#[derive(Debug, Error)]
pub enum NormalizeError {
    #[error("event is missing required field `{field}`")]
    MissingField { field: &'static str },
    #[error("serializing {field} for event {event_id}: {source}")]
    Serialize {
        field: &'static str,
        event_id: String,
        #[source]
        source: serde_json::Error,
    },
}

/// Flattened, storage-ready projection of an [`Event`].
///
/// Nested collections are carried as opaque JSON text rather than child
/// tables; embedded category ids are resolved to integers on the way in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventRecord {
    pub id: String,
    pub title: String,
    pub description: String,
    pub link: String,
    pub categories_json: String,
    pub sources_json: String,
    pub geometry_json: String,
    pub closed: Option<String>,
}

#[derive(Serialize)]
struct ResolvedEventCategory<'a> {
    id: i64,
    title: &'a str,
}

impl EventRecord {
    /// Normalize a raw feed event into its storage projection.
    ///
    /// A failure here concerns only this record; callers skip it and
    /// continue with the rest of the batch.
    pub fn from_event(event: &Event) -> Result<Self, NormalizeError> {
        if event.id.is_empty() {
            return Err(NormalizeError::MissingField { field: "id" });
        }
        if event.title.is_empty() {
            return Err(NormalizeError::MissingField { field: "title" });
        }

        let categories: Vec<ResolvedEventCategory<'_>> = event
            .categories
            .iter()
            .map(|c| ResolvedEventCategory {
                id: c.id.resolve(),
                title: &c.title,
            })
            .collect();

        Ok(Self {
            id: event.id.clone(),
            title: event.title.clone(),
            description: event.description.clone(),
            link: event.link.clone(),
            categories_json: serialize_field("categories", &event.id, &categories)?,
            sources_json: serialize_field("sources", &event.id, &event.sources)?,
            geometry_json: serialize_field("geometry", &event.id, &event.geometry)?,
            closed: event.closed.clone(),
        })
    }
}

fn serialize_field<T: Serialize>(
    field: &'static str,
    event_id: &str,
    value: &T,
) -> Result<String, NormalizeError> {
    serde_json::to_string(value).map_err(|source| NormalizeError::Serialize {
        field,
        event_id: event_id.to_string(),
        source,
    })
}

/// Flattened, storage-ready projection of a [`Category`]. Total: category
/// normalization cannot fail by construction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoryRecord {
    pub id: i64,
    pub title: String,
    pub link: String,
    pub description: String,
    pub layers: String,
}

impl CategoryRecord {
    pub fn from_category(category: &Category) -> Self {
        Self {
            id: category.id.resolve(),
            title: category.title.clone(),
            link: category.link.clone(),
            description: category.description.clone(),
            layers: category.layers.clone(),
        }
    }
}

/// Terminal-or-running state of one ingest run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::fmt::Display for RunStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Durable record of one ingest run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub id: i64,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    pub status: String,
    pub events_processed: i32,
    pub categories_processed: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn resolve_is_total_over_every_id_shape() {
        assert_eq!(CategoryId::Integer(8).resolve(), 8);
        assert_eq!(CategoryId::Float(8.9).resolve(), 8);
        assert_eq!(CategoryId::Float(-3.7).resolve(), -3);
        assert_eq!(CategoryId::Text("8".to_string()).resolve(), 8);
        assert_eq!(CategoryId::Text("wildfires".to_string()).resolve(), 0);
        assert_eq!(CategoryId::Text(String::new()).resolve(), 0);
        assert_eq!(CategoryId::Absent.resolve(), 0);
    }

    #[test]
    fn category_id_deserializes_from_any_json_type() {
        let cases = vec![
            (json!(8), CategoryId::Integer(8)),
            (json!(8.5), CategoryId::Float(8.5)),
            (json!("8"), CategoryId::Text("8".to_string())),
            (json!("severeStorms"), CategoryId::Text("severeStorms".to_string())),
            (json!(null), CategoryId::Absent),
            (json!(true), CategoryId::Absent),
            (json!({"nested": 1}), CategoryId::Absent),
        ];
        for (input, expected) in cases {
            let parsed: CategoryId = serde_json::from_value(input.clone()).unwrap();
            assert_eq!(parsed, expected, "input {input}");
        }
    }

    #[test]
    fn category_id_absent_when_field_missing() {
        let category: Category = serde_json::from_value(json!({ "title": "Wildfires" })).unwrap();
        assert_eq!(category.id, CategoryId::Absent);
        assert_eq!(category.id.resolve(), 0);
    }

    #[test]
    fn coordinates_round_trip_each_shape() {
        let shapes = vec![
            json!([-120.5, 37.8]),
            json!([[0.0, 0.0], [1.0, 0.0], [1.0, 1.0], [0.0, 0.0]]),
            json!([[[0.0, 0.0], [2.0, 0.0], [2.0, 2.0], [0.0, 0.0]]]),
        ];
        for input in shapes {
            let parsed: Coordinates = serde_json::from_value(input.clone()).unwrap();
            let back = serde_json::to_value(&parsed).unwrap();
            assert_eq!(back, input);
        }
        assert!(matches!(
            serde_json::from_value::<Coordinates>(json!([-120.5, 37.8])).unwrap(),
            Coordinates::Point(_)
        ));
    }

    fn wildfire_event() -> Event {
        serde_json::from_value(json!({
            "id": "EONET_1",
            "title": "Sierra Wildfire",
            "categories": [{"id": "8", "title": "Wildfires"}],
            "sources": [{"id": "InciWeb", "url": "https://inciweb.example/1", "title": "InciWeb"}],
            "geometry": [{"date": "2026-08-01T12:00:00Z", "type": "Point", "coordinates": [-120.5, 37.8]}]
        }))
        .unwrap()
    }

    #[test]
    fn event_record_resolves_embedded_category_ids() {
        let record = EventRecord::from_event(&wildfire_event()).unwrap();
        assert_eq!(record.id, "EONET_1");
        assert_eq!(record.closed, None);

        let categories: JsonValue = serde_json::from_str(&record.categories_json).unwrap();
        assert_eq!(categories[0]["id"], json!(8));
        assert_eq!(categories[0]["title"], json!("Wildfires"));

        let geometry: JsonValue = serde_json::from_str(&record.geometry_json).unwrap();
        assert_eq!(geometry[0]["type"], json!("Point"));
        assert_eq!(geometry[0]["coordinates"], json!([-120.5, 37.8]));

        let sources: JsonValue = serde_json::from_str(&record.sources_json).unwrap();
        assert_eq!(sources[0]["id"], json!("InciWeb"));
    }

    #[test]
    fn event_record_rejects_missing_required_fields() {
        let mut event = wildfire_event();
        event.title = String::new();
        let err = EventRecord::from_event(&event).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingField { field: "title" }));

        event = wildfire_event();
        event.id = String::new();
        let err = EventRecord::from_event(&event).unwrap_err();
        assert!(matches!(err, NormalizeError::MissingField { field: "id" }));
    }

    #[test]
    fn category_record_is_total() {
        let category = Category {
            id: CategoryId::Text("8".to_string()),
            title: "Wildfires".to_string(),
            link: "https://eonet.example/categories/8".to_string(),
            description: "Fires".to_string(),
            layers: String::new(),
        };
        let record = CategoryRecord::from_category(&category);
        assert_eq!(record.id, 8);
        assert_eq!(record.title, "Wildfires");

        let unparsable = Category {
            id: CategoryId::Text("volcanoes".to_string()),
            ..category
        };
        assert_eq!(CategoryRecord::from_category(&unparsable).id, 0);
    }

    #[test]
    fn run_status_labels_are_stable() {
        assert_eq!(RunStatus::Running.as_str(), "running");
        assert_eq!(RunStatus::Completed.as_str(), "completed");
        assert_eq!(RunStatus::Failed.as_str(), "failed");
    }
}
