use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a plan document: one user's one itinerary
///
/// # Example
/// ```
/// use tripmesh_api::domain::plan::PlanKey;
///
/// let key = PlanKey::new("user-1", "trip-9").expect("valid key");
/// assert_eq!(key.user_id(), "user-1");
/// assert!(PlanKey::new("", "trip-9").is_err());
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PlanKey {
    user_id: String,
    plan_id: String,
}

impl PlanKey {
    /// Creates a key, rejecting empty identifiers
    pub fn new(user_id: impl Into<String>, plan_id: impl Into<String>) -> Result<Self, String> {
        let user_id = user_id.into();
        let plan_id = plan_id.into();
        if user_id.trim().is_empty() {
            return Err("user_id cannot be empty".to_string());
        }
        if plan_id.trim().is_empty() {
            return Err("plan_id cannot be empty".to_string());
        }
        Ok(Self { user_id, plan_id })
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    pub fn plan_id(&self) -> &str {
        &self.plan_id
    }
}

impl fmt::Display for PlanKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.user_id, self.plan_id)
    }
}

/// One step of a [`FieldPath`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// Named field of a record, or key of a map
    Field(String),
    /// Position in a sequence (or a numeric map key)
    Index(usize),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Field(name) => f.write_str(name),
            PathSegment::Index(index) => write!(f, "{index}"),
        }
    }
}

/// Location inside a plan document, e.g. `budget.currency` or
/// `itinerary.days.0.schedule`
///
/// # Example
/// ```
/// use tripmesh_api::domain::plan::{FieldPath, PathSegment};
///
/// let path: FieldPath = "persons_details.1.name".parse().unwrap();
/// assert_eq!(path.segments()[1], PathSegment::Index(1));
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    segments: Vec<PathSegment>,
}

impl FieldPath {
    pub fn new(segments: Vec<PathSegment>) -> Result<Self, PlanError> {
        if segments.is_empty() {
            return Err(PlanError::InvalidPath("path is empty".to_string()));
        }
        Ok(Self { segments })
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    /// Path to a key under a map field, e.g. `specialist_results.<source>`
    pub fn field(parent: &str, key: &str) -> Result<Self, PlanError> {
        if parent.is_empty() || key.is_empty() {
            return Err(PlanError::InvalidPath(format!("{parent}.{key}")));
        }
        Self::new(vec![
            PathSegment::Field(parent.to_string()),
            PathSegment::Field(key.to_string()),
        ])
    }
}

impl std::str::FromStr for FieldPath {
    type Err = PlanError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let segments = raw
            .split('.')
            .map(|segment| {
                if segment.is_empty() {
                    return Err(PlanError::InvalidPath(raw.to_string()));
                }
                Ok(match segment.parse::<usize>() {
                    Ok(index) => PathSegment::Index(index),
                    Err(_) => PathSegment::Field(segment.to_string()),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;
        Self::new(segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for segment in &self.segments {
            if !first {
                f.write_str(".")?;
            }
            first = false;
            write!(f, "{segment}")?;
        }
        Ok(())
    }
}

/// Errors raised while editing a plan document
#[derive(Debug, thiserror::Error)]
pub enum PlanError {
    #[error("invalid field path: {0}")]
    InvalidPath(String),

    #[error("path {path} does not exist (stopped at {segment})")]
    PathNotFound { path: String, segment: String },

    #[error("cannot descend into a scalar at {0}")]
    NotTraversable(String),

    #[error("update does not fit the plan document: {0}")]
    SchemaViolation(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plan_key_rejects_blank_ids() {
        assert!(PlanKey::new("u", "p").is_ok());
        assert!(PlanKey::new(" ", "p").is_err());
        assert!(PlanKey::new("u", "").is_err());
    }

    #[test]
    fn field_path_parses_fields_and_indices() {
        let path: FieldPath = "itinerary.days.2.schedule".parse().unwrap();
        assert_eq!(
            path.segments(),
            &[
                PathSegment::Field("itinerary".to_string()),
                PathSegment::Field("days".to_string()),
                PathSegment::Index(2),
                PathSegment::Field("schedule".to_string()),
            ]
        );
        assert_eq!(path.to_string(), "itinerary.days.2.schedule");
    }

    #[test]
    fn field_path_rejects_empty_segments() {
        assert!("".parse::<FieldPath>().is_err());
        assert!("budget..currency".parse::<FieldPath>().is_err());
        assert!("budget.".parse::<FieldPath>().is_err());
    }

    #[test]
    fn field_helper_builds_two_step_path() {
        let path = FieldPath::field("specialist_results", "flight_agent").unwrap();
        assert_eq!(path.to_string(), "specialist_results.flight_agent");
    }
}
