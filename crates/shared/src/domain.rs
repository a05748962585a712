use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

use crate::error::ParseSortError;

/// Lesson identifier as issued by the lesson service. Some deployments use
/// integer keys, others use opaque document ids.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum LessonId {
    Number(i64),
    Text(String),
}

impl fmt::Display for LessonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Number(value) => write!(f, "{value}"),
            Self::Text(value) => f.write_str(value),
        }
    }
}

impl From<i64> for LessonId {
    fn from(value: i64) -> Self {
        Self::Number(value)
    }
}

impl From<i32> for LessonId {
    fn from(value: i32) -> Self {
        Self::Number(i64::from(value))
    }
}

impl From<&str> for LessonId {
    fn from(value: &str) -> Self {
        Self::Text(value.to_string())
    }
}

impl FromStr for LessonId {
    type Err = std::convert::Infallible;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        Ok(match raw.parse::<i64>() {
            Ok(value) => Self::Number(value),
            Err(_) => Self::Text(raw.to_string()),
        })
    }
}

/// Lessons always serialize their identifier as `id`. On input a document
/// store `_id` takes precedence over a seeded `id` when a record has both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "LessonRecord")]
pub struct Lesson {
    pub id: LessonId,
    pub subject: String,
    pub location: String,
    pub price: f64,
    pub spaces: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub icon: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
}

impl Lesson {
    pub fn new(
        id: impl Into<LessonId>,
        subject: impl Into<String>,
        location: impl Into<String>,
        price: f64,
        spaces: u32,
    ) -> Self {
        Self {
            id: id.into(),
            subject: subject.into(),
            location: location.into(),
            price,
            spaces,
            icon: None,
            description: None,
        }
    }

    pub fn is_sold_out(&self) -> bool {
        self.spaces == 0
    }
}

#[derive(Deserialize)]
struct LessonRecord {
    #[serde(rename = "_id", default)]
    document_id: Option<LessonId>,
    #[serde(default)]
    id: Option<LessonId>,
    subject: String,
    location: String,
    price: f64,
    spaces: u32,
    #[serde(default)]
    icon: Option<String>,
    #[serde(default)]
    description: Option<String>,
}

impl TryFrom<LessonRecord> for Lesson {
    type Error = String;

    fn try_from(record: LessonRecord) -> Result<Self, Self::Error> {
        let id = record
            .document_id
            .or(record.id)
            .ok_or_else(|| "lesson record has neither `_id` nor `id`".to_string())?;
        Ok(Self {
            id,
            subject: record.subject,
            location: record.location,
            price: record.price,
            spaces: record.spaces,
            icon: record.icon,
            description: record.description,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortField {
    #[default]
    Subject,
    Location,
    Price,
    Spaces,
}

impl SortField {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Subject => "subject",
            Self::Location => "location",
            Self::Price => "price",
            Self::Spaces => "spaces",
        }
    }
}

impl FromStr for SortField {
    type Err = ParseSortError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "subject" => Ok(Self::Subject),
            "location" => Ok(Self::Location),
            "price" => Ok(Self::Price),
            "spaces" => Ok(Self::Spaces),
            other => Err(ParseSortError::UnknownField(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    #[default]
    Ascending,
    Descending,
}

impl SortDirection {
    pub fn reversed(self) -> Self {
        match self {
            Self::Ascending => Self::Descending,
            Self::Descending => Self::Ascending,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Ascending => "asc",
            Self::Descending => "desc",
        }
    }
}

impl FromStr for SortDirection {
    type Err = ParseSortError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "asc" | "ascending" => Ok(Self::Ascending),
            "desc" | "descending" => Ok(Self::Descending),
            other => Err(ParseSortError::UnknownDirection(other.to_string())),
        }
    }
}

/// Sort key plus direction, written as `<field>-<asc|desc>` on the command
/// line and in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub struct SortSpec {
    pub field: SortField,
    pub direction: SortDirection,
}

impl SortSpec {
    pub fn new(field: SortField, direction: SortDirection) -> Self {
        Self { field, direction }
    }

    pub fn ascending(field: SortField) -> Self {
        Self::new(field, SortDirection::Ascending)
    }

    pub fn descending(field: SortField) -> Self {
        Self::new(field, SortDirection::Descending)
    }

    pub fn toggled(self) -> Self {
        Self {
            field: self.field,
            direction: self.direction.reversed(),
        }
    }
}

impl fmt::Display for SortSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.field.as_str(), self.direction.as_str())
    }
}

impl FromStr for SortSpec {
    type Err = ParseSortError;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let raw = raw.trim();
        if raw.is_empty() {
            return Err(ParseSortError::Empty);
        }
        match raw.split_once('-') {
            Some((field, direction)) => Ok(Self::new(field.parse()?, direction.parse()?)),
            None => Ok(Self::ascending(raw.parse()?)),
        }
    }
}
