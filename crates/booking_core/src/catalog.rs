//! Pure lesson list derivations: filtering by search text and sorting by a
//! [`SortSpec`]. Nothing here mutates the source collection.

use std::{cmp::Ordering, fmt, str::FromStr};

use serde::{Deserialize, Serialize};
use shared::domain::{Lesson, SortDirection, SortField, SortSpec};

/// Which lesson fields a search term is matched against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterScope {
    #[default]
    SubjectOrLocation,
    AllFields,
}

impl fmt::Display for FilterScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SubjectOrLocation => "subject_or_location",
            Self::AllFields => "all_fields",
        })
    }
}

impl FromStr for FilterScope {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "subject_or_location" | "subject_location" => Ok(Self::SubjectOrLocation),
            "all_fields" | "all" => Ok(Self::AllFields),
            other => Err(format!("unknown filter scope '{other}'")),
        }
    }
}

pub fn matches_query(lesson: &Lesson, query: &str, scope: FilterScope) -> bool {
    if query.is_empty() {
        return true;
    }
    let needle = query.to_lowercase();
    let contains = |value: &str| value.to_lowercase().contains(&needle);

    match scope {
        FilterScope::SubjectOrLocation => contains(&lesson.subject) || contains(&lesson.location),
        FilterScope::AllFields => {
            contains(&lesson.id.to_string())
                || contains(&lesson.subject)
                || contains(&lesson.location)
                || contains(&lesson.price.to_string())
                || contains(&lesson.spaces.to_string())
                || lesson.icon.as_deref().is_some_and(contains)
                || lesson.description.as_deref().is_some_and(contains)
        }
    }
}

pub fn compare_lessons(a: &Lesson, b: &Lesson, field: SortField) -> Ordering {
    match field {
        SortField::Subject => a.subject.to_lowercase().cmp(&b.subject.to_lowercase()),
        SortField::Location => a.location.to_lowercase().cmp(&b.location.to_lowercase()),
        SortField::Price => a.price.total_cmp(&b.price),
        SortField::Spaces => a.spaces.cmp(&b.spaces),
    }
}

/// Stable in-place sort. Equal keys keep their input order in both directions.
pub fn sort_lessons(lessons: &mut [Lesson], sort: SortSpec) {
    lessons.sort_by(|a, b| {
        let ordering = compare_lessons(a, b, sort.field);
        match sort.direction {
            SortDirection::Ascending => ordering,
            SortDirection::Descending => ordering.reverse(),
        }
    });
}

pub fn visible_lessons(
    lessons: &[Lesson],
    query: &str,
    sort: SortSpec,
    scope: FilterScope,
) -> Vec<Lesson> {
    let mut visible: Vec<Lesson> = lessons
        .iter()
        .filter(|lesson| matches_query(lesson, query, scope))
        .cloned()
        .collect();
    sort_lessons(&mut visible, sort);
    visible
}
