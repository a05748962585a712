use serde::{Deserialize, Serialize};

use crate::domain::LessonId;

pub fn lessons_route() -> &'static str {
    "/lessons"
}

pub fn search_route() -> &'static str {
    "/search"
}

pub fn orders_route() -> &'static str {
    "/orders"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchQuery {
    pub q: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    #[serde(rename = "lessonId")]
    pub lesson_id: LessonId,
    pub qty: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub name: String,
    pub phone: String,
    #[serde(rename = "lessonIDs")]
    pub lesson_ids: Vec<OrderLine>,
    pub total: f64,
}

impl OrderRequest {
    pub fn item_count(&self) -> u32 {
        self.lesson_ids.iter().map(|line| line.qty).sum()
    }
}

/// Optional body of a successful order response.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct OrderAck {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
