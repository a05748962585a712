use std::{collections::HashSet, time::Duration};

use async_trait::async_trait;
use reqwest::{Client, Response};
use shared::{
    domain::Lesson,
    error::ApiError,
    protocol::{lessons_route, orders_route, search_route, OrderAck, OrderRequest},
};
use tracing::{debug, info, warn};
use url::Url;

use crate::error::ServiceError;

/// Remote lesson catalog and order intake.
#[async_trait]
pub trait LessonService: Send + Sync {
    async fn list_lessons(&self) -> Result<Vec<Lesson>, ServiceError>;
    async fn search_lessons(&self, query: &str) -> Result<Vec<Lesson>, ServiceError>;
    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, ServiceError>;
}

pub struct MissingLessonService;

#[async_trait]
impl LessonService for MissingLessonService {
    async fn list_lessons(&self) -> Result<Vec<Lesson>, ServiceError> {
        Err(ServiceError::Unavailable)
    }

    async fn search_lessons(&self, _query: &str) -> Result<Vec<Lesson>, ServiceError> {
        Err(ServiceError::Unavailable)
    }

    async fn submit_order(&self, _order: &OrderRequest) -> Result<OrderAck, ServiceError> {
        Err(ServiceError::Unavailable)
    }
}

pub struct HttpLessonService {
    http: Client,
    base_url: Url,
}

impl HttpLessonService {
    pub fn new(base_url: &str) -> Result<Self, ServiceError> {
        Ok(Self {
            http: Client::new(),
            base_url: normalize_base_url(base_url)?,
        })
    }

    pub fn with_timeout(base_url: &str, timeout: Duration) -> Result<Self, ServiceError> {
        let http = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: normalize_base_url(base_url)?,
        })
    }

    pub fn base_url(&self) -> &Url {
        &self.base_url
    }

    fn endpoint(&self, route: &str) -> Result<Url, ServiceError> {
        self.base_url
            .join(route.trim_start_matches('/'))
            .map_err(|err| ServiceError::InvalidBaseUrl {
                url: self.base_url.to_string(),
                reason: err.to_string(),
            })
    }

    async fn fetch_lessons(&self, url: Url) -> Result<Vec<Lesson>, ServiceError> {
        debug!(%url, "lesson service: GET");
        let res = self.http.get(url).send().await?;
        let body = read_success_body(res).await?;
        parse_lessons(&body)
    }
}

#[async_trait]
impl LessonService for HttpLessonService {
    async fn list_lessons(&self) -> Result<Vec<Lesson>, ServiceError> {
        let url = self.endpoint(lessons_route())?;
        self.fetch_lessons(url).await
    }

    async fn search_lessons(&self, query: &str) -> Result<Vec<Lesson>, ServiceError> {
        let mut url = self.endpoint(search_route())?;
        url.query_pairs_mut().append_pair("q", query);
        self.fetch_lessons(url).await
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, ServiceError> {
        let url = self.endpoint(orders_route())?;
        info!(
            lines = order.lesson_ids.len(),
            total = order.total,
            "lesson service: submitting order"
        );
        let res = self.http.post(url).json(order).send().await?;
        let body = read_success_body(res).await?;
        if body.trim().is_empty() {
            return Ok(OrderAck::default());
        }
        Ok(serde_json::from_str::<OrderAck>(&body).unwrap_or_else(|err| {
            debug!("lesson service: order acknowledged with unparsed body: {err}");
            OrderAck::default()
        }))
    }
}

/// Parses the service root and makes sure relative routes resolve beneath it,
/// so `http://host/api` serves `http://host/api/lessons`.
pub fn normalize_base_url(raw: &str) -> Result<Url, ServiceError> {
    let raw = raw.trim();
    let invalid = |reason: String| ServiceError::InvalidBaseUrl {
        url: raw.to_string(),
        reason,
    };

    let mut url = Url::parse(raw).map_err(|err| invalid(err.to_string()))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
    }
    if url.cannot_be_a_base() {
        return Err(invalid("url cannot be a base".to_string()));
    }
    url.set_query(None);
    url.set_fragment(None);
    if !url.path().ends_with('/') {
        let path = format!("{}/", url.path());
        url.set_path(&path);
    }
    Ok(url)
}

async fn read_success_body(res: Response) -> Result<String, ServiceError> {
    let status = res.status();
    let body = res.text().await?;
    if status.is_success() {
        return Ok(body);
    }
    let message = ApiError::from_body(&body).map(|err| err.message);
    warn!(
        status = status.as_u16(),
        message = message.as_deref().unwrap_or(""),
        "lesson service: request rejected"
    );
    Err(ServiceError::Status {
        status: status.as_u16(),
        message,
    })
}

fn parse_lessons(body: &str) -> Result<Vec<Lesson>, ServiceError> {
    let lessons: Vec<Lesson> =
        serde_json::from_str(body).map_err(|err| ServiceError::Malformed(err.to_string()))?;

    let mut seen = HashSet::with_capacity(lessons.len());
    for lesson in &lessons {
        if !lesson.price.is_finite() || lesson.price < 0.0 {
            return Err(ServiceError::Malformed(format!(
                "lesson {} has invalid price {}",
                lesson.id, lesson.price
            )));
        }
        if !seen.insert(&lesson.id) {
            return Err(ServiceError::Malformed(format!(
                "duplicate lesson id {}",
                lesson.id
            )));
        }
    }
    Ok(lessons)
}
