use std::sync::Arc;

use serde::Serialize;
use shared::{
    domain::{Lesson, LessonId, SortSpec},
    protocol::{OrderAck, OrderRequest},
};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

pub mod cart;
pub mod catalog;
pub mod checkout;
pub mod error;
pub mod service;
pub mod status;

pub use cart::{AddOutcome, Cart, CartLine, CartTotals};
pub use catalog::FilterScope;
pub use checkout::{CheckoutForm, CheckoutPhase, CheckoutValidation};
pub use error::{CheckoutError, ServiceError};
pub use service::{HttpLessonService, LessonService, MissingLessonService};
pub use status::StatusMessage;

#[derive(Debug, Clone)]
pub enum BookingEvent {
    LessonsUpdated { count: usize },
    CartChanged(CartTotals),
    CheckoutPhaseChanged(CheckoutPhase),
    StatusChanged(StatusMessage),
}

#[derive(Debug, Clone, Copy, Default)]
pub struct BookingOptions {
    pub sort: SortSpec,
    pub filter_scope: FilterScope,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchOutcome {
    Applied { count: usize },
    /// A newer search was issued while this one was in flight.
    Stale,
}

#[derive(Debug, Clone)]
pub struct OrderConfirmation {
    pub order: OrderRequest,
    pub ack: OrderAck,
}

/// Read-only copy of the booking state for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct BookingSnapshot {
    pub visible_lessons: Vec<Lesson>,
    pub cart: Vec<CartLine>,
    pub totals: CartTotals,
    pub form: CheckoutForm,
    pub validation: CheckoutValidation,
    pub phase: CheckoutPhase,
    pub status: Option<StatusMessage>,
    pub search_query: String,
    pub sort: SortSpec,
}

struct BookingState {
    lessons: Vec<Lesson>,
    cart: Cart,
    search_query: String,
    sort: SortSpec,
    filter_scope: FilterScope,
    form: CheckoutForm,
    phase: CheckoutPhase,
    status: Option<StatusMessage>,
    latest_search: u64,
}

impl BookingState {
    fn new(options: BookingOptions) -> Self {
        Self {
            lessons: Vec::new(),
            cart: Cart::default(),
            search_query: String::new(),
            sort: options.sort,
            filter_scope: options.filter_scope,
            form: CheckoutForm::default(),
            phase: CheckoutPhase::Empty,
            status: None,
            latest_search: 0,
        }
    }

    fn visible_lessons(&self) -> Vec<Lesson> {
        catalog::visible_lessons(
            &self.lessons,
            &self.search_query,
            self.sort,
            self.filter_scope,
        )
    }
}

/// Booking view-model: owns the lesson catalog mirror, the cart and the
/// checkout form, and talks to a [`LessonService`]. The state lock is never
/// held across a service call.
pub struct BookingClient {
    service: Arc<dyn LessonService>,
    inner: Mutex<BookingState>,
    events: broadcast::Sender<BookingEvent>,
}

impl BookingClient {
    pub fn new(service: Arc<dyn LessonService>) -> Arc<Self> {
        Self::new_with_options(service, BookingOptions::default())
    }

    pub fn new_with_options(service: Arc<dyn LessonService>, options: BookingOptions) -> Arc<Self> {
        let (events, _) = broadcast::channel(256);
        Arc::new(Self {
            service,
            inner: Mutex::new(BookingState::new(options)),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<BookingEvent> {
        self.events.subscribe()
    }

    fn emit(&self, event: BookingEvent) {
        let _ = self.events.send(event);
    }

    fn set_status(&self, state: &mut BookingState, status: StatusMessage) {
        state.status = Some(status.clone());
        self.emit(BookingEvent::StatusChanged(status));
    }

    fn set_phase(&self, state: &mut BookingState, phase: CheckoutPhase) {
        if state.phase != phase {
            state.phase = phase.clone();
            self.emit(BookingEvent::CheckoutPhaseChanged(phase));
        }
    }

    /// Replaces the lesson catalog with the service's answer for `query`:
    /// the full list when empty, a server-side search otherwise. `query`
    /// becomes the current search text.
    pub async fn search(&self, query: &str) -> Result<SearchOutcome, ServiceError> {
        self.run_search(Some(query.to_string()), true).await
    }

    /// Re-runs the current search against the service.
    pub async fn refresh(&self) -> Result<SearchOutcome, ServiceError> {
        self.run_search(None, true).await
    }

    /// Input-change handler for the search box.
    pub async fn update_search_query(
        &self,
        query: impl Into<String>,
    ) -> Result<SearchOutcome, ServiceError> {
        self.run_search(Some(query.into()), true).await
    }

    /// `None` re-runs the stored query. The query and its sequence number are
    /// recorded together so the newest response always filters by its own
    /// text.
    async fn run_search(
        &self,
        query: Option<String>,
        report_failure: bool,
    ) -> Result<SearchOutcome, ServiceError> {
        let (seq, current) = {
            let mut guard = self.inner.lock().await;
            if let Some(query) = query {
                guard.search_query = query;
            }
            guard.latest_search += 1;
            (guard.latest_search, guard.search_query.clone())
        };
        let query = current.as_str();

        let result = if query.is_empty() {
            self.service.list_lessons().await
        } else {
            self.service.search_lessons(query).await
        };

        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        if seq < state.latest_search {
            debug!(
                seq,
                latest = state.latest_search,
                query,
                "booking: discarding stale search response"
            );
            return Ok(SearchOutcome::Stale);
        }

        match result {
            Ok(lessons) => {
                state.lessons = lessons;
                state.cart.reapply_reservations(&mut state.lessons);
                let count = state.lessons.len();
                info!(seq, query, count, "booking: lesson catalog replaced");
                self.emit(BookingEvent::LessonsUpdated { count });
                Ok(SearchOutcome::Applied { count })
            }
            Err(err) => {
                warn!(seq, query, "booking: lesson fetch failed: {err}");
                if report_failure {
                    self.set_status(state, StatusMessage::LessonsUnavailable);
                }
                Err(err)
            }
        }
    }

    pub async fn visible_lessons(&self) -> Vec<Lesson> {
        self.inner.lock().await.visible_lessons()
    }

    pub async fn set_sort(&self, sort: SortSpec) {
        self.inner.lock().await.sort = sort;
    }

    pub async fn toggle_sort_direction(&self) -> SortSpec {
        let mut guard = self.inner.lock().await;
        guard.sort = guard.sort.toggled();
        guard.sort
    }

    pub async fn set_filter_scope(&self, scope: FilterScope) {
        self.inner.lock().await.filter_scope = scope;
    }

    pub async fn add_to_cart(&self, lesson_id: &LessonId) -> AddOutcome {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        if state.phase.is_submitting() {
            debug!(lesson_id = %lesson_id, "booking: cart locked while order is in flight");
            return AddOutcome::CheckoutPending;
        }
        let outcome = state.cart.add(&mut state.lessons, lesson_id);
        if outcome.is_added() {
            self.emit(BookingEvent::CartChanged(state.cart.totals()));
        }
        outcome
    }

    /// Returns `None` when there is no such line, or while an order is in
    /// flight.
    pub async fn remove_from_cart(&self, lesson_id: &LessonId) -> Option<CartLine> {
        let mut guard = self.inner.lock().await;
        let state = &mut *guard;
        if state.phase.is_submitting() {
            debug!(lesson_id = %lesson_id, "booking: cart locked while order is in flight");
            return None;
        }
        let removed = state.cart.remove(&mut state.lessons, lesson_id);
        if removed.is_some() {
            self.emit(BookingEvent::CartChanged(state.cart.totals()));
        }
        removed
    }

    pub async fn cart_lines(&self) -> Vec<CartLine> {
        self.inner.lock().await.cart.lines().to_vec()
    }

    pub async fn cart_totals(&self) -> CartTotals {
        self.inner.lock().await.cart.totals()
    }

    pub async fn set_name(&self, name: impl Into<String>) {
        let mut guard = self.inner.lock().await;
        guard.form.name = name.into();
        let phase = guard.phase.after_edit(&guard.form);
        self.set_phase(&mut guard, phase);
    }

    pub async fn set_phone(&self, phone: impl Into<String>) {
        let mut guard = self.inner.lock().await;
        guard.form.phone = phone.into();
        let phase = guard.phase.after_edit(&guard.form);
        self.set_phase(&mut guard, phase);
    }

    pub async fn validate_checkout(&self) -> CheckoutValidation {
        let guard = self.inner.lock().await;
        CheckoutValidation::evaluate(&guard.form, &guard.cart)
    }

    /// Submits the cart as an order. The cart is locked while the order is in
    /// flight. On success the ordered lines and the form are cleared and the
    /// catalog is re-fetched; on failure both are kept so the user can retry.
    pub async fn checkout(&self) -> Result<OrderConfirmation, CheckoutError> {
        let order = {
            let mut guard = self.inner.lock().await;
            if guard.phase.is_submitting() {
                debug!("booking: checkout ignored, order already in flight");
                return Err(CheckoutError::InFlight);
            }
            let validation = CheckoutValidation::evaluate(&guard.form, &guard.cart);
            if !validation.is_enabled() {
                debug!(%validation, "booking: checkout disabled");
                return Err(CheckoutError::Disabled(validation));
            }
            let order = checkout::build_order(&guard.form, &guard.cart);
            self.set_phase(&mut guard, CheckoutPhase::Submitting);
            order
        };

        match self.service.submit_order(&order).await {
            Ok(ack) => {
                {
                    let mut guard = self.inner.lock().await;
                    let state = &mut *guard;
                    state.cart.settle(&order.lesson_ids);
                    state.form.clear();
                    self.emit(BookingEvent::CartChanged(state.cart.totals()));
                    self.set_phase(state, CheckoutPhase::Confirmed);
                    self.set_status(
                        state,
                        StatusMessage::OrderConfirmed {
                            name: order.name.clone(),
                            items: order.item_count(),
                        },
                    );
                }
                info!(
                    items = order.item_count(),
                    total = order.total,
                    "booking: order confirmed"
                );

                if let Err(err) = self.run_search(None, false).await {
                    warn!("booking: post-order refresh failed: {err}");
                }
                Ok(OrderConfirmation { order, ack })
            }
            Err(err) => {
                let mut guard = self.inner.lock().await;
                let status = match &err {
                    ServiceError::Status { message, .. } => StatusMessage::OrderRejected {
                        message: message.clone(),
                    },
                    _ => StatusMessage::ServiceError,
                };
                self.set_phase(
                    &mut guard,
                    CheckoutPhase::Failed {
                        message: status.to_string(),
                    },
                );
                self.set_status(&mut guard, status);
                warn!("booking: order failed: {err}");
                Err(err.into())
            }
        }
    }

    pub async fn phase(&self) -> CheckoutPhase {
        self.inner.lock().await.phase.clone()
    }

    pub async fn status(&self) -> Option<StatusMessage> {
        self.inner.lock().await.status.clone()
    }

    pub async fn snapshot(&self) -> BookingSnapshot {
        let guard = self.inner.lock().await;
        BookingSnapshot {
            visible_lessons: guard.visible_lessons(),
            cart: guard.cart.lines().to_vec(),
            totals: guard.cart.totals(),
            form: guard.form.clone(),
            validation: CheckoutValidation::evaluate(&guard.form, &guard.cart),
            phase: guard.phase.clone(),
            status: guard.status.clone(),
            search_query: guard.search_query.clone(),
            sort: guard.sort,
        }
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
