use super::*;
use async_trait::async_trait;
use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde_json::{json, Value};
use shared::{
    domain::{SortDirection, SortField},
    protocol::SearchQuery,
};
use tokio::{net::TcpListener, sync::oneshot};

#[derive(Clone, Copy)]
enum OrderBehaviour {
    Accept,
    Reject,
    Unavailable,
}

struct Gate {
    started: oneshot::Sender<()>,
    release: oneshot::Receiver<()>,
}

/// In-process lesson service that books spaces like the real one.
struct FakeLessonService {
    lessons: Mutex<Vec<Lesson>>,
    calls: Mutex<Vec<String>>,
    orders: Mutex<Vec<OrderRequest>>,
    order_behaviour: OrderBehaviour,
    search_gate: Mutex<Option<(String, Gate)>>,
    order_gate: Mutex<Option<Gate>>,
}

impl FakeLessonService {
    fn with_lessons(lessons: Vec<Lesson>) -> Self {
        Self {
            lessons: Mutex::new(lessons),
            calls: Mutex::new(Vec::new()),
            orders: Mutex::new(Vec::new()),
            order_behaviour: OrderBehaviour::Accept,
            search_gate: Mutex::new(None),
            order_gate: Mutex::new(None),
        }
    }

    fn rejecting_orders(mut self, behaviour: OrderBehaviour) -> Self {
        self.order_behaviour = behaviour;
        self
    }

    async fn gate_search(&self, query: &str) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.search_gate.lock().await = Some((
            query.to_string(),
            Gate {
                started: started_tx,
                release: release_rx,
            },
        ));
        (started_rx, release_tx)
    }

    async fn gate_orders(&self) -> (oneshot::Receiver<()>, oneshot::Sender<()>) {
        let (started_tx, started_rx) = oneshot::channel();
        let (release_tx, release_rx) = oneshot::channel();
        *self.order_gate.lock().await = Some(Gate {
            started: started_tx,
            release: release_rx,
        });
        (started_rx, release_tx)
    }

    async fn calls(&self) -> Vec<String> {
        self.calls.lock().await.clone()
    }
}

async fn wait_on(gate: Option<Gate>) {
    if let Some(gate) = gate {
        let _ = gate.started.send(());
        let _ = gate.release.await;
    }
}

#[async_trait]
impl LessonService for FakeLessonService {
    async fn list_lessons(&self) -> Result<Vec<Lesson>, ServiceError> {
        self.calls.lock().await.push("list".to_string());
        Ok(self.lessons.lock().await.clone())
    }

    async fn search_lessons(&self, query: &str) -> Result<Vec<Lesson>, ServiceError> {
        self.calls.lock().await.push(format!("search:{query}"));
        let gate = {
            let mut slot = self.search_gate.lock().await;
            match slot.take() {
                Some((gated, gate)) if gated == query => Some(gate),
                other => {
                    *slot = other;
                    None
                }
            }
        };
        wait_on(gate).await;

        let needle = query.to_lowercase();
        Ok(self
            .lessons
            .lock()
            .await
            .iter()
            .filter(|lesson| {
                lesson.subject.to_lowercase().contains(&needle)
                    || lesson.location.to_lowercase().contains(&needle)
            })
            .cloned()
            .collect())
    }

    async fn submit_order(&self, order: &OrderRequest) -> Result<OrderAck, ServiceError> {
        self.calls.lock().await.push("order".to_string());
        let gate = self.order_gate.lock().await.take();
        wait_on(gate).await;
        self.orders.lock().await.push(order.clone());

        match self.order_behaviour {
            OrderBehaviour::Accept => {
                let mut lessons = self.lessons.lock().await;
                for line in &order.lesson_ids {
                    if let Some(lesson) = lessons.iter_mut().find(|l| l.id == line.lesson_id) {
                        lesson.spaces = lesson.spaces.saturating_sub(line.qty);
                    }
                }
                Ok(OrderAck::default())
            }
            OrderBehaviour::Reject => Err(ServiceError::Status {
                status: 409,
                message: Some("Not enough spaces".to_string()),
            }),
            OrderBehaviour::Unavailable => Err(ServiceError::Unavailable),
        }
    }
}

fn catalog() -> Vec<Lesson> {
    vec![
        Lesson::new(1, "Mathematics", "Hendon", 100.0, 5),
        Lesson::new(2, "Science", "Colindale", 50.0, 5),
        Lesson::new(3, "Music", "Brent Cross", 90.0, 1),
    ]
}

async fn loaded_client(service: Arc<FakeLessonService>) -> Arc<BookingClient> {
    let client = BookingClient::new(service);
    client.refresh().await.expect("initial load");
    client
}

async fn fill_form(client: &BookingClient) {
    client.set_name("John Smith").await;
    client.set_phone("5551234").await;
}

async fn spaces_of(client: &BookingClient, id: i64) -> Option<u32> {
    client
        .inner
        .lock()
        .await
        .lessons
        .iter()
        .find(|lesson| lesson.id == LessonId::Number(id))
        .map(|lesson| lesson.spaces)
}

#[tokio::test]
async fn empty_query_lists_every_lesson() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = BookingClient::new(service.clone());

    let outcome = client.search("").await.expect("search");
    assert_eq!(outcome, SearchOutcome::Applied { count: 3 });
    assert_eq!(service.calls().await, vec!["list".to_string()]);

    let subjects: Vec<String> = client
        .visible_lessons()
        .await
        .into_iter()
        .map(|lesson| lesson.subject)
        .collect();
    assert_eq!(subjects, vec!["Mathematics", "Music", "Science"]);
}

#[tokio::test]
async fn search_input_queries_service_and_filters_locally() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service.clone()).await;

    let outcome = client.update_search_query("HENDON").await.expect("search");
    assert_eq!(outcome, SearchOutcome::Applied { count: 1 });
    assert_eq!(service.calls().await.last().map(String::as_str), Some("search:HENDON"));

    let visible = client.visible_lessons().await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].subject, "Mathematics");
    assert_eq!(client.snapshot().await.search_query, "HENDON");
}

#[tokio::test]
async fn sort_changes_apply_to_visible_lessons() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service).await;

    client.set_sort(SortSpec::ascending(SortField::Price)).await;
    let prices: Vec<f64> = client
        .visible_lessons()
        .await
        .iter()
        .map(|lesson| lesson.price)
        .collect();
    assert_eq!(prices, vec![50.0, 90.0, 100.0]);

    let toggled = client.toggle_sort_direction().await;
    assert_eq!(toggled.direction, SortDirection::Descending);
    let prices: Vec<f64> = client
        .visible_lessons()
        .await
        .iter()
        .map(|lesson| lesson.price)
        .collect();
    assert_eq!(prices, vec![100.0, 90.0, 50.0]);
}

#[tokio::test]
async fn stale_search_response_is_discarded() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service.clone()).await;
    let (started, release) = service.gate_search("math").await;

    let slow = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.search("math").await })
    };
    started.await.expect("slow search started");

    let fresh = client.search("sci").await.expect("fresh search");
    assert_eq!(fresh, SearchOutcome::Applied { count: 1 });

    release.send(()).expect("release");
    let slow = slow.await.expect("join").expect("slow search");
    assert_eq!(slow, SearchOutcome::Stale);

    let visible = client.visible_lessons().await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].subject, "Science");
    assert_eq!(client.snapshot().await.search_query, "sci");
}

#[tokio::test]
async fn search_replaces_the_stored_query() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service.clone()).await;

    client.update_search_query("math").await.expect("typed search");
    let outcome = client.search("sci").await.expect("search");
    assert_eq!(outcome, SearchOutcome::Applied { count: 1 });

    let visible = client.visible_lessons().await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].subject, "Science");
    assert_eq!(client.snapshot().await.search_query, "sci");

    client.refresh().await.expect("refresh");
    assert_eq!(service.calls().await.last().map(String::as_str), Some("search:sci"));
}

#[tokio::test]
async fn add_on_sold_out_lesson_is_a_no_op() {
    let mut lessons = catalog();
    lessons[2].spaces = 0;
    let service = Arc::new(FakeLessonService::with_lessons(lessons));
    let client = loaded_client(service).await;
    let mut events = client.subscribe_events();

    let outcome = client.add_to_cart(&LessonId::Number(3)).await;
    assert_eq!(outcome, AddOutcome::SoldOut);
    assert!(client.cart_lines().await.is_empty());
    assert_eq!(spaces_of(&client, 3).await, Some(0));
    assert!(events.try_recv().is_err());
}

#[tokio::test]
async fn add_then_remove_restores_spaces() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service).await;
    let id = LessonId::Number(1);

    assert_eq!(
        client.add_to_cart(&id).await,
        AddOutcome::Added { quantity: 1 }
    );
    assert_eq!(spaces_of(&client, 1).await, Some(4));

    let removed = client.remove_from_cart(&id).await.expect("removed line");
    assert_eq!(removed.quantity, 1);
    assert_eq!(spaces_of(&client, 1).await, Some(5));
    assert!(client.cart_lines().await.is_empty());
}

#[tokio::test]
async fn cart_totals_follow_quantities() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service).await;

    client.add_to_cart(&LessonId::Number(1)).await;
    client.add_to_cart(&LessonId::Number(1)).await;
    client.add_to_cart(&LessonId::Number(2)).await;

    assert_eq!(
        client.cart_totals().await,
        CartTotals {
            items: 3,
            price: 250.0
        }
    );
}

#[tokio::test]
async fn refresh_keeps_cart_reservations() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service.clone()).await;
    client.add_to_cart(&LessonId::Number(2)).await;
    client.add_to_cart(&LessonId::Number(2)).await;

    service.lessons.lock().await[1].spaces = 4;
    client.refresh().await.expect("refresh");

    assert_eq!(spaces_of(&client, 2).await, Some(2));
    assert_eq!(client.cart_totals().await.items, 2);
}

#[tokio::test]
async fn remove_after_sell_out_matches_server_count() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service.clone()).await;
    let id = LessonId::Number(2);
    client.add_to_cart(&id).await;
    client.add_to_cart(&id).await;

    service.lessons.lock().await[1].spaces = 0;
    client.refresh().await.expect("refresh");
    assert_eq!(spaces_of(&client, 2).await, Some(0));

    let removed = client.remove_from_cart(&id).await.expect("removed line");
    assert_eq!(removed.quantity, 2);
    assert_eq!(spaces_of(&client, 2).await, Some(0));
    assert_eq!(client.add_to_cart(&id).await, AddOutcome::SoldOut);
}

#[tokio::test]
async fn checkout_is_rejected_before_any_network_call_when_invalid() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service.clone()).await;
    client.add_to_cart(&LessonId::Number(1)).await;
    client.set_name("John3").await;
    client.set_phone("555-1234").await;

    let validation = client.validate_checkout().await;
    assert!(!validation.name_valid);
    assert!(!validation.phone_valid);

    let err = client.checkout().await.expect_err("should be disabled");
    assert!(matches!(err, CheckoutError::Disabled(_)));
    assert!(!service.calls().await.contains(&"order".to_string()));
    assert_eq!(client.phase().await, CheckoutPhase::Editing);
}

#[tokio::test]
async fn checkout_with_empty_cart_is_disabled() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service).await;
    fill_form(&client).await;

    let validation = client.validate_checkout().await;
    assert!(validation.name_valid && validation.phone_valid);
    assert!(!validation.is_enabled());
    assert!(matches!(
        client.checkout().await,
        Err(CheckoutError::Disabled(_))
    ));
}

#[tokio::test]
async fn end_to_end_booking_of_last_space() {
    let service = Arc::new(FakeLessonService::with_lessons(vec![Lesson::new(
        7, "Drama", "Hendon", 85.0, 1,
    )]));
    let client = loaded_client(service.clone()).await;
    let id = LessonId::Number(7);

    assert_eq!(
        client.add_to_cart(&id).await,
        AddOutcome::Added { quantity: 1 }
    );
    assert_eq!(spaces_of(&client, 7).await, Some(0));
    assert_eq!(client.add_to_cart(&id).await, AddOutcome::SoldOut);
    assert_eq!(client.cart_lines().await[0].quantity, 1);

    fill_form(&client).await;
    let confirmation = client.checkout().await.expect("checkout");
    assert_eq!(confirmation.order.total, 85.0);

    let snapshot = client.snapshot().await;
    assert!(snapshot.cart.is_empty());
    assert_eq!(snapshot.form, CheckoutForm::default());
    assert_eq!(snapshot.phase, CheckoutPhase::Confirmed);
    assert!(snapshot.status.as_ref().is_some_and(StatusMessage::is_success));

    assert_eq!(
        service.calls().await,
        vec!["list".to_string(), "order".to_string(), "list".to_string()]
    );
    assert_eq!(spaces_of(&client, 7).await, Some(0));

    let orders = service.orders.lock().await;
    assert_eq!(orders.len(), 1);
    assert_eq!(orders[0].lesson_ids[0].lesson_id, id);
    assert_eq!(orders[0].lesson_ids[0].qty, 1);
}

#[tokio::test]
async fn rejected_order_keeps_cart_and_form() {
    let service = Arc::new(
        FakeLessonService::with_lessons(catalog()).rejecting_orders(OrderBehaviour::Reject),
    );
    let client = loaded_client(service.clone()).await;
    client.add_to_cart(&LessonId::Number(1)).await;
    fill_form(&client).await;

    let err = client.checkout().await.expect_err("rejected");
    assert!(matches!(err, CheckoutError::Rejected { status: 409, .. }));

    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.cart.len(), 1);
    assert_eq!(snapshot.form.name, "John Smith");
    assert_eq!(
        snapshot.status,
        Some(StatusMessage::OrderRejected {
            message: Some("Not enough spaces".to_string())
        })
    );
    assert!(matches!(snapshot.phase, CheckoutPhase::Failed { .. }));
    assert_eq!(service.calls().await.iter().filter(|c| *c == "list").count(), 1);

    client.set_phone("5550000").await;
    assert_eq!(client.phase().await, CheckoutPhase::Editing);
}

#[tokio::test]
async fn transport_failure_sets_generic_status_and_allows_retry() {
    let service = Arc::new(
        FakeLessonService::with_lessons(catalog()).rejecting_orders(OrderBehaviour::Unavailable),
    );
    let client = loaded_client(service.clone()).await;
    client.add_to_cart(&LessonId::Number(2)).await;
    fill_form(&client).await;

    assert!(matches!(
        client.checkout().await,
        Err(CheckoutError::Service(ServiceError::Unavailable))
    ));
    assert_eq!(client.status().await, Some(StatusMessage::ServiceError));

    assert!(matches!(
        client.checkout().await,
        Err(CheckoutError::Service(_))
    ));
    assert_eq!(service.orders.lock().await.len(), 2);
    assert_eq!(client.cart_lines().await.len(), 1);
}

#[tokio::test]
async fn second_checkout_while_in_flight_is_rejected() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service.clone()).await;
    client.add_to_cart(&LessonId::Number(1)).await;
    fill_form(&client).await;
    let (started, release) = service.gate_orders().await;

    let first = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.checkout().await })
    };
    started.await.expect("order started");
    assert_eq!(client.phase().await, CheckoutPhase::Submitting);

    assert!(matches!(
        client.checkout().await,
        Err(CheckoutError::InFlight)
    ));

    release.send(()).expect("release");
    first.await.expect("join").expect("first checkout");
    assert_eq!(service.orders.lock().await.len(), 1);
}

#[tokio::test]
async fn cart_is_locked_while_order_is_in_flight() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = loaded_client(service.clone()).await;
    let ordered = LessonId::Number(1);
    client.add_to_cart(&ordered).await;
    fill_form(&client).await;
    let (started, release) = service.gate_orders().await;

    let pending = {
        let client = Arc::clone(&client);
        tokio::spawn(async move { client.checkout().await })
    };
    started.await.expect("order started");

    assert_eq!(
        client.add_to_cart(&LessonId::Number(2)).await,
        AddOutcome::CheckoutPending
    );
    assert!(client.remove_from_cart(&ordered).await.is_none());
    assert_eq!(spaces_of(&client, 2).await, Some(5));
    assert_eq!(client.cart_totals().await.items, 1);

    release.send(()).expect("release");
    let confirmation = pending.await.expect("join").expect("checkout");
    assert_eq!(confirmation.order.item_count(), 1);
    assert!(client.cart_lines().await.is_empty());

    assert_eq!(
        client.add_to_cart(&LessonId::Number(2)).await,
        AddOutcome::Added { quantity: 1 }
    );
}

#[tokio::test]
async fn unavailable_service_reports_load_failure() {
    let client = BookingClient::new(Arc::new(MissingLessonService));
    let mut events = client.subscribe_events();

    assert!(matches!(
        client.refresh().await,
        Err(ServiceError::Unavailable)
    ));
    assert_eq!(client.status().await, Some(StatusMessage::LessonsUnavailable));
    assert!(matches!(
        events.try_recv(),
        Ok(BookingEvent::StatusChanged(StatusMessage::LessonsUnavailable))
    ));
}

#[tokio::test]
async fn options_seed_sort_and_scope() {
    let service = Arc::new(FakeLessonService::with_lessons(catalog()));
    let client = BookingClient::new_with_options(
        service,
        BookingOptions {
            sort: SortSpec::descending(SortField::Spaces),
            filter_scope: FilterScope::AllFields,
        },
    );
    client.refresh().await.expect("load");

    let snapshot = client.snapshot().await;
    assert_eq!(snapshot.sort, SortSpec::descending(SortField::Spaces));
    assert_eq!(snapshot.visible_lessons.last().map(|l| l.spaces), Some(1));

    client.inner.lock().await.search_query = "90".to_string();
    let visible = client.visible_lessons().await;
    assert_eq!(visible.len(), 1);
    assert_eq!(visible[0].subject, "Music");
}

// HTTP client against an in-process lesson service.

#[derive(Clone)]
struct ServerState {
    lessons: Arc<Mutex<Vec<Lesson>>>,
    orders: Arc<Mutex<Vec<Value>>>,
    reject_orders: bool,
}

async fn handle_lessons(State(state): State<ServerState>) -> Json<Vec<Lesson>> {
    Json(state.lessons.lock().await.clone())
}

async fn handle_search(
    State(state): State<ServerState>,
    Query(query): Query<SearchQuery>,
) -> Json<Vec<Lesson>> {
    let needle = query.q.to_lowercase();
    Json(
        state
            .lessons
            .lock()
            .await
            .iter()
            .filter(|lesson| lesson.subject.to_lowercase().contains(&needle))
            .cloned()
            .collect(),
    )
}

async fn handle_order(
    State(state): State<ServerState>,
    Json(payload): Json<Value>,
) -> (StatusCode, Json<Value>) {
    state.orders.lock().await.push(payload);
    if state.reject_orders {
        (
            StatusCode::BAD_REQUEST,
            Json(json!({"error": "Lesson is full"})),
        )
    } else {
        (StatusCode::CREATED, Json(json!({"message": "Order created"})))
    }
}

async fn spawn_lesson_server(reject_orders: bool) -> (String, ServerState) {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    let state = ServerState {
        lessons: Arc::new(Mutex::new(catalog())),
        orders: Arc::new(Mutex::new(Vec::new())),
        reject_orders,
    };
    let app = Router::new()
        .route("/api/lessons", get(handle_lessons))
        .route("/api/search", get(handle_search))
        .route("/api/orders", post(handle_order))
        .with_state(state.clone());
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    (format!("http://{addr}/api"), state)
}

#[tokio::test]
async fn http_service_lists_and_searches() {
    let (base_url, _state) = spawn_lesson_server(false).await;
    let service = HttpLessonService::new(&base_url).expect("service");

    let lessons = service.list_lessons().await.expect("list");
    assert_eq!(lessons.len(), 3);

    let found = service.search_lessons("mus ic & more").await.expect("search");
    assert!(found.is_empty());
    let found = service.search_lessons("MUS").await.expect("search");
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].id, LessonId::Number(3));
}

#[tokio::test]
async fn http_service_posts_order_in_service_shape() {
    let (base_url, state) = spawn_lesson_server(false).await;
    let service = Arc::new(HttpLessonService::new(&base_url).expect("service"));
    let client = BookingClient::new(service);
    client.refresh().await.expect("load");
    client.add_to_cart(&LessonId::Number(1)).await;
    client.add_to_cart(&LessonId::Number(1)).await;
    client.add_to_cart(&LessonId::Number(2)).await;
    fill_form(&client).await;

    let confirmation = client.checkout().await.expect("checkout");
    assert_eq!(confirmation.ack.message.as_deref(), Some("Order created"));

    let orders = state.orders.lock().await;
    assert_eq!(
        orders[0],
        json!({
            "name": "John Smith",
            "phone": "5551234",
            "lessonIDs": [
                {"lessonId": 1, "qty": 2},
                {"lessonId": 2, "qty": 1}
            ],
            "total": 250.0
        })
    );
}

#[tokio::test]
async fn http_rejection_surfaces_server_message() {
    let (base_url, _state) = spawn_lesson_server(true).await;
    let service = Arc::new(HttpLessonService::new(&base_url).expect("service"));
    let client = BookingClient::new(service);
    client.refresh().await.expect("load");
    client.add_to_cart(&LessonId::Number(3)).await;
    fill_form(&client).await;

    match client.checkout().await {
        Err(CheckoutError::Rejected { status, message }) => {
            assert_eq!(status, 400);
            assert_eq!(message, "Lesson is full");
        }
        other => panic!("unexpected checkout result: {other:?}"),
    }
    assert_eq!(client.cart_lines().await.len(), 1);
}

#[tokio::test]
async fn http_service_reports_unreachable_server_as_transport_error() {
    std::env::set_var("NO_PROXY", "127.0.0.1,localhost");
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    drop(listener);

    let service = HttpLessonService::with_timeout(
        &format!("http://{addr}"),
        std::time::Duration::from_secs(2),
    )
    .expect("service");
    assert!(matches!(
        service.list_lessons().await,
        Err(ServiceError::Transport(_))
    ));
}
