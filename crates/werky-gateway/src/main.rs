use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result as AnyResult;
use axum::{
    Json, Router,
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{delete, get, post},
};
use chrono::Utc;
use rust_decimal::Decimal;
use tracing::{error, info};
use uuid::Uuid;
use werky_chat::{ChatMessage, Messenger};
use werky_core::{DocumentStore, Filter, JOBS, Job, MarketError, Offer, Order, OrderBy, USERS, User};
use werky_orders::{OfferDraft, OfferLifecycle, OrderParty};
use werky_platform::{
    CHANNEL_OFFER_ACCEPTED, CHANNEL_OFFER_DECLINED, CHANNEL_ORDER_STATUS, CreateJobRequest,
    CreateUserRequest, EventBus, ListJobsQuery, ListOffersQuery, ListOrdersQuery, ListUsersQuery,
    OfferAcceptedEvent, OfferDeclinedEvent, OrderStatusChangedEvent, SendMessageRequest,
    ServiceConfig, SubmitOfferRequest, UpdateOrderStatusRequest, connect_database,
};
use werky_store::PgStore;

#[derive(Clone)]
struct AppState {
    store: Arc<dyn DocumentStore>,
    lifecycle: OfferLifecycle,
    messenger: Messenger,
    bus: EventBus,
}

#[tokio::main]
async fn main() -> AnyResult<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "werky_gateway=info".to_string()),
        )
        .init();

    let config = ServiceConfig::from_env("0.0.0.0:8080")?;
    let pool = connect_database(&config.database_url).await?;
    let store: Arc<dyn DocumentStore> = Arc::new(PgStore::connect(pool).await?);
    let bus = EventBus::connect(&config.redis_url)?;

    let state = AppState {
        lifecycle: OfferLifecycle::new(store.clone()),
        messenger: Messenger::new(store.clone()),
        store,
        bus,
    };

    let router = Router::new()
        .route("/healthz", get(healthz))
        .route("/offers", get(list_offers).post(submit_offer))
        .route("/offers/{offer_id}/accept", post(accept_offer))
        .route("/offers/{offer_id}/decline", post(decline_offer))
        .route("/orders", get(list_orders))
        .route("/orders/{order_id}/status", post(update_order_status))
        .route("/messages", post(send_message))
        .route("/conversations/{user_a}/{user_b}", get(get_conversation))
        .route("/chats/{user}/partners", get(list_partners))
        .route("/jobs", get(list_jobs).post(create_job))
        .route("/users", get(list_users).post(create_user))
        .route("/users/{user_id}", delete(delete_user))
        .with_state(state);

    let addr: SocketAddr = config.http_addr.parse()?;
    info!("gateway listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;

    Ok(())
}

async fn healthz() -> &'static str {
    "ok"
}

async fn submit_offer(
    State(state): State<AppState>,
    Json(payload): Json<SubmitOfferRequest>,
) -> Result<(StatusCode, Json<Offer>), (StatusCode, String)> {
    let draft = OfferDraft {
        title: payload.title,
        delivery_time_days: payload.delivery_time_days,
        revisions: payload.revisions,
        price: payload.price,
        service: payload.service,
        description: payload.description,
        recruiter_email: payload.recruiter_email,
        freelancer_email: payload.freelancer_email,
    };

    let offer = state
        .lifecycle
        .submit_offer(draft)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(offer)))
}

async fn list_offers(
    State(state): State<AppState>,
    Query(query): Query<ListOffersQuery>,
) -> Result<Json<Vec<Offer>>, (StatusCode, String)> {
    state
        .lifecycle
        .pending_offers(&query.recruiter_email)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn accept_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
) -> Result<Json<Order>, (StatusCode, String)> {
    let order = state
        .lifecycle
        .accept_offer(&offer_id)
        .await
        .map_err(error_response)?;

    let event = OfferAcceptedEvent {
        order_id: order.id.clone(),
        recruiter_email: order.recruiter_email.clone(),
        freelancer_email: order.freelancer_email.clone(),
    };
    if let Err(err) = state.bus.publish(CHANNEL_OFFER_ACCEPTED, &event).await {
        error!("failed to publish offer-accepted event: {err:#}");
    }

    Ok(Json(order))
}

async fn decline_offer(
    State(state): State<AppState>,
    Path(offer_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .lifecycle
        .decline_offer(&offer_id)
        .await
        .map_err(error_response)?;

    let event = OfferDeclinedEvent {
        offer_id: offer_id.clone(),
    };
    if let Err(err) = state.bus.publish(CHANNEL_OFFER_DECLINED, &event).await {
        error!("failed to publish offer-declined event: {err:#}");
    }

    Ok(StatusCode::NO_CONTENT)
}

async fn list_orders(
    State(state): State<AppState>,
    Query(query): Query<ListOrdersQuery>,
) -> Result<Json<Vec<Order>>, (StatusCode, String)> {
    let party = match (&query.recruiter_email, &query.freelancer_email) {
        (Some(email), None) => OrderParty::Recruiter(email.as_str()),
        (None, Some(email)) => OrderParty::Freelancer(email.as_str()),
        _ => {
            return Err((
                StatusCode::BAD_REQUEST,
                "exactly one of recruiter_email or freelancer_email is required".to_string(),
            ));
        }
    };

    state
        .lifecycle
        .orders_for(party)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn update_order_status(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
    Json(payload): Json<UpdateOrderStatusRequest>,
) -> Result<Json<Order>, (StatusCode, String)> {
    let order = state
        .lifecycle
        .update_order_status(&order_id, payload.status)
        .await
        .map_err(error_response)?;

    let event = OrderStatusChangedEvent {
        order_id: order.id.clone(),
        status: order.status,
    };
    if let Err(err) = state.bus.publish(CHANNEL_ORDER_STATUS, &event).await {
        error!("failed to publish order-status event: {err:#}");
    }

    Ok(Json(order))
}

async fn send_message(
    State(state): State<AppState>,
    Json(payload): Json<SendMessageRequest>,
) -> Result<(StatusCode, Json<ChatMessage>), (StatusCode, String)> {
    let message = state
        .messenger
        .send_message(&payload.from, &payload.to, &payload.text)
        .await
        .map_err(error_response)?;
    Ok((StatusCode::CREATED, Json(message)))
}

async fn get_conversation(
    State(state): State<AppState>,
    Path((user_a, user_b)): Path<(String, String)>,
) -> Result<Json<Vec<ChatMessage>>, (StatusCode, String)> {
    state
        .messenger
        .transcript(&user_a, &user_b)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn list_partners(
    State(state): State<AppState>,
    Path(user): Path<String>,
) -> Result<Json<Vec<String>>, (StatusCode, String)> {
    state
        .messenger
        .partners_of(&user)
        .await
        .map(Json)
        .map_err(error_response)
}

async fn create_job(
    State(state): State<AppState>,
    Json(payload): Json<CreateJobRequest>,
) -> Result<(StatusCode, Json<Job>), (StatusCode, String)> {
    validate_job(&payload).map_err(error_response)?;

    let job = Job {
        id: Uuid::new_v4().to_string(),
        title: payload.title.trim().to_string(),
        description: payload.description.trim().to_string(),
        category: payload.category.trim().to_string(),
        budget: payload.budget,
        recruiter_email: payload.recruiter_email.trim().to_string(),
        image_url: payload.image_url,
        created_at: Utc::now(),
    };
    let data = serde_json::to_value(&job).map_err(internal_error)?;

    state
        .store
        .create(JOBS, Some(job.id.clone()), data)
        .await
        .map_err(error_response)?;
    info!(job_id = %job.id, recruiter = %job.recruiter_email, "job posted");

    Ok((StatusCode::CREATED, Json(job)))
}

async fn list_jobs(
    State(state): State<AppState>,
    Query(query): Query<ListJobsQuery>,
) -> Result<Json<Vec<Job>>, (StatusCode, String)> {
    let filters: Vec<Filter> = query
        .category
        .as_deref()
        .map(|category| vec![Filter::eq("category", category)])
        .unwrap_or_default();

    let docs = state
        .store
        .query(JOBS, &filters, OrderBy::Timestamp)
        .await
        .map_err(error_response)?;
    let jobs = docs
        .into_iter()
        .map(|doc| doc.decode())
        .collect::<Result<Vec<Job>, MarketError>>()
        .map_err(error_response)?;

    Ok(Json(jobs))
}

async fn create_user(
    State(state): State<AppState>,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<User>), (StatusCode, String)> {
    validate_user(&payload).map_err(error_response)?;

    let user = User {
        id: Uuid::new_v4().to_string(),
        display_name: payload.display_name.trim().to_string(),
        email: payload.email.trim().to_string(),
        role: payload.role.trim().to_string(),
        image_url: payload.image_url,
        created_at: Utc::now(),
    };
    let data = serde_json::to_value(&user).map_err(internal_error)?;

    state
        .store
        .create(USERS, Some(user.id.clone()), data)
        .await
        .map_err(error_response)?;
    info!(user_id = %user.id, role = %user.role, "user added");

    Ok((StatusCode::CREATED, Json(user)))
}

async fn list_users(
    State(state): State<AppState>,
    Query(query): Query<ListUsersQuery>,
) -> Result<Json<Vec<User>>, (StatusCode, String)> {
    let filters: Vec<Filter> = query
        .role
        .as_deref()
        .map(|role| vec![Filter::eq("role", role)])
        .unwrap_or_default();

    let docs = state
        .store
        .query(USERS, &filters, OrderBy::Timestamp)
        .await
        .map_err(error_response)?;
    let users = docs
        .into_iter()
        .map(|doc| doc.decode())
        .collect::<Result<Vec<User>, MarketError>>()
        .map_err(error_response)?;

    Ok(Json(users))
}

async fn delete_user(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<StatusCode, (StatusCode, String)> {
    state
        .store
        .delete(USERS, &user_id)
        .await
        .map_err(error_response)?;
    info!(user_id = %user_id, "user removed");
    Ok(StatusCode::NO_CONTENT)
}

fn validate_user(payload: &CreateUserRequest) -> Result<(), MarketError> {
    let mut missing = Vec::new();
    if payload.display_name.trim().is_empty() {
        missing.push("display_name");
    }
    if payload.email.trim().is_empty() {
        missing.push("email");
    }
    if payload.role.trim().is_empty() {
        missing.push("role");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MarketError::validation(missing))
    }
}

fn validate_job(payload: &CreateJobRequest) -> Result<(), MarketError> {
    let mut missing = Vec::new();
    if payload.title.trim().is_empty() {
        missing.push("title");
    }
    if payload.description.trim().is_empty() {
        missing.push("description");
    }
    if payload.category.trim().is_empty() {
        missing.push("category");
    }
    if payload.budget < Decimal::ZERO {
        missing.push("budget");
    }
    if payload.recruiter_email.trim().is_empty() {
        missing.push("recruiter_email");
    }

    if missing.is_empty() {
        Ok(())
    } else {
        Err(MarketError::validation(missing))
    }
}

fn error_response(err: MarketError) -> (StatusCode, String) {
    let status = match &err {
        MarketError::Validation { .. } => StatusCode::BAD_REQUEST,
        MarketError::NotFound { .. } => StatusCode::NOT_FOUND,
        MarketError::InvalidTransition { .. } => StatusCode::CONFLICT,
        MarketError::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

fn internal_error<E: std::fmt::Display>(err: E) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
}
