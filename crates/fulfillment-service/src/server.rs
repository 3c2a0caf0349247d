//! HTTP server for the fulfillment API.
//!
//! A thin layer mapping routes onto engine operations one-to-one. The
//! acting party arrives in every mutating request body; the engine
//! trusts it, since authentication happens upstream of this service.

use axum::{
	extract::{Path, Query, State},
	response::Json,
	routing::{get, post},
	Router,
};
use fulfillment_config::ApiConfig;
use fulfillment_core::{FulfillmentEngine, OrderView};
use fulfillment_types::{
	ActionRequest, ActorRole, ApiError, AssignCourierRequest, CancelRequest, CreateOrderRequest,
	Order, PermittedActionsResponse, ProposePriceRequest, SellerApproveRequest,
	SubmitPaymentRequest, SuspendRequest,
};
use serde::Deserialize;
use std::sync::Arc;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;

/// Shared application state for the API server.
#[derive(Clone)]
pub struct AppState {
	/// Reference to the fulfillment engine for processing requests.
	pub engine: Arc<FulfillmentEngine>,
}

/// Builds the API router over the given engine.
pub fn build_router(engine: Arc<FulfillmentEngine>) -> Router {
	let state = AppState { engine };

	Router::new()
		.nest(
			"/api",
			Router::new()
				.route("/orders", post(create_order))
				.route("/orders/{id}", get(get_order))
				.route("/orders/{id}/actions", get(permitted_actions))
				.route("/orders/{id}/payments", post(submit_payment))
				.route("/orders/{id}/payments/verify", post(verify_payment))
				.route("/orders/{id}/admin-approve", post(admin_approve))
				.route("/orders/{id}/price-proposals", post(propose_price))
				.route("/orders/{id}/price-proposals/approve", post(approve_price))
				.route("/orders/{id}/price-proposals/reject", post(reject_price))
				.route("/orders/{id}/seller-approve", post(seller_approve))
				.route("/orders/{id}/start-work", post(start_work))
				.route("/orders/{id}/complete-work", post(complete_work))
				.route("/orders/{id}/assign-courier", post(assign_courier))
				.route("/orders/{id}/pickup", post(pickup))
				.route("/orders/{id}/deliver", post(deliver))
				.route("/orders/{id}/suspend", post(suspend))
				.route("/orders/{id}/confirm-receipt", post(confirm_receipt))
				.route("/orders/{id}/cancel", post(cancel)),
		)
		.layer(ServiceBuilder::new().layer(CorsLayer::permissive()))
		.with_state(state)
}

/// Starts the HTTP server for the fulfillment API.
pub async fn start_server(
	api_config: ApiConfig,
	engine: Arc<FulfillmentEngine>,
) -> Result<(), Box<dyn std::error::Error>> {
	let app = build_router(engine);

	let bind_address = format!("{}:{}", api_config.host, api_config.port);
	let listener = TcpListener::bind(&bind_address).await?;

	tracing::info!("Fulfillment API server starting on {}", bind_address);

	axum::serve(listener, app)
		.with_graceful_shutdown(async {
			let _ = tokio::signal::ctrl_c().await;
		})
		.await?;

	Ok(())
}

async fn create_order(
	State(state): State<AppState>,
	Json(request): Json<CreateOrderRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.create_order(&request.actor, request.draft)
		.await?;
	Ok(Json(order))
}

async fn get_order(
	State(state): State<AppState>,
	Path(id): Path<String>,
) -> Result<Json<OrderView>, ApiError> {
	let view = state.engine.get_order(&id).await?;
	Ok(Json(view))
}

/// Query string for the permitted-actions endpoint.
#[derive(Debug, Deserialize)]
struct ActionsQuery {
	role: ActorRole,
}

async fn permitted_actions(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Query(query): Query<ActionsQuery>,
) -> Result<Json<PermittedActionsResponse>, ApiError> {
	let actions = state.engine.permitted_actions(&id, query.role).await?;
	Ok(Json(PermittedActionsResponse {
		order_id: id,
		actions,
	}))
}

async fn submit_payment(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<SubmitPaymentRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.submit_payment(&id, &request.actor, request.kind, request.proof)
		.await?;
	Ok(Json(order))
}

async fn verify_payment(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.verify_payment(&id, &request.actor).await?;
	Ok(Json(order))
}

async fn admin_approve(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.admin_approve(&id, &request.actor).await?;
	Ok(Json(order))
}

async fn propose_price(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ProposePriceRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.propose_price(&id, &request.actor, request.proposed_price)
		.await?;
	Ok(Json(order))
}

async fn approve_price(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.approve_price(&id, &request.actor).await?;
	Ok(Json(order))
}

async fn reject_price(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.reject_price(&id, &request.actor).await?;
	Ok(Json(order))
}

async fn seller_approve(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<SellerApproveRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.seller_approve(
			&id,
			&request.actor,
			&request.pickup_address,
			request.completion_deadline,
		)
		.await?;
	Ok(Json(order))
}

async fn start_work(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.start_work(&id, &request.actor).await?;
	Ok(Json(order))
}

async fn complete_work(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.complete_work(&id, &request.actor).await?;
	Ok(Json(order))
}

async fn assign_courier(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<AssignCourierRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.assign_courier(&id, &request.actor, &request.courier_id)
		.await?;
	Ok(Json(order))
}

async fn pickup(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.pickup(&id, &request.actor).await?;
	Ok(Json(order))
}

async fn deliver(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.deliver(&id, &request.actor).await?;
	Ok(Json(order))
}

async fn suspend(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<SuspendRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.suspend(&id, &request.actor, &request.reason)
		.await?;
	Ok(Json(order))
}

async fn confirm_receipt(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<ActionRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state.engine.confirm_receipt(&id, &request.actor).await?;
	Ok(Json(order))
}

async fn cancel(
	State(state): State<AppState>,
	Path(id): Path<String>,
	Json(request): Json<CancelRequest>,
) -> Result<Json<Order>, ApiError> {
	let order = state
		.engine
		.cancel(&id, &request.actor, request.reason)
		.await?;
	Ok(Json(order))
}
