use std::sync::Arc;

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use ulid::Ulid;

use crate::engine::{ConfigPatch, Engine, EngineError, Page};

use super::error::{ApiError, ApiJson, ApiPath, ApiQuery, ApiResult};
use super::model::*;

#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<Engine>,
}

fn resolve(engine: &Engine, key: &str) -> Result<Ulid, EngineError> {
    engine
        .resolve_booking_id(key)
        .ok_or_else(|| EngineError::NotFound(format!("booking {key}")))
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse { status: "ok" })
}

// ── Studio ───────────────────────────────────────────────────────

pub async fn show_config(State(state): State<AppState>) -> Json<ConfigResponse> {
    let snapshot = state.engine.config_snapshot().await;
    Json(ConfigResponse::from(snapshot.as_ref()))
}

pub async fn update_config(
    State(state): State<AppState>,
    ApiJson(patch): ApiJson<ConfigPatch>,
) -> ApiResult<Json<ConfigResponse>> {
    let snapshot = state.engine.update_config(patch).await?;
    Ok(Json(ConfigResponse::from(snapshot.as_ref())))
}

pub async fn studio_status(State(state): State<AppState>) -> ApiResult<Json<StudioStatusResponse>> {
    let status = state.engine.studio_status().await?;
    Ok(Json(status.into()))
}

pub async fn daily_schedule(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<DateQuery>,
) -> ApiResult<Json<DailyScheduleResponse>> {
    let date = query.date.unwrap_or_else(|| state.engine.today());
    let schedule = state.engine.daily_schedule(date).await?;
    Ok(Json(schedule.into()))
}

pub async fn check_availability(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<CheckAvailabilityQuery>,
) -> ApiResult<Json<AvailabilityResponse>> {
    let check = state
        .engine
        .check_availability(query.date, query.time, query.package, query.people.unwrap_or(1))
        .await?;
    Ok(Json(check.into()))
}

// ── Packages ─────────────────────────────────────────────────────

pub async fn list_packages(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PackagesQuery>,
) -> Json<Vec<crate::model::Package>> {
    Json(state.engine.packages(query.include_inactive.unwrap_or(false)))
}

pub async fn show_package(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u32>,
) -> ApiResult<Json<crate::model::Package>> {
    Ok(Json(state.engine.package(id)?))
}

pub async fn save_package(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u32>,
    ApiJson(req): ApiJson<PackageRequest>,
) -> ApiResult<Json<crate::model::Package>> {
    let package = state.engine.save_package(req.into_package(id)).await?;
    Ok(Json(package))
}

pub async fn package_slots(
    State(state): State<AppState>,
    ApiPath(id): ApiPath<u32>,
    ApiQuery(query): ApiQuery<SlotsQuery>,
) -> ApiResult<Json<PackageSlotsResponse>> {
    let people = query.people.unwrap_or(1);
    let slots = state.engine.available_slots(query.date, id, people).await?;
    Ok(Json(PackageSlotsResponse {
        package_id: id,
        date: query.date,
        number_of_people: people,
        slots: slots.into_iter().map(SlotResponse::from).collect(),
    }))
}

// ── Bookings ─────────────────────────────────────────────────────

async fn create(
    state: &AppState,
    req: CreateBookingRequest,
    default_people: Option<u32>,
) -> ApiResult<(StatusCode, Json<BookingResponse>)> {
    let request = req
        .into_booking_request(default_people)
        .ok_or_else(|| ApiError::bad_request("number_of_people is required"))?;
    let booking = state.engine.create_booking(request).await?;
    Ok((StatusCode::CREATED, Json(booking.into())))
}

pub async fn create_booking(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateBookingRequest>,
) -> ApiResult<(StatusCode, Json<BookingResponse>)> {
    create(&state, req, None).await
}

/// Same as [`create_booking`] but a missing party size means one person.
pub async fn quick_booking(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CreateBookingRequest>,
) -> ApiResult<(StatusCode, Json<BookingResponse>)> {
    create(&state, req, Some(1)).await
}

pub async fn show_booking(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
) -> ApiResult<Json<BookingResponse>> {
    let booking = state.engine.get_booking(&key).await?;
    Ok(Json(booking.into()))
}

pub async fn booking_history(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<HistoryQuery>,
) -> ApiResult<Json<Page<BookingResponse>>> {
    let page = state
        .engine
        .booking_history(
            query.phone.as_deref(),
            query.email.as_deref(),
            query.page,
            query.page_size,
        )
        .await?;
    Ok(Json(page.map(BookingResponse::from)))
}

pub async fn upcoming_bookings(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PageQuery>,
) -> ApiResult<Json<Page<BookingResponse>>> {
    let page = state
        .engine
        .upcoming_bookings(query.page, query.page_size)
        .await?;
    Ok(Json(page.map(BookingResponse::from)))
}

pub async fn reschedule_booking(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
    ApiJson(req): ApiJson<RescheduleRequest>,
) -> ApiResult<Json<BookingResponse>> {
    let id = resolve(&state.engine, &key)?;
    let booking = state
        .engine
        .reschedule_booking(id, req.new_date, req.new_time)
        .await?;
    Ok(Json(booking.into()))
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
    body: Option<ApiJson<CancelRequest>>,
) -> ApiResult<Json<BookingResponse>> {
    let id = resolve(&state.engine, &key)?;
    let reason = body
        .and_then(|ApiJson(req)| req.reason)
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    let booking = state.engine.cancel_booking(id, reason).await?;
    Ok(Json(booking.into()))
}

pub async fn record_payment(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
    ApiJson(req): ApiJson<PaymentRequest>,
) -> ApiResult<Json<BookingResponse>> {
    let id = resolve(&state.engine, &key)?;
    let booking = state
        .engine
        .record_payment(id, req.payment_status, req.payment_reference)
        .await?;
    Ok(Json(booking.into()))
}

// ── Front desk ───────────────────────────────────────────────────

pub async fn assign_wheels(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
    body: Option<ApiJson<AssignWheelsRequest>>,
) -> ApiResult<Json<BookingResponse>> {
    let id = resolve(&state.engine, &key)?;
    let wheel_numbers = body.and_then(|ApiJson(req)| req.wheel_numbers);
    let booking = state.engine.assign_wheels(id, wheel_numbers).await?;
    Ok(Json(booking.into()))
}

pub async fn check_in(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
) -> ApiResult<Json<BookingResponse>> {
    let id = resolve(&state.engine, &key)?;
    Ok(Json(state.engine.check_in(id).await?.into()))
}

pub async fn check_out(
    State(state): State<AppState>,
    ApiPath(key): ApiPath<String>,
) -> ApiResult<Json<BookingResponse>> {
    let id = resolve(&state.engine, &key)?;
    Ok(Json(state.engine.check_out(id).await?.into()))
}
