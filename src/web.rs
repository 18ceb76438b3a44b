use std::sync::Arc;

use actix_web::{middleware, web, App, HttpResponse, HttpServer};
use chrono::NaiveDate;
use log::info;
use serde::{Deserialize, Serialize};

use crate::analytics::{clinic_analytics, patient_history, DateRange};
use crate::clock::Clock;
use crate::config::AppConfig;
use crate::error::{QueueError, QueueResult};
use crate::events::{EventSink, FanoutSink, LogSink, RecentEvents};
use crate::export::check_ins_to_csv;
use crate::queue::{CheckInRequest, CheckInStatus, ClinicDay, LocationProof, Priority, QueueEngine};
use crate::store::{
    Clinic, ClinicCounters, MemoryCheckIns, MemoryClinicDirectory, MemoryPatientRegistry, Patient, PatientInfo,
    PatientRegistry,
};

/// Everything the handlers share. Mutable state lives behind the engine's
/// stores, so the struct itself is read-only.
pub struct AppState {
    pub engine: QueueEngine,
    pub patients: Arc<dyn PatientRegistry>,
    pub recent_events: Arc<RecentEvents>,
}

impl AppState {
    /// Wires the in-memory stores, a log sink and the polling feed
    pub fn in_memory(clinics: Vec<Clinic>, config: &AppConfig, clock: Arc<dyn Clock>) -> Self {
        let recent_events = Arc::new(RecentEvents::new(config.event_buffer));
        let sinks: Vec<Arc<dyn EventSink>> = vec![Arc::new(LogSink), recent_events.clone()];
        let engine = QueueEngine::new(
            Arc::new(MemoryCheckIns::new()),
            Arc::new(MemoryClinicDirectory::new(clinics)),
            Arc::new(FanoutSink::new(sinks)),
            clock,
            config.engine_settings(),
        );
        AppState {
            engine,
            patients: Arc::new(MemoryPatientRegistry::new()),
            recent_events,
        }
    }
}

fn ok<T: Serialize>(data: T) -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({"success": true, "data": data}))
}

#[derive(Serialize)]
struct ClinicDetail {
    clinic: Clinic,
    counters: ClinicCounters,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CheckInBody {
    clinic_id: String,
    patient_id: Option<String>,
    patient_info: Option<PatientInfo>,
    visit_reason: String,
    #[serde(default)]
    priority: Priority,
    location: Option<LocationProof>,
}

#[derive(Deserialize)]
pub struct StatusBody {
    status: String,
}

#[derive(Deserialize)]
pub struct EventsQuery {
    since: Option<u64>,
}

#[derive(Deserialize)]
pub struct DateQuery {
    date: Option<NaiveDate>,
}

#[derive(Deserialize)]
pub struct RangeQuery {
    from: Option<NaiveDate>,
    to: Option<NaiveDate>,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CheckInCreated {
    check_in: crate::queue::CheckInEntry,
    patient: Patient,
}

async fn list_clinics(state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    Ok(ok(state.engine.clinics().list_active()?))
}

async fn get_clinic(path: web::Path<String>, state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    let clinic_id = path.into_inner();
    let clinic = state
        .engine
        .clinics()
        .get_clinic(&clinic_id)?
        .ok_or_else(|| QueueError::ClinicNotFound(clinic_id.clone()))?;
    let counters = state.engine.counters(&clinic_id)?;
    Ok(ok(ClinicDetail { clinic, counters }))
}

async fn create_check_in(body: web::Json<CheckInBody>, state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    let body = body.into_inner();
    let mut info = body.patient_info.unwrap_or_default();
    if info.patient_id.is_none() {
        info.patient_id = body.patient_id;
    }
    // a new patient is only stored once the check-in is admitted
    let patient = state.patients.prepare(&info, state.engine.now())?;

    let check_in = state.engine.check_in(CheckInRequest {
        clinic_id: body.clinic_id,
        patient_id: patient.patient_id.clone(),
        visit_reason: body.visit_reason,
        priority: body.priority,
        location: body.location,
    })?;
    state.patients.save(&patient)?;

    Ok(HttpResponse::Created().json(serde_json::json!({
        "success": true,
        "data": CheckInCreated { check_in, patient },
    })))
}

async fn get_check_in(path: web::Path<String>, state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    Ok(ok(state.engine.find(&path.into_inner())?))
}

async fn update_status(
    path: web::Path<String>,
    body: web::Json<StatusBody>,
    state: web::Data<AppState>,
) -> QueueResult<HttpResponse> {
    let target: CheckInStatus = body.status.parse()?;
    Ok(ok(state.engine.update_status(&path.into_inner(), target)?))
}

async fn cancel_check_in(path: web::Path<String>, state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    state.engine.cancel(&path.into_inner())?;
    Ok(HttpResponse::Ok().json(serde_json::json!({
        "success": true,
        "message": "Check-in cancelled"
    })))
}

async fn queue_position(path: web::Path<String>, state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    Ok(ok(state.engine.position_of(&path.into_inner())?))
}

async fn current_queue(path: web::Path<String>, state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    Ok(ok(state.engine.snapshot(&path.into_inner())?))
}

async fn call_next(path: web::Path<String>, state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    Ok(ok(state.engine.call_next(&path.into_inner())?))
}

async fn queue_events(
    path: web::Path<String>,
    query: web::Query<EventsQuery>,
    state: web::Data<AppState>,
) -> QueueResult<HttpResponse> {
    let clinic_id = path.into_inner();
    Ok(ok(state.recent_events.since(&clinic_id, query.since.unwrap_or(0))))
}

async fn export_queue(
    path: web::Path<String>,
    query: web::Query<DateQuery>,
    state: web::Data<AppState>,
) -> QueueResult<HttpResponse> {
    let clinic_id = path.into_inner();
    if state.engine.clinics().get_clinic(&clinic_id)?.is_none() {
        return Err(QueueError::ClinicNotFound(clinic_id));
    }
    let day = match query.date {
        Some(date) => ClinicDay::new(clinic_id, date),
        None => state.engine.today(&clinic_id),
    };
    let entries = state.engine.check_ins().find_by_clinic_day(&day)?;
    let csv = check_ins_to_csv(&entries, state.engine.settings().utc_offset)?;

    Ok(HttpResponse::Ok()
        .content_type("text/csv; charset=utf-8")
        .insert_header((
            "Content-Disposition",
            format!("attachment; filename=\"{}-{}.csv\"", day.clinic_id, day.date),
        ))
        .body(csv))
}

async fn analytics_for_clinic(
    path: web::Path<String>,
    query: web::Query<RangeQuery>,
    state: web::Data<AppState>,
) -> QueueResult<HttpResponse> {
    let clinic_id = path.into_inner();
    if state.engine.clinics().get_clinic(&clinic_id)?.is_none() {
        return Err(QueueError::ClinicNotFound(clinic_id));
    }
    let entries = state.engine.check_ins().find_by_clinic(&clinic_id)?;
    let range = DateRange { from: query.from, to: query.to };
    Ok(ok(clinic_analytics(&clinic_id, &entries, range, state.engine.settings().utc_offset)))
}

async fn history_for_patient(path: web::Path<String>, state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    let patient_id = path.into_inner();
    let entries = state.engine.check_ins().find_by_patient(&patient_id)?;
    Ok(ok(patient_history(&patient_id, &entries)))
}

async fn get_patient(path: web::Path<String>, state: web::Data<AppState>) -> QueueResult<HttpResponse> {
    let patient_id = path.into_inner();
    let patient = state
        .patients
        .find(&patient_id)?
        .ok_or(QueueError::PatientNotFound(patient_id))?;
    Ok(ok(patient))
}

/// Registers every API route; shared by the server and the HTTP tests
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(
        web::JsonConfig::default().error_handler(|err, _req| QueueError::Validation(err.to_string()).into()),
    )
    .app_data(
        web::QueryConfig::default().error_handler(|err, _req| QueueError::Validation(err.to_string()).into()),
    )
    .route("/api/clinics", web::get().to(list_clinics))
    .route("/api/clinics/{id}", web::get().to(get_clinic))
    .route("/api/check-ins", web::post().to(create_check_in))
    .route("/api/check-ins/{id}", web::get().to(get_check_in))
    .route("/api/check-ins/{id}", web::delete().to(cancel_check_in))
    .route("/api/check-ins/{id}/status", web::put().to(update_status))
    .route("/api/queues/position/{id}", web::get().to(queue_position))
    .route("/api/queues/{clinic}/current", web::get().to(current_queue))
    .route("/api/queues/{clinic}/call-next", web::post().to(call_next))
    .route("/api/queues/{clinic}/events", web::get().to(queue_events))
    .route("/api/queues/{clinic}/export", web::get().to(export_queue))
    .route("/api/analytics/clinic/{id}", web::get().to(analytics_for_clinic))
    .route("/api/analytics/patient/{id}/history", web::get().to(history_for_patient))
    .route("/api/patients/{id}", web::get().to(get_patient));
}

pub async fn start_server(port: u16, state: AppState) -> std::io::Result<()> {
    let app_state = web::Data::new(state);
    info!("Listening on 0.0.0.0:{}", port);

    HttpServer::new(move || {
        App::new()
            .app_data(app_state.clone())
            .wrap(middleware::Logger::default())
            .configure(configure)
    })
    .bind(("0.0.0.0", port))?
    .run()
    .await
}
