use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{
    get,
    http::header,
    post,
    web::{self, Data},
    App, HttpResponse, HttpServer, Responder,
};
use common::req::{Ack, PendingStatus, QueueStatus};
use log::{debug, error};
use serde_json::{Map, Value};

use crate::db::{self, Db, NewReading, NewSeats, SharedDb};
use crate::error::ApiError;
use crate::queue::DeliveryQueue;
use crate::record::{ReadingEntry, SeatEntry};
use crate::utils::scalar_to_text;

type Body = web::Json<Map<String, Value>>;

/// Everything the ingress handlers share with the delivery workers.
#[derive(Clone)]
pub struct AppState {
    pub db: SharedDb,
    pub readings: Arc<DeliveryQueue<ReadingEntry>>,
    pub seats: Arc<DeliveryQueue<SeatEntry>>,
}

impl AppState {
    fn store<R>(&self, op: impl FnOnce(&mut Db) -> anyhow::Result<R>) -> Result<R, ApiError> {
        db::lock(&self.db)
            .and_then(|mut store| op(&mut store))
            .map_err(|e| {
                error!("Local store failure: {:#}", e);
                ApiError::Store(e)
            })
    }
}

#[get("/")]
async fn hello() -> impl Responder {
    HttpResponse::Ok().body("forwarder")
}

#[post("/data")]
async fn api_data(body: Body, state: Data<AppState>) -> Result<impl Responder, ApiError> {
    let (row, value1, value2) = reading_fields(&body)?;

    let id = state.store(|db| db.insert_reading(&row))?;
    debug!("Stored reading id={} {:?}", id, row);

    state.readings.enqueue(ReadingEntry { id, value1, value2 });
    Ok(web::Json(Ack::ok()))
}

#[post("/table")]
async fn api_table(body: Body, state: Data<AppState>) -> Result<impl Responder, ApiError> {
    let row = seat_fields(&body)?;

    let id = state.store(|db| db.insert_seats(&row))?;
    debug!("Stored seats id={} {:?}", id, row);

    state.seats.enqueue(SeatEntry {
        id,
        seat1: row.seat1,
        seat2: row.seat2,
        seat3: row.seat3,
        seat4: row.seat4,
    });
    Ok(web::Json(Ack::ok()))
}

#[get("/api/status")]
async fn api_status(state: Data<AppState>) -> Result<impl Responder, ApiError> {
    let (readings, seats) = state.store(|db| {
        Ok((db.unsynced_reading_count()?, db.unsynced_seats_count()?))
    })?;

    Ok(web::Json(PendingStatus {
        readings: QueueStatus {
            queued: state.readings.len(),
            unsynced: readings,
        },
        seats: QueueStatus {
            queued: state.seats.len(),
            unsynced: seats,
        },
    }))
}

/// null counts as absent
fn present<'a>(body: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    body.get(key).filter(|value| !value.is_null())
}

fn reading_fields(body: &Map<String, Value>) -> Result<(NewReading, Value, Value), ApiError> {
    let (Some(value1), Some(value2)) = (present(body, "value1"), present(body, "value2")) else {
        return Err(ApiError::MissingReadingFields);
    };

    let row = NewReading {
        value1: scalar_to_text(value1).ok_or(ApiError::InvalidField("value1"))?,
        value2: scalar_to_text(value2).ok_or(ApiError::InvalidField("value2"))?,
    };
    Ok((row, value1.clone(), value2.clone()))
}

fn seat(body: &Map<String, Value>, key: &'static str) -> Result<Option<i32>, ApiError> {
    match present(body, key) {
        None => Ok(None),
        Some(value) => value
            .as_i64()
            .and_then(|n| i32::try_from(n).ok())
            .map(Some)
            .ok_or(ApiError::InvalidField(key)),
    }
}

fn seat_fields(body: &Map<String, Value>) -> Result<NewSeats, ApiError> {
    let seat1 = seat(body, "seat1")?.ok_or(ApiError::MissingSeat)?;

    Ok(NewSeats {
        seat1,
        seat2: seat(body, "seat2")?.unwrap_or(0),
        seat3: seat(body, "seat3")?.unwrap_or(0),
        seat4: seat(body, "seat4")?.unwrap_or(0),
    })
}

fn json_config() -> web::JsonConfig {
    web::JsonConfig::default()
        .error_handler(|err, _req| ApiError::InvalidBody(err.to_string()).into())
}

pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg.app_data(json_config())
        .service(hello)
        .service(api_data)
        .service(api_table)
        .service(api_status);
}

pub async fn new_http_server(
    state: AppState,
    listen_addr: &str,
    cors_origin: Option<String>,
) -> std::io::Result<()> {
    HttpServer::new(move || {
        let cors = match &cors_origin {
            Some(origin) => Cors::default()
                .allowed_origin(origin)
                .allowed_methods(vec!["GET", "POST"])
                .allowed_headers(vec![header::ACCEPT])
                .allowed_header(header::CONTENT_TYPE)
                .max_age(3600),
            None => Cors::default(),
        };

        App::new()
            .app_data(Data::new(state.clone()))
            .configure(configure)
            .wrap(cors)
    })
    .bind(listen_addr)?
    .run()
    .await
}
