use std::num::{IntErrorKind, NonZeroU32};

use actix_web::{get, web, HttpResponse, Responder};
use log::error;
use serde::{Deserialize, Serialize};

use crate::db::PostgresClient;
use crate::query::RangeQueryEngine;

const MISSING_PARAMS: &str =
    "Both `token_symbol` and `time_unit_in_hours` query params are required.";
const STEP_NOT_INTEGER: &str = "`time_unit_in_hours` must be an integer.";
const STEP_NOT_POSITIVE: &str = "`time_unit_in_hours` must be greater than 0.";

#[derive(Debug, Deserialize)]
pub struct ChartDataParams {
    token_symbol: Option<String>,
    time_unit_in_hours: Option<String>,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

fn error_body(message: impl Into<String>) -> ErrorBody {
    ErrorBody {
        error: message.into(),
    }
}

/// Validate and normalize the chart query: upper-cased symbol, positive step.
fn parse_params(params: &ChartDataParams) -> Result<(String, NonZeroU32), &'static str> {
    let symbol = params
        .token_symbol
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(MISSING_PARAMS)?
        .to_uppercase();

    let raw_step = params
        .time_unit_in_hours
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or(MISSING_PARAMS)?;

    // Anything past u32::MAX hours is a single-point axis anyway
    let step = match raw_step.parse::<i64>() {
        Ok(step) if step <= 0 => return Err(STEP_NOT_POSITIVE),
        Ok(step) => u32::try_from(step).unwrap_or(u32::MAX),
        Err(e) => match e.kind() {
            IntErrorKind::PosOverflow => u32::MAX,
            IntErrorKind::NegOverflow => return Err(STEP_NOT_POSITIVE),
            _ => return Err(STEP_NOT_INTEGER),
        },
    };
    let step = NonZeroU32::new(step).ok_or(STEP_NOT_POSITIVE)?;

    Ok((symbol, step))
}

/// Gap-filled open/close/high/low/priceUSD series for one token.
#[get("/chart-data")]
pub async fn chart_data(
    params: web::Query<ChartDataParams>,
    engine: web::Data<RangeQueryEngine>,
) -> impl Responder {
    let (symbol, step) = match parse_params(&params) {
        Ok(parsed) => parsed,
        Err(message) => return HttpResponse::BadRequest().json(error_body(message)),
    };

    match engine.query(&symbol, step).await {
        Ok(Some(series)) => HttpResponse::Ok().json(series),
        Ok(None) => HttpResponse::NotFound()
            .json(error_body(format!("{} is not currently tracked!", symbol))),
        Err(e) => {
            error!("Chart query for {} failed: {}", symbol, e);
            HttpResponse::InternalServerError().json(error_body("An error occurred."))
        },
    }
}

#[get("/health")]
pub async fn health(postgres: web::Data<PostgresClient>) -> impl Responder {
    match postgres.health_check().await {
        Ok(()) => HttpResponse::Ok().body("OK"),
        Err(e) => {
            error!("Health check failed: {:#}", e);
            HttpResponse::InternalServerError().body("Database unavailable")
        },
    }
}
