//! HTTP surface of the monitor.
//!
//! `/evaluate` is called by the fronting request-handling layer once per
//! inbound request; it always answers 200 with the verdict, and response
//! status selection (403/429) stays with the caller. `/scan` is the
//! external scheduler's trigger. The blocklist endpoints mirror the
//! manual block/unblock administrative actions.

use actix_web::{web, HttpRequest, HttpResponse, Responder};
use chrono::{Duration, Utc};
use log::error;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::core::gate::GateError;
use crate::core::request_log::RequestLog;
use crate::core::scanner::{AnomalyScanner, ScanOutcome};
use crate::core::SecurityGate;
use crate::models::{InboundRequest, Outcome, SecurityReport, Verdict};
use crate::store::FlagStore;
use crate::utils::forwarded_client_ip;

pub struct ApiState {
    pub gate: Arc<SecurityGate>,
    pub scanner: Arc<AnomalyScanner>,
    pub log: Arc<dyn RequestLog>,
    pub flags: Arc<dyn FlagStore>,
}

/// API configuration function for Actix-web
pub fn routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .service(web::resource("/health").route(web::get().to(health_check)))
            .service(web::resource("/evaluate").route(web::post().to(evaluate)))
            .service(web::resource("/scan").route(web::post().to(run_scan)))
            .service(web::resource("/blocklist").route(web::post().to(block_ip)))
            .service(web::resource("/blocklist/{ip}").route(web::delete().to(unblock_ip)))
            .service(web::resource("/status/{ip}").route(web::get().to(ip_status)))
            .service(web::resource("/report").route(web::get().to(security_report))),
    );
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    version: String,
}

#[derive(Debug, Deserialize)]
pub struct EvaluateRequest {
    /// Explicit client address; falls back to X-Forwarded-For, then the
    /// peer address
    pub ip_address: Option<String>,
    pub path: String,
    pub method: String,
    pub user_agent: Option<String>,
}

#[derive(Serialize)]
struct EvaluateResponse {
    verdict: Verdict,
    ip_address: String,
    /// false when the verdict stands but the record append failed
    recorded: bool,
}

#[derive(Debug, Deserialize)]
pub struct BlockRequest {
    pub ip_address: String,
    pub reason: Option<String>,
}

async fn health_check() -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

fn client_ip(req: &HttpRequest, body: &EvaluateRequest) -> Option<String> {
    if let Some(ip) = &body.ip_address {
        return Some(ip.clone());
    }
    if let Some(header) = req.headers().get("x-forwarded-for") {
        if let Ok(value) = header.to_str() {
            if let Some(ip) = forwarded_client_ip(value) {
                return Some(ip);
            }
        }
    }
    req.peer_addr().map(|addr| addr.ip().to_string())
}

async fn evaluate(
    state: web::Data<ApiState>,
    req: HttpRequest,
    body: web::Json<EvaluateRequest>,
) -> impl Responder {
    let Some(ip_address) = client_ip(&req, &body) else {
        return HttpResponse::BadRequest()
            .json(serde_json::json!({ "error": "client address could not be determined" }));
    };

    let inbound = InboundRequest {
        ip_address: ip_address.clone(),
        path: body.path.clone(),
        method: body.method.clone(),
        user_agent: body.user_agent.clone(),
        timestamp: Utc::now(),
    };

    let (verdict, recorded) = match state.gate.evaluate(&inbound).await {
        Ok(verdict) => (verdict, true),
        Err(GateError::Record { verdict, source }) => {
            error!("request record lost for {}: {}", ip_address, source);
            (verdict, false)
        }
    };

    HttpResponse::Ok().json(EvaluateResponse {
        verdict,
        ip_address,
        recorded,
    })
}

async fn run_scan(state: web::Data<ApiState>) -> impl Responder {
    match state.scanner.run_scan(Utc::now()).await {
        Ok(ScanOutcome::Completed(report)) => HttpResponse::Ok().json(serde_json::json!({
            "status": "completed",
            "report": report,
        })),
        Ok(ScanOutcome::Skipped) => HttpResponse::Ok().json(serde_json::json!({
            "status": "skipped",
        })),
        Err(e) => {
            error!("anomaly scan aborted: {}", e);
            HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}

async fn block_ip(state: web::Data<ApiState>, body: web::Json<BlockRequest>) -> impl Responder {
    match state.flags.block(&body.ip_address, body.reason.clone()).await {
        Ok(newly_blocked) => HttpResponse::Ok().json(serde_json::json!({
            "ip_address": body.ip_address,
            "blocked": true,
            "already_blocked": !newly_blocked,
        })),
        Err(e) => HttpResponse::InternalServerError()
            .json(serde_json::json!({ "error": e.to_string() })),
    }
}

async fn unblock_ip(state: web::Data<ApiState>, path: web::Path<String>) -> impl Responder {
    let ip = path.into_inner();
    match state.flags.unblock(&ip).await {
        Ok(true) => HttpResponse::Ok().json(serde_json::json!({
            "ip_address": ip,
            "blocked": false,
        })),
        Ok(false) => HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("{} is not blocked", ip),
        })),
        Err(e) => HttpResponse::InternalServerError()
            .json(serde_json::json!({ "error": e.to_string() })),
    }
}

async fn ip_status(state: web::Data<ApiState>, path: web::Path<String>) -> impl Responder {
    let ip = path.into_inner();
    let blocked = match state.flags.is_blocked(&ip).await {
        Ok(blocked) => blocked,
        Err(e) => {
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }))
        }
    };
    match state.flags.flags_for(&ip).await {
        Ok(flags) => HttpResponse::Ok().json(serde_json::json!({
            "ip_address": ip,
            "blocked": blocked,
            "flags": flags,
        })),
        Err(e) => HttpResponse::InternalServerError()
            .json(serde_json::json!({ "error": e.to_string() })),
    }
}

async fn security_report(state: web::Data<ApiState>) -> impl Responder {
    let since = Utc::now() - Duration::hours(24);

    let records = match state.log.records_since(since).await {
        Ok(records) => records,
        Err(e) => {
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }))
        }
    };
    let flags = match state.flags.all_flags().await {
        Ok(flags) => flags,
        Err(e) => {
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }))
        }
    };
    let blocked_ips = match state.flags.blocked_count().await {
        Ok(count) => count,
        Err(e) => {
            return HttpResponse::InternalServerError()
                .json(serde_json::json!({ "error": e.to_string() }))
        }
    };

    let mut ips: Vec<&str> = records.iter().map(|r| r.ip_address.as_str()).collect();
    ips.sort_unstable();
    ips.dedup();

    HttpResponse::Ok().json(SecurityReport {
        since,
        total_requests: records.len() as u64,
        unique_ips: ips.len() as u64,
        rate_limited_requests: records
            .iter()
            .filter(|r| r.outcome == Outcome::RateLimited)
            .count() as u64,
        blocked_requests: records
            .iter()
            .filter(|r| r.outcome == Outcome::Blocked)
            .count() as u64,
        active_flags: flags.len() as u64,
        blocked_ips,
    })
}
