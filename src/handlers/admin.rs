use crate::config::AdminConfig;
use crate::error::AppError;
use crate::models::*;
use crate::services::LedgerService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};

fn check_admin_key(config: &AdminConfig, req: &HttpRequest) -> Result<(), AppError> {
    if config.api_key.is_empty() {
        return Err(AppError::Forbidden);
    }
    let provided = req
        .headers()
        .get("X-Admin-Key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default();
    if provided != config.api_key {
        return Err(AppError::Forbidden);
    }
    Ok(())
}

#[utoipa::path(
    post,
    path = "/admin/credits/grant",
    tag = "admin",
    request_body = GrantCreditsRequest,
    params(
        ("X-Admin-Key" = String, Header, description = "Operator key")
    ),
    responses(
        (status = 200, description = "Credits granted", body = GrantCreditsResponse),
        (status = 400, description = "Invalid amount or type"),
        (status = 403, description = "Missing or wrong admin key")
    )
)]
pub async fn grant_credits(
    ledger_service: web::Data<LedgerService>,
    admin: web::Data<AdminConfig>,
    req: HttpRequest,
    request: web::Json<GrantCreditsRequest>,
) -> Result<HttpResponse> {
    if let Err(e) = check_admin_key(&admin, &req) {
        log::warn!("Rejected admin request from {:?}", req.peer_addr());
        return Ok(e.error_response());
    }

    match ledger_service.grant(request.into_inner()).await {
        Ok(granted) => Ok(HttpResponse::Ok().json(ApiResponse::success_with_message(
            granted,
            "Credits granted".to_string(),
        ))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn admin_config(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/admin").route("/credits/grant", web::post().to(grant_credits)));
}
