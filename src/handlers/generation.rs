use crate::error::AppError;
use crate::middlewares::current_user_id;
use crate::models::*;
use crate::services::GenerationService;
use actix_web::{HttpRequest, HttpResponse, ResponseError, Result, web};
use uuid::Uuid;

#[utoipa::path(
    post,
    path = "/generation",
    tag = "generation",
    request_body = CreateGenerationRequest,
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Job accepted; credits debited", body = CreateGenerationResponse),
        (status = 400, description = "Invalid input"),
        (status = 401, description = "Unauthorized"),
        (status = 402, description = "Insufficient credits")
    )
)]
pub async fn create_generation(
    generation_service: web::Data<GenerationService>,
    req: HttpRequest,
    request: web::Json<CreateGenerationRequest>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match generation_service
        .submit(user_id, request.into_inner())
        .await
    {
        Ok(response) => Ok(HttpResponse::Ok().json(ApiResponse::success(response))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/generation/{id}",
    tag = "generation",
    params(
        ("id" = Uuid, Path, description = "Generation record id")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Current status; advances the job if the provider finished", body = GenerationStatusResponse),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "No such record for this user")
    )
)]
pub async fn get_generation(
    generation_service: web::Data<GenerationService>,
    req: HttpRequest,
    path: web::Path<Uuid>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match generation_service.poll(user_id, path.into_inner()).await {
        Ok(snapshot) => Ok(HttpResponse::Ok().json(ApiResponse::success(snapshot))),
        Err(e) => Ok(e.error_response()),
    }
}

#[utoipa::path(
    get,
    path = "/generation",
    tag = "generation",
    params(
        ("page" = Option<u32>, Query, description = "Page number"),
        ("per_page" = Option<u32>, Query, description = "Page size")
    ),
    security(
        ("bearer_auth" = [])
    ),
    responses(
        (status = 200, description = "Generation history, newest first", body = GenerationPageResponse),
        (status = 401, description = "Unauthorized")
    )
)]
pub async fn list_generations(
    generation_service: web::Data<GenerationService>,
    req: HttpRequest,
    query: web::Query<PageQuery>,
) -> Result<HttpResponse> {
    let user_id = match current_user_id(&req) {
        Ok(id) => id,
        Err(e) => return Ok(e.error_response()),
    };

    match generation_service.list_for_user(user_id, &query).await {
        Ok(page) => Ok(HttpResponse::Ok().json(ApiResponse::success(page))),
        Err(e) => Ok(e.error_response()),
    }
}

pub fn generation_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/generation")
            .app_data(web::JsonConfig::default().error_handler(|err, _req| {
                AppError::ValidationError(err.to_string()).into()
            }))
            .route("", web::post().to(create_generation))
            .route("", web::get().to(list_generations))
            .route("/{id}", web::get().to(get_generation)),
    );
}
