use actix_web::web;
use utoipa::OpenApi;
use utoipa::{
    Modify,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};
use utoipa_swagger_ui::SwaggerUi;

use crate::entities::{GenerationStatus, OperationType, TransactionType};
use crate::handlers;
use crate::models::*;

struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            )
        }
    }
}

#[derive(OpenApi)]
#[openapi(
    paths(
        handlers::generation::create_generation,
        handlers::generation::get_generation,
        handlers::generation::list_generations,
        handlers::credits::get_balance,
        handlers::credits::get_transactions,
        handlers::admin::grant_credits,
    ),
    components(
        schemas(
            GenerationParams,
            CreateGenerationRequest,
            CreateGenerationResponse,
            GenerationStatusResponse,
            GenerationStatus,
            OperationType,
            BalanceResponse,
            CreditTransactionResponse,
            TransactionType,
            GrantCreditsRequest,
            GrantCreditsResponse,
            PageQuery,
            ApiError,
        )
    ),
    modifiers(&SecurityAddon),
    tags(
        (name = "generation", description = "Credit-metered generation jobs"),
        (name = "credits", description = "Credit balance and ledger history"),
        (name = "admin", description = "Operator endpoints"),
    ),
    info(
        title = "Genmeter Backend API",
        version = "0.1.0",
        description = "Credit-metered asynchronous image generation"
    ),
    servers(
        (url = "/api/v1", description = "Local server")
    )
)]
pub struct ApiDoc;

pub fn swagger_config(cfg: &mut web::ServiceConfig) {
    cfg.service(
        SwaggerUi::new("/swagger-ui/{_:.*}").url("/api-docs/openapi.json", ApiDoc::openapi()),
    )
    .route(
        "/swagger-ui",
        web::get().to(|| async {
            actix_web::HttpResponse::Found()
                .append_header(("Location", "/swagger-ui/"))
                .finish()
        }),
    );
}
