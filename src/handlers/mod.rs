pub mod admin;
pub mod credits;
pub mod generation;
pub mod health;

pub use admin::admin_config;
pub use credits::credits_config;
pub use generation::generation_config;
pub use health::health_config;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{AdminConfig, JwtConfig, OrchestratorConfig, PricingConfig};
    use crate::middlewares::AuthMiddleware;
    use crate::services::{GenerationService, LedgerService, Materializer};
    use crate::test_utils::{FakeProvider, FakeStorage, QueryScript, setup_db};
    use crate::utils::JwtService;
    use actix_web::dev::Service;
    use actix_web::http::StatusCode;
    use actix_web::{App, test, web};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use uuid::Uuid;

    const ADMIN_KEY: &str = "admin-secret";

    struct Ctx {
        jwt: JwtService,
        ledger: LedgerService,
        generation: GenerationService,
        provider: Arc<FakeProvider>,
    }

    async fn ctx() -> Ctx {
        let db = setup_db().await;
        let provider = Arc::new(FakeProvider::accepting("task-http"));
        let materializer = Materializer::new(Arc::new(FakeStorage::new()), "generations");
        Ctx {
            jwt: JwtService::new(&JwtConfig {
                secret: "http-test-secret".into(),
                audience: None,
            }),
            ledger: LedgerService::new(db.clone(), 5),
            generation: GenerationService::new(
                db,
                provider.clone(),
                materializer,
                PricingConfig::default(),
                OrchestratorConfig::default(),
            ),
            provider,
        }
    }

    macro_rules! test_app {
        ($ctx:expr) => {
            test::init_service(
                App::new()
                    .wrap(AuthMiddleware::new($ctx.jwt.clone()))
                    .app_data(web::Data::new($ctx.ledger.clone()))
                    .app_data(web::Data::new($ctx.generation.clone()))
                    .app_data(web::Data::new(AdminConfig {
                        api_key: ADMIN_KEY.to_string(),
                    }))
                    .configure(health_config)
                    .service(
                        web::scope("/api/v1")
                            .configure(generation_config)
                            .configure(credits_config)
                            .configure(admin_config),
                    ),
            )
            .await
        };
    }

    fn bearer(ctx: &Ctx, user: Uuid) -> (&'static str, String) {
        let token = ctx
            .jwt
            .issue_token(user, chrono::Duration::minutes(5))
            .unwrap();
        ("Authorization", format!("Bearer {token}"))
    }

    fn grant_body(user: Uuid, amount: i64) -> Value {
        json!({
            "user_id": user,
            "amount": amount,
            "transaction_type": "purchase",
            "description": "starter pack"
        })
    }

    fn upscale_body() -> Value {
        json!({
            "input_url": "https://img.example.com/in.png",
            "operation_type": "super_resolution",
            "upscale_factor": 2
        })
    }

    #[actix_web::test]
    async fn test_requests_without_token_are_rejected() {
        let ctx = ctx().await;
        let app = test_app!(ctx);

        let req = test::TestRequest::get()
            .uri("/api/v1/credits/balance")
            .to_request();
        let err = app.call(req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get()
            .uri("/api/v1/credits/balance")
            .insert_header(("Authorization", "Bearer not-a-jwt"))
            .to_request();
        let err = app.call(req).await.unwrap_err();
        assert_eq!(err.error_response().status(), StatusCode::UNAUTHORIZED);

        let req = test::TestRequest::get().uri("/health").to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::OK);
    }

    #[actix_web::test]
    async fn test_admin_grant_requires_key() {
        let ctx = ctx().await;
        let app = test_app!(ctx);
        let user = Uuid::new_v4();

        let req = test::TestRequest::post()
            .uri("/api/v1/admin/credits/grant")
            .insert_header(("X-Admin-Key", "wrong"))
            .set_json(grant_body(user, 10))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        let req = test::TestRequest::post()
            .uri("/api/v1/admin/credits/grant")
            .insert_header(("X-Admin-Key", ADMIN_KEY))
            .set_json(grant_body(user, 10))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["data"]["balance"], 10);

        let req = test::TestRequest::get()
            .uri("/api/v1/credits/balance")
            .insert_header(bearer(&ctx, user))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["balance"], 10);
    }

    #[actix_web::test]
    async fn test_submit_without_credits_is_402() {
        let ctx = ctx().await;
        let app = test_app!(ctx);
        let user = Uuid::new_v4();

        let req = test::TestRequest::post()
            .uri("/api/v1/generation")
            .insert_header(bearer(&ctx, user))
            .set_json(upscale_body())
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::PAYMENT_REQUIRED);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["success"], false);
        assert_eq!(body["error"]["code"], "INSUFFICIENT_CREDITS");
        assert_eq!(ctx.provider.submit_calls(), 0);
    }

    #[actix_web::test]
    async fn test_malformed_body_is_400() {
        let ctx = ctx().await;
        let app = test_app!(ctx);

        let req = test::TestRequest::post()
            .uri("/api/v1/generation")
            .insert_header(bearer(&ctx, Uuid::new_v4()))
            .set_json(json!({"input_url": "https://img.example.com/a.png", "operation_type": "teleport"}))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let body: Value = test::read_body_json(resp).await;
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[actix_web::test]
    async fn test_submit_and_poll_until_completed() {
        let ctx = ctx().await;
        let app = test_app!(ctx);
        let user = Uuid::new_v4();
        ctx.ledger
            .grant(serde_json::from_value(grant_body(user, 10)).unwrap())
            .await
            .unwrap();

        let req = test::TestRequest::post()
            .uri("/api/v1/generation")
            .insert_header(bearer(&ctx, user))
            .set_json(upscale_body())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "processing");
        let record_id = body["data"]["record_id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/generation/{record_id}"))
            .insert_header(bearer(&ctx, user))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "processing");
        assert_eq!(body["data"]["credits_used"], 4);
        assert!(body["data"].get("output_url").is_none());

        ctx.provider
            .set_query(QueryScript::Succeeded("https://provider.test/out.png".into()));
        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/generation/{record_id}"))
            .insert_header(bearer(&ctx, user))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["status"], "completed");
        assert_eq!(body["data"]["operation_type"], "super_resolution");
        assert!(
            body["data"]["output_url"]
                .as_str()
                .unwrap()
                .ends_with("/result.png")
        );

        let req = test::TestRequest::get()
            .uri("/api/v1/generation?page=1&per_page=10")
            .insert_header(bearer(&ctx, user))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 1);

        let req = test::TestRequest::get()
            .uri("/api/v1/credits/transactions")
            .insert_header(bearer(&ctx, user))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["data"]["total"], 2);
        assert_eq!(body["data"]["data"][0]["transaction_type"], "consumption");
    }

    #[actix_web::test]
    async fn test_foreign_record_is_404() {
        let ctx = ctx().await;
        let app = test_app!(ctx);
        let owner = Uuid::new_v4();
        ctx.ledger
            .grant(serde_json::from_value(grant_body(owner, 10)).unwrap())
            .await
            .unwrap();

        let req = test::TestRequest::post()
            .uri("/api/v1/generation")
            .insert_header(bearer(&ctx, owner))
            .set_json(upscale_body())
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        let record_id = body["data"]["record_id"].as_str().unwrap().to_string();

        let req = test::TestRequest::get()
            .uri(&format!("/api/v1/generation/{record_id}"))
            .insert_header(bearer(&ctx, Uuid::new_v4()))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
