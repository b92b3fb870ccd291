use actix_cors::Cors;

pub fn create_cors() -> Cors {
    Cors::default()
        // storefront origins vary per deployment
        .allowed_origin_fn(|_, _req_head| true)
        .allowed_methods(vec!["GET", "POST", "OPTIONS"])
        .allow_any_header()
        .supports_credentials()
        .max_age(3600)
}
