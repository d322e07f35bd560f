use std::time::Duration;

use actix_web::{web, App, HttpResponse, HttpServer};

use orange::error::FetchError;
use orange::jwks::{HttpKeySource, KeyCache, KeySource};

const JWKS: &str = r#"{"keys":[{"kty":"OKP","crv":"Ed25519","x":"11qYAYKxCrfVS_7TyWQHOg7hcvPapiMlrwIaaPcHURo","kid":"auth-2024","alg":"EdDSA","use":"sig"}]}"#;

fn spawn_authority() -> String {
    let server = HttpServer::new(|| {
        App::new()
            .route(
                "/oauth2/jwks",
                web::get().to(|| async {
                    HttpResponse::Ok()
                        .content_type("application/json")
                        .body(JWKS)
                }),
            )
            .route(
                "/broken",
                web::get().to(|| async { HttpResponse::ServiceUnavailable().finish() }),
            )
            .route(
                "/garbage",
                web::get().to(|| async { HttpResponse::Ok().body("<html>not json</html>") }),
            )
            .route(
                "/empty",
                web::get().to(|| async {
                    HttpResponse::Ok()
                        .content_type("application/json")
                        .body(r#"{"keys":[]}"#)
                }),
            )
    })
    .workers(1)
    .bind(("127.0.0.1", 0))
    .unwrap();
    let addr = server.addrs()[0];
    actix_rt::spawn(server.run());
    format!("http://{addr}")
}

#[actix_rt::test]
async fn fetches_published_key_set() {
    let base = spawn_authority();
    let source = HttpKeySource::new(format!("{base}/oauth2/jwks")).unwrap();

    let set = source.fetch().await.unwrap();
    assert_eq!(set.keys.len(), 1);
    assert_eq!(set.keys[0].common.key_id.as_deref(), Some("auth-2024"));
}

#[actix_rt::test]
async fn cache_initializes_from_authority() {
    let base = spawn_authority();
    let source = HttpKeySource::new(format!("{base}/oauth2/jwks")).unwrap();
    let cache = KeyCache::new(source, Duration::from_secs(900));

    let keys = cache.initialize().await.unwrap();
    assert_eq!(keys.key_ids(), vec!["auth-2024"]);
    assert_eq!(cache.get_keys().unwrap().len(), 1);
}

#[actix_rt::test]
async fn error_status_is_reported() {
    let base = spawn_authority();
    let source = HttpKeySource::new(format!("{base}/broken")).unwrap();
    assert_eq!(source.fetch().await.unwrap_err(), FetchError::Status(503));
}

#[actix_rt::test]
async fn non_json_body_is_decode_error() {
    let base = spawn_authority();
    let source = HttpKeySource::new(format!("{base}/garbage")).unwrap();
    assert!(matches!(
        source.fetch().await,
        Err(FetchError::Decode(_))
    ));
}

#[actix_rt::test]
async fn empty_key_set_fails_initialization() {
    let base = spawn_authority();
    let source = HttpKeySource::new(format!("{base}/empty")).unwrap();
    let cache = KeyCache::new(source, Duration::from_secs(900));

    assert_eq!(cache.initialize().await.unwrap_err(), FetchError::NoUsableKeys);
    assert_eq!(cache.get_keys().unwrap_err(), FetchError::NotInitialized);
}

#[actix_rt::test]
async fn unreachable_authority_is_transport_error() {
    let source = HttpKeySource::new("http://127.0.0.1:9/oauth2/jwks").unwrap();
    assert!(matches!(
        source.fetch().await,
        Err(FetchError::Transport(_))
    ));
}
