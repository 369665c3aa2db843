/// Public key resolution endpoints
///
/// `POST /publickeys/query` is shared by browser clients and federated peers.
/// The presence of valid auth cookies decides which of the two is calling.
use crate::{
    address::EmailAddress,
    auth::OptionalAuthContext,
    context::AppContext,
    error::ServerResult,
    federation::{KeyQuery, ResolutionResponse, QUERY_PATH},
};
use axum::{
    extract::State,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Serialize;

pub fn routes() -> Router<AppContext> {
    Router::new()
        .route(QUERY_PATH, post(query_public_keys))
        .route("/publickeys/notary", get(notary_public_key))
}

/// Resolve names to key-hashes and key-hashes to public keys
pub async fn query_public_keys(
    State(ctx): State<AppContext>,
    auth: OptionalAuthContext,
    Form(query): Form<KeyQuery>,
) -> ServerResult<Json<ResolutionResponse>> {
    let (response, in_flight) = ctx.key_query.resolve(&query, auth.trust_mode()).await?;

    // The response is final; stragglers are only drained from here on
    in_flight.release();

    Ok(Json(response))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct NotaryInfo {
    pub notary: String,
    pub public_key: String,
}

/// This server's notary verifying key
pub async fn notary_public_key(State(ctx): State<AppContext>) -> Json<NotaryInfo> {
    Json(NotaryInfo {
        notary: EmailAddress::notary_for(ctx.mx_host()).to_string(),
        public_key: ctx.notary.public_key_hex(),
    })
}

#[cfg(test)]
mod tests {
    use crate::{
        context::test_context,
        crypto::verify_attestation,
        address::EmailAddress,
        federation::{ResolutionResponse, FAILED_PUBLIC_KEY},
        server::build_router,
    };
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
    };
    use tower::ServiceExt;

    fn form_request(body: &str, cookie: Option<&str>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/publickeys/query")
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
        if let Some(cookie) = cookie {
            builder = builder.header(header::COOKIE, cookie);
        }
        builder.body(Body::from(body.to_string())).unwrap()
    }

    async fn read_json(response: axum::response::Response) -> serde_json::Value {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn test_peer_query_for_local_user() {
        let ctx = test_context().await;
        let app = build_router(ctx.clone());

        let response = app
            .oneshot(form_request(
                "nameAddresses=alice%40home.test&hashAddresses=&notaries=notary%40mx.home.test",
                None,
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body: ResolutionResponse = serde_json::from_value(read_json(response).await).unwrap();
        assert_eq!(body.public_keys["alice@home.test"].pub_key.as_deref(), Some("KEY-alice"));

        let attestation = &body.name_resolution["notary@mx.home.test"].attestations["alice@home.test"];
        let alice = EmailAddress::new("alice", "home.test");
        assert!(verify_attestation(&ctx.notary.public_key_hex(), &alice, attestation).unwrap());
    }

    #[tokio::test]
    async fn test_peer_query_for_foreign_hash_is_bare_400() {
        let app = build_router(test_context().await);

        let response = app
            .oneshot(form_request("hashAddresses=bob%40peer.test%23h2", None))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        assert!(bytes.is_empty());
    }

    #[tokio::test]
    async fn test_signed_in_client_may_query_foreign_hosts() {
        let app = build_router(test_context().await);

        let response = app
            .oneshot(form_request(
                "hashAddresses=bob%40peer.test%23h2",
                Some("token=alice; passHash=pw"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = read_json(response).await;
        assert_eq!(body["publicKeys"]["bob@peer.test"]["error"], FAILED_PUBLIC_KEY);
        assert!(body.get("nameResolution").is_none());
    }

    #[tokio::test]
    async fn test_unresolvable_domain_names_every_host() {
        let app = build_router(test_context().await);

        let response = app
            .oneshot(form_request(
                "nameAddresses=x%40nowhere.test,y%40void.test",
                Some("token=alice; passHash=pw"),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

        let body = read_json(response).await;
        assert_eq!(body["error"], "NoMxRecord");
        assert_eq!(body["message"], "Host (nowhere.test,void.test) has no MX record");
    }

    #[tokio::test]
    async fn test_notary_public_key() {
        let ctx = test_context().await;
        let app = build_router(ctx.clone());

        let response = app
            .oneshot(Request::builder().uri("/publickeys/notary").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let body = read_json(response).await;
        assert_eq!(body["notary"], "notary@mx.home.test");
        assert_eq!(body["publicKey"], ctx.notary.public_key_hex());
    }
}
