use std::sync::Arc;

use axum::{
    Router,
    http::{Request, header},
    routing::{get, post},
};
use http::HeaderName;
use lambda_http::Context;
use tower::{Layer, ServiceBuilder};
use tower_http::{
    normalize_path::{NormalizePath, NormalizePathLayer},
    request_id::{MakeRequestId, PropagateRequestIdLayer, RequestId, SetRequestIdLayer},
    sensitive_headers::SetSensitiveRequestHeadersLayer,
    timeout::TimeoutLayer,
    trace::{DefaultOnResponse, TraceLayer},
};
use tracing::{Level, info_span};
use uuid::Uuid;

use crate::{
    blob_store::BlobStore,
    front::handlers::{
        github_webhook, health_check, method_not_allowed, slack_commands, slack_events,
        slack_install, slack_oauth_redirect,
    },
    github_client::GithubClient,
    request_verifier::DefaultVerifier,
    slack_client::SlackClient,
    state::AppState,
};

pub fn build_app<B, GH, SL>(state: AppState<B, GH, SL>) -> NormalizePath<Router>
where
    B: BlobStore + 'static,
    GH: GithubClient + 'static,
    SL: SlackClient + 'static,
{
    let config = state.config.clone();
    let shared_state = Arc::new(state);

    // The webhook has its own soft deadline, the hard timeout only guards the Slack endpoints.
    let slack: Router<Arc<AppState<B, GH, SL>>> = Router::new()
        .route(
            "/api/slack/commands",
            post(slack_commands::<_, _, _, DefaultVerifier>),
        )
        .route(
            "/api/slack/events",
            post(slack_events::<_, _, _, DefaultVerifier>),
        )
        .route("/api/slack/install", get(slack_install))
        .route("/api/slack/oauth_redirect", get(slack_oauth_redirect))
        .layer(TimeoutLayer::new(config.server_timeout.into()));

    let router = Router::new()
        .route("/api/health", get(health_check))
        .route(
            "/api/github/webhooks",
            post(github_webhook::<_, _, _, DefaultVerifier>).fallback(method_not_allowed),
        )
        .merge(slack)
        .with_state(shared_state);

    let router = apply_middleware(router);
    NormalizePathLayer::trim_trailing_slash().layer(router)
}

fn apply_middleware(router: Router) -> Router {
    let headers = ["x-hub-signature-256", "x-slack-signature"]
        .into_iter()
        .flat_map(str::parse)
        .chain([header::AUTHORIZATION, header::COOKIE])
        .collect::<Vec<_>>();
    let middleware = ServiceBuilder::new()
        .layer(SetSensitiveRequestHeadersLayer::new(headers))
        .layer(SetRequestIdLayer::new(
            HeaderName::from_static("x-request-id"),
            LambdaRequestIdMaker {},
        ))
        .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
            "x-request-id",
        )))
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &Request<_>| {
                    // This expects the request id is already set by the previous RequestId middleware.
                    let id = get_request_id_or_default(req);
                    info_span!(
                        "request",
                        method = %req.method(),
                        uri = %req.uri(),
                        version = ?req.version(),
                        request_id = id,
                    )
                })
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        );

    router.layer(middleware)
}

fn get_request_id_or_default<T>(req: &Request<T>) -> String {
    req.extensions()
        .get::<RequestId>()
        .and_then(|id| id.header_value().to_str().ok())
        .map_or_else(|| Uuid::new_v4().to_string(), ToOwned::to_owned)
}

#[derive(Debug, Clone)]
struct LambdaRequestIdMaker;

impl MakeRequestId for LambdaRequestIdMaker {
    // Inside Lambda the invocation's request id is used, elsewhere a fresh UUID.
    fn make_request_id<B>(&mut self, req: &Request<B>) -> Option<RequestId> {
        let id = req
            .extensions()
            .get::<Context>()
            .map_or_else(|| Uuid::new_v4().to_string(), |ctx| ctx.request_id.clone());
        id.parse().map(RequestId::new).ok()
    }
}
