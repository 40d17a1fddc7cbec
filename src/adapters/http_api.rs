//! Management API.
//!
//! Thin per-resource handlers over [`ControlPlane`]. Reads run in a read
//! transaction; every write goes through [`ControlPlane::mutate`] and is
//! rendered, persisted and reloaded before the response is sent.
use std::sync::Arc;

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::{
        IntoResponse, Response,
        sse::{Event, KeepAlive, Sse},
    },
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tokio_stream::{Stream, StreamExt, wrappers::ReceiverStream};
use tower_http::trace::TraceLayer;

use crate::{
    adapters::runtime::{ProxyInfo, StatsEntry, StatsKind, StatsMap},
    control_plane::ControlPlane,
    core::{
        error::ControlError,
        model::{Backend, Config, Filter, Frontend, Route, Server, Service, ServiceServer},
    },
};

type ApiResult<T> = Result<T, ControlError>;
type AppState = State<Arc<ControlPlane>>;

#[derive(Serialize)]
struct ErrorBody {
    status: u16,
    message: String,
}

impl IntoResponse for ControlError {
    fn into_response(self) -> Response {
        let status =
            StatusCode::from_u16(self.status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        if status.is_server_error() {
            tracing::error!("Request failed: {}", self);
        } else {
            tracing::debug!("Request rejected: {}", self);
        }
        let body = ErrorBody {
            status: status.as_u16(),
            message: self.to_string(),
        };
        (status, Json(body)).into_response()
    }
}

#[derive(Debug, Deserialize, Serialize)]
pub struct WeightUpdate {
    pub weight: u32,
}

#[derive(Debug, Deserialize, Serialize)]
pub struct AclPattern {
    pub acl: String,
    pub pattern: String,
}

/// Build the `/v1` management router.
pub fn router(plane: Arc<ControlPlane>) -> Router {
    let v1 = Router::new()
        .route("/info", get(get_info))
        .route("/stats", get(get_stats))
        .route("/stats/stream", get(stream_stats))
        .route("/stats/{kind}", get(get_stats_kind))
        .route("/acls", post(post_acl))
        .route("/config", get(get_config).post(post_config))
        .route("/frontends", get(list_frontends).post(post_frontend))
        .route(
            "/frontends/{name}",
            get(get_frontend).put(put_frontend).delete(delete_frontend),
        )
        .route(
            "/frontends/{name}/filters",
            get(list_filters).post(post_filter),
        )
        .route(
            "/frontends/{name}/filters/{filter}",
            get(get_filter).put(put_filter).delete(delete_filter),
        )
        .route("/backends", get(list_backends).post(post_backend))
        .route(
            "/backends/{name}",
            get(get_backend).put(put_backend).delete(delete_backend),
        )
        .route(
            "/backends/{name}/servers",
            get(list_servers).post(post_server),
        )
        .route(
            "/backends/{name}/servers/{server}",
            get(get_server).put(put_server_weight).delete(delete_server),
        )
        .route("/routes", get(list_routes).post(post_route))
        .route(
            "/routes/{route}",
            get(get_route).put(put_route).delete(delete_route),
        )
        .route(
            "/routes/{route}/services",
            get(list_services).post(post_service),
        )
        .route(
            "/routes/{route}/services/{service}",
            get(get_service).put(put_service).delete(delete_service),
        )
        .route(
            "/routes/{route}/services/{service}/servers",
            get(list_service_servers).post(post_service_server),
        )
        .route(
            "/routes/{route}/services/{service}/servers/{server}",
            get(get_service_server)
                .put(put_service_server)
                .delete(delete_service_server),
        );

    Router::new()
        .nest("/v1", v1)
        .layer(TraceLayer::new_for_http())
        .with_state(plane)
}

// runtime

async fn get_info(State(plane): AppState) -> ApiResult<Json<ProxyInfo>> {
    Ok(Json(plane.info().await?))
}

async fn get_stats(State(plane): AppState) -> ApiResult<Json<Vec<StatsEntry>>> {
    Ok(Json(plane.stats(StatsKind::All).await?))
}

async fn get_stats_kind(
    State(plane): AppState,
    Path(kind): Path<String>,
) -> ApiResult<Json<StatsMap>> {
    let kind: StatsKind = kind.parse()?;
    Ok(Json(plane.stats_map(kind).await?))
}

async fn stream_stats(
    State(plane): AppState,
) -> Sse<impl Stream<Item = Result<Event, axum::Error>>> {
    let metrics = ReceiverStream::new(plane.subscribe());
    let events = metrics.map(|metric| Event::default().event("metric").json_data(metric));
    Sse::new(events).keep_alive(KeepAlive::default())
}

async fn post_acl(State(plane): AppState, Json(body): Json<AclPattern>) -> ApiResult<StatusCode> {
    plane.add_acl(&body.acl, &body.pattern).await?;
    Ok(StatusCode::CREATED)
}

// whole configuration

async fn get_config(State(plane): AppState) -> Json<Config> {
    Json(plane.store().snapshot().await)
}

async fn post_config(State(plane): AppState, Json(config): Json<Config>) -> ApiResult<StatusCode> {
    plane.replace_config(config).await?;
    Ok(StatusCode::CREATED)
}

// frontends

async fn list_frontends(State(plane): AppState) -> ApiResult<Json<Vec<Frontend>>> {
    plane.read(|c| Ok(Json(c.frontends.clone()))).await
}

async fn get_frontend(
    State(plane): AppState,
    Path(name): Path<String>,
) -> ApiResult<Json<Frontend>> {
    plane.read(|c| Ok(Json(c.frontend(&name)?.clone()))).await
}

async fn post_frontend(
    State(plane): AppState,
    Json(frontend): Json<Frontend>,
) -> ApiResult<(StatusCode, Json<Frontend>)> {
    let created = frontend.clone();
    plane.mutate(|txn| txn.add_frontend(frontend)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn put_frontend(
    State(plane): AppState,
    Path(name): Path<String>,
    Json(frontend): Json<Frontend>,
) -> ApiResult<Json<Frontend>> {
    let updated = frontend.clone();
    plane.mutate(|txn| txn.update_frontend(&name, frontend)).await?;
    Ok(Json(updated))
}

async fn delete_frontend(
    State(plane): AppState,
    Path(name): Path<String>,
) -> ApiResult<StatusCode> {
    plane.mutate(|txn| txn.delete_frontend(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// filters

async fn list_filters(
    State(plane): AppState,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<Filter>>> {
    plane.read(|c| Ok(Json(c.filters(&name)?.to_vec()))).await
}

async fn get_filter(
    State(plane): AppState,
    Path((name, filter)): Path<(String, String)>,
) -> ApiResult<Json<Filter>> {
    plane.read(|c| Ok(Json(c.filter(&name, &filter)?.clone()))).await
}

async fn post_filter(
    State(plane): AppState,
    Path(name): Path<String>,
    Json(filter): Json<Filter>,
) -> ApiResult<(StatusCode, Json<Filter>)> {
    let filter_name = filter.name.clone();
    let created = plane
        .mutate(|txn| {
            txn.add_filter(&name, filter)?;
            Ok(txn.filter(&name, &filter_name)?.clone())
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn put_filter(
    State(plane): AppState,
    Path((name, filter_name)): Path<(String, String)>,
    Json(filter): Json<Filter>,
) -> ApiResult<Json<Filter>> {
    let new_name = filter.name.clone();
    let updated = plane
        .mutate(|txn| {
            txn.update_filter(&name, &filter_name, filter)?;
            Ok(txn.filter(&name, &new_name)?.clone())
        })
        .await?;
    Ok(Json(updated))
}

async fn delete_filter(
    State(plane): AppState,
    Path((name, filter)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    plane.mutate(|txn| txn.delete_filter(&name, &filter)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// backends

async fn list_backends(State(plane): AppState) -> ApiResult<Json<Vec<Backend>>> {
    plane.read(|c| Ok(Json(c.backends.clone()))).await
}

async fn get_backend(State(plane): AppState, Path(name): Path<String>) -> ApiResult<Json<Backend>> {
    plane.read(|c| Ok(Json(c.backend(&name)?.clone()))).await
}

async fn post_backend(
    State(plane): AppState,
    Json(backend): Json<Backend>,
) -> ApiResult<(StatusCode, Json<Backend>)> {
    let created = backend.clone();
    plane.mutate(|txn| txn.add_backend(backend)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn put_backend(
    State(plane): AppState,
    Path(name): Path<String>,
    Json(backend): Json<Backend>,
) -> ApiResult<Json<Backend>> {
    let updated = backend.clone();
    plane.mutate(|txn| txn.update_backend(&name, backend)).await?;
    Ok(Json(updated))
}

async fn delete_backend(State(plane): AppState, Path(name): Path<String>) -> ApiResult<StatusCode> {
    plane.mutate(|txn| txn.delete_backend(&name)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// backend servers

async fn list_servers(
    State(plane): AppState,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<Server>>> {
    plane.read(|c| Ok(Json(c.servers(&name)?.to_vec()))).await
}

async fn get_server(
    State(plane): AppState,
    Path((name, server)): Path<(String, String)>,
) -> ApiResult<Json<Server>> {
    plane.read(|c| Ok(Json(c.server(&name, &server)?.clone()))).await
}

async fn post_server(
    State(plane): AppState,
    Path(name): Path<String>,
    Json(server): Json<Server>,
) -> ApiResult<(StatusCode, Json<Server>)> {
    let created = server.clone();
    plane.mutate(|txn| txn.add_server(&name, server)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

/// Weight changes go to the live proxy without a reload.
async fn put_server_weight(
    State(plane): AppState,
    Path((name, server)): Path<(String, String)>,
    Json(body): Json<WeightUpdate>,
) -> ApiResult<Json<Server>> {
    plane.set_weight(&name, &server, body.weight).await?;
    plane.read(|c| Ok(Json(c.server(&name, &server)?.clone()))).await
}

async fn delete_server(
    State(plane): AppState,
    Path((name, server)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    plane.mutate(|txn| txn.delete_server(&name, &server)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// routes

async fn list_routes(State(plane): AppState) -> ApiResult<Json<Vec<Route>>> {
    plane.read(|c| Ok(Json(c.routes.clone()))).await
}

async fn get_route(State(plane): AppState, Path(route): Path<String>) -> ApiResult<Json<Route>> {
    plane.read(|c| Ok(Json(c.route(&route)?.clone()))).await
}

async fn post_route(
    State(plane): AppState,
    Json(route): Json<Route>,
) -> ApiResult<(StatusCode, Json<Route>)> {
    let created = route.clone();
    plane.mutate(|txn| txn.topology().add_route(route)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn put_route(
    State(plane): AppState,
    Path(name): Path<String>,
    Json(route): Json<Route>,
) -> ApiResult<Json<Route>> {
    let updated = route.clone();
    plane
        .mutate(|txn| txn.topology().update_route(&name, route))
        .await?;
    Ok(Json(updated))
}

async fn delete_route(State(plane): AppState, Path(route): Path<String>) -> ApiResult<StatusCode> {
    plane.mutate(|txn| txn.topology().delete_route(&route)).await?;
    Ok(StatusCode::NO_CONTENT)
}

// route services

async fn list_services(
    State(plane): AppState,
    Path(route): Path<String>,
) -> ApiResult<Json<Vec<Service>>> {
    plane.read(|c| Ok(Json(c.route_services(&route)?.to_vec()))).await
}

async fn get_service(
    State(plane): AppState,
    Path((route, service)): Path<(String, String)>,
) -> ApiResult<Json<Service>> {
    plane
        .read(|c| Ok(Json(c.route_service(&route, &service)?.clone())))
        .await
}

async fn post_service(
    State(plane): AppState,
    Path(route): Path<String>,
    Json(service): Json<Service>,
) -> ApiResult<(StatusCode, Json<Service>)> {
    let created = service.clone();
    plane
        .mutate(|txn| txn.topology().add_route_service(&route, service))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn put_service(
    State(plane): AppState,
    Path((route, name)): Path<(String, String)>,
    Json(service): Json<Service>,
) -> ApiResult<Json<Service>> {
    let updated = service.clone();
    plane
        .mutate(|txn| txn.topology().update_route_service(&route, &name, service))
        .await?;
    Ok(Json(updated))
}

async fn delete_service(
    State(plane): AppState,
    Path((route, service)): Path<(String, String)>,
) -> ApiResult<StatusCode> {
    plane
        .mutate(|txn| txn.topology().delete_route_service(&route, &service))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

// service servers

async fn list_service_servers(
    State(plane): AppState,
    Path((route, service)): Path<(String, String)>,
) -> ApiResult<Json<Vec<ServiceServer>>> {
    plane
        .read(|c| Ok(Json(c.service_servers(&route, &service)?.to_vec())))
        .await
}

async fn get_service_server(
    State(plane): AppState,
    Path((route, service, server)): Path<(String, String, String)>,
) -> ApiResult<Json<ServiceServer>> {
    plane
        .read(|c| Ok(Json(c.service_server(&route, &service, &server)?.clone())))
        .await
}

async fn post_service_server(
    State(plane): AppState,
    Path((route, service)): Path<(String, String)>,
    Json(server): Json<ServiceServer>,
) -> ApiResult<(StatusCode, Json<ServiceServer>)> {
    let created = server.clone();
    plane
        .mutate(|txn| txn.topology().add_service_server(&route, &service, server))
        .await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn put_service_server(
    State(plane): AppState,
    Path((route, service, name)): Path<(String, String, String)>,
    Json(server): Json<ServiceServer>,
) -> ApiResult<Json<ServiceServer>> {
    let updated = server.clone();
    plane
        .mutate(|txn| {
            txn.topology()
                .update_service_server(&route, &service, &name, server)
        })
        .await?;
    Ok(Json(updated))
}

async fn delete_service_server(
    State(plane): AppState,
    Path((route, service, server)): Path<(String, String, String)>,
) -> ApiResult<StatusCode> {
    plane
        .mutate(|txn| txn.topology().delete_service_server(&route, &service, &server))
        .await?;
    Ok(StatusCode::NO_CONTENT)
}
