//! Route compilation.
//!
//! A [`Route`] is compiled into proxy primitives connected through local
//! sockets:
//!
//! ```text
//!                          -> [server r.a] -> socket -> [frontend r.a : backend r.a] -> host:port
//!                        /
//! -> [frontend r : backend r]
//!                        \
//!                          -> [server r.b] -> socket -> [frontend r.b : backend r.b] -> host:port
//! ```
//!
//! The stable pair `r` is the externally reachable endpoint. Each service
//! gets a secondary pair named `r.<service>` listening on its own socket, and
//! a socket server in the stable backend carrying the service weight. The
//! compiled name is the join key between the logical route and its
//! primitives, so renames are always delete and recreate.
//!
//! Every operation either applies fully or leaves the configuration exactly
//! as it was before the call.
use std::path::{Path, PathBuf};

use sha1::{Digest, Sha1};

use crate::core::{
    error::{ControlError, ControlResult},
    filters::resolve_filters,
    model::{
        Backend, Config, Frontend, Mode, Route, Server, Service, ServiceServer, is_valid_name,
        validate_token,
    },
};

/// Longest path a Unix domain socket address can hold (`sun_path` minus NUL)
pub const MAX_SOCKET_PATH_LENGTH: usize = 103;

/// Weight of the compiled servers inside a service backend
pub const SERVICE_SERVER_WEIGHT: u32 = 100;

/// Name of the compiled primitives for one service of a route.
pub fn compiled_name(route: &str, service: &str) -> String {
    format!("{route}.{service}")
}

/// Derives collision-free socket paths inside a directory
#[derive(Debug, Clone)]
pub struct SocketNamer {
    dir: PathBuf,
}

impl SocketNamer {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// `<dir>/<sha1(name)>.sock`, rejected when too long for a socket address.
    pub fn path_for(&self, name: &str) -> ControlResult<String> {
        let digest = Sha1::digest(name.as_bytes());
        let path = self.dir.join(format!("{digest:x}.sock"));
        let path = path.to_string_lossy().into_owned();
        if path.len() > MAX_SOCKET_PATH_LENGTH {
            return Err(ControlError::bad_request(format!(
                "socket path '{path}' exceeds {MAX_SOCKET_PATH_LENGTH} bytes, use a shorter working directory"
            )));
        }
        Ok(path)
    }
}

fn validate_name(kind: &str, name: &str) -> ControlResult<()> {
    if name.trim().is_empty() {
        return Err(ControlError::bad_request(format!("{kind} name is required")));
    }
    if name.contains('.') || !is_valid_name(name) {
        return Err(ControlError::bad_request(format!(
            "{kind} name '{name}' must contain only letters, digits, '_', ':' or '-'"
        )));
    }
    Ok(())
}

fn validate_service(service: &Service) -> ControlResult<()> {
    validate_name("service", &service.name)?;
    for (i, server) in service.servers.iter().enumerate() {
        validate_service_server(server)?;
        if service.servers[..i].iter().any(|s| s.name == server.name) {
            return Err(ControlError::bad_request(format!(
                "service '{}' lists server '{}' twice",
                service.name, server.name
            )));
        }
    }
    Ok(())
}

fn validate_service_server(server: &ServiceServer) -> ControlResult<()> {
    if server.name.trim().is_empty() {
        return Err(ControlError::bad_request("server name is required"));
    }
    if server.host.trim().is_empty() {
        return Err(ControlError::bad_request(format!(
            "server '{}' requires a host",
            server.name
        )));
    }
    validate_token("server host", &server.host)
}

fn validate_route(route: &Route) -> ControlResult<()> {
    validate_name("route", &route.name)?;
    if route.port == 0 {
        return Err(ControlError::bad_request(format!(
            "route '{}' requires a port",
            route.name
        )));
    }
    for (i, service) in route.services.iter().enumerate() {
        validate_service(service)?;
        if route.services[..i].iter().any(|s| s.name == service.name) {
            return Err(ControlError::bad_request(format!(
                "route '{}' lists service '{}' twice",
                route.name, service.name
            )));
        }
    }
    for filter in &route.filters {
        if route.service(&filter.destination).is_none() {
            return Err(ControlError::bad_request(format!(
                "filter '{}' of route '{}' points at unknown service '{}'",
                filter.name, route.name, filter.destination
            )));
        }
    }
    Ok(())
}

/// Route-level operations over a configuration held in a write transaction
pub struct TopologyCompiler<'a> {
    config: &'a mut Config,
    sockets: &'a SocketNamer,
}

impl<'a> TopologyCompiler<'a> {
    pub fn new(config: &'a mut Config, sockets: &'a SocketNamer) -> Self {
        Self { config, sockets }
    }

    /// Run `op` against the configuration, restoring the pre-call state on error.
    fn transactional<T>(
        &mut self,
        op: impl FnOnce(&mut Config, &SocketNamer) -> ControlResult<T>,
    ) -> ControlResult<T> {
        let before = self.config.clone();
        match op(&mut *self.config, self.sockets) {
            Ok(value) => Ok(value),
            Err(e) => {
                tracing::debug!("Rolling back topology change: {}", e);
                *self.config = before;
                Err(e)
            }
        }
    }

    pub fn routes(&self) -> &[Route] {
        &self.config.routes
    }

    pub fn route(&self, name: &str) -> ControlResult<&Route> {
        self.config.route(name)
    }

    pub fn add_route(&mut self, route: Route) -> ControlResult<()> {
        self.transactional(|config, sockets| compile_route(config, sockets, route))
    }

    pub fn delete_route(&mut self, name: &str) -> ControlResult<Route> {
        self.transactional(|config, _| decompile_route(config, name))
    }

    /// Recompile a route from scratch; `route.name` may differ from `name`.
    pub fn update_route(&mut self, name: &str, route: Route) -> ControlResult<()> {
        self.transactional(|config, sockets| {
            decompile_route(config, name)?;
            compile_route(config, sockets, route)
        })
    }

    pub fn services(&self, route: &str) -> ControlResult<&[Service]> {
        self.config.route_services(route)
    }

    pub fn service(&self, route: &str, service: &str) -> ControlResult<&Service> {
        self.config.route_service(route, service)
    }

    pub fn add_route_service(&mut self, route: &str, service: Service) -> ControlResult<()> {
        self.transactional(|config, sockets| {
            validate_service(&service)?;
            let rt = config.route(route)?;
            if rt.service(&service.name).is_some() {
                return Err(ControlError::conflict(format!(
                    "service '{}' already exists in route '{route}'",
                    service.name
                )));
            }
            let mode = rt.protocol;
            compile_service(config, sockets, route, mode, &service)?;
            route_mut(config, route)?.services.push(service);
            Ok(())
        })
    }

    pub fn delete_route_service(&mut self, route: &str, service: &str) -> ControlResult<Service> {
        self.transactional(|config, _| {
            let index = service_index(config, route, service)?;
            decompile_service(config, route, service)?;
            Ok(route_mut(config, route)?.services.remove(index))
        })
    }

    /// Recompile one service unit, keeping its position in the route.
    pub fn update_route_service(
        &mut self,
        route: &str,
        name: &str,
        service: Service,
    ) -> ControlResult<()> {
        self.transactional(|config, sockets| recompile_service(config, sockets, route, name, service))
    }

    pub fn service_servers(&self, route: &str, service: &str) -> ControlResult<&[ServiceServer]> {
        self.config.service_servers(route, service)
    }

    pub fn service_server(
        &self,
        route: &str,
        service: &str,
        server: &str,
    ) -> ControlResult<&ServiceServer> {
        self.config.service_server(route, service, server)
    }

    pub fn add_service_server(
        &mut self,
        route: &str,
        service: &str,
        server: ServiceServer,
    ) -> ControlResult<()> {
        self.transactional(|config, sockets| {
            let mut updated = current_service(config, route, service)?;
            if updated.servers.iter().any(|s| s.name == server.name) {
                return Err(ControlError::conflict(format!(
                    "server '{}' already exists in service '{service}'",
                    server.name
                )));
            }
            updated.servers.push(server);
            recompile_service(config, sockets, route, service, updated)
        })
    }

    pub fn update_service_server(
        &mut self,
        route: &str,
        service: &str,
        name: &str,
        server: ServiceServer,
    ) -> ControlResult<()> {
        self.transactional(|config, sockets| {
            let mut updated = current_service(config, route, service)?;
            if server.name != name && updated.servers.iter().any(|s| s.name == server.name) {
                return Err(ControlError::conflict(format!(
                    "server '{}' already exists in service '{service}'",
                    server.name
                )));
            }
            let slot = updated
                .servers
                .iter_mut()
                .find(|s| s.name == name)
                .ok_or_else(|| ControlError::not_found("server", name))?;
            *slot = server;
            recompile_service(config, sockets, route, service, updated)
        })
    }

    pub fn delete_service_server(
        &mut self,
        route: &str,
        service: &str,
        name: &str,
    ) -> ControlResult<ServiceServer> {
        self.transactional(|config, sockets| {
            let mut updated = current_service(config, route, service)?;
            let index = updated
                .servers
                .iter()
                .position(|s| s.name == name)
                .ok_or_else(|| ControlError::not_found("server", name))?;
            let removed = updated.servers.remove(index);
            recompile_service(config, sockets, route, service, updated)?;
            Ok(removed)
        })
    }
}

fn route_mut<'c>(config: &'c mut Config, name: &str) -> ControlResult<&'c mut Route> {
    config
        .routes
        .iter_mut()
        .find(|rt| rt.name == name)
        .ok_or_else(|| ControlError::not_found("route", name))
}

fn service_index(config: &Config, route: &str, service: &str) -> ControlResult<usize> {
    config
        .route(route)?
        .services
        .iter()
        .position(|s| s.name == service)
        .ok_or_else(|| ControlError::not_found("service", service))
}

fn current_service(config: &Config, route: &str, service: &str) -> ControlResult<Service> {
    config.route_service(route, service).cloned()
}

fn compile_route(config: &mut Config, sockets: &SocketNamer, route: Route) -> ControlResult<()> {
    validate_route(&route)?;
    if config.route_exists(&route.name) {
        return Err(ControlError::conflict(format!(
            "route '{}' already exists",
            route.name
        )));
    }

    config.insert_backend(Backend::new(&route.name, route.protocol, true, Vec::new()))?;

    let mut stable = Frontend::bound_to_port(&route.name, route.protocol, route.port, &route.name);
    stable.filters = resolve_filters(&route)?;
    stable.http_quota = route.http_quota.clone();
    stable.tcp_quota = route.tcp_quota.clone();
    config.insert_frontend(stable)?;

    for service in &route.services {
        compile_service(config, sockets, &route.name, route.protocol, service)?;
    }

    tracing::debug!(
        "Compiled route '{}' with {} service(s)",
        route.name,
        route.services.len()
    );
    config.routes.push(route);
    Ok(())
}

fn compile_service(
    config: &mut Config,
    sockets: &SocketNamer,
    route: &str,
    mode: Mode,
    service: &Service,
) -> ControlResult<()> {
    let name = compiled_name(route, &service.name);
    let socket = sockets.path_for(&name)?;

    config.insert_server(route, Server::socket(&name, &socket, service.weight))?;

    let servers = service
        .servers
        .iter()
        .map(|s| Server::network(&s.name, &s.host, s.port, SERVICE_SERVER_WEIGHT))
        .collect();
    config.insert_backend(Backend::new(&name, mode, false, servers))?;
    config.insert_frontend(Frontend::bound_to_socket(&name, mode, socket, &name))?;
    Ok(())
}

fn decompile_service(config: &mut Config, route: &str, service: &str) -> ControlResult<()> {
    let name = compiled_name(route, service);
    config.remove_frontend(&name)?;
    config.remove_backend(&name)?;
    config.remove_server(route, &name)?;
    Ok(())
}

fn decompile_route(config: &mut Config, name: &str) -> ControlResult<Route> {
    let index = config
        .routes
        .iter()
        .position(|rt| rt.name == name)
        .ok_or_else(|| ControlError::not_found("route", name))?;

    // the stable frontend's filters point at service backends
    config.remove_frontend(name)?;
    let services: Vec<String> = config.routes[index]
        .services
        .iter()
        .map(|s| s.name.clone())
        .collect();
    for service in &services {
        decompile_service(config, name, service)?;
    }
    config.remove_backend(name)?;

    tracing::debug!("Removed route '{}' and {} service(s)", name, services.len());
    Ok(config.routes.remove(index))
}

fn recompile_service(
    config: &mut Config,
    sockets: &SocketNamer,
    route: &str,
    name: &str,
    service: Service,
) -> ControlResult<()> {
    validate_service(&service)?;
    let index = service_index(config, route, name)?;
    let rt = config.route(route)?;
    if service.name != name && rt.service(&service.name).is_some() {
        return Err(ControlError::conflict(format!(
            "service '{}' already exists in route '{route}'",
            service.name
        )));
    }
    let mode = rt.protocol;
    let old_name = compiled_name(route, name);
    let slot = config
        .backend(route)?
        .servers
        .iter()
        .position(|s| s.name == old_name)
        .ok_or_else(|| ControlError::not_found("server", &old_name))?;

    // route filters aimed at this service are resolved again below
    config
        .frontend_mut(route)?
        .filters
        .retain(|f| f.destination != old_name);

    decompile_service(config, route, name)?;
    compile_service(config, sockets, route, mode, &service)?;

    // keep the socket server where it was in the stable backend
    let servers = &mut config.backend_mut(route)?.servers;
    if let Some(server) = servers.pop() {
        servers.insert(slot.min(servers.len()), server);
    }

    let rt = route_mut(config, route)?;
    for filter in rt.filters.iter_mut().filter(|f| f.destination == name) {
        filter.destination = service.name.clone();
    }
    rt.services[index] = service;
    let filters = resolve_filters(config.route(route)?)?;
    config.frontend_mut(route)?.filters = filters;
    Ok(())
}
