//! In-memory configuration store.
//!
//! The store owns the [`Config`] graph behind a reader/writer lock. Callers
//! open a [`ReadTransaction`] or [`WriteTransaction`] and compose any number
//! of operations inside it; the lock is released when the transaction guard
//! goes out of scope, on every exit path including early returns and panics.
//!
//! Transactions do not nest and a read transaction cannot be upgraded. Taking
//! a second transaction on the same task while holding one deadlocks.
use std::{
    ops::{Deref, DerefMut},
    time::Duration,
};

use tokio::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::core::{
    error::{ControlError, ControlResult},
    filters::parse_filter,
    model::{Backend, Config, Filter, Frontend, Route, Server, Service, ServiceServer},
    topology::{SocketNamer, TopologyCompiler},
};

/// Shared owner of the configuration graph
#[derive(Debug)]
pub struct ConfigStore {
    config: RwLock<Config>,
    sockets: SocketNamer,
}

impl ConfigStore {
    pub fn new(config: Config, sockets: SocketNamer) -> Self {
        Self {
            config: RwLock::new(config),
            sockets,
        }
    }

    pub fn sockets(&self) -> &SocketNamer {
        &self.sockets
    }

    /// Open a shared read transaction.
    pub async fn read(&self) -> ReadTransaction<'_> {
        ReadTransaction {
            guard: self.config.read().await,
        }
    }

    /// Open an exclusive write transaction, waiting for all readers to finish.
    pub async fn write(&self) -> WriteTransaction<'_> {
        WriteTransaction {
            guard: self.config.write().await,
            sockets: &self.sockets,
        }
    }

    /// Open a write transaction, giving up after `deadline`.
    pub async fn write_with_deadline(&self, deadline: Duration) -> ControlResult<WriteTransaction<'_>> {
        match tokio::time::timeout(deadline, self.config.write()).await {
            Ok(guard) => Ok(WriteTransaction {
                guard,
                sockets: &self.sockets,
            }),
            Err(_) => {
                tracing::warn!("Timed out after {:?} waiting for the configuration write lock", deadline);
                Err(ControlError::Internal(format!(
                    "timed out after {deadline:?} waiting for the configuration write lock"
                )))
            }
        }
    }

    /// Point-in-time copy of the configuration.
    pub async fn snapshot(&self) -> Config {
        self.read().await.clone()
    }
}

/// Shared access to the configuration for the lifetime of the guard
pub struct ReadTransaction<'a> {
    guard: RwLockReadGuard<'a, Config>,
}

impl Deref for ReadTransaction<'_> {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.guard
    }
}

/// Exclusive access to the configuration for the lifetime of the guard
pub struct WriteTransaction<'a> {
    guard: RwLockWriteGuard<'a, Config>,
    sockets: &'a SocketNamer,
}

impl WriteTransaction<'_> {
    /// Route-level operations compiling into frontends and backends.
    pub fn topology(&mut self) -> TopologyCompiler<'_> {
        TopologyCompiler::new(&mut self.guard, self.sockets)
    }

    /// Replace the whole configuration, e.g. after an external sync.
    pub fn replace(&mut self, config: Config) {
        *self.guard = config;
    }

    /// Copy of the configuration as it stands inside this transaction.
    pub fn snapshot(&self) -> Config {
        self.guard.clone()
    }
}

impl Deref for WriteTransaction<'_> {
    type Target = Config;

    fn deref(&self) -> &Config {
        &self.guard
    }
}

impl DerefMut for WriteTransaction<'_> {
    fn deref_mut(&mut self) -> &mut Config {
        &mut self.guard
    }
}

// Frontends
impl Config {
    pub fn frontend(&self, name: &str) -> ControlResult<&Frontend> {
        self.frontends
            .iter()
            .find(|fe| fe.name == name)
            .ok_or_else(|| ControlError::not_found("frontend", name))
    }

    pub(crate) fn frontend_mut(&mut self, name: &str) -> ControlResult<&mut Frontend> {
        self.frontends
            .iter_mut()
            .find(|fe| fe.name == name)
            .ok_or_else(|| ControlError::not_found("frontend", name))
    }

    pub fn frontend_exists(&self, name: &str) -> bool {
        self.frontends.iter().any(|fe| fe.name == name)
    }

    pub fn add_frontend(&mut self, frontend: Frontend) -> ControlResult<()> {
        self.ensure_unowned("frontend", &frontend.name)?;
        self.insert_frontend(frontend)
    }

    pub(crate) fn insert_frontend(&mut self, frontend: Frontend) -> ControlResult<()> {
        frontend.validate()?;
        if self.frontend_exists(&frontend.name) {
            return Err(ControlError::conflict(format!(
                "frontend '{}' already exists",
                frontend.name
            )));
        }
        if let Some(socket) = &frontend.unix_sock {
            if let Some(other) = self
                .frontends
                .iter()
                .find(|fe| fe.unix_sock.as_ref() == Some(socket))
            {
                return Err(ControlError::conflict(format!(
                    "socket '{socket}' is already bound by frontend '{}'",
                    other.name
                )));
            }
        }
        self.frontends.push(frontend);
        Ok(())
    }

    /// Replace a frontend in place, keeping its position.
    pub fn update_frontend(&mut self, name: &str, frontend: Frontend) -> ControlResult<()> {
        self.ensure_unowned("frontend", name)?;
        self.ensure_unowned("frontend", &frontend.name)?;
        frontend.validate()?;
        if frontend.name != name && self.frontend_exists(&frontend.name) {
            return Err(ControlError::conflict(format!(
                "frontend '{}' already exists",
                frontend.name
            )));
        }
        let slot = self.frontend_mut(name)?;
        *slot = frontend;
        Ok(())
    }

    pub fn delete_frontend(&mut self, name: &str) -> ControlResult<Frontend> {
        self.ensure_unowned("frontend", name)?;
        self.remove_frontend(name)
    }

    pub(crate) fn remove_frontend(&mut self, name: &str) -> ControlResult<Frontend> {
        let index = self
            .frontends
            .iter()
            .position(|fe| fe.name == name)
            .ok_or_else(|| ControlError::not_found("frontend", name))?;
        Ok(self.frontends.remove(index))
    }
}

// Filters
impl Config {
    pub fn filters(&self, frontend: &str) -> ControlResult<&[Filter]> {
        Ok(&self.frontend(frontend)?.filters)
    }

    pub fn filter(&self, frontend: &str, name: &str) -> ControlResult<&Filter> {
        self.frontend(frontend)?
            .filters
            .iter()
            .find(|f| f.name == name)
            .ok_or_else(|| ControlError::not_found("filter", name))
    }

    /// Attach a filter to a frontend, translating its condition.
    pub fn add_filter(&mut self, frontend: &str, filter: Filter) -> ControlResult<()> {
        self.ensure_unowned("frontend", frontend)?;
        let parsed = parse_filter(&filter)?;
        let fe = self.frontend_mut(frontend)?;
        if fe.filters.iter().any(|f| f.name == parsed.name) {
            return Err(ControlError::conflict(format!(
                "filter '{}' already exists on frontend '{frontend}'",
                parsed.name
            )));
        }
        fe.filters.push(parsed);
        Ok(())
    }

    pub fn update_filter(&mut self, frontend: &str, name: &str, filter: Filter) -> ControlResult<()> {
        self.ensure_unowned("frontend", frontend)?;
        let parsed = parse_filter(&filter)?;
        let fe = self.frontend_mut(frontend)?;
        if parsed.name != name && fe.filters.iter().any(|f| f.name == parsed.name) {
            return Err(ControlError::conflict(format!(
                "filter '{}' already exists on frontend '{frontend}'",
                parsed.name
            )));
        }
        let slot = fe
            .filters
            .iter_mut()
            .find(|f| f.name == name)
            .ok_or_else(|| ControlError::not_found("filter", name))?;
        *slot = parsed;
        Ok(())
    }

    pub fn delete_filter(&mut self, frontend: &str, name: &str) -> ControlResult<Filter> {
        self.ensure_unowned("frontend", frontend)?;
        let fe = self.frontend_mut(frontend)?;
        let index = fe
            .filters
            .iter()
            .position(|f| f.name == name)
            .ok_or_else(|| ControlError::not_found("filter", name))?;
        Ok(fe.filters.remove(index))
    }
}

// Backends
impl Config {
    pub fn backend(&self, name: &str) -> ControlResult<&Backend> {
        self.backends
            .iter()
            .find(|be| be.name == name)
            .ok_or_else(|| ControlError::not_found("backend", name))
    }

    pub(crate) fn backend_mut(&mut self, name: &str) -> ControlResult<&mut Backend> {
        self.backends
            .iter_mut()
            .find(|be| be.name == name)
            .ok_or_else(|| ControlError::not_found("backend", name))
    }

    pub fn backend_exists(&self, name: &str) -> bool {
        self.backends.iter().any(|be| be.name == name)
    }

    /// Name of the first frontend (or frontend filter) still pointing at `backend`.
    pub fn backend_referrer(&self, backend: &str) -> Option<String> {
        for fe in &self.frontends {
            if fe.default_backend == backend {
                return Some(fe.name.clone());
            }
            if let Some(filter) = fe.filters.iter().find(|f| f.destination == backend) {
                return Some(format!("{}.filters.{}", fe.name, filter.name));
            }
        }
        None
    }

    pub fn add_backend(&mut self, backend: Backend) -> ControlResult<()> {
        self.ensure_unowned("backend", &backend.name)?;
        self.insert_backend(backend)
    }

    pub(crate) fn insert_backend(&mut self, backend: Backend) -> ControlResult<()> {
        backend.validate()?;
        if self.backend_exists(&backend.name) {
            return Err(ControlError::conflict(format!(
                "backend '{}' already exists",
                backend.name
            )));
        }
        self.backends.push(backend);
        Ok(())
    }

    pub fn update_backend(&mut self, name: &str, backend: Backend) -> ControlResult<()> {
        self.ensure_unowned("backend", name)?;
        self.ensure_unowned("backend", &backend.name)?;
        backend.validate()?;
        if backend.name != name {
            if self.backend_exists(&backend.name) {
                return Err(ControlError::conflict(format!(
                    "backend '{}' already exists",
                    backend.name
                )));
            }
            if let Some(referrer) = self.backend_referrer(name) {
                return Err(ControlError::conflict(format!(
                    "backend '{name}' cannot be renamed, still referenced by {referrer}"
                )));
            }
        }
        let slot = self.backend_mut(name)?;
        *slot = backend;
        Ok(())
    }

    /// Delete a backend no frontend refers to anymore.
    pub fn delete_backend(&mut self, name: &str) -> ControlResult<Backend> {
        self.ensure_unowned("backend", name)?;
        self.remove_backend(name)
    }

    pub(crate) fn remove_backend(&mut self, name: &str) -> ControlResult<Backend> {
        let index = self
            .backends
            .iter()
            .position(|be| be.name == name)
            .ok_or_else(|| ControlError::not_found("backend", name))?;
        if let Some(referrer) = self.backend_referrer(name) {
            return Err(ControlError::conflict(format!(
                "backend '{name}' is still referenced by {referrer}"
            )));
        }
        Ok(self.backends.remove(index))
    }
}

// Servers
impl Config {
    pub fn servers(&self, backend: &str) -> ControlResult<&[Server]> {
        Ok(&self.backend(backend)?.servers)
    }

    pub fn server(&self, backend: &str, name: &str) -> ControlResult<&Server> {
        self.backend(backend)?
            .servers
            .iter()
            .find(|s| s.name == name)
            .ok_or_else(|| ControlError::not_found("server", name))
    }

    fn server_mut(&mut self, backend: &str, name: &str) -> ControlResult<&mut Server> {
        self.backend_mut(backend)?
            .servers
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ControlError::not_found("server", name))
    }

    pub fn add_server(&mut self, backend: &str, server: Server) -> ControlResult<()> {
        self.ensure_unowned("backend", backend)?;
        self.insert_server(backend, server)
    }

    pub(crate) fn insert_server(&mut self, backend: &str, server: Server) -> ControlResult<()> {
        server.validate()?;
        let be = self.backend_mut(backend)?;
        if be.servers.iter().any(|s| s.name == server.name) {
            return Err(ControlError::conflict(format!(
                "server '{}' already exists in backend '{backend}'",
                server.name
            )));
        }
        be.servers.push(server);
        Ok(())
    }

    pub fn update_server(&mut self, backend: &str, name: &str, server: Server) -> ControlResult<()> {
        self.ensure_unowned("backend", backend)?;
        server.validate()?;
        let be = self.backend_mut(backend)?;
        if server.name != name && be.servers.iter().any(|s| s.name == server.name) {
            return Err(ControlError::conflict(format!(
                "server '{}' already exists in backend '{backend}'",
                server.name
            )));
        }
        let slot = be
            .servers
            .iter_mut()
            .find(|s| s.name == name)
            .ok_or_else(|| ControlError::not_found("server", name))?;
        *slot = server;
        Ok(())
    }

    pub fn delete_server(&mut self, backend: &str, name: &str) -> ControlResult<Server> {
        self.ensure_unowned("backend", backend)?;
        self.remove_server(backend, name)
    }

    pub(crate) fn remove_server(&mut self, backend: &str, name: &str) -> ControlResult<Server> {
        let be = self.backend_mut(backend)?;
        let index = be
            .servers
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| ControlError::not_found("server", name))?;
        Ok(be.servers.remove(index))
    }

    /// Change a server's weight in place. Does not render or reload.
    pub fn set_weight(&mut self, backend: &str, server: &str, weight: u32) -> ControlResult<()> {
        self.server_mut(backend, server)?.weight = weight;
        Ok(())
    }
}

// Reads over routes; mutations live in the topology compiler.
impl Config {
    pub fn route(&self, name: &str) -> ControlResult<&Route> {
        self.routes
            .iter()
            .find(|rt| rt.name == name)
            .ok_or_else(|| ControlError::not_found("route", name))
    }

    pub fn route_services(&self, route: &str) -> ControlResult<&[Service]> {
        Ok(&self.route(route)?.services)
    }

    pub fn route_service(&self, route: &str, service: &str) -> ControlResult<&Service> {
        self.route(route)?
            .service(service)
            .ok_or_else(|| ControlError::not_found("service", service))
    }

    pub fn service_servers(&self, route: &str, service: &str) -> ControlResult<&[ServiceServer]> {
        Ok(&self.route_service(route, service)?.servers)
    }

    pub fn service_server(
        &self,
        route: &str,
        service: &str,
        server: &str,
    ) -> ControlResult<&ServiceServer> {
        self.route_service(route, service)?
            .servers
            .iter()
            .find(|s| s.name == server)
            .ok_or_else(|| ControlError::not_found("server", server))
    }

    /// Route whose compiled primitives include a frontend or backend `name`.
    ///
    /// A route owns the stable pair named after it and every `<route>.<service>`
    /// pair, including the socket servers inside its stable backend.
    pub fn owning_route(&self, name: &str) -> Option<&str> {
        self.routes
            .iter()
            .find(|rt| {
                name == rt.name
                    || name
                        .strip_prefix(rt.name.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
            .map(|rt| rt.name.as_str())
    }

    /// Refuse direct changes to primitives compiled from a route.
    fn ensure_unowned(&self, kind: &str, name: &str) -> ControlResult<()> {
        match self.owning_route(name) {
            Some(route) => Err(ControlError::conflict(format!(
                "{kind} '{name}' belongs to route '{route}', change it through the route"
            ))),
            None => Ok(()),
        }
    }

    pub fn route_exists(&self, name: &str) -> bool {
        self.routes.iter().any(|rt| rt.name == name)
    }

    pub fn service_exists(&self, route: &str, service: &str) -> bool {
        self.route(route)
            .is_ok_and(|rt| rt.services.iter().any(|s| s.name == service))
    }

    pub fn server_exists(&self, route: &str, service: &str, server: &str) -> bool {
        self.route(route).is_ok_and(|rt| {
            rt.service(service)
                .is_some_and(|s| s.servers.iter().any(|srv| srv.name == server))
        })
    }

    /// Frontend default backends and filter destinations naming a missing backend.
    pub fn dangling_references(&self) -> Vec<String> {
        let mut dangling = Vec::new();
        for fe in &self.frontends {
            if !self.backend_exists(&fe.default_backend) {
                dangling.push(format!(
                    "frontend '{}' default backend '{}'",
                    fe.name, fe.default_backend
                ));
            }
            for filter in &fe.filters {
                if !self.backend_exists(&filter.destination) {
                    dangling.push(format!(
                        "frontend '{}' filter '{}' destination '{}'",
                        fe.name, filter.name, filter.destination
                    ));
                }
            }
        }
        dangling
    }
}
