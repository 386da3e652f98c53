//! Shared utilities for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use unidirector::dynamic::{AddressResolver, BackendFactory, BackendTemplate};
use unidirector::load_balancer::backend::{same_backend, Backend, BackendRef};

/// Resolver whose answer is set by the test.
#[derive(Debug)]
pub struct ScriptedResolver {
    answer: Mutex<Result<Vec<IpAddr>, String>>,
    calls: AtomicUsize,
}

impl ScriptedResolver {
    pub fn new(ips: &[&str]) -> Arc<Self> {
        let resolver = Arc::new(Self {
            answer: Mutex::new(Ok(Vec::new())),
            calls: AtomicUsize::new(0),
        });
        resolver.answer(ips);
        resolver
    }

    pub fn answer(&self, ips: &[&str]) {
        *self.answer.lock() = Ok(ips.iter().map(|ip| ip.parse().unwrap()).collect());
    }

    pub fn fail(&self, reason: &str) {
        *self.answer.lock() = Err(reason.to_string());
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl AddressResolver for ScriptedResolver {
    fn resolve(&self, host: &str, port: u16) -> io::Result<Vec<SocketAddr>> {
        let answer = self.answer.lock().clone();
        self.calls.fetch_add(1, Ordering::SeqCst);
        match answer {
            Ok(ips) => Ok(ips.into_iter().map(|ip| SocketAddr::new(ip, port)).collect()),
            Err(reason) => Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{}: {}", host, reason),
            )),
        }
    }
}

/// Factory that counts creations and releases per address.
#[derive(Debug, Default)]
pub struct CountingFactory {
    created: Mutex<Vec<BackendRef>>,
    released: Mutex<HashMap<SocketAddr, usize>>,
}

impl CountingFactory {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn created(&self) -> usize {
        self.created.lock().len()
    }

    pub fn released(&self, addr: &str) -> usize {
        let addr: SocketAddr = addr.parse().unwrap();
        self.released.lock().get(&addr).copied().unwrap_or(0)
    }

    pub fn total_released(&self) -> usize {
        self.released.lock().values().sum()
    }
}

impl BackendFactory for CountingFactory {
    fn create(&self, template: &BackendTemplate, addr: SocketAddr) -> BackendRef {
        let backend: BackendRef = Arc::new(Backend::new(
            format!("{}({})", template.pool, addr),
            addr,
            template.max_connections,
        ));
        self.created.lock().push(backend.clone());
        backend
    }

    fn release(&self, backend: BackendRef) {
        assert!(
            self.created.lock().iter().any(|b| same_backend(b, &backend)),
            "released a backend this factory never created"
        );
        if let Some(addr) = backend.address() {
            *self.released.lock().entry(addr).or_default() += 1;
        }
    }
}

pub fn backend(name: &str, port: u16) -> Arc<Backend> {
    Arc::new(Backend::new(
        name,
        SocketAddr::from(([127, 0, 0, 1], port)),
        0,
    ))
}

/// Poll `cond` until it holds or five seconds pass.
pub fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(Instant::now() < deadline, "timed out waiting for {}", what);
        thread::sleep(Duration::from_millis(5));
    }
}
