//! Scriptable in-memory collaborators for unit tests.

use crate::traits::*;
use crate::types::ErrorKind;
use std::collections::{HashMap, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Debug, Clone, Copy)]
pub enum Fault {
    Tls,
    Connect,
    Timeout,
    NotFound,
    Other,
}

impl Fault {
    pub fn to_error(self) -> TransportError {
        match self {
            Fault::Tls => TransportError::Tls("certificate has expired".into()),
            Fault::Connect => TransportError::Connect("connection refused".into()),
            Fault::Timeout => TransportError::Timeout(Duration::from_millis(10)),
            Fault::NotFound => TransportError::NotFound("no such container".into()),
            Fault::Other => TransportError::Other("unexpected failure".into()),
        }
    }
}

// ---------------------------------------------------------------------------
// HTTP
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeHttp {
    scripted: Mutex<HashMap<String, Result<HttpResponse, Fault>>>,
    delays: Mutex<HashMap<String, Duration>>,
    pub requests: Mutex<Vec<HttpRequest>>,
    in_flight: AtomicUsize,
    /// Highest number of requests seen in flight at once.
    pub max_in_flight: AtomicUsize,
}

impl FakeHttp {
    pub fn respond(&self, url: &str, status: u16, headers: &[(&str, &str)]) {
        let resp = HttpResponse {
            status,
            headers: headers
                .iter()
                .map(|(k, v)| (k.to_ascii_lowercase(), v.to_string()))
                .collect(),
            body: String::new(),
        };
        self.scripted
            .lock()
            .unwrap()
            .insert(url.to_string(), Ok(resp));
    }

    pub fn fail(&self, url: &str, fault: Fault) {
        self.scripted
            .lock()
            .unwrap()
            .insert(url.to_string(), Err(fault));
    }

    /// Hold every request to `url` for `delay` before answering.
    pub fn slow(&self, url: &str, delay: Duration) {
        self.delays.lock().unwrap().insert(url.to_string(), delay);
    }
}

#[async_trait::async_trait]
impl HttpClient for FakeHttp {
    async fn request(&self, req: HttpRequest) -> TransportResult<HttpResponse> {
        let scripted = self.scripted.lock().unwrap().get(&req.url).cloned();
        let delay = self.delays.lock().unwrap().get(&req.url).copied();
        self.requests.lock().unwrap().push(req);

        if let Some(delay) = delay {
            let n = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(n, Ordering::SeqCst);
            tokio::time::sleep(delay).await;
            self.in_flight.fetch_sub(1, Ordering::SeqCst);
        }
        match scripted {
            Some(Ok(resp)) => Ok(resp),
            Some(Err(fault)) => Err(fault.to_error()),
            None => Err(Fault::Connect.to_error()),
        }
    }
}

// ---------------------------------------------------------------------------
// DNS
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeDns {
    a: Mutex<HashMap<String, Result<Vec<Ipv4Addr>, Fault>>>,
    ptr: Mutex<HashMap<IpAddr, Vec<String>>>,
    pub queries: Mutex<Vec<(String, Vec<IpAddr>)>>,
}

impl FakeDns {
    pub fn a_records(&self, host: &str, addrs: &[Ipv4Addr]) {
        self.a
            .lock()
            .unwrap()
            .insert(host.to_string(), Ok(addrs.to_vec()));
    }

    pub fn fail_a(&self, host: &str, fault: Fault) {
        self.a.lock().unwrap().insert(host.to_string(), Err(fault));
    }

    pub fn ptr_records(&self, ip: IpAddr, names: &[&str]) {
        self.ptr
            .lock()
            .unwrap()
            .insert(ip, names.iter().map(|n| n.to_string()).collect());
    }
}

#[async_trait::async_trait]
impl DnsResolver for FakeDns {
    async fn lookup_a(
        &self,
        host: &str,
        nameservers: &[IpAddr],
        _timeout: Duration,
    ) -> TransportResult<Vec<Ipv4Addr>> {
        self.queries
            .lock()
            .unwrap()
            .push((host.to_string(), nameservers.to_vec()));
        match self.a.lock().unwrap().get(host).cloned() {
            Some(Ok(addrs)) => Ok(addrs),
            Some(Err(fault)) => Err(fault.to_error()),
            None => Ok(Vec::new()),
        }
    }

    async fn reverse(
        &self,
        ip: IpAddr,
        _nameservers: &[IpAddr],
        _timeout: Duration,
    ) -> TransportResult<Vec<String>> {
        Ok(self.ptr.lock().unwrap().get(&ip).cloned().unwrap_or_default())
    }
}

// ---------------------------------------------------------------------------
// Database
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
pub enum DbScript {
    Scalar(i64),
    ConnectFails(Fault),
    QueryFails(Fault),
}

pub struct FakeDb {
    script: Mutex<DbScript>,
    pub closed: Arc<AtomicUsize>,
}

impl FakeDb {
    pub fn new(script: DbScript) -> Self {
        Self {
            script: Mutex::new(script),
            closed: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn set(&self, script: DbScript) {
        *self.script.lock().unwrap() = script;
    }

    pub fn close_count(&self) -> usize {
        self.closed.load(Ordering::SeqCst)
    }
}

impl Default for FakeDb {
    fn default() -> Self {
        Self::new(DbScript::Scalar(1))
    }
}

struct FakeSession {
    script: DbScript,
    closed: Arc<AtomicUsize>,
}

#[async_trait::async_trait]
impl DbConnection for FakeSession {
    async fn query_scalar(&mut self, _sql: &str) -> TransportResult<i64> {
        match self.script {
            DbScript::Scalar(v) => Ok(v),
            DbScript::QueryFails(fault) => Err(fault.to_error()),
            DbScript::ConnectFails(fault) => Err(fault.to_error()),
        }
    }

    async fn close(self: Box<Self>) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait::async_trait]
impl Database for FakeDb {
    async fn connect(
        &self,
        _target: &DbTarget,
        _timeout: Duration,
    ) -> TransportResult<Box<dyn DbConnection>> {
        let script = *self.script.lock().unwrap();
        if let DbScript::ConnectFails(fault) = script {
            return Err(fault.to_error());
        }
        Ok(Box::new(FakeSession {
            script,
            closed: Arc::clone(&self.closed),
        }))
    }
}

// ---------------------------------------------------------------------------
// Container runtime
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct FakeRuntime {
    /// Container names whose restart fails.
    pub failing: Mutex<HashSet<String>>,
    /// Container names that do not exist.
    pub missing: Mutex<HashSet<String>>,
    /// Every completed restart call, in order.
    pub restarts: Mutex<Vec<String>>,
    pub delay: Mutex<Duration>,
    in_flight: Mutex<HashMap<String, usize>>,
    /// Highest number of overlapping restarts seen for any single container.
    pub max_overlap: AtomicUsize,
}

impl FakeRuntime {
    pub fn fail_restart(&self, name: &str) {
        self.failing.lock().unwrap().insert(name.to_string());
    }

    pub fn remove(&self, name: &str) {
        self.missing.lock().unwrap().insert(name.to_string());
    }

    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = delay;
    }

    pub fn restarted(&self) -> Vec<String> {
        self.restarts.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl ContainerRuntime for FakeRuntime {
    async fn get(&self, name: &str) -> TransportResult<ContainerHandle> {
        if self.missing.lock().unwrap().contains(name) {
            return Err(Fault::NotFound.to_error());
        }
        Ok(ContainerHandle {
            name: name.to_string(),
            id: format!("id-{}", name),
        })
    }

    async fn restart(&self, handle: &ContainerHandle) -> TransportResult<()> {
        {
            let mut in_flight = self.in_flight.lock().unwrap();
            let n = in_flight.entry(handle.name.clone()).or_insert(0);
            *n += 1;
            self.max_overlap.fetch_max(*n, Ordering::SeqCst);
        }

        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        if let Some(n) = self.in_flight.lock().unwrap().get_mut(&handle.name) {
            *n -= 1;
        }
        self.restarts.lock().unwrap().push(handle.name.clone());

        if self.failing.lock().unwrap().contains(&handle.name) {
            return Err(Fault::Other.to_error());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Annotator
// ---------------------------------------------------------------------------

pub struct EchoAnnotator;

#[async_trait::async_trait]
impl Annotator for EchoAnnotator {
    async fn annotate(&self, kind: ErrorKind, message: &str) -> Option<String> {
        Some(format!("{}: {}", kind, message))
    }
}
