/// Concurrent dispatch of key queries to federated peers
///
/// One task per remote MX host, all started before any is awaited. Every task
/// reports on the same channel, and the caller stops listening once a single
/// shared deadline passes. Tasks still running at that point are not
/// cancelled; they are drained in the background after the response is final.
use crate::{
    error::{ServerError, ServerResult},
    federation::{KeyQuery, ResolutionResponse, QUERY_PATH},
};
use async_trait::async_trait;
use reqwest::Client;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio::task::{AbortHandle, JoinHandle};
use tokio::time::{timeout_at, Instant};
use tracing::{debug, warn};

/// Sends one key query to one peer
#[async_trait]
pub trait PeerTransport: Send + Sync {
    async fn query(&self, mx_host: &str, query: &KeyQuery) -> ServerResult<ResolutionResponse>;
}

/// Form-encoded POST over HTTP(S) to the peer's MX host
#[derive(Clone)]
pub struct HttpPeerTransport {
    http_client: Client,
    scheme: String,
    port: Option<u16>,
}

impl HttpPeerTransport {
    /// Create a transport with its own HTTP client
    pub fn new(
        user_agent: &str,
        timeout: Duration,
        scheme: &str,
        port: Option<u16>,
    ) -> ServerResult<Self> {
        let http_client = Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .build()
            .map_err(|e| ServerError::Internal(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self::with_client(http_client, scheme, port))
    }

    /// Create a transport around an existing client
    pub fn with_client(http_client: Client, scheme: &str, port: Option<u16>) -> Self {
        Self {
            http_client,
            scheme: scheme.to_string(),
            port,
        }
    }

    /// Query endpoint URL for a peer
    pub fn query_url(&self, mx_host: &str) -> String {
        match self.port {
            Some(port) => format!("{}://{}:{}{}", self.scheme, mx_host, port, QUERY_PATH),
            None => format!("{}://{}{}", self.scheme, mx_host, QUERY_PATH),
        }
    }
}

#[async_trait]
impl PeerTransport for HttpPeerTransport {
    async fn query(&self, mx_host: &str, query: &KeyQuery) -> ServerResult<ResolutionResponse> {
        let url = self.query_url(mx_host);

        debug!("Dispatching key query to {}", url);

        let response = self
            .http_client
            .post(&url)
            .form(query)
            .send()
            .await
            .map_err(|e| ServerError::Federation(format!("Request to {} failed: {}", mx_host, e)))?;

        if !response.status().is_success() {
            return Err(ServerError::Federation(format!(
                "{} returned error: {}",
                mx_host,
                response.status()
            )));
        }

        response
            .json::<ResolutionResponse>()
            .await
            .map_err(|e| ServerError::Federation(format!("Unparsable response from {}: {}", mx_host, e)))
    }
}

/// Query bound for one remote host
#[derive(Debug, Clone, PartialEq)]
pub struct DispatchTask {
    pub host: String,
    pub query: KeyQuery,
}

/// Completion of one dispatch task
#[derive(Debug)]
pub struct PeerReply {
    pub host: String,
    pub result: ServerResult<ResolutionResponse>,
}

/// Where a dispatched host stands from the caller's point of view
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PeerState {
    Pending,
    /// Replied before the deadline; the only state that contributes
    Arrived,
    /// Deadline passed first; any reply goes to the background drain
    Missed,
}

/// Starts dispatch tasks
#[derive(Clone)]
pub struct Dispatcher {
    transport: Arc<dyn PeerTransport>,
    deadline: Duration,
    drain_timeout: Duration,
}

impl Dispatcher {
    pub fn new(transport: Arc<dyn PeerTransport>, deadline: Duration, drain_timeout: Duration) -> Self {
        Self {
            transport,
            deadline,
            drain_timeout,
        }
    }

    /// Spawn every task and start the shared deadline clock
    pub fn dispatch(&self, tasks: Vec<DispatchTask>) -> InFlight {
        let deadline = Instant::now() + self.deadline;
        let (tx, rx) = mpsc::channel(tasks.len().max(1));

        let mut handles = Vec::with_capacity(tasks.len());
        let mut states = HashMap::with_capacity(tasks.len());

        for DispatchTask { host, query } in tasks {
            let tx = tx.clone();
            let transport = Arc::clone(&self.transport);
            states.insert(host.clone(), PeerState::Pending);

            let handle = tokio::spawn(async move {
                let result = transport.query(&host, &query).await;
                if tx.send(PeerReply { host, result }).await.is_err() {
                    debug!("Reply dropped, nobody is listening any more");
                }
            });
            handles.push(handle.abort_handle());
        }

        InFlight {
            rx,
            outstanding: handles.len(),
            deadline,
            expired: false,
            states,
            handles,
            drain_timeout: self.drain_timeout,
        }
    }
}

/// Replies still owed by dispatched tasks
pub struct InFlight {
    rx: mpsc::Receiver<PeerReply>,
    outstanding: usize,
    deadline: Instant,
    expired: bool,
    states: HashMap<String, PeerState>,
    handles: Vec<AbortHandle>,
    drain_timeout: Duration,
}

impl InFlight {
    /// Next reply that arrives before the deadline, or `None` once every
    /// task has answered or the deadline has passed.
    pub async fn next(&mut self) -> Option<PeerReply> {
        if self.outstanding == 0 || self.expired {
            return None;
        }

        if Instant::now() >= self.deadline {
            self.expire();
            return None;
        }

        match timeout_at(self.deadline, self.rx.recv()).await {
            Ok(Some(reply)) => {
                self.outstanding -= 1;
                self.states.insert(reply.host.clone(), PeerState::Arrived);
                Some(reply)
            }
            Ok(None) => {
                self.outstanding = 0;
                None
            }
            Err(_) => {
                self.expire();
                None
            }
        }
    }

    fn expire(&mut self) {
        self.expired = true;
        for (host, state) in self.states.iter_mut() {
            if *state == PeerState::Pending {
                warn!("Peer {} missed the key query deadline", host);
                *state = PeerState::Missed;
            }
        }
    }

    /// Tasks that have not reported yet
    pub fn outstanding(&self) -> usize {
        self.outstanding
    }

    pub fn state(&self, host: &str) -> Option<PeerState> {
        self.states.get(host).copied()
    }

    /// Hand the remaining replies to a detached drain task.
    ///
    /// The drain owns nothing but the channel: late replies are logged and
    /// dropped, which releases their connections. Tasks still running after
    /// the drain timeout are aborted.
    pub fn release(self) -> Option<JoinHandle<usize>> {
        if self.outstanding == 0 {
            return None;
        }

        Some(tokio::spawn(drain(
            self.rx,
            self.outstanding,
            self.handles,
            self.drain_timeout,
        )))
    }
}

async fn drain(
    mut rx: mpsc::Receiver<PeerReply>,
    mut outstanding: usize,
    handles: Vec<AbortHandle>,
    drain_timeout: Duration,
) -> usize {
    let cutoff = Instant::now() + drain_timeout;
    let mut drained = 0;

    while outstanding > 0 {
        match timeout_at(cutoff, rx.recv()).await {
            Ok(Some(reply)) => {
                outstanding -= 1;
                drained += 1;
                match reply.result {
                    Ok(_) => debug!("Discarded late key query reply from {}", reply.host),
                    Err(e) => debug!("Late key query failure from {}: {}", reply.host, e),
                }
            }
            Ok(None) => break,
            Err(_) => {
                warn!("Aborting {} key query task(s) still running after drain timeout", outstanding);
                for handle in &handles {
                    handle.abort();
                }
                break;
            }
        }
    }

    drained
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Answers after a per-host delay; hosts without a delay never answer
    struct ScriptedTransport {
        delays: HashMap<String, Duration>,
        calls: AtomicUsize,
    }

    impl ScriptedTransport {
        fn new(delays: &[(&str, u64)]) -> Self {
            Self {
                delays: delays
                    .iter()
                    .map(|(h, ms)| (h.to_string(), Duration::from_millis(*ms)))
                    .collect(),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PeerTransport for ScriptedTransport {
        async fn query(&self, mx_host: &str, _query: &KeyQuery) -> ServerResult<ResolutionResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match self.delays.get(mx_host) {
                Some(delay) => {
                    tokio::time::sleep(*delay).await;
                    Ok(ResolutionResponse::default())
                }
                None => std::future::pending().await,
            }
        }
    }

    fn task(host: &str) -> DispatchTask {
        DispatchTask {
            host: host.to_string(),
            query: KeyQuery::default(),
        }
    }

    #[test]
    fn test_query_url() {
        let transport = HttpPeerTransport::with_client(Client::new(), "https", None);
        assert_eq!(transport.query_url("mx.peer.test"), "https://mx.peer.test/publickeys/query");

        let transport = HttpPeerTransport::with_client(Client::new(), "http", Some(8080));
        assert_eq!(transport.query_url("mx.peer.test"), "http://mx.peer.test:8080/publickeys/query");
    }

    #[tokio::test]
    async fn test_all_replies_before_deadline() {
        let transport = Arc::new(ScriptedTransport::new(&[("a.test", 10), ("b.test", 30)]));
        let dispatcher = Dispatcher::new(transport.clone(), Duration::from_secs(5), Duration::from_secs(1));

        let mut in_flight = dispatcher.dispatch(vec![task("a.test"), task("b.test")]);
        assert_eq!(in_flight.outstanding(), 2);

        let mut hosts = Vec::new();
        while let Some(reply) = in_flight.next().await {
            assert!(reply.result.is_ok());
            hosts.push(reply.host);
        }
        hosts.sort();

        assert_eq!(hosts, vec!["a.test", "b.test"]);
        assert_eq!(in_flight.outstanding(), 0);
        assert_eq!(in_flight.state("a.test"), Some(PeerState::Arrived));
        assert!(in_flight.release().is_none());
        assert_eq!(transport.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_deadline_bounds_the_wait() {
        let transport = Arc::new(ScriptedTransport::new(&[("fast.test", 5)]));
        let dispatcher = Dispatcher::new(transport, Duration::from_millis(200), Duration::from_millis(50));

        let started = std::time::Instant::now();
        let mut in_flight = dispatcher.dispatch(vec![task("fast.test"), task("stalled.test")]);

        let mut arrived = 0;
        while let Some(_) = in_flight.next().await {
            arrived += 1;
        }

        assert_eq!(arrived, 1);
        assert!(started.elapsed() < Duration::from_millis(1000));
        assert_eq!(in_flight.state("fast.test"), Some(PeerState::Arrived));
        assert_eq!(in_flight.state("stalled.test"), Some(PeerState::Missed));

        // Stalled task is aborted by the drain once its timeout passes
        let drain = in_flight.release().unwrap();
        assert_eq!(drain.await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_late_replies_are_drained() {
        let transport = Arc::new(ScriptedTransport::new(&[("slow.test", 150)]));
        let dispatcher = Dispatcher::new(transport, Duration::from_millis(20), Duration::from_secs(5));

        let mut in_flight = dispatcher.dispatch(vec![task("slow.test")]);
        assert!(in_flight.next().await.is_none());
        assert_eq!(in_flight.outstanding(), 1);

        let drain = in_flight.release().unwrap();
        assert_eq!(drain.await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_no_tasks() {
        let transport = Arc::new(ScriptedTransport::new(&[]));
        let dispatcher = Dispatcher::new(transport, Duration::from_secs(5), Duration::from_secs(1));

        let mut in_flight = dispatcher.dispatch(vec![]);
        assert!(in_flight.next().await.is_none());
        assert!(in_flight.release().is_none());
    }
}
