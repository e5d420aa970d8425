//! Server lifecycle
//!
//! The [`Server`] owns the listening socket and the node's visible
//! lifecycle: it advertises a descriptor to the discovery directory, binds
//! declared subscriptions to the broker exactly once per registration
//! cycle, keeps both fresh from a periodic ticker, and tears everything
//! down on `stop`.
//!
//! Locking: shared state lives behind one `RwLock` held only across
//! in-memory reads and mutations. Directory and broker calls happen
//! outside it, with results committed under a short re-acquired write
//! lock. A separate registration gate serializes whole register/deregister
//! cycles so a concurrent pair can never interleave binding mutations.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio::sync::{mpsc, oneshot, watch, Mutex, RwLock, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::Interval;

use crate::broker::{Broker, Message, MessageHandler, Subscription};
use crate::error::{Error, Result};
use crate::registry::{Node, Registry, ServiceDescriptor};

use super::config::ServerConfig;
use super::handler::ConnectionHandler;
use super::listener::{accept_loop, BoundListener};
use super::subscriber::Subscriber;

type StopReply = oneshot::Sender<Result<()>>;

struct SubscriberEntry {
    subscriber: Arc<Subscriber>,
    bindings: Vec<Box<dyn Subscription>>,
}

struct Inner {
    config: ServerConfig,
    handler: Arc<dyn ConnectionHandler>,
    subscribers: HashMap<u64, SubscriberEntry>,
    registered: bool,
    cached_service: Option<ServiceDescriptor>,
    running: bool,
    advertised_addr: Option<SocketAddr>,
}

/// Network service endpoint manager
///
/// Declare subscriptions, then `start`; `stop` deregisters, releases all
/// broker bindings, and closes the listener before returning.
pub struct Server {
    inner: RwLock<Inner>,
    // Serializes register/deregister cycles end to end, including their
    // network calls, without blocking readers of `inner`.
    registration_gate: Mutex<()>,
    stop_tx: Mutex<Option<mpsc::Sender<StopReply>>>,
}

impl Server {
    /// Create a server from a configuration and a connection handler
    pub fn new<H: ConnectionHandler>(config: ServerConfig, handler: H) -> Self {
        Self {
            inner: RwLock::new(Inner {
                config,
                handler: Arc::new(handler),
                subscribers: HashMap::new(),
                registered: false,
                cached_service: None,
                running: false,
                advertised_addr: None,
            }),
            registration_gate: Mutex::new(()),
            stop_tx: Mutex::new(None),
        }
    }

    /// Replace the configuration wholesale. Rejected while running.
    pub async fn init(&self, config: ServerConfig) -> Result<()> {
        config.validate()?;
        let mut inner = self.inner.write().await;
        if inner.running {
            return Err(Error::AlreadyRunning);
        }
        inner.config = config;
        Ok(())
    }

    /// Replace the connection handler. Rejected while running.
    pub async fn handle(&self, handler: Arc<dyn ConnectionHandler>) -> Result<()> {
        let mut inner = self.inner.write().await;
        if inner.running {
            return Err(Error::AlreadyRunning);
        }
        inner.handler = handler;
        Ok(())
    }

    /// Declare a subscription. Must happen before `start`; binding to the
    /// broker is driven by registration, never done here.
    pub async fn subscribe(&self, subscriber: Arc<Subscriber>) -> Result<()> {
        subscriber.validate()?;

        let mut inner = self.inner.write().await;
        if inner.running {
            return Err(Error::AlreadyRunning);
        }
        if inner.subscribers.contains_key(&subscriber.id()) {
            return Err(Error::DuplicateSubscriber(subscriber.topic().to_string()));
        }
        inner.subscribers.insert(
            subscriber.id(),
            SubscriberEntry {
                subscriber,
                bindings: Vec::new(),
            },
        );
        Ok(())
    }

    /// Advertised listener address once running
    pub async fn address(&self) -> Option<SocketAddr> {
        self.inner.read().await.advertised_addr
    }

    /// Whether the node is currently advertised
    pub async fn is_registered(&self) -> bool {
        self.inner.read().await.registered
    }

    /// Whether `start` has completed and `stop` has not
    pub async fn is_running(&self) -> bool {
        self.inner.read().await.running
    }

    /// Register the node with the discovery directory.
    ///
    /// After a successful first registration the cached descriptor is
    /// resubmitted as-is (cheap, idempotent refresh) and no bindings are
    /// touched. A fresh registration submits a newly built descriptor and
    /// then binds every declared subscription; any single binding failure
    /// unwinds the bindings already made and aborts the whole attempt.
    pub async fn register(&self) -> Result<()> {
        let _gate = self.registration_gate.lock().await;

        let (registry, broker, ttl, node_id, cached) = {
            let inner = self.inner.read().await;
            (
                Arc::clone(&inner.config.registry),
                Arc::clone(&inner.config.broker),
                inner.config.register_ttl,
                inner.config.node_id(),
                inner.cached_service.clone(),
            )
        };

        // Refresh path: resubmit the cached descriptor, nothing else.
        if let Some(service) = cached {
            tracing::debug!(node = %node_id, "refreshing registration");
            return registry.register(&service, ttl).await;
        }

        let (service, to_bind) = {
            let inner = self.inner.read().await;
            let to_bind: Vec<Arc<Subscriber>> = inner
                .subscribers
                .values()
                .map(|e| Arc::clone(&e.subscriber))
                .collect();
            (build_descriptor(&inner), to_bind)
        };

        tracing::info!(node = %node_id, "registering node");
        registry.register(&service, ttl).await?;

        // Bind every declared subscription; all or nothing.
        let mut bound: Vec<(u64, Box<dyn Subscription>)> = Vec::with_capacity(to_bind.len());
        for subscriber in &to_bind {
            let result = broker
                .subscribe(
                    subscriber.topic(),
                    binding_handler(subscriber),
                    subscriber.subscribe_options(),
                )
                .await;
            match result {
                Ok(binding) => bound.push((subscriber.id(), binding)),
                Err(e) => {
                    tracing::error!(
                        topic = subscriber.topic(),
                        error = %e,
                        "subscription binding failed, aborting registration"
                    );
                    for (_, binding) in bound {
                        if let Err(e) = binding.unsubscribe().await {
                            tracing::warn!(
                                topic = binding.topic(),
                                error = %e,
                                "failed to unwind binding"
                            );
                        }
                    }
                    return Err(e);
                }
            }
        }

        let mut inner = self.inner.write().await;
        for (id, binding) in bound {
            if let Some(entry) = inner.subscribers.get_mut(&id) {
                entry.bindings.push(binding);
            }
        }
        inner.registered = true;
        inner.cached_service = Some(service);
        Ok(())
    }

    /// Remove the node from the discovery directory and release every
    /// broker binding. A no-op returning success when not registered.
    ///
    /// Bindings are always released, concurrently and joined before
    /// return, even when the directory removal fails; individual
    /// unsubscribe failures are logged, never fatal. The directory result
    /// is what this call returns.
    pub async fn deregister(&self) -> Result<()> {
        let _gate = self.registration_gate.lock().await;

        let (registry, node_id, service) = {
            let inner = self.inner.read().await;
            if !inner.registered {
                return Ok(());
            }
            let Some(service) = inner.cached_service.clone() else {
                return Ok(());
            };
            (
                Arc::clone(&inner.config.registry),
                inner.config.node_id(),
                service,
            )
        };

        tracing::info!(node = %node_id, "deregistering node");
        let directory_result = registry.deregister(&service).await;

        let drained: Vec<Box<dyn Subscription>> = {
            let mut inner = self.inner.write().await;
            inner.registered = false;
            inner.cached_service = None;
            inner
                .subscribers
                .values_mut()
                .flat_map(|entry| std::mem::take(&mut entry.bindings))
                .collect()
        };

        let mut releases = JoinSet::new();
        for binding in drained {
            releases.spawn(async move {
                let topic = binding.topic().to_string();
                match binding.unsubscribe().await {
                    Ok(()) => tracing::info!(topic = %topic, "unsubscribed from topic"),
                    Err(e) => tracing::warn!(topic = %topic, error = %e, "unsubscribe failed"),
                }
            });
        }
        while releases.join_next().await.is_some() {}

        directory_result
    }

    /// Start the server: bind the listener, connect the broker, register
    /// once, then launch the accept loop and the supervisory loop.
    ///
    /// On any failure nothing is left running. A second `start` while
    /// running is rejected.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        {
            let mut inner = self.inner.write().await;
            inner.config.validate()?;
            if inner.running {
                return Err(Error::AlreadyRunning);
            }
            inner.running = true;
        }

        match self.start_inner().await {
            Ok(()) => Ok(()),
            Err(e) => {
                let mut inner = self.inner.write().await;
                inner.running = false;
                inner.advertised_addr = None;
                Err(e)
            }
        }
    }

    async fn start_inner(self: &Arc<Self>) -> Result<()> {
        let (bind_addr, tls, max_connections, override_listener, broker, handler, max_msg_size, tcp_nodelay, interval) = {
            let mut inner = self.inner.write().await;
            (
                inner.config.bind_addr,
                inner.config.tls.clone(),
                inner.config.max_connections,
                inner.config.listener.take(),
                Arc::clone(&inner.config.broker),
                Arc::clone(&inner.handler),
                inner.config.max_msg_size,
                inner.config.tcp_nodelay,
                inner.config.register_interval,
            )
        };

        // An override listener is used verbatim: no TLS wrap, no cap.
        let (listener, limit) = match override_listener {
            Some(l) => (BoundListener::external(l), None),
            None => {
                let listener = BoundListener::bind(bind_addr, tls).await?;
                let limit =
                    (max_connections > 0).then(|| Arc::new(Semaphore::new(max_connections)));
                (listener, limit)
            }
        };

        let local_addr = listener.local_addr()?;
        tracing::info!(addr = %local_addr, "server listening");
        self.inner.write().await.advertised_addr = Some(local_addr);

        broker.connect().await?;

        if let Err(e) = self.register().await {
            if let Err(de) = broker.disconnect().await {
                tracing::error!(error = %de, "broker disconnect after failed registration");
            }
            return Err(e);
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let accept_handle = tokio::spawn(accept_loop(
            listener,
            handler,
            limit,
            max_msg_size,
            tcp_nodelay,
            shutdown_rx,
        ));

        let (stop_tx, stop_rx) = mpsc::channel::<StopReply>(1);
        *self.stop_tx.lock().await = Some(stop_tx);

        let server = Arc::clone(self);
        tokio::spawn(server.supervise(stop_rx, shutdown_tx, accept_handle, broker, interval));
        Ok(())
    }

    /// Request shutdown and wait for it to complete.
    ///
    /// Returns the listener-close result. Deregistration and broker
    /// disconnect errors during teardown are logged, not propagated. By
    /// the time this returns the node is deregistered and every binding
    /// is released.
    pub async fn stop(&self) -> Result<()> {
        let stop_tx = self.stop_tx.lock().await.take().ok_or(Error::NotRunning)?;
        let (reply_tx, reply_rx) = oneshot::channel();
        stop_tx
            .send(reply_tx)
            .await
            .map_err(|_| Error::NotRunning)?;
        reply_rx
            .await
            .map_err(|_| Error::Internal("shutdown did not complete".into()))?
    }

    /// Supervisory loop: periodic health check and registration refresh
    /// until a stop request arrives, then full teardown.
    async fn supervise(
        self: Arc<Self>,
        mut stop_rx: mpsc::Receiver<StopReply>,
        shutdown_tx: watch::Sender<bool>,
        accept_handle: JoinHandle<()>,
        broker: Arc<dyn Broker>,
        interval: Duration,
    ) {
        // tokio's interval fires immediately; the first refresh should
        // come one full interval after start.
        let mut ticker = (!interval.is_zero())
            .then(|| tokio::time::interval_at(tokio::time::Instant::now() + interval, interval));

        let reply = loop {
            tokio::select! {
                _ = tick(&mut ticker) => self.refresh_cycle().await,
                reply = stop_rx.recv() => break reply,
            }
        };

        // Close the listener first so a blocked accept is interrupted.
        let _ = shutdown_tx.send(true);
        let close_result = match accept_handle.await {
            Ok(()) => Ok(()),
            Err(e) => Err(Error::Internal(format!("accept loop failed: {e}"))),
        };

        if let Err(e) = self.deregister().await {
            tracing::error!(error = %e, "deregister during shutdown failed");
        }
        if let Err(e) = broker.disconnect().await {
            tracing::error!(error = %e, "broker disconnect failed");
        }

        {
            let mut inner = self.inner.write().await;
            inner.running = false;
            inner.advertised_addr = None;
        }
        tracing::info!("server stopped");

        if let Some(reply) = reply {
            let _ = reply.send(close_result);
        }
    }

    /// One ticker cycle: health probe, then refresh or demote.
    async fn refresh_cycle(&self) {
        let (health_check, registered) = {
            let inner = self.inner.read().await;
            (inner.config.health_check.clone(), inner.registered)
        };

        if let Some(check) = health_check {
            if let Err(e) = check.check().await {
                if registered {
                    tracing::warn!(error = %e, "health check failed, deregistering node");
                    if let Err(e) = self.deregister().await {
                        tracing::error!(error = %e, "demotion deregister failed");
                    }
                } else {
                    tracing::warn!(error = %e, "health check failed while deregistered");
                }
                return;
            }
        }

        if let Err(e) = self.register().await {
            tracing::error!(error = %e, "periodic re-registration failed");
        }
    }
}

async fn tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Build the directory-facing descriptor from live state: handler
/// endpoints plus one endpoint per non-internal subscription, ordered by
/// descending topic for determinism.
fn build_descriptor(inner: &Inner) -> ServiceDescriptor {
    let mut endpoints = inner.handler.endpoints();

    let mut advertised: Vec<&Arc<Subscriber>> = inner
        .subscribers
        .values()
        .map(|e| &e.subscriber)
        .filter(|s| !s.is_internal())
        .collect();
    advertised.sort_by(|a, b| b.topic().cmp(a.topic()));
    endpoints.extend(advertised.iter().map(|s| s.endpoint()));

    let address = inner
        .advertised_addr
        .map(|a| a.to_string())
        .unwrap_or_else(|| inner.config.bind_addr.to_string());

    ServiceDescriptor {
        name: inner.config.name.clone(),
        version: inner.config.version.clone(),
        nodes: vec![Node {
            id: inner.config.node_id(),
            address,
        }],
        endpoints,
    }
}

/// Broker-facing handler for one descriptor: dispatches each delivered
/// message through every declared handler in order.
fn binding_handler(subscriber: &Arc<Subscriber>) -> MessageHandler {
    let handlers: Vec<MessageHandler> = subscriber.handlers().to_vec();
    Arc::new(move |msg: Message| {
        let handlers = handlers.clone();
        async move {
            for handler in &handlers {
                handler(msg.clone()).await?;
            }
            Ok(())
        }
        .boxed()
    })
}
