//! URL-path-scoped grouping of peers, middleware and `connection`
//! listeners.

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::Mutex;

use crate::peer::Handshake;

/// Result of running one middleware function: `Ok(())` lets the upgrade
/// proceed, `Err` aborts it (surfaced by the server as a 401/500).
pub type MiddlewareResult = std::result::Result<(), String>;

/// A single middleware step in the chain contract. Only the chain
/// contract (ordered run, first failure aborts) is normative; concrete
/// auth/CORS/rate-limit middleware are out of scope.
pub type Middleware = Box<
    dyn Fn(&Handshake) -> Pin<Box<dyn Future<Output = MiddlewareResult> + Send>> + Send + Sync,
>;

/// A `connection` listener, invoked with the id of the newly-registered
/// peer.
pub type ConnectionListener = Box<dyn Fn(&str) + Send + Sync>;

/// A URL-path-scoped namespace: its own middleware chain and `connection`
/// listeners, and the set of peers currently attached to it.
pub struct Namespace {
    /// The "/"-prefixed path this namespace is registered under.
    pub name: String,
    middleware: Vec<Middleware>,
    connection_listeners: Vec<ConnectionListener>,
    peers: Mutex<std::collections::HashSet<String>>,
}

impl Namespace {
    /// A namespace with no middleware or listeners yet.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            middleware: Vec::new(),
            connection_listeners: Vec::new(),
            peers: Mutex::new(std::collections::HashSet::new()),
        }
    }

    /// Append a middleware step; steps run in registration order.
    pub fn use_middleware(&mut self, mw: Middleware) {
        self.middleware.push(mw);
    }

    /// Register a `connection` listener; listeners run in registration
    /// order after all middleware has passed.
    pub fn on_connection(&mut self, listener: ConnectionListener) {
        self.connection_listeners.push(listener);
    }

    /// Run this namespace's middleware chain against `handshake`, stopping
    /// at (and returning) the first failure.
    pub async fn run_middleware(&self, handshake: &Handshake) -> MiddlewareResult {
        for mw in &self.middleware {
            mw(handshake).await?;
        }
        Ok(())
    }

    /// Fire all `connection` listeners for a newly-attached peer.
    pub fn fire_connection(&self, peer_id: &str) {
        for listener in &self.connection_listeners {
            listener(peer_id);
        }
    }

    /// Attach `peer_id` to this namespace.
    pub fn attach(&self, peer_id: &str) {
        self.peers.lock().expect("namespace poisoned").insert(peer_id.to_string());
    }

    /// Detach `peer_id` from this namespace.
    pub fn detach(&self, peer_id: &str) {
        self.peers.lock().expect("namespace poisoned").remove(peer_id);
    }

    /// Peers currently attached to this namespace.
    pub fn peers(&self) -> Vec<String> {
        self.peers.lock().expect("namespace poisoned").iter().cloned().collect()
    }
}

/// Registry of namespaces, indexed by path, with longest-prefix
/// resolution. The default namespace `"/"` always exists and is never
/// removed.
pub struct NamespaceRegistry {
    namespaces: HashMap<String, Namespace>,
}

impl Default for NamespaceRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl NamespaceRegistry {
    /// A registry containing only the default `"/"` namespace.
    pub fn new() -> Self {
        let mut namespaces = HashMap::new();
        namespaces.insert("/".to_string(), Namespace::new("/"));
        Self { namespaces }
    }

    /// Register a namespace at `path`, replacing any existing one there.
    pub fn register(&mut self, namespace: Namespace) {
        self.namespaces.insert(namespace.name.clone(), namespace);
    }

    /// Resolve `path` to the namespace with the longest registered prefix
    /// match; falls back to the default `"/"` namespace.
    pub fn resolve(&self, path: &str) -> &Namespace {
        self.namespaces
            .keys()
            .filter(|prefix| prefix.as_str() == "/" || path.starts_with(prefix.as_str()))
            .max_by_key(|prefix| prefix.len())
            .and_then(|prefix| self.namespaces.get(prefix))
            .unwrap_or_else(|| self.namespaces.get("/").expect("default namespace always exists"))
    }

    /// The default namespace.
    pub fn default_namespace(&self) -> &Namespace {
        self.namespaces.get("/").expect("default namespace always exists")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_longest_prefix() {
        let mut reg = NamespaceRegistry::new();
        reg.register(Namespace::new("/chat"));
        reg.register(Namespace::new("/chat/private"));

        assert_eq!(reg.resolve("/chat/private/room1").name, "/chat/private");
        assert_eq!(reg.resolve("/chat/general").name, "/chat");
        assert_eq!(reg.resolve("/unrelated").name, "/");
    }

    #[tokio::test]
    async fn middleware_chain_stops_at_first_failure() {
        let mut ns = Namespace::new("/ns");
        ns.use_middleware(Box::new(|_| Box::pin(async { Ok(()) })));
        ns.use_middleware(Box::new(|_| Box::pin(async { Err("nope".to_string()) })));
        ns.use_middleware(Box::new(|_| Box::pin(async { panic!("should not run") })));

        let result = ns.run_middleware(&Handshake::default()).await;
        assert_eq!(result, Err("nope".to_string()));
    }

    #[test]
    fn attach_detach_tracks_membership() {
        let ns = Namespace::new("/ns");
        ns.attach("p1");
        ns.attach("p2");
        assert_eq!(ns.peers().len(), 2);
        ns.detach("p1");
        assert_eq!(ns.peers(), vec!["p2".to_string()]);
    }
}
