//! The server registry: staleness-gated discovery and polling sweeps plus
//! ranked and filtered views over the known set.
//!
//! The registry owns two clocks. When a read arrives and the master list is
//! stale, every configured master endpoint is queried concurrently and newly
//! seen addresses are merged into the known set; when per-server status is
//! stale, every known server is polled concurrently, one socket per target.
//! Both checks run under a single gate so any number of racing reads trigger
//! at most one sweep of each kind per interval. Known addresses are never
//! removed; a server that stops answering merely turns unresponsive and is
//! skipped by the default filter.

use std::cmp::Reverse;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinSet;

use crate::error::ConfigError;
use crate::master::{MasterServer, DEFAULT_MASTERS};
use crate::protocol::{DEFAULT_MAX_SERVERS, PROTOCOL_VERSION, SOCKET_TIMEOUT};
use crate::server::{query_status, GameServer, ServerAddress, ServerInfo};

/// Default time between master list updates.
pub const DEFAULT_MASTER_INTERVAL: Duration = Duration::from_secs(60);

/// Default time between server status polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Construction parameters for a [`ServerRegistry`].
#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Master endpoints as `(host, port)` pairs; must not be empty.
    pub masters: Vec<(String, u16)>,
    /// Wire protocol version sent with list queries.
    pub protocol: u32,
    /// Cap on the number of addresses accepted per master response.
    pub max_servers: usize,
    /// Minimum time between master list updates.
    pub master_interval: Duration,
    /// Minimum time between server poll sweeps.
    pub poll_interval: Duration,
    /// Receive timeout for every individual query.
    pub query_timeout: Duration,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            masters: DEFAULT_MASTERS
                .iter()
                .map(|(host, port)| (host.to_string(), *port))
                .collect(),
            protocol: PROTOCOL_VERSION,
            max_servers: DEFAULT_MAX_SERVERS,
            master_interval: DEFAULT_MASTER_INTERVAL,
            poll_interval: DEFAULT_POLL_INTERVAL,
            query_timeout: SOCKET_TIMEOUT,
        }
    }
}

/// Selection criteria for [`ServerRegistry::filter`].
///
/// Criteria apply independently; the `max_servers` cap selects the top
/// entries after ranking, not the first ones encountered.
#[derive(Debug, Clone)]
pub struct ServerFilter {
    /// Drop servers whose last poll attempt failed.
    pub only_responsive: bool,
    /// Keep at most this many servers, best-ranked first.
    pub max_servers: Option<usize>,
    /// Drop servers whose average ping exceeds this.
    pub max_ping: Option<Duration>,
    /// Drop servers with fewer connected humans (playing or spectating).
    pub min_players: u32,
    /// Drop servers with fewer humans on a team.
    pub min_playing: u32,
}

impl Default for ServerFilter {
    fn default() -> Self {
        Self {
            only_responsive: true,
            max_servers: None,
            max_ping: None,
            min_players: 0,
            min_playing: 0,
        }
    }
}

#[derive(Debug)]
struct RefreshClock {
    last_master_query: Option<Instant>,
    last_server_poll: Option<Instant>,
}

/// Continuously refreshed registry of known game servers.
///
/// Every externally visible read first runs the staleness checks, so a
/// consumer only ever sees data at most one poll interval old (plus query
/// time) without having to drive refreshing itself.
pub struct ServerRegistry {
    config: RegistryConfig,
    masters: Vec<Arc<Mutex<MasterServer>>>,
    servers: RwLock<HashMap<ServerAddress, Arc<RwLock<GameServer>>>>,
    clock: Mutex<RefreshClock>,
}

impl ServerRegistry {
    /// Creates a registry; fails if no master endpoint is configured.
    pub fn new(config: RegistryConfig) -> Result<Self, ConfigError> {
        if config.masters.is_empty() {
            return Err(ConfigError);
        }

        let masters = config
            .masters
            .iter()
            .map(|(host, port)| Arc::new(Mutex::new(MasterServer::new(host.clone(), *port))))
            .collect();

        Ok(Self {
            config,
            masters,
            servers: RwLock::new(HashMap::new()),
            clock: Mutex::new(RefreshClock {
                last_master_query: None,
                last_server_poll: None,
            }),
        })
    }

    /// Number of servers ever discovered.
    pub async fn len(&self) -> usize {
        self.servers.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.servers.read().await.is_empty()
    }

    /// All known servers ranked by team activity, spectators, then ping.
    pub async fn sorted(&self) -> Vec<ServerInfo> {
        self.ensure_fresh().await;

        let mut entries = self.snapshot().await;
        entries.sort_by_key(Self::rank_key);
        entries
    }

    /// Ranked view restricted by the given criteria.
    pub async fn filter(&self, filter: &ServerFilter) -> Vec<ServerInfo> {
        self.ensure_fresh().await;

        let mut selected: Vec<ServerInfo> = self
            .snapshot()
            .await
            .into_iter()
            .filter(|entry| Self::matches(entry, filter))
            .collect();

        selected.sort_by_key(Self::rank_key);

        if let Some(cap) = filter.max_servers {
            selected.truncate(cap);
        }

        selected
    }

    /// Whether any server responded recently.
    ///
    /// "Recently" is 1.5 times the poll interval, wider than the interval
    /// itself to tolerate sweep jitter.
    pub async fn online(&self) -> bool {
        self.ensure_fresh().await;

        let liveness = self.config.poll_interval.mul_f64(1.5);
        let servers = self.servers.read().await;

        for entry in servers.values() {
            let age = entry.read().await.age();
            if age.map_or(false, |age| age < liveness) {
                return true;
            }
        }

        false
    }

    /// Largest number of active players on any known server.
    ///
    /// `None` while the registry is empty; check [`online`](Self::online)
    /// first to tell an empty registry from a dead one.
    pub async fn max_playing(&self) -> Option<u32> {
        self.ensure_fresh().await;

        let servers = self.servers.read().await;
        let mut most = None;

        for entry in servers.values() {
            let playing = entry.read().await.num_playing();
            most = Some(most.map_or(playing, |current: u32| current.max(playing)));
        }

        most
    }

    /// Runs the two staleness checks, sweeping where needed.
    ///
    /// The clock lock is held across the sweeps, which makes the checks
    /// idempotent within their intervals: concurrent reads wait here and
    /// then see fresh data instead of starting sweeps of their own.
    async fn ensure_fresh(&self) {
        let mut clock = self.clock.lock().await;

        let master_stale = clock
            .last_master_query
            .map_or(true, |at| at.elapsed() > self.config.master_interval);
        if master_stale {
            self.sweep_masters().await;
            // Advances even when every endpoint failed, to respect the
            // interval instead of hammering a dead master.
            clock.last_master_query = Some(Instant::now());
        }

        let poll_stale = clock
            .last_server_poll
            .map_or(true, |at| at.elapsed() > self.config.poll_interval);
        if poll_stale && self.sweep_servers().await {
            clock.last_server_poll = Some(Instant::now());
        }
    }

    /// Polls every configured master concurrently and unions the results
    /// into the known set. Addresses are only ever added.
    async fn sweep_masters(&self) {
        let mut sweeps = JoinSet::new();

        for master in &self.masters {
            let master = Arc::clone(master);
            let protocol_version = self.config.protocol;
            let max_servers = self.config.max_servers;
            let query_timeout = self.config.query_timeout;

            sweeps.spawn(async move {
                master
                    .lock()
                    .await
                    .fetch(protocol_version, max_servers, query_timeout)
                    .await
            });
        }

        while let Some(joined) = sweeps.join_next().await {
            let Ok(addresses) = joined else { continue };
            if addresses.is_empty() {
                continue;
            }

            let mut servers = self.servers.write().await;
            for address in addresses {
                servers
                    .entry(address.clone())
                    .or_insert_with(|| Arc::new(RwLock::new(GameServer::new(address))));
            }
        }
    }

    /// Polls every known server concurrently, one socket per target.
    ///
    /// Network I/O runs outside the entry locks, so a slow or timed-out
    /// target delays neither readers nor the application of results from
    /// faster targets. Returns false if there was nothing to poll.
    async fn sweep_servers(&self) -> bool {
        let entries: Vec<Arc<RwLock<GameServer>>> =
            self.servers.read().await.values().cloned().collect();

        if entries.is_empty() {
            return false;
        }

        let mut sweeps = JoinSet::new();

        for entry in entries {
            let query_timeout = self.config.query_timeout;

            sweeps.spawn(async move {
                let address = entry.read().await.address().clone();
                let outcome = query_status(&address, query_timeout).await;
                entry.write().await.record_poll(outcome);
            });
        }

        while sweeps.join_next().await.is_some() {}

        true
    }

    async fn snapshot(&self) -> Vec<ServerInfo> {
        let servers = self.servers.read().await;
        let mut entries = Vec::with_capacity(servers.len());

        for entry in servers.values() {
            entries.push(entry.read().await.info());
        }

        entries
    }

    /// Most active team play first, then most spectators, then lowest ping.
    fn rank_key(entry: &ServerInfo) -> (Reverse<u32>, Reverse<u32>, Duration) {
        (
            Reverse(entry.players.num_playing()),
            Reverse(entry.players.num_spectating()),
            entry.ping.unwrap_or(Duration::MAX),
        )
    }

    fn matches(entry: &ServerInfo, filter: &ServerFilter) -> bool {
        if filter.only_responsive && !entry.responsive {
            return false;
        }

        if let Some(max_ping) = filter.max_ping {
            match entry.ping {
                Some(ping) if ping <= max_ping => {}
                _ => return false,
            }
        }

        if entry.players.num_players() < filter.min_players {
            return false;
        }

        if entry.players.num_playing() < filter.min_playing {
            return false;
        }

        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::PlayerStats;

    fn test_registry(poll_interval: Duration) -> ServerRegistry {
        // The master is a closed local port; tests that must not sweep at
        // all prime the clock instead.
        ServerRegistry::new(RegistryConfig {
            masters: vec![("127.0.0.1".to_string(), 9)],
            poll_interval,
            query_timeout: Duration::from_millis(100),
            ..RegistryConfig::default()
        })
        .unwrap()
    }

    async fn prime_clock(registry: &ServerRegistry) {
        let mut clock = registry.clock.lock().await;
        clock.last_master_query = Some(Instant::now());
        clock.last_server_poll = Some(Instant::now());
    }

    async fn insert_server(registry: &ServerRegistry, server: GameServer) {
        let mut servers = registry.servers.write().await;
        servers.insert(
            server.address().clone(),
            Arc::new(RwLock::new(server)),
        );
    }

    fn responsive_server(
        host: &str,
        skills: &str,
        teams: &str,
        ping: Duration,
    ) -> GameServer {
        let mut config = HashMap::new();
        config.insert("sv_hostname".to_string(), format!("Server {}", host));
        config.insert("mapname".to_string(), "atcs".to_string());
        config.insert("B".to_string(), skills.to_string());
        config.insert("P".to_string(), teams.to_string());

        let mut server = GameServer::new(ServerAddress::new(host, 27960));
        server.record_poll(Ok((config, ping)));
        server
    }

    fn info_with(playing: u32, spectating: u32, ping_ms: u64) -> ServerInfo {
        ServerInfo {
            address: ServerAddress::new("10.0.0.1", 27960),
            responsive: true,
            name: "test".to_string(),
            map_name: "atcs".to_string(),
            ping: Some(Duration::from_millis(ping_ms)),
            min_ping: Some(Duration::from_millis(ping_ms)),
            players: PlayerStats {
                spectators: spectating,
                alien_players: playing,
                human_players: 0,
                alien_bots: 0,
                human_bots: 0,
            },
            age: Some(Duration::from_millis(1)),
            last_error: None,
        }
    }

    #[test]
    fn test_registry_requires_masters() {
        let config = RegistryConfig {
            masters: Vec::new(),
            ..RegistryConfig::default()
        };

        assert!(ServerRegistry::new(config).is_err());
    }

    #[test]
    fn test_ranking_order() {
        let mut entries = vec![info_with(3, 1, 10), info_with(5, 0, 20), info_with(5, 2, 5)];
        entries.sort_by_key(ServerRegistry::rank_key);

        let order: Vec<(u32, u32)> = entries
            .iter()
            .map(|entry| (entry.players.num_playing(), entry.players.num_spectating()))
            .collect();

        assert_eq!(order, vec![(5, 2), (5, 0), (3, 1)]);
    }

    #[test]
    fn test_ranking_breaks_ties_by_ping() {
        let mut entries = vec![info_with(2, 0, 90), info_with(2, 0, 30)];
        entries.sort_by_key(ServerRegistry::rank_key);

        assert_eq!(entries[0].ping, Some(Duration::from_millis(30)));
    }

    #[test]
    fn test_ranking_puts_unreachable_last() {
        let mut unreachable = info_with(0, 0, 0);
        unreachable.ping = None;
        unreachable.responsive = false;

        let mut entries = vec![unreachable, info_with(0, 0, 500)];
        entries.sort_by_key(ServerRegistry::rank_key);

        assert!(entries[0].ping.is_some());
        assert!(entries[1].ping.is_none());
    }

    #[tokio::test]
    async fn test_online_is_false_on_empty_registry() {
        let registry = test_registry(Duration::from_millis(5));
        prime_clock(&registry).await;

        assert!(!registry.online().await);
    }

    #[tokio::test]
    async fn test_online_reflects_entry_age() {
        let registry = test_registry(Duration::from_millis(20));
        prime_clock(&registry).await;
        insert_server(
            &registry,
            responsive_server("10.0.0.1", "--", "--", Duration::from_millis(10)),
        )
        .await;

        assert!(registry.online().await);

        // Let the last success fall out of the 1.5x liveness window without
        // letting the poll clock go stale.
        tokio::time::sleep(Duration::from_millis(40)).await;
        prime_clock(&registry).await;

        assert!(!registry.online().await);
    }

    #[tokio::test]
    async fn test_max_playing_on_empty_registry() {
        let registry = test_registry(Duration::from_millis(5));
        prime_clock(&registry).await;

        assert_eq!(registry.max_playing().await, None);
    }

    #[tokio::test]
    async fn test_max_playing_picks_busiest_server() {
        let registry = test_registry(Duration::from_secs(60));
        prime_clock(&registry).await;
        insert_server(
            &registry,
            responsive_server("10.0.0.1", "----", "0121", Duration::from_millis(10)),
        )
        .await;
        insert_server(
            &registry,
            responsive_server("10.0.0.2", "----", "1122", Duration::from_millis(10)),
        )
        .await;

        assert_eq!(registry.max_playing().await, Some(4));
    }

    #[tokio::test]
    async fn test_filter_drops_unresponsive_by_default() {
        let registry = test_registry(Duration::from_secs(60));
        prime_clock(&registry).await;
        insert_server(
            &registry,
            responsive_server("10.0.0.1", "--", "--", Duration::from_millis(10)),
        )
        .await;
        insert_server(&registry, GameServer::new(ServerAddress::new("10.0.0.2", 27960))).await;

        let all = registry.sorted().await;
        let responsive = registry.filter(&ServerFilter::default()).await;

        assert_eq!(all.len(), 2);
        assert_eq!(responsive.len(), 1);
        assert_eq!(responsive[0].address.host, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_filter_thresholds() {
        let registry = test_registry(Duration::from_secs(60));
        prime_clock(&registry).await;
        // Two playing, one spectating.
        insert_server(
            &registry,
            responsive_server("10.0.0.1", "----", "0121", Duration::from_millis(10)),
        )
        .await;
        // Bots only.
        insert_server(
            &registry,
            responsive_server("10.0.0.2", "xx--", "12--", Duration::from_millis(10)),
        )
        .await;

        let busy = registry
            .filter(&ServerFilter {
                min_playing: 1,
                ..ServerFilter::default()
            })
            .await;
        assert_eq!(busy.len(), 1);
        assert_eq!(busy[0].address.host, "10.0.0.1");

        let populated = registry
            .filter(&ServerFilter {
                min_players: 4,
                ..ServerFilter::default()
            })
            .await;
        assert!(populated.is_empty());
    }

    #[tokio::test]
    async fn test_filter_max_ping() {
        let registry = test_registry(Duration::from_secs(60));
        prime_clock(&registry).await;
        insert_server(
            &registry,
            responsive_server("10.0.0.1", "--", "--", Duration::from_millis(30)),
        )
        .await;
        insert_server(
            &registry,
            responsive_server("10.0.0.2", "--", "--", Duration::from_millis(300)),
        )
        .await;

        let nearby = registry
            .filter(&ServerFilter {
                max_ping: Some(Duration::from_millis(100)),
                ..ServerFilter::default()
            })
            .await;

        assert_eq!(nearby.len(), 1);
        assert_eq!(nearby[0].address.host, "10.0.0.1");
    }

    #[tokio::test]
    async fn test_filter_caps_after_ranking() {
        let registry = test_registry(Duration::from_secs(60));
        prime_clock(&registry).await;
        insert_server(
            &registry,
            responsive_server("10.0.0.1", "--------", "--------", Duration::from_millis(10)),
        )
        .await;
        insert_server(
            &registry,
            responsive_server("10.0.0.2", "----", "1122", Duration::from_millis(10)),
        )
        .await;
        insert_server(
            &registry,
            responsive_server("10.0.0.3", "----", "12--", Duration::from_millis(10)),
        )
        .await;

        let top = registry
            .filter(&ServerFilter {
                max_servers: Some(2),
                ..ServerFilter::default()
            })
            .await;

        // The two busiest servers, not the first two encountered.
        assert_eq!(top.len(), 2);
        assert_eq!(top[0].address.host, "10.0.0.2");
        assert_eq!(top[1].address.host, "10.0.0.3");
    }
}
