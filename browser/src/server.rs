//! Game server status tracking
//!
//! This module holds the per-server state the registry maintains, including:
//! - The server's identity (exact host and port, no DNS resolution)
//! - The outcome of the most recent poll as an explicit state tag
//! - Slot statistics derived from the reported bot/team fields
//! - A moving latency average and all-time minimum
//!
//! The status probe opens one fresh UDP socket per poll and never lets a
//! failure escape past `record_poll`: errors become entry state plus a
//! deduplicated log line.

use std::collections::HashMap;
use std::fmt;
use std::time::{Duration, Instant};

use log::{debug, info, warn};
use tokio::net::UdpSocket;
use tokio::time::timeout;

use crate::error::QueryError;
use crate::ping::PingTracker;
use crate::protocol::{self, STATUS_BUFFER_SIZE};

/// Config key under which a server reports its display name.
const HOSTNAME_FIELD: &str = "sv_hostname";
/// Config key under which a server reports the loaded map.
const MAP_FIELD: &str = "mapname";
/// Config key holding per-slot bot skill levels (`-` marks a human).
const BOT_SKILL_FIELD: &str = "B";
/// Config key holding per-slot team membership, aligned with the skill field.
const TEAM_FIELD: &str = "P";

/// Identity of a game server.
///
/// Two addresses are equal iff host and port match exactly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServerAddress {
    pub host: String,
    pub port: u16,
}

impl ServerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }
}

impl fmt::Display for ServerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Slot occupancy reported by a server, split by kind and team.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct PlayerStats {
    pub spectators: u32,
    pub alien_players: u32,
    pub human_players: u32,
    pub alien_bots: u32,
    pub human_bots: u32,
}

impl PlayerStats {
    /// Number of connected humans, both playing and spectating.
    pub fn num_players(&self) -> u32 {
        self.spectators + self.alien_players + self.human_players
    }

    /// Number of humans on a team, excluding bots.
    pub fn num_playing(&self) -> u32 {
        self.alien_players + self.human_players
    }

    /// Number of humans not on a team.
    pub fn num_spectating(&self) -> u32 {
        self.spectators
    }

    /// Derives slot statistics from the parallel bot/team config fields.
    fn from_config(config: &HashMap<String, String>) -> Result<Self, QueryError> {
        let (Some(skills), Some(teams)) = (config.get(BOT_SKILL_FIELD), config.get(TEAM_FIELD))
        else {
            return Err(QueryError::protocol("no bot/player status fields found"));
        };

        if skills.chars().count() != teams.chars().count() {
            return Err(QueryError::protocol(
                "lengths of bot and player states do not match",
            ));
        }

        let mut stats = PlayerStats::default();

        for (skill, team) in skills.chars().zip(teams.chars()) {
            match (skill, team) {
                ('-', '-') => {} // empty slot
                ('-', '0') => stats.spectators += 1,
                ('-', '1') => stats.alien_players += 1,
                ('-', '2') => stats.human_players += 1,
                (_, '1') => stats.alien_bots += 1,
                (_, '2') => stats.human_bots += 1,
                ('-', _) => {
                    return Err(QueryError::protocol("bad team identifier for player"));
                }
                (_, _) => {
                    return Err(QueryError::protocol("bad team identifier for bot"));
                }
            }
        }

        Ok(stats)
    }
}

/// Outcome of the most recent poll attempt.
#[derive(Debug)]
pub enum PollStatus {
    /// Discovered but never polled.
    Unpolled,
    /// The last poll succeeded and passed structural validation.
    Responsive {
        /// The key/value configuration the server reported.
        config: HashMap<String, String>,
        /// Slot statistics derived once per poll; `None` if the reported
        /// player data was missing or malformed.
        players: Option<PlayerStats>,
    },
    /// The last poll failed; configuration and latency window were reset.
    Unresponsive,
}

/// One known game server and everything the registry learned about it.
#[derive(Debug)]
pub struct GameServer {
    address: ServerAddress,
    status: PollStatus,
    ping: PingTracker,
    last_polled: Option<Instant>,
    last_success: Option<Instant>,
    last_error: Option<String>,
}

impl GameServer {
    pub fn new(address: ServerAddress) -> Self {
        Self {
            address,
            status: PollStatus::Unpolled,
            ping: PingTracker::new(),
            last_polled: None,
            last_success: None,
            last_error: None,
        }
    }

    pub fn address(&self) -> &ServerAddress {
        &self.address
    }

    pub fn status(&self) -> &PollStatus {
        &self.status
    }

    /// Whether the last poll attempt was successful.
    ///
    /// The content of the reported configuration is not checked.
    pub fn responsive(&self) -> bool {
        matches!(self.status, PollStatus::Responsive { .. })
    }

    /// Time since the last successful poll, or `None` if there never was one.
    pub fn age(&self) -> Option<Duration> {
        self.last_success.map(|at| at.elapsed())
    }

    /// Time of the last poll attempt, successful or not.
    pub fn last_polled(&self) -> Option<Instant> {
        self.last_polled
    }

    /// Error string of the last failed attempt, for repeat detection.
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Moving average of recent response times; `None` while unreachable.
    pub fn ping(&self) -> Option<Duration> {
        self.ping.average()
    }

    /// Best response time ever measured against this server.
    pub fn min_ping(&self) -> Option<Duration> {
        self.ping.minimum()
    }

    /// Server name as reported, falling back to the address string.
    pub fn name(&self) -> String {
        self.config()
            .and_then(|config| config.get(HOSTNAME_FIELD).cloned())
            .unwrap_or_else(|| self.address.to_string())
    }

    /// Loaded map as reported, or `"unknown"`.
    pub fn map_name(&self) -> String {
        self.config()
            .and_then(|config| config.get(MAP_FIELD).cloned())
            .unwrap_or_else(|| "unknown".to_string())
    }

    /// Slot statistics from the last successful poll.
    ///
    /// All zeroes when the server is unresponsive or reported no usable
    /// player data; the distinction from a genuinely empty server only
    /// shows up in logs.
    pub fn player_stats(&self) -> PlayerStats {
        match &self.status {
            PollStatus::Responsive { players, .. } => players.unwrap_or_default(),
            _ => PlayerStats::default(),
        }
    }

    pub fn num_players(&self) -> u32 {
        self.player_stats().num_players()
    }

    pub fn num_playing(&self) -> u32 {
        self.player_stats().num_playing()
    }

    pub fn num_spectating(&self) -> u32 {
        self.player_stats().num_spectating()
    }

    fn config(&self) -> Option<&HashMap<String, String>> {
        match &self.status {
            PollStatus::Responsive { config, .. } => Some(config),
            _ => None,
        }
    }

    /// Point-in-time snapshot safe to hand to consumers.
    pub fn info(&self) -> ServerInfo {
        ServerInfo {
            address: self.address.clone(),
            responsive: self.responsive(),
            name: self.name(),
            map_name: self.map_name(),
            ping: self.ping(),
            min_ping: self.min_ping(),
            players: self.player_stats(),
            age: self.age(),
            last_error: self.last_error.clone(),
        }
    }

    /// Applies the outcome of one poll attempt.
    ///
    /// A failure resets the server's history: configuration and the whole
    /// latency window are discarded, not just the failed sample. New errors
    /// are logged at info level, repeats of the same error at debug.
    pub fn record_poll(
        &mut self,
        outcome: Result<(HashMap<String, String>, Duration), QueryError>,
    ) {
        self.last_polled = Some(Instant::now());

        match outcome {
            Ok((config, elapsed)) => {
                self.ping.record(Some(elapsed));

                let players = match PlayerStats::from_config(&config) {
                    Ok(stats) => Some(stats),
                    Err(error) => {
                        warn!("Failed to obtain player stats for {}: {}", self.address, error);
                        None
                    }
                };

                self.status = PollStatus::Responsive { config, players };
                self.last_success = Some(Instant::now());
                self.last_error = None;
            }
            Err(error) => {
                let message = error.to_string();

                if self.last_error.as_deref() == Some(message.as_str()) {
                    debug!("Failed to refresh game server {}: {}", self.address, message);
                } else {
                    info!("Failed to refresh game server {}: {}", self.address, message);
                }

                self.ping.record(None);
                self.status = PollStatus::Unresponsive;
                self.last_error = Some(message);
            }
        }
    }
}

/// Point-in-time view of a [`GameServer`], detached from the registry locks.
#[derive(Debug, Clone)]
pub struct ServerInfo {
    pub address: ServerAddress,
    pub responsive: bool,
    pub name: String,
    pub map_name: String,
    pub ping: Option<Duration>,
    pub min_ping: Option<Duration>,
    pub players: PlayerStats,
    pub age: Option<Duration>,
    pub last_error: Option<String>,
}

/// Queries a game server's status over a fresh UDP socket.
///
/// Returns the parsed configuration mapping together with the measured
/// round-trip time. The caller feeds the outcome into
/// [`GameServer::record_poll`].
pub async fn query_status(
    address: &ServerAddress,
    timeout_after: Duration,
) -> Result<(HashMap<String, String>, Duration), QueryError> {
    debug!("Refreshing {}.", address);

    let socket = UdpSocket::bind("0.0.0.0:0").await?;
    socket.connect((address.host.as_str(), address.port)).await?;

    let started = Instant::now();
    socket.send(&protocol::status_query()).await?;

    let mut buffer = vec![0u8; STATUS_BUFFER_SIZE];
    let received = timeout(timeout_after, socket.recv(&mut buffer)).await??;
    let elapsed = started.elapsed();

    let config = protocol::parse_status_response(&buffer[..received])?;
    Ok((config, elapsed))
}
