//! Server runtime configuration.

use std::time::Duration;

/// Tunables assembled from the command line in `main`.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub port: u16,
    pub max_players: usize,
    pub tick_rate_hz: u32,
    pub network_tick_rate_hz: u32,
    pub connection_timeout: Duration,
    /// Persistence base URL; `None` disables persistence entirely.
    pub supabase_url: Option<String>,
    pub supabase_key: String,
    /// Number of NPC agents spawned at world creation.
    pub npc_count: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: protocol::DEFAULT_PORT,
            max_players: 8,
            tick_rate_hz: protocol::TICK_RATE_HZ,
            network_tick_rate_hz: protocol::NETWORK_TICK_RATE_HZ,
            connection_timeout: Duration::from_millis(protocol::CONNECTION_TIMEOUT_MS),
            supabase_url: None,
            supabase_key: String::new(),
            npc_count: 5,
        }
    }
}

impl ServerConfig {
    pub fn game_tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.tick_rate_hz as f64)
    }

    pub fn network_tick_interval(&self) -> Duration {
        Duration::from_secs_f64(1.0 / self.network_tick_rate_hz as f64)
    }

    pub fn persistence_enabled(&self) -> bool {
        self.supabase_url.is_some()
    }
}
