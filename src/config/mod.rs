//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::str::FromStr;
use std::time::Duration;

use crate::game::clock::MAX_TICK_RATE;
use crate::game::{Pose, Vec3};

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Secret used to verify join tickets
    pub session_secret: String,
    /// Allowed client origin for CORS
    pub client_origin: String,

    /// Rules applied to every hosted match
    pub game: GameConfig,
}

/// Per-match rules and timing
#[derive(Clone, Debug)]
pub struct GameConfig {
    /// Simulation ticks per second
    pub tick_rate: u32,
    /// Ticks between property syncs
    pub sync_interval_ticks: u32,
    pub max_hp: f32,
    pub respawn_delay: Duration,
    /// Ticks of ignored input after a respawn teleport
    pub spawn_freeze_ticks: u64,
    pub match_duration: Duration,
    /// Zero disables the kill limit
    pub kill_limit: u32,
    pub min_players: usize,
    pub max_players: usize,
    /// How long an ended match keeps running before teardown
    pub end_linger: Duration,
    /// Respawn anchors; empty means respawn at the original pose
    pub spawn_points: Vec<Pose>,
}

impl Default for GameConfig {
    fn default() -> Self {
        Self {
            tick_rate: 30,
            sync_interval_ticks: 1,
            max_hp: 100.0,
            respawn_delay: Duration::from_secs(3),
            spawn_freeze_ticks: 6,
            match_duration: Duration::from_secs(300),
            kill_limit: 10,
            min_players: 2,
            max_players: 4,
            end_linger: Duration::from_secs(5),
            spawn_points: Vec::new(),
        }
    }
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),

            session_secret: env::var("SESSION_SECRET")
                .map_err(|_| ConfigError::Missing("SESSION_SECRET"))?,
            client_origin: env::var("CLIENT_ORIGIN")
                .unwrap_or_else(|_| "http://localhost:3000".to_string()),

            game: GameConfig::from_env()?,
        })
    }
}

impl GameConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let config = Self {
            tick_rate: env_or("TICK_RATE", defaults.tick_rate)?,
            sync_interval_ticks: env_or("SYNC_INTERVAL_TICKS", defaults.sync_interval_ticks)?,
            max_hp: env_or("MAX_HP", defaults.max_hp)?,
            respawn_delay: env_secs("RESPAWN_DELAY_SECS", defaults.respawn_delay)?,
            spawn_freeze_ticks: env_or("SPAWN_FREEZE_TICKS", defaults.spawn_freeze_ticks)?,
            match_duration: env_secs("MATCH_DURATION_SECS", defaults.match_duration)?,
            kill_limit: env_or("KILL_LIMIT", defaults.kill_limit)?,
            min_players: env_or("MIN_PLAYERS", defaults.min_players)?,
            max_players: env_or("MAX_PLAYERS", defaults.max_players)?,
            end_linger: env_secs("MATCH_END_LINGER_SECS", defaults.end_linger)?,
            spawn_points: match env::var("SPAWN_POINTS") {
                Ok(raw) => parse_spawn_points(&raw)?,
                Err(_) => defaults.spawn_points,
            },
        };
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.tick_rate == 0 || self.tick_rate > MAX_TICK_RATE {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if !(self.max_hp.is_finite() && self.max_hp > 0.0) {
            return Err(ConfigError::Invalid("MAX_HP"));
        }
        if self.max_players == 0 || self.min_players > self.max_players {
            return Err(ConfigError::Invalid("MIN_PLAYERS"));
        }
        Ok(())
    }
}

fn env_or<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

fn env_secs(name: &'static str, default: Duration) -> Result<Duration, ConfigError> {
    match env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse::<f64>()
            .ok()
            .filter(|secs| secs.is_finite() && *secs >= 0.0)
            .map(Duration::from_secs_f64)
            .ok_or(ConfigError::Invalid(name)),
        Err(_) => Ok(default),
    }
}

/// Parse `x,y,z,yaw;x,y,z,yaw;...`
pub fn parse_spawn_points(raw: &str) -> Result<Vec<Pose>, ConfigError> {
    raw.split(';')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .map(|entry| {
            let values: Vec<f32> = entry
                .split(',')
                .map(|v| v.trim().parse::<f32>())
                .collect::<Result<_, _>>()
                .map_err(|_| ConfigError::Invalid("SPAWN_POINTS"))?;
            match values.as_slice() {
                [x, y, z, yaw] => Ok(Pose::new(Vec3::new(*x, *y, *z), *yaw)),
                [x, y, z] => Ok(Pose::new(Vec3::new(*x, *y, *z), 0.0)),
                _ => Err(ConfigError::Invalid("SPAWN_POINTS")),
            }
        })
        .collect()
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}
