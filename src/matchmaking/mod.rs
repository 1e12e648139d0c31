//! Matchmaking: place participants into open sessions

pub mod service;

pub use service::MatchmakingService;
