//! Matchmaking service - joins an open match or hosts a new one

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::GameConfig;
use crate::game::{GameMatch, JoinOutcome, MatchHandle, MatchRegistry, SyncError};

/// Attempts before giving up when open matches fill up under us
const JOIN_ATTEMPTS: usize = 3;

/// Matchmaking service
pub struct MatchmakingService {
    registry: Arc<MatchRegistry>,
    config: GameConfig,
    /// Map of player -> current match
    player_matches: Arc<DashMap<Uuid, Uuid>>,
    /// Serializes placement so concurrent joiners fill one match
    placement: Mutex<()>,
}

impl MatchmakingService {
    pub fn new(registry: Arc<MatchRegistry>, config: GameConfig) -> Self {
        Self {
            registry,
            config,
            player_matches: Arc::new(DashMap::new()),
            placement: Mutex::new(()),
        }
    }

    /// Place a participant into a match
    pub async fn join(&self, user_id: Uuid, nickname: String) -> Result<JoinOutcome, SyncError> {
        if self.player_matches.contains_key(&user_id) {
            return Err(SyncError::StaleCommand("already in a match"));
        }

        let _placement = self.placement.lock().await;
        let mut last_err = SyncError::MatchFull;

        for _ in 0..JOIN_ATTEMPTS {
            let handle = match self.registry.find_available_match() {
                Some(handle) => handle,
                None => self.create_match(),
            };

            match handle.join(user_id, nickname.clone()).await {
                Ok(outcome) => {
                    self.player_matches.insert(user_id, outcome.match_id);
                    info!(
                        user_id = %user_id,
                        match_id = %outcome.match_id,
                        player_id = %outcome.player_id,
                        "Player placed in match"
                    );
                    return Ok(outcome);
                }
                // Filled or ended between lookup and join
                Err(err @ (SyncError::MatchFull | SyncError::StaleCommand(_))) => {
                    warn!(user_id = %user_id, match_id = %handle.id, error = %err, "Join raced, retrying");
                    last_err = err;
                }
                Err(err) => return Err(err),
            }
        }

        Err(last_err)
    }

    /// Forget a participant's placement (called when the socket closes)
    pub fn leave(&self, user_id: Uuid) {
        self.player_matches.remove(&user_id);
    }

    /// Host a new match and register it
    fn create_match(&self) -> MatchHandle {
        let match_id = Uuid::new_v4();
        let seed = rand::random::<u64>();

        let (game_match, handle) = GameMatch::new(match_id, seed, &self.config);
        self.registry.insert(handle.clone());

        info!(match_id = %match_id, max_players = self.config.max_players, "Created new match");

        let registry = self.registry.clone();
        let player_matches = self.player_matches.clone();
        tokio::spawn(async move {
            game_match.run().await;

            // Cleanup after match ends
            registry.remove(&match_id);
            player_matches.retain(|_, m| *m != match_id);

            info!(match_id = %match_id, "Match removed from registry");
        });

        handle
    }

    /// Get player's current match ID
    pub fn get_player_match(&self, user_id: &Uuid) -> Option<Uuid> {
        self.player_matches.get(user_id).map(|r| *r)
    }
}
