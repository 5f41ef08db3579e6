use std::sync::Arc;

use dashmap::DashMap;
use rand::Rng;
use tokio::time::{Instant, interval_at};
use tokio_util::sync::CancellationToken;

use crate::{duel::MatchEngine, error::EngineError};

/// Live bot simulators keyed by match id.
#[derive(Default)]
pub struct BotRegistry {
    tokens: DashMap<String, CancellationToken>,
}

impl BotRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, match_id: &str) -> CancellationToken {
        let token = CancellationToken::new();
        self.tokens.insert(match_id.to_string(), token.clone());
        token
    }

    pub fn cancel(&self, match_id: &str) {
        if let Some((_, token)) = self.tokens.remove(match_id) {
            token.cancel();
        }
    }

    #[cfg(test)]
    pub fn is_running(&self, match_id: &str) -> bool {
        self.tokens.contains_key(match_id)
    }

    #[cfg(test)]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    fn release(&self, match_id: &str) {
        self.tokens.remove(match_id);
    }
}

pub(super) async fn simulate(engine: Arc<MatchEngine>, match_id: String, cancel: CancellationToken) {
    let stopped = drive(&engine, &match_id, &cancel).await;
    engine.bots().release(&match_id);
    tracing::debug!(match_id = %match_id, stopped, "bot simulator stopped");
}

async fn drive(engine: &MatchEngine, match_id: &str, cancel: &CancellationToken) -> &'static str {
    let config = engine.config();
    let tick = config.bot_tick;
    let mut ticker = interval_at(Instant::now() + tick, tick);

    for _ in 0..config.bot_max_ticks {
        tokio::select! {
            _ = cancel.cancelled() => return "cancelled",
            _ = ticker.tick() => {}
        }

        let increment = rand::rng().random_range(0..=config.bot_max_increment);
        match engine.bot_tick(match_id, increment).await {
            Ok(true) => {}
            Ok(false) => return "finished",
            Err(EngineError::NotFound(_)) => {
                tracing::warn!(match_id, "bot match disappeared");
                return "missing";
            }
            Err(err) => {
                tracing::warn!(match_id, error = %err, "bot tick failed");
                return "error";
            }
        }
    }

    tracing::info!(match_id, ticks = config.bot_max_ticks, "bot tick budget exhausted");
    "budget"
}
