use std::sync::Arc;

use axum::extract::FromRef;

use crate::{config::Config, services::player::TestPlayer, store::AssessmentStore};

#[derive(Clone)]
pub struct AppState {
    pub player: TestPlayer,
    pub config: Config,
}

impl AppState {
    pub fn new(store: Arc<dyn AssessmentStore>, config: Config) -> Self {
        Self {
            player: TestPlayer::new(store, config.assignment_scope),
            config,
        }
    }
}

impl FromRef<AppState> for TestPlayer {
    fn from_ref(state: &AppState) -> Self {
        state.player.clone()
    }
}

impl FromRef<AppState> for Config {
    fn from_ref(state: &AppState) -> Self {
        state.config.clone()
    }
}
