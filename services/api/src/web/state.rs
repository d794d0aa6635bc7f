//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use crate::dispatch::DispatchEngine;
use crate::security::TokenCodec;
use crate::users::UserService;
use dailylit_core::ports::DatabaseService;
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub users: UserService,
    pub dispatch: DispatchEngine,
    pub tokens: TokenCodec,
}
