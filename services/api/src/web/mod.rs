pub mod auth;
pub mod rest;
pub mod state;

pub use rest::{
    catalog_handler, next_handler, profile_handler, signup_handler, switch_book_handler,
    unsubscribe_handler,
};
pub use state::AppState;
