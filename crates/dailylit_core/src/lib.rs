pub mod domain;
pub mod ports;

pub use domain::{Book, Chunk, Edition, Subscription, SubscriptionStatus, User};
pub use ports::{DatabaseService, Mailer, PortError, PortResult, RecapService};
