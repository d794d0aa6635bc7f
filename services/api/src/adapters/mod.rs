pub mod db;
pub mod mailer;
pub mod recap_llm;

pub use db::DbAdapter;
pub use mailer::SendGridMailer;
pub use recap_llm::OpenAiRecapAdapter;
