pub mod channel;
pub mod gateway;
pub mod guild;
pub mod intents;
pub mod member;
pub mod message;
pub mod role;
pub mod user;
pub mod voice;

pub use tidecord_util::Snowflake;
