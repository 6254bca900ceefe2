pub mod backoff;
pub mod event;
pub mod snowflake;

pub use backoff::Backoff;
pub use event::EventFlag;
pub use snowflake::Snowflake;
