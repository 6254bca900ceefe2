//! Main gateway session: identify/resume, opcode handling, the entity cache
//! and the [`Client`] facade tying gateway, REST and voice together.

pub mod cache;
mod client;
pub mod dispatcher;
mod error;
mod event;
mod handler;
mod session;
mod voice_link;

pub use cache::{Cache, GuildEntry};
pub use client::{Client, ClientBuilder, ClientConfig};
pub use error::ClientError;
pub use event::Event;
pub use handler::{EventHandler, EventQueue, FnHandler, NoopHandler, QueueHandler};
pub use session::{Session, LIBRARY_NAME};
pub use voice_link::VoiceLink;

pub use tidecord_http as http;
pub use tidecord_models as models;
pub use tidecord_voice as voice;
pub use tidecord_ws as ws;
