pub mod backend;
pub mod config;
pub mod discovery;
pub mod encoder;
pub mod error;
pub mod frame;
pub mod observability;
pub mod package;
pub mod player;
pub mod playlist;
pub mod protocol;
pub mod queue;
pub mod server;
pub mod session;
pub mod source;
pub mod time;
pub mod validation;
pub mod writer;

pub use config::SessionConfig;
pub use encoder::{EncoderPool, PoolSettings};
pub use error::{BackendError, EncodeError};
pub use playlist::{Content, ContentSource, Playlist};
pub use session::{EncodeSession, SessionReport};
pub use time::{ContentTime, DcpTime};
pub use writer::Writer;
