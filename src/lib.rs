pub mod cli;
pub mod command;
pub mod protocol;
pub mod services;

pub use cli::prompt;
pub use command::Command;
pub use protocol::{ClientHandler, ClientSession, Handler, Message, Registry, Server, SessionError};
