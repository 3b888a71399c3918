use std::{
    error::Error,
    io,
    net::{SocketAddr, TcpStream},
};

use clap::Parser;
use seqlink::{
    ClientHandler, ClientSession, Command, Message, SessionError, prompt,
    protocol::Outbound,
};

#[derive(Debug, Parser)]
#[command(version, about, long_about = None)]
struct Cli {
    /// Address of the server
    address: SocketAddr,
    /// Service to open a session with
    #[arg(default_value = "echo")]
    service: String,
}

/// Prints server traffic as it is drained.
struct Printer;

impl ClientHandler for Printer {
    fn on_ack(&mut self, _out: &mut dyn Outbound, sequence: i32, reply: &Message) {
        println!("[ack {sequence}] {}", reply.response().unwrap_or_default());
    }

    fn on_nack(&mut self, _out: &mut dyn Outbound, sequence: i32, reply: &Message) {
        println!("[nack {sequence}] {}", reply.response().unwrap_or_default());
    }

    fn on_log(&mut self, text: &str) {
        println!("[log] {text}");
    }

    fn on_message(&mut self, _out: &mut dyn Outbound, message: &Message) {
        println!("[{}] {:?}", message.message_type, message.parameters);
    }

    fn on_quit(&mut self) {
        println!("session closed");
    }
}

fn main() -> Result<(), Box<dyn Error>> {
    env_logger::init();

    let cli = Cli::parse();
    let stream = TcpStream::connect(cli.address)?;
    let mut session = ClientSession::start(stream, &cli.service, Printer)?;

    let stdin = io::stdin();
    let stdout = io::stdout();
    loop {
        let cmd = match prompt(stdin.lock(), stdout.lock()) {
            Ok(c) => c,
            Err(e) => {
                eprintln!("{e}");
                continue;
            }
        };

        match cmd {
            Command::Quit => {
                session.shutdown()?;
                break;
            }
            Command::Drain => {
                if session.receive()? {
                    break;
                }
            }
            Command::Send(message) => match session.send(message) {
                Ok(sequence) => println!("sent {sequence}"),
                Err(SessionError::SoftFail(reason)) => {
                    eprintln!("{reason}");
                    session.shutdown()?;
                    break;
                }
                Err(e) => return Err(e.into()),
            },
        }
    }

    Ok(())
}
