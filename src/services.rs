//! Built-in services.
//!
//! Services are [`Handler`] implementations registered by name in a [`Registry`];
//! the server binary exposes every service returned by [`registry`].
use log::{debug, info};

use crate::protocol::{Context, Handler, MAX_PARAMETERS_PER_MESSAGE, ProcessOutcome, Registry};

/// Message type understood by [`EchoHandler`].
pub const ECHO: &str = "ECHO";
/// Parameter holding the text to echo.
pub const TEXT: &str = "TEXT";

// ACKSEQ and RESPONSE are always present on the reply.
const MAX_COPIED_PARAMETERS: usize = MAX_PARAMETERS_PER_MESSAGE - 2;

/// Answers every `ECHO` message with its `TEXT` as the response and copies its
/// other parameters onto the acknowledgement.
#[derive(Debug, Default)]
pub struct EchoHandler {
    echoed: usize,
}

impl Handler for EchoHandler {
    fn init(&mut self) -> ProcessOutcome {
        debug!("echo session started");
        Ok(())
    }

    fn quit(&mut self) {
        info!("echo session ended after {} messages", self.echoed);
    }

    fn process(&mut self, ctx: &mut Context<'_>) -> ProcessOutcome {
        let message = ctx.message();
        if !message.is_type(ECHO) {
            return ctx.punt(format!(
                "unsupported message type '{}'",
                message.message_type
            ));
        }
        let text = ctx.required_parameter(TEXT)?;

        let mut names: Vec<_> = message
            .parameters
            .keys()
            .filter(|name| name.as_str() != TEXT)
            .collect();
        names.sort();
        for name in names.into_iter().take(MAX_COPIED_PARAMETERS) {
            ctx.add_parameter(name.as_str(), message.parameters[name].as_str());
        }

        ctx.send_log(format!("echoing {} bytes", text.len()))?;
        self.echoed += 1;
        ctx.ok_with(text);
        Ok(())
    }

    fn process_unnumbered(&mut self, ctx: &mut Context<'_>) -> ProcessOutcome {
        debug!("ignoring unnumbered {}", ctx.message().message_type);
        Ok(())
    }
}

/// Every built-in service, keyed by the name clients use in the handshake.
pub fn registry() -> Registry {
    let mut registry = Registry::new();
    registry.register("echo", EchoHandler::default);
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{
        HandlerFactory, MemoryTransport, Message, STARTUP, codec, params, serve, types,
    };

    fn run(script: &[Message]) -> Vec<Message> {
        let (server_end, mut peer) = MemoryTransport::pair();
        for message in script {
            codec::write_message(&mut peer, message).unwrap();
        }
        serve(server_end, &registry()).unwrap();
        std::iter::from_fn(|| codec::decode(&mut peer).ok()).collect()
    }

    fn hello() -> Message {
        Message::new(types::SERVICE)
            .with_sequence(STARTUP)
            .with_parameter(params::CLASS, "echo")
    }

    #[test]
    fn registry_knows_echo() {
        assert!(registry().resolve("echo").is_ok());
    }

    #[test]
    fn echoes_text_and_copies_parameters() {
        let replies = run(&[
            hello(),
            Message::new(ECHO)
                .with_sequence(1)
                .with_parameter(TEXT, "hello")
                .with_parameter("COLOR", "blue"),
            Message::new(types::QUIT),
        ]);

        assert!(replies[1].is_type(types::LOG));
        assert_eq!(replies[1].parameter(params::LOG), Some("echoing 5 bytes"));
        let ack = &replies[2];
        assert!(ack.is_type(types::ACK));
        assert_eq!(ack.response(), Some("hello"));
        assert_eq!(ack.parameter("COLOR"), Some("blue"));
    }

    #[test]
    fn reply_stays_within_parameter_limit() {
        let mut message = Message::new(ECHO).with_sequence(1).with_parameter(TEXT, "x");
        for i in 0..9 {
            message.set_parameter(format!("P{i}"), "v");
        }

        let replies = run(&[hello(), message, Message::new(types::QUIT)]);
        let ack = &replies[2];
        assert!(ack.is_type(types::ACK));
        assert_eq!(ack.parameters.len(), MAX_PARAMETERS_PER_MESSAGE);
    }

    #[test]
    fn other_types_are_punted() {
        let replies = run(&[
            hello(),
            Message::new("SHOUT").with_sequence(1),
            Message::new(ECHO).with_sequence(2).with_parameter(TEXT, "ok"),
            Message::new(types::QUIT),
        ]);

        assert!(replies[1].is_type(types::NACK));
        assert_eq!(
            replies[1].response(),
            Some("unsupported message type 'SHOUT'")
        );
        assert!(replies[3].is_type(types::ACK));
        assert_eq!(replies[3].ackseq(), Some("2"));
    }
}
