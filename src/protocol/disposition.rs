use super::{HandlerError, Message, ProcessOutcome, SessionError, codec, params, types};

/// Classification of a server reply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DispositionKind {
    /// Not yet decided. Never transmitted.
    #[default]
    None,
    Quit,
    Ack,
    Nack,
}

impl DispositionKind {
    /// Message type this kind is transmitted as.
    pub fn as_type(&self) -> &'static str {
        match self {
            DispositionKind::None => types::NONE,
            DispositionKind::Quit => types::QUIT,
            DispositionKind::Ack => types::ACK,
            DispositionKind::Nack => types::NACK,
        }
    }
}

/// Server reply to one numbered message.
///
/// A handler records its verdict through [`ok`](Self::ok), [`fail_soft`](Self::fail_soft)
/// or [`fail`](Self::fail); the session then calls [`fix_type`](Self::fix_type) once
/// immediately before the reply is encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Disposition {
    kind: DispositionKind,
    message: Message,
}

impl Disposition {
    /// Creates an undecided disposition for the message numbered `sequence`.
    pub fn new(sequence: i32) -> Self {
        Self {
            kind: DispositionKind::None,
            message: Message::new(types::NONE).with_sequence(sequence),
        }
    }

    pub fn kind(&self) -> DispositionKind {
        self.kind
    }

    pub fn sequence(&self) -> i32 {
        self.message.sequence
    }

    pub fn message(&self) -> &Message {
        &self.message
    }

    pub fn ok(&mut self) {
        self.kind = DispositionKind::Ack;
    }

    pub fn ok_with(&mut self, response: impl Into<String>) {
        self.ok();
        self.message.set_parameter(params::RESPONSE, response);
    }

    /// Marks the reply as a NACK without interrupting the caller.
    pub fn fail_soft(&mut self, response: impl Into<String>) {
        self.kind = DispositionKind::Nack;
        self.message.set_parameter(params::RESPONSE, response);
    }

    /// Marks the reply as a NACK and returns the soft failure that abandons the
    /// rest of the current message, for use with `?`.
    pub fn fail(&mut self, response: impl Into<String>) -> ProcessOutcome {
        let response = response.into();
        self.fail_soft(response.clone());
        Err(HandlerError::SoftFail(response))
    }

    /// Turns the reply into a NACK after processing was abandoned, whatever verdict
    /// was recorded before. A response set by the handler is kept; otherwise
    /// `reason` becomes the response.
    pub fn abandon(&mut self, reason: impl Into<String>) {
        self.kind = DispositionKind::Nack;
        if self.message.response().is_none() {
            self.message.set_parameter(params::RESPONSE, reason);
        }
    }

    /// Marks the reply as a request for the peer to quit.
    pub fn quit(&mut self) {
        self.kind = DispositionKind::Quit;
    }

    pub fn add_parameter(&mut self, name: impl Into<String>, value: impl Into<String>) {
        self.message.set_parameter(name, value);
    }

    /// Maps the kind onto the message type and, for ACK/NACK, records `ACKSEQ`.
    pub fn fix_type(&mut self) -> Result<(), SessionError> {
        match self.kind {
            DispositionKind::None => {
                return Err(SessionError::fault(format!(
                    "no disposition recorded for message {}",
                    self.message.sequence
                )));
            }
            DispositionKind::Ack | DispositionKind::Nack => {
                let ackseq = self.message.sequence.to_string();
                self.message.set_parameter(params::ACKSEQ, ackseq);
            }
            DispositionKind::Quit => {}
        }
        self.message.message_type = self.kind.as_type().to_string();
        Ok(())
    }

    /// Encodes the fixed reply.
    pub fn encode(&self) -> Result<Vec<u8>, SessionError> {
        match self.kind {
            DispositionKind::None => {
                return Err(SessionError::bad("NONE disposition cannot be transmitted"));
            }
            DispositionKind::Ack | DispositionKind::Nack if self.message.ackseq().is_none() => {
                return Err(SessionError::bad(format!(
                    "{} disposition without {}",
                    self.kind.as_type(),
                    params::ACKSEQ
                )));
            }
            _ => {}
        }
        codec::encode(&self.message)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn ok_fixes_to_ack_with_ackseq() {
        let mut disposition = Disposition::new(7);
        disposition.ok_with("done");
        disposition.add_parameter("COUNT", "3");
        disposition.fix_type().unwrap();

        let decoded = codec::decode(&mut Cursor::new(disposition.encode().unwrap())).unwrap();
        assert_eq!(decoded.sequence, 7);
        assert!(decoded.is_type(types::ACK));
        assert_eq!(decoded.ackseq(), Some("7"));
        assert_eq!(decoded.response(), Some("done"));
        assert_eq!(decoded.parameter("COUNT"), Some("3"));
    }

    #[test]
    fn fail_records_nack_and_soft_fails() {
        let mut disposition = Disposition::new(2);

        let res = disposition.fail("bad input");
        assert!(matches!(res, Err(HandlerError::SoftFail(ref m)) if m == "bad input"));
        assert_eq!(disposition.kind(), DispositionKind::Nack);

        disposition.fix_type().unwrap();
        assert!(disposition.message().is_type(types::NACK));
        assert_eq!(disposition.message().response(), Some("bad input"));
    }

    #[test]
    fn later_verdict_wins() {
        let mut disposition = Disposition::new(1);
        disposition.fail_soft("first");
        disposition.ok();

        assert_eq!(disposition.kind(), DispositionKind::Ack);
    }

    #[test]
    fn fixing_none_is_a_protocol_fault() {
        let mut disposition = Disposition::new(1);

        assert!(matches!(
            disposition.fix_type(),
            Err(SessionError::ProtocolFault(_))
        ));
    }

    #[test]
    fn encoding_none_is_a_bad_message() {
        let disposition = Disposition::new(1);

        assert!(matches!(
            disposition.encode(),
            Err(SessionError::BadMessage(_))
        ));
    }

    #[test]
    fn encoding_unfixed_ack_is_a_bad_message() {
        let mut disposition = Disposition::new(1);
        disposition.ok();

        assert!(matches!(
            disposition.encode(),
            Err(SessionError::BadMessage(_))
        ));
    }

    #[test]
    fn quit_has_no_ackseq() {
        let mut disposition = Disposition::new(crate::protocol::UNNUMBERED);
        disposition.quit();
        disposition.fix_type().unwrap();

        assert!(disposition.message().is_type(types::QUIT));
        assert_eq!(disposition.message().ackseq(), None);
        assert!(disposition.encode().is_ok());
    }

    #[test]
    fn abandon_overrides_an_earlier_ack() {
        let mut disposition = Disposition::new(4);
        disposition.ok();
        disposition.abandon("validation failed late");
        disposition.fix_type().unwrap();

        assert!(disposition.message().is_type(types::NACK));
        assert_eq!(disposition.message().ackseq(), Some("4"));
        assert_eq!(
            disposition.message().response(),
            Some("validation failed late")
        );

        let mut disposition = Disposition::new(5);
        disposition.ok_with("partial result");
        disposition.abandon("ignored");
        assert_eq!(disposition.kind(), DispositionKind::Nack);
        assert_eq!(disposition.message().response(), Some("partial result"));
    }
}
