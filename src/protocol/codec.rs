//! Message codec.
//!
//! Encodes and decodes [`Message`] values using the session wire format:
//!
//! ```text
//! MESSAGE   = SEQUENCE, NUM_PARAMS, NUM_ATTRS, TYPE, PARAM*NUM_PARAMS, ATTR*NUM_ATTRS
//! PARAM     = STRING name, STRING value
//! ATTR      = STRING name, STRING value
//! STRING    = LENGTH, LENGTH bytes
//! ```
//!
//! Every integer is a big-endian `i32`. `NUM_PARAMS` and `NUM_ATTRS` are bounded by
//! [`MAX_PARAMETERS_PER_MESSAGE`] and every string must be between 1 and
//! [`MAX_MESSAGE_TOKEN`] bytes long. Violations in either direction are reported as
//! [`SessionError::BadMessage`]; a stream that ends mid-message is a
//! [`SessionError::Link`].
use std::{
    collections::HashMap,
    io::{Read, Write},
};

use super::{MAX_MESSAGE_TOKEN, MAX_PARAMETERS_PER_MESSAGE, Message, SessionError};

const INT_SIZE: usize = size_of::<i32>();

/// Serializes a message, validating its shape first.
pub fn encode(message: &Message) -> Result<Vec<u8>, SessionError> {
    validate(message)?;

    let mut buf = Vec::with_capacity(3 * INT_SIZE + INT_SIZE + message.message_type.len());
    buf.extend_from_slice(&message.sequence.to_be_bytes());
    put_count(&mut buf, message.parameters.len());
    put_count(&mut buf, message.attributes.len());
    put_string(&mut buf, &message.message_type);
    for (name, value) in message.parameters.iter().chain(message.attributes.iter()) {
        put_string(&mut buf, name);
        put_string(&mut buf, value);
    }
    Ok(buf)
}

/// Encodes `message` and writes it to `writer` in one piece.
pub fn write_message<W: Write + ?Sized>(
    writer: &mut W,
    message: &Message,
) -> Result<(), SessionError> {
    let bytes = encode(message)?;
    writer.write_all(&bytes)?;
    writer.flush()?;
    Ok(())
}

/// Reads exactly one message from `reader`. Blocks until it is complete.
pub fn decode<R: Read + ?Sized>(reader: &mut R) -> Result<Message, SessionError> {
    let sequence = read_int(reader)?;
    let num_params = read_count(reader, "parameters")?;
    let num_attrs = read_count(reader, "attributes")?;
    let message_type = read_string(reader)?;

    let parameters = read_pairs(reader, num_params, "parameter")?;
    let attributes = read_pairs(reader, num_attrs, "attribute")?;

    Ok(Message {
        sequence,
        message_type,
        parameters,
        attributes,
    })
}

/// Length in bytes of the first message in `buf`, or `None` while only part of it
/// has been received. Counts and string lengths are validated as they are seen.
pub fn frame_length(buf: &[u8]) -> Result<Option<usize>, SessionError> {
    let mut scan = Scan { buf, pos: 0 };

    if scan.int().is_none() {
        return Ok(None);
    }
    let Some(num_params) = scan.int() else {
        return Ok(None);
    };
    let num_params = check_count(num_params, "parameters")?;
    let Some(num_attrs) = scan.int() else {
        return Ok(None);
    };
    let num_attrs = check_count(num_attrs, "attributes")?;

    for _ in 0..1 + 2 * (num_params + num_attrs) {
        let Some(length) = scan.int() else {
            return Ok(None);
        };
        if !scan.skip(check_length(length)?) {
            return Ok(None);
        }
    }
    Ok(Some(scan.pos))
}

struct Scan<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl Scan<'_> {
    fn int(&mut self) -> Option<i32> {
        let bytes = self.buf.get(self.pos..self.pos + INT_SIZE)?;
        self.pos += INT_SIZE;
        Some(i32::from_be_bytes(bytes.try_into().ok()?))
    }

    fn skip(&mut self, length: usize) -> bool {
        if self.buf.len() - self.pos < length {
            return false;
        }
        self.pos += length;
        true
    }
}

fn validate(message: &Message) -> Result<(), SessionError> {
    check_token("type", &message.message_type)?;
    check_map("parameters", &message.parameters)?;
    check_map("attributes", &message.attributes)
}

fn check_map(what: &str, map: &HashMap<String, String>) -> Result<(), SessionError> {
    if map.len() > MAX_PARAMETERS_PER_MESSAGE {
        return Err(SessionError::bad(format!(
            "{} {what} exceeds the limit of {MAX_PARAMETERS_PER_MESSAGE}",
            map.len()
        )));
    }
    for (name, value) in map {
        check_token("name", name)?;
        check_token(name, value)?;
    }
    Ok(())
}

fn check_token(what: &str, token: &str) -> Result<(), SessionError> {
    if token.is_empty() {
        return Err(SessionError::bad(format!("empty {what}")));
    }
    if token.len() > MAX_MESSAGE_TOKEN {
        return Err(SessionError::bad(format!(
            "{what} is {} bytes, limit is {MAX_MESSAGE_TOKEN}",
            token.len()
        )));
    }
    Ok(())
}

fn put_count(buf: &mut Vec<u8>, count: usize) {
    // Bounded by validate().
    buf.extend_from_slice(&(count as i32).to_be_bytes());
}

fn put_string(buf: &mut Vec<u8>, value: &str) {
    put_count(buf, value.len());
    buf.extend_from_slice(value.as_bytes());
}

fn check_count(count: i32, what: &str) -> Result<usize, SessionError> {
    match usize::try_from(count) {
        Ok(count) if count <= MAX_PARAMETERS_PER_MESSAGE => Ok(count),
        _ => Err(SessionError::bad(format!(
            "{count} {what} outside 0..={MAX_PARAMETERS_PER_MESSAGE}"
        ))),
    }
}

fn check_length(length: i32) -> Result<usize, SessionError> {
    match usize::try_from(length) {
        Ok(length) if (1..=MAX_MESSAGE_TOKEN).contains(&length) => Ok(length),
        _ => Err(SessionError::bad(format!(
            "string length {length} outside 1..={MAX_MESSAGE_TOKEN}"
        ))),
    }
}

fn read_int<R: Read + ?Sized>(reader: &mut R) -> Result<i32, SessionError> {
    let mut bytes = [0u8; INT_SIZE];
    reader.read_exact(&mut bytes)?;
    Ok(i32::from_be_bytes(bytes))
}

fn read_count<R: Read + ?Sized>(reader: &mut R, what: &str) -> Result<usize, SessionError> {
    check_count(read_int(reader)?, what)
}

fn read_string<R: Read + ?Sized>(reader: &mut R) -> Result<String, SessionError> {
    let length = check_length(read_int(reader)?)?;
    let mut bytes = vec![0u8; length];
    reader.read_exact(&mut bytes)?;
    String::from_utf8(bytes).map_err(|e| SessionError::bad(format!("invalid UTF-8: {e}")))
}

fn read_pairs<R: Read + ?Sized>(
    reader: &mut R,
    count: usize,
    what: &str,
) -> Result<HashMap<String, String>, SessionError> {
    let mut map = HashMap::with_capacity(count);
    for _ in 0..count {
        let name = read_string(reader)?;
        let value = read_string(reader)?;
        if map.insert(name.clone(), value).is_some() {
            return Err(SessionError::bad(format!("duplicate {what} '{name}'")));
        }
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;
    use crate::protocol::{STARTUP, params, types};

    fn raw_string(buf: &mut Vec<u8>, value: &[u8]) {
        buf.extend_from_slice(&(value.len() as i32).to_be_bytes());
        buf.extend_from_slice(value);
    }

    fn raw_header(sequence: i32, params: i32, attrs: i32, message_type: &[u8]) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&sequence.to_be_bytes());
        buf.extend_from_slice(&params.to_be_bytes());
        buf.extend_from_slice(&attrs.to_be_bytes());
        raw_string(&mut buf, message_type);
        buf
    }

    #[test]
    fn wire_layout() {
        let message = Message::new(types::SERVICE)
            .with_sequence(STARTUP)
            .with_parameter(params::CLASS, "echo");

        let bytes = encode(&message).unwrap();

        let mut expected = raw_header(0, 1, 0, b"SERVICE");
        raw_string(&mut expected, b"CLASS");
        raw_string(&mut expected, b"echo");
        assert_eq!(bytes, expected);
    }

    #[test]
    fn round_trip_preserves_maps() {
        let mut message = Message::new("ECHO").with_sequence(42);
        for i in 0..MAX_PARAMETERS_PER_MESSAGE {
            message = message
                .with_parameter(format!("p{i}"), format!("value {i}"))
                .with_attribute(format!("a{i}"), "x".repeat(i + 1));
        }
        let message = message.with_parameter("p0", "\u{00e9}t\u{00e9}");

        let bytes = encode(&message).unwrap();
        let decoded = decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded, message);
    }

    #[test]
    fn round_trip_negative_sequence_and_max_token() {
        let message = Message::new("T".repeat(MAX_MESSAGE_TOKEN))
            .with_parameter("k", "v".repeat(MAX_MESSAGE_TOKEN));

        let bytes = encode(&message).unwrap();
        let decoded = decode(&mut Cursor::new(bytes)).unwrap();
        assert_eq!(decoded.sequence, -1);
        assert_eq!(decoded, message);
    }

    #[test]
    fn encode_rejects_oversized_type() {
        let message = Message::new("T".repeat(MAX_MESSAGE_TOKEN + 1));

        assert!(matches!(encode(&message), Err(SessionError::BadMessage(_))));
    }

    #[test]
    fn encode_rejects_too_many_parameters() {
        let mut message = Message::new("ECHO");
        for i in 0..=MAX_PARAMETERS_PER_MESSAGE {
            message.set_parameter(format!("p{i}"), "v");
        }

        assert!(matches!(encode(&message), Err(SessionError::BadMessage(_))));
    }

    #[test]
    fn encode_rejects_empty_strings() {
        let empty_attr = Message::new("ECHO").with_attribute("a", "");
        let empty_type = Message::new("");
        let empty_name = Message::new("ECHO").with_parameter("", "v");

        for message in [empty_attr, empty_type, empty_name] {
            assert!(matches!(encode(&message), Err(SessionError::BadMessage(_))));
        }
    }

    #[test]
    fn decode_rejects_oversized_type() {
        let bytes = raw_header(1, 0, 0, &vec![b'T'; MAX_MESSAGE_TOKEN + 1]);

        let res = decode(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(SessionError::BadMessage(_))));
    }

    #[test]
    fn decode_rejects_too_many_parameters() {
        let mut bytes = raw_header(1, 11, 0, b"ECHO");
        for i in 0..11 {
            raw_string(&mut bytes, format!("p{i}").as_bytes());
            raw_string(&mut bytes, b"v");
        }

        let res = decode(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(SessionError::BadMessage(_))));
    }

    #[test]
    fn decode_rejects_negative_count() {
        let bytes = raw_header(1, 0, -3, b"ECHO");

        let res = decode(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(SessionError::BadMessage(_))));
    }

    #[test]
    fn decode_rejects_empty_attribute_value() {
        let mut bytes = raw_header(1, 0, 1, b"ECHO");
        raw_string(&mut bytes, b"name");
        raw_string(&mut bytes, b"");

        let res = decode(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(SessionError::BadMessage(_))));
    }

    #[test]
    fn decode_rejects_empty_type() {
        let bytes = raw_header(1, 0, 0, b"");

        let res = decode(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(SessionError::BadMessage(_))));
    }

    #[test]
    fn decode_rejects_invalid_utf8() {
        let bytes = raw_header(1, 0, 0, &[0xff, 0xfe]);

        let res = decode(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(SessionError::BadMessage(_))));
    }

    #[test]
    fn decode_rejects_duplicate_names() {
        let mut bytes = raw_header(1, 2, 0, b"ECHO");
        for _ in 0..2 {
            raw_string(&mut bytes, b"TEXT");
            raw_string(&mut bytes, b"v");
        }

        let res = decode(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(SessionError::BadMessage(_))));
    }

    #[test]
    fn truncated_stream_is_a_link_error() {
        let mut bytes = encode(&Message::new("ECHO").with_parameter("TEXT", "hello")).unwrap();
        bytes.truncate(bytes.len() - 2);

        let res = decode(&mut Cursor::new(bytes));
        assert!(matches!(res, Err(SessionError::Link(_))));
    }

    #[test]
    fn decodes_back_to_back_messages() {
        let mut stream = Vec::new();
        write_message(&mut stream, &Message::new(types::QUIT)).unwrap();
        write_message(&mut stream, &Message::new(types::QUITING)).unwrap();

        let mut cursor = Cursor::new(stream);
        assert!(decode(&mut cursor).unwrap().is_type(types::QUIT));
        assert!(decode(&mut cursor).unwrap().is_type(types::QUITING));
    }

    #[test]
    fn frame_length_waits_for_whole_message() {
        let bytes = encode(
            &Message::new(types::LOG)
                .with_parameter(params::LOG, "hello")
                .with_attribute("k", "v"),
        )
        .unwrap();

        for cut in 0..bytes.len() {
            assert_eq!(frame_length(&bytes[..cut]).unwrap(), None, "cut at {cut}");
        }
        assert_eq!(frame_length(&bytes).unwrap(), Some(bytes.len()));

        let mut two = bytes.clone();
        two.extend_from_slice(&bytes[..5]);
        assert_eq!(frame_length(&two).unwrap(), Some(bytes.len()));
    }

    #[test]
    fn frame_length_rejects_bad_sizes_early() {
        let bytes = raw_header(1, 11, 0, b"ECHO");
        assert!(matches!(
            frame_length(&bytes[..12]),
            Err(SessionError::BadMessage(_))
        ));

        let bytes = raw_header(1, 0, 0, &vec![b'T'; MAX_MESSAGE_TOKEN + 1]);
        assert!(matches!(
            frame_length(&bytes[..16]),
            Err(SessionError::BadMessage(_))
        ));
    }
}
