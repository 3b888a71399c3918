//! CLI utilities for seqlink.
//!
//! The utilities present in this module can be used to build an interactive client.
use std::io::{self, BufRead, Write};

use thiserror::Error;

use crate::command::{Command, CommandError};

#[derive(Debug, Error)]
pub enum PromptError {
    #[error("failed to read input: {0}")]
    Io(#[from] io::Error),

    #[error(transparent)]
    Command(#[from] CommandError),
}

/// Prompt user for a valid command. End of input is treated as `.quit`.
pub fn prompt<R, W>(mut reader: R, mut writer: W) -> Result<Command, PromptError>
where
    R: BufRead,
    W: Write,
{
    let mut s = String::default();
    write!(&mut writer, "> ")?;
    writer.flush()?;

    if reader.read_line(&mut s)? == 0 {
        return Ok(Command::Quit);
    }
    Ok(s.as_str().try_into()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prompt_prints_correctly() {
        let input = b".quit\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();

        let output = String::from_utf8(output).expect("not valid UTF-8");
        assert_eq!("> ", output);
    }

    #[test]
    fn prompt_handles_messages() {
        let input = b"ECHO TEXT=hi\n";
        let mut output = Vec::new();

        let res = prompt(&input[..], &mut output).unwrap();
        assert!(matches!(res, Command::Send(m) if m.parameter("TEXT") == Some("hi")));
    }

    #[test]
    fn prompt_end_of_input_quits() {
        let input = b"";
        let mut output = Vec::new();

        assert_eq!(prompt(&input[..], &mut output).unwrap(), Command::Quit);
    }

    #[test]
    #[should_panic(expected = "unrecognized command '.something_wrong'")]
    fn prompt_unrecognized_command() {
        let input = b".something_wrong\n";
        let mut output = Vec::new();

        prompt(&input[..], &mut output).unwrap();
    }
}
