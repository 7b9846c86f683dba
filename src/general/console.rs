use std::io::{self, BufRead, Write};

use termcolor::WriteColor;

use super::status;
use crate::command::{Command, HELP};
use crate::session::Session;

/// Read commands line by line and apply them to `session` until `exit`, an
/// empty line or end of input. Command errors are printed and the loop
/// carries on.
pub fn run_console<R, W>(session: &mut Session, input: R, out: &mut W) -> io::Result<()>
where
    R: BufRead,
    W: WriteColor,
{
    for line in input.lines() {
        let line = line?;
        let command = match line.parse::<Command>() {
            Ok(command) => command,
            Err(err) => {
                status::print_error(out, &err)?;
                continue;
            }
        };
        match command {
            Command::Exit => break,
            Command::Help => writeln!(out, "{}", HELP)?,
            command => match command.execute(session) {
                Ok(Some(reply)) => status::print_reply(out, &reply)?,
                Ok(None) => {}
                Err(err) => status::print_error(out, &err)?,
            },
        }
    }
    Ok(())
}
