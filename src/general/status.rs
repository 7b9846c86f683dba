use std::io::{self, Write};
use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

use crate::command::Reply;
use crate::error::Error;
use crate::packet::Message;
use crate::session::Session;

fn write_colored<W: WriteColor>(out: &mut W, color: Color, text: &str) -> io::Result<()> {
    out.set_color(ColorSpec::new().set_fg(Some(color)).set_intense(true))?;
    writeln!(out, "{}", text)?;
    out.reset()
}

pub fn print_banner<W: WriteColor>(out: &mut W, session: &Session) -> io::Result<()> {
    let target = session
        .target()
        .map(|t| t.to_string())
        .unwrap_or_else(|| "no target".to_string());
    write_colored(
        out,
        Color::Green,
        &format!("OSC client ready | {} -> {}", session.protocol(), target),
    )?;
    write_colored(out, Color::Blue, "Type 'help' for commands, 'exit' to quit")
}

pub fn print_reply<W: WriteColor>(out: &mut W, reply: &Reply) -> io::Result<()> {
    let text = match reply {
        Reply::Target(target) => format!("target {} {}", target.host, target.port),
        Reply::LocalPort(port) => format!("localport {}", port),
    };
    write_colored(out, Color::Blue, &text)
}

pub fn print_error<W: WriteColor>(out: &mut W, err: &Error) -> io::Result<()> {
    write_colored(out, Color::Red, &format!("error: {}", err))
}

/// `/address arg ... <- host:port @ seconds.millis`
pub fn format_received(message: &Message, sender: SocketAddr, when: SystemTime) -> String {
    let mut line = message.name().to_string();
    for arg in message.args() {
        line.push(' ');
        line.push_str(&arg.to_string());
    }
    let since_epoch = when.duration_since(UNIX_EPOCH).unwrap_or_default();
    line.push_str(&format!(
        " <- {} @ {}.{:03}",
        sender,
        since_epoch.as_secs(),
        since_epoch.subsec_millis()
    ));
    line
}

/// Print a received message on stdout. Called from the receive thread.
pub fn print_received(message: &Message, sender: SocketAddr, when: SystemTime) {
    let mut stdout = StandardStream::stdout(ColorChoice::Auto);
    let _ = write_colored(&mut stdout, Color::Green, &format_received(message, sender, when));
}
