//! Text command channel: one command per datagram, replies as datagrams.

use alloc::string::String;
use alloc::vec::Vec;
use core::fmt::Write as _;

use lightdip_control::CommandTarget;

use crate::Error;

/// Largest reply datagram; keeps replies inside one Ethernet frame.
pub const MAX_DATAGRAM_LEN: usize = 1500;
pub const HISTORY_VALUES_PER_LINE: usize = 10;

const HISTORY_LINE_CAP: usize = 160;

pub const HELP_TEXT: &str = "\
Accepted command examples:
count      -- get the total number of samples taken.
length     -- get the number of samples taken in the previously completed second.
dips       -- get the number of dips in the previously completed second.
history    -- get all the samples in the previously completed second.
stop       -- cause the server program to end.
<enter>    -- repeat last command.
";

pub const UNKNOWN_REPLY: &str = "Unknown command. Type 'help' for command list.\n";
pub const STOP_REPLY: &str = "Program terminating.\n";

#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Command {
    Help,
    Count,
    Length,
    Dips,
    History,
    Stop,
}

impl Command {
    pub fn parse(text: &str) -> Option<Command> {
        let word = text.trim();
        let table = [
            ("help", Command::Help),
            ("?", Command::Help),
            ("count", Command::Count),
            ("length", Command::Length),
            ("dips", Command::Dips),
            ("history", Command::History),
            ("stop", Command::Stop),
        ];
        table
            .iter()
            .find(|(name, _)| word.eq_ignore_ascii_case(name))
            .map(|(_, cmd)| *cmd)
    }
}

/// Per-listener memory of the previous command, for the empty-datagram repeat.
#[derive(Clone, Copy, Debug, Default)]
pub struct CommandSession {
    last: Option<Command>,
}

impl CommandSession {
    pub const fn new() -> Self {
        Self { last: None }
    }

    /// `None` means the datagram is not a command (or repeats one that wasn't).
    pub fn resolve(&mut self, datagram: &str) -> Option<Command> {
        if datagram.trim().is_empty() {
            return self.last;
        }
        let cmd = Command::parse(datagram);
        self.last = cmd;
        cmd
    }
}

/// Run `cmd` against `target` and render the reply datagrams.
pub fn respond<T: CommandTarget + ?Sized>(
    cmd: Option<Command>,
    target: &T,
) -> Result<Vec<String>, Error> {
    let mut out = String::new();
    match cmd {
        None => out.push_str(UNKNOWN_REPLY),
        Some(Command::Help) => out.push_str(HELP_TEXT),
        Some(Command::Count) => {
            let _ = writeln!(out, "# samples taken total: {}", target.total_samples());
        }
        Some(Command::Length) => {
            let _ = writeln!(out, "# samples taken last second: {}", target.history_len());
        }
        Some(Command::Dips) => {
            let _ = writeln!(out, "# Dips: {}", target.dip_count());
        }
        Some(Command::History) => return history_datagrams(&target.history(), MAX_DATAGRAM_LEN),
        Some(Command::Stop) => {
            target.request_shutdown();
            out.push_str(STOP_REPLY);
        }
    }
    Ok(alloc::vec![out])
}

/// Samples as `%.3f`, ten per line, packed into datagrams of at most
/// `max_len` bytes. Lines are never split across datagrams.
pub fn history_datagrams(samples: &[f64], max_len: usize) -> Result<Vec<String>, Error> {
    let mut datagrams = Vec::new();
    let mut current = String::new();

    for chunk in samples.chunks(HISTORY_VALUES_PER_LINE) {
        let line = history_line(chunk)?;
        if line.len() > max_len {
            return Err(Error::LineTooLong);
        }
        if current.len() + line.len() > max_len {
            datagrams.push(core::mem::take(&mut current));
        }
        current.push_str(&line);
    }

    if samples.is_empty() {
        current.push('\n');
    }
    if !current.is_empty() {
        datagrams.push(current);
    }
    Ok(datagrams)
}

fn history_line(values: &[f64]) -> Result<heapless::String<HISTORY_LINE_CAP>, Error> {
    let mut line = heapless::String::new();
    for (i, v) in values.iter().enumerate() {
        let sep = if i + 1 == values.len() { "\n" } else { ", " };
        write!(line, "{v:.3}{sep}").map_err(|_| Error::LineTooLong)?;
    }
    Ok(line)
}
