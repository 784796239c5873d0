//! Purpose: Run the read, append, and stat modes of the `ringfile` CLI.
//! Exports: `Mode`, `Command`, `run`.
//! Role: Thin collaborator over `ringfile::api`; stdin/stdout are injected for tests.
//! Invariants: Append treats each input line (without its `\n`) as one record.
//! Invariants: Read prints every record followed by `\n`; stat reports data-region bytes.
use std::io::{BufRead, Write};
use std::path::PathBuf;

use ringfile::api::{Error, ErrorKind, RingAppender, RingOptions, RingReader};
use tracing::debug;

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub(crate) enum Mode {
    Read,
    Append,
    Stat,
}

#[derive(Clone, Debug)]
pub(crate) struct Command {
    pub(crate) mode: Mode,
    pub(crate) path: PathBuf,
    /// Total file size used when append mode has to create the file.
    pub(crate) size: Option<u64>,
    pub(crate) json: bool,
}

pub(crate) fn run(
    command: &Command,
    stdin: &mut impl BufRead,
    stdout: &mut impl Write,
) -> Result<(), Error> {
    match command.mode {
        Mode::Read => read(command, stdout),
        Mode::Append => append(command, stdin),
        Mode::Stat => stat(command, stdout),
    }
}

fn read(command: &Command, stdout: &mut impl Write) -> Result<(), Error> {
    let mut ring = RingReader::open(&command.path)?;
    let mut count = 0u64;
    while let Some(record) = ring.read_record()? {
        stdout
            .write_all(&record)
            .and_then(|()| stdout.write_all(b"\n"))
            .map_err(|err| output_error(err, command))?;
        count += 1;
    }
    stdout.flush().map_err(|err| output_error(err, command))?;
    debug!(path = %command.path.display(), records = count, "read complete");
    ring.close()
}

fn append(command: &Command, stdin: &mut impl BufRead) -> Result<(), Error> {
    let mut ring = open_or_create(command)?;
    let mut line = Vec::new();
    let mut count = 0u64;
    loop {
        line.clear();
        let read = stdin.read_until(b'\n', &mut line).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("reading stdin")
                .with_source(err)
        })?;
        if read == 0 {
            break;
        }
        if line.last() == Some(&b'\n') {
            line.pop();
        }
        ring.write(&line)?;
        count += 1;
    }
    debug!(path = %command.path.display(), records = count, "append complete");
    ring.close()
}

fn open_or_create(command: &Command) -> Result<RingAppender, Error> {
    match RingAppender::open(&command.path) {
        Ok(ring) => Ok(ring),
        Err(err) if err.kind() == ErrorKind::NotFound => {
            let Some(size) = command.size else {
                return Err(Error::new(ErrorKind::Usage)
                    .with_message("file does not exist and --size was not specified")
                    .with_path(&command.path));
            };
            debug!(path = %command.path.display(), file_size = size, "creating ring file");
            RingAppender::create(&command.path, RingOptions::for_file_size(size)?)
        }
        Err(err) => Err(err),
    }
}

fn stat(command: &Command, stdout: &mut impl Write) -> Result<(), Error> {
    let ring = RingReader::open(&command.path)?;
    let stat = ring.stat();
    let result = if command.json {
        let json = serde_json::to_string(&stat).map_err(|err| {
            Error::new(ErrorKind::Io)
                .with_message("encoding stat json")
                .with_source(err)
        })?;
        writeln!(stdout, "{json}")
    } else {
        write!(
            stdout,
            "File: {}\nSize: {} bytes\nUsed: {} bytes\nFree: {} bytes\n",
            command.path.display(),
            stat.capacity,
            stat.used,
            stat.available
        )
    };
    result.map_err(|err| output_error(err, command))?;
    ring.close()
}

fn output_error(err: std::io::Error, command: &Command) -> Error {
    Error::new(ErrorKind::Io)
        .with_message("writing stdout")
        .with_path(&command.path)
        .with_source(err)
}
