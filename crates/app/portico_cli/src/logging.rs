use std::io::Write;

use flexi_logger::{DeferredNow, Logger, Record};

use crate::Error;

/// Log to stderr so command output on stdout stays machine-readable.
/// `RUST_LOG` overrides the level.
pub fn init(verbose: bool) -> Result<(), Error> {
    let level = if verbose { "debug" } else { "warn" };
    Logger::try_with_env_or_str(level)?
        .format(cli_format)
        .log_to_stderr()
        .start()?;

    Ok(())
}

fn cli_format(w: &mut dyn Write, _now: &mut DeferredNow, record: &Record) -> std::io::Result<()> {
    write!(w, "[{}] {}", record.level(), record.args())
}
