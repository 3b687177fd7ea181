//! Reset command: deletes the whole timeline.

use std::io::Write;

use anyhow::{Result, bail};

use super::Context;

pub fn run<W: Write>(writer: &mut W, context: &Context, yes: bool) -> Result<()> {
    if !yes {
        bail!("refusing to delete the timeline without --yes");
    }
    context.store.reset()?;
    tracing::info!("timeline reset");
    writeln!(writer, "Deleted all timeline events.")?;
    Ok(())
}
