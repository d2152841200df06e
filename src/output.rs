//! Terminal output for the command line: build summaries and error lines

use crate::request::{BuildSummary, IndexFormat};
use std::io::{self, Write};
use std::path::Path;
use termcolor::{Color, ColorChoice, ColorSpec, StandardStream, WriteColor};

fn color_choice(color: bool) -> ColorChoice {
    if color { ColorChoice::Auto } else { ColorChoice::Never }
}

/// Print the outcome of a request to stdout
pub fn print_summary(
    summary: &BuildSummary,
    output: &Path,
    verbose: bool,
    color: bool,
) -> io::Result<()> {
    let mut stdout = StandardStream::stdout(color_choice(color));
    write_summary(&mut stdout, summary, output, verbose)
}

/// Write a summary to any color-capable stream
pub fn write_summary(
    out: &mut impl WriteColor,
    summary: &BuildSummary,
    output: &Path,
    verbose: bool,
) -> io::Result<()> {
    match summary {
        BuildSummary::Index(s) => {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true))?;
            write!(out, "Index complete")?;
            out.reset()?;
            writeln!(out, ", {} key(s) inserted", s.keys)?;

            if s.duplicates > 0 {
                out.set_color(ColorSpec::new().set_fg(Some(Color::Yellow)))?;
                writeln!(out, "{} duplicate key(s) skipped", s.duplicates)?;
                out.reset()?;
            }
            if verbose {
                writeln!(out, "  Output:          {}", output.display())?;
                writeln!(out, "  Records read:    {}", s.records_read)?;
                writeln!(out, "  Deleted tracked: {}", s.deleted)?;
                writeln!(out, "  Tree height:     {}", s.tree.height)?;
                writeln!(out, "  Blocks written:  {}", s.blocks)?;
                if s.spilled_runs > 0 {
                    writeln!(out, "  Sort runs:       {}", s.spilled_runs)?;
                }
            }
        }
        BuildSummary::Signature(s) => {
            out.set_color(ColorSpec::new().set_fg(Some(Color::Green)).set_bold(true))?;
            write!(out, "AIM complete")?;
            out.reset()?;
            writeln!(out, ", {} record(s) indexed", s.records_indexed)?;
            if verbose {
                writeln!(out, "  Output:          {}", output.display())?;
                writeln!(out, "  Records read:    {}", s.records_read)?;
                writeln!(out, "  Deleted:         {}", s.deleted)?;
                writeln!(out, "  Record capacity: {}", s.record_count)?;
                writeln!(out, "  Slots:           {}", s.slot_count)?;
                writeln!(out, "  Passes:          {}", s.passes)?;
            }
        }
        BuildSummary::Renamed { format, name } => {
            let kind = match format {
                IndexFormat::Isi => "Index",
                IndexFormat::Aim => "AIM",
            };
            writeln!(out, "{kind} {} now refers to {name}", output.display())?;
        }
    }
    Ok(())
}

/// Print `flatdex: <detail>` to stderr, in red when color is on
pub fn print_error(detail: &str, color: bool) {
    let mut stderr = StandardStream::stderr(color_choice(color));
    let _ = stderr.set_color(ColorSpec::new().set_fg(Some(Color::Red)).set_bold(true));
    let _ = write!(stderr, "flatdex:");
    let _ = stderr.reset();
    let _ = writeln!(stderr, " {detail}");
}
