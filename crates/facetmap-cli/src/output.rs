use std::cell::RefCell;
use std::io::Write;
use std::path::Path;

use facetmap_core::{Aggregate, AggregateEvent, PaperStatus, SectionsKept};
use facetmap_ingest::SplitReport;
use facetmap_reduce::PlotOutcome;
use owo_colors::OwoColorize;

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

pub fn sections_kept_line(sections: &SectionsKept) -> String {
    format!(
        "Kept {}/{} sections ({} tokens)",
        sections.kept, sections.total, sections.tokens
    )
}

fn folder_name(folder: &Path) -> String {
    folder
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| folder.display().to_string())
}

/// Print one aggregation progress event. `total` is the number of papers.
pub fn print_progress(
    w: &mut dyn Write,
    event: &AggregateEvent,
    total: usize,
    color: ColorMode,
) -> std::io::Result<()> {
    match event {
        AggregateEvent::PaperStarted { paper_id, folder } => {
            writeln!(
                w,
                "[{}/{}] Paper{} ({})",
                paper_id,
                total,
                paper_id,
                folder_name(folder)
            )?;
        }
        AggregateEvent::SectionsSelected { sections, .. } => {
            if color.enabled() {
                writeln!(w, "      {}", sections_kept_line(sections).dimmed())?;
            } else {
                writeln!(w, "      {}", sections_kept_line(sections))?;
            }
        }
        AggregateEvent::PaperFinished(report) => match &report.status {
            PaperStatus::Succeeded { rows, sections } => {
                let source = if sections.is_some() { "embedded" } else { "cached" };
                if color.enabled() {
                    writeln!(w, "      -> {} ({} facets, {})", "OK".green(), rows, source)?;
                } else {
                    writeln!(w, "      -> OK ({} facets, {})", rows, source)?;
                }
            }
            PaperStatus::Failed { reason } => {
                if color.enabled() {
                    writeln!(w, "      -> {} {}", "FAILED".red(), reason)?;
                } else {
                    writeln!(w, "      -> FAILED {}", reason)?;
                }
            }
        },
    }
    Ok(())
}

/// Prints aggregation events as they arrive. Write failures do not interrupt
/// the run; the first one is returned by [`ProgressWriter::finish`].
pub struct ProgressWriter<W: Write> {
    out: RefCell<W>,
    total: usize,
    color: ColorMode,
    error: RefCell<Option<std::io::Error>>,
}

impl<W: Write> ProgressWriter<W> {
    pub fn new(out: W, total: usize, color: ColorMode) -> Self {
        Self {
            out: RefCell::new(out),
            total,
            color,
            error: RefCell::new(None),
        }
    }

    pub fn on_event(&self, event: &AggregateEvent) {
        let mut out = self.out.borrow_mut();
        let written = print_progress(&mut *out, event, self.total, self.color)
            .and_then(|()| out.flush());
        if let Err(e) = written {
            self.error.borrow_mut().get_or_insert(e);
        }
    }

    pub fn finish(self) -> std::io::Result<()> {
        match self.error.into_inner() {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Print the per-paper outcome table and the aggregate shape.
pub fn print_aggregate_summary(
    w: &mut dyn Write,
    aggregate: &Aggregate,
    color: ColorMode,
) -> std::io::Result<()> {
    let succeeded = aggregate.succeeded().count();
    let failed = aggregate.failed().count();

    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", "Summary".bold())?;
    } else {
        writeln!(w, "Summary")?;
    }
    for report in &aggregate.papers {
        let name = folder_name(&report.folder);
        match &report.status {
            PaperStatus::Succeeded { sections, .. } => {
                let detail = sections
                    .as_ref()
                    .map(sections_kept_line)
                    .unwrap_or_else(|| "from cache".to_string());
                if color.enabled() {
                    writeln!(w, "  {:<8} {} {} ({})", report.label, "ok".green(), name, detail)?;
                } else {
                    writeln!(w, "  {:<8} ok {} ({})", report.label, name, detail)?;
                }
            }
            PaperStatus::Failed { reason } => {
                if color.enabled() {
                    writeln!(w, "  {:<8} {} {}: {}", report.label, "failed".red(), name, reason)?;
                } else {
                    writeln!(w, "  {:<8} failed {}: {}", report.label, name, reason)?;
                }
            }
        }
    }

    let line = format!(
        "{} papers: {} succeeded, {} failed; matrix {} x {}",
        aggregate.papers.len(),
        succeeded,
        failed,
        aggregate.matrix.nrows(),
        aggregate.dimension()
    );
    if color.enabled() && failed > 0 {
        writeln!(w, "{}", line.yellow())?;
    } else {
        writeln!(w, "{}", line)?;
    }
    Ok(())
}

/// Print where each plot went, or why it was not produced.
pub fn print_plot_outcomes(
    w: &mut dyn Write,
    outcomes: &[PlotOutcome],
    color: ColorMode,
) -> std::io::Result<()> {
    for outcome in outcomes {
        match &outcome.result {
            Ok(path) => {
                if color.enabled() {
                    writeln!(w, "{:<6} {} {}", outcome.method.name(), "->".green(), path.display())?;
                } else {
                    writeln!(w, "{:<6} -> {}", outcome.method.name(), path.display())?;
                }
            }
            Err(e) => {
                if color.enabled() {
                    writeln!(w, "{:<6} {} {}", outcome.method.name(), "FAILED".red(), e)?;
                } else {
                    writeln!(w, "{:<6} FAILED {}", outcome.method.name(), e)?;
                }
            }
        }
    }
    Ok(())
}

pub fn print_split_result(
    w: &mut dyn Write,
    pdf: &Path,
    result: &Result<SplitReport, facetmap_ingest::IngestError>,
    color: ColorMode,
) -> std::io::Result<()> {
    match result {
        Ok(report) => {
            let line = format!(
                "Wrote {} sections for {} to {}",
                report.sections,
                report.paper,
                report.sections_dir.display()
            );
            if color.enabled() {
                writeln!(w, "{}", line.green())?;
            } else {
                writeln!(w, "{}", line)?;
            }
        }
        Err(e) => {
            if color.enabled() {
                writeln!(w, "{} {}: {}", "FAILED".red(), pdf.display(), e)?;
            } else {
                writeln!(w, "FAILED {}: {}", pdf.display(), e)?;
            }
        }
    }
    Ok(())
}
