use std::io::Write;

use owo_colors::OwoColorize;
use readalong_core::{
    Chunk, DetectionReport, DocumentIndex, Narration, ProgressSnapshot, Strategy, Word,
};

/// Whether to use colored output.
#[derive(Debug, Clone, Copy)]
pub struct ColorMode(pub bool);

impl ColorMode {
    pub fn enabled(&self) -> bool {
        self.0
    }
}

/// Shorten text for one-line display.
fn preview(text: &str, max: usize) -> String {
    if text.chars().count() > max {
        let cut: String = text.chars().take(max).collect();
        format!("{}...", cut)
    } else {
        text.to_string()
    }
}

fn strategy_label(strategy: Option<Strategy>) -> &'static str {
    strategy.map_or("failed", |s| s.name())
}

/// Print the extraction and detection summary for one document.
pub fn print_index_summary(
    w: &mut dyn Write,
    name: &str,
    index: &DocumentIndex,
    report: &DetectionReport,
    color: ColorMode,
) -> std::io::Result<()> {
    let summary = index.extraction_summary();
    if color.enabled() {
        writeln!(w, "{} {}", "Indexed".bold().green(), name.bold())?;
    } else {
        writeln!(w, "Indexed {}", name)?;
    }
    writeln!(
        w,
        "Pages: {} ({} layout, {} text-stream)",
        summary.pages, summary.layout_pages, summary.text_stream_pages
    )?;
    writeln!(
        w,
        "Words: {} ({} filtered, {} characters)",
        index.total_word_count(),
        index.filtered_count(),
        index.character_count()
    )?;

    if !summary.failed_pages.is_empty() {
        let msg = format!("Failed pages: {}", join_numbers(&summary.failed_pages));
        if color.enabled() {
            writeln!(w, "{}", msg.red())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }
    if !summary.image_only_pages.is_empty() {
        let msg = format!(
            "Image-only pages (no text layer): {}",
            join_numbers(&summary.image_only_pages)
        );
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }

    if !summary.empty_pages.is_empty() {
        let msg = format!("Pages without text: {}", join_numbers(&summary.empty_pages));
        if color.enabled() {
            writeln!(w, "{}", msg.yellow())?;
        } else {
            writeln!(w, "{}", msg)?;
        }
    }

    writeln!(w)?;
    for page in index.pages() {
        let line = format!(
            "  page {:>4}  {:<11} {:>5} words",
            page.number,
            strategy_label(page.strategy),
            page.word_count()
        );
        match (&page.failure, color.enabled()) {
            (Some(reason), true) => writeln!(w, "{}  {}", line, reason.red())?,
            (Some(reason), false) => writeln!(w, "{}  {}", line, reason)?,
            (None, _) => writeln!(w, "{}", line)?,
        }
    }

    writeln!(w)?;
    print_patterns(w, report, color)
}

/// Print the boilerplate patterns found by detection.
pub fn print_patterns(
    w: &mut dyn Write,
    report: &DetectionReport,
    color: ColorMode,
) -> std::io::Result<()> {
    if report.candidates.is_empty() {
        writeln!(w, "No repeating headers or footers found.")?;
        return Ok(());
    }
    writeln!(
        w,
        "Patterns ({} words flagged, {} pages needed to repeat):",
        report.words_flagged, report.required_pages
    )?;
    for candidate in &report.candidates {
        let zone = format!("{:<13}", candidate.zone.name());
        let pages = candidate.page_occurrences.len();
        if color.enabled() {
            writeln!(
                w,
                "  {} \"{}\" {}",
                zone.cyan(),
                candidate.text_signature,
                format!("({} pages)", pages).dimmed()
            )?;
        } else {
            writeln!(
                w,
                "  {} \"{}\" ({} pages)",
                zone, candidate.text_signature, pages
            )?;
        }
    }
    Ok(())
}

fn join_numbers(numbers: &[usize]) -> String {
    numbers
        .iter()
        .map(|n| n.to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

/// Print one word per line with its position and filter state.
pub fn print_word(w: &mut dyn Write, word: &Word, color: ColorMode) -> std::io::Result<()> {
    let position = format!("{:>7}  p{:<4}", word.global_index, word.page);
    match (word.filter_reason, color.enabled()) {
        (Some(zone), true) => writeln!(
            w,
            "{} {} {}",
            position,
            word.text.dimmed(),
            format!("[{}]", zone.name()).yellow()
        ),
        (Some(zone), false) => writeln!(w, "{} {} [{}]", position, word.text, zone.name()),
        (None, _) => writeln!(w, "{} {}", position, word.text),
    }
}

/// Print one planned chunk.
pub fn print_chunk(
    w: &mut dyn Write,
    number: usize,
    chunk: &Chunk,
    color: ColorMode,
) -> std::io::Result<()> {
    let header = format!(
        "[{}] {}..{} ({} words",
        number, chunk.start_index, chunk.end_index, chunk.spoken_words
    );
    let skipped = if chunk.filtered_skipped > 0 {
        format!(", {} skipped)", chunk.filtered_skipped)
    } else {
        ")".to_string()
    };
    if color.enabled() {
        writeln!(w, "{}{}", header.bold().yellow(), skipped.bold().yellow())?;
        writeln!(w, "  {}", preview(&chunk.text, 160).dimmed())?;
    } else {
        writeln!(w, "{}{}", header, skipped)?;
        writeln!(w, "  {}", preview(&chunk.text, 160))?;
    }
    Ok(())
}

/// Print a delivered chunk during a simulated reading session.
pub fn print_narration(
    w: &mut dyn Write,
    narration: &Narration,
    color: ColorMode,
) -> std::io::Result<()> {
    let progress = &narration.progress;
    let page = progress
        .page
        .map_or_else(|| "-".to_string(), |p| p.to_string());
    let status = format!(
        "[{}/{}] page {} ({:.1}s)",
        progress.global_index, progress.total_words, page, narration.audio.duration_seconds
    );
    if color.enabled() {
        writeln!(w, "{} {}", status.green(), preview(&narration.chunk.text, 100))
    } else {
        writeln!(w, "{} {}", status, preview(&narration.chunk.text, 100))
    }
}

/// Print where a session stopped.
pub fn print_session_end(
    w: &mut dyn Write,
    user: &str,
    progress: &ProgressSnapshot,
    color: ColorMode,
) -> std::io::Result<()> {
    let percent = if progress.total_words > 0 {
        progress.global_index as f64 * 100.0 / progress.total_words as f64
    } else {
        0.0
    };
    let msg = format!(
        "Saved progress for {} on {}: word {} of {} ({:.0}%)",
        user, progress.document_id, progress.global_index, progress.total_words, percent
    );
    writeln!(w)?;
    if color.enabled() {
        writeln!(w, "{}", msg.bold())
    } else {
        writeln!(w, "{}", msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn preview_truncates_on_char_boundaries() {
        assert_eq!(preview("short", 10), "short");
        assert_eq!(preview("caf\u{e9} au lait", 4), "caf\u{e9}...");
    }

    #[test]
    fn session_end_reports_percentage() {
        let progress = ProgressSnapshot {
            document_id: "tale".into(),
            global_index: 25,
            page: Some(2),
            total_words: 100,
        };
        let mut out = Vec::new();
        print_session_end(&mut out, "ana", &progress, ColorMode(false)).unwrap();
        let text = String::from_utf8(out).unwrap();
        assert!(text.contains("word 25 of 100 (25%)"));
    }

    #[test]
    fn empty_report_says_so() {
        let mut out = Vec::new();
        print_patterns(&mut out, &DetectionReport::default(), ColorMode(false)).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "No repeating headers or footers found.\n"
        );
    }
}
