//! Markdown rendering of a [`SearchResult`] for the CLI.

use crate::types::{ScoredDocument, SearchResult};

const SNIPPET_CHARS: usize = 240;

pub fn format_report(result: &SearchResult) -> String {
    let query = &result.query_echo;
    let mut output = format!("# Search: {}\n\n", heading_text(&query.normalized_text));
    if let Some(english) = &query.translated_text {
        output.push_str(&format!(
            "_{} query, searched as \"{}\"_\n\n",
            query.detected_language.name(),
            heading_text(english)
        ));
    }

    output.push_str("## Summary\n\n");
    output.push_str(result.summary_text.trim());
    output.push_str("\n\n");

    if !result.high_relevance.is_empty() {
        output.push_str("## High Relevance\n\n");
        for (i, doc) in result.high_relevance.iter().enumerate() {
            output.push_str(&format!("{}. {}\n", i + 1, source_line(doc)));
            let snippet = snippet(doc);
            if !snippet.is_empty() {
                output.push_str(&format!("   > {snippet}\n"));
            }
        }
        output.push('\n');
    }

    if !result.related.is_empty() {
        output.push_str("## Related\n\n");
        for doc in &result.related {
            output.push_str(&format!("- {}\n", source_line(doc)));
        }
        output.push('\n');
    }

    let stats = &result.stats;
    output.push_str(&format!(
        "---\n\n{} candidates, {} fetched, {} failed, {} discarded\n",
        stats.candidates, stats.fetched_ok, stats.fetch_failed, stats.discarded
    ));
    output
}

fn source_line(doc: &ScoredDocument) -> String {
    let title = doc.document.title.trim();
    let title = if title.is_empty() {
        doc.document.url.as_str()
    } else {
        title
    };
    format!(
        "[{}]({}) ({:.2})",
        escape_link_text(&heading_text(title)),
        doc.document.url,
        doc.relevance_score
    )
}

fn snippet(doc: &ScoredDocument) -> String {
    let text = heading_text(doc.document.snippet.trim());
    match text.char_indices().nth(SNIPPET_CHARS) {
        Some((end, _)) => format!("{}...", &text[..end]),
        None => text,
    }
}

/// Escapes the characters that end Markdown link text early.
fn escape_link_text(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        if matches!(c, '[' | ']' | '(' | ')') {
            out.push('\\');
        }
        out.push(c);
    }
    out
}

/// Flattens line breaks so the text stays on one Markdown line.
fn heading_text(s: &str) -> String {
    s.chars()
        .map(|c| if c == '\n' || c == '\r' { ' ' } else { c })
        .collect()
}
