use std::fmt::Write as _;
use std::io::IsTerminal;

use chrono::Local;

use crate::cli::OutputFormat;
use crate::event::{ChangeEvent, ChangeKind};
use crate::query::{ChangeDetails, Page, QueryResult};

fn local_time(event: &ChangeEvent) -> String {
    event
        .timestamp
        .with_timezone(&Local)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

fn to_json<T: serde::Serialize>(value: &T) -> String {
    serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("{{\"error\": \"serialization failed: {e}\"}}"))
}

/// Render one page of query results plus the aggregate summary.
pub fn format_query_result(result: &QueryResult, page: Page, format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(result),
        OutputFormat::Compact => {
            let mut out = String::new();
            for e in &result.items {
                let _ = writeln!(
                    out,
                    "{} {} {} {} {}",
                    e.timestamp.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
                    e.kind(),
                    e.path,
                    e.user,
                    e.id
                );
            }
            let _ = writeln!(out, "{}", summary_line(result, page));
            out
        }
        OutputFormat::Table => {
            let mut out = event_table(&result.items);
            let _ = writeln!(out, "{}", summary_line(result, page));
            if !result.author_counts.is_empty() {
                let authors: Vec<String> = result
                    .author_counts
                    .iter()
                    .map(|(user, n)| format!("{user}={n}"))
                    .collect();
                let _ = writeln!(out, "authors: {}", authors.join(" "));
            }
            out
        }
    }
}

fn summary_line(result: &QueryResult, page: Page) -> String {
    let pages = if page.size == 0 {
        0
    } else {
        result.total_count.div_ceil(page.size)
    };
    let kinds: Vec<String> = ChangeKind::ALL
        .iter()
        .map(|k| format!("{}={}", k, result.type_counts.get(*k)))
        .collect();
    format!(
        "{} changes (page {}/{}) {}",
        result.total_count,
        page.number,
        pages,
        kinds.join(" ")
    )
}

/// Render a full export, oldest first.
pub fn format_events(events: &[ChangeEvent], format: &OutputFormat) -> String {
    match format {
        OutputFormat::Json => to_json(&events),
        OutputFormat::Compact => {
            let mut out = String::new();
            for e in events {
                match serde_json::to_string(e) {
                    Ok(line) => {
                        let _ = writeln!(out, "{line}");
                    }
                    Err(err) => tracing::warn!(id = %e.id, error = %err, "event not exported"),
                }
            }
            out
        }
        OutputFormat::Table => {
            let mut out = event_table(events);
            let _ = writeln!(out, "{} changes", events.len());
            out
        }
    }
}

/// Human-readable columnar table with optional ANSI color when stdout is a terminal.
fn event_table(events: &[ChangeEvent]) -> String {
    let use_color = std::io::stdout().is_terminal();
    let path_w = events.iter().map(|e| e.path.len()).max().unwrap_or(4).max(4);
    let user_w = events.iter().map(|e| e.user.len()).max().unwrap_or(4).max(4);

    let mut out = String::new();
    let header = format!(
        "{:<19}  {:<8}  {:<path_w$}  {:<user_w$}  {}",
        "TIME", "TYPE", "PATH", "USER", "ID",
    );
    if use_color {
        let _ = writeln!(out, "\x1b[1m{header}\x1b[0m");
    } else {
        let _ = writeln!(out, "{header}");
    }
    let _ = writeln!(out, "{}", "-".repeat(header.len()));

    for e in events {
        let kind = format!("{:<8}", e.kind().as_str());
        let kind = if use_color {
            let code = match e.kind() {
                ChangeKind::Created => "32",
                ChangeKind::Modified => "33",
                ChangeKind::Deleted => "31",
            };
            format!("\x1b[{code}m{kind}\x1b[0m")
        } else {
            kind
        };
        let _ = writeln!(
            out,
            "{:<19}  {}  {:<path_w$}  {:<user_w$}  {}",
            local_time(e),
            kind,
            e.path,
            e.user,
            e.id,
        );
    }
    out
}

/// Render what one event changed: a unified diff for modifications, the
/// captured content otherwise.
pub fn format_details(event: &ChangeEvent, details: &ChangeDetails, format: &OutputFormat) -> String {
    if let OutputFormat::Json = format {
        return to_json(details);
    }

    let mut out = String::new();
    let _ = writeln!(
        out,
        "{} {} by {} at {}",
        details.kind,
        event.path,
        event.user,
        local_time(event)
    );
    match &details.patch {
        Some(patch) if patch.hunks.is_empty() => {
            let _ = writeln!(out, "(content unchanged)");
        }
        Some(patch) => {
            let _ = writeln!(out, "--- {}", patch.old_file_name);
            let _ = writeln!(out, "+++ {}", patch.new_file_name);
            for hunk in &patch.hunks {
                let _ = writeln!(out, "{}", hunk.header);
                for line in &hunk.lines {
                    let _ = writeln!(out, "{line}");
                }
            }
        }
        None if details.content.is_empty() => {
            let _ = writeln!(out, "(no content captured)");
        }
        None => {
            out.push_str(&details.content);
            if !details.content.ends_with('\n') {
                out.push('\n');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::event::{Change, now};
    use crate::query::TypeCounts;
    use crate::query::diff::{CONTEXT_LINES, structured_patch};

    fn sample() -> ChangeEvent {
        ChangeEvent {
            id: "evt-1-abc".into(),
            change: Change::Modified {
                snapshot_id: Some("evt-1-abc".into()),
                previous_snapshot_id: Some("evt-0-abc".into()),
            },
            path: "src/lib.rs".into(),
            timestamp: now(),
            user: "alice".into(),
            project_path: PathBuf::from("/proj"),
        }
    }

    #[test]
    fn test_compact_query_lists_items_and_summary() {
        let result = QueryResult {
            items: vec![sample()],
            total_count: 3,
            type_counts: TypeCounts {
                created: 1,
                modified: 2,
                deleted: 0,
            },
            author_counts: BTreeMap::from([("alice".to_string(), 3)]),
        };
        let out = format_query_result(&result, Page { number: 1, size: 2 }, &OutputFormat::Compact);
        let lines: Vec<&str> = out.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("MODIFIED src/lib.rs alice evt-1-abc"));
        assert_eq!(lines[1], "3 changes (page 1/2) CREATED=1 MODIFIED=2 DELETED=0");
    }

    #[test]
    fn test_compact_export_is_json_lines() {
        let out = format_events(&[sample(), sample()], &OutputFormat::Compact);
        for line in out.lines() {
            let parsed: ChangeEvent = serde_json::from_str(line).unwrap();
            assert_eq!(parsed.path, "src/lib.rs");
        }
        assert_eq!(out.lines().count(), 2);
    }

    #[test]
    fn test_details_render_unified_diff() {
        let details = ChangeDetails {
            kind: ChangeKind::Modified,
            content: "a\nc\n".into(),
            patch: Some(structured_patch("a/src/lib.rs", "b/src/lib.rs", "a\nb\n", "a\nc\n", CONTEXT_LINES)),
        };
        let out = format_details(&sample(), &details, &OutputFormat::Compact);
        assert!(out.contains("--- a/src/lib.rs\n+++ b/src/lib.rs\n@@ -1,2 +1,2 @@\n a\n-b\n+c\n"));
    }

    #[test]
    fn test_details_json_has_type_field() {
        let details = ChangeDetails {
            kind: ChangeKind::Created,
            content: "x".into(),
            patch: None,
        };
        let out = format_details(&sample(), &details, &OutputFormat::Json);
        let value: serde_json::Value = serde_json::from_str(&out).unwrap();
        assert_eq!(value["type"], "CREATED");
        assert!(value.get("patch").is_none());
    }
}
