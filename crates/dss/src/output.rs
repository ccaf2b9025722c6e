//! Rendering of command results and failures for the terminal.

use error_stack::Context;
use error_stack::FrameKind;
use error_stack::Report;
use tracing::debug;
use tracing::error;
use tracing::info;

use crate::workflow::NotebookSummary;
use crate::workflow::PodLogs;
use crate::workflow::StatusReport;
use crate::workflow::WorkflowError;

/// Cells longer than this are cut unless `--wide` is given.
pub const MAX_CELL_WIDTH: usize = 35;

const ELLIPSIS: &str = "...";

/// Cuts `value` to `width` characters, marking the cut with an ellipsis.
pub fn truncate(value: &str, width: usize) -> String {
    if value.chars().count() <= width {
        return value.to_string();
    }
    let kept: String = value
        .chars()
        .take(width.saturating_sub(ELLIPSIS.len()))
        .collect();
    format!("{kept}{ELLIPSIS}")
}

/// Grid table of notebooks, one row each.
pub fn notebook_table(notebooks: &[NotebookSummary], wide: bool) -> String {
    let headers = ["Name", "Image", "State", "URL"];
    let rows: Vec<[String; 4]> = notebooks
        .iter()
        .map(|notebook| {
            let cells = [
                notebook.name.clone(),
                notebook.image.clone(),
                notebook.state.to_string(),
                notebook.url.clone().unwrap_or_else(|| "-".to_string()),
            ];
            if wide {
                cells
            } else {
                cells.map(|cell| truncate(&cell, MAX_CELL_WIDTH))
            }
        })
        .collect();

    let mut widths = headers.map(str::len);
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let border = |fill: char| {
        let mut line = String::from("+");
        for width in widths {
            line.extend(std::iter::repeat(fill).take(width + 2));
            line.push('+');
        }
        line
    };
    let row_line = |cells: &[String]| {
        let mut line = String::from("|");
        for (cell, width) in cells.iter().zip(widths) {
            let padding = width - cell.chars().count();
            line.push_str(&format!(" {cell}{} |", " ".repeat(padding)));
        }
        line
    };

    let mut lines = vec![
        border('-'),
        row_line(&headers.map(str::to_string)),
        border('='),
    ];
    for row in &rows {
        lines.push(row_line(row));
        lines.push(border('-'));
    }
    if rows.is_empty() {
        lines.push(border('-'));
    }
    lines.join("\n")
}

/// Lines printed by `dss status`.
pub fn status_lines(status: &StatusReport) -> Vec<String> {
    let mut lines = Vec::with_capacity(3);
    if status.mlflow_ready {
        lines.push("MLflow deployment: Ready".to_string());
        if let Some(url) = &status.mlflow_url {
            lines.push(format!("MLflow URL: {url}"));
        }
    } else {
        lines.push("MLflow deployment: Not ready".to_string());
    }
    lines.push(match &status.gpu {
        Some(product) => format!("GPU acceleration: Enabled ({product})"),
        None => "GPU acceleration: Disabled".to_string(),
    });
    lines
}

/// Log lines grouped under a header per pod.
pub fn log_lines(logs: &[PodLogs]) -> Vec<String> {
    logs.iter()
        .flat_map(|pod| {
            std::iter::once(format!("Logs for {}:", pod.pod)).chain(pod.lines.iter().cloned())
        })
        .collect()
}

/// Logs a failed command: the operator message at error, the hint at info
/// and the whole report at debug.
pub fn report_failure<C: Context>(command: &str, report: &Report<C>) {
    match report.downcast_ref::<WorkflowError>() {
        Some(failure) => {
            error!("Failed to {command}. {failure}.");
            if let Some(hint) = failure.hint() {
                for line in hint.lines() {
                    info!("{line}");
                }
            }
        }
        None => {
            let causes: Vec<String> = report
                .frames()
                .filter_map(|frame| match frame.kind() {
                    FrameKind::Context(context) => Some(context.to_string()),
                    FrameKind::Attachment(_) => None,
                })
                .collect();
            error!("Failed to {command}. {}.", causes.join(": "));
        }
    }
    debug!("{command} failed: {report:?}");
}
