//! Output formatting for CLI

use obscura::pipeline::Checkpoint;

/// Render a checkpoint for `obscura status`
pub fn format_checkpoint(checkpoint: &Checkpoint) -> String {
    let mut output = String::new();
    output.push_str("Pipeline Status\n");
    output.push_str("===============\n\n");
    output.push_str(&format!("Run ID:   {}\n", checkpoint.run_id));
    if let Some(name) = &checkpoint.name {
        output.push_str(&format!("Name:     {name}\n"));
    }
    output.push_str(&format!("Source:   {}\n", checkpoint.source));
    output.push_str(&format!("Status:   {}\n", checkpoint.status));
    output.push_str(&format!(
        "Started:  {}\n",
        checkpoint.started_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));
    output.push_str(&format!(
        "Updated:  {}\n",
        checkpoint.updated_at.format("%Y-%m-%d %H:%M:%S UTC")
    ));

    output.push_str("\nCompleted Stages:\n");
    for stage in &checkpoint.completed_stages {
        match checkpoint.get_stage_output(*stage) {
            Some(out) => {
                output.push_str(&format!(
                    "  - {}: {} items, {} failed ({}ms)",
                    stage.name(),
                    out.items,
                    out.failures,
                    out.duration_ms
                ));
                if let Some(table) = &out.table {
                    output.push_str(&format!(" -> {table}"));
                }
                output.push('\n');
            }
            None => output.push_str(&format!("  - {}: completed\n", stage.name())),
        }
    }

    if let Some(stage) = &checkpoint.current_stage {
        output.push_str(&format!("\nCurrent Stage: {}\n", stage.name()));
    }
    if let Some(stage) = &checkpoint.failed_stage {
        output.push_str(&format!("\nStopped At: {}\n", stage.name()));
    }
    if let Some(error) = &checkpoint.error {
        output.push_str(&format!("\nError: {error}\n"));
    }
    output
}
