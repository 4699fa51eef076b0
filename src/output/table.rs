use comfy_table::presets::UTF8_FULL;
use comfy_table::{Cell, Color, ContentArrangement, Row, Table};

use crate::layers::{GoldRow, PartitionKey};
use crate::pipeline::PipelineRun;

pub fn render_gold_table(rows: &[GoldRow]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Base", "Currency", "Rate", "Daily Change", "Provider Update"]);

    for r in rows {
        let change = format!("{:+.3}%", r.daily_change_pct);
        let change_cell = if r.daily_change_pct > 0.0 {
            Cell::new(change).fg(Color::Green)
        } else if r.daily_change_pct < 0.0 {
            Cell::new(change).fg(Color::Red)
        } else {
            Cell::new(change)
        };
        table.add_row(Row::from(vec![
            Cell::new(&r.base_currency),
            Cell::new(&r.currency),
            Cell::new(format!("{:.6}", r.rate)),
            change_cell,
            Cell::new(r.timestamp.format("%Y-%m-%d %H:%M UTC").to_string()),
        ]));
    }
    table.to_string()
}

pub fn render_run_table(run: &PipelineRun) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Stage", "Result", "Location"]);

    if let Some(fetch) = &run.fetch {
        let label = if fetch.fetched { "fetched" } else { "already present" };
        table.add_row(vec!["raw".to_string(), label.to_string(), fetch.location.clone()]);
    }
    if let Some(transform) = &run.transform {
        table.add_row(vec![
            "silver".to_string(),
            format!("{} rows", transform.rows),
            transform.location.clone(),
        ]);
    }
    if let Some(enrich) = &run.enrich {
        table.add_row(vec![
            "gold".to_string(),
            format!("{} rows, {} with prior day", enrich.rows, enrich.matched),
            enrich.location.clone(),
        ]);
    }
    match &run.summary {
        Some(summary) => {
            let label = if summary.generated { "generated" } else { "already present" };
            table.add_row(vec!["summary".to_string(), label.to_string(), summary.location.clone()]);
        }
        None => {
            table.add_row(vec!["summary".to_string(), "skipped".to_string(), "-".to_string()]);
        }
    }

    format!("{table}\nDate: {} | State: {:?}", run.date, run.state)
}

pub fn render_partitions_table(keys: &[PartitionKey]) -> String {
    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table.set_header(vec!["Layer", "Partition"]);
    for key in keys {
        table.add_row(vec![key.layer.to_string(), key.relative_path()]);
    }
    table.to_string()
}
