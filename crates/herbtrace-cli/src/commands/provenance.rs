// crates/herbtrace-cli/src/commands/provenance.rs

use anyhow::Result;
use comfy_table::Table;

use herbtrace_core::operations::build_provenance_bundle;
use herbtrace_repository::PostgresStore;

pub async fn handle_provenance_command(store: &PostgresStore, batch_id: &str) -> Result<()> {
    let bundle = build_provenance_bundle(store, batch_id).await?;

    let mut batch_table = Table::new();
    batch_table.set_header(["field", "value"]);
    batch_table.add_row(["batch_id", &bundle.batch.batch_id]);
    batch_table.add_row(["species", &bundle.batch.species]);
    batch_table.add_row(["collector", &bundle.batch.collector_id]);
    batch_table.add_row(["date_utc", &bundle.batch.date_utc]);
    batch_table.add_row(["phase", bundle.batch.phase.as_str()]);
    batch_table.add_row(["quality_gate", bundle.batch.quality_gate.as_str()]);
    batch_table.add_row([
        "chain_status",
        bundle
            .batch
            .chain_status
            .map(|s| s.as_str())
            .unwrap_or("-"),
    ]);
    println!("{batch_table}");

    let mut events_table = Table::new();
    events_table.set_header(["event_id", "timestamp_utc", "collector", "status", "violations"]);
    for event in &bundle.events {
        events_table.add_row([
            event.event_id.to_string(),
            event.timestamp_utc.to_rfc3339(),
            event.collector_id.clone(),
            event.status.as_str().to_string(),
            event.violations.join("|"),
        ]);
    }
    println!("collection events ({})", bundle.events.len());
    println!("{events_table}");

    let mut steps_table = Table::new();
    steps_table.set_header(["step_id", "step_type", "created_at"]);
    for step in &bundle.steps {
        steps_table.add_row([
            step.step_id.to_string(),
            step.step_type.clone(),
            step.created_at.to_rfc3339(),
        ]);
    }
    println!("processing steps ({})", bundle.steps.len());
    println!("{steps_table}");

    let mut labs_table = Table::new();
    labs_table.set_header(["test_id", "moisture_pct", "pesticide", "gate"]);
    for test in &bundle.lab_tests {
        labs_table.add_row([
            test.test_id.to_string(),
            test.moisture_pct.to_string(),
            if test.pesticide_pass { "pass" } else { "fail" }.to_string(),
            test.gate.as_str().to_string(),
        ]);
    }
    println!("lab tests ({})", bundle.lab_tests.len());
    println!("{labs_table}");

    Ok(())
}
