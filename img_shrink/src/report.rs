//! Human-readable summaries for the CLI.

use crate::audit::AuditReport;
use crate::reconcile::{RunReport, RunState};
use crate::scaler::{derivative_file_name, ImgScaler};
use shared_utils::FileSize;

fn state_label(state: RunState) -> &'static str {
    match state {
        RunState::Clean => "clean (nothing changed)",
        RunState::Committed => "committed",
        RunState::DryRun => "dry run",
    }
}

pub fn print_run_summary(report: &RunReport) {
    let saved = report.bytes_saved();
    println!();
    println!("╔══════════════════════════════════════════════════════════╗");
    println!("║              📊 Upload Shrink Summary Report              ║");
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║  📁 Files Scanned:      {:>10}                       ║", report.files_scanned);
    println!("║  🗂️  Records Loaded:     {:>10}                       ║", report.records_loaded);
    println!("║  ⏭️  Records Skipped:    {:>10}                       ║", report.records_skipped);
    println!("║  🎯 Candidates:         {:>10}                       ║", report.candidates.len());
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║  🔁 Encode Attempts:    {:>10}                       ║", report.encode_attempts);
    println!("║  ✅ Files Improved:     {:>10}                       ║", report.improved.len());
    println!("║  📝 Records Updated:    {:>10}                       ║", report.records_updated);
    println!("║  💾 Bytes Saved:        {:>10}                       ║", saved.display());
    println!("╠══════════════════════════════════════════════════════════╣");
    println!("║  ⏱️  Total Time:         {:>9.2}s                       ║", report.duration.as_secs_f64());
    println!("║  🏁 State:              {:<24}         ║", state_label(report.state));
    println!("╚══════════════════════════════════════════════════════════╝");

    if report.state == RunState::DryRun && !report.candidates.is_empty() {
        println!();
        println!("Candidates:");
        for path in &report.candidates {
            println!("   {}", path);
        }
    }
    if !report.improved.is_empty() {
        println!();
        println!("Improved:");
        for file in &report.improved {
            println!(
                "   {} {} → {}",
                file.path,
                FileSize::new(file.old_size),
                FileSize::new(file.new_size)
            );
        }
    }
}

pub fn print_audit_report(report: &AuditReport) {
    println!();
    println!("╔══════════════════════════════════════════════╗");
    println!("║        🏥 Attachment Metadata Audit          ║");
    println!("╠══════════════════════════════════════════════╣");
    println!("║  ✅ Records Checked:               {:>6}    ║", report.records_checked);
    println!("║  📐 Derivatives Checked:           {:>6}    ║", report.derivatives_checked);
    println!("║  ⏭️  Rows Skipped:                  {:>6}    ║", report.rows_skipped);
    println!("║  ❌ Dimension Mismatches:          {:>6}    ║", report.mismatches.len());
    println!("║  ⚠️  Files Without Metadata:        {:>6}    ║", report.missing_metadata.len());
    println!("╚══════════════════════════════════════════════╝");

    for m in &report.mismatches {
        println!(
            "   ❌ {} [{}] stored {}x{}, expected one of {:?}",
            m.path, m.label, m.stored.0, m.stored.1, m.expected
        );
    }
    for path in &report.missing_metadata {
        println!("   ⚠️  {} has no image metadata", path);
    }
}

/// Planned sizes for a source, with the file names the CMS would give them.
pub fn print_plan(scaler: &ImgScaler, base_name: &str) {
    let plan = scaler.plan();
    println!("📐 {}x{} ({})", scaler.src_w, scaler.src_h, base_name);
    if plan.derivatives.is_empty() {
        println!("   (no scaled derivatives)");
    }
    for dims in &plan.derivatives {
        println!(
            "   {:>5} x {:<5} {}",
            dims.0,
            dims.1,
            derivative_file_name(base_name, *dims)
        );
    }
    match plan.thumbnail {
        Some(thumb) => {
            let (iw, ih) = scaler.thumbnail_intermediate();
            println!(
                "   🖼️  thumbnail {}x{} (scaled to {}x{} then cropped) {}",
                thumb.0,
                thumb.1,
                iw,
                ih,
                derivative_file_name(base_name, thumb)
            );
        }
        None => println!("   🖼️  no thumbnail"),
    }
}
