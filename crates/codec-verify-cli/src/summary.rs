//! Console summary of a finished run.

use codec_verify::BatchReport;
use codec_verify::report::TrialOutcome;

pub fn print(report: &BatchReport) {
    let agg = &report.aggregate;

    println!(
        "codec-verify -- {} ({} files, {} skipped, {} trials, {} failed, {:.1}s)\n",
        report.name,
        agg.files,
        report.skipped.len(),
        report.trials.len(),
        report.failure_count(),
        agg.elapsed.as_secs_f64()
    );

    println!(
        "  {:>6} {:>7} {:>14} {:>8} {:>8} {:>10} {:>10}",
        "near", "trials", "artifact B", "bpp", "ratio", "enc MP/s", "dec MP/s"
    );
    println!("  {}", "-".repeat(69));

    for t in &agg.per_tolerance {
        println!(
            "  {:>6} {:>7} {:>14} {:>8} {:>8} {:>10} {:>10}",
            t.near,
            t.trials,
            t.artifact_bytes,
            fmt_opt(t.bits_per_pixel, 4),
            fmt_opt(t.compression_ratio, 3),
            fmt_opt(t.encode_mpx_per_sec, 2),
            fmt_opt(t.decode_mpx_per_sec, 2),
        );
    }

    let failures: Vec<_> = report.failures().collect();
    if !failures.is_empty() {
        println!("\nFailures:");
        for t in failures.iter().take(20) {
            if let TrialOutcome::Failed { message, .. } = &t.outcome {
                println!("  *** {} near={}: {}", t.file, t.near, message);
            }
        }
        if failures.len() > 20 {
            println!("  ... and {} more", failures.len() - 20);
        }
    }
}

fn fmt_opt(value: Option<f64>, precision: usize) -> String {
    value.map_or_else(|| "-".to_string(), |v| format!("{v:.precision$}"))
}
