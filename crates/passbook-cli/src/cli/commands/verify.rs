use std::io::Cursor;

use anyhow::Context;
use passbook_core::verify_archive;

use crate::cli::args::VerifyArgs;
use crate::exit_codes::{SUCCESS, VERIFY_FAILED};

pub async fn run(args: VerifyArgs) -> anyhow::Result<i32> {
    let bytes = tokio::fs::read(&args.archive)
        .await
        .with_context(|| format!("failed to read {}", args.archive.display()))?;
    let report = verify_archive(Cursor::new(bytes))?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        for m in &report.mismatches {
            println!(
                "MISMATCH {}: manifest {} actual {}",
                m.entry, m.expected, m.actual
            );
        }
        for name in &report.unlisted {
            println!("UNLISTED {name}");
        }
        for name in &report.missing {
            println!("MISSING {name}");
        }
        if report.signature_bytes == 0 {
            println!("EMPTY signature");
        }
        let verdict = if report.is_ok() { "OK" } else { "FAILED" };
        println!(
            "{verdict}: {} ({} entries, {} digests)",
            args.archive.display(),
            report.entries.len(),
            report.manifest.len()
        );
    }

    Ok(if report.is_ok() { SUCCESS } else { VERIFY_FAILED })
}
