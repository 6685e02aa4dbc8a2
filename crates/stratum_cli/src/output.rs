//! Human and JSON rendering of command results.

use anyhow::Result;
use serde::Serialize;

use stratum_iac::{OperationResult, PlanAnalysis, RollbackOutcome};

/// Print any serializable value as pretty JSON on stdout.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Print the outcome of one operation.
pub fn print_operation(result: &OperationResult, json: bool) -> Result<()> {
    if json {
        return print_json(result);
    }

    if result.success {
        println!(
            "✅ terraform {} succeeded in {} ({} attempt{})",
            result.operation,
            format_millis(result.duration_ms),
            result.attempts,
            plural(result.attempts)
        );
    } else {
        println!(
            "❌ terraform {} failed with exit code {} after {} attempt{}",
            result.operation,
            result.exit_code,
            result.attempts,
            plural(result.attempts)
        );
    }

    if let Some(analysis) = &result.analysis {
        print_analysis(analysis);
    }

    if let Some(backup) = &result.backup {
        println!("  💾 State backup: {}", backup.backup_path.display());
    }
    match &result.rollback {
        RollbackOutcome::Restored => println!("  ↩️  State restored from backup"),
        RollbackOutcome::NoBackup => println!("  ⚠️  No backup to restore"),
        RollbackOutcome::Failed { error } => println!("  ❌ Rollback failed: {}", error),
        RollbackOutcome::NotNeeded | RollbackOutcome::NotRequested => {}
    }

    Ok(())
}

/// Print a change summary with per-resource lines.
pub fn print_analysis(analysis: &PlanAnalysis) {
    if !analysis.summary.is_empty() {
        println!();
        println!("📋 {}", analysis.summary);
    }
    for change in &analysis.resource_changes {
        println!("  {:<8} {}", change.kind.to_string(), change.address);
    }
    for warning in &analysis.warnings {
        println!("  ⚠️  {}", warning);
    }
    for error in &analysis.errors {
        println!("  ❌ {}", error);
    }
}

fn format_millis(ms: u64) -> String {
    if ms < 1000 {
        format!("{}ms", ms)
    } else {
        format!("{:.1}s", ms as f64 / 1000.0)
    }
}

fn plural(n: u32) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_millis() {
        assert_eq!(format_millis(250), "250ms");
        assert_eq!(format_millis(1500), "1.5s");
        assert_eq!(format_millis(61_000), "61.0s");
    }

    #[test]
    fn test_plural() {
        assert_eq!(plural(1), "");
        assert_eq!(plural(3), "s");
    }
}
