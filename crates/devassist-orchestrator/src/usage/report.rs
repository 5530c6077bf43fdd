//! Human-readable rendering of usage rollups.

use std::collections::BTreeMap;
use std::fmt::{Display, Error as FmtError, Write as _};

use super::record::{RealtimeSnapshot, UsageSummary, UsageTotals};

/// Usage report formatter
pub struct UsageReport;

impl UsageReport {
    /// Formats a range summary as a human-readable string
    ///
    /// # Errors
    /// Returns an error if formatting fails
    pub fn format_summary(summary: &UsageSummary) -> Result<String, FmtError> {
        let mut output = String::new();

        writeln!(output, "Usage {} .. {}", summary.start, summary.end)?;
        Self::write_totals(&mut output, &summary.totals)?;

        writeln!(output, "\nBy Provider:")?;
        Self::write_breakdown(&mut output, &summary.by_provider)?;

        writeln!(output, "\nBy Model:")?;
        Self::write_breakdown(&mut output, &summary.by_model)?;

        writeln!(output, "\nDaily:")?;
        for day in &summary.daily {
            writeln!(
                output,
                "  {}: {} requests, {} tokens - ${:.4}",
                day.date,
                day.totals.requests,
                day.totals.total_tokens(),
                day.totals.cost_usd
            )?;
        }

        Ok(output)
    }

    /// Formats today's snapshot as a human-readable string
    ///
    /// # Errors
    /// Returns an error if formatting fails
    pub fn format_snapshot(snapshot: &RealtimeSnapshot) -> Result<String, FmtError> {
        let mut output = String::new();

        writeln!(output, "Today ({})", snapshot.date)?;
        Self::write_totals(&mut output, &snapshot.totals)?;

        writeln!(output, "\nBy Provider:")?;
        Self::write_breakdown(&mut output, &snapshot.by_provider)?;

        Ok(output)
    }

    fn write_totals(output: &mut String, totals: &UsageTotals) -> Result<(), FmtError> {
        writeln!(output, "Total Requests: {}", totals.requests)?;
        writeln!(output, "Failed Requests: {}", totals.failed())?;
        writeln!(output, "Success Rate: {:.1}%", totals.success_rate() * 100.0)?;
        writeln!(output, "Average Latency: {}ms", totals.avg_latency_ms())?;
        writeln!(
            output,
            "Tokens: {} in / {} out",
            totals.input_tokens, totals.output_tokens
        )?;
        writeln!(output, "Total Cost: ${:.4}", totals.cost_usd)
    }

    fn write_breakdown<K: Display>(
        output: &mut String,
        breakdown: &BTreeMap<K, UsageTotals>,
    ) -> Result<(), FmtError> {
        if breakdown.is_empty() {
            return writeln!(output, "  (none)");
        }
        for (name, totals) in breakdown {
            writeln!(
                output,
                "  {name}: {} requests ({} failed) - ${:.4}",
                totals.requests,
                totals.failed(),
                totals.cost_usd
            )?;
        }
        Ok(())
    }
}
