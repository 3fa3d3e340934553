use std::io::{self, Write};

use serde::Serialize;

use crate::inspect::InspectionReport;
use crate::pipeline::RunReport;
use crate::progress::Statistics;

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_run(report: &RunReport) -> io::Result<()> {
        Self::print_json(report)
    }

    pub fn print_inspections(reports: &[InspectionReport]) -> io::Result<()> {
        Self::print_json(&reports)
    }

    pub fn print_statistics(statistics: &Statistics) -> io::Result<()> {
        Self::print_json(statistics)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl crate::pipeline::ProgressSink for JsonOutput {
    fn event(&self, event: crate::pipeline::ProgressEvent) {
        tracing::debug!(message = %event.message, "progress");
    }
}
