//! `remedy report`: render the session document in one of the reporter's formats.

use anyhow::Result;
use remedy::config::Config;
use remedy::report::{ReportFormat, Reporter};

use super::load_session;

pub fn cmd_report(config: &Config, format: ReportFormat) -> Result<()> {
    let mut doc = load_session(config)?;
    doc.refresh_stats();
    let rendered = Reporter::new().render(&doc, format)?;
    println!("{rendered}");
    Ok(())
}
