use std::io::{self, Write};
use std::sync::Mutex;

use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;

use crate::app::{
    AssembleResult, DownloadResult, InspectResult, ProgressEvent, ProgressSink, SetupResult,
};
use crate::driver::DriverStatus;

#[derive(Debug, Clone, Copy)]
pub enum OutputMode {
    Console,
    Json,
}

pub struct JsonOutput;

impl JsonOutput {
    pub fn print_assemble(result: &AssembleResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_setup(result: &SetupResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_driver(status: &DriverStatus) -> io::Result<()> {
        Self::print_json(status)
    }

    pub fn print_download(result: &DownloadResult) -> io::Result<()> {
        Self::print_json(result)
    }

    pub fn print_inspect(result: &InspectResult) -> io::Result<()> {
        Self::print_json(result)
    }

    fn print_json<T: Serialize>(value: &T) -> io::Result<()> {
        let json = serde_json::to_string_pretty(value).map_err(io::Error::other)?;
        let mut stdout = io::stdout();
        stdout.write_all(json.as_bytes())?;
        stdout.write_all(b"\n")?;
        Ok(())
    }
}

impl ProgressSink for JsonOutput {
    fn event(&self, _event: ProgressEvent) {}
}

#[derive(Default)]
pub struct ConsoleProgress {
    bar: Mutex<Option<(String, ProgressBar)>>,
}

impl ConsoleProgress {
    pub fn new() -> Self {
        Self::default()
    }

    fn finish_bar(&self) {
        if let Ok(mut guard) = self.bar.lock() {
            if let Some((_, bar)) = guard.take() {
                bar.finish_and_clear();
            }
        }
    }

    fn update_bar(&self, label: &str, downloaded: u64, total: Option<u64>) {
        let Ok(mut guard) = self.bar.lock() else {
            return;
        };
        let stale = guard
            .as_ref()
            .map(|(current, _)| current != label)
            .unwrap_or(true);
        if stale {
            if let Some((_, bar)) = guard.take() {
                bar.finish_and_clear();
            }
            *guard = Some((label.to_string(), new_bar(label, total)));
        }
        if let Some((_, bar)) = guard.as_ref() {
            bar.set_position(downloaded);
        }
    }
}

impl ProgressSink for ConsoleProgress {
    fn event(&self, event: ProgressEvent) {
        if let Some(transfer) = event.transfer {
            self.update_bar(&event.message, transfer.downloaded, transfer.total);
            return;
        }
        self.finish_bar();
        let message = event
            .message
            .split_once("; ")
            .map(|(_, payload)| payload)
            .unwrap_or(&event.message);
        match event.elapsed {
            Some(elapsed) => eprintln!("{message} ({:.1}s)", elapsed.as_secs_f64()),
            None => eprintln!("{message}"),
        }
    }
}

fn new_bar(label: &str, total: Option<u64>) -> ProgressBar {
    let bar = match total {
        Some(len) => {
            let bar = ProgressBar::new(len);
            if let Ok(style) = ProgressStyle::default_bar().template(
                "{spinner:.green} [{elapsed_precise}] [{wide_bar:.cyan/blue}] {bytes}/{total_bytes} ({eta})",
            ) {
                bar.set_style(style.progress_chars("#>-"));
            }
            bar
        }
        None => {
            let bar = ProgressBar::new_spinner();
            if let Ok(style) = ProgressStyle::default_spinner()
                .template("{spinner:.green} [{elapsed_precise}] {bytes} {msg}")
            {
                bar.set_style(style);
            }
            bar
        }
    };
    bar.set_message(label.to_string());
    bar
}

pub fn print_assemble_summary(result: &AssembleResult) {
    match result.action {
        crate::app::AssembleAction::AlreadyPresent => {
            println!("Asset store already present at {}", result.store_path);
        }
        crate::app::AssembleAction::Created => {
            println!("Wrote asset store {}", result.store_path);
            for table in &result.tables {
                println!("  {:<20} {:>10} rows  index={:?}", table.key, table.rows, table.index);
            }
        }
    }
}
