use std::path::Path;

use xlsx_slim::{ProgressSink, Settings, SettingsStore};

/// Progress on stderr so stdout stays clean for the final report.
pub struct TermSink {
    quiet: bool,
    store: Option<SettingsStore>,
    /// What is on disk; `reveal` only adds the log path to it.
    settings: Settings,
}

impl TermSink {
    pub fn new(quiet: bool, store: Option<SettingsStore>, settings: Settings) -> Self {
        Self {
            quiet,
            store,
            settings,
        }
    }
}

impl ProgressSink for TermSink {
    fn log(&mut self, message: &str) {
        if !self.quiet {
            eprintln!("{message}");
        }
    }

    fn set_status(&mut self, label: &str, percent: Option<f32>) {
        if self.quiet {
            return;
        }
        match percent {
            Some(percent) => eprintln!("[{percent:>5.1}%] {label}"),
            None => eprintln!("[  --  ] {label}"),
        }
    }

    fn show_error(&mut self, title: &str, message: &str) {
        eprintln!("{title}: {message}");
    }

    fn on_finished(&mut self, final_path: &Path) {
        if !self.quiet {
            eprintln!("Finished: {}", final_path.display());
        }
    }

    fn reveal(&mut self, path: &Path) {
        eprintln!("Log: {}", path.display());
        let Some(store) = &self.store else {
            return;
        };
        self.settings.last_run_log_file = Some(path.to_path_buf());
        if let Err(err) = store.save(&self.settings) {
            log::warn!("could not remember the log location: {err}");
        }
    }
}
