use std::io::IsTerminal;
use std::path::PathBuf;

use nfsen_core::settings::Config;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

// ── Directory bootstrap ────────────────────────────────────────────────────────

/// Ensure the state directory and the PID file's directory exist.
pub fn ensure_directories(config: &Config) -> anyhow::Result<()> {
    std::fs::create_dir_all(&config.daemon.state_dir)?;
    if let Some(parent) = config.daemon.pid_file.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(())
}

/// Settings path given on the command line, or the per-user default.
pub fn settings_path(explicit: Option<&PathBuf>) -> PathBuf {
    let path = explicit
        .cloned()
        .unwrap_or_else(nfsen_core::settings::default_settings_path);
    // Absolute, so the re-executed daemon does not depend on its cwd.
    std::fs::canonicalize(&path).unwrap_or(path)
}

// ── Logging bootstrap ──────────────────────────────────────────────────────────

/// Map a settings level name to a `tracing` directive.
///
/// Accepts the syslog style names used in settings files. Unrecognised names
/// are passed through so `RUST_LOG` style directives keep working.
pub fn normalise_level(log_level: &str) -> String {
    match log_level.to_uppercase().as_str() {
        "DEBUG" => "debug".to_string(),
        "INFO" | "NOTICE" => "info".to_string(),
        "WARNING" | "WARN" => "warn".to_string(),
        "ERROR" | "CRITICAL" | "ALERT" | "EMERGENCY" => "error".to_string(),
        _ => log_level.to_string(),
    }
}

/// Initialise the global `tracing` subscriber on stderr.
///
/// `RUST_LOG` takes precedence over `log_level`. Falls back to `info` if the
/// level string is not a valid filter.
pub fn setup_logging(log_level: &str) -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(normalise_level(log_level)))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let layer = fmt::layer()
        .with_target(false)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal());

    tracing_subscriber::registry()
        .with(filter)
        .with(layer)
        .try_init()?;

    Ok(())
}

/// Log an error that ends the process.
pub fn report_fatal(context: &str, err: &dyn std::fmt::Display) {
    tracing::error!(error = %err, "Fatal: {context}");
}

// ── Tests ──────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use tempfile::TempDir;

    #[derive(Clone, Default)]
    struct Captured(Arc<Mutex<Vec<u8>>>);

    impl Write for Captured {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_normalise_level() {
        assert_eq!(normalise_level("DEBUG"), "debug");
        assert_eq!(normalise_level("info"), "info");
        assert_eq!(normalise_level("WARNING"), "warn");
        assert_eq!(normalise_level("CRITICAL"), "error");
        assert_eq!(normalise_level("ALERT"), "error");
        assert_eq!(normalise_level("nfsen_data=trace"), "nfsen_data=trace");
    }

    #[test]
    fn test_ensure_directories() {
        let tmp = TempDir::new().expect("tempdir");
        let state = tmp.path().join("state");
        let run = tmp.path().join("run");
        let json = format!(
            r#"{{ "general": {{ "sources": ["gw"], "db": "memory" }},
                 "nfdump": {{ "binary": "/usr/bin/nfdump", "profiles-data": "/data" }},
                 "daemon": {{ "state-dir": "{}", "pid-file": "{}" }} }}"#,
            state.display(),
            run.join("nfsen-ng.pid").display()
        );
        let config = Config::from_json(&json, Path::new("settings.json")).unwrap();

        ensure_directories(&config).expect("ensure_directories should succeed");

        assert!(state.is_dir(), "state dir must exist");
        assert!(run.is_dir(), "PID file directory must exist");
    }

    #[test]
    fn test_settings_path_prefers_explicit() {
        let tmp = TempDir::new().expect("tempdir");
        let file = tmp.path().join("settings.json");
        std::fs::write(&file, "{}").unwrap();
        let resolved = settings_path(Some(&file));
        assert!(resolved.is_absolute());
        assert!(resolved.ends_with("settings.json"));
    }

    #[test]
    fn test_settings_failure_is_logged_as_error() {
        let tmp = TempDir::new().expect("tempdir");
        let missing = tmp.path().join("absent.json");
        let err = Config::load(&missing).unwrap_err();

        let captured = Captured::default();
        let writer = captured.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, || report_fatal("cannot load settings", &err));

        let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("ERROR"), "{output}");
        assert!(output.contains("Fatal: cannot load settings"), "{output}");
        assert!(output.contains("absent.json"), "{output}");
    }
}
