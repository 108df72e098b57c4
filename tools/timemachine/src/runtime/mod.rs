use crate::errors::TimeMachineError;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

pub trait FileSystem: Send + Sync {
    fn read_to_string(&self, path: &Path) -> Result<String, TimeMachineError>;
    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TimeMachineError>;
    fn create_dir_all(&self, path: &Path) -> Result<(), TimeMachineError>;
}

pub trait Terminal: Send + Sync {
    fn stdout_is_tty(&self) -> bool;
    fn write_line(&self, line: &str) -> Result<(), TimeMachineError>;
    fn draw(&self, frame: &str) -> Result<(), TimeMachineError>;
}

pub struct ProductionFileSystem;

impl FileSystem for ProductionFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, TimeMachineError> {
        std::fs::read_to_string(path)
            .map_err(|e| TimeMachineError::Io(format!("{}: {e}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TimeMachineError> {
        std::fs::write(path, contents)
            .map_err(|e| TimeMachineError::Io(format!("{}: {e}", path.display())))
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), TimeMachineError> {
        std::fs::create_dir_all(path)
            .map_err(|e| TimeMachineError::Io(format!("{}: {e}", path.display())))
    }
}

pub struct ProductionTerminal;

impl Terminal for ProductionTerminal {
    fn stdout_is_tty(&self) -> bool {
        std::io::IsTerminal::is_terminal(&std::io::stdout())
    }

    fn write_line(&self, line: &str) -> Result<(), TimeMachineError> {
        use std::io::Write;
        let mut out = std::io::stdout();
        writeln!(out, "{line}").map_err(|e| TimeMachineError::Io(e.to_string()))
    }

    fn draw(&self, frame: &str) -> Result<(), TimeMachineError> {
        self.write_line(frame)
    }
}

pub struct ProductionRuntime {
    pub file_system: Arc<dyn FileSystem>,
    pub terminal: Arc<dyn Terminal>,
}

impl ProductionRuntime {
    pub fn new() -> Self {
        Self {
            file_system: Arc::new(ProductionFileSystem),
            terminal: Arc::new(ProductionTerminal),
        }
    }
}

impl Default for ProductionRuntime {
    fn default() -> Self {
        Self::new()
    }
}

// Fakes never fail on a poisoned lock; a panicking test already failed.
fn guard<T>(lock: &Mutex<T>) -> MutexGuard<'_, T> {
    lock.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default, Clone)]
pub struct FakeFileSystem {
    files: Arc<Mutex<HashMap<PathBuf, String>>>,
    dirs: Arc<Mutex<Vec<PathBuf>>>,
    fail_next: Arc<Mutex<Option<TimeMachineError>>>,
}

impl FakeFileSystem {
    pub fn with_file(path: impl Into<PathBuf>, contents: impl Into<String>) -> Self {
        let fs = Self::default();
        fs.insert(path, contents);
        fs
    }

    pub fn insert(&self, path: impl Into<PathBuf>, contents: impl Into<String>) {
        guard(&self.files).insert(path.into(), contents.into());
    }

    pub fn contents(&self, path: &Path) -> Option<String> {
        guard(&self.files).get(path).cloned()
    }

    pub fn created_dirs(&self) -> Vec<PathBuf> {
        guard(&self.dirs).clone()
    }

    pub fn set_fail_next(&self, error: TimeMachineError) {
        *guard(&self.fail_next) = Some(error);
    }

    fn maybe_fail(&self) -> Result<(), TimeMachineError> {
        match guard(&self.fail_next).take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

impl FileSystem for FakeFileSystem {
    fn read_to_string(&self, path: &Path) -> Result<String, TimeMachineError> {
        self.maybe_fail()?;
        self.contents(path)
            .ok_or_else(|| TimeMachineError::Io(format!("missing file {}", path.display())))
    }

    fn write_string(&self, path: &Path, contents: &str) -> Result<(), TimeMachineError> {
        self.maybe_fail()?;
        self.insert(path, contents);
        Ok(())
    }

    fn create_dir_all(&self, path: &Path) -> Result<(), TimeMachineError> {
        self.maybe_fail()?;
        guard(&self.dirs).push(path.to_path_buf());
        Ok(())
    }
}

#[derive(Default, Clone)]
pub struct FakeTerminal {
    pub is_tty: bool,
    writes: Arc<Mutex<Vec<String>>>,
    draws: Arc<Mutex<Vec<String>>>,
}

impl FakeTerminal {
    pub fn new(is_tty: bool) -> Self {
        Self {
            is_tty,
            ..Self::default()
        }
    }

    pub fn written_lines(&self) -> Vec<String> {
        guard(&self.writes).clone()
    }

    pub fn drawn_frames(&self) -> Vec<String> {
        guard(&self.draws).clone()
    }
}

impl Terminal for FakeTerminal {
    fn stdout_is_tty(&self) -> bool {
        self.is_tty
    }

    fn write_line(&self, line: &str) -> Result<(), TimeMachineError> {
        guard(&self.writes).push(line.to_string());
        Ok(())
    }

    fn draw(&self, frame: &str) -> Result<(), TimeMachineError> {
        guard(&self.draws).push(frame.to_string());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::{FakeFileSystem, FakeTerminal, FileSystem, Terminal};
    use crate::errors::TimeMachineError;
    use std::path::Path;

    #[test]
    fn fake_file_system_round_trips_and_fails_once() {
        let fs = FakeFileSystem::with_file("/p/pipeline.toml", "[target]");
        fs.set_fail_next(TimeMachineError::Io("disk gone".to_string()));
        assert!(fs.read_to_string(Path::new("/p/pipeline.toml")).is_err());
        assert_eq!(
            fs.read_to_string(Path::new("/p/pipeline.toml")).expect("read"),
            "[target]"
        );
        fs.write_string(Path::new("/out.html"), "<table>").expect("write");
        assert_eq!(fs.contents(Path::new("/out.html")).as_deref(), Some("<table>"));

        fs.create_dir_all(Path::new("/out/nested")).expect("mkdir");
        assert_eq!(fs.created_dirs(), vec![Path::new("/out/nested").to_path_buf()]);
    }

    #[test]
    fn fake_terminal_captures_lines_and_frames() {
        let terminal = FakeTerminal::new(false);
        terminal.write_line("one").expect("line");
        terminal.draw("frame").expect("draw");
        assert!(!terminal.stdout_is_tty());
        assert_eq!(terminal.written_lines(), vec!["one".to_string()]);
        assert_eq!(terminal.drawn_frames(), vec!["frame".to_string()]);
    }
}
