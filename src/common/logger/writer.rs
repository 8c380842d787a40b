use std::{
    fs::{self, File, OpenOptions},
    io::{self, Write},
    path::PathBuf,
    sync::Arc,
};

use parking_lot::Mutex;

/// Removes ANSI colour sequences so the log file stays plain text.
pub fn strip_ansi_escapes(s: &str) -> String {
    let mut parts = s.split('\x1b');
    let mut out = String::from(parts.next().unwrap_or_default());
    for part in parts {
        // A CSI sequence ends at its first letter.
        if let Some(end) = part.find(|c: char| c.is_ascii_alphabetic()) {
            out.push_str(&part[end + 1..]);
        }
    }
    out
}

struct WriterState {
    file: Option<File>,
    lines_since_prune: usize,
}

/// Append-only log file capped at `max_lines`.
///
/// The file handle stays open between writes. Once enough new lines have
/// accumulated the handle is dropped and the file is rewritten with only its
/// newest `max_lines` lines.
#[derive(Clone)]
pub(crate) struct CircularFileWriter {
    path: PathBuf,
    max_lines: usize,
    state: Arc<Mutex<WriterState>>,
}

impl CircularFileWriter {
    pub fn new(path: impl Into<PathBuf>, max_lines: usize) -> Self {
        Self {
            path: path.into(),
            max_lines: max_lines.max(1),
            state: Arc::new(Mutex::new(WriterState {
                file: None,
                lines_since_prune: 0,
            })),
        }
    }

    fn prune_threshold(&self) -> usize {
        (self.max_lines / 10).max(50)
    }

    fn open(&self) -> io::Result<File> {
        OpenOptions::new().create(true).append(true).open(&self.path)
    }

    fn prune(&self) -> io::Result<()> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(c) => c,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
            Err(e) => return Err(e),
        };

        let lines: Vec<&str> = contents.lines().collect();
        if lines.len() <= self.max_lines {
            return Ok(());
        }

        let mut kept = lines[lines.len() - self.max_lines..].join("\n");
        kept.push('\n');
        fs::write(&self.path, kept)
    }
}

impl io::Write for CircularFileWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let mut state = self.state.lock();
        if state.file.is_none() {
            state.file = Some(self.open()?);
        }
        if let Some(file) = state.file.as_mut() {
            file.write_all(buf)?;
        }

        state.lines_since_prune += buf.iter().filter(|&&b| b == b'\n').count();
        if state.lines_since_prune >= self.prune_threshold() {
            state.file = None;
            if let Err(e) = self.prune() {
                eprintln!("Failed to prune log file {}: {}", self.path.display(), e);
            }
            state.lines_since_prune = 0;
        }

        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.state.lock().file.as_mut() {
            Some(file) => file.flush(),
            None => Ok(()),
        }
    }
}

impl<'a> tracing_subscriber::fmt::MakeWriter<'a> for CircularFileWriter {
    type Writer = Self;

    fn make_writer(&'a self) -> Self::Writer {
        self.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_ansi_escapes() {
        assert_eq!(strip_ansi_escapes("\x1b[32mINFO\x1b[0m ok"), "INFO ok");
        assert_eq!(strip_ansi_escapes("plain"), "plain");
        assert_eq!(strip_ansi_escapes("\x1b[1m\x1b[31mERR"), "ERR");
    }

    #[test]
    fn test_writer_prunes_to_max_lines() {
        let path = std::env::temp_dir().join(format!("rustamix-log-{}.log", uuid::Uuid::new_v4()));
        let mut writer = CircularFileWriter::new(path.clone(), 10);

        for i in 0..100 {
            writeln!(writer, "line {}", i).unwrap();
        }
        writer.flush().unwrap();

        let contents = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = contents.lines().collect();
        assert_eq!(lines.len(), 10);
        assert_eq!(lines[0], "line 90");
        assert_eq!(lines[9], "line 99");

        let _ = std::fs::remove_file(path);
    }
}
