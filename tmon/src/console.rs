//! Program output.
//!
//! Test programs print through the console rather than the log so that their
//! output (test case markers in particular) can be checked after a run.

pub struct Console {
    lines: Vec<String>,
    /// Optional host sink invoked once per printed line.
    sink: Option<Box<dyn FnMut(&str) + 'static>>,
}

impl Console {
    pub fn new() -> Self {
        Self {
            lines: Vec::new(),
            sink: None,
        }
    }

    /// Console that also writes every line to stdout.
    pub fn stdout() -> Self {
        let mut console = Self::new();
        console.set_sink(|line| println!("{}", line));
        console
    }

    pub fn set_sink<F>(&mut self, sink: F)
    where
        F: FnMut(&str) + 'static,
    {
        self.sink = Some(Box::new(sink));
    }

    pub fn print(&mut self, line: impl Into<String>) {
        let line = line.into();
        if let Some(sink) = self.sink.as_mut() {
            sink(&line);
        }
        self.lines.push(line);
    }

    /// Test case marker.
    pub fn case(&mut self, n: u32) {
        self.print(format!("CASE #{}", n));
    }

    pub fn lines(&self) -> &[String] {
        &self.lines
    }

    pub fn contains(&self, text: &str) -> bool {
        self.lines.iter().any(|l| l.contains(text))
    }

    /// Drain all buffered lines.
    pub fn drain(&mut self) -> Vec<String> {
        std::mem::take(&mut self.lines)
    }
}

impl Default for Console {
    fn default() -> Self {
        Self::new()
    }
}
