//! Per-processor execution tracer with loop compression and trace-over.

use std::fmt;

use crate::api::TraceSink;

/// Entries in the loop-detection ring.
pub const TRACE_LOOP_WINDOW: usize = 64;

/// Writes one line per traced instruction to a sink.
pub struct Tracer {
    sink: Box<dyn TraceSink>,
    action: Option<String>,
    trace_over: bool,
    trace_over_target: Option<u64>,
    history: [Option<u64>; TRACE_LOOP_WINDOW],
    next: usize,
    loops: u32,
}

impl fmt::Debug for Tracer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Tracer")
            .field("action", &self.action)
            .field("trace_over", &self.trace_over)
            .field("trace_over_target", &self.trace_over_target)
            .field("loops", &self.loops)
            .finish_non_exhaustive()
    }
}

impl Tracer {
    /// Tracer writing to `sink`, optionally stepping over calls and running `action` per line.
    #[must_use]
    pub const fn new(sink: Box<dyn TraceSink>, trace_over: bool, action: Option<String>) -> Self {
        Self {
            sink,
            action,
            trace_over,
            trace_over_target: None,
            history: [None; TRACE_LOOP_WINDOW],
            next: 0,
            loops: 0,
        }
    }

    /// Command run before each traced line.
    #[must_use]
    pub fn action(&self) -> Option<&str> {
        self.action.as_deref()
    }

    /// Whether calls are traced as single lines.
    #[must_use]
    pub const fn trace_over(&self) -> bool {
        self.trace_over
    }

    /// Address at which tracing resumes after a stepped-over call.
    #[must_use]
    pub const fn trace_over_target(&self) -> Option<u64> {
        self.trace_over_target
    }

    /// Decides whether `pc` produces a line. Skips inside a traced-over call and while the PC
    /// is looping; the first line after a loop is preceded by a loop summary.
    pub fn begin(&mut self, pc: u64) -> bool {
        if self.trace_over {
            if let Some(target) = self.trace_over_target {
                if target != pc {
                    return false;
                }
                self.trace_over_target = None;
            }
        }

        let count = self.history.iter().filter(|&&entry| entry == Some(pc)).count();
        if count > 1 {
            self.loops += 1;
            return false;
        }

        if self.loops != 0 {
            let summary = format!("\n   (loops for {} instructions)\n\n", self.loops);
            self.write(&summary);
        }
        self.loops = 0;
        true
    }

    /// Emits the line for `pc`, arms the trace-over target, and logs `pc` for loop detection.
    pub fn finish(&mut self, pc: u64, address_chars: usize, text: &str, over_target: Option<u64>) {
        let line = format!("{pc:0address_chars$X}: {text}\n");
        self.write(&line);
        if self.trace_over {
            if let Some(target) = over_target {
                self.trace_over_target = Some(target);
            }
        }
        self.next = (self.next + 1) % TRACE_LOOP_WINDOW;
        self.history[self.next] = Some(pc);
    }

    /// Flushes the sink.
    pub fn flush(&mut self) {
        if let Err(err) = self.sink.flush() {
            log::warn!("trace flush failed: {err}");
        }
    }

    fn write(&mut self, text: &str) {
        if let Err(err) = self.sink.write_text(text) {
            log::warn!("trace write failed: {err}");
        }
    }
}

impl Drop for Tracer {
    fn drop(&mut self) {
        self.flush();
    }
}

#[cfg(test)]
mod tests {
    use super::Tracer;
    use crate::api::SharedTraceBuffer;

    fn trace(tracer: &mut Tracer, pc: u64) {
        if tracer.begin(pc) {
            tracer.finish(pc, 4, "nop", None);
        }
    }

    #[test]
    fn tight_loops_collapse_into_a_summary() {
        let buffer = SharedTraceBuffer::new();
        let mut tracer = Tracer::new(Box::new(buffer.clone()), false, None);
        for _ in 0..5 {
            trace(&mut tracer, 0x10);
            trace(&mut tracer, 0x12);
        }
        trace(&mut tracer, 0x20);
        assert_eq!(
            buffer.contents(),
            "0010: nop\n0012: nop\n0010: nop\n0012: nop\n\n   (loops for 6 instructions)\n\n0020: nop\n"
        );
    }

    #[test]
    fn trace_over_skips_until_target() {
        let buffer = SharedTraceBuffer::new();
        let mut tracer = Tracer::new(Box::new(buffer.clone()), true, None);
        assert!(tracer.begin(0x100));
        tracer.finish(0x100, 4, "call 0200", Some(0x103));
        assert_eq!(tracer.trace_over_target(), Some(0x103));
        assert!(!tracer.begin(0x200));
        assert!(!tracer.begin(0x201));
        assert!(tracer.begin(0x103));
        assert_eq!(tracer.trace_over_target(), None);
        assert_eq!(buffer.lines(), vec!["0100: call 0200"]);
    }
}
