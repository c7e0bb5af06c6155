//! Event Sink (ambient component G).
//!
//! Decouples "what happened," produced by the change-detection loop, from
//! "how it's shown." [`TextSink`] renders the exact line formats from the
//! spec's output contract; [`JsonSink`] is an enrichment for machine
//! consumption, one JSON object per line.

use std::io::Write;

use serde::Serialize;

use crate::resolve::ResolvedTarget;

pub trait Sink {
    fn resolution(&mut self, target: &ResolvedTarget);
    fn initial_value(&mut self, addr: u64, value: u64);
    fn signal_received(&mut self, signal: i32);
    fn change(&mut self, variable_name: &str, previous: u64, current: u64);
    fn terminated_exit(&mut self, code: i32);
    fn terminated_signal(&mut self, signal: i32);
}

pub struct TextSink<W: Write> {
    out: W,
}

impl<W: Write> TextSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> Sink for TextSink<W> {
    fn resolution(&mut self, target: &ResolvedTarget) {
        let _ = writeln!(
            self.out,
            "virtual base=0x{:x} runtime base=0x{:x} aslr shift=0x{:x} variable addr=0x{:x} size={} main addr=0x{:x}",
            target.elf_virtual_base,
            target.runtime_base,
            target.aslr_shift,
            target.variable_runtime_address,
            target.variable_size,
            target.main_runtime_address,
        );
    }

    fn initial_value(&mut self, addr: u64, value: u64) {
        let _ = writeln!(self.out, "Initial value at 0x{:x} = 0x{:x}", addr, value);
    }

    fn signal_received(&mut self, signal: i32) {
        let _ = writeln!(self.out, "Child stopped by signal: {}", signal);
    }

    fn change(&mut self, variable_name: &str, previous: u64, current: u64) {
        let _ = writeln!(
            self.out,
            "{} write 0x{:x} -> 0x{:x}",
            variable_name, previous, current
        );
    }

    fn terminated_exit(&mut self, code: i32) {
        let _ = writeln!(self.out, "Child exited with status {}", code);
    }

    fn terminated_signal(&mut self, signal: i32) {
        let _ = writeln!(self.out, "Child terminated by signal {}", signal);
    }
}

#[derive(Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
enum JsonRecord<'a> {
    Resolution {
        virtual_base: u64,
        runtime_base: u64,
        aslr_shift: u64,
        variable_address: u64,
        variable_size: u64,
        main_address: u64,
    },
    InitialValue {
        address: u64,
        value: u64,
    },
    Signal {
        signal: i32,
    },
    Change {
        variable_name: &'a str,
        previous_value: u64,
        current_value: u64,
    },
    ExitedWithStatus {
        status: i32,
    },
    TerminatedBySignal {
        signal: i32,
    },
}

pub struct JsonSink<W: Write> {
    out: W,
}

impl<W: Write> JsonSink<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    fn emit(&mut self, record: JsonRecord) {
        if let Ok(line) = serde_json::to_string(&record) {
            let _ = writeln!(self.out, "{}", line);
        }
    }
}

impl<W: Write> Sink for JsonSink<W> {
    fn resolution(&mut self, target: &ResolvedTarget) {
        self.emit(JsonRecord::Resolution {
            virtual_base: target.elf_virtual_base,
            runtime_base: target.runtime_base,
            aslr_shift: target.aslr_shift,
            variable_address: target.variable_runtime_address,
            variable_size: target.variable_size,
            main_address: target.main_runtime_address,
        });
    }

    fn initial_value(&mut self, addr: u64, value: u64) {
        self.emit(JsonRecord::InitialValue { address: addr, value });
    }

    fn signal_received(&mut self, signal: i32) {
        self.emit(JsonRecord::Signal { signal });
    }

    fn change(&mut self, variable_name: &str, previous: u64, current: u64) {
        self.emit(JsonRecord::Change {
            variable_name,
            previous_value: previous,
            current_value: current,
        });
    }

    fn terminated_exit(&mut self, code: i32) {
        self.emit(JsonRecord::ExitedWithStatus { status: code });
    }

    fn terminated_signal(&mut self, signal: i32) {
        self.emit(JsonRecord::TerminatedBySignal { signal });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_target() -> ResolvedTarget {
        ResolvedTarget {
            variable_runtime_address: 0x5_5000,
            variable_size: 4,
            main_runtime_address: 0x5_4000,
            elf_virtual_base: 0x1000,
            runtime_base: 0x5_0000,
            aslr_shift: 0x4_f000,
        }
    }

    #[test]
    fn text_sink_formats_initial_value() {
        let mut buf = Vec::new();
        let mut sink = TextSink::new(&mut buf);
        sink.initial_value(0x100, 0);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "Initial value at 0x100 = 0x0\n"
        );
    }

    #[test]
    fn text_sink_formats_change() {
        let mut buf = Vec::new();
        let mut sink = TextSink::new(&mut buf);
        sink.change("counter", 1, 2);
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "counter write 0x1 -> 0x2\n"
        );
    }

    #[test]
    fn text_sink_formats_exit_and_signal_termination() {
        let mut buf = Vec::new();
        {
            let mut sink = TextSink::new(&mut buf);
            sink.terminated_exit(0);
        }
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "Child exited with status 0\n"
        );

        let mut buf = Vec::new();
        {
            let mut sink = TextSink::new(&mut buf);
            sink.terminated_signal(11);
        }
        assert_eq!(
            String::from_utf8(buf).unwrap(),
            "Child terminated by signal 11\n"
        );
    }

    #[test]
    fn json_sink_emits_one_object_per_line() {
        let mut buf = Vec::new();
        {
            let mut sink = JsonSink::new(&mut buf);
            sink.resolution(&sample_target());
            sink.change("counter", 0, 1);
        }
        let text = String::from_utf8(buf).unwrap();
        let lines: Vec<_> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].contains("\"event\":\"resolution\""));
        assert!(lines[1].contains("\"variable_name\":\"counter\""));
    }
}
