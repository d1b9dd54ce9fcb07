use clap::ValueEnum;
use std::io::{self, Write};
use stepwatch_vmi::SingleStepEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// `Single-step event: VCPU:<n>  GFN <hex> GLA <hex>`
    Text,
    /// One JSON object per line
    Json,
}

/// Writes one line per single-step event.
pub struct EventPrinter<W: Write> {
    format: OutputFormat,
    out: W,
}

impl<W: Write> EventPrinter<W> {
    pub fn new(format: OutputFormat, out: W) -> Self {
        Self { format, out }
    }

    pub fn print(&mut self, event: &SingleStepEvent) -> io::Result<()> {
        match self.format {
            OutputFormat::Text => writeln!(self.out, "{}", event)?,
            OutputFormat::Json => {
                serde_json::to_writer(&mut self.out, event)?;
                writeln!(self.out)?;
            }
        }
        self.out.flush()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event() -> SingleStepEvent {
        SingleStepEvent {
            vcpu: 3,
            gla: 0xffff_f800_0123_4567,
            gfn: 0x1234,
        }
    }

    #[test]
    fn test_text_format() {
        let mut printer = EventPrinter::new(OutputFormat::Text, Vec::new());
        printer.print(&event()).unwrap();
        assert_eq!(
            String::from_utf8(printer.out).unwrap(),
            "Single-step event: VCPU:3  GFN 1234 GLA fffff80001234567\n"
        );
    }

    #[test]
    fn test_json_format() {
        let mut printer = EventPrinter::new(OutputFormat::Json, Vec::new());
        printer.print(&event()).unwrap();
        printer.print(&event()).unwrap();

        let out = String::from_utf8(printer.out).unwrap();
        let lines: Vec<serde_json::Value> = out
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 2);
        assert_eq!(lines[0]["vcpu"], 3);
        assert_eq!(lines[0]["gfn"], 0x1234);
        assert_eq!(lines[0]["gla"], 0xffff_f800_0123_4567u64);
    }
}
