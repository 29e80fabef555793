use lightdip_control::{StatusSink, StatusSnapshot};
use std::fmt::Write as _;
use std::io::{self, Write};

/// Samples shown on the second status line.
pub const PREVIEW_SAMPLES: usize = 10;

/// Two fixed-width lines describing one report.
pub fn render(snapshot: &StatusSnapshot) -> String {
    let mut out = String::with_capacity(160);
    let _ = write!(
        out,
        "#Smpl/s = {:>4}  Flash @ {:>3}Hz  avg = {:5.3}V  dips = {:>3}  ",
        snapshot.samples_in_window, snapshot.led_hz, snapshot.avg_light, snapshot.dips_in_window,
    );
    match snapshot.jitter {
        Some(j) => {
            let _ = writeln!(
                out,
                "Smpl ms[{:>6.3}, {:>6.3}] avg {:>6.3}/{:>4}",
                j.min_period_ms, j.max_period_ms, j.avg_period_ms, j.periods
            );
        }
        None => {
            let _ = writeln!(out, "Smpl ms[{:>6}, {:>6}] avg {:>6}/{:>4}", "-", "-", "-", 0);
        }
    }

    let history = &snapshot.history;
    let shown = history.len().min(PREVIEW_SAMPLES);
    for i in 0..shown {
        let idx = i * history.len() / shown;
        let _ = write!(out, " {:>4}:{:5.3}", idx, history[idx]);
    }
    out.push('\n');
    out
}

/// Local terminal sink.
pub struct ConsoleDisplay<W> {
    out: W,
}

impl ConsoleDisplay<io::Stdout> {
    pub fn stdout() -> Self {
        Self { out: io::stdout() }
    }
}

impl<W: Write> ConsoleDisplay<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }
}

impl<W: Write> StatusSink for ConsoleDisplay<W> {
    type Error = io::Error;

    fn publish(&mut self, snapshot: &StatusSnapshot) -> io::Result<()> {
        self.out.write_all(render(snapshot).as_bytes())?;
        self.out.flush()
    }
}
