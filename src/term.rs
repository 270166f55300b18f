use std::io::{self, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

// ── Raw-mode sentinel ─────────────────────────────────────────────────────────

/// `true` while an edit session holds the terminal in raw mode.
///
/// A host's Ctrl-C handler can read this to suppress the spurious newline it
/// would otherwise print on platforms where SIGINT can still be delivered
/// during raw mode (primarily Windows).
pub static EDITOR_ACTIVE: AtomicBool = AtomicBool::new(false);

// ── Raw-mode guard ────────────────────────────────────────────────────────────

/// RAII guard: enables terminal raw mode on construction and restores it on
/// drop — even on panic — so the terminal is never left in a broken state.
///
/// In raw mode input is unbuffered with echo off, signal characters arrive
/// as plain bytes, output post-processing is off, and reads return one byte
/// at a time without timeout (VMIN=1, VTIME=0). Enabling twice is harmless;
/// the original attributes are snapshotted once.
pub(crate) struct RawModeGuard;

impl RawModeGuard {
    pub(crate) fn enter() -> io::Result<Self> {
        crossterm::terminal::enable_raw_mode()?;
        EDITOR_ACTIVE.store(true, Ordering::Relaxed);
        Ok(RawModeGuard)
    }
}

impl Drop for RawModeGuard {
    fn drop(&mut self) {
        let _ = crossterm::terminal::disable_raw_mode();
        EDITOR_ACTIVE.store(false, Ordering::Relaxed);
    }
}

/// Terminals too dumb to drive even when stdin is a TTY.
const UNSUPPORTED_TERMS: &[&str] = &["dumb", "cons25"];

pub(crate) fn unsupported_term() -> bool {
    std::env::var("TERM").is_ok_and(|term| UNSUPPORTED_TERMS.contains(&term.as_str()))
}

// ── Input events ──────────────────────────────────────────────────────────────

/// One decoded input event: a Unicode scalar (control characters included,
/// a lone escape arrives as `Char('\x1b')`), a special key, or end of input.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Key {
    Char(char),
    Up,
    Down,
    Left,
    Right,
    Delete,
    Home,
    End,
    Insert,
    PageUp,
    PageDown,
    MetaDot,
    /// An escape sequence we recognised enough to discard.
    None,
    Eof,
}

pub(crate) const ESCAPE: char = '\x1b';

/// How long a lone ESC may dangle before it stops being a sequence intro.
const ESC_TIMEOUT: Duration = Duration::from_millis(50);

/// Per-byte patience for a cursor-position report.
const PROBE_TIMEOUT: Duration = Duration::from_millis(100);

// ── Driver trait ──────────────────────────────────────────────────────────────

/// The platform seam: byte-level terminal I/O plus the window-size query.
/// Everything above these five methods (sequence parsing, probing, the
/// emitters) is shared protocol code.
pub(crate) trait Term {
    /// Read one byte. With a timeout, `Ok(None)` means nothing arrived in
    /// time; without one the call blocks and `Ok(None)` means end of input.
    fn read_byte(&mut self, timeout: Option<Duration>) -> io::Result<Option<u8>>;

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()>;

    fn flush(&mut self) -> io::Result<()>;

    /// Window width straight from the system (TIOCGWINSZ or equivalent),
    /// or `None` when the device cannot say.
    fn window_columns(&mut self) -> Option<usize>;

    // ── Wire-protocol emitters ────────────────────────────────────────────

    fn clear_screen(&mut self) -> io::Result<()> {
        self.write_bytes(b"\x1b[H\x1b[2J")
    }

    fn cursor_to_left(&mut self) -> io::Result<()> {
        self.write_bytes(b"\r")
    }

    fn erase_eol(&mut self) -> io::Result<()> {
        self.write_bytes(b"\x1b[0K")
    }

    /// Park the cursor `x` columns from the left edge.
    fn move_to_column(&mut self, x: usize) -> io::Result<()> {
        if x == 0 {
            return self.cursor_to_left();
        }
        let seq = format!("\r\x1b[{x}C");
        self.write_bytes(seq.as_bytes())
    }

    /// Render a C0 control character as reverse-video `^X`.
    fn emit_control_char(&mut self, ch: char) -> io::Result<()> {
        let letter = ((ch as u8) + b'@') as char;
        let seq = format!("\x1b[7m^{letter}\x1b[0m");
        self.write_bytes(seq.as_bytes())
    }
}

/// Ring the bell. Goes to stderr so captured stdout stays clean.
pub(crate) fn beep() {
    let mut err = io::stderr();
    let _ = err.write_all(b"\x07");
    let _ = err.flush();
}

// ── Scalar and event readers ──────────────────────────────────────────────────

/// Read one UTF-8 encoded scalar without interpreting escape sequences.
/// Malformed or truncated input reads as end of input.
pub(crate) fn read_scalar<T: Term>(term: &mut T) -> io::Result<Key> {
    let Some(b0) = term.read_byte(None)? else {
        return Ok(Key::Eof);
    };
    decode_scalar(term, b0)
}

/// Read one input event: a scalar, or an escape sequence expanded into a
/// special key.
pub(crate) fn read_key<T: Term>(term: &mut T) -> io::Result<Key> {
    match read_scalar(term)? {
        Key::Char(ESCAPE) => read_escape(term),
        other => Ok(other),
    }
}

/// Finish decoding a scalar whose lead byte has already been read.
fn decode_scalar<T: Term>(term: &mut T, b0: u8) -> io::Result<Key> {
    let len = match b0 {
        0x00..=0x7f => return Ok(Key::Char(b0 as char)),
        0xc0..=0xdf => 2,
        0xe0..=0xef => 3,
        0xf0..=0xf7 => 4,
        // A continuation byte with no lead is not recoverable here.
        _ => return Ok(Key::Eof),
    };
    let mut buf = [b0, 0, 0, 0];
    for slot in buf.iter_mut().take(len).skip(1) {
        match term.read_byte(None)? {
            Some(b) => *slot = b,
            None => return Ok(Key::Eof),
        }
    }
    let key = std::str::from_utf8(&buf[..len])
        .ok()
        .and_then(|s| s.chars().next())
        .map_or(Key::Eof, Key::Char);
    Ok(key)
}

/// An ESC just came in: wait briefly for the rest of a sequence.
///
/// `ESC [`/`ESC O` introduce arrows and navigation keys, `ESC [ N ~` the
/// extended keys, `ESC .` is Meta-dot. Nothing within 50 ms means the user
/// really pressed Escape. Any other follow-up is handed back as itself.
fn read_escape<T: Term>(term: &mut T) -> io::Result<Key> {
    let Some(b) = term.read_byte(Some(ESC_TIMEOUT))? else {
        return Ok(Key::Char(ESCAPE));
    };
    match b {
        b'[' | b'O' => read_escape_tail(term, b),
        b'.' => Ok(Key::MetaDot),
        _ => decode_scalar(term, b),
    }
}

fn read_escape_tail<T: Term>(term: &mut T, intro: u8) -> io::Result<Key> {
    let Some(b) = term.read_byte(Some(ESC_TIMEOUT))? else {
        return Ok(Key::None);
    };
    match b {
        b'A' => return Ok(Key::Up),
        b'B' => return Ok(Key::Down),
        b'C' => return Ok(Key::Right),
        b'D' => return Ok(Key::Left),
        b'F' => return Ok(Key::End),
        b'H' => return Ok(Key::Home),
        _ => {}
    }
    if intro == b'[' && b.is_ascii_digit() {
        let mut next = term.read_byte(Some(ESC_TIMEOUT))?;
        if next == Some(b'~') {
            return Ok(match b {
                b'2' => Key::Insert,
                b'3' => Key::Delete,
                b'5' => Key::PageUp,
                b'6' => Key::PageDown,
                b'7' => Key::Home,
                b'8' => Key::End,
                _ => Key::None,
            });
        }
        // e.g. `ESC [ 1 1 ~` or `ESC [ 1 ; 2 ~` — swallow the whole tail.
        while let Some(t) = next {
            if t == b'~' {
                break;
            }
            next = term.read_byte(Some(ESC_TIMEOUT))?;
        }
    }
    Ok(Key::None)
}

// ── Width acquisition ─────────────────────────────────────────────────────────

/// Re-acquire the terminal width. The system query runs every time (cheap);
/// the cursor-report probe only when the cached width is zero, which Ctrl-L
/// uses to force a re-measure on serial terminals. Falls back to 80.
pub(crate) fn query_columns<T: Term>(term: &mut T, cached: usize) -> usize {
    if let Some(cols) = term.window_columns() {
        return cols;
    }
    if cached != 0 {
        return cached;
    }
    probe_columns(term).unwrap_or(80)
}

/// Ask where the cursor is: emit `ESC [ 6 n`, parse the `ESC [ R ; C R`
/// report, return the column.
fn query_cursor_column<T: Term>(term: &mut T) -> io::Result<Option<usize>> {
    term.write_bytes(b"\x1b[6n")?;
    term.flush()?;
    if term.read_byte(Some(PROBE_TIMEOUT))? != Some(0x1b)
        || term.read_byte(Some(PROBE_TIMEOUT))? != Some(b'[')
    {
        return Ok(None);
    }
    let mut n: usize = 0;
    let mut col = None;
    loop {
        match term.read_byte(Some(PROBE_TIMEOUT))? {
            Some(b';') => n = 0, // the row count is of no interest
            Some(b'R') => {
                if n != 0 && n < 1000 {
                    col = Some(n);
                }
                break;
            }
            Some(b @ b'0'..=b'9') => n = n * 10 + usize::from(b - b'0'),
            _ => break,
        }
    }
    Ok(col)
}

/// Serial-terminal fallback: note the cursor column, shove the cursor far
/// right, read the column it landed in, put it back.
fn probe_columns<T: Term>(term: &mut T) -> Option<usize> {
    let here = query_cursor_column(term).ok()??;
    term.write_bytes(b"\x1b[999C").ok()?;
    term.flush().ok()?;
    match query_cursor_column(term).ok()? {
        Some(cols) => {
            if cols > here {
                let back = format!("\x1b[{}D", cols - here);
                let _ = term.write_bytes(back.as_bytes());
                let _ = term.flush();
            }
            Some(cols)
        }
        None => {
            // Can't measure where we ended up; the left edge is the only
            // position we can restore reliably.
            let _ = term.write_bytes(b"\r");
            let _ = term.flush();
            None
        }
    }
}

// ── Unix backend ──────────────────────────────────────────────────────────────

/// The POSIX terminal: raw `read(2)`/`poll(2)` on stdin, buffered writes to
/// stdout, TIOCGWINSZ via crossterm.
///
/// Reads bypass `io::stdin()` on purpose: its userland buffer would hold
/// bytes `poll` can no longer see, breaking the escape-sequence timeouts.
#[cfg(unix)]
pub(crate) struct UnixTerm;

#[cfg(unix)]
impl Term for UnixTerm {
    fn read_byte(&mut self, timeout: Option<Duration>) -> io::Result<Option<u8>> {
        if let Some(timeout) = timeout {
            if !poll_stdin(timeout)? {
                return Ok(None);
            }
        }
        read_stdin_byte()
    }

    fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
        io::stdout().lock().write_all(bytes)
    }

    fn flush(&mut self) -> io::Result<()> {
        io::stdout().lock().flush()
    }

    fn window_columns(&mut self) -> Option<usize> {
        crossterm::terminal::size()
            .ok()
            .map(|(cols, _rows)| usize::from(cols))
            .filter(|&cols| cols != 0)
    }
}

#[cfg(unix)]
fn poll_stdin(timeout: Duration) -> io::Result<bool> {
    let timeout_ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    loop {
        let mut fds = libc::pollfd {
            fd: libc::STDIN_FILENO,
            events: libc::POLLIN,
            revents: 0,
        };
        let rc = unsafe { libc::poll(&mut fds, 1, timeout_ms) };
        if rc >= 0 {
            return Ok(rc > 0);
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

#[cfg(unix)]
fn read_stdin_byte() -> io::Result<Option<u8>> {
    let mut byte: u8 = 0;
    loop {
        let rc = unsafe { libc::read(libc::STDIN_FILENO, std::ptr::from_mut(&mut byte).cast(), 1) };
        if rc == 1 {
            return Ok(Some(byte));
        }
        if rc == 0 {
            return Ok(None); // end of input
        }
        let err = io::Error::last_os_error();
        if err.raw_os_error() == Some(libc::EINTR) {
            continue;
        }
        return Err(err);
    }
}

// ── Public odds and ends ──────────────────────────────────────────────────────

/// Clear the whole screen and home the cursor.
pub fn clear_screen() -> io::Result<()> {
    let mut out = io::stdout().lock();
    out.write_all(b"\x1b[H\x1b[2J")?;
    out.flush()
}

/// Width in columns of the attached terminal, measured the same way an edit
/// session measures it; 80 when nothing can be determined.
#[cfg(unix)]
pub fn columns() -> usize {
    let mut term = UnixTerm;
    match RawModeGuard::enter() {
        Ok(_guard) => query_columns(&mut term, 0),
        Err(_) => term.window_columns().unwrap_or(80),
    }
}

#[cfg(not(unix))]
pub fn columns() -> usize {
    80
}

/// Diagnostic mode: echo the code of every byte typed, until Ctrl-C or end
/// of input. Handy when a terminal sends escape sequences this library does
/// not recognise.
#[cfg(unix)]
pub fn print_key_codes() -> io::Result<()> {
    let _guard = RawModeGuard::enter()?;
    let mut term = UnixTerm;
    term.write_bytes(b"Press keys to see scan codes. Type ctrl-c to quit.\r\n")?;
    term.flush()?;
    loop {
        let Some(byte) = term.read_byte(None)? else {
            break;
        };
        let shown = if (0x20..0x7f).contains(&byte) {
            byte as char
        } else {
            '?'
        };
        let line = format!("'{shown}' {byte:02x} ({byte})\r\n");
        term.write_bytes(line.as_bytes())?;
        term.flush()?;
        if byte == 0x03 {
            break;
        }
    }
    Ok(())
}

#[cfg(not(unix))]
pub fn print_key_codes() -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        "raw keyboard input is only wired up on unix",
    ))
}

// ── Test double ───────────────────────────────────────────────────────────────

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::collections::VecDeque;

    enum Step {
        Byte(u8),
        /// The scripted user paused longer than any sequence timeout.
        Timeout,
    }

    /// Scripted terminal: canned input bytes, captured output bytes, a
    /// fixed window width. An exhausted script reads as end of input.
    pub(crate) struct FakeTerm {
        steps: VecDeque<Step>,
        pub(crate) output: Vec<u8>,
        pub(crate) cols: Option<usize>,
    }

    impl FakeTerm {
        pub(crate) fn new(script: &[u8]) -> Self {
            let mut term = FakeTerm {
                steps: VecDeque::new(),
                output: Vec::new(),
                cols: Some(80),
            };
            term.feed(script);
            term
        }

        pub(crate) fn feed(&mut self, bytes: &[u8]) {
            self.steps.extend(bytes.iter().map(|&b| Step::Byte(b)));
        }

        pub(crate) fn feed_timeout(&mut self) {
            self.steps.push_back(Step::Timeout);
        }

        pub(crate) fn output_str(&self) -> String {
            String::from_utf8_lossy(&self.output).into_owned()
        }
    }

    impl Term for FakeTerm {
        fn read_byte(&mut self, _timeout: Option<Duration>) -> io::Result<Option<u8>> {
            match self.steps.pop_front() {
                Some(Step::Byte(b)) => Ok(Some(b)),
                Some(Step::Timeout) | None => Ok(None),
            }
        }

        fn write_bytes(&mut self, bytes: &[u8]) -> io::Result<()> {
            self.output.extend_from_slice(bytes);
            Ok(())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }

        fn window_columns(&mut self) -> Option<usize> {
            self.cols
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FakeTerm;
    use super::*;

    fn key_from(script: &[u8]) -> Key {
        let mut term = FakeTerm::new(script);
        read_key(&mut term).expect("fake term never errors")
    }

    #[test]
    fn plain_bytes_come_back_as_scalars() {
        assert_eq!(key_from(b"a"), Key::Char('a'));
        assert_eq!(key_from(b"\r"), Key::Char('\r'));
        assert_eq!(key_from(b"\x03"), Key::Char('\x03'));
    }

    #[test]
    fn multibyte_scalars_are_assembled() {
        assert_eq!(key_from("é".as_bytes()), Key::Char('é'));
        assert_eq!(key_from("語".as_bytes()), Key::Char('語'));
        assert_eq!(key_from("🦀".as_bytes()), Key::Char('🦀'));
    }

    #[test]
    fn malformed_utf8_reads_as_eof() {
        assert_eq!(key_from(&[0x80]), Key::Eof); // stray continuation
        assert_eq!(key_from(&[0xc3]), Key::Eof); // truncated sequence
        assert_eq!(key_from(&[0xc3, 0x41]), Key::Eof); // bad continuation
    }

    #[test]
    fn csi_and_ss3_navigation_keys_decode() {
        assert_eq!(key_from(b"\x1b[A"), Key::Up);
        assert_eq!(key_from(b"\x1b[B"), Key::Down);
        assert_eq!(key_from(b"\x1b[C"), Key::Right);
        assert_eq!(key_from(b"\x1b[D"), Key::Left);
        assert_eq!(key_from(b"\x1b[F"), Key::End);
        assert_eq!(key_from(b"\x1b[H"), Key::Home);
        assert_eq!(key_from(b"\x1bOF"), Key::End);
        assert_eq!(key_from(b"\x1bOH"), Key::Home);
    }

    #[test]
    fn extended_tilde_sequences_decode() {
        assert_eq!(key_from(b"\x1b[2~"), Key::Insert);
        assert_eq!(key_from(b"\x1b[3~"), Key::Delete);
        assert_eq!(key_from(b"\x1b[5~"), Key::PageUp);
        assert_eq!(key_from(b"\x1b[6~"), Key::PageDown);
        assert_eq!(key_from(b"\x1b[7~"), Key::Home);
        assert_eq!(key_from(b"\x1b[8~"), Key::End);
    }

    #[test]
    fn unknown_tilde_tails_are_swallowed() {
        let mut term = FakeTerm::new(b"\x1b[1;2~x");
        assert_eq!(read_key(&mut term).unwrap(), Key::None);
        // The `~` ended the discard; the next key is intact.
        assert_eq!(read_key(&mut term).unwrap(), Key::Char('x'));
    }

    #[test]
    fn meta_dot_decodes() {
        assert_eq!(key_from(b"\x1b."), Key::MetaDot);
    }

    #[test]
    fn lone_escape_stays_escape() {
        let mut term = FakeTerm::new(b"\x1b");
        term.feed_timeout();
        term.feed(b"x");
        assert_eq!(read_key(&mut term).unwrap(), Key::Char(ESCAPE));
        assert_eq!(read_key(&mut term).unwrap(), Key::Char('x'));
    }

    #[test]
    fn escape_followed_by_plain_char_returns_the_char() {
        assert_eq!(key_from(b"\x1bq"), Key::Char('q'));
    }

    #[test]
    fn window_query_prefers_the_system_answer() {
        let mut term = FakeTerm::new(b"");
        term.cols = Some(132);
        assert_eq!(query_columns(&mut term, 0), 132);
        assert!(term.output.is_empty());
    }

    #[test]
    fn cached_width_suppresses_the_probe() {
        let mut term = FakeTerm::new(b"");
        term.cols = None;
        assert_eq!(query_columns(&mut term, 100), 100);
        assert!(term.output.is_empty());
    }

    #[test]
    fn width_probe_parses_cursor_reports_and_restores() {
        let mut term = FakeTerm::new(b"\x1b[2;7R\x1b[2;120R");
        term.cols = None;
        assert_eq!(query_columns(&mut term, 0), 120);
        let out = term.output_str();
        assert!(out.contains("\x1b[6n"));
        assert!(out.contains("\x1b[999C"));
        assert!(out.contains("\x1b[113D")); // 120 back to column 7
    }

    #[test]
    fn width_probe_failure_defaults_to_80() {
        let mut term = FakeTerm::new(b"");
        term.cols = None;
        assert_eq!(query_columns(&mut term, 0), 80);
    }

    #[test]
    fn control_chars_render_reverse_video() {
        let mut term = FakeTerm::new(b"");
        term.emit_control_char('\x01').unwrap();
        assert_eq!(term.output_str(), "\x1b[7m^A\x1b[0m");
    }

    #[test]
    fn move_to_column_zero_is_a_bare_carriage_return() {
        let mut term = FakeTerm::new(b"");
        term.move_to_column(0).unwrap();
        term.move_to_column(5).unwrap();
        assert_eq!(term.output_str(), "\r\r\x1b[5C");
    }
}
