use std::io;

use crate::buffer::EditBuffer;
use crate::term::{self, Term};
use crate::unicode;

/// Columns the prompt occupies: one per scalar, minus the characters eaten
/// by embedded ANSI color sequences.
pub(crate) fn prompt_columns(prompt: &str) -> usize {
    unicode::char_count(prompt).saturating_sub(ansi_color_chars(prompt))
}

/// Characters consumed by `ESC [ … m` color sequences in `s`, found with a
/// three-state scan so anything that is not a color sequence still counts.
fn ansi_color_chars(s: &str) -> usize {
    enum State {
        SearchEsc,
        ExpectBracket,
        ExpectTrail,
    }

    let mut state = State::SearchEsc;
    let mut len = 0;
    let mut found = 0;
    for ch in s.chars() {
        match state {
            State::SearchEsc => {
                if ch == '\x1b' {
                    state = State::ExpectBracket;
                }
            }
            State::ExpectBracket => {
                if ch == '[' {
                    // 3 accounts for the ESC, the bracket and the trailer.
                    len = 3;
                    state = State::ExpectTrail;
                } else {
                    state = State::SearchEsc;
                }
            }
            State::ExpectTrail => {
                if ch == ';' || ch.is_ascii_digit() {
                    len += 1;
                } else {
                    if ch == 'm' {
                        found += len;
                    }
                    state = State::SearchEsc;
                }
            }
        }
    }
    found
}

fn is_control(ch: char) -> bool {
    (ch as u32) < 0x20
}

/// Repaint the visual line: prompt, then the window of the buffer that fits
/// in the terminal width, with the cursor left at its column.
///
/// The width is re-acquired first, so a resize between keystrokes corrects
/// itself on the next paint. C0 controls render as reverse-video `^X` and
/// cost two columns; the window sheds leading scalars until the cursor fits
/// in view.
pub(crate) fn refresh<T: Term>(
    term: &mut T,
    prompt: &str,
    buf: &EditBuffer,
    cols: &mut usize,
) -> io::Result<()> {
    *cols = term::query_columns(term, *cols);
    let cols = (*cols).max(1);

    let pchars = prompt_columns(prompt);
    let chars = buf.chars();

    // Columns needed to show everything up to the cursor: prompt plus one
    // per scalar, one extra per control char left of the cursor, and one
    // more when the char under the cursor is itself a control.
    let mut needed = pchars + chars.len();
    needed += chars
        .iter()
        .take(buf.pos())
        .filter(|&&c| is_control(c))
        .count();
    if buf.pos() < chars.len() && is_control(chars[buf.pos()]) {
        needed += 1;
    }

    // Shed scalars off the front until the cursor fits.
    let mut start = 0;
    let mut pos = buf.pos();
    while needed >= cols && pos > 0 {
        needed = needed.saturating_sub(if is_control(chars[start]) { 2 } else { 1 });
        start += 1;
        pos -= 1;
    }
    let window = &chars[start..];

    term.cursor_to_left()?;
    term.write_bytes(prompt.as_bytes())?;

    // Emit the window up to the right edge. Controls interrupt the pending
    // printable run and push the hardware cursor one extra column each.
    let mut controls = 0;
    let mut backup = 0;
    let mut run = String::new();
    for (i, &ch) in window.iter().enumerate() {
        if is_control(ch) {
            controls += 1;
        }
        if pchars + i + controls >= cols {
            break;
        }
        if is_control(ch) {
            if !run.is_empty() {
                term.write_bytes(run.as_bytes())?;
                run.clear();
            }
            term.emit_control_char(ch)?;
            if i < pos {
                backup += 1;
            }
        } else {
            run.push(ch);
        }
    }
    if !run.is_empty() {
        term.write_bytes(run.as_bytes())?;
    }

    term.erase_eol()?;
    term.move_to_column(pos + pchars + backup)?;
    term.flush()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::term::testing::FakeTerm;

    fn paint(prompt: &str, content: &str, pos: usize, cols: usize) -> String {
        let mut term = FakeTerm::new(b"");
        term.cols = Some(cols);
        let mut buf = EditBuffer::new();
        buf.set(content);
        buf.set_pos(pos);
        let mut cached = 0;
        refresh(&mut term, prompt, &buf, &mut cached).unwrap();
        term.output_str()
    }

    #[test]
    fn plain_line_paints_prompt_buffer_and_cursor() {
        assert_eq!(paint("> ", "hi", 2, 80), "\r> hi\x1b[0K\r\x1b[4C");
    }

    #[test]
    fn cursor_mid_line_lands_mid_line() {
        assert_eq!(paint("> ", "hi", 1, 80), "\r> hi\x1b[0K\r\x1b[3C");
    }

    #[test]
    fn color_sequences_in_the_prompt_cost_nothing() {
        let prompt = "\x1b[1;32mok\x1b[0m> ";
        assert_eq!(prompt_columns(prompt), 4);
        let out = paint(prompt, "x", 1, 80);
        // The raw prompt is emitted, but the cursor math sees 4 columns.
        assert!(out.ends_with("\x1b[0K\r\x1b[5C"));
    }

    #[test]
    fn prompt_without_color_counts_every_scalar() {
        assert_eq!(prompt_columns("héllo> "), 7);
        assert_eq!(prompt_columns(""), 0);
    }

    #[test]
    fn control_chars_render_reverse_video_and_shift_the_cursor() {
        let out = paint("> ", "a\x01b", 3, 80);
        assert!(out.contains("a\x1b[7m^A\x1b[0mb"));
        // Cursor: 2 prompt + 3 scalars + 1 extra for the control.
        assert!(out.ends_with("\r\x1b[6C"));
    }

    #[test]
    fn long_lines_scroll_so_the_cursor_stays_visible() {
        let content = "abcdefghij";
        let out = paint("> ", content, 10, 8);
        // Window dropped enough of the front that the tail fits.
        assert!(!out.contains("abc"));
        assert!(out.contains("ghij"));
    }

    #[test]
    fn emission_stops_at_the_right_edge() {
        let out = paint("> ", "abcdefghij", 0, 8);
        // Cursor at the start: the line is clipped, not scrolled.
        assert!(out.contains("abcdef"));
        assert!(!out.contains("abcdefg"));
    }
}
