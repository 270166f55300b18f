use std::io::{self, BufRead, Write};

use crate::buffer::EditBuffer;
use crate::completion::{
    self, CompletionCallback, CompletionFilter, CompletionRequest, Completions,
};
use crate::display;
use crate::history::History;
use crate::term::{self, ESCAPE, Key, Term};
use crate::unicode;

#[cfg(unix)]
use crate::term::{RawModeGuard, UnixTerm};

#[cfg(unix)]
use crossterm::tty::IsTty;

// ── Key bindings ──────────────────────────────────────────────────────────────

const TAB: char = '\t';
const ENTER: char = '\r';
const BACKSPACE: char = '\x7f';
const CTRL_A: char = '\x01';
const CTRL_B: char = '\x02';
const CTRL_C: char = '\x03';
const CTRL_D: char = '\x04';
const CTRL_E: char = '\x05';
const CTRL_F: char = '\x06';
const CTRL_G: char = '\x07';
const CTRL_H: char = '\x08';
const CTRL_J: char = '\x0a';
const CTRL_K: char = '\x0b';
const CTRL_L: char = '\x0c';
const CTRL_N: char = '\x0e';
const CTRL_P: char = '\x10';
const CTRL_R: char = '\x12';
const CTRL_T: char = '\x14';
const CTRL_U: char = '\x15';
const CTRL_V: char = '\x16';
const CTRL_W: char = '\x17';
const CTRL_Y: char = '\x19';

/// Cap on the reverse-i-search pattern, in bytes.
const SEARCH_PATTERN_MAX: usize = 50;

// ── Editor ────────────────────────────────────────────────────────────────────

/// An interactive line editor with Emacs-style bindings, bounded history,
/// incremental reverse search and host-driven tab completion.
///
/// One `Editor` owns the history and the completion hooks; each call to
/// [`read_line`](Editor::read_line) runs one edit session against the
/// terminal.
pub struct Editor {
    history: History,
    completion: Option<Box<CompletionCallback>>,
    filter: Option<Box<CompletionFilter>>,
    list_all: bool,
    multi_line: bool,
}

impl Default for Editor {
    fn default() -> Self {
        Self::new()
    }
}

impl Editor {
    pub fn new() -> Self {
        Editor {
            history: History::new(),
            completion: None,
            filter: None,
            list_all: false,
            multi_line: false,
        }
    }

    pub fn history(&self) -> &History {
        &self.history
    }

    pub fn history_mut(&mut self) -> &mut History {
        &mut self.history
    }

    /// Install the callback invoked on Tab.
    pub fn set_completion_callback<F>(&mut self, callback: F)
    where
        F: FnMut(&CompletionRequest<'_>, &mut Completions) + 'static,
    {
        self.completion = Some(Box::new(callback));
    }

    /// Install a display filter applied to each listed candidate.
    pub fn set_completion_filter<F>(&mut self, filter: F)
    where
        F: FnMut(&str) -> String + 'static,
    {
        self.filter = Some(Box::new(filter));
    }

    /// Choose the completion style: `false` (default) rotates candidates
    /// in place on repeated Tab; `true` completes the common prefix and
    /// lists every candidate, readline-style.
    pub fn set_list_all(&mut self, list_all: bool) {
        self.list_all = list_all;
    }

    /// Reserved: multi-line editing is not implemented. The flag is
    /// stored and otherwise ignored.
    pub fn set_multi_line(&mut self, multi_line: bool) {
        self.multi_line = multi_line;
    }

    pub fn is_multi_line(&self) -> bool {
        self.multi_line
    }

    /// Print `prompt`, edit one line, return it.
    ///
    /// Returns:
    /// - `Ok(Some(line))` — the user submitted a line (may be empty)
    /// - `Ok(None)` — EOF (Ctrl-D on an empty buffer, or input exhausted)
    /// - `Err(_)` — I/O error, with `ErrorKind::Interrupted` for Ctrl-C
    ///
    /// When stdin is not a terminal, or `TERM` names one this library
    /// cannot drive, the method falls back to a plain buffered read so
    /// piped input works without modification.
    pub fn read_line(&mut self, prompt: &str) -> io::Result<Option<String>> {
        #[cfg(unix)]
        {
            if io::stdin().is_tty() && !term::unsupported_term() {
                return self.read_line_raw(prompt);
            }
        }
        self.read_line_fallback(prompt)
    }

    #[cfg(unix)]
    fn read_line_raw(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let _guard = RawModeGuard::enter()?;
        let mut term = UnixTerm;
        self.read_line_with(&mut term, prompt)
    }

    /// Run one edit session against an already-raw terminal.
    fn read_line_with<T: Term>(
        &mut self,
        term: &mut T,
        prompt: &str,
    ) -> io::Result<Option<String>> {
        let Editor {
            history,
            completion,
            filter,
            list_all,
            multi_line: _,
        } = self;
        Session {
            term,
            prompt,
            prompt_cols: display::prompt_columns(prompt),
            buf: EditBuffer::new(),
            cols: 0,
            history,
            history_index: 0,
            completion: completion.as_deref_mut(),
            filter: filter.as_deref_mut(),
            list_all: *list_all,
        }
        .run()
    }

    /// Non-terminal path: print the prompt and delegate to
    /// `BufRead::read_line`, stripping the line terminator.
    fn read_line_fallback(&mut self, prompt: &str) -> io::Result<Option<String>> {
        let mut stdout = io::stdout();
        write!(stdout, "{prompt}")?;
        stdout.flush()?;
        let mut line = String::new();
        match io::stdin().lock().read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => {
                while line.ends_with('\n') || line.ends_with('\r') {
                    line.pop();
                }
                Ok(Some(line))
            }
            Err(e) => Err(e),
        }
    }
}

// ── Session ───────────────────────────────────────────────────────────────────

/// One edit in progress: the dispatch loop plus its sub-modes.
struct Session<'a, T: Term> {
    term: &'a mut T,
    prompt: &'a str,
    prompt_cols: usize,
    buf: EditBuffer,
    /// Cached terminal width; zero forces the next refresh to re-measure.
    cols: usize,
    history: &'a mut History,
    /// 0 is the scratch entry (newest); larger is older.
    history_index: usize,
    completion: Option<&'a mut CompletionCallback>,
    filter: Option<&'a mut CompletionFilter>,
    list_all: bool,
}

impl<T: Term> Session<'_, T> {
    fn run(mut self) -> io::Result<Option<String>> {
        // The newest history entry holds the line being edited, so history
        // navigation can come back to it.
        self.history.push_scratch();
        let outcome = self.edit_loop();
        self.history.pop_scratch();
        // Raw mode suppressed the terminal's own newline.
        let _ = self.term.write_bytes(b"\r\n");
        let _ = self.term.flush();
        outcome
    }

    fn edit_loop(&mut self) -> io::Result<Option<String>> {
        self.buf.set("");
        self.refresh()?;

        loop {
            let key = term::read_key(self.term)?;
            let mut flow = if self.completion_triggers(key) {
                self.complete_line()?
            } else {
                self.dispatch(key)?
            };
            loop {
                match flow {
                    // A sub-mode handed back the key that ended it.
                    Flow::ReDispatch(key) => flow = self.dispatch(key)?,
                    Flow::Continue => break,
                    Flow::Submit => return Ok(Some(self.buf.to_line())),
                    Flow::Eof => return Ok(None),
                }
            }
        }
    }

    /// Tab completes only with a callback installed, and only at the end
    /// of the line unless listing mode accepts it anywhere.
    fn completion_triggers(&self, key: Key) -> bool {
        key == Key::Char(TAB)
            && self.completion.is_some()
            && (self.list_all || self.buf.pos() == self.buf.char_count())
    }

    fn dispatch(&mut self, key: Key) -> io::Result<Flow> {
        match key {
            Key::Eof => Ok(Flow::Eof),
            Key::None => Ok(Flow::Continue),
            Key::Char(ENTER) => Ok(Flow::Submit),
            Key::Char(CTRL_C) => Err(io::Error::new(io::ErrorKind::Interrupted, "interrupted")),
            Key::Char(BACKSPACE) | Key::Char(CTRL_H) => {
                if self.buf.pos() > 0 {
                    let at = self.buf.pos() - 1;
                    let fast = self.fast_delete_applies(at);
                    if self.buf.remove_char(at).is_some() {
                        if fast {
                            self.term.write_bytes(b"\x08 \x08")?;
                            self.term.flush()?;
                        } else {
                            self.refresh()?;
                        }
                    }
                }
                Ok(Flow::Continue)
            }
            Key::Char(CTRL_D) if self.buf.is_empty() => Ok(Flow::Eof),
            Key::Char(CTRL_D) | Key::Delete => {
                if self.buf.remove_char(self.buf.pos()).is_some() {
                    self.refresh()?;
                }
                Ok(Flow::Continue)
            }
            // Reserved; could one day toggle insert/overwrite.
            Key::Insert => Ok(Flow::Continue),
            Key::Char(CTRL_W) => {
                let mut start = self.buf.pos();
                while start > 0 && self.buf.char_at(start - 1) == Some(' ') {
                    start -= 1;
                }
                while start > 0 && self.buf.char_at(start - 1) != Some(' ') {
                    start -= 1;
                }
                if self.buf.remove_chars(start, self.buf.pos() - start) > 0 {
                    self.refresh()?;
                }
                Ok(Flow::Continue)
            }
            Key::Char(CTRL_R) => self.reverse_search(),
            Key::Char(CTRL_T) => {
                let pos = self.buf.pos();
                if pos > 0 && self.buf.char_count() >= 2 {
                    // At the end of the line the previous two swap;
                    // elsewhere the char left of the cursor steps over the
                    // one under it.
                    let at_end = pos == self.buf.char_count();
                    let take = pos - usize::from(at_end);
                    if let Some(ch) = self.buf.char_at(take) {
                        self.buf.remove_char(take);
                        self.buf.insert_char(self.buf.pos() - 1, ch);
                        self.refresh()?;
                    }
                }
                Ok(Flow::Continue)
            }
            Key::Char(CTRL_V) => self.literal_insert(),
            Key::Char(CTRL_B) | Key::Left => {
                if self.buf.pos() > 0 {
                    self.buf.set_pos(self.buf.pos() - 1);
                    self.refresh()?;
                }
                Ok(Flow::Continue)
            }
            Key::Char(CTRL_F) | Key::Right => {
                if self.buf.pos() < self.buf.char_count() {
                    self.buf.set_pos(self.buf.pos() + 1);
                    self.refresh()?;
                }
                Ok(Flow::Continue)
            }
            Key::PageUp => {
                let jump = self.history.len() as isize - self.history_index as isize - 1;
                self.history_navigate(jump)
            }
            Key::PageDown => self.history_navigate(-(self.history_index as isize)),
            Key::Char(CTRL_P) | Key::Up => self.history_navigate(1),
            Key::Char(CTRL_N) | Key::Down => self.history_navigate(-1),
            Key::Char(CTRL_A) | Key::Home => {
                self.buf.set_pos(0);
                self.refresh()?;
                Ok(Flow::Continue)
            }
            Key::Char(CTRL_E) | Key::End => {
                self.buf.set_pos(self.buf.char_count());
                self.refresh()?;
                Ok(Flow::Continue)
            }
            Key::Char(CTRL_U) => {
                if self.buf.remove_chars(0, self.buf.pos()) > 0 {
                    self.refresh()?;
                }
                Ok(Flow::Continue)
            }
            Key::Char(CTRL_K) => {
                let pos = self.buf.pos();
                if self.buf.remove_chars(pos, self.buf.char_count() - pos) > 0 {
                    self.refresh()?;
                }
                Ok(Flow::Continue)
            }
            Key::Char(CTRL_Y) => {
                if let Some(capture) = self.buf.capture().map(str::to_string) {
                    if self.buf.insert_chars(self.buf.pos(), &capture) > 0 {
                        self.refresh()?;
                    }
                }
                Ok(Flow::Continue)
            }
            Key::Char(CTRL_L) => {
                self.term.clear_screen()?;
                // Zero forces the probe on terminals without a size ioctl.
                self.cols = 0;
                self.refresh()?;
                Ok(Flow::Continue)
            }
            Key::MetaDot => self.meta_dot(),
            Key::Char(ch) if ch == TAB || ch >= ' ' => self.insert_scalar(ch),
            // Unbound control characters, including a lone ESC.
            Key::Char(_) => Ok(Flow::Continue),
        }
    }

    fn refresh(&mut self) -> io::Result<()> {
        display::refresh(self.term, self.prompt, &self.buf, &mut self.cols)
    }

    /// Insert one scalar at the cursor. Appending a printable to a line
    /// that still fits skips the repaint: just echo the scalar.
    fn insert_scalar(&mut self, ch: char) -> io::Result<Flow> {
        let at_end = self.buf.pos() == self.buf.char_count();
        if !self.buf.insert_char(self.buf.pos(), ch) {
            return Ok(Flow::Continue);
        }
        if at_end
            && ch >= ' '
            && self.cols > 1
            && self.prompt_cols + self.buf.visible_columns() < self.cols - 1
        {
            let mut bytes = [0u8; 4];
            self.term.write_bytes(ch.encode_utf8(&mut bytes).as_bytes())?;
            self.term.flush()?;
        } else {
            self.refresh()?;
        }
        Ok(Flow::Continue)
    }

    /// Erasing the trailing scalar of a line that fits also skips the
    /// repaint: back up, blank, back up.
    fn fast_delete_applies(&self, at: usize) -> bool {
        self.cols > 1
            && at + 1 == self.buf.char_count()
            && self.buf.pos() == self.buf.char_count()
            && self.buf.char_at(at).is_some_and(|ch| ch >= ' ')
            && self.prompt_cols + self.buf.visible_columns() < self.cols - 1
    }

    /// Ctrl-V: show a `^V`, then swap it for the next scalar read raw, so
    /// control characters can be typed into the line.
    fn literal_insert(&mut self) -> io::Result<Flow> {
        if !self.buf.has_room(4) {
            return Ok(Flow::Continue);
        }
        let pos = self.buf.pos();
        if self.buf.insert_char(pos, CTRL_V) {
            self.refresh()?;
            let key = term::read_scalar(self.term)?;
            self.buf.remove_char(self.buf.pos() - 1);
            if let Key::Char(ch) = key {
                self.buf.insert_char(self.buf.pos(), ch);
            }
            self.refresh()?;
        }
        Ok(Flow::Continue)
    }

    /// Move through history by `dir` entries (positive is older). The
    /// entry being left is overwritten with the current buffer first, so
    /// coming back preserves edits.
    fn history_navigate(&mut self, dir: isize) -> io::Result<Flow> {
        let len = self.history.len();
        if len > 1 {
            let leaving = len - 1 - self.history_index;
            self.history.replace(leaving, &self.buf.to_line());
            let next = self.history_index as isize + dir;
            if next < 0 || next as usize >= len {
                return Ok(Flow::Continue);
            }
            self.history_index = next as usize;
            let line = self
                .history
                .get(len - 1 - self.history_index)
                .unwrap_or("")
                .to_string();
            self.buf.set(&line);
            self.refresh()?;
        }
        Ok(Flow::Continue)
    }

    // ── Reverse incremental search ────────────────────────────────────────

    /// Ctrl-R sub-mode. Printables extend the pattern, Ctrl-R/P/N and the
    /// vertical arrows move through matches, Ctrl-G/Ctrl-C cancel, Ctrl-J
    /// accepts; anything else accepts and is processed as typed.
    fn reverse_search(&mut self) -> io::Result<Flow> {
        let mut pattern = String::new();
        let mut searchpos = self.history.len().saturating_sub(1);
        loop {
            let rprompt = format!("(reverse-i-search)'{pattern}': ");
            display::refresh(self.term, &rprompt, &self.buf, &mut self.cols)?;

            let mut added = false;
            let mut skip_same = false;
            let mut dir: isize = -1;
            match term::read_key(self.term)? {
                Key::Char(CTRL_H) | Key::Char(BACKSPACE) => {
                    pattern.pop();
                    continue;
                }
                Key::Char(CTRL_R) | Key::Char(CTRL_P) | Key::Up => {
                    searchpos = searchpos.saturating_sub(1);
                    skip_same = true;
                }
                Key::Char(CTRL_N) | Key::Down => {
                    if searchpos < self.history.len() {
                        searchpos += 1;
                    }
                    dir = 1;
                    skip_same = true;
                }
                Key::Char(ch) if ch >= ' ' => {
                    if pattern.len() + ch.len_utf8() > SEARCH_PATTERN_MAX {
                        continue;
                    }
                    pattern.push(ch);
                    added = true;
                    // A fresh character restarts the scan from the newest.
                    searchpos = self.history.len().saturating_sub(1);
                }
                other => return self.end_search(other),
            }

            // Scan for an entry containing the pattern. Directional moves
            // skip candidates identical to what is already shown.
            let mut hit: Option<(usize, String, usize)> = None;
            let current = self.buf.to_line();
            let mut idx = searchpos as isize;
            while idx >= 0 && (idx as usize) < self.history.len() {
                let entry = self.history.get(idx as usize).unwrap_or("");
                if let Some(at) = entry.find(&pattern) {
                    if !(skip_same && entry == current) {
                        let cursor = unicode::char_index(entry, at);
                        hit = Some((idx as usize, entry.to_string(), cursor));
                        break;
                    }
                }
                idx += dir;
            }
            match hit {
                Some((index, entry, cursor)) => {
                    searchpos = index;
                    self.buf.set(&entry);
                    self.buf.set_pos(cursor);
                }
                None if added => {
                    // The extension matched nothing; roll it back.
                    pattern.pop();
                }
                None => {}
            }
        }
    }

    fn end_search(&mut self, key: Key) -> io::Result<Flow> {
        let flow = match key {
            // Ctrl-G (and Ctrl-C) abandon the search and the line.
            Key::Char(CTRL_G) | Key::Char(CTRL_C) => {
                self.buf.set("");
                Flow::Continue
            }
            // Ctrl-J keeps whatever the search found.
            Key::Char(CTRL_J) => Flow::Continue,
            other => Flow::ReDispatch(other),
        };
        self.refresh()?;
        Ok(flow)
    }

    // ── Meta-dot ──────────────────────────────────────────────────────────

    /// `ESC .`: insert the last space-delimited token of the previous
    /// history entry; each repeat swaps the insertion for the token of the
    /// next-older entry. The key that ends the cycle is processed normally.
    fn meta_dot(&mut self) -> io::Result<Flow> {
        if self.history.len() < 2 {
            return Ok(Flow::Continue);
        }
        let mut index = 0;
        let mut inserted = 0;
        let mut insert_at = self.buf.pos();
        loop {
            if index < self.history.len() - 1 {
                index += 1;
            }
            if inserted > 0 {
                self.buf.remove_chars(insert_at, inserted);
            }
            let slot = self.history.len() - 1 - index;
            let token = {
                let entry = self.history.get(slot).unwrap_or("");
                let start = entry.rfind(' ').map_or(0, |i| i + 1);
                entry[start..].to_string()
            };
            insert_at = self.buf.pos();
            inserted = self.buf.insert_chars(insert_at, &token);
            self.refresh()?;

            match term::read_key(self.term)? {
                Key::MetaDot => {}
                other => return Ok(Flow::ReDispatch(other)),
            }
        }
    }

    // ── Completion ────────────────────────────────────────────────────────

    fn complete_line(&mut self) -> io::Result<Flow> {
        let line = self.buf.to_line();
        let cursor = self.buf.byte_index_of(self.buf.pos());
        let (start, end) = completion::word_bounds(&line, cursor);

        let mut list = Completions::new();
        if let Some(callback) = self.completion.as_mut() {
            let request = CompletionRequest {
                word: &line[start..end],
                start,
                end,
                line: &line,
            };
            callback(&request, &mut list);
        }
        if list.is_empty() {
            term::beep();
            return Ok(Flow::Continue);
        }
        if self.list_all {
            self.complete_listing(start, end, &list)
        } else {
            self.complete_rotation(&list)
        }
    }

    /// DOS-style completion: Tab rotates the candidates over the line with
    /// slot `n` showing the original buffer again, ESC reverts, any other
    /// key accepts what is shown and is processed as typed.
    fn complete_rotation(&mut self, list: &Completions) -> io::Result<Flow> {
        let n = list.len();
        let mut i = 0;
        loop {
            match list.items().get(i) {
                Some(item) => {
                    let mut preview = EditBuffer::new();
                    preview.set(item);
                    display::refresh(self.term, self.prompt, &preview, &mut self.cols)?;
                }
                None => self.refresh()?,
            }
            match term::read_key(self.term)? {
                Key::Char(TAB) => {
                    i = (i + 1) % (n + 1);
                    if i == n {
                        term::beep();
                    }
                }
                Key::Char(ESCAPE) => {
                    // Put the original line back on screen.
                    if i < n {
                        self.refresh()?;
                    }
                    return Ok(Flow::Continue);
                }
                other => {
                    if let Some(item) = list.items().get(i) {
                        self.buf.set(item);
                    }
                    return Ok(Flow::ReDispatch(other));
                }
            }
        }
    }

    /// Readline-style completion: extend the word to the common prefix,
    /// list the candidates when there are several, append the separator
    /// after a unique match.
    fn complete_listing(
        &mut self,
        start: usize,
        end: usize,
        list: &Completions,
    ) -> io::Result<Flow> {
        let word_len = end - start;
        let common = completion::common_prefix(list.items()).to_string();

        if list.len() > 1 {
            self.cols = term::query_columns(self.term, self.cols);
            let filter = self.filter.as_mut().map(|f| &mut **f);
            completion::list_candidates(self.term, list.items(), filter, self.cols)?;
            if common.len() <= word_len {
                term::beep();
            }
        }
        // Candidates are expected to extend the typed word; anything else
        // (an odd callback) just inserts nothing.
        if let Some(suffix) = common.get(word_len..) {
            if !suffix.is_empty() {
                self.buf.insert_chars(self.buf.pos(), suffix);
            }
        }
        if list.len() == 1 {
            if let Some(append) = list.append_char() {
                if self.buf.char_at(self.buf.pos()) == Some(append) {
                    self.buf.set_pos(self.buf.pos() + 1);
                } else {
                    self.buf.insert_char(self.buf.pos(), append);
                }
            }
        }
        self.refresh()?;
        Ok(Flow::Continue)
    }
}

// ── Internal control flow ─────────────────────────────────────────────────────

enum Flow {
    Continue,
    /// A sub-mode ended on this key; run it through the dispatcher.
    ReDispatch(Key),
    Submit,
    Eof,
}

// ── Unit tests ────────────────────────────────────────────────────────────────
