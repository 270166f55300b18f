use std::io::{self, Write};
use std::path::Path;
use std::sync::atomic::Ordering;

use tinyline::{CompletionRequest, Completions, EDITOR_ACTIVE, Editor, print_key_codes};

const HISTORY_FILE: &str = "history.txt";

/// The sample command table: command names and the arguments each accepts.
const COMMANDS: [(&str, &[&str]); 3] = [
    ("hello", &["there"]),
    ("example", &["here", "there", "everywhere"]),
    ("cello", &[]),
];

fn main() {
    let mut readline_mode = false;
    let mut multi_line = false;
    let mut keycodes = false;
    for arg in std::env::args().skip(1) {
        match arg.as_str() {
            "--multiline" => multi_line = true,
            "--keycodes" => keycodes = true,
            "--readline" => readline_mode = true,
            _ => {
                eprintln!("Usage: tinyline [--multiline] [--keycodes] [--readline]");
                std::process::exit(1);
            }
        }
    }

    if keycodes {
        let _ = print_key_codes();
        return;
    }

    ctrlc::set_handler(|| {
        // In raw mode Ctrl-C arrives as a byte and the editor handles it;
        // this only fires between read_line calls, where a clean newline
        // keeps the next prompt off the interrupted line.
        if !EDITOR_ACTIVE.load(Ordering::Relaxed) {
            println!();
            let _ = io::stdout().flush();
        }
    })
    .expect("Failed to set Ctrl-C handler");

    let mut editor = Editor::new();
    editor.set_multi_line(multi_line);
    if editor.is_multi_line() {
        println!("Multi-line mode enabled.");
    }
    editor.set_list_all(readline_mode);
    if readline_mode {
        editor.set_completion_callback(complete_command_line);
        editor.set_completion_filter(basename);
    } else {
        editor.set_completion_callback(complete_word);
    }

    // Absent on first run; anything else worth knowing about would also
    // show up when saving.
    let _ = editor.history_mut().load(Path::new(HISTORY_FILE));

    loop {
        let line = match editor.read_line("hello> ") {
            Ok(Some(line)) => line,
            Ok(None) => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                eprintln!("Error reading input: {e}");
                break;
            }
        };

        if !line.is_empty() && !line.starts_with('/') {
            println!("echo: '{line}'");
            editor.history_mut().add(&line);
            if let Err(e) = editor.history_mut().save(Path::new(HISTORY_FILE)) {
                eprintln!("Could not save history: {e}");
            }
        } else if let Some(rest) = line.strip_prefix("/historylen") {
            match rest.trim().parse::<usize>() {
                Ok(n) => {
                    editor.history_mut().set_max_len(n);
                }
                Err(_) => eprintln!("Usage: /historylen <n>"),
            }
        } else if line.starts_with('/') {
            println!("Unrecognized command: {line}");
        }
    }
}

// ── Completion callbacks ──────────────────────────────────────────────────────

/// Rotation-mode table: candidates keyed on the first character of the
/// line, exactly enough to show the cycling UX.
fn complete_word(req: &CompletionRequest<'_>, out: &mut Completions) {
    match req.line.chars().next() {
        Some('h') => {
            out.add("hello");
            out.add("hello there");
        }
        Some('e') => {
            out.add("example here");
            out.add("example there");
            out.add("example everywhere");
        }
        Some('c') => {
            out.add("cello");
        }
        _ => {}
    }
}

/// Readline-mode callback: the word in command position completes from the
/// command table, argument positions from that command's argument table,
/// and anything unknown falls back to filesystem paths.
fn complete_command_line(req: &CompletionRequest<'_>, out: &mut Completions) {
    let before = &req.line[..req.start];
    if before.trim().is_empty() {
        for (cmd, _) in COMMANDS {
            if cmd.starts_with(req.word) {
                out.add(cmd);
            }
        }
        return;
    }

    let command = before.split_whitespace().next().unwrap_or("");
    let mut matched = false;
    for (cmd, args) in COMMANDS {
        if cmd != command {
            continue;
        }
        for arg in args {
            if arg.starts_with(req.word) {
                out.add(arg);
                matched = true;
            }
        }
    }
    if !matched {
        complete_paths(req.word, out);
    }
}

/// Glob the word as a path prefix. Directories complete with a trailing
/// `/` and no appended space, so the user can keep typing into them.
fn complete_paths(word: &str, out: &mut Completions) {
    let Ok(paths) = glob::glob(&format!("{word}*")) else {
        return;
    };
    let mut any_dir = false;
    for path in paths.flatten() {
        let mut candidate = path.to_string_lossy().into_owned();
        if path.is_dir() {
            candidate.push('/');
            any_dir = true;
        }
        out.add(&candidate);
    }
    if any_dir && out.len() == 1 {
        out.set_append_char(None);
    }
}

/// Listing filter: show only the final path component while the full path
/// is what gets inserted.
fn basename(item: &str) -> String {
    let trimmed = item.trim_end_matches('/');
    trimmed.rsplit('/').next().unwrap_or(trimmed).to_string()
}
