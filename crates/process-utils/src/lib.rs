//! Process helpers for supervising external stage programs.
//!
//! Every child spawned through [`tokio_command`] is tied to the lifetime of the
//! future that awaits it: dropping that future (a cancelled or timed-out task)
//! kills the child. [`OutputTail`] keeps only the last characters of a
//! potentially huge stdout/stderr stream so diagnostics stay bounded.

use std::collections::VecDeque;
use std::ffi::OsStr;

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Apply the Windows `CREATE_NO_WINDOW` flag to child processes.
///
/// On non-Windows targets this is a no-op.
pub trait NoWindowExt {
    fn no_window(&mut self);
}

#[cfg(feature = "tokio")]
impl NoWindowExt for tokio::process::Command {
    fn no_window(&mut self) {
        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            self.as_std_mut().creation_flags(CREATE_NO_WINDOW);
        }
    }
}

/// Create a supervised `tokio::process::Command`.
///
/// The child never inherits stdin, is killed when its handle is dropped, and
/// gets `CREATE_NO_WINDOW` on Windows.
#[cfg(feature = "tokio")]
pub fn tokio_command(program: impl AsRef<OsStr>) -> tokio::process::Command {
    let mut cmd = tokio::process::Command::new(program);
    cmd.no_window();
    cmd.stdin(std::process::Stdio::null());
    cmd.kill_on_drop(true);
    cmd
}

/// Bounded tail of a line-oriented output stream.
///
/// Keeps at most `limit` characters, dropping the oldest ones first.
#[derive(Debug, Clone)]
pub struct OutputTail {
    limit: usize,
    chars: VecDeque<char>,
}

impl OutputTail {
    pub fn new(limit: usize) -> Self {
        Self {
            limit,
            chars: VecDeque::with_capacity(limit.min(4096)),
        }
    }

    /// Append one line (a newline separator is inserted between lines).
    pub fn push_line(&mut self, line: &str) {
        if self.limit == 0 {
            return;
        }
        if !self.chars.is_empty() {
            self.push_char('\n');
        }
        for c in line.chars() {
            self.push_char(c);
        }
    }

    fn push_char(&mut self, c: char) {
        if self.chars.len() == self.limit {
            self.chars.pop_front();
        }
        self.chars.push_back(c);
    }

    pub fn into_string(self) -> String {
        self.chars.into_iter().collect()
    }
}
