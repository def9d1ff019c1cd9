//! Command validators: run a shell command and search its output.

use std::io::Read;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::str::FromStr;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::errors::{HashguardError, Result};

/// Default time a command may run before it is killed.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(2);

/// How often a running child is polled for completion.
const POLL_INTERVAL: Duration = Duration::from_millis(10);

/// Captured result of a finished command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    /// Interleaved stdout and stderr.
    pub output: Vec<u8>,
    pub return_code: i32,
}

/// Executes command lines on behalf of a [`CommandValidator`].
pub trait CommandRunner: Send + Sync {
    /// Run `command` to completion, killing it after `timeout`.
    ///
    /// # Errors
    ///
    /// Returns [`HashguardError::CommandTimeoutExpired`] on expiry. A nonzero
    /// exit is not an error; it is reported in the output.
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput>;
}

/// Runs commands through the platform shell with stderr merged into stdout.
#[derive(Debug, Clone, Copy, Default)]
pub struct ShellRunner;

impl CommandRunner for ShellRunner {
    fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput> {
        let (mut reader, writer) = os_pipe::pipe()?;
        let writer_err = writer.try_clone()?;

        // The Command holds copies of the write end; drop it right after
        // spawning so the reader sees EOF once the child exits.
        let mut child = {
            let mut cmd = shell_command(command);
            cmd.stdin(Stdio::null()).stdout(writer).stderr(writer_err);
            cmd.spawn()?
        };

        let (tx, rx) = mpsc::channel();
        thread::spawn(move || {
            let mut output = Vec::new();
            let _ = tx.send(reader.read_to_end(&mut output).map(|_| output));
        });

        let expired = || HashguardError::CommandTimeoutExpired {
            command: command.to_string(),
            timeout,
        };
        let deadline = Instant::now() + timeout;
        let status = loop {
            if let Some(status) = child.try_wait()? {
                break status;
            }
            let now = Instant::now();
            if now >= deadline {
                kill_tree(&mut child);
                return Err(expired());
            }
            thread::sleep(POLL_INTERVAL.min(deadline - now));
        };

        // Background processes may still hold the pipe open after the shell exits.
        let output = match rx.recv_timeout(deadline.saturating_duration_since(Instant::now())) {
            Ok(output) => output?,
            Err(RecvTimeoutError::Timeout) => {
                kill_tree(&mut child);
                return Err(expired());
            }
            Err(RecvTimeoutError::Disconnected) => {
                return Err(std::io::Error::other("output reader thread exited").into());
            }
        };
        Ok(CommandOutput {
            output,
            return_code: exit_code(status),
        })
    }
}

#[cfg(unix)]
fn shell_command(command: &str) -> Command {
    use std::os::unix::process::CommandExt;

    let mut cmd = Command::new("sh");
    cmd.arg("-c").arg(command).process_group(0);
    cmd
}

/// Kill the shell and every process in its group.
#[cfg(unix)]
fn kill_tree(child: &mut Child) {
    if let Ok(pid) = i32::try_from(child.id()) {
        // SAFETY: kill(2) has no memory-safety preconditions. The shell was
        // spawned as a group leader, so -pid names only its own group.
        unsafe {
            libc::kill(-pid, libc::SIGKILL);
        }
    }
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(windows)]
fn kill_tree(child: &mut Child) {
    let _ = child.kill();
    let _ = child.wait();
}

#[cfg(windows)]
fn shell_command(command: &str) -> Command {
    let mut cmd = Command::new("cmd");
    cmd.arg("/C").arg(command);
    cmd
}

/// Exit code, or the negated signal number for signal-terminated children.
fn exit_code(status: ExitStatus) -> i32 {
    if let Some(code) = status.code() {
        return code;
    }
    #[cfg(unix)]
    {
        use std::os::unix::process::ExitStatusExt;
        if let Some(signal) = status.signal() {
            return -signal;
        }
    }
    -1
}

/// Return codes a command may exit with. Empty allows any code.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedReturnCodes(Vec<i32>);

impl AllowedReturnCodes {
    /// Accept every return code.
    #[must_use]
    pub fn any() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn allows(&self, code: i32) -> bool {
        self.0.is_empty() || self.0.contains(&code)
    }

    #[must_use]
    pub fn as_slice(&self) -> &[i32] {
        &self.0
    }
}

impl From<i32> for AllowedReturnCodes {
    fn from(code: i32) -> Self {
        Self(vec![code])
    }
}

impl From<Vec<i32>> for AllowedReturnCodes {
    fn from(codes: Vec<i32>) -> Self {
        Self(codes)
    }
}

impl From<&[i32]> for AllowedReturnCodes {
    fn from(codes: &[i32]) -> Self {
        Self(codes.to_vec())
    }
}

impl<const N: usize> From<[i32; N]> for AllowedReturnCodes {
    fn from(codes: [i32; N]) -> Self {
        Self(codes.to_vec())
    }
}

/// Character set used to decode command output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Charset {
    /// UTF-8; invalid sequences are an error.
    #[default]
    Utf8,
    /// UTF-8 with invalid sequences replaced by U+FFFD.
    Utf8Lossy,
    /// ISO-8859-1; every byte maps to one code point.
    Latin1,
    /// 7-bit ASCII; bytes above 0x7F are an error.
    Ascii,
}

impl Charset {
    #[must_use]
    pub fn name(self) -> &'static str {
        match self {
            Charset::Utf8 => "utf-8",
            Charset::Utf8Lossy => "utf-8-lossy",
            Charset::Latin1 => "latin-1",
            Charset::Ascii => "ascii",
        }
    }

    /// Decode `bytes`, or `None` if they are invalid in this charset.
    #[must_use]
    pub fn decode(self, bytes: &[u8]) -> Option<String> {
        match self {
            Charset::Utf8 => String::from_utf8(bytes.to_vec()).ok(),
            Charset::Utf8Lossy => Some(String::from_utf8_lossy(bytes).into_owned()),
            Charset::Latin1 => Some(bytes.iter().map(|&b| char::from(b)).collect()),
            Charset::Ascii => bytes
                .is_ascii()
                .then(|| bytes.iter().map(|&b| char::from(b)).collect()),
        }
    }
}

impl FromStr for Charset {
    type Err = HashguardError;

    fn from_str(s: &str) -> Result<Self> {
        match s.to_ascii_lowercase().replace('_', "-").as_str() {
            "utf-8" | "utf8" => Ok(Charset::Utf8),
            "utf-8-lossy" | "utf8-lossy" => Ok(Charset::Utf8Lossy),
            "latin-1" | "latin1" | "iso-8859-1" => Ok(Charset::Latin1),
            "ascii" | "us-ascii" => Ok(Charset::Ascii),
            other => Err(HashguardError::config(format!("unknown charset '{other}'"))),
        }
    }
}

/// One command validation request.
///
/// Exactly one of `search` and `regex` must be set.
#[derive(Debug, Clone, Default)]
pub struct CommandCheck {
    pub command: String,
    /// Substring that must occur in the output.
    pub search: Option<String>,
    /// Pattern that must match somewhere in the output.
    pub regex: Option<String>,
    /// Falls back to the validator's default timeout when unset.
    pub timeout: Option<Duration>,
    pub allowed_return_codes: AllowedReturnCodes,
    pub decode: Charset,
}

impl CommandCheck {
    #[must_use]
    pub fn new(command: impl Into<String>) -> Self {
        Self {
            command: command.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_search(mut self, search: impl Into<String>) -> Self {
        self.search = Some(search.into());
        self
    }

    #[must_use]
    pub fn with_regex(mut self, regex: impl Into<String>) -> Self {
        self.regex = Some(regex.into());
        self
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn with_allowed_return_codes(mut self, codes: impl Into<AllowedReturnCodes>) -> Self {
        self.allowed_return_codes = codes.into();
        self
    }

    #[must_use]
    pub fn with_decode(mut self, charset: Charset) -> Self {
        self.decode = charset;
        self
    }
}

/// Output matcher resolved from a [`CommandCheck`].
enum Matcher {
    Search(String),
    Pattern(Regex),
}

impl Matcher {
    fn from_check(check: &CommandCheck) -> Result<Self> {
        match (&check.search, &check.regex) {
            (None, None) => Err(HashguardError::config("search or regex must be set")),
            (Some(_), Some(_)) => Err(HashguardError::config(
                "only search or regex may be set, not both",
            )),
            (Some(search), None) => Ok(Matcher::Search(search.clone())),
            (None, Some(pattern)) => Regex::new(pattern)
                .map(Matcher::Pattern)
                .map_err(|e| HashguardError::config(format!("invalid regex '{pattern}': {e}"))),
        }
    }

    fn is_found(&self, output: &str) -> bool {
        match self {
            Matcher::Search(needle) => output.contains(needle.as_str()),
            Matcher::Pattern(re) => {
                let mut found = false;
                for m in re.find_iter(output) {
                    log::debug!(
                        "Found cmd validation '{}' at {:02}-{:02}",
                        m.as_str(),
                        m.start(),
                        m.end()
                    );
                    found = true;
                }
                found
            }
        }
    }
}

/// Validates command output against a substring or pattern.
#[derive(Clone)]
pub struct CommandValidator {
    runner: Arc<dyn CommandRunner>,
    default_timeout: Duration,
}

impl Default for CommandValidator {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CommandValidator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandValidator")
            .field("default_timeout", &self.default_timeout)
            .finish_non_exhaustive()
    }
}

impl CommandValidator {
    /// Shell-backed validator with the default timeout.
    #[must_use]
    pub fn new() -> Self {
        Self::with_runner(Arc::new(ShellRunner))
    }

    #[must_use]
    pub fn with_runner(runner: Arc<dyn CommandRunner>) -> Self {
        Self {
            runner,
            default_timeout: DEFAULT_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_default_timeout(mut self, timeout: Duration) -> Self {
        self.default_timeout = timeout;
        self
    }

    /// Run the command and report whether its output matches.
    ///
    /// # Errors
    ///
    /// - [`HashguardError::Configuration`] unless exactly one of search and
    ///   regex is set, or if the regex does not compile.
    /// - [`HashguardError::CommandTimeoutExpired`] if the command overruns.
    /// - [`HashguardError::NotAllowedReturnCode`] if the exit code is not in
    ///   a non-empty allow-list. Checked before the output is searched.
    /// - [`HashguardError::Decode`] if the output is invalid in the charset.
    pub fn validate(&self, check: &CommandCheck) -> Result<bool> {
        let matcher = Matcher::from_check(check)?;
        let timeout = check.timeout.unwrap_or(self.default_timeout);

        let CommandOutput {
            output,
            return_code,
        } = self.runner.run(&check.command, timeout)?;

        if !check.allowed_return_codes.allows(return_code) {
            return Err(HashguardError::NotAllowedReturnCode {
                command: check.command.clone(),
                code: return_code,
                allowed: check.allowed_return_codes.as_slice().to_vec(),
            });
        }

        log::debug!(
            "Executed '{}' with return code: {return_code}",
            check.command
        );

        let text = check
            .decode
            .decode(&output)
            .ok_or_else(|| HashguardError::Decode {
                command: check.command.clone(),
                charset: check.decode.name(),
            })?;
        Ok(matcher.is_found(&text))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Runner that returns canned output without spawning anything.
    struct FakeRunner {
        output: &'static [u8],
        code: i32,
    }

    impl CommandRunner for FakeRunner {
        fn run(&self, _command: &str, _timeout: Duration) -> Result<CommandOutput> {
            Ok(CommandOutput {
                output: self.output.to_vec(),
                return_code: self.code,
            })
        }
    }

    fn fake(output: &'static [u8], code: i32) -> CommandValidator {
        CommandValidator::with_runner(Arc::new(FakeRunner { output, code }))
    }

    #[test]
    fn search_finds_substring() {
        let v = fake(b"sub_a\nsub_b\nsub_c\n", 0);
        assert!(v.validate(&CommandCheck::new("ls").with_search("sub_a")).unwrap());
        assert!(!v
            .validate(&CommandCheck::new("ls").with_search("NO_KNOWN_FOLDER"))
            .unwrap());
    }

    #[test]
    fn regex_finds_pattern() {
        let v = fake(b"sub_a\nsub_b\n", 0);
        assert!(v.validate(&CommandCheck::new("ls").with_regex("sub*")).unwrap());
        assert!(!v
            .validate(&CommandCheck::new("ls").with_regex("sub_NO.+"))
            .unwrap());
    }

    #[test]
    fn neither_search_nor_regex_is_configuration_error() {
        let v = fake(b"", 0);
        assert!(matches!(
            v.validate(&CommandCheck::new("ls")),
            Err(HashguardError::Configuration { .. })
        ));
    }

    #[test]
    fn both_search_and_regex_is_configuration_error() {
        let v = fake(b"", 0);
        let check = CommandCheck::new("ls").with_search("x").with_regex("x");
        assert!(matches!(
            v.validate(&check),
            Err(HashguardError::Configuration { .. })
        ));
    }

    #[test]
    fn invalid_regex_is_configuration_error() {
        let v = fake(b"", 0);
        assert!(matches!(
            v.validate(&CommandCheck::new("ls").with_regex("(")),
            Err(HashguardError::Configuration { .. })
        ));
    }

    #[test]
    fn return_code_checked_before_output() {
        let v = fake(b"match", 3);
        let check = CommandCheck::new("x")
            .with_search("match")
            .with_allowed_return_codes([0, 1]);
        let err = v.validate(&check).unwrap_err();
        assert!(
            matches!(err, HashguardError::NotAllowedReturnCode { code: 3, ref allowed, .. } if allowed == &[0, 1]),
            "unexpected error: {err}"
        );
    }

    #[test]
    fn empty_allow_list_accepts_any_code() {
        let v = fake(b"match", 42);
        assert!(v.validate(&CommandCheck::new("x").with_search("match")).unwrap());
    }

    #[test]
    fn allowed_return_codes_normalize() {
        assert_eq!(AllowedReturnCodes::from(2).as_slice(), &[2]);
        assert_eq!(AllowedReturnCodes::from(vec![1, 2]).as_slice(), &[1, 2]);
        assert!(AllowedReturnCodes::any().allows(127));
        assert!(!AllowedReturnCodes::from([0]).allows(127));
    }

    #[test]
    fn invalid_utf8_is_decode_error() {
        let v = fake(b"\xff\xfe", 0);
        assert!(matches!(
            v.validate(&CommandCheck::new("x").with_search("a")),
            Err(HashguardError::Decode { .. })
        ));
    }

    #[test]
    fn latin1_decodes_any_byte() {
        let v = fake(b"caf\xe9", 0);
        let check = CommandCheck::new("x")
            .with_search("café")
            .with_decode(Charset::Latin1);
        assert!(v.validate(&check).unwrap());
    }

    #[test]
    fn charset_parses_common_names() {
        assert_eq!("UTF-8".parse::<Charset>().unwrap(), Charset::Utf8);
        assert_eq!("latin_1".parse::<Charset>().unwrap(), Charset::Latin1);
        assert_eq!("ascii".parse::<Charset>().unwrap(), Charset::Ascii);
        assert!("ebcdic".parse::<Charset>().is_err());
    }

    #[test]
    fn ascii_rejects_high_bytes() {
        assert_eq!(Charset::Ascii.decode(b"ok"), Some("ok".to_string()));
        assert_eq!(Charset::Ascii.decode(b"\xe9"), None);
    }

    #[cfg(unix)]
    #[test]
    fn shell_merges_stderr_into_output() {
        let out = ShellRunner
            .run("echo out; echo err 1>&2", Duration::from_secs(5))
            .unwrap();
        let text = String::from_utf8(out.output).unwrap();
        assert!(text.contains("out"));
        assert!(text.contains("err"));
        assert_eq!(out.return_code, 0);
    }

    #[cfg(unix)]
    #[test]
    fn shell_reports_exit_code() {
        let out = ShellRunner.run("exit 2", Duration::from_secs(5)).unwrap();
        assert_eq!(out.return_code, 2);
    }

    #[cfg(unix)]
    #[test]
    fn shell_sleep_within_timeout_succeeds() {
        let v = CommandValidator::new();
        let check = CommandCheck::new("sleep 1")
            .with_search("")
            .with_timeout(Duration::from_secs(2));
        assert!(v.validate(&check).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn shell_sleep_past_timeout_expires() {
        let v = CommandValidator::new();
        let check = CommandCheck::new("sleep 3")
            .with_search("")
            .with_timeout(Duration::from_secs(1));
        let err = v.validate(&check).unwrap_err();
        assert!(
            matches!(err, HashguardError::CommandTimeoutExpired { .. }),
            "unexpected error: {err}"
        );
    }

    #[cfg(unix)]
    #[test]
    fn background_output_holder_bounded_by_timeout() {
        let started = Instant::now();
        let err = ShellRunner
            .run("sleep 4 & echo hi", Duration::from_secs(1))
            .unwrap_err();
        assert!(
            matches!(err, HashguardError::CommandTimeoutExpired { .. }),
            "unexpected error: {err}"
        );
        assert!(started.elapsed() < Duration::from_secs(3));
    }

    #[cfg(unix)]
    #[test]
    fn default_timeout_applies() {
        let v = CommandValidator::new().with_default_timeout(Duration::from_millis(300));
        let check = CommandCheck::new("sleep 2").with_search("");
        assert!(matches!(
            v.validate(&check),
            Err(HashguardError::CommandTimeoutExpired { .. })
        ));
    }

    #[cfg(unix)]
    #[test]
    fn exit_code_in_allow_list_passes() {
        let v = CommandValidator::new();
        let check = CommandCheck::new("exit 2")
            .with_search("x")
            .with_allowed_return_codes(vec![2]);
        assert!(!v.validate(&check).unwrap());
    }

    #[cfg(unix)]
    #[test]
    fn unknown_command_not_allowed() {
        let v = CommandValidator::new();
        let check = CommandCheck::new("unknown-cmd-hashguard-test")
            .with_search("x")
            .with_allowed_return_codes(vec![0]);
        assert!(matches!(
            v.validate(&check),
            Err(HashguardError::NotAllowedReturnCode { .. })
        ));
    }
}
