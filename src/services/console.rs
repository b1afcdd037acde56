use std::io::{self, IsTerminal};

use nix::sys::termios::{self, LocalFlags, SetArg, SpecialCharacterIndices, Termios};
use tokio::io::{
    AsyncBufRead, AsyncBufReadExt, AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufReader,
};

const CTRL_C: u8 = 0x03;
const CTRL_D: u8 = 0x04;
const BACKSPACE: u8 = 0x08;
const DELETE: u8 = 0x7f;

/// Echo control for the terminal attached to stdin.
pub(crate) trait Terminal: Send {
    /// Turns off echo, line buffering and signal keys.
    fn suppress_echo(&mut self) -> io::Result<()>;

    /// Puts back whatever `suppress_echo` changed. Must be safe to call when
    /// nothing was changed.
    fn restore(&mut self);
}

/// Standard streams of the local process, or stand-ins for them in tests.
pub(crate) struct Console {
    input: Box<dyn AsyncBufRead + Unpin + Send>,
    output: Box<dyn AsyncWrite + Unpin + Send>,
    terminal: Option<Box<dyn Terminal>>,
}

#[derive(Debug, PartialEq, Eq)]
pub(crate) enum PasswordInput {
    Line(String),
    Interrupted,
}

impl Console {
    pub(crate) fn new(
        input: Box<dyn AsyncBufRead + Unpin + Send>,
        output: Box<dyn AsyncWrite + Unpin + Send>,
    ) -> Self {
        Self {
            input,
            output,
            terminal: None,
        }
    }

    pub(crate) fn with_terminal(mut self, terminal: Box<dyn Terminal>) -> Self {
        self.terminal = Some(terminal);
        self
    }

    pub(crate) fn stdio() -> Self {
        let console = Self::new(
            Box::new(BufReader::new(tokio::io::stdin())),
            Box::new(tokio::io::stdout()),
        );
        if std::io::stdin().is_terminal() {
            console.with_terminal(Box::new(StdinTerminal::default()))
        } else {
            console
        }
    }

    pub(crate) async fn print(&mut self, data: &str) -> io::Result<()> {
        self.output.write_all(data.as_bytes()).await?;
        self.output.flush().await
    }

    pub(crate) async fn print_line(&mut self, data: &str) -> io::Result<()> {
        self.output.write_all(data.as_bytes()).await?;
        self.output.write_all(b"\n").await?;
        self.output.flush().await
    }

    /// Returns an empty string once input is exhausted.
    pub(crate) async fn read_line(&mut self) -> io::Result<String> {
        let mut line = String::new();
        if self.input.read_line(&mut line).await? == 0 {
            return Ok(String::new());
        }

        if line.ends_with('\n') {
            line.pop();
            if line.ends_with('\r') {
                line.pop();
            }
        }
        Ok(line)
    }

    /// Echo is restored before this returns, on every path.
    pub(crate) async fn read_password(&mut self) -> io::Result<PasswordInput> {
        let Some(terminal) = self.terminal.as_mut() else {
            return self.read_line().await.map(PasswordInput::Line);
        };

        let result = {
            let _guard = EchoGuard::engage(terminal)?;
            collect_password(&mut self.input).await
        };

        if matches!(result, Ok(PasswordInput::Line(_))) {
            // The user's Enter was not echoed.
            self.output.write_all(b"\n").await?;
            self.output.flush().await?;
        }
        result
    }
}

/// Reads raw bytes up to a line terminator, applying backspace editing.
pub(crate) async fn collect_password<R>(reader: &mut R) -> io::Result<PasswordInput>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buffer: Vec<u8> = Vec::new();
    let mut byte = [0u8; 1];

    loop {
        if reader.read(&mut byte).await? == 0 {
            break;
        }

        match byte[0] {
            CTRL_C => return Ok(PasswordInput::Interrupted),
            b'\r' | b'\n' | CTRL_D => break,
            BACKSPACE | DELETE => pop_char(&mut buffer),
            other => buffer.push(other),
        }
    }

    Ok(PasswordInput::Line(
        String::from_utf8_lossy(&buffer).into_owned(),
    ))
}

fn pop_char(buffer: &mut Vec<u8>) {
    // Drop UTF-8 continuation bytes, then the leading byte.
    while let Some(&last) = buffer.last() {
        buffer.pop();
        if last & 0b1100_0000 != 0b1000_0000 {
            break;
        }
    }
}

struct EchoGuard<'a> {
    terminal: &'a mut Box<dyn Terminal>,
}

impl<'a> EchoGuard<'a> {
    fn engage(terminal: &'a mut Box<dyn Terminal>) -> io::Result<Self> {
        if let Err(error) = terminal.suppress_echo() {
            terminal.restore();
            return Err(error);
        }
        Ok(Self { terminal })
    }
}

impl Drop for EchoGuard<'_> {
    fn drop(&mut self) {
        self.terminal.restore();
    }
}

/// Termios settings of the process's stdin.
#[derive(Default)]
struct StdinTerminal {
    original: Option<Termios>,
}

impl Terminal for StdinTerminal {
    fn suppress_echo(&mut self) -> io::Result<()> {
        let stdin = std::io::stdin();
        let original = termios::tcgetattr(&stdin)?;

        let mut quiet = original.clone();
        quiet
            .local_flags
            .remove(LocalFlags::ECHO | LocalFlags::ICANON | LocalFlags::ISIG);
        quiet.control_chars[SpecialCharacterIndices::VMIN as usize] = 1;
        quiet.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

        self.original = Some(original);
        termios::tcsetattr(&stdin, SetArg::TCSANOW, &quiet)?;
        Ok(())
    }

    fn restore(&mut self) {
        if let Some(original) = self.original.take() {
            let _ = termios::tcsetattr(&std::io::stdin(), SetArg::TCSADRAIN, &original);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{collect_password, Console, PasswordInput, Terminal};
    use std::{
        io::{self, Cursor},
        sync::{Arc, Mutex},
    };
    use tokio::io::AsyncReadExt;

    /// Records echo transitions instead of touching a real tty.
    struct RecordingTerminal {
        events: Arc<Mutex<Vec<&'static str>>>,
    }

    impl Terminal for RecordingTerminal {
        fn suppress_echo(&mut self) -> io::Result<()> {
            self.events.lock().expect("events").push("suppress");
            Ok(())
        }

        fn restore(&mut self) {
            self.events.lock().expect("events").push("restore");
        }
    }

    type Events = Arc<Mutex<Vec<&'static str>>>;

    fn terminal_console(input: &[u8]) -> (Console, Events, tokio::io::DuplexStream) {
        let events = Arc::new(Mutex::new(Vec::new()));
        let (writer, reader) = tokio::io::duplex(4096);
        let console = Console::new(Box::new(Cursor::new(input.to_vec())), Box::new(writer))
            .with_terminal(Box::new(RecordingTerminal {
                events: Arc::clone(&events),
            }));
        (console, events, reader)
    }

    fn console_with_input(input: &str) -> (Console, tokio::io::DuplexStream) {
        let (writer, reader) = tokio::io::duplex(4096);
        let console = Console::new(
            Box::new(Cursor::new(input.as_bytes().to_vec())),
            Box::new(writer),
        );
        (console, reader)
    }

    #[tokio::test]
    async fn print_line_appends_newline_and_print_does_not() {
        let (mut console, mut reader) = console_with_input("");
        console.print("a").await.expect("print");
        console.print_line("b").await.expect("print_line");

        let mut written = [0u8; 3];
        reader.read_exact(&mut written).await.expect("read");
        assert_eq!(&written, b"ab\n");
    }

    #[tokio::test]
    async fn read_line_strips_terminators_and_reports_eof_as_empty() {
        let (mut console, _reader) = console_with_input("first\r\nsecond\n");
        assert_eq!(console.read_line().await.expect("first"), "first");
        assert_eq!(console.read_line().await.expect("second"), "second");
        assert_eq!(console.read_line().await.expect("eof"), "");
    }

    #[tokio::test]
    async fn password_without_terminal_reads_a_plain_line() {
        let (mut console, _reader) = console_with_input("s3cret\n");
        assert_eq!(
            console.read_password().await.expect("password"),
            PasswordInput::Line("s3cret".to_string())
        );
    }

    #[tokio::test]
    async fn backspace_removes_last_character() {
        let mut input = Cursor::new(b"pass\x7fs\x08\x08word\r".to_vec());
        assert_eq!(
            collect_password(&mut input).await.expect("collect"),
            PasswordInput::Line("paword".to_string())
        );
    }

    #[tokio::test]
    async fn backspace_removes_whole_multibyte_character() {
        let mut input = Cursor::new("pé\x7fx\n".as_bytes().to_vec());
        assert_eq!(
            collect_password(&mut input).await.expect("collect"),
            PasswordInput::Line("px".to_string())
        );
    }

    #[tokio::test]
    async fn ctrl_c_interrupts() {
        let mut input = Cursor::new(b"abc\x03def\n".to_vec());
        assert_eq!(
            collect_password(&mut input).await.expect("collect"),
            PasswordInput::Interrupted
        );
    }

    #[tokio::test]
    async fn end_of_input_returns_what_was_typed() {
        let mut input = Cursor::new(b"partial".to_vec());
        assert_eq!(
            collect_password(&mut input).await.expect("collect"),
            PasswordInput::Line("partial".to_string())
        );
    }

    #[tokio::test]
    async fn terminal_password_restores_echo_after_reading() {
        let (mut console, events, mut output) = terminal_console(b"hunter2\r");
        assert_eq!(
            console.read_password().await.expect("password"),
            PasswordInput::Line("hunter2".to_string())
        );
        assert_eq!(*events.lock().expect("events"), ["suppress", "restore"]);

        let mut newline = [0u8; 1];
        output.read_exact(&mut newline).await.expect("newline");
        assert_eq!(&newline, b"\n");
    }

    #[tokio::test]
    async fn interrupted_terminal_password_restores_echo_first() {
        let (mut console, events, _output) = terminal_console(b"hun\x03ter2\r");
        assert_eq!(
            console.read_password().await.expect("password"),
            PasswordInput::Interrupted
        );
        assert_eq!(*events.lock().expect("events"), ["suppress", "restore"]);
    }
}
