use serialport::SerialPort;
use std::collections::VecDeque;
use std::io::{self, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::{Duration, Instant};

/// How long to wait for the `\n` of a possible `\r\n` after a bare `\r`.
const LINE_ENDING_GRACE: Duration = Duration::from_millis(100);

#[derive(Debug, thiserror::Error)]
pub enum TerminalError {
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error(
        "Timeout error: Expected termination '{expected}' but got '{actual}'. Likely due to a timeout."
    )]
    Timeout { expected: String, actual: String },

    #[error("No data received within {0:?}")]
    ReadTimeout(Duration),

    #[error("Connection closed by the instrument")]
    ConnectionClosed,

    #[error("UTF-8 conversion error: {0}")]
    Utf8(#[from] std::string::FromUtf8Error),
}

/// Byte-level access to an instrument connection.
///
/// `read_bytes` may return fewer bytes than the buffer holds, including zero.
/// Timeouts and disconnections are reported as errors, never as `Ok(0)`
/// for the socket and serial transports.
pub trait Transport: Send {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TerminalError>;

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TerminalError>;

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TerminalError>;

    fn timeout(&self) -> Duration;

    /// Drop whatever is pending in the input buffer.
    fn clear(&mut self) -> Result<(), TerminalError> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TerminalError> {
        (**self).write_bytes(data)
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TerminalError> {
        (**self).read_bytes(buf)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TerminalError> {
        (**self).set_timeout(timeout)
    }

    fn timeout(&self) -> Duration {
        (**self).timeout()
    }

    fn clear(&mut self) -> Result<(), TerminalError> {
        (**self).clear()
    }
}

fn map_read_error(error: io::Error, timeout: Duration) -> TerminalError {
    match error.kind() {
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TerminalError::ReadTimeout(timeout),
        io::ErrorKind::UnexpectedEof | io::ErrorKind::ConnectionReset => {
            TerminalError::ConnectionClosed
        }
        _ => TerminalError::Io(error),
    }
}

/// Raw socket connection (`TCPIP::<host>::<port>::SOCKET`).
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    timeout: Duration,
}

impl TcpTransport {
    pub fn connect(host: &str, port: u16, timeout: Duration) -> Result<Self, TerminalError> {
        let addr = (host, port).to_socket_addrs()?.next().ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!("{host}:{port} did not resolve to any address"),
            )
        })?;

        log::debug!("Opening socket to {}", addr);
        let stream = TcpStream::connect_timeout(&addr, timeout)?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(timeout))?;
        stream.set_write_timeout(Some(timeout))?;

        Ok(Self { stream, timeout })
    }
}

impl Transport for TcpTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TerminalError> {
        self.stream.write_all(data)?;
        self.stream.flush()?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TerminalError> {
        match self.stream.read(buf) {
            Ok(0) if !buf.is_empty() => Err(TerminalError::ConnectionClosed),
            Ok(n) => Ok(n),
            Err(e) => Err(map_read_error(e, self.timeout)),
        }
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TerminalError> {
        self.stream.set_read_timeout(Some(timeout))?;
        self.stream.set_write_timeout(Some(timeout))?;
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Serial or USB-CDC connection (`ASRL<port>::INSTR`).
pub struct SerialTransport {
    serial: Box<dyn SerialPort>,
}

impl SerialTransport {
    pub fn open(port: &str, baud_rate: u32, timeout: Duration) -> Result<Self, TerminalError> {
        log::debug!("Opening serial port {} at {} baud", port, baud_rate);
        let serial = serialport::new(port, baud_rate).timeout(timeout).open()?;

        let mut transport = Self { serial };
        transport.clear()?;
        Ok(transport)
    }
}

impl Transport for SerialTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TerminalError> {
        self.serial.write_all(data)?;
        self.serial.flush()?;
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TerminalError> {
        let timeout = self.serial.timeout();
        self.serial
            .read(buf)
            .map_err(|e| map_read_error(e, timeout))
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TerminalError> {
        self.serial.set_timeout(timeout)?;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.serial.timeout()
    }

    fn clear(&mut self) -> Result<(), TerminalError> {
        self.serial.clear(serialport::ClearBuffer::All)?;
        Ok(())
    }
}

/// In-memory transport that replays scripted reads and records writes.
///
/// Each queued chunk is handed out by at most one `read_bytes` call, so the
/// chunking of the script decides how fragmented the reads are. An empty
/// chunk produces a zero-length read. Once the script is exhausted every
/// read fails with [`TerminalError::ReadTimeout`].
#[derive(Debug, Default)]
pub struct LoopbackTransport {
    reads: VecDeque<Vec<u8>>,
    written: Vec<u8>,
    timeout: Duration,
    read_calls: usize,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(1),
            ..Self::default()
        }
    }

    /// Queue a chunk to be returned by one read call.
    pub fn push_read(&mut self, chunk: impl Into<Vec<u8>>) -> &mut Self {
        self.reads.push_back(chunk.into());
        self
    }

    /// Queue a text reply terminated by `\n`.
    pub fn push_reply(&mut self, reply: &str) -> &mut Self {
        self.push_read(format!("{reply}\n").into_bytes())
    }

    pub fn written(&self) -> &[u8] {
        &self.written
    }

    /// Written bytes as text, one entry per `\n`-terminated command.
    pub fn written_commands(&self) -> Vec<String> {
        String::from_utf8_lossy(&self.written)
            .lines()
            .map(str::to_string)
            .collect()
    }

    pub fn read_calls(&self) -> usize {
        self.read_calls
    }

    pub fn pending_reads(&self) -> usize {
        self.reads.len()
    }
}

impl Transport for LoopbackTransport {
    fn write_bytes(&mut self, data: &[u8]) -> Result<(), TerminalError> {
        self.written.extend_from_slice(data);
        Ok(())
    }

    fn read_bytes(&mut self, buf: &mut [u8]) -> Result<usize, TerminalError> {
        self.read_calls += 1;
        let mut chunk = self
            .reads
            .pop_front()
            .ok_or(TerminalError::ReadTimeout(self.timeout))?;

        let n = chunk.len().min(buf.len());
        buf[..n].copy_from_slice(&chunk[..n]);
        if n < chunk.len() {
            self.reads.push_front(chunk.split_off(n));
        }
        Ok(n)
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<(), TerminalError> {
        self.timeout = timeout;
        Ok(())
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn clear(&mut self) -> Result<(), TerminalError> {
        self.reads.clear();
        Ok(())
    }
}

/// Command/response layer on top of a [`Transport`].
///
/// Commands are sent with a `\n` terminator. Replies are read until the read
/// termination, which starts as `\n` and is usually replaced by the one
/// inferred from the `*IDN?` reply.
pub struct VisaTerminal<T: Transport> {
    transport: T,
    write_termination: String,
    read_termination: String,
}

impl<T: Transport> VisaTerminal<T> {
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            write_termination: "\n".to_string(),
            read_termination: "\n".to_string(),
        }
    }

    pub fn read_termination(&self) -> &str {
        &self.read_termination
    }

    pub fn set_read_termination(&mut self, termination: &str) {
        log::debug!("Read termination set to {:?}", termination);
        self.read_termination = termination.to_string();
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    pub fn into_inner(self) -> T {
        self.transport
    }

    /// Send a command without waiting for a reply
    pub fn write(&mut self, command: &str) -> Result<(), TerminalError> {
        log::debug!("-> {}", command);
        let command_with_termination = format!("{}{}", command, self.write_termination);
        self.transport
            .write_bytes(command_with_termination.as_bytes())
    }

    /// Send a command and return the reply line without its termination
    pub fn query(&mut self, command: &str) -> Result<String, TerminalError> {
        self.write(command)?;
        let reply = self.read_line()?;
        log::debug!("<- {}", reply);
        Ok(reply)
    }

    /// Send a command and return the raw reply including its termination
    pub fn query_raw(&mut self, command: &str) -> Result<String, TerminalError> {
        self.write(command)?;
        let response = self.read_until_termination()?;
        Ok(String::from_utf8(response)?)
    }

    /// Send a command and return the raw reply up to its first line ending.
    ///
    /// Unlike [`query_raw`](Self::query_raw) this does not rely on the read
    /// termination, so it works before the instrument's line ending is known.
    /// A `\r` is kept as `\r\n` when a `\n` follows right after it.
    pub fn query_line_ending(&mut self, command: &str) -> Result<String, TerminalError> {
        self.write(command)?;

        let mut response = Vec::new();
        let mut byte = [0u8; 1];
        let now = Instant::now();

        loop {
            match self.transport.read_bytes(&mut byte) {
                Ok(0) => {
                    if now.elapsed() >= self.transport.timeout() {
                        return Err(self.timeout_error(&response));
                    }
                }
                Ok(_) => {
                    response.push(byte[0]);
                    match byte[0] {
                        b'\n' => break,
                        b'\r' => {
                            if self.newline_follows()? {
                                response.push(b'\n');
                            }
                            break;
                        }
                        _ => {}
                    }
                }
                Err(TerminalError::ReadTimeout(_)) => return Err(self.timeout_error(&response)),
                Err(e) => return Err(e),
            }
        }

        Ok(String::from_utf8(response)?)
    }

    /// Consume the rest of a line whose first bytes were read elsewhere.
    pub fn finish_line(&mut self, partial: &[u8]) -> Result<(), TerminalError> {
        if partial.ends_with(self.read_termination.as_bytes()) {
            return Ok(());
        }
        let rest = self.read_until_termination_from(partial.to_vec())?;
        log::debug!(
            "Drained {} bytes to finish the line",
            rest.len() - partial.len()
        );
        Ok(())
    }

    /// Send a command whose reply carries a double-quoted block.
    ///
    /// The block may span several lines (`INSP?`, `TMPL?`), so the reply is
    /// read up to the closing quote before the termination is consumed.
    pub fn query_quoted(&mut self, command: &str) -> Result<String, TerminalError> {
        self.write(command)?;

        let mut response = Vec::new();
        let mut quotes = 0;
        let mut byte = [0u8; 1];
        let now = Instant::now();

        while quotes < 2 {
            match self.transport.read_bytes(&mut byte) {
                Ok(0) => {
                    if now.elapsed() >= self.transport.timeout() {
                        return Err(self.timeout_error(&response));
                    }
                }
                Ok(_) => {
                    if byte[0] == b'"' {
                        quotes += 1;
                    }
                    response.push(byte[0]);
                }
                Err(TerminalError::ReadTimeout(_)) => return Err(self.timeout_error(&response)),
                Err(e) => return Err(e),
            }
        }

        let trailer = self.read_until_termination()?;
        response.extend_from_slice(&trailer);
        let reply = String::from_utf8(response)?;
        log::debug!("<- {} bytes of quoted reply", reply.len());
        Ok(reply)
    }

    /// Run `f` with the transport timeout temporarily set to `timeout`.
    pub fn with_timeout<R, E>(
        &mut self,
        timeout: Duration,
        f: impl FnOnce(&mut Self) -> Result<R, E>,
    ) -> Result<R, E>
    where
        E: From<TerminalError>,
    {
        let previous = self.transport.timeout();
        self.transport.set_timeout(timeout)?;
        let result = f(self);
        let restored = self.transport.set_timeout(previous);
        let value = result?;
        restored?;
        Ok(value)
    }

    /// Flush pending input
    pub fn clear(&mut self) -> Result<(), TerminalError> {
        self.transport.clear()
    }

    fn read_line(&mut self) -> Result<String, TerminalError> {
        let mut response = self.read_until_termination()?;
        response.truncate(response.len() - self.read_termination.len());
        let response_str = String::from_utf8(response)?;
        Ok(response_str.trim().to_string())
    }

    fn read_until_termination(&mut self) -> Result<Vec<u8>, TerminalError> {
        self.read_until_termination_from(Vec::new())
    }

    fn read_until_termination_from(
        &mut self,
        mut response: Vec<u8>,
    ) -> Result<Vec<u8>, TerminalError> {
        let termination = self.read_termination.as_bytes().to_vec();
        let mut byte = [0u8; 1];
        let now = Instant::now();

        loop {
            match self.transport.read_bytes(&mut byte) {
                Ok(0) => {
                    if now.elapsed() >= self.transport.timeout() {
                        return Err(self.timeout_error(&response));
                    }
                }
                Ok(_) => {
                    response.push(byte[0]);
                    if response.ends_with(&termination) {
                        return Ok(response);
                    }
                }
                Err(TerminalError::ReadTimeout(_)) => return Err(self.timeout_error(&response)),
                Err(e) => return Err(e),
            }
        }
    }

    /// Wait briefly for a `\n` after a `\r`. A zero-length read or a
    /// timeout means the line ended with the `\r`.
    fn newline_follows(&mut self) -> Result<bool, TerminalError> {
        self.with_timeout(LINE_ENDING_GRACE, |terminal| {
            let mut byte = [0u8; 1];
            match terminal.transport.read_bytes(&mut byte) {
                Ok(0) | Err(TerminalError::ReadTimeout(_)) => Ok(false),
                Ok(_) if byte[0] == b'\n' => Ok(true),
                Ok(_) => {
                    log::warn!("Discarded byte {:#04x} after a bare \\r", byte[0]);
                    Ok(false)
                }
                Err(e) => Err(e),
            }
        })
    }

    fn timeout_error(&self, response: &[u8]) -> TerminalError {
        let actual_ending = if response.len() >= 2 {
            String::from_utf8_lossy(&response[response.len() - 2..]).to_string()
        } else {
            String::from_utf8_lossy(response).to_string()
        };

        TerminalError::Timeout {
            expected: self.read_termination.escape_debug().to_string(),
            actual: actual_ending.escape_debug().to_string(),
        }
    }
}
