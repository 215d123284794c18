//! Byte-stream endpoints the shell protocol runs over.

use crate::config::EndpointConfig;
use crate::error::{McushError, Result};
use log::debug;
use serialport::SerialPort;
use std::io::{ErrorKind, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::time::Duration;

/// Blocking, timeout-bounded byte stream.
///
/// `read` returns fewer than `n` bytes (possibly none) when the timeout
/// expires or the peer closed the stream; it is not an error.
pub trait Transport {
    fn connect(&mut self) -> Result<()>;
    fn disconnect(&mut self);
    fn is_connected(&self) -> bool;
    fn read(&mut self, n: usize) -> Result<Vec<u8>>;
    fn write(&mut self, buf: &[u8]) -> Result<()>;
    fn flush(&mut self) -> Result<()>;
    fn timeout(&self) -> Duration;
    fn set_timeout(&mut self, timeout: Duration) -> Result<()>;
    /// Port path or address, for error context
    fn endpoint(&self) -> &str;
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }
    fn disconnect(&mut self) {
        (**self).disconnect()
    }
    fn is_connected(&self) -> bool {
        (**self).is_connected()
    }
    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        (**self).read(n)
    }
    fn write(&mut self, buf: &[u8]) -> Result<()> {
        (**self).write(buf)
    }
    fn flush(&mut self) -> Result<()> {
        (**self).flush()
    }
    fn timeout(&self) -> Duration {
        (**self).timeout()
    }
    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        (**self).set_timeout(timeout)
    }
    fn endpoint(&self) -> &str {
        (**self).endpoint()
    }
}

/// Pick the socket transport for `tcp://` endpoints, serial otherwise.
pub fn open_transport(config: &EndpointConfig) -> Box<dyn Transport> {
    match config.socket_address() {
        Some(address) => Box::new(SocketTransport::new(address, config.timeout)),
        None => Box::new(SerialTransport::new(config.clone())),
    }
}

fn not_open(endpoint: &str) -> McushError {
    McushError::Connection {
        endpoint: endpoint.to_string(),
        reason: "port is not open".to_string(),
    }
}

fn port_fault(endpoint: &str, err: impl std::fmt::Display) -> McushError {
    McushError::Connection {
        endpoint: endpoint.to_string(),
        reason: err.to_string(),
    }
}

/// Read up to `n` bytes, stopping early on timeout or end of stream.
fn read_bounded<R: Read + ?Sized>(reader: &mut R, n: usize, endpoint: &str) -> Result<Vec<u8>> {
    let mut buf = vec![0u8; n];
    let mut got = 0;
    while got < n {
        match reader.read(&mut buf[got..]) {
            Ok(0) => break,
            Ok(k) => got += k,
            Err(e) if matches!(e.kind(), ErrorKind::TimedOut | ErrorKind::WouldBlock) => break,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(port_fault(endpoint, e)),
        }
    }
    buf.truncate(got);
    Ok(buf)
}

/// Serial port endpoint
pub struct SerialTransport {
    config: EndpointConfig,
    port: Option<Box<dyn SerialPort>>,
}

impl SerialTransport {
    pub fn new(config: EndpointConfig) -> Self {
        SerialTransport { config, port: None }
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }
}

impl Transport for SerialTransport {
    fn connect(&mut self) -> Result<()> {
        if self.port.is_some() {
            return Ok(());
        }
        let flow = if self.config.rtscts {
            serialport::FlowControl::Hardware
        } else {
            serialport::FlowControl::None
        };
        let mut port = serialport::new(&self.config.port, self.config.baudrate)
            .parity(self.config.parity.into())
            .flow_control(flow)
            .timeout(self.config.timeout)
            .open()
            .map_err(|e| {
                let reason = match e.kind() {
                    serialport::ErrorKind::NoDevice
                    | serialport::ErrorKind::Io(ErrorKind::NotFound) => {
                        "port not found".to_string()
                    }
                    _ => e.to_string(),
                };
                McushError::Connection {
                    endpoint: self.config.port.clone(),
                    reason,
                }
            })?;
        let _ = port.clear(serialport::ClearBuffer::All);
        debug!("opened {} at {} baud", self.config.port, self.config.baudrate);
        self.port = Some(port);
        Ok(())
    }

    fn disconnect(&mut self) {
        if self.port.take().is_some() {
            debug!("closed {}", self.config.port);
        }
    }

    fn is_connected(&self) -> bool {
        self.port.is_some()
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let endpoint = self.config.port.as_str();
        let port = self.port.as_mut().ok_or_else(|| not_open(endpoint))?;
        read_bounded(port.as_mut(), n, endpoint)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let endpoint = self.config.port.as_str();
        let port = self.port.as_mut().ok_or_else(|| not_open(endpoint))?;
        port.write_all(buf).map_err(|e| port_fault(endpoint, e))
    }

    fn flush(&mut self) -> Result<()> {
        let endpoint = self.config.port.as_str();
        let port = self.port.as_mut().ok_or_else(|| not_open(endpoint))?;
        port.flush().map_err(|e| port_fault(endpoint, e))
    }

    fn timeout(&self) -> Duration {
        self.config.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.config.timeout = timeout;
        if let Some(port) = self.port.as_mut() {
            port.set_timeout(timeout)?;
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.config.port
    }
}

/// Raw TCP socket endpoint
pub struct SocketTransport {
    address: String,
    timeout: Duration,
    stream: Option<TcpStream>,
}

impl SocketTransport {
    pub fn new(address: impl Into<String>, timeout: Duration) -> Self {
        SocketTransport {
            address: address.into(),
            timeout,
            stream: None,
        }
    }

    // std rejects a zero read timeout
    fn read_timeout(&self) -> Option<Duration> {
        Some(self.timeout.max(Duration::from_millis(1)))
    }
}

impl Transport for SocketTransport {
    fn connect(&mut self) -> Result<()> {
        if self.stream.is_some() {
            return Ok(());
        }
        let addr = self
            .address
            .to_socket_addrs()
            .map_err(|e| port_fault(&self.address, e))?
            .next()
            .ok_or_else(|| port_fault(&self.address, "address did not resolve"))?;
        let timeout = self.read_timeout().unwrap_or(self.timeout);
        let stream = TcpStream::connect_timeout(&addr, timeout)
            .map_err(|e| port_fault(&self.address, e))?;
        stream.set_read_timeout(self.read_timeout())?;
        stream.set_nodelay(true)?;
        debug!("connected to {}", self.address);
        self.stream = Some(stream);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(std::net::Shutdown::Both);
            debug!("disconnected from {}", self.address);
        }
    }

    fn is_connected(&self) -> bool {
        self.stream.is_some()
    }

    fn read(&mut self, n: usize) -> Result<Vec<u8>> {
        let endpoint = self.address.as_str();
        let stream = self.stream.as_mut().ok_or_else(|| not_open(endpoint))?;
        read_bounded(stream, n, endpoint)
    }

    fn write(&mut self, buf: &[u8]) -> Result<()> {
        let endpoint = self.address.as_str();
        let stream = self.stream.as_mut().ok_or_else(|| not_open(endpoint))?;
        stream.write_all(buf).map_err(|e| port_fault(endpoint, e))
    }

    fn flush(&mut self) -> Result<()> {
        let endpoint = self.address.as_str();
        let stream = self.stream.as_mut().ok_or_else(|| not_open(endpoint))?;
        stream.flush().map_err(|e| port_fault(endpoint, e))
    }

    fn timeout(&self) -> Duration {
        self.timeout
    }

    fn set_timeout(&mut self, timeout: Duration) -> Result<()> {
        self.timeout = timeout;
        let read_timeout = self.read_timeout();
        if let Some(stream) = self.stream.as_ref() {
            stream.set_read_timeout(read_timeout)?;
        }
        Ok(())
    }

    fn endpoint(&self) -> &str {
        &self.address
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;
    use std::net::TcpListener;

    #[test]
    fn socket_round_trip_and_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let server = std::thread::spawn(move || {
            let (mut peer, _) = listener.accept().unwrap();
            peer.write_all(b"ok\n").unwrap();
            let mut buf = [0u8; 4];
            peer.read_exact(&mut buf).unwrap();
            buf
        });

        let mut transport = SocketTransport::new(address, Duration::from_millis(100));
        assert!(!transport.is_connected());
        transport.connect().unwrap();
        assert_eq!(transport.read(3).unwrap(), b"ok\n");
        transport.write(b"ping").unwrap();
        transport.flush().unwrap();
        assert_eq!(&server.join().unwrap(), b"ping");
        // peer gone: short read, not an error
        assert!(transport.read(1).unwrap().is_empty());
        transport.disconnect();
        assert!(transport.read(1).is_err());
    }

    #[test]
    fn missing_serial_port_is_a_connection_error() {
        let mut transport = SerialTransport::new(EndpointConfig {
            port: "/dev/this-port-does-not-exist".to_string(),
            baudrate: 9600,
            parity: crate::types::Parity::None,
            rtscts: false,
            timeout: Duration::from_millis(10),
        });
        let err = transport.connect().unwrap_err();
        assert!(err.is_connection_error());
        assert!(!transport.is_connected());
    }
}
