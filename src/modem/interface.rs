use serialport::{ClearBuffer, SerialPort};
use std::{
    io::{ErrorKind, Read, Write},
    time::Duration,
};

/// Half-duplex byte channel to a serial device.
///
/// Both primitives block; [Transport::read] returns `Ok(0)`
/// when nothing arrived within `timeout`.
pub trait Transport: Send + 'static {
    /// Writes all `bytes`
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()>;

    /// Reads whatever is available, waiting at most `timeout`
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize>;

    /// Drops pending input (unsolicited result codes, late replies)
    fn discard_input(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

/// [Transport] over a physical UART
pub struct SerialInterface {
    port: Box<dyn SerialPort>,
}

impl SerialInterface {
    /// Opens `port` at desired `baud` rate, 8N1, no flow control
    pub fn open(port: &str, baud: u32) -> Result<Self, serialport::Error> {
        let port = serialport::new(port, baud)
            .data_bits(serialport::DataBits::Eight)
            .stop_bits(serialport::StopBits::One)
            .parity(serialport::Parity::None)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(250))
            .open()?;

        Ok(Self::from_serial_port(port))
    }

    /// Creates a new [SerialInterface] from an opened port
    pub fn from_serial_port(port: Box<dyn SerialPort>) -> Self {
        Self { port }
    }
}

impl Transport for SerialInterface {
    fn write(&mut self, bytes: &[u8]) -> std::io::Result<()> {
        self.port.write_all(bytes)?;
        self.port.flush()
    }

    /// Reads the serial port, converting timeouts into "no data received"
    fn read(&mut self, buf: &mut [u8], timeout: Duration) -> std::io::Result<usize> {
        self.port.set_timeout(timeout)?;

        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) => {
                if e.kind() == ErrorKind::TimedOut {
                    Ok(0)
                } else {
                    Err(e)
                }
            },
        }
    }

    fn discard_input(&mut self) -> std::io::Result<()> {
        self.port.clear(ClearBuffer::Input)?;
        Ok(())
    }
}
