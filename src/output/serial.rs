use std::io::{self, Write};
use std::thread;
use std::time::Duration;

use serialport::SerialPort;
use tracing::{info, warn};

use super::{wire_time, PixelChannel};
use crate::error::{PipelineError, Result};

/// Serial link to a microcontroller that drives the strip itself
pub struct SerialChannel {
    name: String,
    port: Box<dyn SerialPort>,
    baud_rate: u32,
    /// Whether the nominal baud rate bounds the transfer time
    paced: bool,
}

impl SerialChannel {
    /// Open at 8N1 without flow control
    pub fn open(port_name: &str, baud_rate: u32) -> Result<Self> {
        let mut port = serialport::new(port_name, baud_rate)
            .data_bits(serialport::DataBits::Eight)
            .parity(serialport::Parity::None)
            .stop_bits(serialport::StopBits::One)
            .flow_control(serialport::FlowControl::None)
            .timeout(Duration::from_millis(1000))
            .open()
            .map_err(|e| PipelineError::channel_unavailable(port_name, e.to_string()))?;

        // USB CDC firmware commonly waits for DTR before accepting data
        if let Err(e) = port.write_data_terminal_ready(true) {
            warn!("Failed to set DTR on {}: {}", port_name, e);
        }

        // Allow device to initialize
        thread::sleep(Duration::from_millis(100));

        let paced = !is_usb_cdc(port_name);
        if paced {
            info!("Opened {} at {} baud", port_name, baud_rate);
        } else {
            info!("Opened {} (USB CDC, baud rate not enforced)", port_name);
        }

        Ok(Self {
            name: port_name.to_string(),
            port,
            baud_rate,
            paced,
        })
    }
}

/// USB CDC ACM devices move data at USB speed whatever baud rate is set
fn is_usb_cdc(port_name: &str) -> bool {
    port_name.contains("ttyACM") || port_name.contains("usbmodem")
}

impl PixelChannel for SerialChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn transfer(&mut self, data: &[u8]) -> io::Result<usize> {
        self.port.write_all(data)?;
        self.port.flush()?;
        Ok(data.len())
    }

    fn expected_duration(&self, len: usize) -> Option<Duration> {
        // Start + 8 data + stop bits per byte
        self.paced.then(|| wire_time(len, 10, self.baud_rate))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_usb_cdc_ports_are_not_paced() {
        assert!(is_usb_cdc("/dev/ttyACM0"));
        assert!(is_usb_cdc("/dev/cu.usbmodem14101"));
        assert!(!is_usb_cdc("/dev/ttyUSB0"));
        assert!(!is_usb_cdc("/dev/ttyAMA0"));
    }

    #[test]
    fn test_open_missing_port_fails_fast() {
        assert!(matches!(
            SerialChannel::open("/nonexistent/ttyACM9", 115_200),
            Err(PipelineError::ChannelUnavailable { .. })
        ));
    }
}
