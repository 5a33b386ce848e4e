use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::os::unix::prelude::AsRawFd;
use std::time::Duration;

use tracing::{info, warn};

use super::{wire_time, PixelChannel};
use crate::error::{PipelineError, Result};

/*
Linux spidev interface:
https://github.com/torvalds/linux/blob/master/include/uapi/linux/spi/spidev.h

A plain write() on the device node is one half-duplex transfer at the
configured max speed. The kernel refuses writes larger than the module's
bufsiz parameter (4096 by default; Raspberry Pi images often raise it with
spidev.bufsiz=65536 on the kernel command line).
*/

mod linux {
    const SPI_IOC_MAGIC: u8 = b'k';

    const SPI_IOC_TYPE_MODE: u8 = 1;
    const SPI_IOC_TYPE_BITS_PER_WORD: u8 = 3;
    const SPI_IOC_TYPE_MAX_SPEED_HZ: u8 = 4;

    nix::ioctl_write_ptr!(spi_write_mode, SPI_IOC_MAGIC, SPI_IOC_TYPE_MODE, u8);
    nix::ioctl_write_ptr!(
        spi_write_bits_per_word,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_BITS_PER_WORD,
        u8
    );
    nix::ioctl_write_ptr!(
        spi_write_max_speed_hz,
        SPI_IOC_MAGIC,
        SPI_IOC_TYPE_MAX_SPEED_HZ,
        u32
    );
}

const BUFSIZ_PARAM: &str = "/sys/module/spidev/parameters/bufsiz";

/// SPI MOSI line used as a WS2811 waveform generator
pub struct SpiChannel {
    device: String,
    file: File,
    clock_hz: u32,
    max_transfer: Option<usize>,
}

impl SpiChannel {
    /// Open `/dev/spidevB.C` in mode 0, 8 bits per word, at `clock_hz`
    pub fn open(device: &str, clock_hz: u32) -> Result<Self> {
        let unavailable = |reason: String| PipelineError::channel_unavailable(device, reason);

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .open(device)
            .map_err(|e| unavailable(e.to_string()))?;

        let fd = file.as_raw_fd();
        let mode: u8 = 0;
        let bits: u8 = 8;
        // SAFETY: fd is an open spidev node and each pointer outlives its call
        unsafe {
            linux::spi_write_mode(fd, &mode)
                .map_err(|e| unavailable(format!("failed to set SPI mode: {}", e)))?;
            linux::spi_write_bits_per_word(fd, &bits)
                .map_err(|e| unavailable(format!("failed to set bits per word: {}", e)))?;
            linux::spi_write_max_speed_hz(fd, &clock_hz)
                .map_err(|e| unavailable(format!("failed to set {} Hz clock: {}", clock_hz, e)))?;
        }

        let max_transfer = match std::fs::read_to_string(BUFSIZ_PARAM) {
            Ok(text) => text.trim().parse::<usize>().ok(),
            Err(e) => {
                warn!("Could not read {}: {}; transfer size unchecked", BUFSIZ_PARAM, e);
                None
            }
        };

        info!(
            "Opened {} at {} Hz (transfer limit: {})",
            device,
            clock_hz,
            max_transfer.map_or_else(|| "unknown".to_string(), |n| format!("{} bytes", n))
        );

        Ok(Self {
            device: device.to_string(),
            file,
            clock_hz,
            max_transfer,
        })
    }
}

impl PixelChannel for SpiChannel {
    fn name(&self) -> &str {
        &self.device
    }

    fn transfer(&mut self, data: &[u8]) -> io::Result<usize> {
        // One write() is one SPI message; a short count means a truncated frame
        self.file.write(data)
    }

    fn expected_duration(&self, len: usize) -> Option<Duration> {
        Some(wire_time(len, 8, self.clock_hz))
    }

    fn max_transfer(&self) -> Option<usize> {
        self.max_transfer
    }
}
