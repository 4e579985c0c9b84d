// SPDX-License-Identifier: MIT
// Copyright (c) 2026 ADNT Sarl <info@adnt.io>

//! USB CDC link carrying the framed update protocol.

use brisk_core::{Stream, TransportError};
use rp2040_hal::usb::UsbBus;
use rp2040_hal::Timer;
use usb_device::class_prelude::UsbBusAllocator;
use usb_device::prelude::*;
use usbd_serial::SerialPort;

/// Give up on a write the host does not drain within this time.
const WRITE_TIMEOUT_US: u64 = 100_000;

#[derive(Debug, defmt::Format)]
pub enum UsbInitError {
    StringTooLong,
}

pub struct UsbStream {
    serial: SerialPort<'static, UsbBus>,
    usb_dev: UsbDevice<'static, UsbBus>,
    timer: Timer,
}

impl UsbStream {
    pub fn new(usb_bus: &'static UsbBusAllocator<UsbBus>, timer: Timer) -> Result<Self, UsbInitError> {
        let serial = SerialPort::new(usb_bus);
        let usb_dev = UsbDeviceBuilder::new(usb_bus, UsbVidPid(0x2E8A, 0x000A))
            .strings(&[StringDescriptors::default()
                .manufacturer("ADNT")
                .product("Brisk Loader")
                .serial_number("0001")])
            .map_err(|_| UsbInitError::StringTooLong)?
            .device_class(usbd_serial::USB_CLASS_CDC)
            .build();

        Ok(Self {
            serial,
            usb_dev,
            timer,
        })
    }

    fn now_us(&self) -> u64 {
        self.timer.get_counter().ticks()
    }

    /// Poll USB device. Must be called frequently.
    pub fn poll(&mut self) -> bool {
        self.usb_dev.poll(&mut [&mut self.serial])
    }

    /// Keep servicing the bus for `us` so queued responses reach the host.
    pub fn drain(&mut self, us: u64) {
        let start = self.now_us();
        while self.now_us() - start < us {
            self.poll();
            let _ = self.serial.flush();
        }
    }
}

impl Stream for UsbStream {
    fn read(&mut self, buf: &mut [u8], timeout_ms: u32) -> Result<usize, TransportError> {
        let start = self.now_us();
        let timeout_us = timeout_ms as u64 * 1_000;

        loop {
            self.poll();
            match self.serial.read(buf) {
                Ok(n) if n > 0 => return Ok(n),
                Ok(_) | Err(UsbError::WouldBlock) => {}
                Err(_) => return Err(TransportError::Io),
            }
            if self.now_us() - start >= timeout_us {
                return Err(TransportError::Timeout);
            }
        }
    }

    fn write(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let start = self.now_us();
        let mut offset = 0;
        while offset < data.len() {
            match self.serial.write(&data[offset..]) {
                Ok(n) => offset += n,
                Err(UsbError::WouldBlock) => {
                    if self.now_us() - start >= WRITE_TIMEOUT_US {
                        return Err(TransportError::Disconnected);
                    }
                    self.poll();
                }
                Err(_) => return Err(TransportError::Io),
            }
        }
        self.poll();
        Ok(())
    }

    /// usbd-serial exposes no receive count, so every read waits for its
    /// timeout or the first packet.
    fn available(&mut self) -> usize {
        0
    }
}
