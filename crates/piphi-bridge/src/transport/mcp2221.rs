//! MCP2221 USB-I2C bridge over Linux hidraw
//!
//! The MCP2221 exposes a vendor HID interface next to its CDC serial port.
//! Every command is a 64-byte output report answered by a 64-byte input
//! report whose first byte echoes the command code.
//!
//! ```text
//! 0x10  status / set parameters (cancel transfer, set I2C divider)
//! 0x90  I2C write
//! 0x94  I2C write, no stop
//! 0x91  I2C read
//! 0x93  I2C read, repeated start
//! 0x40  get I2C data
//! 0xB0  read flash data
//! ```
//!
//! The HID interface is matched to a tty candidate through their common
//! USB device directory in sysfs.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use piphi_core::Candidate;
use tracing::{debug, info};

use super::{BridgeOpener, I2cBus, OpenedBridge, TransportError};
use crate::config::BridgeConfig;

const REPORT_LEN: usize = 64;
const MAX_CHUNK: usize = 60;
const RETRY_MAX: usize = 50;
const RETRY_DELAY: Duration = Duration::from_millis(1);
const CLOCK_HZ: u32 = 12_000_000;
/// Longest wait for the bridge to answer one command
const RESPONSE_TIMEOUT: Duration = Duration::from_millis(500);

const CMD_STATUS_SET: u8 = 0x10;
const CMD_I2C_WRITE: u8 = 0x90;
const CMD_I2C_WRITE_NO_STOP: u8 = 0x94;
const CMD_I2C_READ: u8 = 0x91;
const CMD_I2C_READ_REPEATED: u8 = 0x93;
const CMD_I2C_GET_DATA: u8 = 0x40;
const CMD_READ_FLASH: u8 = 0xB0;

const FLASH_USB_SERIAL: u8 = 0x04;
const STATUS_CANCEL: u8 = 0x10;
const STATUS_SET_SPEED: u8 = 0x20;

// I2C engine states reported in the status response
const STATE_IDLE: u8 = 0x00;
const STATE_ADDR_NACK: u8 = 0x25;
const STATE_PARTIAL_DATA: u8 = 0x41;
const STATE_WRITING_NO_STOP: u8 = 0x45;
const STATE_READ_PARTIAL: u8 = 0x54;
const STATE_READ_COMPLETE: u8 = 0x55;
const STATE_READ_ERROR: u8 = 0x7F;
const UNRECOVERABLE_STATES: [u8; 5] = [0x12, 0x23, STATE_ADDR_NACK, 0x44, 0x62];
const MASK_ADDR_NACK: u8 = 0x40;

type Report = [u8; REPORT_LEN];

/// An open MCP2221 HID interface
pub struct Mcp2221 {
    path: PathBuf,
    file: Mutex<File>,
}

impl Mcp2221 {
    /// Open a hidraw node and program the I2C clock
    pub fn open(path: impl AsRef<Path>, i2c_speed_hz: u32) -> Result<Self, TransportError> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let device = Self {
            path,
            file: Mutex::new(file),
        };
        device.set_speed(i2c_speed_hz)?;
        Ok(device)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// USB serial number stored in the chip's flash
    pub fn read_serial(&self) -> Result<String, TransportError> {
        let mut file = self.file.lock();
        let resp = transfer(&mut file, &[CMD_READ_FLASH, FLASH_USB_SERIAL])?;
        if resp[1] != 0x00 {
            return Err(TransportError::Protocol("flash read rejected".into()));
        }
        let len = (resp[2] as usize).saturating_sub(2).min(REPORT_LEN - 4);
        let units: Vec<u16> = resp[4..4 + len]
            .chunks_exact(2)
            .map(|pair| u16::from_le_bytes([pair[0], pair[1]]))
            .collect();
        String::from_utf16(&units)
            .map_err(|e| TransportError::Protocol(format!("serial number: {e}")))
    }

    fn set_speed(&self, hz: u32) -> Result<(), TransportError> {
        if hz == 0 {
            return Err(TransportError::Protocol("I2C speed must be positive".into()));
        }
        let divider = (CLOCK_HZ / hz).saturating_sub(3).min(u8::MAX as u32) as u8;
        let mut file = self.file.lock();
        if status(&mut file)?[8] != STATE_IDLE {
            cancel(&mut file)?;
        }
        let resp = transfer(&mut file, &[CMD_STATUS_SET, 0x00, 0x00, STATUS_SET_SPEED, divider])?;
        if resp[3] != STATUS_SET_SPEED {
            return Err(TransportError::Protocol(format!(
                "I2C speed {hz} Hz not accepted"
            )));
        }
        debug!(path = %self.path.display(), hz, divider, "MCP2221 I2C speed set");
        Ok(())
    }
}

impl I2cBus for Mcp2221 {
    fn read_byte_data(&self, address: u8, register: u8) -> Result<u8, TransportError> {
        let data = self.read_block_data(address, register, 1)?;
        data.first()
            .copied()
            .ok_or_else(|| TransportError::Protocol("empty read".into()))
    }

    fn read_block_data(
        &self,
        address: u8,
        register: u8,
        len: usize,
    ) -> Result<Vec<u8>, TransportError> {
        let mut file = self.file.lock();
        i2c_write(&mut file, CMD_I2C_WRITE_NO_STOP, address, &[register])?;
        i2c_read(&mut file, CMD_I2C_READ_REPEATED, address, len)
    }

    fn write(&self, address: u8, data: &[u8]) -> Result<(), TransportError> {
        let mut file = self.file.lock();
        i2c_write(&mut file, CMD_I2C_WRITE, address, data)
    }

    fn read(&self, address: u8, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut file = self.file.lock();
        i2c_read(&mut file, CMD_I2C_READ, address, len)
    }
}

fn transfer(file: &mut File, command: &[u8]) -> Result<Report, TransportError> {
    // hidraw expects a leading report id; the MCP2221 uses none
    let mut out = [0u8; REPORT_LEN + 1];
    out[1..1 + command.len()].copy_from_slice(command);
    file.write_all(&out)?;

    wait_for_report(file, RESPONSE_TIMEOUT)?;
    let mut resp = [0u8; REPORT_LEN];
    let n = file.read(&mut resp)?;
    if n == 0 {
        return Err(TransportError::Io("bridge closed the HID interface".into()));
    }
    if resp[0] != command[0] {
        return Err(TransportError::Protocol(format!(
            "expected echo 0x{:02X}, got 0x{:02X}",
            command[0], resp[0]
        )));
    }
    Ok(resp)
}

/// Block until an input report is ready or `timeout` elapses
fn wait_for_report(file: &File, timeout: Duration) -> Result<(), TransportError> {
    let mut pollfd = libc::pollfd {
        fd: file.as_raw_fd(),
        events: libc::POLLIN,
        revents: 0,
    };
    let millis = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    loop {
        // SAFETY: one valid pollfd, owned by this frame, for the duration of the call
        let ready = unsafe { libc::poll(&mut pollfd, 1, millis) };
        match ready {
            0 => {
                return Err(TransportError::Timeout(format!(
                    "no response from bridge within {} ms",
                    timeout.as_millis()
                )))
            }
            n if n > 0 => return Ok(()),
            _ => {
                let err = io::Error::last_os_error();
                if err.kind() != io::ErrorKind::Interrupted {
                    return Err(err.into());
                }
            }
        }
    }
}

fn status(file: &mut File) -> Result<Report, TransportError> {
    transfer(file, &[CMD_STATUS_SET, 0x00])
}

fn cancel(file: &mut File) -> Result<(), TransportError> {
    transfer(file, &[CMD_STATUS_SET, 0x00, STATUS_CANCEL])?;
    Ok(())
}

fn i2c_write(file: &mut File, cmd: u8, address: u8, data: &[u8]) -> Result<(), TransportError> {
    if data.len() > MAX_CHUNK {
        return Err(TransportError::Protocol(format!(
            "write of {} bytes exceeds one report",
            data.len()
        )));
    }
    if status(file)?[8] != STATE_IDLE {
        cancel(file)?;
    }

    let len = data.len() as u16;
    let mut command = vec![cmd, (len & 0xFF) as u8, (len >> 8) as u8, address << 1];
    command.extend_from_slice(data);

    let mut accepted = false;
    for _ in 0..RETRY_MAX {
        let resp = transfer(file, &command)?;
        if resp[1] == 0x00 {
            accepted = true;
            break;
        }
        if UNRECOVERABLE_STATES.contains(&resp[2]) {
            cancel(file)?;
            return Err(TransportError::NotAcknowledged { address });
        }
        thread::sleep(RETRY_DELAY);
    }
    if !accepted {
        return Err(TransportError::Timeout(format!(
            "write to 0x{address:02X} not accepted"
        )));
    }

    for _ in 0..RETRY_MAX {
        let resp = status(file)?;
        if resp[20] & MASK_ADDR_NACK != 0 {
            cancel(file)?;
            return Err(TransportError::NotAcknowledged { address });
        }
        match resp[8] {
            STATE_IDLE => return Ok(()),
            STATE_WRITING_NO_STOP if cmd == CMD_I2C_WRITE_NO_STOP => return Ok(()),
            _ => thread::sleep(RETRY_DELAY),
        }
    }
    cancel(file)?;
    Err(TransportError::Timeout(format!(
        "write to 0x{address:02X} did not complete"
    )))
}

fn i2c_read(file: &mut File, cmd: u8, address: u8, len: usize) -> Result<Vec<u8>, TransportError> {
    let state = status(file)?[8];
    if state != STATE_IDLE && state != STATE_WRITING_NO_STOP {
        cancel(file)?;
    }

    let request = [
        cmd,
        (len & 0xFF) as u8,
        ((len >> 8) & 0xFF) as u8,
        (address << 1) | 0x01,
    ];
    let resp = transfer(file, &request)?;
    if resp[1] != 0x00 {
        cancel(file)?;
        return Err(TransportError::Io(format!(
            "read from 0x{address:02X} rejected (state 0x{:02X})",
            resp[2]
        )));
    }

    let mut out = Vec::with_capacity(len);
    while out.len() < len {
        let mut chunk = None;
        for _ in 0..RETRY_MAX {
            let resp = transfer(file, &[CMD_I2C_GET_DATA])?;
            if resp[1] == STATE_PARTIAL_DATA {
                thread::sleep(RETRY_DELAY);
                continue;
            }
            if resp[1] != 0x00 {
                cancel(file)?;
                return Err(TransportError::NotAcknowledged { address });
            }
            if resp[2] == STATE_ADDR_NACK {
                cancel(file)?;
                return Err(TransportError::NotAcknowledged { address });
            }
            if resp[3] == STATE_READ_ERROR {
                thread::sleep(RETRY_DELAY);
                continue;
            }
            if resp[2] == STATE_IDLE && resp[3] == 0x00 {
                chunk = Some(resp);
                break;
            }
            if resp[2] == STATE_READ_PARTIAL || resp[2] == STATE_READ_COMPLETE {
                chunk = Some(resp);
                break;
            }
            thread::sleep(RETRY_DELAY);
        }

        let resp = chunk.ok_or_else(|| {
            TransportError::Timeout(format!("read from 0x{address:02X} timed out"))
        })?;
        let take = (len - out.len()).min(MAX_CHUNK).min(resp[3] as usize);
        if take == 0 {
            return Err(TransportError::Protocol(format!(
                "read from 0x{address:02X} returned no data"
            )));
        }
        out.extend_from_slice(&resp[4..4 + take]);
    }
    Ok(out)
}

/// Opens MCP2221 bridges by locating the hidraw node of each candidate
pub struct Mcp2221Opener {
    config: BridgeConfig,
}

impl Mcp2221Opener {
    pub fn new(config: BridgeConfig) -> Self {
        Self { config }
    }

    /// hidraw node names whose HID device belongs to the configured VID:PID
    fn matching_nodes(&self) -> Vec<(String, PathBuf)> {
        let class_dir = self.config.sysfs_root.join("class/hidraw");
        let Ok(entries) = fs::read_dir(&class_dir) else {
            return Vec::new();
        };

        let hid_id = format!(
            "HID_ID=0003:{:08X}:{:08X}",
            self.config.vendor_id, self.config.product_id
        );
        let mut nodes: Vec<(String, PathBuf)> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                let device = fs::canonicalize(entry.path().join("device")).ok()?;
                let uevent = fs::read_to_string(device.join("uevent")).ok()?;
                uevent
                    .lines()
                    .any(|line| line.eq_ignore_ascii_case(&hid_id))
                    .then_some((name, device))
            })
            .collect();
        nodes.sort();
        nodes
    }

    fn locate(&self, candidate: &Candidate, index: usize) -> Result<PathBuf, TransportError> {
        let nodes = self.matching_nodes();

        let by_parent = candidate.usb_device.as_ref().and_then(|usb| {
            let usb = fs::canonicalize(usb).ok()?;
            nodes
                .iter()
                .find(|(_, device)| device.starts_with(&usb))
                .map(|(name, _)| name.clone())
        });

        let name = by_parent
            .or_else(|| nodes.get(index).map(|(name, _)| name.clone()))
            .ok_or_else(|| {
                TransportError::DeviceNotFound(format!(
                    "no hidraw interface for {}",
                    candidate.bus_path
                ))
            })?;
        Ok(self.config.dev_root.join(name))
    }
}

impl BridgeOpener for Mcp2221Opener {
    fn open(&self, candidate: &Candidate, index: usize) -> Result<OpenedBridge, TransportError> {
        let path = self.locate(candidate, index)?;
        let device = Mcp2221::open(&path, self.config.i2c_speed_hz)?;
        let bridge_serial = match device.read_serial() {
            Ok(serial) => Some(serial),
            Err(e) => {
                debug!(path = %path.display(), error = %e, "Could not read bridge serial");
                None
            }
        };
        info!(
            bus_path = %candidate.bus_path,
            hidraw = %path.display(),
            bridge_serial = ?bridge_serial,
            "Opened MCP2221 bridge"
        );
        Ok(OpenedBridge {
            bus: std::sync::Arc::new(device),
            bridge_serial,
        })
    }
}
