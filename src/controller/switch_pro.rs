//! Nintendo Switch Pro Controller driver over raw HID.

use std::time::Duration;
use tracing::{debug, info, warn};

use crate::controller::driver::{
    ButtonSet, ControllerDriver, ControllerKind, ControllerSnapshot, LogicalButton,
};
use crate::controller::hid::{HidDevice, SharedHidApi, MAX_REPORTS_PER_TICK, REPORT_LEN};

pub const NINTENDO_VENDOR_ID: u16 = 0x057E;
pub const SWITCH_PRO_PRODUCT_ID: u16 = 0x2009;
pub const CHARGING_GRIP_PRODUCT_ID: u16 = 0x2007;
pub const HORI_VARIANT_PRODUCT_ID: u16 = 0x2017;

const PRODUCT_IDS: [u16; 3] = [
    SWITCH_PRO_PRODUCT_ID,
    CHARGING_GRIP_PRODUCT_ID,
    HORI_VARIANT_PRODUCT_ID,
];

/// Standard full input report id; the pad only emits these after the USB
/// handshake below.
const FULL_REPORT_ID: u8 = 0x30;

pub struct SwitchProDriver {
    api: SharedHidApi,
    device: Option<HidDevice>,
    last: ControllerSnapshot,
}

impl SwitchProDriver {
    pub fn new(api: SharedHidApi) -> Self {
        Self {
            api,
            device: None,
            last: ControllerSnapshot::DISCONNECTED,
        }
    }

    fn try_open(&mut self) {
        match HidDevice::open_matching(&self.api, NINTENDO_VENDOR_ID, &PRODUCT_IDS) {
            Ok(Some(device)) => {
                info!("Connected to Switch Pro controller");
                send_init_sequence(&device);
                self.device = Some(device);
            }
            Ok(None) => {}
            Err(e) => debug!("Switch Pro probe failed: {}", e),
        }
    }

    fn drop_device(&mut self) {
        if self.device.take().is_some() {
            warn!("Switch Pro controller disconnected");
        }
        self.last = ControllerSnapshot::DISCONNECTED;
    }
}

impl ControllerDriver for SwitchProDriver {
    fn kind(&self) -> ControllerKind {
        ControllerKind::SwitchPro
    }

    fn is_connected(&mut self) -> bool {
        if self.device.is_none() {
            self.try_open();
        }
        self.device.is_some()
    }

    fn poll_snapshot(&mut self) -> ControllerSnapshot {
        let Some(device) = self.device.as_mut() else {
            return ControllerSnapshot::DISCONNECTED;
        };

        let mut report = [0u8; REPORT_LEN];
        let mut report_len = 0usize;
        for _ in 0..MAX_REPORTS_PER_TICK {
            match device.read_report() {
                Ok(Some(data)) => {
                    if data.first() == Some(&FULL_REPORT_ID) {
                        report_len = data.len();
                        report[..report_len].copy_from_slice(data);
                    }
                }
                Ok(None) => break,
                Err(e) => {
                    debug!("Switch Pro read error: {}", e);
                    self.drop_device();
                    return ControllerSnapshot::DISCONNECTED;
                }
            }
        }

        if report_len > 0 {
            self.last = parse_full_report(&report[..report_len]);
        }
        self.last
    }
}

/// USB bring-up: handshake, enable IMU, enable vibration, request device
/// info. Without the handshake the pad stays in its simple HID mode and
/// never sends 0x30 reports.
fn send_init_sequence(device: &HidDevice) {
    const SEQUENCE: [&[u8]; 4] = [
        &[0x80, 0x04], // handshake / force USB HID
        &[0x40, 0x01], // enable IMU
        &[0x48, 0x01], // enable vibration
        &[0x02],       // request device info
    ];
    for command in SEQUENCE {
        if let Err(e) = device.write(command) {
            debug!("Switch Pro init command not accepted: {}", e);
            return;
        }
        std::thread::sleep(Duration::from_millis(20));
    }
    debug!("Switch Pro init sequence sent");
}

/// Full input report (0x30): byte 3 right-hand buttons (Y 0x01, X 0x02,
/// B 0x04, A 0x08), byte 4 Plus 0x02, byte 5 d-pad bits (Down 0x01, Up 0x02,
/// Right 0x04, Left 0x08), left stick packed 12-bit in bytes 6..=8.
fn parse_full_report(report: &[u8]) -> ControllerSnapshot {
    if report.len() < 9 || report[0] != FULL_REPORT_ID {
        return ControllerSnapshot::DISCONNECTED;
    }

    let mut buttons = ButtonSet::EMPTY;
    if report[3] & 0x08 != 0 {
        buttons.insert(LogicalButton::Confirm); // A
    }
    if report[3] & 0x04 != 0 {
        buttons.insert(LogicalButton::Cancel); // B
    }
    if report[3] & 0x02 != 0 {
        buttons.insert(LogicalButton::Special); // X
    }
    if report[4] & 0x02 != 0 {
        buttons.insert(LogicalButton::Menu); // Plus
    }
    if report[5] & 0x02 != 0 {
        buttons.insert(LogicalButton::DPadUp);
    }
    if report[5] & 0x01 != 0 {
        buttons.insert(LogicalButton::DPadDown);
    }
    if report[5] & 0x08 != 0 {
        buttons.insert(LogicalButton::DPadLeft);
    }
    if report[5] & 0x04 != 0 {
        buttons.insert(LogicalButton::DPadRight);
    }

    let raw_x = (report[6] as u16) | (((report[7] & 0x0F) as u16) << 8);
    let raw_y = ((report[7] >> 4) as u16) | ((report[8] as u16) << 4);

    ControllerSnapshot {
        connected: true,
        stick_x: scale_stick_12bit(raw_x),
        stick_y: scale_stick_12bit(raw_y),
        buttons,
    }
}

/// 12-bit axes are 0..=4095 centered on 2048, Y up-positive already.
fn scale_stick_12bit(raw: u16) -> i16 {
    ((raw as i32 - 2048) * 16).clamp(i16::MIN as i32, i16::MAX as i32) as i16
}
