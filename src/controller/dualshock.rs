//! PlayStation pad driver: DualShock 4 and DualSense over raw HID.

use tracing::{debug, info, warn};

use crate::controller::driver::{
    ButtonSet, ControllerDriver, ControllerKind, ControllerSnapshot, LogicalButton,
};
use crate::controller::hid::{HidDevice, SharedHidApi, MAX_REPORTS_PER_TICK, REPORT_LEN};

pub const SONY_VENDOR_ID: u16 = 0x054C;
pub const DUALSHOCK4_PRODUCT_ID: u16 = 0x05C4;
pub const DUALSHOCK4_V2_PRODUCT_ID: u16 = 0x09CC;
pub const DUALSENSE_PRODUCT_ID: u16 = 0x0CE6;

const PRODUCT_IDS: [u16; 3] = [
    DUALSHOCK4_PRODUCT_ID,
    DUALSHOCK4_V2_PRODUCT_ID,
    DUALSENSE_PRODUCT_ID,
];

pub struct DualShockDriver {
    api: SharedHidApi,
    device: Option<HidDevice>,
    kind: ControllerKind,
    last: ControllerSnapshot,
}

impl DualShockDriver {
    pub fn new(api: SharedHidApi) -> Self {
        Self {
            api,
            device: None,
            kind: ControllerKind::DualShock,
            last: ControllerSnapshot::DISCONNECTED,
        }
    }

    fn try_open(&mut self) {
        match HidDevice::open_matching(&self.api, SONY_VENDOR_ID, &PRODUCT_IDS) {
            Ok(Some(device)) => {
                self.kind = if device.product_id == DUALSENSE_PRODUCT_ID {
                    ControllerKind::DualSense
                } else {
                    ControllerKind::DualShock
                };
                info!("Connected to {}", self.kind);
                send_init(&device, self.kind);
                self.device = Some(device);
            }
            Ok(None) => {}
            Err(e) => debug!("PlayStation pad probe failed: {}", e),
        }
    }

    fn drop_device(&mut self) {
        if self.device.take().is_some() {
            warn!("{} disconnected", self.kind);
        }
        self.last = ControllerSnapshot::DISCONNECTED;
    }
}

impl ControllerDriver for DualShockDriver {
    fn kind(&self) -> ControllerKind {
        self.kind
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
                    report_len = data.len();
                    report[..report_len].copy_from_slice(data);
                }
                Ok(None) => break,
                Err(e) => {
                    // Read failure means the pad went away; the next presence
                    // scan will reopen it if it comes back.
                    debug!("{} read error: {}", self.kind, e);
                    self.drop_device();
                    return ControllerSnapshot::DISCONNECTED;
                }
            }
        }

        if report_len > 0 {
            self.last = match self.kind {
                ControllerKind::DualSense => parse_dualsense_report(&report[..report_len]),
                _ => parse_dualshock4_report(&report[..report_len]),
            };
        }
        self.last
    }
}

/// Vendor init report; nudges the pad into sending full input reports.
fn send_init(device: &HidDevice, kind: ControllerKind) {
    let mut init = [0u8; REPORT_LEN];
    init[0] = match kind {
        ControllerKind::DualSense => 0x02,
        _ => 0x05,
    };
    if let Err(e) = device.write(&init) {
        debug!("Init report for {} not accepted: {}", kind, e);
    }
}

/// DualShock 4 USB input report (id 0x01):
/// byte 1/2 left stick X/Y, byte 5 = d-pad hat nibble + face buttons
/// (square 0x10, cross 0x20, circle 0x40, triangle 0x80), byte 6 bit 0x20 options.
fn parse_dualshock4_report(report: &[u8]) -> ControllerSnapshot {
    if report.len() < 7 {
        return ControllerSnapshot::DISCONNECTED;
    }

    let mut buttons = ButtonSet::EMPTY;
    let face = report[5];
    if face & 0x20 != 0 {
        buttons.insert(LogicalButton::Confirm); // cross
    }
    if face & 0x40 != 0 {
        buttons.insert(LogicalButton::Cancel); // circle
    }
    if face & 0x80 != 0 {
        buttons.insert(LogicalButton::Special); // triangle
    }
    if report[6] & 0x20 != 0 {
        buttons.insert(LogicalButton::Menu); // options
    }
    insert_hat(&mut buttons, face & 0x0F);

    ControllerSnapshot {
        connected: true,
        stick_x: scale_stick_byte(report[1]),
        stick_y: scale_stick_byte(report[2]).saturating_neg(),
        buttons,
    }
}

/// DualSense USB input report (id 0x01): same stick bytes, button block
/// shifted to bytes 8/9.
fn parse_dualsense_report(report: &[u8]) -> ControllerSnapshot {
    if report.len() < 10 {
        return ControllerSnapshot::DISCONNECTED;
    }

    let mut buttons = ButtonSet::EMPTY;
    let face = report[8];
    if face & 0x20 != 0 {
        buttons.insert(LogicalButton::Confirm);
    }
    if face & 0x40 != 0 {
        buttons.insert(LogicalButton::Cancel);
    }
    if face & 0x80 != 0 {
        buttons.insert(LogicalButton::Special);
    }
    if report[9] & 0x20 != 0 {
        buttons.insert(LogicalButton::Menu);
    }
    insert_hat(&mut buttons, face & 0x0F);

    ControllerSnapshot {
        connected: true,
        stick_x: scale_stick_byte(report[1]),
        stick_y: scale_stick_byte(report[2]).saturating_neg(),
        buttons,
    }
}

/// D-pad hat nibble: 0 = north, clockwise, 8 = released. Diagonals set both
/// component directions.
fn insert_hat(buttons: &mut ButtonSet, hat: u8) {
    if matches!(hat, 7 | 0 | 1) {
        buttons.insert(LogicalButton::DPadUp);
    }
    if matches!(hat, 1 | 2 | 3) {
        buttons.insert(LogicalButton::DPadRight);
    }
    if matches!(hat, 3 | 4 | 5) {
        buttons.insert(LogicalButton::DPadDown);
    }
    if matches!(hat, 5 | 6 | 7) {
        buttons.insert(LogicalButton::DPadLeft);
    }
}

/// Raw stick bytes are 0..=255 centered on 128; spread them across the full
/// i16 range so one dead-zone threshold works for every controller kind.
fn scale_stick_byte(raw: u8) -> i16 {
    ((raw as i16) - 128).saturating_mul(256)
}
