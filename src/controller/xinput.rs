//! XInput-class pads via gilrs.
//!
//! gilrs keeps pad state current only while its event queue is drained, so
//! both the presence probe and the snapshot poll pump events first.

use gilrs::{Axis, Button, EventType, Gilrs};
use tracing::{debug, info, warn};

use crate::controller::driver::{
    ButtonSet, ControllerDriver, ControllerKind, ControllerSnapshot, LogicalButton,
};

pub struct XInputDriver {
    gilrs: Gilrs,
    active: Option<gilrs::GamepadId>,
}

impl XInputDriver {
    pub fn new() -> Result<Self, String> {
        let gilrs = Gilrs::new().map_err(|e| e.to_string())?;
        info!("Initialized gilrs backend for XInput-class pads");
        Ok(Self {
            gilrs,
            active: None,
        })
    }

    fn pump_events(&mut self) {
        while let Some(event) = self.gilrs.next_event() {
            match event.event {
                EventType::Connected => {
                    info!("XInput-class pad connected: {:?}", event.id);
                }
                EventType::Disconnected => {
                    warn!("XInput-class pad disconnected: {:?}", event.id);
                    if self.active == Some(event.id) {
                        self.active = None;
                    }
                }
                _ => {}
            }
        }
    }

    fn refresh_active(&mut self) {
        let still_connected = self
            .active
            .map(|id| self.gilrs.gamepad(id).is_connected())
            .unwrap_or(false);
        if !still_connected {
            self.active = self
                .gilrs
                .gamepads()
                .find(|(_, pad)| pad.is_connected())
                .map(|(id, pad)| {
                    debug!("Selected pad: {} ({})", pad.name(), id);
                    id
                });
        }
    }
}

impl ControllerDriver for XInputDriver {
    fn kind(&self) -> ControllerKind {
        ControllerKind::XInputPad
    }

    fn is_connected(&mut self) -> bool {
        self.pump_events();
        self.refresh_active();
        self.active.is_some()
    }

    fn poll_snapshot(&mut self) -> ControllerSnapshot {
        self.pump_events();
        let Some(id) = self.active else {
            return ControllerSnapshot::DISCONNECTED;
        };
        let pad = self.gilrs.gamepad(id);
        if !pad.is_connected() {
            self.active = None;
            return ControllerSnapshot::DISCONNECTED;
        }

        let mut buttons = ButtonSet::EMPTY;
        let mapping = [
            (Button::South, LogicalButton::Confirm),
            (Button::East, LogicalButton::Cancel),
            (Button::North, LogicalButton::Special),
            (Button::Start, LogicalButton::Menu),
            (Button::DPadUp, LogicalButton::DPadUp),
            (Button::DPadDown, LogicalButton::DPadDown),
            (Button::DPadLeft, LogicalButton::DPadLeft),
            (Button::DPadRight, LogicalButton::DPadRight),
        ];
        for (raw, logical) in mapping {
            if pad.is_pressed(raw) {
                buttons.insert(logical);
            }
        }

        ControllerSnapshot {
            connected: true,
            stick_x: scale_axis(pad.value(Axis::LeftStickX)),
            stick_y: scale_axis(pad.value(Axis::LeftStickY)),
            buttons,
        }
    }
}

/// gilrs axes are -1.0..=1.0; spread to the shared i16 range.
fn scale_axis(value: f32) -> i16 {
    (value.clamp(-1.0, 1.0) * i16::MAX as f32) as i16
}
