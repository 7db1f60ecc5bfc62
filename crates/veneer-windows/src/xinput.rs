use veneer_core::controller::{InputSource, PadState};
use windows::Win32::Foundation::ERROR_SUCCESS;
use windows::Win32::System::LibraryLoader::{GetProcAddress, LoadLibraryW};
use windows::Win32::UI::Input::XboxController::{
    XINPUT_STATE, XINPUT_VIBRATION, XInputGetState, XInputSetState,
};
use windows::core::{PCSTR, w};

type GetStateFn = unsafe extern "system" fn(u32, *mut XINPUT_STATE) -> u32;

/// Unnamed export of `xinput1_4.dll` that also reports the guide button.
const GET_STATE_EX_ORDINAL: usize = 100;

/// Real controllers through XInput.
pub struct XInput {
    get_state_ex: Option<GetStateFn>,
}

impl XInput {
    pub fn new() -> Self {
        // SAFETY: loads a system library and looks up an export by
        // ordinal; the signature matches XInputGetState.
        let get_state_ex = unsafe {
            LoadLibraryW(w!("xinput1_4.dll")).ok().and_then(|module| {
                GetProcAddress(module, PCSTR(GET_STATE_EX_ORDINAL as *const u8))
                    .map(|f| std::mem::transmute::<_, GetStateFn>(f))
            })
        };
        if get_state_ex.is_none() {
            tracing::debug!("Extended XInput state unavailable; guide button won't be forwarded");
        }
        Self { get_state_ex }
    }
}

impl Default for XInput {
    fn default() -> Self {
        Self::new()
    }
}

impl InputSource for XInput {
    fn poll(&mut self, index: usize) -> Option<PadState> {
        let mut state = XINPUT_STATE::default();
        // SAFETY: `state` is a live local the call fills.
        let result = unsafe {
            match self.get_state_ex {
                Some(get_state) => get_state(index as u32, &mut state),
                None => XInputGetState(index as u32, &mut state),
            }
        };
        if result != ERROR_SUCCESS.0 {
            return None;
        }
        let pad = state.Gamepad;
        Some(PadState {
            buttons: pad.wButtons.0,
            left_trigger: pad.bLeftTrigger,
            right_trigger: pad.bRightTrigger,
            thumb_lx: pad.sThumbLX,
            thumb_ly: pad.sThumbLY,
            thumb_rx: pad.sThumbRX,
            thumb_ry: pad.sThumbRY,
        })
    }

    fn set_rumble(&mut self, index: usize, large: u16, small: u16) {
        let vibration = XINPUT_VIBRATION {
            wLeftMotorSpeed: large,
            wRightMotorSpeed: small,
        };
        // SAFETY: `vibration` is a live local.
        let result = unsafe { XInputSetState(index as u32, &vibration) };
        if result != ERROR_SUCCESS.0 {
            tracing::trace!("Couldn't set rumble on controller {index}: {result}");
        }
    }
}
