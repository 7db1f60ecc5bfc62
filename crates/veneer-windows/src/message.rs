use veneer_core::overlay::MessageSource;
use windows::Win32::UI::WindowsAndMessaging::{MSG, PM_NOREMOVE, PeekMessageW};

/// Peeks this thread's message queue without consuming anything.
#[derive(Debug, Default)]
pub struct QueuePeek;

impl MessageSource for QueuePeek {
    fn peek(&mut self) -> Option<u32> {
        let mut msg = MSG::default();
        // SAFETY: PeekMessageW only copies the head of this thread's queue
        // into `msg` with PM_NOREMOVE.
        let any = unsafe { PeekMessageW(&mut msg, None, 0, 0, PM_NOREMOVE) }.as_bool();
        any.then_some(msg.message)
    }
}
