use veneer_core::priority::{PriorityClass, ProcessPriority};
use windows::Win32::System::Threading::{
    ABOVE_NORMAL_PRIORITY_CLASS, BELOW_NORMAL_PRIORITY_CLASS, GetCurrentProcess,
    HIGH_PRIORITY_CLASS, IDLE_PRIORITY_CLASS, NORMAL_PRIORITY_CLASS, PROCESS_CREATION_FLAGS,
    REALTIME_PRIORITY_CLASS, SetPriorityClass,
};

/// `SetPriorityClass` on the current process.
pub struct CurrentProcess;

fn class(priority: ProcessPriority) -> PROCESS_CREATION_FLAGS {
    match priority {
        ProcessPriority::Realtime => REALTIME_PRIORITY_CLASS,
        ProcessPriority::High => HIGH_PRIORITY_CLASS,
        ProcessPriority::AboveNormal => ABOVE_NORMAL_PRIORITY_CLASS,
        ProcessPriority::Normal => NORMAL_PRIORITY_CLASS,
        ProcessPriority::BelowNormal => BELOW_NORMAL_PRIORITY_CLASS,
        ProcessPriority::Low => IDLE_PRIORITY_CLASS,
    }
}

impl PriorityClass for CurrentProcess {
    fn apply(&mut self, priority: ProcessPriority) -> bool {
        // SAFETY: the pseudo handle of the current process needs no closing.
        match unsafe { SetPriorityClass(GetCurrentProcess(), class(priority)) } {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!("SetPriorityClass({priority}) failed: {e}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use windows::Win32::System::Threading::GetPriorityClass;

    use super::*;

    #[test]
    fn applied_class_is_visible_to_the_process() {
        // Arrange
        let mut current = CurrentProcess;

        // Act
        let applied = current.apply(ProcessPriority::BelowNormal);
        // SAFETY: pseudo handle of this process.
        let observed = unsafe { GetPriorityClass(GetCurrentProcess()) };
        current.apply(ProcessPriority::Normal);

        // Assert
        assert!(applied);
        assert_eq!(observed, BELOW_NORMAL_PRIORITY_CLASS.0);
    }
}
