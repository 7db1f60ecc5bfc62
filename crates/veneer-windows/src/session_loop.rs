use std::sync::mpsc;
use std::thread;
use std::time::{Duration, Instant};

use tracing::Level;
use veneer_core::config::{self, Config};
use veneer_core::controller::{GamepadBus, InputSource};
use veneer_core::focus::ForegroundInterceptor;
use veneer_core::ipc::{Command, Response};
use veneer_core::log::DiagnosticLog;
use veneer_core::session::{Platform, Session};
use veneer_core::PlatformResult;

use crate::hid::HidDevices;
use crate::hidhide::HidHide;
use crate::hook::ForegroundHook;
use crate::hotkey::{HotkeyAction, HotkeyManager};
use crate::message::QueuePeek;
use crate::priority::CurrentProcess;
use crate::process::Win32Processes;
use crate::vigem::ViGEmBus;
use crate::window::{Desktop, TargetWindow};
use crate::xinput::XInput;

use super::session_threads;
use super::session_types::SessionMsg;

/// Title the host platform sees.
const WINDOW_TITLE: &str = "VeneerTarget";

/// Pacing when `window.maxFps` is 0.
const DEFAULT_FPS: u32 = 60;

/// The frame loop, separated so the pid file is always removed in `run()`.
pub(super) fn session_loop(config: Config, disable_watchdog: bool) -> PlatformResult<()> {
    let panel_log = DiagnosticLog::default();
    let _log_guard = veneer_core::log::init(
        &config.logging,
        config.extended_logging,
        config::data_dir().map(|d| d.join("logs")).as_deref(),
        &panel_log,
    );

    tracing::info!("Session started (PID: {})", std::process::id());
    tracing::info!(
        "Config: name={:?}, launch={}, hideDevices={}, controllers={}, maxFps={}",
        config.name,
        config.launch.launch,
        config.devices.hide_devices,
        config.max_slots(),
        config.window.max_fps
    );

    let window = TargetWindow::create(WINDOW_TITLE, &config.window)?;
    let frame = frame_period(config.window.max_fps);
    let mut session = Session::new(config.clone(), platform(&config, &window));

    let (tx, rx) = mpsc::channel::<SessionMsg>();
    let _listener = session_threads::spawn_ipc_listener(tx.clone(), session.shared_pids())?;
    session_threads::spawn_interrupt_bridge(tx)?;

    let mut hotkeys = HotkeyManager::new();
    hotkeys.register_defaults();

    if let Err(e) = session.start() {
        tracing::error!("Launch failed: {e}");
    }
    if !disable_watchdog {
        session_threads::spawn_watchdog();
    }

    while !session.should_stop() {
        let started = Instant::now();

        session.tick();

        let pumped = window.pump();
        for id in pumped.hotkeys {
            if hotkeys.dispatch(id) == Some(HotkeyAction::ToggleForcedFocus) {
                session.toggle_forced_focus();
            }
        }
        if pumped.quit {
            session.request_shutdown();
        }

        while let Ok(msg) = rx.try_recv() {
            match msg {
                SessionMsg::Command(command, reply_tx) => {
                    let response = handle_command(&mut session, &command, &panel_log);
                    let _ = reply_tx.send(response);
                }
                SessionMsg::Interrupt => session.request_shutdown(),
            }
        }

        session.draw_overlay(window.has_focus());

        if let Some(rest) = frame.checked_sub(started.elapsed()) {
            thread::sleep(rest);
        }
    }

    session.teardown();
    tracing::info!("Session ended");
    Ok(())
}

/// Builds the Win32 implementation of every session seam.
fn platform(config: &Config, window: &TargetWindow) -> Platform {
    let gamepad = match ViGEmBus::connect(config.max_slots()) {
        Ok(bus) => {
            let bus: Box<dyn GamepadBus + Send> = Box::new(bus);
            let input: Box<dyn InputSource + Send> = Box::new(XInput::new());
            Some((bus, input))
        }
        Err(e) => {
            tracing::error!("Virtual gamepad bus not available: {e}");
            None
        }
    };

    Platform {
        own_window: window.handle(),
        filter_driver: Box::new(HidHide::new()),
        hid: Box::new(HidDevices),
        gamepad,
        processes: Box::new(Win32Processes::new()),
        messages: Box::new(QueuePeek),
        windows: Box::new(Desktop),
        priority: Box::new(CurrentProcess),
        interceptor: Box::new(|flags| -> Box<dyn ForegroundInterceptor> {
            Box::new(ForegroundHook::for_user32(flags))
        }),
    }
}

/// Answers a forwarded control command. `Status` also reports the most
/// recent problem from the diagnostic log.
fn handle_command(session: &mut Session, command: &Command, panel_log: &DiagnosticLog) -> Response {
    let mut response = session.handle(command);
    if *command == Command::Status
        && let Some(problem) = panel_log
            .recent()
            .into_iter()
            .rev()
            .find(|entry| entry.level <= Level::WARN)
    {
        let message = response.message.take().unwrap_or_default();
        response.message = Some(format!("{message}; last problem: {}", problem.message));
    }
    response
}

fn frame_period(max_fps: i32) -> Duration {
    let fps = u32::try_from(max_fps).ok().filter(|&f| f > 0).unwrap_or(DEFAULT_FPS);
    Duration::from_secs(1) / fps
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn zero_fps_uses_default_pacing() {
        // Act
        let period = frame_period(0);

        // Assert
        assert_eq!(period, Duration::from_secs(1) / DEFAULT_FPS);
    }

    #[test]
    fn configured_fps_sets_the_period() {
        // Act
        let period = frame_period(250);

        // Assert
        assert_eq!(period, Duration::from_millis(4));
    }
}
