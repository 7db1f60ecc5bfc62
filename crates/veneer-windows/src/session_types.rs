use std::sync::mpsc;

use veneer_core::ipc::{Command, Response};

/// Internal message type for the frame loop.
pub(super) enum SessionMsg {
    /// A control endpoint command with a channel for the response.
    Command(Command, ResponseSender),
    /// Ctrl+C or console close.
    Interrupt,
}

/// Sends a response back to the listener for the connected client.
pub(super) type ResponseSender = mpsc::Sender<Response>;
