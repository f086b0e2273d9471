use crate::channel::ChatUpdate;
use crate::hook::RawHook;
use crate::tmux::ScanOutput;

/// Events delivered to the control loop
#[derive(Debug, Clone)]
pub enum Action {
    /// An agent hook fired
    Hook(RawHook),
    /// Something arrived from the chat
    Chat(ChatUpdate),
    /// A pane scan finished
    Scan(ScanOutput),
    /// Time to drop expired pending state
    Sweep,
    /// Request to stop the bridge
    Quit,
}
