pub mod events;
mod server;

pub use events::{
    AskUserQuestionEvent, HookKind, NotificationEvent, PermissionRequestEvent, Question,
    QuestionOption, RawHook, SessionStartEvent, StopEvent,
};
pub use server::serve;
