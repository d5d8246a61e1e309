//! Core study coach components
//!
//! Session management and streaming chat live here, together with the
//! attachment encoder and the single-shot study tools.

mod attachment;
mod chat;
mod session;
mod study;

pub use attachment::Attachment;
pub use chat::{ChatError, ChatRegistry, ChatSettings, TurnEvent};
pub use session::SessionManager;
pub use study::{Flashcard, StudyPlanItem, StudyTools};
