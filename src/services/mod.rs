pub mod completion;
pub mod conversation;
pub mod crypto;
pub mod ensemble;
pub mod evidence;
pub mod openrouter;
pub mod orchestrator;
pub mod queue;
pub mod scoring;
pub mod state;
pub mod vision;
