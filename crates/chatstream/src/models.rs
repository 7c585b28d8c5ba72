//! These models represent the objects passed around by the turn controller
//!
//! There are several different related formats we need to interact with:
//! - openai chat-completions messages/tools, sent from the agent to the LLM
//! - anthropic messages/tools, sent from the agent to the LLM
//! - tool registry calls, sent from the agent to whatever executes the tools
//!
//! We always convert at the edges: the adapters in `providers` translate these
//! internal structs to and from each wire format, so the internal models are not
//! an exact match to either backend.
pub mod message;
pub mod tool;
